//! Harvested resources and their stable identities

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::ConfigError;

/// Property key under which a harvester attaches its attribute overrides
pub const ATTRIBUTE_OVERRIDES_KEY: &str = "attribute-overrides";

/// Opaque bag of harvest-time properties
pub type Properties = BTreeMap<String, serde_json::Value>;

static OVERRIDE_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^=]+)=([^=]+)$").expect("static regex"));

/// Lowercase hex SHA-256 of a logical name, used for every persistence key
pub fn persistence_key(name: &str) -> String {
    hex::encode(Sha256::digest(name.as_bytes()))
}

/// Stable identity of a resource, derived from its canonical location
pub fn correlation_id(location: &str) -> String {
    persistence_key(location)
}

#[derive(Debug, Clone, Error)]
pub enum ContentError {
    #[error("No resource available at {0}")]
    Unavailable(String),
    #[error("Failed to read {location}: {reason}")]
    ReadFailed { location: String, reason: String },
}

/// Bytes of a harvested resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceContent {
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl ResourceContent {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            mime_type: None,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

type Loader =
    Box<dyn Fn() -> BoxFuture<'static, Result<ResourceContent, ContentError>> + Send + Sync>;

/// Deferred access to a resource's bytes.
///
/// The loader runs at most once per accessor; every later call sees the same
/// outcome, including an "unavailable" one if the resource vanished between
/// detection and consumption.
pub struct ContentAccessor {
    loader: Loader,
    cell: OnceCell<Result<Arc<ResourceContent>, ContentError>>,
}

impl ContentAccessor {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<ResourceContent, ContentError>> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            cell: OnceCell::new(),
        }
    }

    /// Accessor over content that is already in memory
    pub fn ready(content: ResourceContent) -> Self {
        Self {
            loader: Box::new(|| async { unreachable_loader() }.boxed()),
            cell: OnceCell::new_with(Some(Ok(Arc::new(content)))),
        }
    }

    /// Accessor that always reports the resource as gone
    pub fn unavailable(location: impl Into<String>) -> Self {
        Self {
            loader: Box::new(|| async { unreachable_loader() }.boxed()),
            cell: OnceCell::new_with(Some(Err(ContentError::Unavailable(location.into())))),
        }
    }

    pub async fn get(&self) -> Result<Arc<ResourceContent>, ContentError> {
        self.cell
            .get_or_init(|| async { (self.loader)().await.map(Arc::new) })
            .await
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

fn unreachable_loader() -> Result<ResourceContent, ContentError> {
    Err(ContentError::Unavailable("content already resolved".to_string()))
}

impl fmt::Debug for ContentAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentAccessor")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// A created or modified resource handed to listeners
#[derive(Debug)]
pub struct HarvestedResource {
    correlation_id: String,
    location: String,
    properties: Properties,
    content: ContentAccessor,
}

impl HarvestedResource {
    pub fn new(location: impl Into<String>, properties: Properties, content: ContentAccessor) -> Self {
        let location = location.into();
        Self {
            correlation_id: correlation_id(&location),
            location,
            properties,
            content,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Last path segment of the location
    pub fn name(&self) -> &str {
        let trimmed = self.location.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Overrides attached by the harvester, empty when none were configured
    pub fn attribute_overrides(&self) -> AttributeOverrides {
        self.properties
            .get(ATTRIBUTE_OVERRIDES_KEY)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }

    /// Load (once) and return the resource's bytes
    pub async fn content(&self) -> Result<Arc<ResourceContent>, ContentError> {
        self.content.get().await
    }
}

/// What listeners get for a deleted resource: identity only, no content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedResource {
    pub correlation_id: String,
    pub location: String,
}

impl DeletedResource {
    pub fn new(location: impl Into<String>) -> Self {
        let location = location.into();
        Self {
            correlation_id: correlation_id(&location),
            location,
        }
    }
}

/// Attribute name → override values, parsed from `key=value` pairs.
/// A key given more than once becomes multi-valued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeOverrides(BTreeMap<String, Vec<String>>);

impl AttributeOverrides {
    pub fn parse<I, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let captures = OVERRIDE_PAIR
                .captures(pair)
                .ok_or_else(|| ConfigError::InvalidOverride(pair.to_string()))?;
            overrides
                .entry(captures[1].to_string())
                .or_default()
                .push(captures[2].to_string());
        }
        Ok(Self(overrides))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Property bag carrying these overrides under [`ATTRIBUTE_OVERRIDES_KEY`]
    pub fn to_properties(&self) -> Properties {
        let mut properties = Properties::new();
        if !self.is_empty() {
            if let Ok(value) = serde_json::to_value(self) {
                properties.insert(ATTRIBUTE_OVERRIDES_KEY.to_string(), value);
            }
        }
        properties
    }
}
