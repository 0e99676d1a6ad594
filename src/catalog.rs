//! Catalog-backed adapter
//!
//! `CatalogAdapter` turns a harvested resource into a catalog [`Record`] with a
//! [`Transformer`] and writes it to a [`Catalog`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::{HarvestedResource, ResourceContent};
use crate::traits::{Adapter, IngestError};

pub const TITLE: &str = "title";
pub const RESOURCE_SIZE: &str = "resource-size";
pub const RESOURCE_URI: &str = "resource-uri";

/// A catalog entry: an id once stored, plus named attribute values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Option<String>,
    pub attributes: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.attributes.insert(name.to_string(), value.into());
    }

    /// Set `name` unless it already has a value. Empty strings are never written.
    pub fn set_if_absent(&mut self, name: &str, value: &str) {
        if value.is_empty() || self.attributes.contains_key(name) {
            return;
        }
        self.set(name, value);
    }
}

/// Turns resource bytes into a catalog record
pub trait Transformer: Send + Sync {
    /// `existing_id` is set when the record replaces one already in the catalog
    fn transform(
        &self,
        resource: &HarvestedResource,
        content: &ResourceContent,
        existing_id: Option<&str>,
    ) -> Result<Record, IngestError>;
}

/// Downstream record store
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    async fn create(&self, record: Record) -> Result<String, IngestError>;

    async fn update(&self, id: &str, record: Record) -> Result<String, IngestError>;

    async fn delete(&self, id: &str) -> Result<(), IngestError>;
}

pub struct CatalogAdapter {
    transformer: Arc<dyn Transformer>,
    catalog: Arc<dyn Catalog>,
}

impl CatalogAdapter {
    pub fn new(transformer: Arc<dyn Transformer>, catalog: Arc<dyn Catalog>) -> Self {
        Self { transformer, catalog }
    }

    async fn build_record(
        &self,
        resource: &HarvestedResource,
        existing_id: Option<&str>,
    ) -> Result<Record, IngestError> {
        let content = resource.content().await.map_err(|e| {
            tracing::debug!(location = %resource.location(), error = %e, "Resource vanished before ingest");
            IngestError::Unavailable(e.to_string())
        })?;

        let mut record = self.transformer.transform(resource, &content, existing_id)?;
        record.set_if_absent(TITLE, resource.name());
        record.set_if_absent(RESOURCE_SIZE, &content.size().to_string());
        record.set_if_absent(RESOURCE_URI, resource.location());

        for (name, values) in resource.attribute_overrides().iter() {
            let value = match values {
                [single] => Value::String(single.clone()),
                many => Value::Array(many.iter().cloned().map(Value::String).collect()),
            };
            record.attributes.insert(name.to_string(), value);
        }
        Ok(record)
    }
}

#[async_trait::async_trait]
impl Adapter for CatalogAdapter {
    async fn create(&self, resource: &HarvestedResource) -> Result<String, IngestError> {
        let record = self.build_record(resource, None).await?;
        self.catalog.create(record).await
    }

    async fn update(
        &self,
        resource: &HarvestedResource,
        downstream_id: &str,
    ) -> Result<String, IngestError> {
        let mut record = self.build_record(resource, Some(downstream_id)).await?;
        record.id = Some(downstream_id.to_string());
        self.catalog.update(downstream_id, record).await
    }

    async fn delete(&self, downstream_id: &str) -> Result<(), IngestError> {
        self.catalog.delete(downstream_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{AttributeOverrides, ContentAccessor, Properties};
    use mockall::predicate::eq;

    struct EchoTransformer;

    impl Transformer for EchoTransformer {
        fn transform(
            &self,
            _resource: &HarvestedResource,
            content: &ResourceContent,
            existing_id: Option<&str>,
        ) -> Result<Record, IngestError> {
            let mut record = Record::new();
            record.id = existing_id.map(str::to_string);
            record.set("body", String::from_utf8_lossy(&content.bytes).to_string());
            if content.bytes.starts_with(b"titled") {
                record.set(TITLE, "From content");
            }
            Ok(record)
        }
    }

    fn resource(bytes: &[u8], overrides: &[&str]) -> HarvestedResource {
        let properties = AttributeOverrides::parse(overrides.iter().copied())
            .unwrap()
            .to_properties();
        HarvestedResource::new(
            "file:///data/report.txt",
            properties,
            ContentAccessor::ready(ResourceContent::new("report.txt", bytes.to_vec())),
        )
    }

    #[tokio::test]
    async fn test_create_fills_defaults() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_create()
            .withf(|record| {
                record.get(TITLE) == Some(&Value::from("report.txt"))
                    && record.get(RESOURCE_SIZE) == Some(&Value::from("5"))
                    && record.get(RESOURCE_URI) == Some(&Value::from("file:///data/report.txt"))
                    && record.get("body") == Some(&Value::from("hello"))
            })
            .times(1)
            .returning(|_| Ok("id-1".to_string()));
        let adapter = CatalogAdapter::new(Arc::new(EchoTransformer), Arc::new(catalog));

        let id = adapter.create(&resource(b"hello", &[])).await.unwrap();

        assert_eq!(id, "id-1");
    }

    #[tokio::test]
    async fn test_transformer_title_wins_over_default() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_create()
            .withf(|record| record.get(TITLE) == Some(&Value::from("From content")))
            .returning(|_| Ok("id-1".to_string()));
        let adapter = CatalogAdapter::new(Arc::new(EchoTransformer), Arc::new(catalog));

        adapter.create(&resource(b"titled doc", &[])).await.unwrap();
    }

    #[tokio::test]
    async fn test_overrides_replace_values() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_create()
            .withf(|record| {
                record.get(TITLE) == Some(&Value::from("Overridden"))
                    && record.get("keyword") == Some(&serde_json::json!(["a", "b"]))
            })
            .returning(|_| Ok("id-1".to_string()));
        let adapter = CatalogAdapter::new(Arc::new(EchoTransformer), Arc::new(catalog));

        adapter
            .create(&resource(b"titled", &["title=Overridden", "keyword=a", "keyword=b"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_carries_existing_id() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_update()
            .with(eq("id-7"), mockall::predicate::function(|r: &Record| r.id.as_deref() == Some("id-7")))
            .times(1)
            .returning(|id, _| Ok(id.to_string()));
        let adapter = CatalogAdapter::new(Arc::new(EchoTransformer), Arc::new(catalog));

        let id = adapter.update(&resource(b"v2", &[]), "id-7").await.unwrap();

        assert_eq!(id, "id-7");
    }

    #[tokio::test]
    async fn test_unavailable_content_skips_catalog() {
        let mut catalog = MockCatalog::new();
        catalog.expect_create().times(0);
        let adapter = CatalogAdapter::new(Arc::new(EchoTransformer), Arc::new(catalog));
        let gone = HarvestedResource::new(
            "file:///data/gone.txt",
            Properties::new(),
            ContentAccessor::unavailable("file:///data/gone.txt"),
        );

        let result = adapter.create(&gone).await;

        assert!(matches!(result, Err(IngestError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_delete_passes_through() {
        let mut catalog = MockCatalog::new();
        catalog.expect_delete().with(eq("id-3")).times(1).returning(|_| Ok(()));
        let adapter = CatalogAdapter::new(Arc::new(EchoTransformer), Arc::new(catalog));

        adapter.delete("id-3").await.unwrap();
    }
}
