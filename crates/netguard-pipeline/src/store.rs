//! Record store client: bulk reads of raw documents into a [`Table`].

use crate::error::{PipelineError, PipelineResult};
use crate::table::{Document, Table};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

/// Identity field assigned by the document store.
pub const IDENTITY_FIELD: &str = "_id";

/// A document collection, addressed by database and collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    pub database: String,
    pub collection: String,
}

impl CollectionRef {
    #[must_use]
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self { database: database.into(), collection: collection.into() }
    }
}

impl std::fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.database, self.collection)
    }
}

fn unavailable(collection: &CollectionRef, reason: impl std::fmt::Display) -> PipelineError {
    PipelineError::SourceUnavailable { source_ref: collection.to_string(), reason: reason.to_string() }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    fn id(&self) -> &'static str;

    /// Read every document in `collection`.
    async fn fetch_documents(&self, collection: &CollectionRef) -> PipelineResult<Vec<Document>>;
}

/// Wraps a [`RecordStore`] with a deadline and schema inference.
#[derive(Clone)]
pub struct RecordStoreClient {
    store: Arc<dyn RecordStore>,
    timeout: Duration,
}

impl RecordStoreClient {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn fetch_all(&self, collection: &CollectionRef) -> PipelineResult<Table> {
        debug!(store = self.store.id(), collection = %collection, "fetching documents");
        let documents = tokio::time::timeout(self.timeout, self.store.fetch_documents(collection))
            .await
            .map_err(|_| unavailable(collection, format!("timed out after {:?}", self.timeout)))??;

        let table = Table::from_documents(&documents, IDENTITY_FIELD)?;
        info!(
            store = self.store.id(),
            collection = %collection,
            rows = table.len(),
            columns = table.columns().len(),
            "fetched records"
        );
        Ok(table)
    }
}

/// Local document directory: `<root>/<database>/<collection>.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlRecordStore {
    root: PathBuf,
}

impl JsonlRecordStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn collection_path(&self, collection: &CollectionRef) -> PathBuf {
        self.root.join(&collection.database).join(format!("{}.jsonl", collection.collection))
    }

    /// Write documents as a collection file, replacing any existing one.
    pub fn write_collection(&self, collection: &CollectionRef, documents: &[Document]) -> PipelineResult<()> {
        let path = self.collection_path(collection);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        for doc in documents {
            out.push_str(&serde_json::to_string(doc)?);
            out.push('\n');
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}

fn parse_jsonl(path: &Path, contents: &str) -> PipelineResult<Vec<Document>> {
    let mut documents = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line).map_err(|e| PipelineError::SchemaInference {
            column: format!("{} line {}", path.display(), idx + 1),
            detail: e.to_string(),
        })?;
        match value {
            serde_json::Value::Object(doc) => documents.push(doc),
            other => {
                return Err(PipelineError::SchemaInference {
                    column: format!("{} line {}", path.display(), idx + 1),
                    detail: format!("expected a document object, found {other}"),
                });
            }
        }
    }
    Ok(documents)
}

#[async_trait]
impl RecordStore for JsonlRecordStore {
    fn id(&self) -> &'static str {
        "jsonl"
    }

    async fn fetch_documents(&self, collection: &CollectionRef) -> PipelineResult<Vec<Document>> {
        let path = self.collection_path(collection);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| unavailable(collection, format!("{}: {e}", path.display())))?;
        parse_jsonl(&path, &contents)
    }
}

/// Remote document API.
///
/// `GET {base_url}/databases/{database}/collections/{collection}/documents`
/// must answer with a JSON array of documents or `{"documents": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpRecordStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRecordStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("http record store: {e}")))?;
        Ok(Self { client, base_url: base_url.into() })
    }

    #[must_use]
    pub fn documents_url(&self, collection: &CollectionRef) -> String {
        format!(
            "{}/databases/{}/collections/{}/documents",
            self.base_url.trim_end_matches('/'),
            collection.database,
            collection.collection
        )
    }
}

fn documents_from_body(collection: &CollectionRef, body: serde_json::Value) -> PipelineResult<Vec<Document>> {
    let items = match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("documents") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(PipelineError::SchemaInference {
                    column: collection.to_string(),
                    detail: "response object has no `documents` array".to_string(),
                });
            }
        },
        _ => {
            return Err(PipelineError::SchemaInference {
                column: collection.to_string(),
                detail: "response is neither an array nor an object".to_string(),
            });
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            serde_json::Value::Object(doc) => Ok(doc),
            _ => Err(PipelineError::SchemaInference {
                column: format!("{collection} document {idx}"),
                detail: "expected a document object".to_string(),
            }),
        })
        .collect()
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    fn id(&self) -> &'static str {
        "http"
    }

    async fn fetch_documents(&self, collection: &CollectionRef) -> PipelineResult<Vec<Document>> {
        let url = self.documents_url(collection);
        let response = self.client.get(&url).send().await.map_err(|e| unavailable(collection, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(collection, format!("{url} answered {status}")));
        }
        let body: serde_json::Value = response.json().await.map_err(|e| unavailable(collection, e))?;
        documents_from_body(collection, body)
    }
}

/// MongoDB collection read with one unfiltered `find`.
///
/// The client is connected on first use and reused for later runs.
#[derive(Debug)]
pub struct MongoRecordStore {
    uri: String,
    client: tokio::sync::OnceCell<mongodb::Client>,
}

impl MongoRecordStore {
    /// Accepts `mongodb://` and `mongodb+srv://` URIs; nothing connects yet.
    pub fn new(uri: impl Into<String>) -> PipelineResult<Self> {
        let uri = uri.into();
        if !(uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://")) {
            return Err(PipelineError::InvalidConfig(
                "mongo record store uri must start with mongodb:// or mongodb+srv://".to_string(),
            ));
        }
        Ok(Self { uri, client: tokio::sync::OnceCell::new() })
    }

    async fn client(&self, collection: &CollectionRef) -> PipelineResult<&mongodb::Client> {
        self.client
            .get_or_try_init(|| mongodb::Client::with_uri_str(&self.uri))
            .await
            .map_err(|e| unavailable(collection, e))
    }
}

/// Convert one BSON document to a JSON document (relaxed extended JSON).
///
/// Plain numbers, strings, booleans and nulls become flat values; BSON-only
/// types such as dates turn into `{"$date": ..}` objects, which schema
/// inference rejects unless the field is the identity.
fn document_from_bson(doc: mongodb::bson::Document) -> Document {
    match mongodb::bson::Bson::Document(doc).into_relaxed_extjson() {
        serde_json::Value::Object(doc) => doc,
        _ => Document::new(),
    }
}

#[async_trait]
impl RecordStore for MongoRecordStore {
    fn id(&self) -> &'static str {
        "mongodb"
    }

    async fn fetch_documents(&self, collection: &CollectionRef) -> PipelineResult<Vec<Document>> {
        let client = self.client(collection).await?;
        let handle = client
            .database(&collection.database)
            .collection::<mongodb::bson::Document>(&collection.collection);
        let mut cursor = handle.find(mongodb::bson::doc! {}).await.map_err(|e| unavailable(collection, e))?;

        let mut documents = Vec::new();
        while cursor.advance().await.map_err(|e| unavailable(collection, e))? {
            let doc = cursor.deserialize_current().map_err(|e| PipelineError::SchemaInference {
                column: format!("{collection} document {}", documents.len()),
                detail: e.to_string(),
            })?;
            documents.push(document_from_bson(doc));
        }
        debug!(collection = %collection, documents = documents.len(), "read mongodb collection");
        Ok(documents)
    }
}

/// In-process collections. Unknown collections read as empty.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    collections: RwLock<HashMap<CollectionRef, Vec<Document>>>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_many(&self, collection: &CollectionRef, documents: impl IntoIterator<Item = Document>) {
        let mut guard = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        guard.entry(collection.clone()).or_default().extend(documents);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn id(&self) -> &'static str {
        "memory"
    }

    async fn fetch_documents(&self, collection: &CollectionRef) -> PipelineResult<Vec<Document>> {
        let guard = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(collection).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use tempfile::TempDir;

    struct StalledStore;

    #[async_trait]
    impl RecordStore for StalledStore {
        fn id(&self) -> &'static str {
            "stalled"
        }

        async fn fetch_documents(&self, _collection: &CollectionRef) -> PipelineResult<Vec<Document>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn coll() -> CollectionRef {
        CollectionRef::new("NetworkSecurity", "NetworkData")
    }

    #[tokio::test]
    async fn test_timeout_maps_to_source_unavailable() {
        let client = RecordStoreClient::new(Arc::new(StalledStore), Duration::from_millis(20));
        let err = client.fetch_all(&coll()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_jsonl_store_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = JsonlRecordStore::new(temp.path());
        let docs = vec![
            json!({"_id": 1, "SFH": 1, "Result": -1}).as_object().cloned().unwrap(),
            json!({"_id": 2, "SFH": -1, "Result": 1}).as_object().cloned().unwrap(),
        ];
        store.write_collection(&coll(), &docs).unwrap();

        let client = RecordStoreClient::new(Arc::new(store), Duration::from_secs(5));
        let table = client.fetch_all(&coll()).await.unwrap();
        assert_eq!(table.columns(), &["SFH", "Result"]);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_jsonl_collection_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let client = RecordStoreClient::new(Arc::new(JsonlRecordStore::new(temp.path())), Duration::from_secs(5));
        let err = client.fetch_all(&coll()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
    }

    #[tokio::test]
    async fn test_memory_store_reads_inserted_documents() {
        let store = MemoryRecordStore::new();
        store.insert_many(&coll(), vec![json!({"a": 1}).as_object().cloned().unwrap()]);
        let docs = store.fetch_documents(&coll()).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(store.fetch_documents(&CollectionRef::new("x", "y")).await.unwrap().is_empty());
    }

    #[test]
    fn test_jsonl_keeps_field_order_of_the_source() {
        let docs = parse_jsonl(Path::new("c.jsonl"), "{\"port\":1,\"URL_Length\":0,\"SFH\":-1}\n{\"Result\":1}\n").unwrap();
        let table = Table::from_documents(&docs, IDENTITY_FIELD).unwrap();
        assert_eq!(table.columns(), &["port", "URL_Length", "SFH", "Result"]);
    }

    #[test]
    fn test_mongo_documents_flatten_and_keep_order() {
        use mongodb::bson::{doc, oid::ObjectId};
        let raw = vec![
            doc! {"_id": ObjectId::new(), "port": 1, "SFH": -1.0, "Result": "1"},
            doc! {"_id": ObjectId::new(), "SFH": 0, "having_IP_Address": -1_i64},
        ];
        let docs: Vec<Document> = raw.into_iter().map(document_from_bson).collect();
        let table = Table::from_documents(&docs, IDENTITY_FIELD).unwrap();

        assert_eq!(table.columns(), &["port", "SFH", "Result", "having_IP_Address"]);
        assert_eq!(table.value(0, "SFH"), Some(&crate::table::Value::Number(-1.0)));
        assert_eq!(table.value(1, "having_IP_Address"), Some(&crate::table::Value::Number(-1.0)));
        assert_eq!(table.value(1, "port"), Some(&crate::table::Value::Null));
    }

    #[test]
    fn test_mongo_store_rejects_non_mongo_uri() {
        let err = MongoRecordStore::new("http://localhost:27017").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(MongoRecordStore::new("mongodb+srv://cluster.example.net").is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_mongo_is_source_unavailable() {
        let store =
            MongoRecordStore::new("mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200&connectTimeoutMS=200").unwrap();
        let client = RecordStoreClient::new(Arc::new(store), Duration::from_secs(10));
        let err = client.fetch_all(&coll()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_jsonl_rejects_non_objects() {
        let err = parse_jsonl(Path::new("c.jsonl"), "{\"a\":1}\n[1,2]\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaInference);
    }

    #[test]
    fn test_http_body_shapes() {
        let docs = documents_from_body(&coll(), json!([{"a": 1}, {"b": 2}])).unwrap();
        assert_eq!(docs.len(), 2);
        let docs = documents_from_body(&coll(), json!({"documents": [{"a": 1}]})).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(documents_from_body(&coll(), json!("nope")).is_err());
        assert!(documents_from_body(&coll(), json!([1])).is_err());
    }

    #[test]
    fn test_http_documents_url() {
        let store = HttpRecordStore::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            store.documents_url(&coll()),
            "http://localhost:8080/databases/NetworkSecurity/collections/NetworkData/documents"
        );
    }
}
