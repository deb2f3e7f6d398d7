// Contact directory client seam. The concrete gRPC client lives in the
// infrastructure layer; the enricher only depends on this trait.
use async_trait::async_trait;

/// Query against the external contact directory.
#[derive(Debug, Clone)]
pub struct ContactQuery {
    pub ids: Vec<String>,
    pub domain_id: i64,
    pub size: i32,
}

/// One directory row. Field names mirror the RPC response.
#[derive(Debug, Clone, Default)]
pub struct ContactRecord {
    pub name: String,
    pub username: String,
    pub subject: String,
    pub issuer_id: String,
}

/// External contact lookup. Failures are treated as non-fatal by callers.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn search(&self, query: ContactQuery) -> anyhow::Result<Vec<ContactRecord>>;
}
