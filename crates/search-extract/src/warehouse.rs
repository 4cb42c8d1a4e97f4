use chrono::{DateTime, Utc};

use crate::error::WarehouseError;
use crate::record::Record;

/// Identifies a destination table. The warehouse client itself is an
/// external collaborator, specified only by this interface, per the
/// Non-goal that excludes warehouse authentication and the concrete
/// client from this crate's scope.
#[derive(Debug, Clone)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// A columnar analytics warehouse with append-or-create load semantics.
/// `load_batch` blocks until the load job completes.
#[async_trait::async_trait]
pub trait Warehouse: Send + Sync {
    async fn load_batch(&self, table: &TableRef, records: &[Record]) -> Result<usize, WarehouseError>;

    /// Used only to read `MAX(_loaded_at)` for the incremental watermark.
    async fn max_loaded_at(&self, table: &TableRef) -> Result<Option<DateTime<Utc>>, WarehouseError>;
}

/// A thin stand-in for a real warehouse client, posting batches to a
/// generic "load tabular batch" REST endpoint with
/// append/auto-detect/allow-field-addition/create-if-missing semantics
/// conveyed as request fields rather than vendor-specific job config.
pub struct HttpWarehouse {
    load_endpoint: url::Url,
    watermark_endpoint: url::Url,
    client: reqwest::Client,
}

impl HttpWarehouse {
    pub fn new(load_endpoint: url::Url, watermark_endpoint: url::Url, client: reqwest::Client) -> Self {
        Self {
            load_endpoint,
            watermark_endpoint,
            client,
        }
    }
}

#[derive(serde::Serialize)]
struct LoadRequest<'a> {
    table: String,
    records: &'a [Record],
    write_disposition: &'static str,
    schema_update_options: &'static [&'static str],
    autodetect: bool,
    create_disposition: &'static str,
}

#[derive(serde::Deserialize)]
struct WatermarkResponse {
    max_loaded_at: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
impl Warehouse for HttpWarehouse {
    async fn load_batch(&self, table: &TableRef, records: &[Record]) -> Result<usize, WarehouseError> {
        let body = LoadRequest {
            table: table.to_string(),
            records,
            write_disposition: "APPEND",
            schema_update_options: &["ALLOW_FIELD_ADDITION"],
            autodetect: true,
            create_disposition: "CREATE_IF_NEEDED",
        };

        let response = self
            .client
            .post(self.load_endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::LoadFailed(e.to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|e| WarehouseError::LoadFailed(e.to_string()))?;
        let _ = response
            .bytes()
            .await
            .map_err(|e| WarehouseError::LoadFailed(e.to_string()))?;

        Ok(records.len())
    }

    async fn max_loaded_at(&self, table: &TableRef) -> Result<Option<DateTime<Utc>>, WarehouseError> {
        let response = self
            .client
            .get(self.watermark_endpoint.clone())
            .query(&[("table", table.to_string())])
            .send()
            .await
            .map_err(|e| WarehouseError::QueryFailed(e.to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|e| WarehouseError::QueryFailed(e.to_string()))?;

        let body: WatermarkResponse = response
            .json()
            .await
            .map_err(|e| WarehouseError::QueryFailed(e.to_string()))?;

        Ok(body.max_loaded_at)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory `Warehouse` for tests: records every loaded batch and
    /// can be seeded with a watermark.
    #[derive(Default)]
    pub struct MockWarehouse {
        pub loaded: Mutex<Vec<Record>>,
        pub watermark: Option<DateTime<Utc>>,
        pub fail_loads: bool,
    }

    #[async_trait::async_trait]
    impl Warehouse for MockWarehouse {
        async fn load_batch(&self, _table: &TableRef, records: &[Record]) -> Result<usize, WarehouseError> {
            if self.fail_loads {
                return Err(WarehouseError::LoadFailed("mock failure".to_string()));
            }
            self.loaded.lock().unwrap().extend_from_slice(records);
            Ok(records.len())
        }

        async fn max_loaded_at(&self, _table: &TableRef) -> Result<Option<DateTime<Utc>>, WarehouseError> {
            Ok(self.watermark)
        }
    }
}
