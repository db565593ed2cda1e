use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gcp_rest::{GcpClient, SharedClient};
use pump_api::{BatchSink, PumpError, Record, SinkFactory};

#[derive(Debug, Clone, Deserialize)]
pub struct BigQueryConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Вставлять валидные строки батча, даже если часть строк отклонена.
    #[serde(default)]
    pub skip_invalid_rows: bool,
}

fn default_endpoint() -> String {
    "https://bigquery.googleapis.com".into()
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            skip_invalid_rows: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Wire format (tabledata.insertAll)
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    kind: &'static str,
    ignore_unknown_values: bool,
    skip_invalid_rows: bool,
    rows: Vec<InsertRow<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertRow<'a> {
    insert_id: String,
    json: &'a Record,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowErrors>,
}

#[derive(Deserialize)]
struct RowErrors {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    errors: Vec<RowError>,
}

#[derive(Deserialize)]
struct RowError {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

fn rejected(response: &InsertAllResponse) -> Option<String> {
    let first = response.insert_errors.first()?;
    let detail = first
        .errors
        .first()
        .map(|e| format!("{}: {}", e.reason, e.message))
        .unwrap_or_else(|| "no details".into());
    Some(format!(
        "{} rows rejected, first at index {}: {detail}",
        response.insert_errors.len(),
        first.index
    ))
}

// ═══════════════════════════════════════════════════════════════
//  BigQuerySink
// ═══════════════════════════════════════════════════════════════

/// Streaming insert в одну таблицу.
///
/// Каждая строка получает случайный `insertId` (UUID v4), по которому
/// BigQuery дедуплицирует повторные вставки.
pub struct BigQuerySink {
    client: GcpClient,
    url: String,
    skip_invalid_rows: bool,
}

impl BigQuerySink {
    pub fn new(client: GcpClient, config: &BigQueryConfig, dataset_id: &str, table_id: &str) -> Self {
        let url = format!(
            "{}/bigquery/v2/projects/{}/datasets/{dataset_id}/tables/{table_id}/insertAll",
            config.endpoint.trim_end_matches('/'),
            client.project_id(),
        );
        Self {
            client,
            url,
            skip_invalid_rows: config.skip_invalid_rows,
        }
    }
}

impl BatchSink for BigQuerySink {
    fn flush(&self, records: &[Record]) -> Pin<Box<dyn Future<Output = Result<(), PumpError>> + Send + '_>> {
        let records = records.to_vec();
        Box::pin(async move {
            if records.is_empty() {
                return Ok(());
            }
            let rows = records
                .iter()
                .map(|json| InsertRow {
                    insert_id: Uuid::new_v4().to_string(),
                    json,
                })
                .collect();
            let request = InsertAllRequest {
                kind: "bigquery#tableDataInsertAllRequest",
                ignore_unknown_values: true,
                skip_invalid_rows: self.skip_invalid_rows,
                rows,
            };

            let response: InsertAllResponse = self.client.post_json(&self.url, &request).await?;
            if let Some(detail) = rejected(&response) {
                return Err(PumpError::format_err(format!("insertAll: {detail}")));
            }
            tracing::debug!(rows = records.len(), "insertAll ok");
            Ok(())
        })
    }
}

pub struct BigQuerySinkFactory {
    client: Arc<SharedClient>,
    config: BigQueryConfig,
}

impl BigQuerySinkFactory {
    pub fn new(client: Arc<SharedClient>, config: BigQueryConfig) -> Self {
        Self { client, config }
    }
}

impl SinkFactory for BigQuerySinkFactory {
    fn open(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BatchSink>, PumpError>> + Send + '_>> {
        let dataset_id = dataset_id.to_string();
        let table_id = table_id.to_string();
        Box::pin(async move {
            let client = self.client.get().await?;
            Ok(Arc::new(BigQuerySink::new(client, &self.config, &dataset_id, &table_id)) as Arc<dyn BatchSink>)
        })
    }
}
