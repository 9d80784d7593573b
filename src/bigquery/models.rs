use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reading::SensorReading;

// ---------------------------------------------------------------------------
// insertAll: POST /bigquery/v2/projects/{p}/datasets/{d}/tables/{t}/insertAll
// ---------------------------------------------------------------------------

pub const INSERT_ALL_KIND: &str = "bigquery#tableDataInsertAllRequest";

#[derive(Debug, Serialize)]
pub struct InsertAllRequest<'a> {
    pub kind: &'static str,
    pub rows: Vec<InsertRow<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertRow<'a> {
    /// Best-effort de-duplication key; one fresh id per row.
    pub insert_id: String,
    pub json: &'a SensorReading,
}

impl<'a> InsertAllRequest<'a> {
    pub fn new(rows: &'a [SensorReading]) -> Self {
        Self {
            kind: INSERT_ALL_KIND,
            rows: rows
                .iter()
                .map(|json| InsertRow {
                    insert_id: Uuid::new_v4().to_string(),
                    json,
                })
                .collect(),
        }
    }
}

/// `insertErrors` is omitted entirely when every row was accepted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertAllResponse {
    #[allow(dead_code)]
    pub kind: Option<String>,
    #[serde(default)]
    pub insert_errors: Vec<InsertError>,
}

/// Rejection of a single row, addressed by its position in the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertError {
    pub index: u32,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorProto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Metadata server token: GET .../service-accounts/default/token
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Seconds until expiry.
    pub expires_in: i64,
    #[allow(dead_code)]
    pub token_type: Option<String>,
}
