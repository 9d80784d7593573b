use std::{fmt, str::FromStr};

use anyhow::{Context, Result};

/// Destination table used when `BIGQUERY_TABLE_ID` is not set.
pub const DEFAULT_TABLE_ID: &str = "smart-agri-iot-ass-2.agriculture_data.sensor_logs";

/// Default service-account token endpoint of the GCE metadata server.
pub const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

// ---------------------------------------------------------------------------
// TableRef
// ---------------------------------------------------------------------------

/// Fully qualified BigQuery table: `project.dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    /// Path segment of the tabledata REST resource for this table.
    pub fn resource_path(&self) -> String {
        format!(
            "/bigquery/v2/projects/{}/datasets/{}/tables/{}",
            self.project_id, self.dataset_id, self.table_id
        )
    }
}

impl FromStr for TableRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').map(str::trim).collect();
        match parts.as_slice() {
            [project, dataset, table]
                if !project.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(Self {
                    project_id: (*project).to_owned(),
                    dataset_id: (*dataset).to_owned(),
                    table_id: (*table).to_owned(),
                })
            }
            _ => Err(anyhow::anyhow!(
                "table id must be 'project.dataset.table', got: {s:?}"
            )),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    /// Destination for every ingested reading. Fixed for the process lifetime.
    pub table: TableRef,
    pub bigquery_base_url: String,
    /// Static bearer token. When set, the metadata server is never queried.
    pub bigquery_access_token: Option<String>,
    pub metadata_token_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            table: optional("BIGQUERY_TABLE_ID", DEFAULT_TABLE_ID)
                .parse()
                .context("BIGQUERY_TABLE_ID is malformed")?,
            bigquery_base_url: optional("BIGQUERY_BASE_URL", "https://bigquery.googleapis.com")
                .trim_end_matches('/')
                .to_owned(),
            bigquery_access_token: std::env::var("BIGQUERY_ACCESS_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            metadata_token_url: optional("GCP_METADATA_TOKEN_URL", DEFAULT_METADATA_TOKEN_URL),
        })
    }
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
