use async_trait::async_trait;
use labbot_core::{errors::Error, tools::SheetStore, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::http::{build_client, read_json, request_err};

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct AppendBody {
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: Option<String>,
}

/// Cells arrive as strings with `USER_ENTERED` formatting; numbers and
/// booleans are stringified as well.
fn cell_text(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Google Sheets values API with a bearer access token.
#[derive(Clone, Debug)]
pub struct GoogleSheetsStore {
    http: reqwest::Client,
    base_url: String,
    sheet_id: String,
    access_token: String,
}

impl GoogleSheetsStore {
    pub fn new(sheet_id: impl Into<String>, access_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(sheet_id, access_token, SHEETS_BASE_URL)
    }

    pub fn with_base_url(
        sheet_id: impl Into<String>,
        access_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            http: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sheet_id: sheet_id.into(),
            access_token: access_token.into(),
        })
    }

    /// `{base}/spreadsheets/{id}/values/{last}` with each segment percent-encoded.
    fn values_url(&self, last: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid sheets url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("sheets url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["spreadsheets", self.sheet_id.as_str(), "values", last]);
        Ok(url)
    }
}

#[async_trait]
impl SheetStore for GoogleSheetsStore {
    async fn read(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(range)?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| request_err("sheets read", e))?;
        let body: ValueRange = read_json("sheets read", resp).await?;
        debug!(range, rows = body.values.len(), "sheet values read");
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn append(&self, range: &str, row: Vec<String>) -> Result<Option<String>> {
        let mut url = self.values_url(&format!("{range}:append"))?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&AppendBody { values: vec![row] })
            .send()
            .await
            .map_err(|e| request_err("sheets append", e))?;
        let body: AppendResponse = read_json("sheets append", resp).await?;
        let updated = body.updates.and_then(|u| u.updated_range);
        info!(range, updated_range = ?updated, "sheet row appended");
        Ok(updated)
    }
}
