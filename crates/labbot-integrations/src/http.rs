use std::time::Duration;

use labbot_core::{errors::Error, Result};
use reqwest::Response;
use serde::de::DeserializeOwned;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(format!("http client build failed: {e}")))
}

/// Decodes a JSON body, turning non-success statuses into `Error::External`.
pub(crate) async fn read_json<T: DeserializeOwned>(what: &str, resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::External(format!(
            "{what} failed: {status} {}",
            body.chars().take(200).collect::<String>()
        )));
    }
    resp.json()
        .await
        .map_err(|e| Error::External(format!("{what} json error: {e}")))
}

pub(crate) fn request_err(what: &str, e: reqwest::Error) -> Error {
    Error::External(format!("{what} request error: {e}"))
}
