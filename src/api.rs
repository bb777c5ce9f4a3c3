//! IPUMS aggregate data extract API client.
//!
//! Submits NHGIS extract requests, polls their status at a fixed interval
//! and downloads the table data package once the extract has completed.

use crate::config::NhgisConfig;
use crate::constants::api::{API_VERSION, COLLECTION};
use crate::constants::table_data_zip_name;
use crate::error::{NhgisError, Result};
use crate::models::{ExtractInfo, ExtractRequest};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info};

/// Authenticated client for one IPUMS account
#[derive(Debug, Clone)]
pub struct IpumsClient {
    http: Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl IpumsClient {
    pub fn new(config: &NhgisConfig) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key,
            poll_interval: config.poll_interval(),
            wait_timeout: config.wait_timeout(),
        })
    }

    fn extracts_url(&self) -> String {
        format!("{}/extracts", self.base_url)
    }

    fn extract_url(&self, number: u64) -> String {
        format!("{}/extracts/{}", self.base_url, number)
    }

    fn query() -> [(&'static str, String); 2] {
        [
            ("collection", COLLECTION.to_string()),
            ("version", API_VERSION.to_string()),
        ]
    }

    /// Submit an extract request; returns the record with its number
    pub async fn submit_extract(&self, request: &ExtractRequest) -> Result<ExtractInfo> {
        request.validate()?;

        let response = self
            .http
            .post(self.extracts_url())
            .query(&Self::query())
            .header(AUTHORIZATION, &self.api_key)
            .json(request)
            .send()
            .await?;

        let info: ExtractInfo = check_status(response).await?.json().await?;
        info!("Extract submitted with id {}", info.number);
        Ok(info)
    }

    /// Current record of a submitted extract
    pub async fn extract_status(&self, number: u64) -> Result<ExtractInfo> {
        let response = self
            .http
            .get(self.extract_url(number))
            .query(&Self::query())
            .header(AUTHORIZATION, &self.api_key)
            .send()
            .await?;

        let info: ExtractInfo = check_status(response).await?.json().await?;
        debug!("Extract {} status: {}", number, info.status);
        Ok(info)
    }

    /// Poll until the extract has completed
    pub async fn wait_for_extract<S>(&self, number: u64, on_status: S) -> Result<ExtractInfo>
    where
        S: FnMut(&ExtractInfo),
    {
        poll_until_finished(
            number,
            self.poll_interval,
            self.wait_timeout,
            || self.extract_status(number),
            on_status,
        )
        .await
    }

    /// Download the table data package into `dest_dir`
    pub async fn download_table_data(&self, info: &ExtractInfo, dest_dir: &Path) -> Result<PathBuf> {
        let url = info.table_data_url().ok_or_else(|| {
            NhgisError::api_response(format!(
                "Extract {} has no table data download link",
                info.number
            ))
        })?;

        fs::create_dir_all(dest_dir).await?;
        let dest_path = dest_dir.join(table_data_zip_name(info.number));

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, &self.api_key)
            .send()
            .await?;
        let bytes = check_status(response).await?.bytes().await?;
        fs::write(&dest_path, &bytes).await?;

        info!(
            "Downloaded {} bytes to {}",
            bytes.len(),
            dest_path.display()
        );
        Ok(dest_path)
    }
}

/// Turn non-success responses into API errors carrying the response body
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(NhgisError::api_response(format!(
        "{} returned {}: {}",
        url,
        status,
        body.trim()
    )))
}

/// Call `check` every `interval` until the extract is finished.
///
/// Fails when the extract ends as failed or canceled, or when `timeout`
/// elapses first.
pub async fn poll_until_finished<F, Fut, S>(
    number: u64,
    interval: Duration,
    timeout: Duration,
    mut check: F,
    mut on_status: S,
) -> Result<ExtractInfo>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ExtractInfo>>,
    S: FnMut(&ExtractInfo),
{
    let started = Instant::now();

    loop {
        let info = check().await?;
        on_status(&info);

        let status = info.status();
        if status.is_failure() {
            return Err(NhgisError::ExtractFailed {
                number,
                status: status.to_string(),
            });
        }
        if status.is_finished() {
            return Ok(info);
        }

        if started.elapsed() + interval > timeout {
            return Err(NhgisError::ExtractTimeout {
                number,
                waited_secs: started.elapsed().as_secs(),
            });
        }
        tokio::time::sleep(interval).await;
    }
}
