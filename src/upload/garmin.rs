use super::{UploadOutcome, UploadTarget};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;
use std::path::Path;

const ENDPOINT_GLOBAL: &str = "https://connectapi.garmin.com";
const ENDPOINT_CN: &str = "https://connectapi.garmin.cn";

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Deserialize)]
struct ActivitySummary {
    #[serde(rename = "startTimeGMT")]
    start_time_gmt: String,
}

/// Garmin Connect upload adapter, authenticated with a pre-issued OAuth2
/// bearer token. The `.cn` deployment is a separate host.
pub struct GarminTarget {
    client: ClientWithMiddleware,
    upload_client: reqwest::Client,
    token: String,
    endpoint: &'static str,
}

impl GarminTarget {
    pub fn new(token: String, is_cn: bool) -> Self {
        let upload_client = reqwest::Client::new();
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let client = ClientBuilder::new(upload_client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        GarminTarget {
            client,
            upload_client,
            token,
            endpoint: if is_cn { ENDPOINT_CN } else { ENDPOINT_GLOBAL },
        }
    }

    async fn try_upload(&self, path: &Path) -> Result<UploadOutcome> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "activity.gpx".to_string());

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .upload_client
            .post(format!("{}/upload-service/upload/.gpx", self.endpoint))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Ok(UploadOutcome::RateLimited {
                retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
            }),
            StatusCode::CONFLICT => Ok(UploadOutcome::Rejected("duplicate activity".to_string())),
            status if status.is_success() => Ok(UploadOutcome::Uploaded),
            status => {
                let body = response.text().await.unwrap_or_default();
                Ok(UploadOutcome::Rejected(format!("HTTP {status}: {body}")))
            }
        }
    }
}

#[async_trait]
impl UploadTarget for GarminTarget {
    fn name(&self) -> &'static str {
        "garmin"
    }

    async fn latest_start_time(&self) -> Result<Option<DateTime<Utc>>> {
        let response = self
            .client
            .get(format!(
                "{}/activitylist-service/activities/search/activities",
                self.endpoint
            ))
            .query(&[("start", "0"), ("limit", "1")])
            .bearer_auth(&self.token)
            .send()
            .await
            .context("listing garmin activities")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "garmin activity listing failed with status {}",
                response.status()
            ));
        }

        let activities: Vec<ActivitySummary> = response.json().await?;
        match activities.first() {
            Some(latest) => Ok(Some(parse_start_time_gmt(&latest.start_time_gmt)?)),
            None => Ok(None),
        }
    }

    async fn upload(&self, path: &Path, _name: &str) -> UploadOutcome {
        match self.try_upload(path).await {
            Ok(outcome) => outcome,
            Err(e) => UploadOutcome::Rejected(e.to_string()),
        }
    }
}

/// Garmin reports `startTimeGMT` as `2014-03-24 10:00:00`, already in UTC.
fn parse_start_time_gmt(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("unparseable startTimeGMT {raw}"))?;
    Ok(naive.and_utc())
}
