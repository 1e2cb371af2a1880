use super::{UploadOutcome, UploadTarget};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

const ENDPOINT: &str = "https://www.strava.com";

// Strava throttles per 15-minute window; used when no Retry-After is sent.
const DEFAULT_RETRY_AFTER_SECS: u64 = 900;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ActivitySummary {
    start_date: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    error: Option<String>,
}

/// Strava upload adapter. Reads go through the retrying client; uploads do
/// not, because a replayed multipart POST can duplicate an activity.
pub struct StravaTarget {
    client: ClientWithMiddleware,
    upload_client: reqwest::Client,
    access_token: String,
}

impl StravaTarget {
    /// Exchange the long-lived refresh token for an access token.
    pub async fn connect(client_id: &str, client_secret: &str, refresh_token: &str) -> Result<Self> {
        let upload_client = reqwest::Client::new();
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let client = ClientBuilder::new(upload_client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let response = client
            .post(format!("{ENDPOINT}/oauth/token"))
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("strava token exchange")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "strava token exchange failed with status {}",
                response.status()
            ));
        }
        let token: TokenResponse = response.json().await.context("parsing strava token response")?;
        info!("strava access token obtained");

        Ok(StravaTarget {
            client,
            upload_client,
            access_token: token.access_token,
        })
    }

    async fn try_upload(&self, path: &Path, name: &str) -> Result<UploadOutcome> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "activity.gpx".to_string());

        let form = Form::new()
            .text("data_type", "gpx")
            .text("name", name.to_string())
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .upload_client
            .post(format!("{ENDPOINT}/api/v3/uploads"))
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_secs(
                response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            return Ok(UploadOutcome::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(UploadOutcome::Rejected(format!("HTTP {status}: {body}")));
        }

        let upload: UploadResponse = response.json().await?;
        match upload.error {
            // Typically "duplicate of activity ...".
            Some(error) => Ok(UploadOutcome::Rejected(error)),
            None => Ok(UploadOutcome::Uploaded),
        }
    }
}

#[async_trait]
impl UploadTarget for StravaTarget {
    fn name(&self) -> &'static str {
        "strava"
    }

    async fn latest_start_time(&self) -> Result<Option<DateTime<Utc>>> {
        let response = self
            .client
            .get(format!("{ENDPOINT}/api/v3/athlete/activities"))
            .query(&[("per_page", "1")])
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("listing strava activities")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "strava activity listing failed with status {}",
                response.status()
            ));
        }

        let activities: Vec<ActivitySummary> = response.json().await?;
        let Some(latest) = activities.first() else {
            return Ok(None);
        };
        let start = DateTime::parse_from_rfc3339(&latest.start_date)
            .with_context(|| format!("unparseable start_date {}", latest.start_date))?;
        Ok(Some(start.with_timezone(&Utc)))
    }

    async fn upload(&self, path: &Path, name: &str) -> UploadOutcome {
        match self.try_upload(path, name).await {
            Ok(outcome) => outcome,
            Err(e) => UploadOutcome::Rejected(e.to_string()),
        }
    }
}

fn retry_after_secs(header: Option<&str>) -> u64 {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}
