use crate::errors::SourceError;
use crate::signature::{self, BASE_URL, BASIC_AUTH, CLIENT_ID, DAVINCI, DID, USER_AGENT};
use chrono::Utc;
use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use tracing::{debug, info};

/// One entry of the paginated activity listing. Enough to decide whether the
/// activity is already exported (`log_id` is the filename stem) and to fetch
/// the full record (`route_id`).
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityStub {
    pub log_id: i64,
    pub sports_type: i64,
    pub route_id: serde_json::Value,
}

/// Full activity record with its raw point stream.
#[derive(Debug, Clone)]
pub struct ActivityDetail {
    pub id: i64,
    pub sports_type: i64,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub points: Vec<TrackPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub time_stamp: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActivityPage {
    #[serde(default)]
    pub log_list: Vec<ActivityStub>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
struct RawDetail {
    sports_type: i64,
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(default)]
    points: Vec<TrackPoint>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    status: Option<String>,
    description: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self, context: &str) -> Result<T, SourceError> {
        if self.status.as_deref() == Some("Error") {
            return Err(SourceError::Fetch(format!(
                "{context}: {}",
                self.description
                    .unwrap_or_else(|| "unknown server error".to_string())
            )));
        }
        self.data
            .ok_or_else(|| SourceError::Protocol(format!("{context}: response carried no data")))
    }
}

const PAGE_LIMIT: u32 = 500;
const PAGE_CEILING: u32 = 100;

/// Authenticated client for the Codoon API.
///
/// Every request carries the static device headers plus a per-request
/// `signature` header computed over the exact bytes sent, so requests are
/// built and signed immediately before dispatch and never replayed.
pub struct CodoonClient {
    client: reqwest::Client,
    token: String,
    pub user_id: String,
    pub refresh_token: String,
}

fn device_session() -> Result<reqwest::Client, SourceError> {
    let mut headers = HeaderMap::new();
    headers.insert("did", HeaderValue::from_static(DID));
    headers.insert("davinci", HeaderValue::from_static(DAVINCI));

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()
        .map_err(SourceError::Network)
}

impl CodoonClient {
    /// Exchange mobile number and password for a token pair.
    ///
    /// The resulting `refresh_token` and `user_id` are public so the operator
    /// can capture them and skip password login on later runs.
    pub async fn login(mobile: &str, password: &str) -> Result<Self, SourceError> {
        let client = device_session()?;

        let url = Url::parse_with_params(
            &format!("{BASE_URL}/token"),
            &[
                ("client_id", CLIENT_ID),
                ("email", mobile),
                ("grant_type", "password"),
                ("password", password),
                ("scope", "user"),
            ],
        )
        .map_err(|e| SourceError::Protocol(format!("building login url: {e}")))?;

        let path_with_query = format!("{}?{}", url.path(), url.query().unwrap_or(""));
        let auth_header = format!("Basic {BASIC_AUTH}");
        // Login signs like any other GET: zero timestamp, no body.
        let sig = signature::sign(&auth_header, &path_with_query, None, 0);

        let response = client
            .get(url)
            .header("authorization", &auth_header)
            .header("timestamp", "0")
            .header("signature", sig)
            .send()
            .await?;

        let body: serde_json::Value = response.json().await?;
        if body.get("status").and_then(|s| s.as_str()) == Some("Error") {
            let description = body
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("login rejected");
            return Err(SourceError::Auth(description.to_string()));
        }

        let token = field_string(&body, "access_token")?;
        let refresh_token = field_string(&body, "refresh_token")?;
        let user_id = field_string(&body, "user_id")?;

        info!("logged in, user_id {user_id}");
        Ok(CodoonClient {
            client,
            token,
            user_id,
            refresh_token,
        })
    }

    /// Resume a session from a previously issued refresh token. A rejected
    /// refresh token is terminal; the operator has to log in again.
    pub async fn from_refresh_token(refresh_token: &str, user_id: &str) -> Result<Self, SourceError> {
        let client = device_session()?;

        // The token endpoint expects the form query duplicated as the body,
        // and signs over the raw (still percent-encoded) body string.
        let query = format!(
            "client_id={CLIENT_ID}&grant_type=refresh_token&refresh_token={refresh_token}&scope=user%2Csports"
        );
        let auth_header = format!("Basic {BASIC_AUTH}");
        let timestamp = Utc::now().timestamp();
        let sig = signature::sign(&auth_header, &format!("/token?{query}"), Some(&query), timestamp);

        let response = client
            .post(format!("{BASE_URL}/token?{query}"))
            .header("authorization", &auth_header)
            .header("timestamp", timestamp.to_string())
            .header("signature", sig)
            // content type as the official client sends it, typo included
            .header("content-type", "application/x-www-form-urlencode; charset=utf-8")
            .body(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!("refresh token expired: {detail}")));
        }

        let body: serde_json::Value = response.json().await?;
        let token = field_string(&body, "access_token")?;

        Ok(CodoonClient {
            client,
            token,
            user_id: user_id.to_string(),
            refresh_token: refresh_token.to_string(),
        })
    }

    /// Fetch the complete activity listing, page by page.
    pub async fn list_activities(&self) -> Result<Vec<ActivityStub>, SourceError> {
        collect_paged(|page| self.fetch_activity_page(page)).await
    }

    async fn fetch_activity_page(&self, page: u32) -> Result<ActivityPage, SourceError> {
        let payload = json!({
            "limit": PAGE_LIMIT,
            "page": page,
            "user_id": self.user_id,
        });
        debug!("listing activities, page {page}");
        let envelope: Envelope<ActivityPage> =
            self.signed_post("/api/get_old_route_log", &payload).await?;
        envelope.into_data("activity listing").map_err(|e| match e {
            // A refused listing means the whole run cannot proceed.
            SourceError::Fetch(msg) => SourceError::Protocol(msg),
            other => other,
        })
    }

    /// Fetch the full record for one listed activity. The detail endpoint is
    /// keyed by `route_id`; the record's identity stays the stub's `log_id`.
    pub async fn activity_detail(&self, stub: &ActivityStub) -> Result<ActivityDetail, SourceError> {
        let payload = json!({ "route_id": stub.route_id });
        let envelope: Envelope<RawDetail> =
            self.signed_post("/api/get_single_log", &payload).await?;
        let raw = envelope.into_data(&format!("activity {}", stub.log_id))?;

        Ok(ActivityDetail {
            id: stub.log_id,
            sports_type: raw.sports_type,
            start_time: raw.start_time,
            end_time: raw.end_time,
            points: raw.points,
        })
    }

    async fn signed_post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        payload: &serde_json::Value,
    ) -> Result<T, SourceError> {
        let body = serde_json::to_string(payload)?;
        let auth_header = format!("Bearer {}", self.token);
        let timestamp = Utc::now().timestamp();
        let sig = signature::sign(&auth_header, path, Some(&body), timestamp);

        let response = self
            .client
            .post(format!("{BASE_URL}{path}"))
            .header("authorization", &auth_header)
            .header("timestamp", timestamp.to_string())
            .header("signature", sig)
            .header("content-type", "application/json; charset=utf-8")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SourceError::Fetch(format!(
                "{path} returned HTTP {status}: {detail}"
            )));
        }

        Ok(response.json::<T>().await?)
    }
}

/// Accumulate listing pages until the server clears `has_more`.
///
/// A buggy or hostile server could report `has_more` forever; a page that
/// adds nothing, or more pages than any real account can have, aborts with a
/// protocol error instead of looping.
pub(crate) async fn collect_paged<F, Fut>(mut fetch_page: F) -> Result<Vec<ActivityStub>, SourceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ActivityPage, SourceError>>,
{
    let mut stubs: Vec<ActivityStub> = Vec::new();
    let mut page = 1;
    loop {
        let batch = fetch_page(page).await?;
        let before = stubs.len();
        stubs.extend(batch.log_list);

        if !batch.has_more {
            return Ok(stubs);
        }
        if stubs.len() == before {
            return Err(SourceError::Protocol(
                "server reports has_more but returned no new activities".to_string(),
            ));
        }
        if page >= PAGE_CEILING {
            return Err(SourceError::Protocol(format!(
                "pagination did not terminate after {PAGE_CEILING} pages"
            )));
        }
        page += 1;
    }
}

fn field_string(body: &serde_json::Value, field: &str) -> Result<String, SourceError> {
    let value = body
        .get(field)
        .ok_or_else(|| SourceError::Protocol(format!("token response missing {field}")))?;
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}
