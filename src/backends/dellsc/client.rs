//! Dell Storage Center REST transport
//!
//! `HttpClient` owns the Data Collector session. Calls flagged async must be
//! answered with `202 Accepted`; the returned `AsyncTask` is then polled
//! until the array hands back the real result.

use super::models::{AsyncTask, ASYNC_TASK_OBJECT_TYPE};
use crate::error::{Error, Result};
use crate::jobs::{poll_job, PollConfig, PollStatus};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

const BACKEND: &str = "dellsc";

/// Fallback when an async task carries no usable URL
const ASYNC_TASK_URL: &str = "api/rest/ApiConnection/AsyncTask/";

const RETRY_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
const RETRY_MAX_ELAPSED: Duration = Duration::from_secs(7);

// =============================================================================
// Transport Port
// =============================================================================

/// Status and decoded body of one REST call
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub body: Value,
}

impl RestResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn no_content() -> Self {
        Self::new(204, Value::Null)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Decode the whole body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Decode a list body; a single object counts as a list of one
    pub fn list<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        match &self.body {
            Value::Null => Ok(Vec::new()),
            Value::Array(_) => self.json(),
            other => Ok(vec![serde_json::from_value(other.clone())?]),
        }
    }

    /// First object of a list body, or the object itself
    pub fn first<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        Ok(self.list()?.into_iter().next())
    }

    fn text_contains(&self, needle: &str) -> bool {
        match &self.body {
            Value::String(s) => s.contains(needle),
            other => other.to_string().contains(needle),
        }
    }
}

/// Synchronous-call view of the Storage Center REST API
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<RestResponse>;

    async fn post(&self, url: &str, payload: Value, is_async: bool) -> Result<RestResponse>;

    async fn put(&self, url: &str, payload: Value, is_async: bool) -> Result<RestResponse>;

    async fn delete(&self, url: &str, payload: Option<Value>, is_async: bool)
        -> Result<RestResponse>;
}

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for one Data Collector
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Scheme, host and port, e.g. `https://10.0.0.10:3033`
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub verify_cert: bool,
    pub api_version: String,
    pub request_timeout: Duration,
    pub async_task_poll: PollConfig,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:3033".to_string(),
            username: "Admin".to_string(),
            password: String::new(),
            verify_cert: false,
            api_version: "2.0".to_string(),
            request_timeout: Duration::from_secs(60),
            async_task_poll: PollConfig::async_task_default(),
        }
    }
}

// =============================================================================
// HTTP Client
// =============================================================================

/// reqwest-backed [`RestTransport`]
pub struct HttpClient {
    http: reqwest::Client,
    root: String,
    headers: HeaderMap,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Build the client; no request is sent until [`HttpClient::login`]
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!config.verify_cert)
            .timeout(config.request_timeout)
            .build()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let version = HeaderValue::from_str(&config.api_version).map_err(|e| {
            Error::Configuration(format!("Invalid API version {}: {}", config.api_version, e))
        })?;
        headers.insert(HeaderName::from_static("x-dell-api-version"), version);

        let root = format!("{}/", config.base_url.trim_end_matches('/'));

        Ok(Self {
            http,
            root,
            headers,
            config,
        })
    }

    /// Open the session
    pub async fn login(&self) -> Result<()> {
        let url = self.format_url("ApiConnection/Login");
        info!("Logging in to Dell Storage Center at {}", self.config.base_url);
        let resp = self
            .http
            .post(&url)
            .headers(self.headers.clone())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if !resp.status().is_success() {
            error!("Login to {} failed: {}", self.config.base_url, resp.status());
            return Err(Error::backend(
                BACKEND,
                format!("Failed to connect to Dell REST API: HTTP {}", resp.status()),
            ));
        }
        Ok(())
    }

    /// Close the session; failures are only logged
    pub async fn logout(&self) {
        let url = self.format_url("ApiConnection/Logout");
        match self.http.post(&url).headers(self.headers.clone()).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("Logged out of {}", self.config.base_url)
            }
            Ok(resp) => debug!("Logout returned {}", resp.status()),
            Err(e) => debug!("Logout failed: {}", e),
        }
    }

    fn format_url(&self, url: &str) -> String {
        if url.starts_with("api/") {
            format!("{}{}", self.root, url)
        } else {
            format!("{}api/rest/{}", self.root, url)
        }
    }

    fn request(
        &self,
        method: &Method,
        url: &str,
        payload: Option<&Value>,
        is_async: bool,
    ) -> reqwest::RequestBuilder {
        let mut headers = self.headers.clone();
        if is_async {
            headers.insert(HeaderName::from_static("async"), HeaderValue::from_static("True"));
        }
        let builder = self.http.request(method.clone(), url).headers(headers);
        match payload {
            Some(body) => builder.json(body),
            None => builder,
        }
    }

    /// Send with retries on connection errors and on the Data Collector's
    /// transient `400 Unhandled Exception` for reads.
    async fn send(
        &self,
        method: Method,
        url: &str,
        payload: Option<&Value>,
        is_async: bool,
    ) -> Result<RestResponse> {
        let full = self.format_url(url);
        debug!("{} {}", method, full);

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(RETRY_INITIAL_INTERVAL)
            .with_multiplier(2.0)
            .with_max_elapsed_time(Some(RETRY_MAX_ELAPSED))
            .build();

        let resp = backoff::future::retry(policy, || {
            let builder = self.request(&method, &full, payload, is_async);
            let is_get = method == Method::GET;
            let url = full.clone();
            async move {
                let resp = builder.send().await.map_err(|e| {
                    if e.is_connect() {
                        backoff::Error::transient(Error::Http(e))
                    } else {
                        backoff::Error::permanent(Error::Http(e))
                    }
                })?;
                let resp = decode(resp).await.map_err(backoff::Error::permanent)?;
                if is_get && resp.status == 400 && resp.text_contains("Unhandled Exception") {
                    debug!("Retrying GET {} after unhandled exception", url);
                    return Err(backoff::Error::transient(Error::UnexpectedStatus {
                        backend: BACKEND.to_string(),
                        method: "GET".to_string(),
                        url,
                        status: resp.status,
                    }));
                }
                Ok(resp)
            }
        })
        .await?;

        self.rest_ret(resp, url, is_async).await
    }

    async fn rest_ret(&self, resp: RestResponse, url: &str, is_async: bool) -> Result<RestResponse> {
        if !is_async {
            return Ok(resp);
        }
        if resp.status != 202 {
            debug!("REST async error, command not accepted: {} returned {}", url, resp.status);
            return Err(Error::backend(BACKEND, "REST Async Error: Command not accepted."));
        }
        let task: AsyncTask = resp.json()?;
        self.wait_for_async_complete(task).await
    }

    async fn wait_for_async_complete(&self, task: AsyncTask) -> Result<RestResponse> {
        let label = task
            .instance_id
            .clone()
            .unwrap_or_else(|| "AsyncTask".to_string());
        let current = parking_lot::Mutex::new(async_url(&task)?);
        let current = &current;
        let this = self;

        let outcome = poll_job(&self.config.async_task_poll, &label, move || async move {
            let url = current.lock().clone();
            let resp = this.get(&url).await?;
            if !resp.is_success() {
                debug!("Async task poll {} returned {}", url, resp.status);
                return Ok(PollStatus::Ready(resp));
            }
            match resp.body.get("objectType").and_then(Value::as_str) {
                Some(ASYNC_TASK_OBJECT_TYPE) => {
                    let next: AsyncTask = resp.json()?;
                    let next_url = async_url(&next)?;
                    *current.lock() = next_url;
                    Ok(PollStatus::Pending)
                }
                _ => Ok(PollStatus::Ready(resp)),
            }
        })
        .await?;

        outcome.into_result(&label).map_err(|e| {
            error!(
                "Async error: unable to retrieve {} method {} result: {}",
                task.object_type_name.as_deref().unwrap_or("object"),
                task.method_name.as_deref().unwrap_or("unknown"),
                e
            );
            e
        })
    }
}

/// Turn a task's `returnValue` into a pollable URL.
///
/// The Data Collector sometimes answers with a full URL, a URL missing the
/// task id, or nothing at all.
fn async_url(task: &AsyncTask) -> Result<String> {
    let stripped = task
        .return_value
        .as_deref()
        .map(strip_scheme_and_host)
        .unwrap_or_default();

    let mut url = if stripped.is_empty() {
        debug!("Async task has no URL: {:?}", task);
        ASYNC_TASK_URL.to_string()
    } else {
        stripped
    };

    if url.ends_with('/') {
        match task.instance_id.as_deref() {
            Some(id) => url.push_str(id),
            None => {
                error!("Bogus async task returned: {:?}", task);
                return Err(Error::backend(BACKEND, "Invalid async task URL"));
            }
        }
    }

    if url.starts_with('<') && url.ends_with('>') {
        error!("Malformed async task URL (XML returned): {:?}", task);
        return Err(Error::backend(BACKEND, "Malformed async task URL"));
    }

    Ok(url)
}

fn strip_scheme_and_host(url: &str) -> String {
    match url.split_once("://") {
        Some((_, rest)) => rest
            .split_once('/')
            .map(|(_, path)| path.to_string())
            .unwrap_or_default(),
        None => url.to_string(),
    }
}

async fn decode(resp: reqwest::Response) -> Result<RestResponse> {
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok(RestResponse { status, body })
}

#[async_trait]
impl RestTransport for HttpClient {
    async fn get(&self, url: &str) -> Result<RestResponse> {
        self.send(Method::GET, url, None, false).await
    }

    async fn post(&self, url: &str, payload: Value, is_async: bool) -> Result<RestResponse> {
        self.send(Method::POST, url, Some(&payload), is_async).await
    }

    async fn put(&self, url: &str, payload: Value, is_async: bool) -> Result<RestResponse> {
        self.send(Method::PUT, url, Some(&payload), is_async).await
    }

    async fn delete(
        &self,
        url: &str,
        payload: Option<Value>,
        is_async: bool,
    ) -> Result<RestResponse> {
        self.send(Method::DELETE, url, payload.as_ref(), is_async).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::extract::State;
    use axum::http::HeaderMap as AxumHeaders;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct FakeSc {
        task_polls: Arc<AtomicU32>,
    }

    async fn create_volume(headers: AxumHeaders) -> impl IntoResponse {
        if headers.get("async").and_then(|v| v.to_str().ok()) != Some("True") {
            return (AxumStatus::OK, Json(json!({"instanceId": "64702.9"})));
        }
        (
            AxumStatus::ACCEPTED,
            Json(json!({
                "objectType": "AsyncTask",
                "instanceId": "77",
                "returnValue": "https://dsm.example:3033/api/rest/ApiConnection/AsyncTask/77",
                "methodName": "Create",
                "objectTypeName": "ScVolume"
            })),
        )
    }

    async fn poll_task(State(state): State<FakeSc>) -> impl IntoResponse {
        let n = state.task_polls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            Json(json!({
                "objectType": "AsyncTask",
                "instanceId": "77",
                "returnValue": "https://dsm.example:3033/api/rest/ApiConnection/AsyncTask/"
            }))
        } else {
            Json(json!({
                "objectType": "ScVolume",
                "instanceId": "64702.9",
                "name": "vol-a",
                "scSerialNumber": 64702
            }))
        }
    }

    async fn serve() -> (HttpClient, FakeSc) {
        let state = FakeSc::default();
        let app = Router::new()
            .route("/api/rest/ApiConnection/Login", post(|| async { AxumStatus::OK }))
            .route("/api/rest/StorageCenter/ScVolume", post(create_volume))
            .route("/api/rest/ApiConnection/AsyncTask/77", get(poll_task))
            .route(
                "/api/rest/StorageCenter/StorageCenter",
                get(|| async { Json(json!([{"instanceId": "64702", "scSerialNumber": 64702}])) }),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = HttpClient::new(HttpClientConfig {
            base_url: format!("http://{}", addr),
            async_task_poll: PollConfig::immediate(5),
            ..Default::default()
        })
        .unwrap();
        (client, state)
    }

    #[test]
    fn test_async_url_normalisation() {
        let task = AsyncTask {
            object_type: Some("AsyncTask".into()),
            instance_id: Some("12".into()),
            return_value: Some("https://10.0.0.1:3033/api/rest/ApiConnection/AsyncTask/".into()),
            method_name: None,
            object_type_name: None,
        };
        assert_eq!(async_url(&task).unwrap(), "api/rest/ApiConnection/AsyncTask/12");

        let empty = AsyncTask {
            return_value: None,
            ..task.clone()
        };
        assert_eq!(async_url(&empty).unwrap(), "api/rest/ApiConnection/AsyncTask/12");

        let no_id = AsyncTask {
            instance_id: None,
            return_value: None,
            ..task.clone()
        };
        assert_matches!(async_url(&no_id), Err(Error::BackendApi { .. }));

        let xml = AsyncTask {
            return_value: Some("<error>".into()),
            ..task
        };
        assert_matches!(async_url(&xml), Err(Error::BackendApi { .. }));
    }

    #[tokio::test]
    async fn test_async_post_polls_task_until_result() {
        let (client, state) = serve().await;
        client.login().await.unwrap();

        let resp = client
            .post("StorageCenter/ScVolume", json!({"Name": "vol-a"}), true)
            .await
            .unwrap();

        assert!(resp.is_success());
        assert_eq!(resp.body["instanceId"], "64702.9");
        assert_eq!(state.task_polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_call_not_accepted_is_an_error() {
        let (client, _) = serve().await;
        // Sent without the async header, so the fake answers 200 instead of 202.
        let resp = client
            .send(Method::POST, "StorageCenter/ScVolume", Some(&json!({})), false)
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        let err = client.rest_ret(resp, "StorageCenter/ScVolume", true).await;
        assert_matches!(err, Err(Error::BackendApi { .. }));
    }

    #[tokio::test]
    async fn test_get_list() {
        let (client, _) = serve().await;
        let resp = client.get("StorageCenter/StorageCenter").await.unwrap();
        let scs: Vec<super::super::models::ScStorageCenter> = resp.list().unwrap();
        assert_eq!(scs.len(), 1);
        assert_eq!(scs[0].sc_serial_number, 64702);

        let missing = client.get("StorageCenter/ScVolume/1.1").await.unwrap();
        assert!(missing.is_not_found());
    }
}
