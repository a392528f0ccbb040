//! `Requester`: the HTTP client every other component uses to talk to the
//! state service (§4.1, §4.3, §4.4, §4.5). Grounded on
//! `jobmon_core/requester.py`: a thin wrapper around the HTTP library with
//! bounded retry on connection failure and a uniform non-200 error.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{instrument, warn};

use crate::error::ClientError;

const DEFAULT_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Thin HTTP client bound to the state service's base URL.
///
/// Cheap to clone (an `Arc`-backed `reqwest::Client` under the hood), the
/// same way the teacher's `db::DbPool` is passed around as `AppState` data.
#[derive(Clone)]
pub struct Requester {
    base_url: String,
    client: Client,
    retries: u32,
}

impl Requester {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is valid");
        Self {
            base_url: base_url.into(),
            client,
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// `GET route`, deserializing the JSON body.
    #[instrument(skip(self))]
    pub async fn get<R: DeserializeOwned>(&self, route: &str) -> Result<R, ClientError> {
        self.send::<(), R>(Method::GET, route, None).await
    }

    /// `POST route` with a JSON body, deserializing the JSON response.
    #[instrument(skip(self, body))]
    pub async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        route: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        self.send(Method::POST, route, Some(body)).await
    }

    /// `PUT route` with a JSON body, deserializing the JSON response.
    #[instrument(skip(self, body))]
    pub async fn put<B: Serialize, R: DeserializeOwned>(
        &self,
        route: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        self.send(Method::PUT, route, Some(body)).await
    }

    async fn send<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        route: &str,
        body: Option<&B>,
    ) -> Result<R, ClientError> {
        let url = format!("{}{}", self.base_url, route);
        let mut attempt = 0;
        loop {
            let mut req = self.client.request(method.clone(), &url);
            if let Some(b) = body {
                req = req.json(b);
            }
            let result = req.send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<R>()
                            .await
                            .map_err(|source| ClientError::Decode {
                                route: route.to_string(),
                                source,
                            });
                    }
                    if should_retry_status(status) && attempt < self.retries {
                        attempt += 1;
                        backoff(attempt).await;
                        continue;
                    }
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(ClientError::InvalidResponse {
                        route: route.to_string(),
                        status: status.as_u16(),
                        body: body_text,
                    });
                }
                Err(source) => {
                    if attempt < self.retries && (source.is_timeout() || source.is_connect()) {
                        attempt += 1;
                        warn!(route, attempt, "request failed, retrying");
                        backoff(attempt).await;
                        continue;
                    }
                    return Err(ClientError::Request {
                        route: route.to_string(),
                        source,
                    });
                }
            }
        }
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT
}

async fn backoff(attempt: u32) {
    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
}
