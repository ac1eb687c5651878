use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::{AppError, AppResult};
use crate::models::RecordEvent;
use crate::store::sse::{SseDecoder, SseFrame};
use crate::store::{ListQuery, MutationRequest, RealtimeTransport, RecordStore, Subscription};

const CONNECT_EVENT: &str = "PB_CONNECT";

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectPayload {
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
}

/// HTTP client for a PocketBase instance.
#[derive(Debug, Clone)]
pub struct PocketBaseClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    connect_timeout: Duration,
}

impl PocketBaseClient {
    pub fn new(config: &BackendConfig, auth_token: Option<String>) -> AppResult<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        // The realtime stream stays open indefinitely, so only the connect phase is bounded.
        let stream_http = reqwest::Client::builder().connect_timeout(timeout).build()?;

        Ok(Self {
            http,
            stream_http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token,
            connect_timeout: timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn error_from_response(response: reqwest::Response) -> AppError {
        let status = response.status().as_u16();
        let message = match response.text().await {
            Ok(body) => serde_json::from_str::<ErrorPayload>(&body)
                .map(|p| p.message)
                .unwrap_or(body),
            Err(e) => e.to_string(),
        };

        if status == 401 || status == 403 {
            AppError::Authentication(message)
        } else {
            AppError::Http { status, message }
        }
    }

    async fn register_subscription(&self, client_id: &str, topic: &str) -> AppResult<()> {
        let mut request = self.http.post(self.url("/api/realtime")).json(&json!({
            "clientId": client_id,
            "subscriptions": [topic],
        }));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }
}

/// Reads frames until PocketBase announces the client id. Frames that arrive
/// in the same chunk after the connect frame are kept in `backlog`.
async fn wait_for_connect<S, B>(
    stream: &mut S,
    decoder: &mut SseDecoder,
    backlog: &mut Vec<SseFrame>,
) -> AppResult<String>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::SubscriptionError(e.to_string()))?;
        let mut frames = decoder.push(chunk.as_ref()).into_iter();
        while let Some(frame) = frames.next() {
            if frame.event == CONNECT_EVENT {
                let payload: ConnectPayload = serde_json::from_str(&frame.data)?;
                backlog.extend(&mut frames);
                return Ok(payload.client_id);
            }
        }
    }

    Err(AppError::SubscriptionError(
        "realtime stream closed before connect".to_string(),
    ))
}

#[async_trait]
impl RecordStore for PocketBaseClient {
    async fn list_records(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> AppResult<Vec<serde_json::Value>> {
        let per_page = query.per_page.to_string();
        let expand = query.expand.join(",");
        let mut params = vec![
            ("filter", query.filter.as_str()),
            ("perPage", per_page.as_str()),
            ("skipTotal", "1"),
        ];
        if !expand.is_empty() {
            params.push(("expand", expand.as_str()));
        }
        if let Some(sort) = &query.sort {
            params.push(("sort", sort.as_str()));
        }

        let mut request = self
            .http
            .get(self.url(&format!("/api/collections/{}/records", collection)))
            .query(&params);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let list: ListResponse = response.json().await?;
        debug!("Listed {} records from {}", list.items.len(), collection);
        Ok(list.items)
    }

    async fn mutate(&self, request: MutationRequest) -> AppResult<serde_json::Value> {
        let token = request
            .auth_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Authentication("no auth token for mutation".to_string()))?;

        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path))
            .bearer_auth(token);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl RealtimeTransport for PocketBaseClient {
    async fn subscribe(&self, collection: &str, pattern: &str) -> AppResult<Subscription> {
        let topic = format!("{}/{}", collection, pattern);

        let response = self
            .stream_http
            .get(self.url("/api/realtime"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| AppError::SubscriptionError(e.to_string()))?;
        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            return Err(AppError::SubscriptionError(err.to_string()));
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::new();
        let mut backlog: Vec<SseFrame> = Vec::new();

        let client_id = tokio::time::timeout(
            self.connect_timeout,
            wait_for_connect(&mut stream, &mut decoder, &mut backlog),
        )
        .await
        .map_err(|_| {
            AppError::SubscriptionError("timed out waiting for realtime connect".to_string())
        })??;

        self.register_subscription(&client_id, &topic)
            .await
            .map_err(|e| AppError::SubscriptionError(e.to_string()))?;
        debug!("Realtime client {} subscribed to {}", client_id, topic);

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_topic = topic.clone();

        tokio::spawn(async move {
            let forward = |frame: SseFrame| -> bool {
                if frame.event != task_topic {
                    return true;
                }
                match serde_json::from_str::<RecordEvent>(&frame.data) {
                    Ok(event) => tx.send(Ok(event)).is_ok(),
                    Err(e) => {
                        warn!("Skipping undecodable realtime payload on {}: {}", task_topic, e);
                        true
                    }
                }
            };

            for frame in backlog {
                if !forward(frame) {
                    return;
                }
            }

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        debug!("Realtime subscription {} closed", task_topic);
                        return;
                    }
                    chunk = stream.next() => match chunk {
                        Some(Ok(bytes)) => {
                            for frame in decoder.push(&bytes) {
                                if !forward(frame) {
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Realtime stream {} failed: {}", task_topic, e);
                            let _ = tx.send(Err(AppError::SubscriptionError(e.to_string())));
                            return;
                        }
                        None => {
                            let _ = tx.send(Err(AppError::SubscriptionError(
                                "realtime stream ended".to_string(),
                            )));
                            return;
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(topic, rx, cancel))
    }
}
