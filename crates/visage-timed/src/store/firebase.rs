//! Firebase Realtime Database over REST, with server-sent events for
//! subscriptions.

use super::{RealtimeStore, StoreError, Subscription};
use crate::auth::TokenSlot;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use visage_time_core::Snapshot;

pub struct FirebaseStore {
    client: reqwest::Client,
    database_url: String,
    token: TokenSlot,
}

impl FirebaseStore {
    pub fn new(database_url: impl Into<String>, token: TokenSlot) -> Self {
        Self {
            client: reqwest::Client::new(),
            database_url: database_url.into(),
            token,
        }
    }

    fn url(&self, collection: &str) -> String {
        format!("{}/{}.json", self.database_url, collection)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        with_token(req, self.token.get())
    }
}

fn with_token(req: reqwest::RequestBuilder, token: Option<String>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => req.query(&[("auth", token)]),
        None => req,
    }
}

async fn rejected(response: reqwest::Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
    StoreError::Rejected { status, message }
}

#[async_trait]
impl RealtimeStore for FirebaseStore {
    async fn push(&self, collection: &str, value: Value) -> Result<String, StoreError> {
        let response = self
            .authed(self.client.post(self.url(collection)))
            .json(&value)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        #[derive(Deserialize)]
        struct PushResponse {
            name: String,
        }
        let r: PushResponse = response.json().await?;
        tracing::debug!(collection, key = %r.name, "record pushed");
        Ok(r.name)
    }

    async fn snapshot(&self, collection: &str) -> Result<Snapshot, StoreError> {
        let response = self
            .authed(self.client.get(self.url(collection)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let value: Value = response.json().await?;
        to_snapshot(value)
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        let (tx, rx) = watch::channel(None);
        let client = self.client.clone();
        let url = self.url(collection);
        let token = self.token.clone();
        let collection = collection.to_string();

        let listener = tokio::spawn(async move {
            loop {
                // Taken before connecting so a rotation during the stream is seen.
                let mut rotated = token.watch();
                let request = with_token(client.get(&url), token.get())
                    .header("Accept", "text/event-stream");
                match listen(request, &tx).await {
                    Ok(()) => {
                        tracing::info!(collection = %collection, "subscription closed by server");
                        break;
                    }
                    Err(StoreError::AuthRevoked) => {
                        tracing::info!(collection = %collection, "id token expired; resubscribing after refresh");
                        if rotated.changed().await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(collection = %collection, error = %e, "subscription ended");
                        break;
                    }
                }
            }
        });

        Subscription::new(rx, Some(listener))
    }
}

/// Read the event stream, keeping a local copy of the collection tree and
/// publishing the whole snapshot after each change.
async fn listen(
    request: reqwest::RequestBuilder,
    tx: &watch::Sender<Option<Snapshot>>,
) -> Result<(), StoreError> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(rejected(response).await);
    }

    let mut tree = Value::Null;
    let mut parser = SseParser::default();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for event in parser.feed(&chunk) {
            match event.event.as_str() {
                "put" | "patch" => {
                    let update: PathUpdate = serde_json::from_str(&event.data)?;
                    if event.event == "put" {
                        apply_put(&mut tree, &update.path, update.data);
                    } else {
                        apply_patch(&mut tree, &update.path, update.data);
                    }
                    tx.send_replace(Some(to_snapshot(tree.clone())?));
                }
                "keep-alive" => {}
                "auth_revoked" => return Err(StoreError::AuthRevoked),
                "cancel" => {
                    return Err(StoreError::Rejected {
                        status: 401,
                        message: format!("{}: {}", event.event, event.data),
                    });
                }
                other => tracing::debug!(event = other, "ignoring stream event"),
            }
        }
    }

    Ok(())
}

#[derive(Deserialize)]
struct PathUpdate {
    path: String,
    data: Value,
}

/// A collection value (`null` or object) as a keyed snapshot.
fn to_snapshot(value: Value) -> Result<Snapshot, StoreError> {
    match value {
        Value::Null => Ok(Snapshot::new()),
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(StoreError::UnexpectedResponse(format!(
            "collection is not an object: {other}"
        ))),
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Replace the value at `path`. A `null` value deletes it.
fn apply_put(tree: &mut Value, path: &str, data: Value) {
    let segs = segments(path);
    let Some((last, parents)) = segs.split_last() else {
        *tree = data;
        return;
    };

    let mut node = tree;
    for seg in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else { return };
        node = map.entry(seg.to_string()).or_insert(Value::Null);
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if data.is_null() {
            map.remove(*last);
        } else {
            map.insert(last.to_string(), data);
        }
    }
}

/// Merge each child of `data` into the node at `path`.
fn apply_patch(tree: &mut Value, path: &str, data: Value) {
    let Value::Object(children) = data else {
        apply_put(tree, path, data);
        return;
    };
    let base = path.trim_end_matches('/');
    for (key, value) in children {
        apply_put(tree, &format!("{base}/{key}"), value);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Incremental `text/event-stream` parser. Bytes are buffered until a whole
/// event block has arrived, so multi-byte characters may span chunks.
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
}

/// End offset of the first complete event block in `buf`.
fn block_end(buf: &[u8]) -> Option<usize> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    lf.into_iter().chain(crlf).min()
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = block_end(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end).collect();
            let block = String::from_utf8_lossy(&raw);

            let mut event = String::from("message");
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = v.trim().to_string();
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push(v.trim_start().to_string());
                }
            }
            events.push(SseEvent {
                event,
                data: data.join("\n"),
            });
        }
        events
    }
}
