//! Firebase Realtime Database sink over its REST API.
//!
//! Locations live at `{databaseURL}/locations/{busId}.json`; the streaming
//! variant of the same URL delivers server-sent events.

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;

use super::{MirrorOptions, MirrorRecord, MirrorSettings, MirrorSink, SinkEvent, SinkEventStream};
use crate::error::AdapterError;

pub struct FirebaseSink {
    client: Client,
    /// No overall timeout; event streams stay open indefinitely.
    stream_client: Client,
    base: Url,
    auth_token: Option<String>,
}

impl FirebaseSink {
    pub fn new(settings: &MirrorSettings, options: &MirrorOptions) -> Result<Self, AdapterError> {
        let base = Url::parse(settings.database_url.trim())
            .map_err(|e| AdapterError::InvalidConfig(format!("databaseURL: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(AdapterError::InvalidConfig("databaseURL must be an http(s) URL".to_string()));
        }

        let client = Client::builder().timeout(options.request_timeout).build()?;
        let stream_client = Client::builder()
            .connect_timeout(options.request_timeout)
            .build()?;

        Ok(Self {
            client,
            stream_client,
            base,
            auth_token: settings.auth_token.clone(),
        })
    }

    fn location_url(&self, bus_id: &str) -> Result<Url, AdapterError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| AdapterError::InvalidConfig("databaseURL cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("locations")
            .push(&format!("{}.json", bus_id));
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }
}

fn check_status(response: &reqwest::Response) -> Result<(), AdapterError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(AdapterError::Status(status.as_u16()))
    }
}

#[async_trait]
impl MirrorSink for FirebaseSink {
    async fn probe(&self, bus_id: &str) -> Result<(), AdapterError> {
        let mut url = self.location_url(bus_id)?;
        url.query_pairs_mut().append_pair("shallow", "true");
        let response = self.client.get(url).send().await?;
        check_status(&response)
    }

    async fn put_latest(&self, bus_id: &str, record: &MirrorRecord) -> Result<(), AdapterError> {
        let response = self
            .client
            .put(self.location_url(bus_id)?)
            .json(record)
            .send()
            .await?;
        check_status(&response)
    }

    async fn get_latest(&self, bus_id: &str) -> Result<Option<MirrorRecord>, AdapterError> {
        let response = self.client.get(self.location_url(bus_id)?).send().await?;
        check_status(&response)?;

        let value: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))?;
        if value.is_null() {
            return Ok(None);
        }
        MirrorRecord::from_value(value, bus_id).map(Some)
    }

    async fn subscribe(&self, bus_id: &str) -> Result<SinkEventStream, AdapterError> {
        let response = self
            .stream_client
            .get(self.location_url(bus_id)?)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        check_status(&response)?;

        let mut decoder = SseDecoder::default();
        let events = response
            .bytes_stream()
            .map_err(AdapterError::from)
            .map_ok(move |chunk| stream::iter(decoder.push(&chunk)))
            .try_flatten();
        Ok(events.boxed())
    }
}

/// Incremental `text/event-stream` parser. Chunks may split events anywhere.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Result<SinkEvent, AdapterError>> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

#[derive(Deserialize)]
struct EventBody {
    path: String,
    #[serde(default)]
    data: Value,
}

fn parse_block(block: &str) -> Option<Result<SinkEvent, AdapterError>> {
    let mut name = None;
    let mut data = String::new();
    for line in block.lines() {
        if let Some(v) = line.strip_prefix("event:") {
            name = Some(v.trim());
        } else if let Some(v) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(v.trim_start());
        }
    }

    let name = name?;
    let body = || {
        serde_json::from_str::<EventBody>(&data).map_err(|e| AdapterError::Decode(format!("{} event: {}", name, e)))
    };

    match name {
        "put" => Some(body().map(|b| SinkEvent::Put { path: b.path, data: b.data })),
        "patch" => Some(body().map(|b| SinkEvent::Patch { path: b.path, data: b.data })),
        "keep-alive" => Some(Ok(SinkEvent::KeepAlive)),
        "cancel" | "auth_revoked" => Some(Ok(SinkEvent::Cancelled(name.to_string()))),
        _ => None,
    }
}
