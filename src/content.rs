// Content types shared by the client, the wire layer, and telemetry.
//
// ContentMeta is passed through to the service verbatim. ImageData is the
// set of byte-bearing inputs check_image_jpeg accepts; all of them collapse
// to one `Bytes` body before anything touches the network.

use std::fmt;
use std::io::Cursor;
use std::pin::Pin;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ModerationError;

/// The only media type the image endpoint accepts.
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Reason attached when the request never produced a usable response.
pub const REASON_NETWORK_ERROR: &str = "sdk_network_error";

/// Reason attached when the service answered with a non-success status.
pub const REASON_CLOUD_UNAVAILABLE: &str = "cloud_unavailable";

/// Reason appended when local policy escalates an image to BLOCK.
pub const REASON_POLICY_NSFW: &str = "policy_nsfw";

/// Caller-supplied context about a piece of content.
///
/// An opaque JSON object sent to the service exactly as given: values keep
/// their JSON type and explicit nulls survive. Accessors cover the keys the
/// service knows about (`userId`, `sessionId`, `contentId`, `locale`,
/// `channel`); anything else is reachable through [`ContentMeta::get`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentMeta(Map<String, Value>);

impl ContentMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing any previous value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_user_id(self, user_id: impl Into<String>) -> Self {
        self.with("userId", user_id.into())
    }

    pub fn with_session_id(self, session_id: impl Into<String>) -> Self {
        self.with("sessionId", session_id.into())
    }

    pub fn with_content_id(self, content_id: impl Into<String>) -> Self {
        self.with("contentId", content_id.into())
    }

    pub fn with_locale(self, locale: impl Into<String>) -> Self {
        self.with("locale", locale.into())
    }

    pub fn with_channel(self, channel: impl Into<String>) -> Self {
        self.with("channel", channel.into())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn user_id(&self) -> Option<&Value> {
        self.get("userId")
    }

    pub fn session_id(&self) -> Option<&Value> {
        self.get("sessionId")
    }

    pub fn content_id(&self) -> Option<&Value> {
        self.get("contentId")
    }

    pub fn locale(&self) -> Option<&Value> {
        self.get("locale")
    }

    pub fn channel(&self) -> Option<&Value> {
        self.get("channel")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ContentMeta {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Final verdict for a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allow,
    Block,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Block => "BLOCK",
        }
    }

    /// Parse a remote decision string. Case-insensitive; anything else is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("ALLOW") {
            Some(Decision::Allow)
        } else if raw.eq_ignore_ascii_case("BLOCK") {
            Some(Decision::Block)
        } else {
            None
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an image check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationResult {
    pub decision: Decision,
    pub nsfw_score: Option<f64>,
    /// Ordered; local enforcement only ever appends.
    pub reasons: Vec<String>,
}

impl ModerationResult {
    /// Fallback when the request failed before the service could answer.
    pub fn network_error() -> Self {
        Self::allow_with_reason(REASON_NETWORK_ERROR)
    }

    /// Fallback when the service answered with a non-success status.
    pub fn cloud_unavailable() -> Self {
        Self::allow_with_reason(REASON_CLOUD_UNAVAILABLE)
    }

    fn allow_with_reason(reason: &str) -> Self {
        Self {
            decision: Decision::Allow,
            nsfw_score: None,
            reasons: vec![reason.to_string()],
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.decision == Decision::Block
    }
}

/// A lazily-read image source, optionally tagged with a media type.
pub struct Blob {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    content_type: Option<String>,
}

impl Blob {
    /// A blob over bytes already in memory.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::from_reader(Cursor::new(data.into()))
    }

    /// A blob that will be read to the end when the check runs.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    async fn read_all(mut self) -> Result<Bytes, ModerationError> {
        if let Some(declared) = self.content_type.as_deref() {
            if !is_jpeg_media_type(declared) {
                return Err(ModerationError::UnsupportedInput(format!(
                    "blob declares media type {declared:?}, expected {JPEG_CONTENT_TYPE}"
                )));
            }
        }

        let mut buf = Vec::new();
        self.reader
            .read_to_end(&mut buf)
            .await
            .map_err(ModerationError::ImageRead)?;
        Ok(Bytes::from(buf))
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Image input accepted by `check_image_jpeg`.
#[derive(Debug)]
pub enum ImageData {
    /// A plain byte vector.
    Raw(Vec<u8>),
    /// A reference-counted buffer.
    Buffer(Bytes),
    /// A lazily-read source.
    Blob(Blob),
}

impl ImageData {
    /// Collapse any representation into the raw request body.
    pub async fn into_bytes(self) -> Result<Bytes, ModerationError> {
        match self {
            ImageData::Raw(data) => Ok(Bytes::from(data)),
            ImageData::Buffer(data) => Ok(data),
            ImageData::Blob(blob) => blob.read_all().await,
        }
    }
}

impl From<Vec<u8>> for ImageData {
    fn from(data: Vec<u8>) -> Self {
        ImageData::Raw(data)
    }
}

impl From<&[u8]> for ImageData {
    fn from(data: &[u8]) -> Self {
        ImageData::Raw(data.to_vec())
    }
}

impl From<Bytes> for ImageData {
    fn from(data: Bytes) -> Self {
        ImageData::Buffer(data)
    }
}

impl From<Blob> for ImageData {
    fn from(blob: Blob) -> Self {
        ImageData::Blob(blob)
    }
}

fn is_jpeg_media_type(raw: &str) -> bool {
    raw.split(';')
        .next()
        .map(str::trim)
        .is_some_and(|essence| essence.eq_ignore_ascii_case(JPEG_CONTENT_TYPE))
}
