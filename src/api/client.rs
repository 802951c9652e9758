// HTTP client for the remote moderation service.
//
// A thin reqwest wrapper over the four endpoints the gateway talks to. It
// knows the wire formats and nothing else: deadlines, fail-open fallbacks and
// policy enforcement are applied by the callers. Every request carries the
// client's API key as a bearer token.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::content::{ContentMeta, Decision, ModerationResult, JPEG_CONTENT_TYPE};
use crate::output::truncate_chars;
use crate::policy::{Policy, PolicySource};
use crate::telemetry::TelemetryEvent;

pub const POLICY_PATH: &str = "/v1/policy";
pub const CHECK_TEXT_PATH: &str = "/checkText";
pub const MODERATE_IMAGE_PATH: &str = "/v1/moderate/image";
pub const EVENTS_PATH: &str = "/v1/events";

/// What the image endpoint said.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageReply {
    /// A 2xx response with a well-formed verdict.
    Classified(ModerationResult),
    /// The service answered, but not with success.
    Unavailable(StatusCode),
}

/// Bearer-authenticated client for the moderation service.
pub struct ModerationApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ModerationApi {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("modgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Ask the service whether `text` may pass.
    ///
    /// Non-2xx is an error. A 2xx body without a boolean `isTextPermitted`
    /// counts as permitted.
    pub async fn check_text(&self, text: &str, meta: &ContentMeta) -> Result<bool> {
        let response = self
            .client
            .post(self.endpoint(CHECK_TEXT_PATH))
            .bearer_auth(&self.api_key)
            .json(&TextRequest { text, meta })
            .send()
            .await
            .context("Text moderation request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Text moderation returned {}: {}", status, body);
        }

        let body = response
            .text()
            .await
            .context("Failed to read text moderation response")?;
        let permitted = parse_text_verdict(&body);

        debug!(
            permitted = permitted,
            text_preview = %truncate_chars(text, 50),
            "Text classified"
        );

        Ok(permitted)
    }

    /// Send a JPEG body for classification.
    ///
    /// Non-2xx comes back as [`ImageReply::Unavailable`] rather than an error,
    /// so callers can tell "the service said no" apart from "we never got an
    /// answer". A 2xx body that can't be read as a verdict is an error.
    pub async fn moderate_image(&self, body: Bytes) -> Result<ImageReply> {
        let size = body.len();
        let response = self
            .client
            .post(self.endpoint(MODERATE_IMAGE_PATH))
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, JPEG_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .context("Image moderation request failed")?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "Image moderation unavailable");
            return Ok(ImageReply::Unavailable(status));
        }

        let value: Value = response
            .json()
            .await
            .context("Failed to parse image moderation response")?;
        let verdict = parse_image_verdict(&value)?;

        debug!(
            decision = %verdict.decision,
            nsfw_score = ?verdict.nsfw_score,
            bytes = size,
            "Image classified"
        );

        Ok(ImageReply::Classified(verdict))
    }

    /// Deliver one telemetry event. Any non-2xx is an error.
    pub async fn send_event(&self, event: &TelemetryEvent) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(EVENTS_PATH))
            .bearer_auth(&self.api_key)
            .json(event)
            .send()
            .await
            .context("Telemetry request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Telemetry endpoint returned {}", response.status());
        }

        Ok(())
    }
}

#[async_trait]
impl PolicySource for ModerationApi {
    async fn fetch_policy(&self) -> Result<Policy> {
        let response = self
            .client
            .get(self.endpoint(POLICY_PATH))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("Policy request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Policy endpoint returned {}: {}", status, body);
        }

        let value: Value = response
            .json()
            .await
            .context("Failed to parse policy response")?;

        Policy::from_json(&value)
    }
}

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
    meta: &'a ContentMeta,
}

/// Read `isTextPermitted` from a `/checkText` body. Anything other than an
/// explicit boolean means permitted.
pub fn parse_text_verdict(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("isTextPermitted").and_then(Value::as_bool))
        .unwrap_or(true)
}

/// Read a `/v1/moderate/image` body into a result.
///
/// `decision` is required and must be ALLOW or BLOCK. A non-numeric
/// `nsfwScore` is treated as absent; non-string reasons are skipped.
pub fn parse_image_verdict(value: &Value) -> Result<ModerationResult> {
    let raw = value
        .get("decision")
        .and_then(Value::as_str)
        .context("Image verdict has no decision")?;
    let decision =
        Decision::parse(raw).with_context(|| format!("Unknown image decision {raw:?}"))?;

    let nsfw_score = value
        .get("nsfwScore")
        .and_then(Value::as_f64)
        .filter(|score| score.is_finite());

    let reasons = value
        .get("reasons")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(ModerationResult {
        decision,
        nsfw_score,
        reasons,
    })
}
