// ModerationClient: the gateway's public facade.
//
// One client per process is the intended use: construct it once with
// `ModerationClient::init`, then share it by reference or behind an Arc. It
// owns the configuration, the wire client, the single PolicyStore, and the
// telemetry emitter.
//
// Each check moves through the same stages: make sure the policy is fresh
// (best effort), make the remote call under a deadline, apply local policy,
// and hand the outcome to telemetry without waiting. Any infrastructure
// failure along the way short-circuits to the check's fail-open default.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::api::{ImageReply, ModerationApi};
use crate::config::ClientConfig;
use crate::content::{ContentMeta, ImageData, ModerationResult};
use crate::error::ModerationError;
use crate::fail_open;
use crate::policy::{Policy, PolicySource, PolicyStore};
use crate::telemetry::{TelemetryEmitter, IMAGE_MODERATED, TEXT_MODERATED};
use crate::timeout::with_timeout;

/// Client-side moderation gateway.
pub struct ModerationClient {
    config: ClientConfig,
    api: Arc<ModerationApi>,
    policy: PolicyStore,
    telemetry: TelemetryEmitter,
}

impl ModerationClient {
    /// Build a client for the service described by `config`.
    ///
    /// Fails with [`ModerationError::NotInitialized`] when `api_key` is blank
    /// and [`ModerationError::Config`] when the configuration is unusable.
    /// These are programmer errors and are never masked by fail-open.
    pub fn init(api_key: &str, config: ClientConfig) -> Result<Self, ModerationError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ModerationError::NotInitialized(
                "an API key is required".to_string(),
            ));
        }
        config.validate()?;

        let api = ModerationApi::new(config.api_base_url.trim(), api_key)
            .map_err(|e| ModerationError::Config(format!("{e:#}")))?;
        let api = Arc::new(api);

        let source: Arc<dyn PolicySource> = api.clone();
        let policy = PolicyStore::new(
            source,
            config.policy_refresh_interval(),
            config.timeout(),
        );
        let telemetry = TelemetryEmitter::new(Arc::clone(&api), &config);

        debug!(
            base_url = api.base_url(),
            mode = %config.mode,
            send_events = config.send_events,
            "Moderation client initialized"
        );

        Ok(Self {
            config,
            api,
            policy,
            telemetry,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn policy_store(&self) -> &PolicyStore {
        &self.policy
    }

    /// The current policy, refreshing it first if stale. Never fails.
    pub async fn policy(&self) -> Arc<Policy> {
        self.policy.current_or_refresh().await
    }

    /// Wait for telemetry that is still being delivered, bounded by the
    /// telemetry deadline. Call before the runtime shuts down (e.g. at the
    /// end of `main`) so pending events are not cut off.
    pub async fn flush(&self) {
        self.telemetry.flush().await;
    }

    /// Decide whether `text` may pass. Returns `true` on any infrastructure
    /// failure.
    pub async fn check_text(&self, text: &str, meta: &ContentMeta) -> bool {
        fail_open::run("check_text", true, self.moderate_text(text, meta)).await
    }

    /// Decide whether a JPEG may pass.
    ///
    /// Infrastructure failures come back as `Ok` with decision ALLOW and a
    /// reason code: `sdk_network_error` when no response arrived,
    /// `cloud_unavailable` when the service answered non-2xx. `Err` is
    /// reserved for input the gateway refuses to send.
    pub async fn check_image_jpeg(
        &self,
        image: impl Into<ImageData>,
        meta: &ContentMeta,
    ) -> Result<ModerationResult, ModerationError> {
        let body = image.into().into_bytes().await?;

        Ok(fail_open::run(
            "check_image_jpeg",
            ModerationResult::network_error(),
            self.moderate_image(body, meta),
        )
        .await)
    }

    async fn moderate_text(&self, text: &str, meta: &ContentMeta) -> Result<bool> {
        // Refresh failures are absorbed by the store; the check goes ahead
        // with whatever policy it has.
        self.policy.current_or_refresh().await;

        let permitted = with_timeout(self.config.timeout(), None)
            .run(self.api.check_text(text, meta))
            .await?;

        let mut extra = Map::new();
        extra.insert("textLength".to_string(), Value::from(text.chars().count()));
        self.telemetry.emit(
            TEXT_MODERATED,
            if permitted { "ALLOW" } else { "BLOCK" },
            meta,
            extra,
        );

        Ok(permitted)
    }

    async fn moderate_image(&self, body: Bytes, meta: &ContentMeta) -> Result<ModerationResult> {
        let policy = self.policy.current_or_refresh().await;

        let reply = with_timeout(self.config.timeout(), None)
            .run(self.api.moderate_image(body))
            .await?;

        let remote = match reply {
            ImageReply::Classified(remote) => remote,
            ImageReply::Unavailable(status) => {
                warn!(
                    status = status.as_u16(),
                    "Image moderation unavailable, allowing"
                );
                return Ok(ModerationResult::cloud_unavailable());
            }
        };

        // Telemetry reports what the service said, before local policy.
        let mut extra = Map::new();
        if let Some(score) = remote.nsfw_score {
            extra.insert("nsfwScore".to_string(), Value::from(score));
        }
        extra.insert("reasons".to_string(), Value::from(remote.reasons.clone()));
        self.telemetry
            .emit(IMAGE_MODERATED, remote.decision.as_str(), meta, extra);

        let verdict = policy.enforce_image(remote);
        debug!(
            decision = %verdict.decision,
            reasons = ?verdict.reasons,
            "Image moderated"
        );
        Ok(verdict)
    }
}
