// Fire-and-forget moderation telemetry.
//
// emit() builds the event and spawns a task to deliver it; the caller never
// waits. Delivery runs under its own short deadline and its own fail-open
// wrapper, so a slow or broken events endpoint can't reach the decision path.
//
// Delivery tasks are tracked in a JoinSet. flush() waits for the pending ones
// (bounded by the delivery deadline) so a short-lived process can let them
// finish before its runtime shuts down. Dropping the emitter detaches
// whatever is still pending.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::api::ModerationApi;
use crate::config::{ClientConfig, Mode};
use crate::content::ContentMeta;
use crate::fail_open;
use crate::timeout::with_timeout;

/// Upper bound on how long a single telemetry delivery may take.
pub const TELEMETRY_TIMEOUT_CEILING: Duration = Duration::from_millis(5000);

pub const TEXT_MODERATED: &str = "text_moderated";
pub const IMAGE_MODERATED: &str = "image_moderated";

/// One moderation outcome as sent to `/v1/events`.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub decision: String,
    pub meta: ContentMeta,
    pub extra: Map<String, Value>,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "ts")]
    pub timestamp_ms: i64,
}

/// Reports moderation outcomes without ever being awaited.
pub struct TelemetryEmitter {
    api: Arc<ModerationApi>,
    enabled: bool,
    mode: Mode,
    timeout: Duration,
    pending: Mutex<JoinSet<()>>,
}

impl TelemetryEmitter {
    pub fn new(api: Arc<ModerationApi>, config: &ClientConfig) -> Self {
        Self {
            api,
            enabled: config.send_events,
            mode: config.mode,
            timeout: config.timeout().min(TELEMETRY_TIMEOUT_CEILING),
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The deadline applied to each delivery.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queue an event for delivery and return immediately. A no-op when
    /// events are disabled. `extra` always gains the client's `mode`.
    pub fn emit(
        &self,
        kind: &str,
        decision: &str,
        meta: &ContentMeta,
        mut extra: Map<String, Value>,
    ) {
        if !self.enabled {
            return;
        }

        extra.insert("mode".to_string(), Value::from(self.mode.as_str()));
        let event = TelemetryEvent {
            kind: kind.to_string(),
            decision: decision.to_string(),
            meta: meta.clone(),
            extra,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };

        let api = Arc::clone(&self.api);
        let timeout = self.timeout;
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap deliveries that already finished so the set stays small.
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            fail_open::run("telemetry", (), async {
                with_timeout(timeout, None).run(api.send_event(&event)).await
            })
            .await;
            debug!(kind = %event.kind, "Telemetry delivery finished");
        });
    }

    /// Number of deliveries not yet reaped.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait for pending deliveries to finish, giving up after the delivery
    /// deadline. Deliveries still running at that point are aborted.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if pending.is_empty() {
            return;
        }

        let count = pending.len();
        let drained = tokio::time::timeout(self.timeout, async {
            while pending.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => debug!(count, "Telemetry flushed"),
            Err(_) => {
                warn!(
                    remaining = pending.len(),
                    "Telemetry flush timed out, dropping pending events"
                );
                pending.shutdown().await;
            }
        }
    }
}

impl Drop for TelemetryEmitter {
    fn drop(&mut self) {
        self.pending
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .detach_all();
    }
}
