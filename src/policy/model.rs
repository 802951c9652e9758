// The moderation policy and the rules that apply it locally.
//
// Policies arrive as loosely-typed JSON and are coerced field by field, so a
// partially broken payload still yields a usable policy. Local enforcement is
// the last word on images: it can escalate the remote verdict to BLOCK, but
// never relax it.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::content::{Decision, ModerationResult, REASON_POLICY_NSFW};

/// Default toxicity threshold when the service omits or garbles it.
pub const DEFAULT_TOXICITY_THRESHOLD: f64 = 0.85;

/// Default sexual-content threshold. Some deployments use 0.9 here.
pub const DEFAULT_SEXUAL_THRESHOLD: f64 = 0.85;

/// Default NSFW image threshold.
pub const DEFAULT_NSFW_THRESHOLD: f64 = 0.85;

/// Thresholds and toggles governing local enforcement. Immutable once built;
/// the store swaps whole snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub block_toxicity: bool,
    pub block_sexual: bool,
    pub block_nsfw_images: bool,
    pub toxicity_threshold: f64,
    pub sexual_threshold: f64,
    pub nsfw_threshold: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            block_toxicity: true,
            block_sexual: true,
            block_nsfw_images: true,
            toxicity_threshold: DEFAULT_TOXICITY_THRESHOLD,
            sexual_threshold: DEFAULT_SEXUAL_THRESHOLD,
            nsfw_threshold: DEFAULT_NSFW_THRESHOLD,
        }
    }
}

impl Policy {
    /// Build a policy from a `/v1/policy` response body.
    ///
    /// The body must be a JSON object; individual fields are coerced and
    /// fall back to their defaults rather than failing the whole parse.
    pub fn from_json(value: &Value) -> Result<Self> {
        let fields = value
            .as_object()
            .context("Policy response is not a JSON object")?;

        Ok(Self {
            block_toxicity: coerce_flag(fields, "blockToxicity"),
            block_sexual: coerce_flag(fields, "blockSexual"),
            block_nsfw_images: coerce_flag(fields, "blockNsfwImages"),
            toxicity_threshold: coerce_threshold(
                fields,
                "toxicityThreshold",
                DEFAULT_TOXICITY_THRESHOLD,
            ),
            sexual_threshold: coerce_threshold(fields, "sexualThreshold", DEFAULT_SEXUAL_THRESHOLD),
            nsfw_threshold: coerce_threshold(fields, "nsfwThreshold", DEFAULT_NSFW_THRESHOLD),
        })
    }

    /// Apply local enforcement to a remote image verdict.
    ///
    /// When NSFW blocking is on and the remote score meets the threshold, the
    /// decision becomes BLOCK and `policy_nsfw` is appended. A remote BLOCK
    /// stays BLOCK whatever the score.
    pub fn enforce_image(&self, mut verdict: ModerationResult) -> ModerationResult {
        let over_threshold = verdict
            .nsfw_score
            .is_some_and(|score| score >= self.nsfw_threshold);

        if self.block_nsfw_images && over_threshold {
            verdict.decision = Decision::Block;
            verdict.reasons.push(REASON_POLICY_NSFW.to_string());
        }

        verdict
    }
}

/// Booleans default to `true`. Numbers count as set when non-zero; the
/// strings "true"/"false" are honoured.
fn coerce_flag(fields: &Map<String, Value>, key: &str) -> bool {
    match fields.get(key) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.trim().eq_ignore_ascii_case("false"),
        _ => true,
    }
}

/// Thresholds accept numbers or numeric strings, clamped to [0, 1].
fn coerce_threshold(fields: &Map<String, Value>, key: &str, default: f64) -> f64 {
    let parsed = match fields.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
        _ => default,
    }
}
