// Policy source trait: where the store gets fresh policies from.
//
// The HTTP implementation lives on ModerationApi. Keeping the store behind a
// trait lets it be driven by anything that can produce a Policy.

use anyhow::Result;
use async_trait::async_trait;

use super::model::Policy;

/// Anything that can fetch the current moderation policy.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Fetch one policy snapshot. A single attempt; no retries.
    async fn fetch_policy(&self) -> Result<Policy>;
}
