// Hard failures: caller misuse, never infrastructure flakiness.
//
// Everything that can go wrong on the network is absorbed by the fail-open
// wrappers. The errors here are the ones that must reach the caller: a client
// built without credentials, a configuration that can't work, or image input
// the gateway refuses to send.

use thiserror::Error;

/// Errors surfaced directly to the caller instead of failing open.
#[derive(Debug, Error)]
pub enum ModerationError {
    /// The client was constructed without what it needs to talk to the service.
    #[error("moderation client is not initialized: {0}")]
    NotInitialized(String),

    /// The configuration is present but unusable.
    #[error("invalid moderation client configuration: {0}")]
    Config(String),

    /// Image input in a representation the gateway does not send.
    #[error("unsupported image input: {0}")]
    UnsupportedInput(String),

    /// The caller-supplied image source failed while being read.
    #[error("failed to read image data")]
    ImageRead(#[source] std::io::Error),
}
