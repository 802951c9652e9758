// modgate: fail-open client-side content moderation gateway
//
// This is the library root. ModerationClient (client) is the entry point;
// the other modules are the pieces it is built from.

pub mod api;
pub mod client;
pub mod config;
pub mod content;
pub mod error;
pub mod fail_open;
pub mod output;
pub mod policy;
pub mod telemetry;
pub mod timeout;

pub use client::ModerationClient;
pub use config::{ClientConfig, Mode};
pub use content::{Blob, ContentMeta, Decision, ImageData, ModerationResult};
pub use error::ModerationError;
pub use policy::Policy;
