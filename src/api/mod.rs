// Remote moderation service: wire-level client.
//
// Everything that crosses the network goes through ModerationApi. It is also
// the HTTP implementation of PolicySource.

pub mod client;

pub use client::{ImageReply, ModerationApi};
