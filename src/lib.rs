//! mailcast — publishes inbound email to Bluesky as alias-routed threads.

pub mod config;
pub mod error;
pub mod formatter;
pub mod ledger;
pub mod mailbox;
pub mod pipeline;
pub mod publisher;
pub mod router;
