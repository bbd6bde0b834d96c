//! Alert bridge: turns Sentry and Datadog alerts into routed Asana tasks.
//!
//! This crate provides:
//! - Webhook producer with HMAC and shared-token verification
//! - Team directory loading and precedence-ranked tag matching
//! - Field extraction for both provider payload shapes
//! - Task note composition and target-project resolution
//! - Sentry, Datadog and Asana REST clients
//! - Batch consumer with per-message failure reporting
//! - In-process queue worker and HTTP server

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Most client and loader calls can fail

pub mod clients;
pub mod compose;
pub mod config;
pub mod consumer;
pub mod error;
pub mod events;
pub mod metrics;
pub mod producer;
pub mod queue;
pub mod secrets;
pub mod server;
pub mod teams;
pub mod wire;

pub use config::Config;
pub use consumer::Consumer;
pub use error::{ClientError, DirectoryError, ProcessError, ProducerError};
pub use events::{CanonicalEvent, Priority, Source};
pub use producer::Producer;
pub use teams::{EngTeam, TeamDirectory};
pub use wire::{wire, Wired};
