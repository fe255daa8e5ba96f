//! `nexus-console`
//!
//! **Responsibility:** the client shell around the Nexus API.
//!
//! This crate provides:
//! - Configuration from the environment
//! - The HTTP account client and remote capability resolver
//! - The error handling facade and transient notifications
//! - [`Console`], which wires the session, guard and facade together

pub mod api;
pub mod app;
pub mod config;
pub mod facade;
pub mod notify;

pub use api::{AccountApi, ApiClient, HttpCapabilityResolver, failure_from_response};
pub use app::{Console, ConsoleError};
pub use config::{ConfigError, ConsoleConfig};
pub use facade::{ErrorFacade, HandleOptions, HandledError, Notify};
pub use notify::{Notification, Notifier, RecordingNotifier, Severity, TracingNotifier};
