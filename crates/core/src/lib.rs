//! `nexus-core` — value types and the pure error classifier.
//!
//! This crate has no I/O and no global state.

pub mod classify;
pub mod error;
pub mod id;

pub use classify::{
    ApiErrorDescriptor, Classification, FailureKind, MessageOverrides, classify, describe,
};
pub use error::{ApiErrorBody, Detail, Failure, InvalidId};
pub use id::UserId;
