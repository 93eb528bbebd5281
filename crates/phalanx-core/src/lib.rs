//! # Phalanx Core
//!
//! Core message and exchange contracts for the Phalanx interceptor
//! framework.
//!
//! This crate provides the boundary types the chain engine operates on:
//!
//! - [`Message`] - Opaque message context: property bag, typed content
//!   slots, fault slot
//! - [`MessageId`] - UUID v7 message identifier
//! - [`Exchange`] - Correlates the request/response/fault messages of one
//!   interaction
//! - [`ChainError`] - Standard error types
//! - [`MessageObserver`] / [`FaultListener`] - Pluggable fault hooks

#![doc(html_root_url = "https://docs.rs/phalanx-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod exchange;
mod message;
mod observer;

pub use error::{ChainError, ChainResult, FaultEnvelope};
pub use exchange::Exchange;
pub use message::{Message, MessageId, RESUME_FROM_NEXT};
pub use observer::{FaultListener, MessageObserver};
