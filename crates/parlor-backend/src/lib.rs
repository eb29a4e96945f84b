//! # parlor-backend
//!
//! The response-generation backend as seen by the scheduler: a [`Backend`]
//! opens stateful [`BackendSession`]s, and each query on a session yields a
//! [`ResponseStream`] of incremental text and thinking that ends with a
//! [`ResponseOutcome`].
//!
//! The [`mock`] module provides a scripted backend for deterministic tests.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod mock;
pub mod session;

pub use errors::{BackendError, BackendResult};
pub use events::{ResponseEvent, ResponseOutcome, ResponseStream};
pub use session::{Backend, BackendSession, SessionConfig};
