//! # parlor-store
//!
//! The persistence seam of the scheduler.
//!
//! - [`RoomStore`]: the read/write/query operations the engine needs
//! - [`MemoryStore`]: a complete in-process implementation
//! - [`CachedStore`]: wraps any store with a short TTL cache on room and agent reads

#![deny(unsafe_code)]

pub mod cache;
pub mod errors;
pub mod memory;
pub mod store;

pub use cache::{CacheMaintenance, CacheStats, CachedStore};
pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use store::RoomStore;
