//! The in-memory file storage engine: locking, capacity accounting, and
//! eviction. Protocol-agnostic — nothing here knows about the wire format a
//! server built on top of it might speak.

mod client_entry;
mod error;
mod eviction;
mod file_entry;
mod ids;
mod policy;
mod shard;
mod storage;
mod validation;

pub use client_entry::ClientEntry;
pub use error::{StorageError, StorageResult};
pub use eviction::{UsageEvent, apply_usage_event, halve_if_near_overflow, select_victim};
pub use file_entry::FileEntry;
pub use ids::ConnectionId;
pub use policy::EvictionPolicy;
pub use shard::ShardedMap;
pub use storage::{EvictedFile, Limits, Notification, OpOutcome, OpResult, OpenMode, Stats, Storage, Success};
pub use validation::{PATH_MAX, validate_path};
