//! Durable cache store: provider entities, episodes, tracks, decisions,
//! opaque response blobs, and advisory lock rows. SQLite-backed; the only
//! shared mutable store in the pipeline.

mod store;

pub use store::{CacheStore, Cached, LockRow};
