//! Repository layer
//!
//! Durable per-output state produced by the supervisor. Keyed by output id
//! so that a request unrelated to the one that launched an output can still
//! read its outcome.

mod records;

pub use records::{FsRecordStore, LogWriter, RecordStore};
