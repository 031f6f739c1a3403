//! Local deployment journal.
//!
//! Keeps a bounded history of runs and the per-target locks that keep a
//! single execute in flight per (device, certificate) on this machine.

mod local;
mod lock;
mod store;
mod types;

pub use local::LocalJournal;
pub use lock::{DEFAULT_LOCK_TTL_SECS, LockInfo, generate_holder_id, lock_target};
pub use store::JournalStore;
pub use types::{JOURNAL_VERSION, Journal, JournalEntry, MAX_ENTRIES, RunOutcome};
