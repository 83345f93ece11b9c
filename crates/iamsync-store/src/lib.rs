//! Declared-object storage for iamsync.
//!
//! - `ObjectStore`: the contract the convergence engine consumes
//! - `MemoryStore`: deterministic in-process implementation
//! - JSONL manifests/snapshots and a state-directory lock for the CLI

pub mod lock;
pub mod memory;
pub mod snapshot;
pub mod store;

pub use lock::{LockError, StateLock, state_lock_path};
pub use memory::MemoryStore;
pub use snapshot::{
    SnapshotError, encode_resources, read_resources, read_resources_from_path, write_atomically,
    write_resources_to_path,
};
pub use store::{ObjectStore, StoreError, WatchAction, WatchEvent};
