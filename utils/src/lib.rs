//! Shared infrastructure utilities for Tricode.
//!
//! Cross-cutting helpers that several crates need but that don't belong in
//! the domain-pure `tricode-types` crate:
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename)
//! - **`diff`**: Unified diff formatting and stats
//! - **`hash`**: SHA-256 content fingerprints

pub mod atomic_write;
pub mod diff;
pub mod hash;

pub use atomic_write::{
    AtomicWriteOptions, FileSyncPolicy, PersistMode, StagedWrite, atomic_write,
    atomic_write_with_options,
};
pub use diff::{DiffStats, compute_diff_stats, unified_diff};
pub use hash::{sha256_hex, sha256_matches};
