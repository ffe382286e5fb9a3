//! File persistence outside the record store.
//!
//! - **File**: atomic temp-file-and-rename writes shared by the index pair
//!   and the delta log
//! - **Hashing**: SHA-256 digests tying the index blob to its id map
//! - **Import**: lenient parsing of record arrays from harvest files
//! - **Delta log**: records added since the last fold
//! - **Autosave**: the in-memory write-back queue over the delta log
//!
//! # File Format
//!
//! The delta log (`feynman_kb_user.json`) is a pretty-printed JSON array of
//! records; `source` and `embedding` are omitted when unset:
//! ```json
//! [
//!   {"topic": "QED", "reaction": "e+ e- -> mu+ mu-", "particles": [], ...}
//! ]
//! ```

mod autosave;
mod delta;
mod file;
mod hash;
mod import;

pub use autosave::AutosaveQueue;
pub use delta::{DeltaStatus, delta_status, read_delta, write_delta};
pub use file::{atomic_write, commit_temp, file_size, remove_if_exists, temp_path, write_temp};
pub use hash::{content_hash, digest_bytes};
pub use import::{NOT_AVAILABLE, ParsedBatch, RawRecord, parse_records, read_records};
