//! Durable snapshots: binary graph codec plus JSON metadata sidecar.
//!
//! Writes are atomic (temp file + rename) and integrity-checked with a
//! CRC32 footer, so a crash mid-save never corrupts the previous snapshot.

pub mod codec;

pub use codec::{read_index, read_sidecar, sidecar_path, write_index, write_sidecar, ManagerInfo};
