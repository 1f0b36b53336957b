//! Cache storage module
//!
//! This module pairs validated identifiers with a disk store of binary record
//! files. Identifier validation happens before any filesystem access, and the
//! store replaces record files atomically, which together keep the on-disk
//! cache safe against hostile names and interrupted writes.

mod disk;
mod key;

pub use disk::{CacheStore, StoreError};
pub use key::{InvalidIdentifier, ScriptId, MAX_LEN};
