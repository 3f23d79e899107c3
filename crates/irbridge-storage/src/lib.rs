//! IrBridge Storage Crate
//!
//! Durable and in-memory implementations of the collaborator traits defined
//! in `irbridge-core`.
//!
//! ## Backends
//!
//! - **RedbStore**: persistent embedded database
//! - **MemoryStore**: non-persistent storage for tests and dry runs
//!
//! Both backends implement every directory and store trait, plus
//! [`DirectoryAdmin`] so a JSON seed file can populate the directories.

pub mod backends;
pub mod error;
pub mod seed;

pub use backends::memory::MemoryStore;
pub use backends::redb::RedbStore;
pub use error::{Error, Result};
pub use seed::{DirectoryAdmin, SeedFile, SeedReport};
