//! Reader and writer for encrypted password-database containers (KDBX 3.1 layout).
//!
//! A container is a clear binary header followed by an AES-256-CBC envelope holding
//! verification bytes and the (optionally gzipped) XML document. Secret fields inside the
//! document are additionally masked with a Salsa20 keystream.
//!
//! ```no_run
//! use kdbx_codec::{CompositeKey, Database, Storage, tree};
//!
//! # fn main() -> kdbx_codec::Result<()> {
//! let mut db = Database::new(CompositeKey::from_password("correct-horse"));
//! let entry = db.new_entry(&[(tree::TITLE, "mail"), (tree::PASSWORD, "hunter2")])?;
//! db.root.add_entry(entry);
//!
//! let storage = Storage::new("vault.kdbx");
//! storage.save_database(&db)?;
//! let db = storage.load_database(CompositeKey::from_password("correct-horse"))?;
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod crypto;
pub mod database;
pub mod document;
mod error;
pub mod format;
pub mod keys;
pub mod protected;
pub mod storage;
pub mod tree;

pub use crate::container::{LoadStage, SaveStage, read_database, write_database};
pub use crate::database::{Database, DatabaseInfo, MemoryProtection, Meta};
pub use crate::error::{Error, Result};
pub use crate::format::{CompressionAlgorithm, InnerStreamId};
pub use crate::keys::{CompositeKey, KeyTransform};
pub use crate::protected::ProtectedValue;
pub use crate::storage::{Storage, default_storage};
pub use crate::tree::{Entry, FieldValue, Group, Times};
