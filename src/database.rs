//! The in-memory database: container settings, metadata and the group tree.

use std::fmt;
use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::container::{read_database, write_database};
use crate::crypto::kdf::DEFAULT_TRANSFORM_ROUNDS;
use crate::format::{CIPHER_AES256, CompressionAlgorithm, InnerStreamId};
use crate::keys::CompositeKey;
use crate::tree::{self, Entry, Group};
use crate::Result;

/// Generator string written into every saved document.
pub const GENERATOR: &str = "kdbx-codec";

/// Which standard entry fields are stored as protected values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryProtection {
    pub title: bool,
    pub user_name: bool,
    pub password: bool,
    pub url: bool,
    pub notes: bool,
}

impl Default for MemoryProtection {
    fn default() -> Self {
        Self {
            title: false,
            user_name: false,
            password: true,
            url: false,
            notes: false,
        }
    }
}

impl MemoryProtection {
    /// Whether `key` should be protected. Custom fields are never protected by default.
    pub fn protects(&self, key: &str) -> bool {
        match key {
            tree::TITLE => self.title,
            tree::USER_NAME => self.user_name,
            tree::PASSWORD => self.password,
            tree::URL => self.url,
            tree::NOTES => self.notes,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub generator: String,
    pub name: String,
    pub name_changed: DateTime<Utc>,
    pub description: String,
    pub description_changed: DateTime<Utc>,
    pub default_user: String,
    pub memory_protection: MemoryProtection,
}

impl Default for Meta {
    fn default() -> Self {
        let now = tree::now();
        Self {
            generator: GENERATOR.to_string(),
            name: String::new(),
            name_changed: now,
            description: String::new(),
            description_changed: now,
            default_user: String::new(),
            memory_protection: MemoryProtection::default(),
        }
    }
}

/// A password database.
///
/// The container settings decide how the next [`save`](Self::save) frames and encrypts the
/// document. The master key is held as component hashes only.
#[derive(Debug, Clone)]
pub struct Database {
    pub cipher_id: Uuid,
    pub compression: CompressionAlgorithm,
    pub transform_rounds: u64,
    pub inner_stream: InnerStreamId,
    pub meta: Meta,
    pub root: Group,
    master_key: CompositeKey,
}

impl Database {
    pub fn new(master_key: CompositeKey) -> Self {
        Self {
            cipher_id: CIPHER_AES256,
            compression: CompressionAlgorithm::Gzip,
            transform_rounds: DEFAULT_TRANSFORM_ROUNDS,
            inner_stream: InnerStreamId::Salsa20,
            meta: Meta::default(),
            root: Group::new("Root"),
            master_key,
        }
    }

    pub fn master_key(&self) -> &CompositeKey {
        &self.master_key
    }

    pub fn set_master_key(&mut self, key: CompositeKey) {
        self.master_key = key;
    }

    pub fn set_name(&mut self, name: &str) {
        self.meta.name = name.to_string();
        self.meta.name_changed = tree::now();
    }

    pub fn set_description(&mut self, description: &str) {
        self.meta.description = description.to_string();
        self.meta.description_changed = tree::now();
    }

    /// Builds an entry from `(key, value)` pairs, protecting fields per memory protection.
    pub fn new_entry(&self, fields: &[(&str, &str)]) -> Result<Entry> {
        let mut entry = Entry::new();
        for (key, value) in fields {
            entry.set(key, value, self.meta.memory_protection.protects(key))?;
        }
        Ok(entry)
    }

    /// Encrypts the database into `sink`, returning the number of bytes written.
    pub fn save<W: Write>(&self, sink: W) -> Result<u64> {
        write_database(self, sink)
    }

    /// Reads and decrypts a database with `key`.
    pub fn open<R: Read>(source: R, key: CompositeKey) -> Result<Self> {
        read_database(source, key)
    }

    pub fn info(&self) -> DatabaseInfo {
        let (groups, entries) = self.root.counts();
        DatabaseInfo {
            name: self.meta.name.clone(),
            generator: self.meta.generator.clone(),
            cipher: self.cipher_id.to_string(),
            compression: self.compression,
            transform_rounds: self.transform_rounds,
            inner_stream: self.inner_stream,
            // the root group itself is counted
            groups: groups + 1,
            entries,
        }
    }
}

/// Summary printed by `kdbx-codec info`.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub generator: String,
    pub cipher: String,
    pub compression: CompressionAlgorithm,
    pub transform_rounds: u64,
    pub inner_stream: InnerStreamId,
    pub groups: usize,
    pub entries: usize,
}

impl fmt::Display for DatabaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.name.is_empty() { "(unnamed)" } else { &self.name };
        writeln!(f, "Name:         {name}")?;
        writeln!(f, "Generator:    {}", self.generator)?;
        writeln!(f, "Cipher:       {}", self.cipher)?;
        writeln!(f, "Compression:  {:?}", self.compression)?;
        writeln!(f, "KDF rounds:   {}", self.transform_rounds)?;
        writeln!(f, "Inner stream: {:?}", self.inner_stream)?;
        writeln!(f, "Groups:       {}", self.groups)?;
        write!(f, "Entries:      {}", self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_database_has_defaults() {
        let db = Database::new(CompositeKey::from_password("pw"));
        assert_eq!(db.cipher_id, CIPHER_AES256);
        assert_eq!(db.compression, CompressionAlgorithm::Gzip);
        assert_eq!(db.transform_rounds, 60_000);
        assert_eq!(db.inner_stream, InnerStreamId::Salsa20);
        assert_eq!(db.meta.generator, GENERATOR);
        assert_eq!(db.root.counts(), (0, 0));
    }

    #[test]
    fn new_entry_follows_memory_protection() {
        let mut db = Database::new(CompositeKey::from_password("pw"));
        db.meta.memory_protection.user_name = true;

        let entry = db
            .new_entry(&[
                (tree::TITLE, "mail"),
                (tree::USER_NAME, "me"),
                (tree::PASSWORD, "pw"),
                ("Custom", "x"),
            ])
            .unwrap();

        assert!(!entry.field(tree::TITLE).unwrap().is_protected());
        assert!(entry.field(tree::USER_NAME).unwrap().is_protected());
        assert!(entry.field(tree::PASSWORD).unwrap().is_protected());
        assert!(!entry.field("Custom").unwrap().is_protected());
    }

    #[test]
    fn info_counts_root_group() {
        let mut db = Database::new(CompositeKey::from_password("pw"));
        db.set_name("Personal");
        let entry = db.new_entry(&[(tree::TITLE, "a")]).unwrap();
        db.root.add_group(Group::new("Work")).add_entry(entry);

        let info = db.info();
        assert_eq!(info.groups, 2);
        assert_eq!(info.entries, 1);
        assert_eq!(info.name, "Personal");
        assert!(info.to_string().contains("Entries:      1"));
    }

    #[test]
    fn info_serializes_to_json() {
        let db = Database::new(CompositeKey::from_password("pw"));
        let json = serde_json::to_value(db.info()).unwrap();
        assert_eq!(json["compression"], "Gzip");
        assert_eq!(json["inner_stream"], "Salsa20");
        assert_eq!(json["cipher"], "31c1f2e6-bf71-4350-be58-05216afc5aff");
    }
}
