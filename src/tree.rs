use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::protected::ProtectedValue;
use crate::Result;

pub const TITLE: &str = "Title";
pub const USER_NAME: &str = "UserName";
pub const PASSWORD: &str = "Password";
pub const URL: &str = "URL";
pub const NOTES: &str = "Notes";

/// Timestamps stored with second precision, as the document does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Times {
    pub creation: DateTime<Utc>,
    pub last_modification: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub expires: bool,
    pub usage_count: u64,
}

impl Default for Times {
    fn default() -> Self {
        let now = now();
        Self {
            creation: now,
            last_modification: now,
            last_access: now,
            expiry: now,
            expires: false,
            usage_count: 0,
        }
    }
}

impl Times {
    pub(crate) fn touch(&mut self) {
        let now = now();
        self.last_modification = now;
        self.last_access = now;
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Value of an entry string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Plain(String),
    Protected(ProtectedValue),
}

impl FieldValue {
    pub fn is_protected(&self) -> bool {
        matches!(self, FieldValue::Protected(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub uuid: Uuid,
    pub icon_id: u32,
    pub tags: String,
    pub times: Times,
    fields: BTreeMap<String, FieldValue>,
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

impl Entry {
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            icon_id: 0,
            tags: String::new(),
            times: Times::default(),
            fields: BTreeMap::new(),
        }
    }

    pub fn set_plain(&mut self, key: &str, value: &str) {
        self.fields
            .insert(key.to_string(), FieldValue::Plain(value.to_string()));
        self.times.touch();
    }

    pub fn set_protected(&mut self, key: &str, value: &str) -> Result<()> {
        let value = ProtectedValue::from_text(value)?;
        self.fields
            .insert(key.to_string(), FieldValue::Protected(value));
        self.times.touch();
        Ok(())
    }

    /// Stores `value` protected or plain depending on `protect`.
    pub fn set(&mut self, key: &str, value: &str, protect: bool) -> Result<()> {
        if protect {
            self.set_protected(key, value)
        } else {
            self.set_plain(key, value);
            Ok(())
        }
    }

    pub(crate) fn insert_field(&mut self, key: String, value: FieldValue) {
        self.fields.insert(key, value);
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Field value as text; protected values are revealed.
    ///
    /// A protected value that does not reveal as UTF-8 is an error, not a missing field.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(FieldValue::Plain(s)) => Ok(Some(s.clone())),
            Some(FieldValue::Protected(p)) => Ok(Some(p.reveal_str()?.to_string())),
        }
    }

    pub fn remove_field(&mut self, key: &str) -> Option<FieldValue> {
        let removed = self.fields.remove(key);
        if removed.is_some() {
            self.times.touch();
        }
        removed
    }

    /// Fields in the order they are serialised.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn title(&self) -> Result<Option<String>> {
        self.get(TITLE)
    }

    pub fn username(&self) -> Result<Option<String>> {
        self.get(USER_NAME)
    }

    pub fn password(&self) -> Result<Option<String>> {
        self.get(PASSWORD)
    }

    pub fn url(&self) -> Result<Option<String>> {
        self.get(URL)
    }

    fn is_titled(&self, title: &str) -> bool {
        matches!(self.title(), Ok(Some(t)) if t == title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub uuid: Uuid,
    pub name: String,
    pub notes: String,
    pub icon_id: u32,
    pub times: Times,
    pub groups: Vec<Group>,
    pub entries: Vec<Entry>,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            notes: String::new(),
            icon_id: 48,
            times: Times::default(),
            groups: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Recursive `(groups, entries)` below this group, not counting itself.
    pub fn counts(&self) -> (usize, usize) {
        self.groups.iter().fold((self.groups.len(), self.entries.len()), |(g, e), child| {
            let (cg, ce) = child.counts();
            (g + cg, e + ce)
        })
    }

    pub fn add_group(&mut self, group: Group) -> &mut Group {
        self.groups.push(group);
        self.times.touch();
        let last = self.groups.len() - 1;
        &mut self.groups[last]
    }

    pub fn add_entry(&mut self, entry: Entry) -> &mut Entry {
        self.entries.push(entry);
        self.times.touch();
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    /// First group named `name`, searching depth first and including `self`.
    pub fn find_group_mut(&mut self, name: &str) -> Option<&mut Group> {
        if self.name == name {
            return Some(self);
        }
        self.groups.iter_mut().find_map(|g| g.find_group_mut(name))
    }

    /// Depth-first walk over every entry in this subtree.
    pub fn entries_recursive(&self) -> Vec<&Entry> {
        let mut out: Vec<&Entry> = self.entries.iter().collect();
        for child in &self.groups {
            out.extend(child.entries_recursive());
        }
        out
    }

    pub fn find_entry(&self, title: &str) -> Option<&Entry> {
        self.entries_recursive()
            .into_iter()
            .find(|e| e.is_titled(title))
    }

    /// Removes the first entry titled `title` anywhere below this group.
    pub fn remove_entry(&mut self, title: &str) -> Option<Entry> {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.is_titled(title))
        {
            self.times.touch();
            return Some(self.entries.remove(pos));
        }
        self.groups.iter_mut().find_map(|g| g.remove_entry(title))
    }
}
