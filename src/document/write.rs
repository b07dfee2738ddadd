use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use zeroize::Zeroizing;

use super::*;
use crate::crypto::DIGEST_LEN;
use crate::database::{Database, Meta};
use crate::protected::ProtectedStream;
use crate::tree::{Entry, FieldValue, Group, Times};
use crate::{Error, Result};

struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    fn new() -> Self {
        Self {
            inner: Writer::new_with_indent(Vec::with_capacity(4096), b'\t', 1),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.inner.write_event(event).map_err(Error::document)
    }

    fn start(&mut self, name: &str) -> Result<()> {
        self.event(Event::Start(BytesStart::new(name)))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    /// `<name>text</name>`, or `<name/>` for empty text.
    fn text(&mut self, name: &str, text: &str) -> Result<()> {
        self.text_with(BytesStart::new(name), text)
    }

    fn text_with(&mut self, start: BytesStart<'_>, text: &str) -> Result<()> {
        if text.is_empty() {
            return self.event(Event::Empty(start));
        }
        let end = start.to_end().into_owned();
        self.event(Event::Start(start))?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.event(Event::End(end))
    }

    fn into_inner(self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.inner.into_inner())
    }
}

/// Serialises `db` into XML.
///
/// Protected values are sealed through `stream` in document order, which is the order
/// [`read_document`](super::read_document) opens them in.
pub fn write_document(
    db: &Database,
    header_hash: &[u8; DIGEST_LEN],
    stream: &mut ProtectedStream,
) -> Result<Zeroizing<Vec<u8>>> {
    let mut w = XmlWriter::new();
    w.event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))?;
    w.start(KEEPASS_FILE)?;

    write_meta(&mut w, &db.meta, header_hash)?;

    w.start(ROOT)?;
    write_group(&mut w, &db.root, stream)?;
    w.end(ROOT)?;

    w.end(KEEPASS_FILE)?;
    Ok(w.into_inner())
}

fn write_meta(w: &mut XmlWriter, meta: &Meta, header_hash: &[u8; DIGEST_LEN]) -> Result<()> {
    w.start(META)?;
    w.text(GENERATOR, &meta.generator)?;
    w.text(HEADER_HASH, &STANDARD.encode(header_hash))?;
    w.text(DATABASE_NAME, &meta.name)?;
    w.text(DATABASE_NAME_CHANGED, &format_time(&meta.name_changed))?;
    w.text(DATABASE_DESCRIPTION, &meta.description)?;
    w.text(DATABASE_DESCRIPTION_CHANGED, &format_time(&meta.description_changed))?;
    w.text(DEFAULT_USER_NAME, &meta.default_user)?;

    let mp = &meta.memory_protection;
    w.start(MEMORY_PROTECTION)?;
    w.text(PROTECT_TITLE, format_bool(mp.title))?;
    w.text(PROTECT_USER_NAME, format_bool(mp.user_name))?;
    w.text(PROTECT_PASSWORD, format_bool(mp.password))?;
    w.text(PROTECT_URL, format_bool(mp.url))?;
    w.text(PROTECT_NOTES, format_bool(mp.notes))?;
    w.end(MEMORY_PROTECTION)?;

    w.end(META)
}

fn write_times(w: &mut XmlWriter, times: &Times) -> Result<()> {
    w.start(TIMES)?;
    w.text(CREATION_TIME, &format_time(&times.creation))?;
    w.text(LAST_MODIFICATION_TIME, &format_time(&times.last_modification))?;
    w.text(LAST_ACCESS_TIME, &format_time(&times.last_access))?;
    w.text(EXPIRY_TIME, &format_time(&times.expiry))?;
    w.text(EXPIRES, format_bool(times.expires))?;
    w.text(USAGE_COUNT, &times.usage_count.to_string())?;
    w.end(TIMES)
}

fn write_group(w: &mut XmlWriter, group: &Group, stream: &mut ProtectedStream) -> Result<()> {
    w.start(GROUP)?;
    w.text(UUID, &format_uuid(&group.uuid))?;
    w.text(NAME, &group.name)?;
    w.text(NOTES, &group.notes)?;
    w.text(ICON_ID, &group.icon_id.to_string())?;
    write_times(w, &group.times)?;

    for entry in &group.entries {
        write_entry(w, entry, stream)?;
    }
    for child in &group.groups {
        write_group(w, child, stream)?;
    }

    w.end(GROUP)
}

fn write_entry(w: &mut XmlWriter, entry: &Entry, stream: &mut ProtectedStream) -> Result<()> {
    w.start(ENTRY)?;
    w.text(UUID, &format_uuid(&entry.uuid))?;
    w.text(ICON_ID, &entry.icon_id.to_string())?;
    w.text(TAGS, &entry.tags)?;
    write_times(w, &entry.times)?;

    for (key, value) in entry.fields() {
        w.start(STRING)?;
        w.text(KEY, key)?;
        match value {
            FieldValue::Plain(text) => w.text(VALUE, text)?,
            FieldValue::Protected(secret) => {
                let mut start = BytesStart::new(VALUE);
                start.push_attribute((PROTECTED_ATTR, "True"));
                let sealed = stream.seal(secret);
                w.text_with(start, &sealed)?;
            }
        }
        w.end(STRING)?;
    }

    w.end(ENTRY)
}
