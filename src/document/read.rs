use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::trace;

use super::*;
use crate::database::{MemoryProtection, Meta};
use crate::protected::ProtectedStream;
use crate::tree::{Entry, FieldValue, Group, Times};
use crate::{Error, Result};

/// Everything recovered from a decrypted document.
#[derive(Debug)]
pub struct ParsedDocument {
    pub meta: Meta,
    pub root: Group,
    /// Digest of the clear header as recorded by the writer, if present.
    pub header_hash: Option<Vec<u8>>,
}

/// Parses a document, opening protected values through `stream` in document order.
pub fn read_document(xml: &[u8], stream: &mut ProtectedStream) -> Result<ParsedDocument> {
    let text = std::str::from_utf8(xml).map_err(Error::document)?;
    let mut parser = Parser::new(text, stream);
    parser.document()
}

/// A start tag together with whether it was self-closing.
struct Element<'a> {
    start: BytesStart<'a>,
    empty: bool,
}

impl Element<'_> {
    fn name(&self) -> &[u8] {
        self.start.name().into_inner()
    }

    fn is_protected(&self) -> bool {
        self.start.attributes().flatten().any(|attr| {
            attr.key.as_ref() == PROTECTED_ATTR.as_bytes()
                && attr.value.eq_ignore_ascii_case(b"true")
        })
    }
}

struct Parser<'a, 's> {
    reader: Reader<&'a [u8]>,
    stream: &'s mut ProtectedStream,
}

impl<'a, 's> Parser<'a, 's> {
    fn new(text: &'a str, stream: &'s mut ProtectedStream) -> Self {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);
        Self { reader, stream }
    }

    fn next(&mut self) -> Result<Event<'a>> {
        self.reader.read_event().map_err(|e| {
            Error::document(format!("at byte {}: {e}", self.reader.error_position()))
        })
    }

    /// Next child element of the current element, or `None` at its end tag.
    fn child(&mut self) -> Result<Option<Element<'a>>> {
        loop {
            match self.next()? {
                Event::Start(start) => return Ok(Some(Element { start, empty: false })),
                Event::Empty(start) => return Ok(Some(Element { start, empty: true })),
                Event::End(_) => return Ok(None),
                Event::Eof => return Err(Error::document("unexpected end of document")),
                _ => continue,
            }
        }
    }

    fn skip(&mut self, element: Element<'a>) -> Result<()> {
        trace!(element = %String::from_utf8_lossy(element.name()), "skipping unknown element");
        self.discard(element)
    }

    /// Walks a subtree without keeping it. Protected values inside it (history entries,
    /// for one) are still opened so the keystream stays in document order.
    fn discard(&mut self, element: Element<'a>) -> Result<()> {
        if element.is_protected() {
            let text = self.text(&element)?;
            self.stream.open(&text)?;
            return Ok(());
        }
        if !element.empty {
            while let Some(child) = self.child()? {
                self.discard(child)?;
            }
        }
        Ok(())
    }

    /// Text content of a leaf element. Nested elements are skipped.
    fn text(&mut self, element: &Element<'a>) -> Result<String> {
        let mut out = String::new();
        if element.empty {
            return Ok(out);
        }
        loop {
            match self.next()? {
                Event::Text(t) => out.push_str(&t.unescape().map_err(Error::document)?),
                Event::CData(c) => out.push_str(std::str::from_utf8(&c).map_err(Error::document)?),
                Event::Start(start) => self.skip(Element { start, empty: false })?,
                Event::Empty(start) => self.skip(Element { start, empty: true })?,
                Event::End(_) => return Ok(out),
                Event::Eof => return Err(Error::document("unexpected end of document")),
                _ => {}
            }
        }
    }

    fn document(&mut self) -> Result<ParsedDocument> {
        let top = loop {
            match self.next()? {
                Event::Start(start) => break Element { start, empty: false },
                Event::Empty(start) => break Element { start, empty: true },
                Event::Eof => return Err(Error::document("empty document")),
                _ => continue,
            }
        };
        if top.name() != KEEPASS_FILE.as_bytes() || top.empty {
            return Err(Error::document("root element is not KeePassFile"));
        }

        let mut meta = Meta::default();
        let mut header_hash = None;
        let mut root = None;

        while let Some(el) = self.child()? {
            match el.name() {
                n if n == META.as_bytes() => header_hash = self.meta(&el, &mut meta)?,
                n if n == ROOT.as_bytes() => root = self.root(&el)?,
                _ => self.skip(el)?,
            }
        }

        let root = root.ok_or_else(|| Error::document("document has no root group"))?;
        Ok(ParsedDocument {
            meta,
            root,
            header_hash,
        })
    }

    fn meta(&mut self, el: &Element<'a>, meta: &mut Meta) -> Result<Option<Vec<u8>>> {
        let mut header_hash = None;
        if el.empty {
            return Ok(header_hash);
        }

        while let Some(child) = self.child()? {
            let name = std::str::from_utf8(child.name()).map_err(Error::document)?;
            match name {
                GENERATOR => meta.generator = self.text(&child)?,
                HEADER_HASH => {
                    let text = self.text(&child)?;
                    let bytes = STANDARD
                        .decode(text.trim())
                        .map_err(|e| Error::document(format!("header hash: {e}")))?;
                    header_hash = Some(bytes);
                }
                DATABASE_NAME => meta.name = self.text(&child)?,
                DATABASE_NAME_CHANGED => meta.name_changed = parse_time(&self.text(&child)?)?,
                DATABASE_DESCRIPTION => meta.description = self.text(&child)?,
                DATABASE_DESCRIPTION_CHANGED => {
                    meta.description_changed = parse_time(&self.text(&child)?)?
                }
                DEFAULT_USER_NAME => meta.default_user = self.text(&child)?,
                MEMORY_PROTECTION => meta.memory_protection = self.memory_protection(&child)?,
                _ => self.skip(child)?,
            }
        }
        Ok(header_hash)
    }

    fn memory_protection(&mut self, el: &Element<'a>) -> Result<MemoryProtection> {
        let mut mp = MemoryProtection::default();
        if el.empty {
            return Ok(mp);
        }
        while let Some(child) = self.child()? {
            let name = std::str::from_utf8(child.name()).map_err(Error::document)?;
            let slot = match name {
                PROTECT_TITLE => &mut mp.title,
                PROTECT_USER_NAME => &mut mp.user_name,
                PROTECT_PASSWORD => &mut mp.password,
                PROTECT_URL => &mut mp.url,
                PROTECT_NOTES => &mut mp.notes,
                _ => {
                    self.skip(child)?;
                    continue;
                }
            };
            *slot = parse_bool(&self.text(&child)?);
        }
        Ok(mp)
    }

    fn root(&mut self, el: &Element<'a>) -> Result<Option<Group>> {
        let mut root = None;
        if el.empty {
            return Ok(root);
        }
        while let Some(child) = self.child()? {
            if child.name() == GROUP.as_bytes() && root.is_none() {
                root = Some(self.group(&child)?);
            } else {
                self.skip(child)?;
            }
        }
        Ok(root)
    }

    fn group(&mut self, el: &Element<'a>) -> Result<Group> {
        let mut group = Group::new("");
        if el.empty {
            return Ok(group);
        }
        while let Some(child) = self.child()? {
            let name = std::str::from_utf8(child.name()).map_err(Error::document)?;
            match name {
                UUID => group.uuid = parse_uuid(&self.text(&child)?)?,
                NAME => group.name = self.text(&child)?,
                NOTES => group.notes = self.text(&child)?,
                ICON_ID => group.icon_id = parse_number(ICON_ID, &self.text(&child)?)?,
                TIMES => group.times = self.times(&child)?,
                GROUP => {
                    let sub = self.group(&child)?;
                    group.groups.push(sub);
                }
                ENTRY => {
                    let entry = self.entry(&child)?;
                    group.entries.push(entry);
                }
                _ => self.skip(child)?,
            }
        }
        Ok(group)
    }

    fn entry(&mut self, el: &Element<'a>) -> Result<Entry> {
        let mut entry = Entry::new();
        if el.empty {
            return Ok(entry);
        }
        while let Some(child) = self.child()? {
            let name = std::str::from_utf8(child.name()).map_err(Error::document)?;
            match name {
                UUID => entry.uuid = parse_uuid(&self.text(&child)?)?,
                ICON_ID => entry.icon_id = parse_number(ICON_ID, &self.text(&child)?)?,
                TAGS => entry.tags = self.text(&child)?,
                TIMES => entry.times = self.times(&child)?,
                STRING => {
                    if let Some((key, value)) = self.string_field(&child)? {
                        entry.insert_field(key, value);
                    }
                }
                _ => self.skip(child)?,
            }
        }
        Ok(entry)
    }

    /// One `<String>` pair. A value without a key is dropped, but a protected one still
    /// consumes its share of the keystream.
    fn string_field(&mut self, el: &Element<'a>) -> Result<Option<(String, FieldValue)>> {
        let mut key = None;
        let mut value = None;
        if el.empty {
            return Ok(None);
        }
        while let Some(child) = self.child()? {
            let name = std::str::from_utf8(child.name()).map_err(Error::document)?;
            match name {
                KEY => key = Some(self.text(&child)?),
                VALUE => {
                    let protected = child.is_protected();
                    let text = self.text(&child)?;
                    value = Some(if protected {
                        FieldValue::Protected(self.stream.open(&text)?)
                    } else {
                        FieldValue::Plain(text)
                    });
                }
                _ => self.skip(child)?,
            }
        }
        Ok(key.map(|k| (k, value.unwrap_or(FieldValue::Plain(String::new())))))
    }

    fn times(&mut self, el: &Element<'a>) -> Result<Times> {
        let mut times = Times::default();
        if el.empty {
            return Ok(times);
        }
        while let Some(child) = self.child()? {
            let name = std::str::from_utf8(child.name()).map_err(Error::document)?;
            match name {
                CREATION_TIME => times.creation = parse_time(&self.text(&child)?)?,
                LAST_MODIFICATION_TIME => {
                    times.last_modification = parse_time(&self.text(&child)?)?
                }
                LAST_ACCESS_TIME => times.last_access = parse_time(&self.text(&child)?)?,
                EXPIRY_TIME => times.expiry = parse_time(&self.text(&child)?)?,
                EXPIRES => times.expires = parse_bool(&self.text(&child)?),
                USAGE_COUNT => times.usage_count = parse_number(USAGE_COUNT, &self.text(&child)?)?,
                _ => self.skip(child)?,
            }
        }
        Ok(times)
    }
}
