//! The XML document carried inside the encrypted envelope.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::{Error, Result};

mod read;
mod write;

pub use read::{ParsedDocument, read_document};
pub use write::write_document;

pub(crate) const KEEPASS_FILE: &str = "KeePassFile";
pub(crate) const META: &str = "Meta";
pub(crate) const ROOT: &str = "Root";

pub(crate) const GENERATOR: &str = "Generator";
pub(crate) const HEADER_HASH: &str = "HeaderHash";
pub(crate) const DATABASE_NAME: &str = "DatabaseName";
pub(crate) const DATABASE_NAME_CHANGED: &str = "DatabaseNameChanged";
pub(crate) const DATABASE_DESCRIPTION: &str = "DatabaseDescription";
pub(crate) const DATABASE_DESCRIPTION_CHANGED: &str = "DatabaseDescriptionChanged";
pub(crate) const DEFAULT_USER_NAME: &str = "DefaultUserName";
pub(crate) const MEMORY_PROTECTION: &str = "MemoryProtection";
pub(crate) const PROTECT_TITLE: &str = "ProtectTitle";
pub(crate) const PROTECT_USER_NAME: &str = "ProtectUserName";
pub(crate) const PROTECT_PASSWORD: &str = "ProtectPassword";
pub(crate) const PROTECT_URL: &str = "ProtectURL";
pub(crate) const PROTECT_NOTES: &str = "ProtectNotes";

pub(crate) const GROUP: &str = "Group";
pub(crate) const ENTRY: &str = "Entry";
pub(crate) const UUID: &str = "UUID";
pub(crate) const NAME: &str = "Name";
pub(crate) const NOTES: &str = "Notes";
pub(crate) const ICON_ID: &str = "IconID";
pub(crate) const TAGS: &str = "Tags";
pub(crate) const STRING: &str = "String";
pub(crate) const KEY: &str = "Key";
pub(crate) const VALUE: &str = "Value";
pub(crate) const PROTECTED_ATTR: &str = "Protected";

pub(crate) const TIMES: &str = "Times";
pub(crate) const CREATION_TIME: &str = "CreationTime";
pub(crate) const LAST_MODIFICATION_TIME: &str = "LastModificationTime";
pub(crate) const LAST_ACCESS_TIME: &str = "LastAccessTime";
pub(crate) const EXPIRY_TIME: &str = "ExpiryTime";
pub(crate) const EXPIRES: &str = "Expires";
pub(crate) const USAGE_COUNT: &str = "UsageCount";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub(crate) fn format_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

pub(crate) fn parse_bool(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("true")
}

pub(crate) fn format_time(time: &DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub(crate) fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), TIME_FORMAT)
        .map_err(|e| Error::document(format!("timestamp {text:?}: {e}")))?;
    Ok(naive.and_utc())
}

pub(crate) fn format_uuid(uuid: &Uuid) -> String {
    STANDARD.encode(uuid.as_bytes())
}

pub(crate) fn parse_uuid(text: &str) -> Result<Uuid> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| Error::document(format!("uuid: {e}")))?;
    Uuid::from_slice(&bytes).map_err(|e| Error::document(format!("uuid: {e}")))
}

pub(crate) fn parse_number<T: std::str::FromStr>(element: &str, text: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    text.trim()
        .parse()
        .map_err(|e| Error::document(format!("{element}: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn time_format_is_utc_seconds() {
        let t = Utc.with_ymd_and_hms(2024, 2, 29, 13, 5, 9).unwrap();
        assert_eq!(format_time(&t), "2024-02-29T13:05:09Z");
        assert_eq!(parse_time("2024-02-29T13:05:09Z").unwrap(), t);
    }

    #[test]
    fn bad_time_is_a_document_error() {
        assert!(matches!(parse_time("yesterday"), Err(Error::Document(_))));
    }

    #[test]
    fn uuid_is_base64_of_raw_bytes() {
        let uuid = Uuid::from_bytes([0u8; 16]);
        assert_eq!(format_uuid(&uuid), "AAAAAAAAAAAAAAAAAAAAAA==");
        assert_eq!(parse_uuid("AAAAAAAAAAAAAAAAAAAAAA==").unwrap(), uuid);
        assert!(parse_uuid("AAAA").is_err());
    }

    #[test]
    fn booleans() {
        assert_eq!(format_bool(true), "True");
        assert!(parse_bool("True"));
        assert!(parse_bool("true"));
        assert!(!parse_bool("False"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn numbers_report_element() {
        let err = parse_number::<u32>(ICON_ID, "x").unwrap_err();
        assert!(err.to_string().contains("IconID"));
    }
}
