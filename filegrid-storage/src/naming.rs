//! Storage filename generation and parsing.
//!
//! Format: `{stem}_{username}_{YYYYMMDDThhmmss}_{uuid}.{ext}`, at most 200
//! characters in total. The stem is sanitized and, when the fixed parts
//! leave too little room, truncated with a trailing `...`. Unicode stems
//! survive sanitization; only filesystem-hostile characters are replaced.

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::errors::StorageError;

const MAX_TOTAL_LENGTH: usize = 200;
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Replace filesystem-hostile characters (`<>:"/\|?*` and control bytes)
/// with underscores, collapse runs, and trim leading/trailing underscores.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_underscore = false;
    for ch in name.chars() {
        let hostile = matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
            || (ch as u32) < 0x20;
        let ch = if hostile { '_' } else { ch };
        if ch == '_' {
            if !last_was_underscore {
                out.push('_');
            }
            last_was_underscore = true;
        } else {
            out.push(ch);
            last_was_underscore = false;
        }
    }
    out.trim_matches('_').to_string()
}

fn truncate_stem(stem: &str, max_chars: usize) -> String {
    let count = stem.chars().count();
    if count <= max_chars {
        return stem.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = stem.chars().take(keep).collect();
    out.push_str("...");
    out
}

fn split_stem_ext(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => (&filename[..idx], &filename[idx..]),
        _ => (filename, ""),
    }
}

/// Build the unique on-disk name for an uploaded file.
pub fn generate_storage_filename(
    original_filename: &str,
    username: &str,
    timestamp: DateTime<Utc>,
    file_uuid: Uuid,
) -> Result<String, StorageError> {
    let clean_username = sanitize_filename(username.trim());
    if clean_username.is_empty() {
        return Err(StorageError::InvalidFilename(
            "username is empty after sanitization".into(),
        ));
    }

    let (stem, ext) = split_stem_ext(original_filename);
    let mut clean_stem = sanitize_filename(stem);
    if clean_stem.is_empty() {
        clean_stem = "file".to_string();
    }

    let timestamp_str = timestamp.format(TIMESTAMP_FORMAT).to_string();
    let uuid_str = file_uuid.to_string();

    // {stem}_{username}_{timestamp}_{uuid}{ext}
    let fixed = 1 + clean_username.chars().count()
        + 1
        + timestamp_str.len()
        + 1
        + uuid_str.len()
        + ext.chars().count();
    if fixed >= MAX_TOTAL_LENGTH {
        return Err(StorageError::InvalidFilename(format!(
            "fixed filename parts occupy {fixed} of {MAX_TOTAL_LENGTH} characters"
        )));
    }

    let available_for_stem = MAX_TOTAL_LENGTH - fixed;
    let clean_stem = truncate_stem(&clean_stem, available_for_stem);

    Ok(format!("{clean_stem}_{clean_username}_{timestamp_str}_{uuid_str}{ext}"))
}

/// Date-bucketed directory prefix for a data file: `YYYY/MM/DD/HH`.
pub fn storage_prefix(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y/%m/%d/%H").to_string()
}

/// Components recovered from a storage filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStorageFilename {
    pub stem: String,
    pub username: String,
    pub timestamp: NaiveDateTime,
    pub uuid: Uuid,
    pub extension: String,
}

/// Inverse of [`generate_storage_filename`]. The last three
/// underscore-separated fields are fixed (username, timestamp, uuid);
/// everything before them is the stem, which may itself contain underscores.
pub fn parse_storage_filename(storage_filename: &str) -> Result<ParsedStorageFilename, StorageError> {
    let (without_ext, extension) = split_stem_ext(storage_filename);

    let parts: Vec<&str> = without_ext.split('_').collect();
    if parts.len() < 4 {
        return Err(StorageError::InvalidFilename(format!(
            "expected stem_username_timestamp_uuid, got {storage_filename:?}"
        )));
    }

    let uuid_str = parts[parts.len() - 1];
    let timestamp_str = parts[parts.len() - 2];
    let username = parts[parts.len() - 3];
    let stem = parts[..parts.len() - 3].join("_");

    let timestamp = NaiveDateTime::parse_from_str(timestamp_str, TIMESTAMP_FORMAT)
        .map_err(|_| StorageError::InvalidFilename(format!("bad timestamp {timestamp_str:?}")))?;
    let uuid = Uuid::parse_str(uuid_str)
        .map_err(|_| StorageError::InvalidFilename(format!("bad uuid {uuid_str:?}")))?;

    Ok(ParsedStorageFilename {
        stem,
        username: username.to_string(),
        timestamp,
        uuid,
        extension: extension.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 15, 30, 45).unwrap()
    }

    #[test]
    fn generates_expected_shape() {
        let uuid = Uuid::parse_str("a1b2c3d4-e5f6-7890-abcd-ef1234567890").unwrap();
        let name = generate_storage_filename("report.pdf", "ivanov", ts(), uuid).unwrap();
        assert_eq!(
            name,
            "report_ivanov_20260110T153045_a1b2c3d4-e5f6-7890-abcd-ef1234567890.pdf"
        );
    }

    #[test]
    fn sanitizes_hostile_characters() {
        assert_eq!(sanitize_filename("report/2024.pdf"), "report_2024.pdf");
        assert_eq!(sanitize_filename("a<b>c:d"), "a_b_c_d");
        assert_eq!(sanitize_filename("__already__odd__"), "already_odd");
        assert_eq!(sanitize_filename("***"), "");
    }

    #[test]
    fn unicode_stems_survive() {
        let name = generate_storage_filename("отчет за 2026.docx", "petrov", ts(), Uuid::new_v4()).unwrap();
        assert!(name.starts_with("отчет за 2026_petrov_"));
        assert!(name.ends_with(".docx"));
    }

    #[test]
    fn all_invalid_stem_becomes_file() {
        let name = generate_storage_filename("???.bin", "user", ts(), Uuid::new_v4()).unwrap();
        assert!(name.starts_with("file_user_"));
    }

    #[test]
    fn long_stem_is_truncated_to_limit() {
        let stem = "x".repeat(500);
        let name =
            generate_storage_filename(&format!("{stem}.txt"), "user", ts(), Uuid::new_v4()).unwrap();
        assert!(name.chars().count() <= 200);
        assert!(name.contains("..."));
        parse_storage_filename(&name).unwrap();
    }

    #[test]
    fn empty_username_is_rejected() {
        assert!(generate_storage_filename("a.txt", "  ", ts(), Uuid::new_v4()).is_err());
        assert!(generate_storage_filename("a.txt", "***", ts(), Uuid::new_v4()).is_err());
    }

    #[test]
    fn parse_roundtrip_with_underscored_stem() {
        let uuid = Uuid::new_v4();
        let name = generate_storage_filename("year_end_report.pdf", "smith", ts(), uuid).unwrap();
        let parsed = parse_storage_filename(&name).unwrap();
        assert_eq!(parsed.stem, "year_end_report");
        assert_eq!(parsed.username, "smith");
        assert_eq!(parsed.uuid, uuid);
        assert_eq!(parsed.extension, ".pdf");
        assert_eq!(parsed.timestamp, ts().naive_utc());
    }

    #[test]
    fn parse_rejects_malformed_names() {
        assert!(parse_storage_filename("only_two_parts").is_err());
        assert!(parse_storage_filename("a_b_20260110T153045_not-a-uuid.txt").is_err());
        assert!(parse_storage_filename("a_b_nottime_a1b2c3d4-e5f6-7890-abcd-ef1234567890.txt").is_err());
    }

    #[test]
    fn storage_prefix_buckets_by_hour() {
        assert_eq!(storage_prefix(ts()), "2026/01/10/15");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// parse(generate(...)) recovers the sanitized stem, user,
            /// timestamp, uuid, and extension.
            #[test]
            fn roundtrip(
                stem in "[a-zA-Z0-9 .<>:*-]{1,80}",
                username in "[a-z0-9]{1,20}",
                ext in "[a-z]{1,5}",
                secs in 0i64..=4_000_000_000i64,
            ) {
                let ts = chrono::DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
                let uuid = Uuid::new_v4();
                let original = format!("{stem}.{ext}");
                let Ok(name) = generate_storage_filename(&original, &username, ts, uuid) else {
                    // Only possible when the sanitized stem plus extension
                    // leaves no room; skip those corners.
                    return Ok(());
                };
                prop_assert!(name.chars().count() <= 200);
                let parsed = parse_storage_filename(&name).unwrap();
                prop_assert_eq!(parsed.username, username);
                prop_assert_eq!(parsed.uuid, uuid);
                prop_assert_eq!(parsed.timestamp, ts.naive_utc());
                prop_assert_eq!(parsed.extension, format!(".{ext}"));

                let mut expected_stem = sanitize_filename(&stem);
                if expected_stem.is_empty() {
                    expected_stem = "file".into();
                }
                // The parsed stem is the sanitized stem, possibly truncated.
                if !parsed.stem.ends_with("...") {
                    prop_assert_eq!(parsed.stem, expected_stem);
                } else {
                    let kept = parsed.stem.trim_end_matches("...");
                    prop_assert!(expected_stem.starts_with(kept));
                }
            }
        }
    }
}
