//! Vorbis comment payloads (the body of a VORBIS_COMMENT block).
//!
//! Layout: `[u32 LE vendor len][vendor][u32 LE count]` then `count` times
//! `[u32 LE len]["KEY=VALUE" UTF-8]`. These lengths are little-endian, unlike the rest of FLAC.

use tracing::debug;

use super::cursor::ByteCursor;
use crate::tags::{TagField, TrackTags};

/// Parsed comment list, in file order. Keys keep their original spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VorbisComment {
    pub vendor: String,
    pub comments: Vec<(String, String)>,
}

impl VorbisComment {
    /// Decode as much as the payload allows. Truncated or malformed entries are skipped.
    pub fn parse(data: &[u8]) -> Self {
        let mut out = VorbisComment::default();
        let mut cursor = ByteCursor::new(data);

        let Some(vendor) = cursor.prefixed_le() else {
            return out;
        };
        out.vendor = String::from_utf8_lossy(vendor).into_owned();

        let Some(count) = cursor.u32_le() else {
            return out;
        };

        for index in 0..count {
            let Some(raw) = cursor.prefixed_le() else {
                debug!(index, count, "vorbis comment list ends early");
                break;
            };
            let entry = String::from_utf8_lossy(raw);
            match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    out.comments.push((key.to_string(), value.to_string()));
                }
                _ => debug!(index, "skipping malformed vorbis comment"),
            }
        }

        out
    }

    /// Last value stored under `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.comments
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Value for a known field, honouring the fallback key.
    pub fn field(&self, field: TagField) -> Option<&str> {
        self.get(field.vorbis_key())
            .or_else(|| field.fallback_key().and_then(|alt| self.get(alt)))
    }

    /// Copy every known field into `tags`. Missing fields become empty.
    pub fn apply_to(&self, tags: &mut TrackTags) {
        for field in TagField::ALL {
            tags.set(field, self.field(field).unwrap_or_default());
        }
    }

    /// Entries whose key is not one of the known fields or their fallbacks.
    pub fn extra_fields(&self) -> Vec<(String, String)> {
        self.comments
            .iter()
            .filter(|(key, _)| TagField::from_key(key).is_none())
            .cloned()
            .collect()
    }

    /// Build a comment list from `tags` (non-empty fields only, fixed order) followed by `extra`.
    pub fn from_tags(vendor: &str, tags: &TrackTags, extra: Vec<(String, String)>) -> Self {
        let mut comments: Vec<(String, String)> = TagField::ALL
            .into_iter()
            .filter(|field| !tags.get(*field).is_empty())
            .map(|field| (field.vorbis_key().to_string(), tags.get(field).to_string()))
            .collect();
        comments.extend(extra);

        Self {
            vendor: vendor.to_string(),
            comments,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_prefixed(&mut out, self.vendor.as_bytes());
        out.extend_from_slice(&(self.comments.len() as u32).to_le_bytes());
        for (key, value) in &self.comments {
            push_prefixed(&mut out, format!("{key}={value}").as_bytes());
        }
        out
    }
}

fn push_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment_bytes(vendor: &str, entries: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        push_prefixed(&mut out, vendor.as_bytes());
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for entry in entries {
            push_prefixed(&mut out, entry.as_bytes());
        }
        out
    }

    #[test]
    fn reads_known_fields_case_insensitively() {
        let vc = VorbisComment::parse(&comment_bytes(
            "ref",
            &["title=Song", "Artist=Band", "ALBUM ARTIST=Various", "YEAR=1999"],
        ));
        let mut tags = TrackTags::default();
        vc.apply_to(&mut tags);

        assert_eq!(tags.title, "Song");
        assert_eq!(tags.artist, "Band");
        assert_eq!(tags.album_artist, "Various");
        assert_eq!(tags.year, "1999");
        assert_eq!(vc.vendor, "ref");
    }

    #[test]
    fn canonical_key_wins_over_fallback() {
        let vc = VorbisComment::parse(&comment_bytes("", &["TRACK=9", "TRACKNUMBER=3"]));
        assert_eq!(vc.field(TagField::TrackNumber), Some("3"));
    }

    #[test]
    fn value_keeps_everything_after_the_first_equals() {
        let vc = VorbisComment::parse(&comment_bytes("", &["COMMENT=a=b=c"]));
        assert_eq!(vc.field(TagField::Comment), Some("a=b=c"));
    }

    #[test]
    fn skips_entries_without_a_key() {
        let vc = VorbisComment::parse(&comment_bytes("", &["=orphan", "novalue", "GENRE=Jazz"]));
        assert_eq!(vc.comments, vec![("GENRE".to_string(), "Jazz".to_string())]);
    }

    #[test]
    fn count_larger_than_payload_stops_cleanly() {
        let mut bytes = comment_bytes("v", &["TITLE=One"]);
        // Claim 5 comments while only one is present.
        let count_at = 4 + 1;
        bytes[count_at..count_at + 4].copy_from_slice(&5u32.to_le_bytes());
        let vc = VorbisComment::parse(&bytes);
        assert_eq!(vc.comments.len(), 1);
    }

    #[test]
    fn truncated_entry_is_dropped() {
        let mut bytes = comment_bytes("v", &["TITLE=One", "ARTIST=Two"]);
        bytes.truncate(bytes.len() - 3);
        let vc = VorbisComment::parse(&bytes);
        assert_eq!(vc.comments, vec![("TITLE".to_string(), "One".to_string())]);
    }

    #[test]
    fn extra_fields_exclude_aliases() {
        let vc = VorbisComment::parse(&comment_bytes(
            "",
            &["TITLE=x", "DESCRIPTION=y", "FOO=bar", "replaygain_track_gain=-6 dB"],
        ));
        assert_eq!(
            vc.extra_fields(),
            vec![
                ("FOO".to_string(), "bar".to_string()),
                ("replaygain_track_gain".to_string(), "-6 dB".to_string()),
            ]
        );
    }

    #[test]
    fn encodes_fields_in_fixed_order_then_extras() {
        let tags = TrackTags {
            comment: "c".into(),
            title: "t".into(),
            year: "2001".into(),
            ..TrackTags::default()
        };
        let vc = VorbisComment::from_tags("vendor", &tags, vec![("FOO".into(), "bar".into())]);
        let keys: Vec<&str> = vc.comments.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["TITLE", "DATE", "COMMENT", "FOO"]);

        assert_eq!(VorbisComment::parse(&vc.encode()), vc);
    }
}
