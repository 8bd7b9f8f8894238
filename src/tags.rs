//! The denormalized tag view shared by the FLAC editor and the CLI.
//!
//! Text fields use an empty string for "unset"; the writer omits empty fields.
//! Technical fields come from STREAMINFO and are never written back.

use std::fmt;
use std::str::FromStr;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// Decoded embedded cover image.
#[derive(Clone, PartialEq)]
pub struct CoverArt(DynamicImage);

impl CoverArt {
    pub fn new(image: DynamicImage) -> Self {
        Self(image)
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.0
    }

    pub fn into_image(self) -> DynamicImage {
        self.0
    }
}

impl fmt::Debug for CoverArt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverArt")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color", &self.0.color())
            .finish()
    }
}

impl From<DynamicImage> for CoverArt {
    fn from(image: DynamicImage) -> Self {
        Self(image)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub year: String,
    pub genre: String,
    pub track_number: String,
    pub comment: String,

    // Read-only, derived from STREAMINFO.
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    pub total_samples: u64,

    #[serde(skip)]
    pub album_art: Option<CoverArt>,
}

impl TrackTags {
    /// Playback length derived from STREAMINFO, if the stream declared both values.
    pub fn duration_seconds(&self) -> Option<f64> {
        if self.sample_rate == 0 || self.total_samples == 0 {
            return None;
        }
        Some(self.total_samples as f64 / self.sample_rate as f64)
    }

    pub fn get(&self, field: TagField) -> &str {
        match field {
            TagField::Title => &self.title,
            TagField::Artist => &self.artist,
            TagField::Album => &self.album,
            TagField::AlbumArtist => &self.album_artist,
            TagField::Year => &self.year,
            TagField::Genre => &self.genre,
            TagField::TrackNumber => &self.track_number,
            TagField::Comment => &self.comment,
        }
    }

    pub fn set(&mut self, field: TagField, value: impl Into<String>) {
        let slot = match field {
            TagField::Title => &mut self.title,
            TagField::Artist => &mut self.artist,
            TagField::Album => &mut self.album,
            TagField::AlbumArtist => &mut self.album_artist,
            TagField::Year => &mut self.year,
            TagField::Genre => &mut self.genre,
            TagField::TrackNumber => &mut self.track_number,
            TagField::Comment => &mut self.comment,
        };
        *slot = value.into();
    }
}

/// The editable text fields, in the order they are written to a Vorbis comment block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagField {
    Title,
    Artist,
    Album,
    AlbumArtist,
    Year,
    Genre,
    TrackNumber,
    Comment,
}

impl TagField {
    pub const ALL: [TagField; 8] = [
        TagField::Title,
        TagField::Artist,
        TagField::Album,
        TagField::AlbumArtist,
        TagField::Year,
        TagField::Genre,
        TagField::TrackNumber,
        TagField::Comment,
    ];

    /// Canonical Vorbis comment key written for this field.
    pub fn vorbis_key(self) -> &'static str {
        match self {
            TagField::Title => "TITLE",
            TagField::Artist => "ARTIST",
            TagField::Album => "ALBUM",
            TagField::AlbumArtist => "ALBUMARTIST",
            TagField::Year => "DATE",
            TagField::Genre => "GENRE",
            TagField::TrackNumber => "TRACKNUMBER",
            TagField::Comment => "COMMENT",
        }
    }

    /// Older key accepted on read when the canonical key is missing.
    pub fn fallback_key(self) -> Option<&'static str> {
        match self {
            TagField::AlbumArtist => Some("ALBUM ARTIST"),
            TagField::Year => Some("YEAR"),
            TagField::TrackNumber => Some("TRACK"),
            TagField::Comment => Some("DESCRIPTION"),
            _ => None,
        }
    }

    /// Map any known key (canonical or fallback, any case) to its field.
    pub fn from_key(key: &str) -> Option<TagField> {
        TagField::ALL.into_iter().find(|field| {
            key.eq_ignore_ascii_case(field.vorbis_key())
                || field
                    .fallback_key()
                    .is_some_and(|alt| key.eq_ignore_ascii_case(alt))
        })
    }
}

impl fmt::Display for TagField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.vorbis_key())
    }
}

impl FromStr for TagField {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TagField::from_key(s.trim()).ok_or_else(|| MetadataError::UnknownField(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup_is_case_insensitive_and_accepts_aliases() {
        assert_eq!("title".parse::<TagField>().ok(), Some(TagField::Title));
        assert_eq!("Album Artist".parse::<TagField>().ok(), Some(TagField::AlbumArtist));
        assert_eq!("YEAR".parse::<TagField>().ok(), Some(TagField::Year));
        assert_eq!("track".parse::<TagField>().ok(), Some(TagField::TrackNumber));
        assert_eq!("description".parse::<TagField>().ok(), Some(TagField::Comment));
    }

    #[test]
    fn unknown_field_names_are_rejected() {
        let err = "MOOD".parse::<TagField>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown field: MOOD");
    }

    #[test]
    fn duration_needs_rate_and_length() {
        let mut tags = TrackTags::default();
        assert_eq!(tags.duration_seconds(), None);

        tags.sample_rate = 44_100;
        tags.total_samples = 132_300;
        assert_eq!(tags.duration_seconds(), Some(3.0));
    }

    #[test]
    fn set_and_get_round_trip_every_field() {
        let mut tags = TrackTags::default();
        for (i, field) in TagField::ALL.into_iter().enumerate() {
            tags.set(field, format!("value {i}"));
        }
        for (i, field) in TagField::ALL.into_iter().enumerate() {
            assert_eq!(tags.get(field), format!("value {i}"));
        }
    }
}
