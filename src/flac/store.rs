//! Read and rewrite the metadata chain of FLAC files on disk.
//!
//! Audio frames are never decoded: a rewrite copies everything after the chain verbatim.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::block::{self, MetadataBlock};
use super::picture;
use super::streaminfo::StreamInfo;
use super::vorbis_comment::VorbisComment;
use crate::error::MetadataError;
use crate::tags::{CoverArt, TagField, TrackTags};

/// Vendor string written into rebuilt Vorbis comment blocks.
pub const DEFAULT_VENDOR: &str = "trackforge";

/// Files smaller than this cannot hold a marker plus a complete STREAMINFO block.
pub const MIN_FLAC_FILE_LEN: u64 = 42;

/// Tag editor for FLAC files.
///
/// The `bool`/`TrackTags` methods never fail; the reason for the most recent failure is kept
/// and can be fetched with [`FlacMetadataStore::last_error`]. The `try_*` methods return the
/// typed error instead and leave `last_error` untouched.
///
/// There is no file locking: two stores rewriting the same path at once will race.
#[derive(Debug, Clone)]
pub struct FlacMetadataStore {
    vendor: String,
    last_error: Option<String>,
}

impl Default for FlacMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlacMetadataStore {
    pub fn new() -> Self {
        Self::with_vendor(DEFAULT_VENDOR)
    }

    pub fn with_vendor(vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            last_error: None,
        }
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Message describing why the last boolean call failed, if it did.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn validate(&mut self, path: impl AsRef<Path>) -> bool {
        let res = self.try_validate(path);
        self.record(res).is_some()
    }

    /// Returns default tags when the file cannot be read.
    pub fn read_tags(&mut self, path: impl AsRef<Path>) -> TrackTags {
        let res = self.try_read_tags(path);
        self.record(res).unwrap_or_default()
    }

    pub fn write_tags(&mut self, path: impl AsRef<Path>, tags: &TrackTags) -> bool {
        let res = self.try_write_tags(path, tags);
        self.record(res).is_some()
    }

    pub fn update_field(&mut self, path: impl AsRef<Path>, field: &str, value: &str) -> bool {
        let res = self.try_update_field(path, field, value);
        self.record(res).is_some()
    }

    pub fn update_album_art(&mut self, path: impl AsRef<Path>, art: CoverArt) -> bool {
        let res = self.try_update_album_art(path, art);
        self.record(res).is_some()
    }

    pub fn remove_album_art(&mut self, path: impl AsRef<Path>) -> bool {
        let res = self.try_remove_album_art(path);
        self.record(res).is_some()
    }

    /// Check the `fLaC` marker without reading any blocks.
    pub fn try_validate(&self, path: impl AsRef<Path>) -> Result<(), MetadataError> {
        let mut reader = open(path.as_ref())?;
        check_marker(&mut reader)
    }

    pub fn try_read_tags(&self, path: impl AsRef<Path>) -> Result<TrackTags, MetadataError> {
        let path = path.as_ref();
        let mut reader = open(path)?;
        check_marker(&mut reader)?;

        let chain = block::read_chain(&mut reader)?;
        if chain.truncated {
            debug!(path = %path.display(), "using blocks read before truncation");
        }

        let mut tags = TrackTags::default();
        for block in &chain.blocks {
            match block {
                MetadataBlock::StreamInfo(data) => match StreamInfo::parse(data) {
                    Some(info) => {
                        tags.sample_rate = info.sample_rate;
                        tags.channels = info.channels;
                        tags.bits_per_sample = info.bits_per_sample;
                        tags.total_samples = info.total_samples;
                    }
                    None => debug!(len = data.len(), "ignoring short STREAMINFO block"),
                },
                MetadataBlock::VorbisComment(data) => {
                    VorbisComment::parse(data).apply_to(&mut tags);
                }
                MetadataBlock::Picture(data) => {
                    tags.album_art = picture::parse(data);
                }
                MetadataBlock::Opaque { .. } => {}
            }
        }

        Ok(tags)
    }

    /// Rewrite the Vorbis comment and picture blocks from `tags`.
    ///
    /// STREAMINFO and every other block are kept as they are, as is the audio payload. Comment
    /// keys that do not map to a [`TagField`] survive the rewrite.
    pub fn try_write_tags(
        &self,
        path: impl AsRef<Path>,
        tags: &TrackTags,
    ) -> Result<(), MetadataError> {
        let path = path.as_ref();
        let (mut blocks, payload) = read_file_for_rewrite(path)?;

        let extra = blocks
            .iter()
            .rev()
            .find_map(|b| match b {
                MetadataBlock::VorbisComment(data) => Some(VorbisComment::parse(data)),
                _ => None,
            })
            .map(|vc| vc.extra_fields())
            .unwrap_or_default();
        let comment = VorbisComment::from_tags(&self.vendor, tags, extra);
        let comment_block = MetadataBlock::VorbisComment(comment.encode());
        let insert_at = if blocks.is_empty() { 0 } else { 1 };
        replace_all(&mut blocks, is_vorbis_comment, Some(comment_block), insert_at);

        let picture_block = match &tags.album_art {
            Some(art) => Some(MetadataBlock::Picture(picture::encode(art)?)),
            None => None,
        };
        let append_at = blocks.len();
        replace_all(&mut blocks, is_picture, picture_block, append_at);

        let tmp = temp_path(path);
        write_temp(&tmp, &blocks, &payload)?;
        if let Err(err) = verify_temp(&tmp) {
            remove_quietly(&tmp);
            return Err(err);
        }
        replace_original(path, &tmp)?;

        info!(path = %path.display(), blocks = blocks.len(), "rewrote flac metadata");
        Ok(())
    }

    /// Set a single field by name (`TITLE`, `album artist`, `YEAR`, ...).
    pub fn try_update_field(
        &self,
        path: impl AsRef<Path>,
        field: &str,
        value: &str,
    ) -> Result<(), MetadataError> {
        let field: TagField = field.parse()?;
        let path = path.as_ref();
        let mut tags = self.try_read_tags(path)?;
        tags.set(field, value);
        self.try_write_tags(path, &tags)
    }

    pub fn try_update_album_art(
        &self,
        path: impl AsRef<Path>,
        art: CoverArt,
    ) -> Result<(), MetadataError> {
        let path = path.as_ref();
        let mut tags = self.try_read_tags(path)?;
        tags.album_art = Some(art);
        self.try_write_tags(path, &tags)
    }

    pub fn try_remove_album_art(&self, path: impl AsRef<Path>) -> Result<(), MetadataError> {
        let path = path.as_ref();
        let mut tags = self.try_read_tags(path)?;
        tags.album_art = None;
        self.try_write_tags(path, &tags)
    }

    fn record<T>(&mut self, res: Result<T, MetadataError>) -> Option<T> {
        match res {
            Ok(value) => {
                self.last_error = None;
                Some(value)
            }
            Err(err) => {
                warn!(error = %err, "flac metadata operation failed");
                self.last_error = Some(err.to_string());
                None
            }
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>, MetadataError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| MetadataError::FileNotOpenable {
            path: path.to_path_buf(),
            source,
        })
}

fn check_marker<R: Read>(reader: &mut R) -> Result<(), MetadataError> {
    if block::read_marker(reader)? {
        Ok(())
    } else {
        Err(MetadataError::InvalidContainerMarker)
    }
}

/// Marker check, the whole chain, then every remaining byte as the audio payload.
fn read_file_for_rewrite(path: &Path) -> Result<(Vec<MetadataBlock>, Vec<u8>), MetadataError> {
    let mut reader = open(path)?;
    check_marker(&mut reader)?;

    let chain = block::read_chain(&mut reader)?;
    // A short block swallowed the rest of the file; writing it back would drop that data.
    if chain.truncated {
        return Err(MetadataError::TruncatedChain);
    }

    let mut payload = Vec::new();
    reader.read_to_end(&mut payload)?;
    Ok((chain.blocks, payload))
}

fn is_vorbis_comment(block: &MetadataBlock) -> bool {
    matches!(block, MetadataBlock::VorbisComment(_))
}

fn is_picture(block: &MetadataBlock) -> bool {
    matches!(block, MetadataBlock::Picture(_))
}

/// Drop every block matching `pred` and put `replacement` where the first one was.
/// Without a match, `replacement` goes to `fallback_index`.
fn replace_all(
    blocks: &mut Vec<MetadataBlock>,
    pred: fn(&MetadataBlock) -> bool,
    replacement: Option<MetadataBlock>,
    fallback_index: usize,
) {
    let first = blocks.iter().position(pred);
    blocks.retain(|b| !pred(b));

    if let Some(block) = replacement {
        let at = first.unwrap_or(fallback_index).min(blocks.len());
        blocks.insert(at, block);
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_temp(tmp: &Path, blocks: &[MetadataBlock], payload: &[u8]) -> Result<(), MetadataError> {
    let file = File::create(tmp).map_err(|source| MetadataError::TempFileCreateFailed {
        path: tmp.to_path_buf(),
        source,
    })?;

    let res = (|| -> Result<(), MetadataError> {
        let mut out = BufWriter::new(file);
        block::write_chain(blocks, &mut out)?;
        out.write_all(payload)?;
        out.flush()?;
        Ok(())
    })();

    if res.is_err() {
        remove_quietly(tmp);
    }
    res
}

fn verify_temp(tmp: &Path) -> Result<(), MetadataError> {
    let verification = |reason: String| MetadataError::VerificationFailed { reason };

    let len = fs::metadata(tmp)
        .map_err(|e| verification(format!("cannot stat {}: {e}", tmp.display())))?
        .len();
    if len < MIN_FLAC_FILE_LEN {
        return Err(verification(format!(
            "{len} bytes is below the minimum of {MIN_FLAC_FILE_LEN}"
        )));
    }

    let mut file = File::open(tmp)
        .map_err(|e| verification(format!("cannot reopen {}: {e}", tmp.display())))?;
    if !block::read_marker(&mut file)? {
        return Err(verification("missing fLaC marker".to_string()));
    }
    Ok(())
}

/// Delete the original, then move the temp file into its place.
///
/// A crash between the two steps loses the original. A failed rename leaves the temp file on
/// disk for recovery.
fn replace_original(path: &Path, tmp: &Path) -> Result<(), MetadataError> {
    if let Err(err) = fs::remove_file(path) {
        remove_quietly(tmp);
        return Err(MetadataError::ReplaceFailed(err));
    }

    fs::rename(tmp, path).map_err(|err| {
        warn!(temp = %tmp.display(), "rename failed, temp file left in place");
        MetadataError::ReplaceFailed(err)
    })
}

fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        debug!(path = %path.display(), error = %err, "could not remove temp file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flac::block::TYPE_APPLICATION;

    fn opaque(tag: u8) -> MetadataBlock {
        MetadataBlock::Opaque {
            block_type: TYPE_APPLICATION,
            data: vec![tag],
        }
    }

    #[test]
    fn temp_path_appends_suffix() {
        assert_eq!(
            temp_path(Path::new("/music/a.flac")),
            PathBuf::from("/music/a.flac.tmp")
        );
    }

    #[test]
    fn replace_all_keeps_position_of_first_match() {
        let mut blocks = vec![
            MetadataBlock::StreamInfo(vec![0; 34]),
            opaque(1),
            MetadataBlock::Picture(vec![1]),
            opaque(2),
            MetadataBlock::Picture(vec![2]),
        ];
        replace_all(&mut blocks, is_picture, Some(MetadataBlock::Picture(vec![9])), 99);

        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[2], MetadataBlock::Picture(vec![9]));
        assert_eq!(blocks[3], opaque(2));
    }

    #[test]
    fn replace_all_uses_fallback_when_nothing_matches() {
        let mut blocks = vec![MetadataBlock::StreamInfo(vec![0; 34]), opaque(1)];
        replace_all(
            &mut blocks,
            is_vorbis_comment,
            Some(MetadataBlock::VorbisComment(vec![])),
            1,
        );
        assert_eq!(blocks[1], MetadataBlock::VorbisComment(vec![]));
    }

    #[test]
    fn replace_all_without_replacement_removes() {
        let mut blocks = vec![MetadataBlock::Picture(vec![1]), opaque(1)];
        replace_all(&mut blocks, is_picture, None, 0);
        assert_eq!(blocks, vec![opaque(1)]);
    }

    #[test]
    fn failed_rename_reports_replace_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("a.flac");
        fs::write(&path, b"old")?;

        // The temp file vanished before the rename.
        let err = replace_original(&path, &temp_path(&path)).err();
        assert!(matches!(err, Some(MetadataError::ReplaceFailed(_))), "{err:?}");
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn undeletable_original_is_kept_and_temp_removed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("a.flac");
        fs::create_dir(&path)?;
        fs::write(path.join("inside"), b"x")?;
        let tmp = temp_path(&path);
        fs::write(&tmp, b"new")?;

        let err = replace_original(&path, &tmp).err();
        assert!(matches!(err, Some(MetadataError::ReplaceFailed(_))), "{err:?}");
        assert!(path.join("inside").exists());
        assert!(!tmp.exists());
        Ok(())
    }

    #[test]
    fn successful_replace_moves_temp_over_original() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("a.flac");
        fs::write(&path, b"old")?;
        let tmp = temp_path(&path);
        fs::write(&tmp, b"new")?;

        replace_original(&path, &tmp)?;
        assert_eq!(fs::read(&path)?, b"new");
        assert!(!tmp.exists());
        Ok(())
    }

    #[test]
    fn missing_file_sets_last_error() {
        let mut store = FlacMetadataStore::new();
        assert!(!store.validate("/definitely/not/here.flac"));
        let msg = store.last_error().unwrap_or_default();
        assert!(msg.starts_with("Cannot open file"), "{msg}");
    }
}
