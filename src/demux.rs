//! Demux helpers for Symphonia.
//!
//! Responsibilities:
//! - Probe a file and select a reasonable default audio track
//! - Collect container-level tags under Vorbis-style names
//! - Provide packet iteration that treats IO errors as end-of-stream

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, Track};
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::codec::{AudioStreamInfo, InputPacket, MediaInput, TimeBase};

/// An opened input container.
pub struct SymphoniaInput {
    format: Box<dyn FormatReader>,
    tags: Vec<(String, String)>,
}

impl SymphoniaInput {
    /// Open `path`. The hint falls back to the file extension.
    pub fn open(path: &Path, hint_extension: Option<&str>) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open '{}'", path.display()))?;

        let ext = hint_extension.or_else(|| path.extension().and_then(|e| e.to_str()));
        Self::from_source(Box::new(file), ext)
    }

    /// Probe an arbitrary media source.
    ///
    /// `hint_extension` can improve probe accuracy for ambiguous/unseekable inputs
    /// (e.g. "flac", "ogg", "m4a").
    pub fn from_source(source: Box<dyn MediaSource>, hint_extension: Option<&str>) -> Result<Self> {
        let mss_opts = MediaSourceStreamOptions {
            // Symphonia expects a power-of-two buffer > 32KiB for good probing behavior.
            buffer_len: 256 * 1024,
        };

        let mss = MediaSourceStream::new(source, mss_opts);

        let mut hint = Hint::new();
        if let Some(ext) = hint_extension {
            hint.with_extension(ext);
        }

        let format_opts: FormatOptions = Default::default();
        let metadata_opts: MetadataOptions = Default::default();

        let mut probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| anyhow!(e))
            .context("failed to probe media stream")?;

        // Tags can sit in front of the container (ID3v2) or inside it (Vorbis comments).
        let mut tags = Vec::new();
        if let Some(mut meta) = probed.metadata.get() {
            if let Some(rev) = meta.skip_to_latest() {
                collect_tags(rev, &mut tags);
            }
        }
        let mut format = probed.format;
        if let Some(rev) = format.metadata().skip_to_latest() {
            collect_tags(rev, &mut tags);
        }

        debug!(tracks = format.tracks().len(), tags = tags.len(), "probed input");
        Ok(Self { format, tags })
    }

    /// Codec parameters of a track, needed to build its decoder.
    pub fn codec_params(&self, track_id: u32) -> Option<&CodecParameters> {
        self.format
            .tracks()
            .iter()
            .find(|t| t.id == track_id)
            .map(|t| &t.codec_params)
    }
}

impl MediaInput for SymphoniaInput {
    fn best_audio_stream(&self) -> Option<AudioStreamInfo> {
        pick_default_track(self.format.tracks()).map(stream_info)
    }

    fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    fn read_packet(&mut self) -> Result<Option<InputPacket>> {
        Ok(next_packet(&mut self.format)?.map(|packet| InputPacket {
            stream_index: packet.track_id(),
            pts: packet.ts,
            duration: packet.dur,
            data: packet.data,
        }))
    }
}

/// Track selection policy:
/// - choose the first track that looks decodable (codec != NULL)
/// - and has a known sample rate (required for resampling decisions downstream)
pub fn pick_default_track(tracks: &[Track]) -> Option<&Track> {
    tracks
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
}

fn stream_info(track: &Track) -> AudioStreamInfo {
    let params = &track.codec_params;
    let sample_rate = params.sample_rate.unwrap_or_default();
    let sample_tb = TimeBase::for_sample_rate(sample_rate);
    let time_base = params
        .time_base
        .map(|tb| TimeBase::new(tb.numer, tb.denom))
        .unwrap_or(sample_tb);

    // n_frames counts samples; progress compares it against packet timestamps.
    let duration = params.n_frames.map(|frames| {
        let frames = i64::try_from(frames).unwrap_or(i64::MAX);
        u64::try_from(sample_tb.rescale(frames, time_base)).unwrap_or_default()
    });

    let codec = symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map(|d| d.short_name.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    AudioStreamInfo {
        index: track.id,
        codec,
        sample_rate,
        // Some formats only learn the layout on first decode; stereo is the common case.
        channels: params.channels.map(|c| c.count()).unwrap_or(2),
        time_base,
        duration,
    }
}

fn collect_tags(rev: &MetadataRevision, out: &mut Vec<(String, String)>) {
    for tag in rev.tags() {
        let key = tag
            .std_key
            .and_then(vorbis_name)
            .map(str::to_string)
            .unwrap_or_else(|| tag.key.clone());
        let value = tag.value.to_string();
        if value.is_empty() {
            continue;
        }
        out.push((key, value));
    }
}

fn vorbis_name(key: StandardTagKey) -> Option<&'static str> {
    Some(match key {
        StandardTagKey::TrackTitle => "TITLE",
        StandardTagKey::Artist => "ARTIST",
        StandardTagKey::Album => "ALBUM",
        StandardTagKey::AlbumArtist => "ALBUMARTIST",
        StandardTagKey::Date => "DATE",
        StandardTagKey::Genre => "GENRE",
        StandardTagKey::TrackNumber => "TRACKNUMBER",
        StandardTagKey::Comment => "COMMENT",
        StandardTagKey::Composer => "COMPOSER",
        StandardTagKey::DiscNumber => "DISCNUMBER",
        _ => return None,
    })
}

/// Read the next packet, treating IO errors as "end of stream".
///
/// - `Ok(None)` means EOF or stream ended
/// - other errors are surfaced with context
pub fn next_packet(format: &mut Box<dyn FormatReader>) -> Result<Option<Packet>> {
    match format.next_packet() {
        Ok(p) => Ok(Some(p)),
        Err(SymphoniaError::IoError(_)) => Ok(None),
        Err(e) => Err(anyhow!(e)).context("failed reading packet"),
    }
}
