//! MP3 output container.
//!
//! An MP3 file is an ID3v2 tag followed by the raw MPEG frames. The header step writes the
//! tag; packets go through an [`Interleaver`] so the write path is the same one a
//! multi-stream container would use.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail, ensure};
use id3::frame::{Comment, ExtendedText};
use id3::{Tag, TagLike, Version};
use tracing::{debug, warn};

use crate::codec::{EncodedPacket, MediaOutput, OpenError, StreamParams, TimeBase};

/// Value of the ID3 `TSSE` (encoder settings) frame.
pub const ENCODER_NAME: &str = concat!("trackforge ", env!("CARGO_PKG_VERSION"));

/// Orders packets of several streams by decode timestamp.
///
/// A packet is released once every stream has at least one packet queued, so nothing later
/// can arrive with a smaller timestamp. [`Interleaver::drain`] releases the rest.
#[derive(Debug, Default)]
pub struct Interleaver {
    streams: Vec<StreamQueue>,
}

#[derive(Debug)]
struct StreamQueue {
    time_base: TimeBase,
    queue: VecDeque<EncodedPacket>,
    last_dts: Option<i64>,
}

impl Interleaver {
    pub fn add_stream(&mut self, time_base: TimeBase) -> usize {
        self.streams.push(StreamQueue {
            time_base,
            queue: VecDeque::new(),
            last_dts: None,
        });
        self.streams.len() - 1
    }

    /// Queue `packet` and return whatever can now be written, in order.
    pub fn push(&mut self, packet: EncodedPacket) -> Result<Vec<EncodedPacket>> {
        let stream = self
            .streams
            .get_mut(packet.stream_index)
            .ok_or_else(|| anyhow!("no output stream {}", packet.stream_index))?;

        if let Some(last) = stream.last_dts {
            ensure!(
                packet.dts > last,
                "non-monotonic dts {} after {} on stream {}",
                packet.dts,
                last,
                packet.stream_index
            );
        }
        stream.last_dts = Some(packet.dts);
        stream.queue.push_back(packet);

        let mut ready = Vec::new();
        while self.streams.iter().all(|s| !s.queue.is_empty()) {
            match self.pop_earliest() {
                Some(p) => ready.push(p),
                None => break,
            }
        }
        Ok(ready)
    }

    /// Release every queued packet, in order.
    pub fn drain(&mut self) -> Vec<EncodedPacket> {
        let mut out = Vec::new();
        while let Some(p) = self.pop_earliest() {
            out.push(p);
        }
        out
    }

    fn pop_earliest(&mut self) -> Option<EncodedPacket> {
        let mut best: Option<usize> = None;
        for (i, stream) in self.streams.iter().enumerate() {
            let Some(head) = stream.queue.front() else {
                continue;
            };
            let earlier = match best {
                None => true,
                Some(b) => {
                    let other = &self.streams[b];
                    let other_head = other.queue.front()?;
                    compare_ts(head.dts, stream.time_base, other_head.dts, other.time_base)
                        == Ordering::Less
                }
            };
            if earlier {
                best = Some(i);
            }
        }
        best.and_then(|i| self.streams[i].queue.pop_front())
    }
}

/// Compare timestamps in different time bases without rounding.
fn compare_ts(a: i64, a_tb: TimeBase, b: i64, b_tb: TimeBase) -> Ordering {
    let lhs = i128::from(a) * i128::from(a_tb.num) * i128::from(b_tb.den);
    let rhs = i128::from(b) * i128::from(b_tb.num) * i128::from(a_tb.den);
    lhs.cmp(&rhs)
}

/// [`MediaOutput`] writing an MP3 file.
pub struct Mp3Muxer {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    stream: Option<StreamParams>,
    tags: Vec<(String, String)>,
    interleaver: Interleaver,
    header_written: bool,
    bytes_written: u64,
}

impl Mp3Muxer {
    /// Pick the MP3 container for `path`. Only the `.mp3` extension is accepted.
    pub fn for_path(path: &Path) -> std::result::Result<Self, OpenError> {
        let is_mp3 = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("mp3"));
        if !is_mp3 {
            return Err(OpenError::Unsupported(anyhow!(
                "no output format for '{}'",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer: None,
            stream: None,
            tags: Vec::new(),
            interleaver: Interleaver::default(),
            header_written: false,
            bytes_written: 0,
        })
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| anyhow!("output file is not open"))
    }

    fn write_packets(&mut self, packets: Vec<EncodedPacket>) -> Result<()> {
        for packet in packets {
            let len = packet.data.len() as u64;
            self.writer()?
                .write_all(&packet.data)
                .context("failed to write mp3 frame")?;
            self.bytes_written += len;
        }
        Ok(())
    }
}

impl MediaOutput for Mp3Muxer {
    fn add_audio_stream(&mut self, params: &StreamParams) -> Result<usize> {
        if self.stream.is_some() {
            bail!("mp3 files carry a single audio stream");
        }
        ensure!(params.spec.sample_rate > 0, "stream sample rate is zero");
        self.stream = Some(*params);
        Ok(self
            .interleaver
            .add_stream(TimeBase::for_sample_rate(params.spec.sample_rate)))
    }

    fn stream_time_base(&self, index: usize) -> Option<TimeBase> {
        match (index, self.stream) {
            (0, Some(params)) => Some(TimeBase::for_sample_rate(params.spec.sample_rate)),
            _ => None,
        }
    }

    fn set_tags(&mut self, tags: &[(String, String)]) {
        self.tags = tags.to_vec();
    }

    fn open(&mut self) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("failed to create '{}'", self.path.display()))?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        ensure!(self.stream.is_some(), "no audio stream added");
        ensure!(!self.header_written, "header already written");

        let tag = build_id3(&self.tags);
        let writer = self.writer()?;
        tag.write_to(&mut *writer, Version::Id3v24)
            .map_err(|e| anyhow!(e))
            .context("failed to write ID3v2 tag")?;
        self.header_written = true;

        debug!(path = %self.path.display(), tags = self.tags.len(), "mp3 header written");
        Ok(())
    }

    fn write_interleaved(&mut self, packet: EncodedPacket) -> Result<()> {
        ensure!(self.header_written, "packet written before header");
        let ready = self.interleaver.push(packet)?;
        self.write_packets(ready)
    }

    fn write_trailer(&mut self) -> Result<()> {
        ensure!(self.header_written, "trailer written before header");
        let rest = self.interleaver.drain();
        self.write_packets(rest)?;

        let writer = self.writer()?;
        writer.flush().context("failed to flush output")?;
        writer
            .get_ref()
            .sync_all()
            .context("failed to sync output")?;

        debug!(
            path = %self.path.display(),
            audio_bytes = self.bytes_written,
            "mp3 trailer written"
        );
        Ok(())
    }
}

/// Map Vorbis-style keys to ID3v2.4 frames. Unknown keys become `TXXX` frames.
fn build_id3(tags: &[(String, String)]) -> Tag {
    let mut tag = Tag::new();

    for (key, value) in tags {
        let frame_id = match key.to_ascii_uppercase().as_str() {
            "TITLE" => Some("TIT2"),
            "ARTIST" => Some("TPE1"),
            "ALBUM" => Some("TALB"),
            "ALBUMARTIST" | "ALBUM ARTIST" => Some("TPE2"),
            "DATE" | "YEAR" => Some("TDRC"),
            "GENRE" => Some("TCON"),
            "TRACKNUMBER" | "TRACK" => Some("TRCK"),
            "COMPOSER" => Some("TCOM"),
            "DISCNUMBER" => Some("TPOS"),
            "COMMENT" | "DESCRIPTION" => {
                tag.add_frame(Comment {
                    lang: "eng".to_string(),
                    description: String::new(),
                    text: value.clone(),
                });
                continue;
            }
            // Our own encoder frame replaces whatever the source carried.
            "ENCODER" | "ENCODED_BY" | "TSSE" => continue,
            _ => None,
        };

        match frame_id {
            Some(id) => tag.set_text(id, value.clone()),
            None => {
                if key.is_empty() {
                    warn!("dropping tag with empty key");
                    continue;
                }
                tag.add_frame(ExtendedText {
                    description: key.clone(),
                    value: value.clone(),
                });
            }
        }
    }

    tag.set_text("TSSE", ENCODER_NAME);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PcmSpec;

    fn packet(stream_index: usize, dts: i64) -> EncodedPacket {
        EncodedPacket {
            stream_index,
            pts: dts,
            dts,
            duration: 1,
            data: vec![dts as u8],
        }
    }

    fn params() -> StreamParams {
        StreamParams {
            spec: PcmSpec::f32_planar(44_100, 2),
            bit_rate: 192_000,
            time_base: TimeBase::for_sample_rate(44_100),
        }
    }

    #[test]
    fn single_stream_passes_straight_through() -> anyhow::Result<()> {
        let mut il = Interleaver::default();
        il.add_stream(TimeBase::for_sample_rate(44_100));
        assert_eq!(il.push(packet(0, 0))?, vec![packet(0, 0)]);
        assert_eq!(il.push(packet(0, 1152))?, vec![packet(0, 1152)]);
        assert!(il.drain().is_empty());
        Ok(())
    }

    #[test]
    fn two_streams_are_ordered_by_time() -> anyhow::Result<()> {
        let mut il = Interleaver::default();
        il.add_stream(TimeBase::new(1, 1000));
        il.add_stream(TimeBase::new(1, 10));

        assert!(il.push(packet(0, 500))?.is_empty());
        assert!(il.push(packet(0, 900))?.is_empty());
        // 0.3 s on stream 1 sorts before 0.5 s on stream 0.
        assert_eq!(il.push(packet(1, 3))?, vec![packet(1, 3)]);
        assert_eq!(il.push(packet(1, 8))?, vec![packet(0, 500), packet(1, 8)]);
        assert_eq!(il.drain(), vec![packet(0, 900)]);
        Ok(())
    }

    #[test]
    fn non_monotonic_dts_is_rejected() -> anyhow::Result<()> {
        let mut il = Interleaver::default();
        il.add_stream(TimeBase::for_sample_rate(44_100));
        il.push(packet(0, 10))?;
        assert!(il.push(packet(0, 10)).is_err());
        assert!(il.push(packet(1, 20)).is_err());
        Ok(())
    }

    #[test]
    fn only_mp3_paths_are_accepted() {
        assert!(Mp3Muxer::for_path(Path::new("out.MP3")).is_ok());
        assert!(matches!(
            Mp3Muxer::for_path(Path::new("out.ogg")),
            Err(OpenError::Unsupported(_))
        ));
        assert!(Mp3Muxer::for_path(Path::new("out")).is_err());
    }

    #[test]
    fn writes_id3_header_then_frames() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.mp3");

        let mut mux = Mp3Muxer::for_path(&path).map_err(|e| anyhow!(e))?;
        assert_eq!(mux.add_audio_stream(&params())?, 0);
        assert!(mux.add_audio_stream(&params()).is_err());
        mux.set_tags(&[
            ("TITLE".to_string(), "Song".to_string()),
            ("DATE".to_string(), "1999".to_string()),
            ("MOOD".to_string(), "calm".to_string()),
        ]);
        mux.open()?;
        mux.write_header()?;
        mux.write_interleaved(packet(0, 0))?;
        mux.write_interleaved(packet(0, 1))?;
        mux.write_trailer()?;

        let tag = Tag::read_from_path(&path)?;
        assert_eq!(tag.title(), Some("Song"));
        assert_eq!(tag.get("TDRC").and_then(|f| f.content().text()), Some("1999"));
        assert!(
            tag.extended_texts()
                .any(|t| t.description == "MOOD" && t.value == "calm")
        );
        assert_eq!(
            tag.get("TSSE").and_then(|f| f.content().text()),
            Some(ENCODER_NAME)
        );

        let bytes = std::fs::read(&path)?;
        assert_eq!(&bytes[..3], b"ID3");
        assert_eq!(&bytes[bytes.len() - 2..], &[0, 1]);
        Ok(())
    }

    #[test]
    fn packets_before_header_are_refused() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut mux = Mp3Muxer::for_path(&dir.path().join("a.mp3")).map_err(|e| anyhow!(e))?;
        mux.add_audio_stream(&params())?;
        mux.open()?;
        assert!(mux.write_interleaved(packet(0, 0)).is_err());
        Ok(())
    }
}
