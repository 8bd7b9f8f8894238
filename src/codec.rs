//! The seam between [`crate::pipeline::TranscodePipeline`] and whatever does the actual
//! container and codec work.
//!
//! The pipeline only talks to the traits in this module. [`crate::engine::NativeEngine`] wires
//! them to symphonia (demux + decode), rubato (resample), LAME (encode) and a small MP3 muxer;
//! tests substitute scripted fakes.

use std::path::Path;

use anyhow::Result;

use crate::opts::{Bitrate, Quality};

/// In-memory sample layout exchanged across the seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// One `Vec<f32>` per channel, samples in `[-1.0, 1.0]`.
    F32Planar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: usize,
}

impl PcmSpec {
    pub fn f32_planar(sample_rate: u32, channels: usize) -> Self {
        Self {
            format: SampleFormat::F32Planar,
            sample_rate,
            channels,
        }
    }
}

/// A run of planar PCM. Every plane holds the same number of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    spec: PcmSpec,
    planes: Vec<Vec<f32>>,
}

impl PcmFrame {
    /// Build a frame from planes. Fails when the plane count does not match `spec.channels` or the
    /// planes differ in length.
    pub fn new(spec: PcmSpec, planes: Vec<Vec<f32>>) -> Result<Self> {
        anyhow::ensure!(
            planes.len() == spec.channels,
            "expected {} planes, got {}",
            spec.channels,
            planes.len()
        );
        let frames = planes.first().map_or(0, Vec::len);
        anyhow::ensure!(
            planes.iter().all(|p| p.len() == frames),
            "planes have different lengths"
        );
        Ok(Self { spec, planes })
    }

    pub fn empty(spec: PcmSpec) -> Self {
        Self {
            spec,
            planes: vec![Vec::new(); spec.channels],
        }
    }

    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn planes(&self) -> &[Vec<f32>] {
        &self.planes
    }

    pub fn into_planes(self) -> Vec<Vec<f32>> {
        self.planes
    }
}

/// Rational time base, `num / den` seconds per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// One tick per sample.
    pub const fn for_sample_rate(sample_rate: u32) -> Self {
        Self::new(1, sample_rate)
    }

    /// Convert `ts` from this time base into `to`, rounding to nearest (ties away from zero).
    pub fn rescale(self, ts: i64, to: TimeBase) -> i64 {
        if self == to {
            return ts;
        }
        let num = i128::from(ts) * i128::from(self.num) * i128::from(to.den);
        let den = i128::from(self.den) * i128::from(to.num);
        if den == 0 {
            return 0;
        }
        let half = den / 2;
        let rounded = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        rounded.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}

/// `ceil(value * mul / div)`, computed without intermediate overflow.
pub fn rescale_rnd_up(value: u64, mul: u64, div: u64) -> u64 {
    if div == 0 {
        return 0;
    }
    let n = u128::from(value) * u128::from(mul);
    let d = u128::from(div);
    let out = n.div_ceil(d);
    u64::try_from(out).unwrap_or(u64::MAX)
}

/// A compressed packet read from the input container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPacket {
    pub stream_index: u32,
    /// Presentation timestamp in the stream's time base.
    pub pts: u64,
    pub duration: u64,
    pub data: Box<[u8]>,
}

/// A compressed packet produced by the encoder and consumed by the output container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub stream_index: usize,
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub data: Vec<u8>,
}

impl EncodedPacket {
    pub fn rescale_ts(&mut self, from: TimeBase, to: TimeBase) {
        self.pts = from.rescale(self.pts, to);
        self.dts = from.rescale(self.dts, to);
        self.duration = from.rescale(self.duration, to);
    }
}

/// The audio stream picked from the input container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStreamInfo {
    pub index: u32,
    pub codec: String,
    pub sample_rate: u32,
    pub channels: usize,
    pub time_base: TimeBase,
    /// Total length in `time_base` ticks, when the container declares it.
    pub duration: Option<u64>,
}

impl AudioStreamInfo {
    pub fn pcm_spec(&self) -> PcmSpec {
        PcmSpec::f32_planar(self.sample_rate, self.channels)
    }
}

/// What the pipeline asks of the encoder. The encoder may settle on a different rate or
/// channel count; [`AudioEncoder::input_spec`] reports what it actually expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    pub bitrate: Bitrate,
    pub quality: Quality,
    pub sample_rate: u32,
    pub channels: usize,
    pub format: SampleFormat,
    pub global_header: bool,
}

/// Parameters for an output stream, copied from the opened encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub spec: PcmSpec,
    pub bit_rate: u32,
    pub time_base: TimeBase,
}

/// Opening a component either fails because nothing handles the request, or because the
/// handler could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("unsupported: {0:#}")]
    Unsupported(anyhow::Error),
    #[error("failed: {0:#}")]
    Failed(anyhow::Error),
}

impl OpenError {
    pub fn into_inner(self) -> anyhow::Error {
        match self {
            OpenError::Unsupported(err) | OpenError::Failed(err) => err,
        }
    }
}

pub trait MediaInput {
    /// The stream the pipeline should transcode, or `None` when the input has no audio.
    fn best_audio_stream(&self) -> Option<AudioStreamInfo>;

    /// Container-level key/value tags. Well-known keys use Vorbis comment names
    /// (`TITLE`, `ARTIST`, `DATE`, ...).
    fn tags(&self) -> &[(String, String)];

    /// `Ok(None)` at end of input.
    fn read_packet(&mut self) -> Result<Option<InputPacket>>;
}

pub trait AudioDecoder {
    /// Feed one packet. `None` signals end of stream so buffered frames can be drained.
    fn send_packet(&mut self, packet: Option<InputPacket>) -> Result<()>;

    /// Next decoded frame, or `None` once the decoder needs more input.
    fn receive_frame(&mut self) -> Result<Option<PcmFrame>>;
}

pub trait AudioResampler {
    fn input_spec(&self) -> PcmSpec;
    fn output_spec(&self) -> PcmSpec;

    /// Samples held internally, measured at the input rate.
    fn delay(&self) -> u64;

    /// Convert `input` and return at most `max_out` output samples per channel. Output that
    /// does not fit stays buffered for the next call. `None` drains what is buffered.
    fn convert(&mut self, input: Option<&PcmFrame>, max_out: usize) -> Result<PcmFrame>;
}

pub trait AudioEncoder {
    fn input_spec(&self) -> PcmSpec;

    /// Samples per channel the encoder wants in every frame but the last.
    fn frame_size(&self) -> Option<usize>;

    /// Time base of the packets this encoder emits.
    fn time_base(&self) -> TimeBase;

    fn bit_rate(&self) -> u32;

    /// Feed one frame. `None` signals end of stream.
    fn send_frame(&mut self, frame: Option<&PcmFrame>) -> Result<()>;

    /// Next finished packet, or `None` if the encoder needs more input.
    fn receive_packet(&mut self) -> Result<Option<EncodedPacket>>;
}

pub trait MediaOutput {
    fn needs_global_header(&self) -> bool {
        false
    }

    /// Returns the index of the new stream.
    fn add_audio_stream(&mut self, params: &StreamParams) -> Result<usize>;

    fn stream_time_base(&self, index: usize) -> Option<TimeBase>;

    fn set_tags(&mut self, tags: &[(String, String)]);

    /// Create the destination file.
    fn open(&mut self) -> Result<()>;

    fn write_header(&mut self) -> Result<()>;

    /// Queue a packet and write whatever the interleaving order allows.
    fn write_interleaved(&mut self, packet: EncodedPacket) -> Result<()>;

    /// Write every queued packet and finish the file.
    fn write_trailer(&mut self) -> Result<()>;
}

/// Factory for the components of one conversion.
pub trait CodecEngine {
    type Input: MediaInput;
    type Decoder: AudioDecoder;
    type Resampler: AudioResampler;
    type Encoder: AudioEncoder;
    type Output: MediaOutput;

    fn open_input(&self, path: &Path, hint_extension: Option<&str>) -> Result<Self::Input>;

    fn open_decoder(
        &self,
        input: &Self::Input,
        stream: &AudioStreamInfo,
    ) -> std::result::Result<Self::Decoder, OpenError>;

    /// Pick a container for `path`. Nothing is written until [`MediaOutput::open`].
    fn create_output(&self, path: &Path) -> std::result::Result<Self::Output, OpenError>;

    fn open_encoder(&self, config: &EncoderConfig) -> std::result::Result<Self::Encoder, OpenError>;

    fn open_resampler(&self, from: PcmSpec, to: PcmSpec) -> Result<Self::Resampler>;
}
