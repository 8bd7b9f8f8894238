//! MP3 encoding with LAME.
//!
//! LAME takes any number of samples per call and returns raw MPEG bytes whenever it has
//! finished some frames. This adapter gives it the fixed-frame, packet-at-a-time shape the
//! pipeline expects: frames of exactly [`AudioEncoder::frame_size`] samples (only the last one
//! may be shorter), and one [`EncodedPacket`] per MPEG frame with sample-count timestamps.

use std::collections::VecDeque;

use anyhow::{Result, anyhow, bail, ensure};
use mp3lame_encoder::{Builder, DualPcm, FlushNoGap, InterleavedPcm};
use tracing::{debug, trace};

use crate::codec::{
    AudioEncoder, EncodedPacket, EncoderConfig, OpenError, PcmFrame, PcmSpec, TimeBase,
};
use crate::mp3::{Packetizer, frame_samples_for_rate, nearest_supported_rate};
use crate::opts::{Bitrate, Quality};

/// LAME's advice for the flush buffer.
const FLUSH_BUFFER_LEN: usize = 7200;

pub struct LameEncoder {
    lame: mp3lame_encoder::Encoder,
    spec: PcmSpec,
    bitrate: Bitrate,
    frame_size: usize,
    time_base: TimeBase,

    packetizer: Packetizer,
    ready: VecDeque<EncodedPacket>,
    next_pts: i64,

    // Reusable interleaved `i16` scratch buffer.
    pcm: Vec<i16>,

    short_frame_seen: bool,
    finished: bool,
}

impl LameEncoder {
    /// Configure LAME for `config`.
    ///
    /// Rates MPEG audio cannot carry are replaced by the nearest supported one, and more than
    /// two channels become stereo. [`AudioEncoder::input_spec`] reports the result.
    pub fn new(config: &EncoderConfig) -> std::result::Result<Self, OpenError> {
        let sample_rate = nearest_supported_rate(config.sample_rate);
        let channels = config.channels.clamp(1, 2);

        let mut builder = Builder::new()
            .ok_or_else(|| OpenError::Unsupported(anyhow!("LAME could not be initialized")))?;

        let failed = |what: &str, err: &dyn std::fmt::Debug| {
            OpenError::Failed(anyhow!("failed to set {what}: {err:?}"))
        };
        builder
            .set_num_channels(channels as u8)
            .map_err(|e| failed("channel count", &e))?;
        builder
            .set_sample_rate(sample_rate)
            .map_err(|e| failed("sample rate", &e))?;
        builder
            .set_brate(lame_bitrate(config.bitrate))
            .map_err(|e| failed("bitrate", &e))?;
        builder
            .set_quality(lame_quality(config.quality))
            .map_err(|e| failed("quality", &e))?;

        let lame = builder
            .build()
            .map_err(|e| OpenError::Failed(anyhow!("failed to build LAME encoder: {e:?}")))?;

        debug!(
            sample_rate,
            channels,
            bitrate = %config.bitrate,
            "mp3 encoder opened"
        );

        Ok(Self {
            lame,
            spec: PcmSpec::f32_planar(sample_rate, channels),
            bitrate: config.bitrate,
            frame_size: frame_samples_for_rate(sample_rate),
            time_base: TimeBase::for_sample_rate(sample_rate),
            packetizer: Packetizer::new(),
            ready: VecDeque::new(),
            next_pts: 0,
            pcm: Vec::new(),
            short_frame_seen: false,
            finished: false,
        })
    }

    fn encode_frame(&mut self, frame: &PcmFrame) -> Result<()> {
        ensure!(!self.finished, "frame sent after end of stream");
        ensure!(
            !self.short_frame_seen,
            "frame sent after a short final frame"
        );
        ensure!(
            frame.spec() == self.spec,
            "frame layout {:?} does not match encoder layout {:?}",
            frame.spec(),
            self.spec
        );

        let frames = frame.frames();
        if frames > self.frame_size {
            bail!(
                "frame of {frames} samples exceeds encoder frame size {}",
                self.frame_size
            );
        }
        if frames < self.frame_size {
            self.short_frame_seen = true;
        }
        if frames == 0 {
            return Ok(());
        }

        let mut out = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(
            frames * self.spec.channels,
        ));
        let written = match frame.planes() {
            [mono] => {
                fill_i16(&mut self.pcm, &[mono.as_slice()]);
                let input = DualPcm {
                    left: self.pcm.as_slice(),
                    right: self.pcm.as_slice(),
                };
                self.lame.encode(input, out.spare_capacity_mut())
            }
            [left, right] => {
                fill_i16(&mut self.pcm, &[left.as_slice(), right.as_slice()]);
                self.lame
                    .encode(InterleavedPcm(self.pcm.as_slice()), out.spare_capacity_mut())
            }
            planes => bail!("unsupported channel count {}", planes.len()),
        }
        .map_err(|e| anyhow!("LAME encode failed: {e:?}"))?;

        // SAFETY: LAME initialized exactly `written` bytes of the spare capacity.
        unsafe {
            out.set_len(written);
        }
        trace!(samples = frames, bytes = written, "encoded frame");

        self.packetizer.push(&out);
        self.collect_packets();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut out = Vec::with_capacity(FLUSH_BUFFER_LEN);
        let written = self
            .lame
            .flush::<FlushNoGap>(out.spare_capacity_mut())
            .map_err(|e| anyhow!("LAME flush failed: {e:?}"))?;
        // SAFETY: LAME initialized exactly `written` bytes of the spare capacity.
        unsafe {
            out.set_len(written);
        }

        self.packetizer.push(&out);
        self.collect_packets();

        let rest = self.packetizer.take_remainder();
        if !rest.is_empty() {
            debug!(bytes = rest.len(), "trailing bytes after last mp3 frame");
            self.ready.push_back(EncodedPacket {
                stream_index: 0,
                pts: self.next_pts,
                dts: self.next_pts,
                duration: 0,
                data: rest,
            });
        }
        Ok(())
    }

    fn collect_packets(&mut self) {
        while let Some(frame) = self.packetizer.next_frame() {
            let samples = frame.header.samples_per_frame() as i64;
            let duration = TimeBase::for_sample_rate(frame.header.sample_rate)
                .rescale(samples, self.time_base);
            let pts = self.next_pts;
            self.next_pts += duration;
            self.ready.push_back(EncodedPacket {
                stream_index: 0,
                pts,
                dts: pts,
                duration,
                data: frame.data,
            });
        }
    }
}

impl AudioEncoder for LameEncoder {
    fn input_spec(&self) -> PcmSpec {
        self.spec
    }

    fn frame_size(&self) -> Option<usize> {
        Some(self.frame_size)
    }

    fn time_base(&self) -> TimeBase {
        self.time_base
    }

    fn bit_rate(&self) -> u32 {
        self.bitrate.bits_per_second()
    }

    fn send_frame(&mut self, frame: Option<&PcmFrame>) -> Result<()> {
        match frame {
            Some(frame) => self.encode_frame(frame),
            None => self.finish(),
        }
    }

    fn receive_packet(&mut self) -> Result<Option<EncodedPacket>> {
        Ok(self.ready.pop_front())
    }
}

fn lame_bitrate(bitrate: Bitrate) -> mp3lame_encoder::Bitrate {
    match bitrate {
        Bitrate::Kbps128 => mp3lame_encoder::Bitrate::Kbps128,
        Bitrate::Kbps192 => mp3lame_encoder::Bitrate::Kbps192,
        Bitrate::Kbps256 => mp3lame_encoder::Bitrate::Kbps256,
        Bitrate::Kbps320 => mp3lame_encoder::Bitrate::Kbps320,
    }
}

fn lame_quality(quality: Quality) -> mp3lame_encoder::Quality {
    match quality {
        Quality::Fast => mp3lame_encoder::Quality::Decent,
        Quality::Good => mp3lame_encoder::Quality::Good,
        Quality::Best => mp3lame_encoder::Quality::Best,
    }
}

/// Interleave planar `f32` into `i16`, clamping out-of-range samples.
fn fill_i16(dst: &mut Vec<i16>, planes: &[&[f32]]) {
    dst.clear();
    let frames = planes.first().map_or(0, |p| p.len());
    dst.reserve(frames * planes.len());
    for i in 0..frames {
        for plane in planes {
            let s = plane[i].clamp(-1.0, 1.0);
            dst.push((s * f32::from(i16::MAX)).round() as i16);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SampleFormat;

    fn config(sample_rate: u32, channels: usize) -> EncoderConfig {
        EncoderConfig {
            bitrate: Bitrate::Kbps192,
            quality: Quality::Good,
            sample_rate,
            channels,
            format: SampleFormat::F32Planar,
            global_header: false,
        }
    }

    fn sine(spec: PcmSpec, frames: usize, offset: usize) -> PcmFrame {
        let plane: Vec<f32> = (offset..offset + frames)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / spec.sample_rate as f32).sin() * 0.5)
            .collect();
        PcmFrame::new(spec, vec![plane; spec.channels]).expect("valid frame")
    }

    fn drain(enc: &mut LameEncoder) -> anyhow::Result<Vec<EncodedPacket>> {
        let mut out = Vec::new();
        while let Some(p) = enc.receive_packet()? {
            out.push(p);
        }
        Ok(out)
    }

    #[test]
    fn packets_start_at_zero_and_advance_by_frame() -> anyhow::Result<()> {
        let mut enc = LameEncoder::new(&config(44_100, 2)).map_err(|e| anyhow!(e))?;
        let spec = enc.input_spec();
        assert_eq!(enc.frame_size(), Some(1152));

        let mut packets = Vec::new();
        for i in 0..20 {
            enc.send_frame(Some(&sine(spec, 1152, i * 1152)))?;
            packets.extend(drain(&mut enc)?);
        }
        enc.send_frame(None)?;
        packets.extend(drain(&mut enc)?);

        assert!(!packets.is_empty());
        assert_eq!(packets[0].pts, 0);
        for pair in packets.windows(2) {
            assert_eq!(pair[1].pts, pair[0].pts + 1152);
        }
        Ok(())
    }

    #[test]
    fn short_final_frame_is_flushed() -> anyhow::Result<()> {
        let mut enc = LameEncoder::new(&config(44_100, 1)).map_err(|e| anyhow!(e))?;
        let spec = enc.input_spec();
        assert_eq!(spec.channels, 1);

        enc.send_frame(Some(&sine(spec, 1152, 0)))?;
        enc.send_frame(Some(&sine(spec, 500, 1152)))?;
        let before = drain(&mut enc)?.len();

        enc.send_frame(None)?;
        let flushed = drain(&mut enc)?;
        assert!(!flushed.is_empty(), "flush emitted nothing (had {before} before)");
        Ok(())
    }

    #[test]
    fn frame_after_short_frame_is_rejected() -> anyhow::Result<()> {
        let mut enc = LameEncoder::new(&config(48_000, 2)).map_err(|e| anyhow!(e))?;
        let spec = enc.input_spec();
        enc.send_frame(Some(&sine(spec, 100, 0)))?;
        assert!(enc.send_frame(Some(&sine(spec, 1152, 100))).is_err());
        Ok(())
    }

    #[test]
    fn oversized_frame_is_rejected() -> anyhow::Result<()> {
        let mut enc = LameEncoder::new(&config(48_000, 2)).map_err(|e| anyhow!(e))?;
        let spec = enc.input_spec();
        assert!(enc.send_frame(Some(&sine(spec, 1153, 0))).is_err());
        Ok(())
    }

    #[test]
    fn unsupported_layouts_are_adjusted() -> anyhow::Result<()> {
        let enc = LameEncoder::new(&config(96_000, 6)).map_err(|e| anyhow!(e))?;
        assert_eq!(enc.input_spec(), PcmSpec::f32_planar(48_000, 2));
        assert_eq!(enc.time_base(), TimeBase::for_sample_rate(48_000));
        Ok(())
    }

    #[test]
    fn interleaves_and_clamps() {
        let mut out = Vec::new();
        fill_i16(&mut out, &[&[1.5, 0.0], &[-2.0, 0.5]]);
        assert_eq!(out, vec![i16::MAX, -i16::MAX, 0, 16384]);
    }
}
