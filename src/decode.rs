//! Decoder helpers built on top of Symphonia.
//!
//! This module isolates codec-level concerns:
//! - constructing a decoder for a selected audio track
//! - decoding packets into planar `f32` frames
//! - handling Symphonia’s error model in a predictable, streaming-friendly way

use std::collections::VecDeque;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use tracing::{debug, trace};

use crate::codec::{AudioDecoder, InputPacket, PcmFrame, PcmSpec};

/// Create a decoder for the given codec parameters.
///
/// This uses Symphonia’s default codec registry and options.
pub fn make_decoder(params: &CodecParameters) -> Result<Box<dyn Decoder>> {
    let decoder_opts: DecoderOptions = Default::default();

    symphonia::default::get_codecs()
        .make(params, &decoder_opts)
        .map_err(|e| anyhow!(e))
        .context("failed to create decoder for audio track")
}

/// Whether the default registry knows this codec at all.
pub fn is_supported(params: &CodecParameters) -> bool {
    symphonia::default::get_codecs()
        .get_codec(params.codec)
        .is_some()
}

/// Decode a packet and immediately hand the decoded buffer to a callback.
///
/// Return value semantics:
/// - `Ok(true)`  → a decoded audio buffer was produced and `on_decoded` ran
/// - `Ok(false)` → packet was skipped or stream ended (recoverable condition)
/// - `Err(_)`    → fatal decoder error
///
/// Error handling policy:
/// - `DecodeError` → skip bad frame (common with some codecs)
/// - `IoError`     → treat as end-of-stream (streaming-friendly)
/// - other errors  → bubble up with context
pub fn decode_packet_and_then(
    decoder: &mut Box<dyn Decoder>,
    packet: &Packet,
    mut on_decoded: impl FnMut(AudioBufferRef<'_>) -> Result<()>,
) -> Result<bool> {
    match decoder.decode(packet) {
        Ok(buf) => {
            on_decoded(buf)?;
            Ok(true)
        }

        // Recoverable: corrupted frame, but decoding can continue.
        Err(SymphoniaError::DecodeError(e)) => {
            debug!(error = e, "skipping undecodable packet");
            Ok(false)
        }

        // Treat IO errors as graceful end-of-stream.
        Err(SymphoniaError::IoError(_)) => Ok(false),

        // Anything else is considered fatal.
        Err(e) => Err(anyhow!(e)).context("decoder failure"),
    }
}

/// [`AudioDecoder`] over a Symphonia decoder.
///
/// Symphonia decodes one packet into one buffer synchronously, so frames are produced in
/// `send_packet` and handed out by `receive_frame`.
pub struct SymphoniaDecoder {
    decoder: Box<dyn Decoder>,
    track_id: u32,
    // Scratch buffer used to copy decoded PCM into planar `f32`.
    sample_buf: Option<SampleBuffer<f32>>,
    pending: VecDeque<PcmFrame>,
    finished: bool,
}

impl SymphoniaDecoder {
    pub fn new(params: &CodecParameters, track_id: u32) -> Result<Self> {
        Ok(Self {
            decoder: make_decoder(params)?,
            track_id,
            sample_buf: None,
            pending: VecDeque::new(),
            finished: false,
        })
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn send_packet(&mut self, packet: Option<InputPacket>) -> Result<()> {
        let Some(packet) = packet else {
            if !self.finished {
                self.finished = true;
                let result = self.decoder.finalize();
                trace!(verify_ok = ?result.verify_ok, "decoder finalized");
            }
            return Ok(());
        };

        anyhow::ensure!(!self.finished, "packet sent after end of stream");

        let packet =
            Packet::new_from_boxed_slice(self.track_id, packet.pts, packet.duration, packet.data);
        let sample_buf = &mut self.sample_buf;
        let pending = &mut self.pending;
        decode_packet_and_then(&mut self.decoder, &packet, |decoded| {
            if let Some(frame) = decoded_to_planar(&decoded, sample_buf)? {
                pending.push_back(frame);
            }
            Ok(())
        })?;

        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<PcmFrame>> {
        Ok(self.pending.pop_front())
    }
}

fn decoded_to_planar(
    decoded: &AudioBufferRef<'_>,
    sample_buf: &mut Option<SampleBuffer<f32>>,
) -> Result<Option<PcmFrame>> {
    let spec = *decoded.spec();
    let channels = spec.channels.count();
    anyhow::ensure!(channels > 0, "decoded audio had zero channels");

    let frames = decoded.frames();
    if frames == 0 {
        return Ok(None);
    }

    let needed = decoded.capacity() * channels;
    if sample_buf.as_ref().is_none_or(|b| b.capacity() < needed) {
        *sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
    }
    let buf = sample_buf
        .as_mut()
        .ok_or_else(|| anyhow!("sample buffer not initialized"))?;

    // Planar layout: all of channel 0, then all of channel 1, ...
    buf.copy_planar_ref(decoded.clone());
    let planes = buf
        .samples()
        .chunks(frames)
        .take(channels)
        .map(<[f32]>::to_vec)
        .collect();

    PcmFrame::new(PcmSpec::f32_planar(spec.rate, channels), planes).map(Some)
}
