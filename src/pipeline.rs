//! The decode → resample → encode → mux loop.
//!
//! One [`TranscodePipeline::convert`] call runs a job through these states:
//!
//! `Idle → Opening → Decoding → Flushing → Finalizing → Completed | Cancelled | Failed`
//!
//! Every component is an owned value inside a `Session`, so any early return releases
//! everything opened so far.
//!
//! Failures while opening end the job. Once the main loop runs, a bad packet, frame or write is
//! logged and skipped; only the trailer write can still fail the job.

use std::thread::JoinHandle;

use tracing::{debug, info, info_span, warn};

use crate::codec::{
    AudioDecoder, AudioEncoder, AudioResampler, AudioStreamInfo, CodecEngine, EncodedPacket,
    EncoderConfig, MediaInput, MediaOutput, OpenError, PcmFrame, SampleFormat, StreamParams,
    TimeBase, rescale_rnd_up,
};
use crate::engine::NativeEngine;
use crate::error::{Error, TranscodeError};
use crate::fifo::SampleFifo;
use crate::job::{CancelFlag, TranscodeEvent, TranscodeJob, TranscodeListener};
use crate::opts::Bitrate;

/// Terminal message of a successful conversion.
pub const SUCCESS_MESSAGE: &str = "Conversion completed successfully";

/// Frame size used when the encoder does not report one.
pub const FALLBACK_FRAME_SIZE: usize = 1152;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Opening,
    Decoding,
    Flushing,
    Finalizing,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

/// How a conversion ended. Mirrors the final [`TranscodeEvent::Finished`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub state: JobState,
    pub success: bool,
    pub message: String,
}

impl Outcome {
    fn completed() -> Self {
        Self {
            state: JobState::Completed,
            success: true,
            message: SUCCESS_MESSAGE.to_string(),
        }
    }

    fn cancelled() -> Self {
        Self {
            state: JobState::Cancelled,
            success: false,
            message: TranscodeError::Cancelled.to_string(),
        }
    }

    fn failed(err: &TranscodeError) -> Self {
        Self {
            state: JobState::Failed,
            success: false,
            message: err.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == JobState::Cancelled
    }
}

/// Converts audio files to MP3.
///
/// The pipeline itself holds no per-job state besides [`JobState`]; a single instance can run
/// many jobs one after another.
pub struct TranscodePipeline<E: CodecEngine = NativeEngine> {
    engine: E,
    state: JobState,
}

impl Default for TranscodePipeline<NativeEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscodePipeline<NativeEngine> {
    pub fn new() -> Self {
        Self::with_engine(NativeEngine)
    }
}

impl<E: CodecEngine> TranscodePipeline<E> {
    pub fn with_engine(engine: E) -> Self {
        Self {
            engine,
            state: JobState::Idle,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run `job` to completion on the current thread.
    ///
    /// Emits `Started`, zero or more `Progress` values and exactly one `Finished`. Never
    /// returns an error: failures are reported through the [`Outcome`] and the final event.
    pub fn convert(&mut self, job: &TranscodeJob, listener: &mut dyn TranscodeListener) -> Outcome {
        let span = info_span!(
            "transcode",
            input = %job.input.display(),
            output = %job.output.display(),
            bitrate = job.bitrate().kbps()
        );
        let _enter = span.enter();

        listener.on_event(TranscodeEvent::Started);
        self.set_state(JobState::Opening);

        let mut session = match Session::open(&self.engine, job) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, cause = ?std::error::Error::source(&err), "failed to open conversion");
                return self.finish(listener, Outcome::failed(&err));
            }
        };

        self.set_state(JobState::Decoding);
        session.run(job.cancel_flag(), listener);

        let cancelled = job.is_cancelled();
        if cancelled {
            info!("conversion cancelled, skipping flush");
        } else {
            self.set_state(JobState::Flushing);
            session.flush();
        }

        self.set_state(JobState::Finalizing);
        let trailer = session.output.write_trailer();
        let stats = session.stats;
        drop(session);

        let outcome = match trailer {
            Ok(()) if cancelled => Outcome::cancelled(),
            Ok(()) => {
                listener.on_event(TranscodeEvent::Progress(100));
                Outcome::completed()
            }
            Err(err) => {
                let err = TranscodeError::WriteTrailer(err);
                warn!(error = %err, cause = ?std::error::Error::source(&err), "trailer write failed");
                if cancelled {
                    Outcome::cancelled()
                } else {
                    Outcome::failed(&err)
                }
            }
        };

        info!(
            packets_in = stats.packets_in,
            frames_encoded = stats.frames_encoded,
            packets_out = stats.packets_out,
            skipped = stats.skipped,
            "conversion finished"
        );
        self.finish(listener, outcome)
    }

    /// Run `job` on a dedicated worker thread.
    ///
    /// Cancel through [`TranscodeJob::cancel_flag`] taken before the call.
    pub fn spawn<L>(mut self, job: TranscodeJob, mut listener: L) -> JoinHandle<Outcome>
    where
        E: Send + 'static,
        L: TranscodeListener + 'static,
    {
        std::thread::spawn(move || self.convert(&job, &mut listener))
    }

    fn set_state(&mut self, state: JobState) {
        debug!(from = ?self.state, to = ?state, "job state");
        self.state = state;
    }

    fn finish(&mut self, listener: &mut dyn TranscodeListener, outcome: Outcome) -> Outcome {
        self.set_state(outcome.state);
        listener.on_event(TranscodeEvent::Finished {
            success: outcome.success,
            message: outcome.message.clone(),
        });
        outcome
    }
}

/// Convert `input` to an MP3 at `bitrate` on the current thread, without progress reporting.
pub fn transcode_file(
    input: impl Into<std::path::PathBuf>,
    output: impl Into<std::path::PathBuf>,
    bitrate: Bitrate,
) -> crate::Result<()> {
    let job = TranscodeJob::new(input, output, bitrate);
    let outcome = TranscodePipeline::new().convert(&job, &mut ());
    if outcome.success {
        Ok(())
    } else {
        Err(Error::msg(outcome.message))
    }
}

/// `pts * 100 / duration`, clamped to `0..=100`.
pub fn progress_percent(pts: u64, duration: u64) -> Option<u8> {
    if duration == 0 {
        return None;
    }
    let pct = (u128::from(pts) * 100 / u128::from(duration)).min(100);
    Some(pct as u8)
}

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    packets_in: u64,
    frames_encoded: u64,
    packets_out: u64,
    skipped: u64,
}

/// Everything one conversion holds open.
struct Session<E: CodecEngine> {
    input: E::Input,
    stream: AudioStreamInfo,
    decoder: E::Decoder,
    resampler: E::Resampler,
    encoder: E::Encoder,
    output: E::Output,
    out_stream: usize,
    out_time_base: TimeBase,
    fifo: SampleFifo,
    frame_size: usize,
    last_progress: Option<u8>,
    stats: Stats,
}

impl<E: CodecEngine> Session<E> {
    fn open(engine: &E, job: &TranscodeJob) -> Result<Self, TranscodeError> {
        let hint = job.opts.hint_extension.as_deref();
        let input = engine
            .open_input(&job.input, hint)
            .map_err(TranscodeError::InputOpen)?;

        let stream = input
            .best_audio_stream()
            .ok_or(TranscodeError::NoAudioStream)?;
        debug!(
            stream = stream.index,
            codec = %stream.codec,
            sample_rate = stream.sample_rate,
            channels = stream.channels,
            "selected audio stream"
        );

        let decoder = engine
            .open_decoder(&input, &stream)
            .map_err(|err| match err {
                OpenError::Unsupported(e) => TranscodeError::DecoderNotFound(e),
                OpenError::Failed(e) => TranscodeError::DecoderOpen(e),
            })?;

        let mut output = engine
            .create_output(&job.output)
            .map_err(|err| TranscodeError::OutputContext(err.into_inner()))?;

        let config = EncoderConfig {
            bitrate: job.opts.bitrate,
            quality: job.opts.quality,
            sample_rate: stream.sample_rate,
            channels: stream.channels,
            format: SampleFormat::F32Planar,
            global_header: output.needs_global_header(),
        };
        let encoder = engine.open_encoder(&config).map_err(|err| match err {
            OpenError::Unsupported(e) => TranscodeError::EncoderNotFound(e),
            OpenError::Failed(e) => TranscodeError::EncoderOpen(e),
        })?;

        let params = StreamParams {
            spec: encoder.input_spec(),
            bit_rate: encoder.bit_rate(),
            time_base: encoder.time_base(),
        };
        let out_stream = output
            .add_audio_stream(&params)
            .map_err(TranscodeError::OutputStream)?;

        output.set_tags(input.tags());
        output.open().map_err(TranscodeError::OutputOpen)?;
        output.write_header().map_err(TranscodeError::WriteHeader)?;
        let out_time_base = output
            .stream_time_base(out_stream)
            .unwrap_or(params.time_base);

        let resampler = engine
            .open_resampler(stream.pcm_spec(), encoder.input_spec())
            .map_err(TranscodeError::ResamplerInit)?;

        let frame_size = encoder
            .frame_size()
            .filter(|n| *n > 0)
            .unwrap_or(FALLBACK_FRAME_SIZE);

        Ok(Self {
            fifo: SampleFifo::new(encoder.input_spec()),
            input,
            stream,
            decoder,
            resampler,
            encoder,
            output,
            out_stream,
            out_time_base,
            frame_size,
            last_progress: None,
            stats: Stats::default(),
        })
    }

    /// Main loop. Returns when the input is exhausted or the job is cancelled.
    fn run(&mut self, cancel: CancelFlag, listener: &mut dyn TranscodeListener) {
        loop {
            let packet = match self.input.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = format!("{err:#}"), "input read failed, ending input");
                    break;
                }
            };

            if cancel.is_cancelled() {
                break;
            }
            if packet.stream_index != self.stream.index {
                continue;
            }
            self.stats.packets_in += 1;

            let pts = packet.pts;
            if let Err(err) = self.decoder.send_packet(Some(packet)) {
                warn!(error = format!("{err:#}"), pts, "skipping packet");
                self.stats.skipped += 1;
                continue;
            }
            if !self.drain_decoder(Some(&cancel), true) {
                break;
            }

            self.report_progress(pts, listener);
        }
    }

    /// Decoder, then resampler, then encoder.
    fn flush(&mut self) {
        match self.decoder.send_packet(None) {
            Ok(()) => {
                self.drain_decoder(None, false);
            }
            Err(err) => warn!(error = format!("{err:#}"), "decoder flush failed"),
        }

        loop {
            let capacity = self.output_capacity(0).max(self.frame_size);
            match self.resampler.convert(None, capacity) {
                Ok(frame) if frame.is_empty() => break,
                Ok(frame) => self.push_fifo(&frame),
                Err(err) => {
                    warn!(error = format!("{err:#}"), "resampler flush failed");
                    break;
                }
            }
        }

        // The last chunk may be short; it is the only partial frame the encoder sees.
        while let Some(frame) = self.fifo.pop_up_to(self.frame_size) {
            self.encode(Some(&frame));
        }
        self.encode(None);
    }

    /// Pull every frame the decoder has ready. Returns `false` if cancellation was seen.
    fn drain_decoder(&mut self, cancel: Option<&CancelFlag>, encode: bool) -> bool {
        loop {
            let frame = match self.decoder.receive_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return true,
                Err(err) => {
                    warn!(error = format!("{err:#}"), "decoder failed, dropping frame");
                    self.stats.skipped += 1;
                    return true;
                }
            };

            if cancel.is_some_and(CancelFlag::is_cancelled) {
                return false;
            }

            self.resample(&frame);
            if encode {
                while let Some(frame) = self.fifo.pop_exact(self.frame_size) {
                    self.encode(Some(&frame));
                }
            }
        }
    }

    /// Room for `incoming` new samples plus whatever the resampler is still holding.
    fn output_capacity(&self, incoming: usize) -> usize {
        let in_rate = self.resampler.input_spec().sample_rate;
        let out_rate = self.resampler.output_spec().sample_rate;
        let samples = self.resampler.delay() + incoming as u64;
        let capacity = rescale_rnd_up(samples, u64::from(out_rate), u64::from(in_rate));
        usize::try_from(capacity).unwrap_or(usize::MAX)
    }

    fn resample(&mut self, frame: &PcmFrame) {
        let capacity = self.output_capacity(frame.frames());
        match self.resampler.convert(Some(frame), capacity) {
            Ok(out) if out.is_empty() => {}
            Ok(out) => self.push_fifo(&out),
            Err(err) => {
                warn!(error = format!("{err:#}"), "resampling failed, dropping frame");
                self.stats.skipped += 1;
            }
        }
    }

    fn push_fifo(&mut self, frame: &PcmFrame) {
        if let Err(err) = self.fifo.push(frame) {
            warn!(error = format!("{err:#}"), "dropping resampled frame");
            self.stats.skipped += 1;
        }
    }

    fn encode(&mut self, frame: Option<&PcmFrame>) {
        if let Err(err) = self.encoder.send_frame(frame) {
            warn!(error = format!("{err:#}"), "encoder rejected frame");
            self.stats.skipped += 1;
        } else if frame.is_some() {
            self.stats.frames_encoded += 1;
        }

        loop {
            match self.encoder.receive_packet() {
                Ok(Some(packet)) => self.write_packet(packet),
                Ok(None) => break,
                Err(err) => {
                    warn!(error = format!("{err:#}"), "encoder failed");
                    break;
                }
            }
        }
    }

    fn write_packet(&mut self, mut packet: EncodedPacket) {
        packet.stream_index = self.out_stream;
        packet.rescale_ts(self.encoder.time_base(), self.out_time_base);
        match self.output.write_interleaved(packet) {
            Ok(()) => self.stats.packets_out += 1,
            Err(err) => {
                warn!(error = format!("{err:#}"), "dropping output packet");
                self.stats.skipped += 1;
            }
        }
    }

    fn report_progress(&mut self, pts: u64, listener: &mut dyn TranscodeListener) {
        let Some(pct) = self
            .stream
            .duration
            .and_then(|duration| progress_percent(pts, duration))
        else {
            return;
        };
        if self.last_progress.is_some_and(|last| pct <= last) {
            return;
        }
        self.last_progress = Some(pct);
        listener.on_event(TranscodeEvent::Progress(pct));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped_and_needs_a_duration() {
        assert_eq!(progress_percent(0, 1000), Some(0));
        assert_eq!(progress_percent(505, 1000), Some(50));
        assert_eq!(progress_percent(5_000, 1000), Some(100));
        assert_eq!(progress_percent(10, 0), None);
        assert_eq!(progress_percent(u64::MAX, 1), Some(100));
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(Outcome::completed().message, SUCCESS_MESSAGE);
        assert_eq!(Outcome::cancelled().message, "Conversion cancelled");
        assert!(!Outcome::cancelled().success);

        let failed = Outcome::failed(&TranscodeError::NoAudioStream);
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.message, "No audio stream found");
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Flushing.is_terminal());
    }
}
