//! Sample-rate and channel-layout conversion for the encoder.
//!
//! Responsibilities:
//! - Remix decoded planes to the encoder's channel count
//! - Resample to the encoder's rate with rubato (when needed)
//! - Hide rubato's fixed chunking and startup delay behind [`AudioResampler`]
//!
//! Output is trimmed so that, once flushed, exactly `ceil(total_in * out_rate / in_rate)`
//! samples per channel have been produced.

use std::collections::VecDeque;

use anyhow::{Context, Result, anyhow, ensure};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::codec::{AudioResampler, PcmFrame, PcmSpec, rescale_rnd_up};

/// How many source frames we feed rubato per `process()` call.
const CHUNK_FRAMES: usize = 1024;

pub struct RubatoResampler {
    input: PcmSpec,
    output: PcmSpec,

    // `None` when the rates match and only remixing is needed.
    resampler: Option<SincFixedIn<f32>>,

    // Remixed input waiting for a full rubato chunk.
    input_acc: Vec<Vec<f32>>,

    // Converted samples not yet handed out.
    output_acc: Vec<VecDeque<f32>>,

    // Leading output samples still to discard (rubato's filter delay).
    trim_remaining: usize,

    total_in: u64,
    total_out: u64,
    flushed: bool,
}

impl RubatoResampler {
    pub fn new(input: PcmSpec, output: PcmSpec) -> Result<Self> {
        ensure!(input.sample_rate > 0 && output.sample_rate > 0, "sample rate must be non-zero");
        ensure!(input.channels > 0 && output.channels > 0, "channel count must be non-zero");

        let resampler = if input.sample_rate == output.sample_rate {
            None
        } else {
            let rs = SincFixedIn::<f32>::new(
                output.sample_rate as f64 / input.sample_rate as f64,
                2.0,
                SincInterpolationParameters {
                    sinc_len: 256,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: 256,
                    window: WindowFunction::BlackmanHarris2,
                },
                CHUNK_FRAMES,
                output.channels,
            )
            .map_err(|e| anyhow!(e))
            .context("failed to init resampler")?;
            Some(rs)
        };

        let trim_remaining = resampler.as_ref().map_or(0, |rs| rs.output_delay());
        debug!(
            from_rate = input.sample_rate,
            to_rate = output.sample_rate,
            from_channels = input.channels,
            to_channels = output.channels,
            trim = trim_remaining,
            "resampler configured"
        );

        Ok(Self {
            input,
            output,
            resampler,
            input_acc: vec![Vec::new(); output.channels],
            output_acc: vec![VecDeque::new(); output.channels],
            trim_remaining,
            total_in: 0,
            total_out: 0,
            flushed: false,
        })
    }

    /// Output samples per channel a fully flushed resampler will have produced.
    fn expected_total_out(&self) -> u64 {
        rescale_rnd_up(
            self.total_in,
            u64::from(self.output.sample_rate),
            u64::from(self.input.sample_rate),
        )
    }

    fn buffered_out(&self) -> usize {
        self.output_acc.first().map_or(0, VecDeque::len)
    }

    fn push_input(&mut self, frame: &PcmFrame) -> Result<()> {
        ensure!(!self.flushed, "input after flush");
        ensure!(
            frame.spec().sample_rate == self.input.sample_rate,
            "frame rate {} does not match resampler input rate {}",
            frame.spec().sample_rate,
            self.input.sample_rate
        );

        let remixed = remix(frame.planes(), self.output.channels);
        self.total_in += frame.frames() as u64;

        if self.resampler.is_none() {
            for (acc, plane) in self.output_acc.iter_mut().zip(remixed) {
                acc.extend(plane);
            }
            return Ok(());
        }

        for (acc, plane) in self.input_acc.iter_mut().zip(remixed) {
            acc.extend(plane);
        }
        self.process_full_chunks()
    }

    fn process_full_chunks(&mut self) -> Result<()> {
        let Some(rs) = self.resampler.as_mut() else {
            return Ok(());
        };

        loop {
            let needed = rs.input_frames_next();
            if self.input_acc.first().map_or(0, Vec::len) < needed {
                return Ok(());
            }
            let block: Vec<Vec<f32>> = self
                .input_acc
                .iter_mut()
                .map(|acc| acc.drain(..needed).collect::<Vec<f32>>())
                .collect();
            let out = rs
                .process(&block, None)
                .map_err(|e| anyhow!(e))
                .context("resampler process failed")?;
            append_trimmed(&mut self.output_acc, &mut self.trim_remaining, out);
        }
    }

    /// Push whatever input is left through rubato, then keep feeding silence until the
    /// filter tail is out. Everything past the expected total is padding and is dropped.
    fn drain_resampler(&mut self) -> Result<()> {
        let expected = self.expected_total_out();
        let Some(rs) = self.resampler.as_mut() else {
            return Ok(());
        };

        if self.input_acc.first().is_some_and(|acc| !acc.is_empty()) {
            let rest = std::mem::replace(
                &mut self.input_acc,
                vec![Vec::new(); self.output.channels],
            );
            let out = rs
                .process_partial(Some(rest.as_slice()), None)
                .map_err(|e| anyhow!(e))
                .context("resampler flush failed")?;
            append_trimmed(&mut self.output_acc, &mut self.trim_remaining, out);
        }

        let produced = |acc: &[VecDeque<f32>], total_out: u64| {
            total_out + acc.first().map_or(0, VecDeque::len) as u64
        };

        // Each empty call advances rubato by one chunk; bound the loop in case it stalls.
        let max_rounds = rs.output_delay() / CHUNK_FRAMES + 4;
        let mut rounds = 0;
        while produced(&self.output_acc, self.total_out) < expected && rounds < max_rounds {
            let out = rs
                .process_partial::<Vec<f32>>(None, None)
                .map_err(|e| anyhow!(e))
                .context("resampler flush failed")?;
            append_trimmed(&mut self.output_acc, &mut self.trim_remaining, out);
            rounds += 1;
        }

        let keep = expected.saturating_sub(self.total_out);
        let keep = usize::try_from(keep).unwrap_or(usize::MAX);
        for acc in &mut self.output_acc {
            acc.truncate(keep);
        }
        Ok(())
    }

    fn take_output(&mut self, max_out: usize) -> Result<PcmFrame> {
        let n = max_out.min(self.buffered_out());
        let planes: Vec<Vec<f32>> = self
            .output_acc
            .iter_mut()
            .map(|acc| acc.drain(..n).collect())
            .collect();
        self.total_out += n as u64;
        PcmFrame::new(self.output, planes)
    }
}

impl AudioResampler for RubatoResampler {
    fn input_spec(&self) -> PcmSpec {
        self.input
    }

    fn output_spec(&self) -> PcmSpec {
        self.output
    }

    fn delay(&self) -> u64 {
        // Everything produced-but-not-taken plus the filter's own latency, at the input rate.
        let pending_out = self.buffered_out() as u64
            + self.resampler.as_ref().map_or(0, |rs| rs.output_delay()) as u64;
        let pending_in = self.input_acc.first().map_or(0, Vec::len) as u64;
        pending_in
            + rescale_rnd_up(
                pending_out,
                u64::from(self.input.sample_rate),
                u64::from(self.output.sample_rate),
            )
    }

    fn convert(&mut self, input: Option<&PcmFrame>, max_out: usize) -> Result<PcmFrame> {
        match input {
            Some(frame) => self.push_input(frame)?,
            None if !self.flushed => {
                self.drain_resampler()?;
                self.flushed = true;
            }
            None => {}
        }
        self.take_output(max_out)
    }
}

fn append_trimmed(acc: &mut [VecDeque<f32>], trim: &mut usize, out: Vec<Vec<f32>>) {
    let len = out.first().map_or(0, Vec::len);
    let skip = (*trim).min(len);
    *trim -= skip;
    for (dst, plane) in acc.iter_mut().zip(out) {
        dst.extend(plane.into_iter().skip(skip));
    }
}

/// Map `planes` onto `out_channels` channels.
///
/// Policy:
/// - same count: copy
/// - to mono: equal-weight average of all channels
/// - from mono: duplicate into every output channel
/// - otherwise: input channel `i` feeds output `i % out_channels`, averaged per output
pub fn remix(planes: &[Vec<f32>], out_channels: usize) -> Vec<Vec<f32>> {
    let in_channels = planes.len();
    let frames = planes.first().map_or(0, Vec::len);

    if in_channels == out_channels {
        return planes.to_vec();
    }
    if in_channels == 1 {
        return vec![planes[0].clone(); out_channels];
    }

    let mut out = vec![vec![0.0f32; frames]; out_channels];
    let mut contributors = vec![0usize; out_channels];
    for (i, plane) in planes.iter().enumerate() {
        let target = if out_channels == 1 { 0 } else { i % out_channels };
        contributors[target] += 1;
        for (dst, src) in out[target].iter_mut().zip(plane) {
            *dst += *src;
        }
    }
    for (plane, n) in out.iter_mut().zip(contributors) {
        if n > 1 {
            let scale = 1.0 / n as f32;
            plane.iter_mut().for_each(|s| *s *= scale);
        }
    }
    out
}
