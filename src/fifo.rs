use std::collections::VecDeque;

use anyhow::{Result, ensure};

use crate::codec::{PcmFrame, PcmSpec};

/// Planar sample queue addressed by samples per channel, not bytes.
///
/// Bridges the resampler, which produces whatever it produces, and the encoder, which wants
/// frames of one exact size.
#[derive(Debug)]
pub struct SampleFifo {
    spec: PcmSpec,
    planes: Vec<VecDeque<f32>>,
}

impl SampleFifo {
    pub fn new(spec: PcmSpec) -> Self {
        Self {
            spec,
            planes: vec![VecDeque::new(); spec.channels],
        }
    }

    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    /// Samples per channel currently queued.
    pub fn len(&self) -> usize {
        self.planes.first().map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, frame: &PcmFrame) -> Result<()> {
        ensure!(
            frame.spec() == self.spec,
            "frame layout {:?} does not match fifo layout {:?}",
            frame.spec(),
            self.spec
        );
        for (queue, plane) in self.planes.iter_mut().zip(frame.planes()) {
            queue.extend(plane.iter().copied());
        }
        Ok(())
    }

    /// Remove exactly `n` samples per channel, or nothing if fewer are queued.
    pub fn pop_exact(&mut self, n: usize) -> Option<PcmFrame> {
        if n == 0 || self.len() < n {
            return None;
        }
        Some(self.take(n))
    }

    /// Remove up to `n` samples per channel. `None` when empty.
    pub fn pop_up_to(&mut self, n: usize) -> Option<PcmFrame> {
        let n = n.min(self.len());
        if n == 0 {
            return None;
        }
        Some(self.take(n))
    }

    fn take(&mut self, n: usize) -> PcmFrame {
        let planes: Vec<Vec<f32>> = self
            .planes
            .iter_mut()
            .map(|queue| queue.drain(..n).collect())
            .collect();
        // Every plane has exactly `n` samples and the plane count matches `spec`.
        PcmFrame::new(self.spec, planes).unwrap_or_else(|_| PcmFrame::empty(self.spec))
    }
}
