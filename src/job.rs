//! One conversion request and the signals it produces.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use crate::opts::{Bitrate, TranscodeOpts};

/// Shared, clonable cancellation flag.
///
/// Any clone may set it from any thread. The pipeline only polls it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub opts: TranscodeOpts,
    cancel: CancelFlag,
}

impl TranscodeJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, bitrate: Bitrate) -> Self {
        Self::with_opts(input, output, TranscodeOpts::with_bitrate(bitrate))
    }

    pub fn with_opts(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        opts: TranscodeOpts,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            opts,
            cancel: CancelFlag::new(),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn bitrate(&self) -> Bitrate {
        self.opts.bitrate
    }

    /// A handle another thread can use to cancel this job.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeEvent {
    Started,
    /// Percentage in `0..=100`.
    Progress(u8),
    Finished {
        success: bool,
        message: String,
    },
}

/// Receives pipeline events.
///
/// Implementations should return quickly: the worker calls them inline.
pub trait TranscodeListener: Send {
    fn on_event(&mut self, event: TranscodeEvent);
}

impl TranscodeListener for mpsc::Sender<TranscodeEvent> {
    fn on_event(&mut self, event: TranscodeEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// A bounded channel drops `Progress` when full. `Started` and `Finished` wait for room,
/// so the receiver has to be drained before the worker is joined.
impl TranscodeListener for mpsc::SyncSender<TranscodeEvent> {
    fn on_event(&mut self, event: TranscodeEvent) {
        match event {
            TranscodeEvent::Progress(_) => {
                let _ = self.try_send(event);
            }
            _ => {
                let _ = self.send(event);
            }
        }
    }
}

/// Discards every event.
impl TranscodeListener for () {
    fn on_event(&mut self, _event: TranscodeEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_through_clones() {
        let job = TranscodeJob::new("in.flac", "out.mp3", Bitrate::Kbps256);
        let flag = job.cancel_flag();
        assert!(!job.is_cancelled());

        std::thread::spawn(move || flag.cancel())
            .join()
            .expect("cancel thread");
        assert!(job.is_cancelled());
        assert_eq!(job.bitrate(), Bitrate::Kbps256);
    }

    #[test]
    fn sync_sender_drops_progress_but_delivers_finished() {
        let (tx, rx) = mpsc::sync_channel(1);
        let mut listener = tx;
        listener.on_event(TranscodeEvent::Started);
        listener.on_event(TranscodeEvent::Progress(5));

        let worker = std::thread::spawn(move || {
            listener.on_event(TranscodeEvent::Finished {
                success: false,
                message: "Conversion cancelled".to_string(),
            });
        });

        assert_eq!(rx.recv(), Ok(TranscodeEvent::Started));
        assert_eq!(
            rx.recv(),
            Ok(TranscodeEvent::Finished {
                success: false,
                message: "Conversion cancelled".to_string(),
            })
        );
        worker.join().expect("listener thread");
        assert!(rx.recv().is_err());
    }
}
