//! `trackforge`: FLAC tag editing and streaming MP3 transcoding.
//!
//! This crate provides:
//! - A safe FLAC metadata editor (Vorbis comments and cover art) that rewrites files through a
//!   verified temporary copy
//! - A decode → resample → encode → mux pipeline that turns any symphonia-readable file into a
//!   constant-bitrate MP3, with progress events and cooperative cancellation
//!
//! The library is used by the `trackforge-cli` binary and is meant to be embedded in
//! long-running applications, so nothing in it panics on bad input or exits the process.

// High-level API (most consumers should start here).
pub mod flac;
pub mod job;
pub mod opts;
pub mod pipeline;
pub mod tags;

// Error types shared by both halves of the crate.
pub mod error;

// The codec seam and its default implementation.
pub mod codec;
pub mod engine;

// Building blocks used by the default engine.
pub mod decode;
pub mod demux;
pub mod encode;
pub mod fifo;
pub mod mp3;
pub mod mux;
pub mod resample;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

pub use error::{Error, MetadataError, Result, TranscodeError};
pub use flac::FlacMetadataStore;
pub use job::{CancelFlag, TranscodeEvent, TranscodeJob, TranscodeListener};
pub use opts::{Bitrate, Quality, TranscodeOpts};
pub use pipeline::{JobState, Outcome, TranscodePipeline, transcode_file};
pub use tags::{CoverArt, TagField, TrackTags};
