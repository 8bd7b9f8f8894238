use std::path::Path;

use anyhow::{Result, anyhow};

use crate::codec::{AudioStreamInfo, CodecEngine, EncoderConfig, OpenError, PcmSpec};
use crate::decode::{self, SymphoniaDecoder};
use crate::demux::SymphoniaInput;
use crate::encode::LameEncoder;
use crate::mux::Mp3Muxer;
use crate::resample::RubatoResampler;

/// The default [`CodecEngine`]: symphonia in, rubato in the middle, LAME and a plain MP3
/// muxer out.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEngine;

impl CodecEngine for NativeEngine {
    type Input = SymphoniaInput;
    type Decoder = SymphoniaDecoder;
    type Resampler = RubatoResampler;
    type Encoder = LameEncoder;
    type Output = Mp3Muxer;

    fn open_input(&self, path: &Path, hint_extension: Option<&str>) -> Result<Self::Input> {
        SymphoniaInput::open(path, hint_extension)
    }

    fn open_decoder(
        &self,
        input: &Self::Input,
        stream: &AudioStreamInfo,
    ) -> std::result::Result<Self::Decoder, OpenError> {
        let params = input
            .codec_params(stream.index)
            .ok_or_else(|| OpenError::Unsupported(anyhow!("track {} vanished", stream.index)))?;
        if !decode::is_supported(params) {
            return Err(OpenError::Unsupported(anyhow!(
                "no decoder for codec '{}'",
                stream.codec
            )));
        }
        SymphoniaDecoder::new(params, stream.index).map_err(OpenError::Failed)
    }

    fn create_output(&self, path: &Path) -> std::result::Result<Self::Output, OpenError> {
        Mp3Muxer::for_path(path)
    }

    fn open_encoder(&self, config: &EncoderConfig) -> std::result::Result<Self::Encoder, OpenError> {
        LameEncoder::new(config)
    }

    fn open_resampler(&self, from: PcmSpec, to: PcmSpec) -> Result<Self::Resampler> {
        RubatoResampler::new(from, to)
    }
}
