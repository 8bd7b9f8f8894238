//! MPEG audio Layer III frame headers.
//!
//! LAME hands back an unframed byte stream. The muxer and the encoder adapter want one packet
//! per MPEG frame, so [`Packetizer`] splits the stream on frame boundaries using the header's
//! bitrate, sample rate and padding bit.

use tracing::warn;

/// Samples per channel in a Layer III frame for MPEG-1.
pub const MPEG1_FRAME_SAMPLES: usize = 1152;
/// Samples per channel in a Layer III frame for MPEG-2 and MPEG-2.5.
pub const MPEG2_FRAME_SAMPLES: usize = 576;

const HEADER_LEN: usize = 4;

const BITRATES_MPEG1: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const BITRATES_MPEG2: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const RATES_MPEG1: [u32; 3] = [44_100, 48_000, 32_000];
const RATES_MPEG2: [u32; 3] = [22_050, 24_000, 16_000];
const RATES_MPEG25: [u32; 3] = [11_025, 12_000, 8_000];

/// Every rate an MPEG Layer III stream can carry.
pub const SUPPORTED_RATES: [u32; 9] = [
    8_000, 11_025, 12_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub channels: usize,
}

impl FrameHeader {
    /// Parse a Layer III header. Free-format and reserved values are rejected.
    pub fn parse(raw: [u8; 4]) -> Option<Self> {
        let word = u32::from_be_bytes(raw);
        if word >> 21 != 0x7FF {
            return None;
        }

        let version = match (word >> 19) & 0b11 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };
        // Layer bits 0b01 mean Layer III.
        if (word >> 17) & 0b11 != 0b01 {
            return None;
        }

        let bitrate_index = ((word >> 12) & 0xF) as usize;
        let rate_index = ((word >> 10) & 0b11) as usize;
        if bitrate_index == 0 || bitrate_index == 0xF || rate_index == 0b11 {
            return None;
        }

        let (bitrates, rates) = match version {
            MpegVersion::Mpeg1 => (&BITRATES_MPEG1, &RATES_MPEG1),
            MpegVersion::Mpeg2 => (&BITRATES_MPEG2, &RATES_MPEG2),
            MpegVersion::Mpeg25 => (&BITRATES_MPEG2, &RATES_MPEG25),
        };

        let channel_mode = (word >> 6) & 0b11;
        Some(Self {
            version,
            bitrate_kbps: bitrates[bitrate_index],
            sample_rate: rates[rate_index],
            padding: (word >> 9) & 1 == 1,
            channels: if channel_mode == 0b11 { 1 } else { 2 },
        })
    }

    pub fn samples_per_frame(&self) -> usize {
        match self.version {
            MpegVersion::Mpeg1 => MPEG1_FRAME_SAMPLES,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => MPEG2_FRAME_SAMPLES,
        }
    }

    /// Whole frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let coefficient = match self.version {
            MpegVersion::Mpeg1 => 144,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 72,
        };
        let len = coefficient * self.bitrate_kbps * 1000 / self.sample_rate;
        len as usize + usize::from(self.padding)
    }
}

/// Samples per channel of a Layer III frame at `sample_rate`.
pub fn frame_samples_for_rate(sample_rate: u32) -> usize {
    if sample_rate >= 32_000 {
        MPEG1_FRAME_SAMPLES
    } else {
        MPEG2_FRAME_SAMPLES
    }
}

/// The closest rate MPEG audio can carry. Rates above 48 kHz prefer an integer divisor.
pub fn nearest_supported_rate(sample_rate: u32) -> u32 {
    if SUPPORTED_RATES.contains(&sample_rate) {
        return sample_rate;
    }
    if sample_rate > 48_000 {
        return if sample_rate % 44_100 == 0 { 44_100 } else { 48_000 };
    }
    SUPPORTED_RATES
        .into_iter()
        .min_by_key(|r| r.abs_diff(sample_rate))
        .unwrap_or(44_100)
}

/// A complete frame split out of the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp3Frame {
    pub header: FrameHeader,
    pub data: Vec<u8>,
}

/// Splits an MP3 byte stream into frames.
#[derive(Debug, Default)]
pub struct Packetizer {
    buf: Vec<u8>,
    skipped: usize,
}

impl Packetizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Option<Mp3Frame> {
        loop {
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let raw = [self.buf[0], self.buf[1], self.buf[2], self.buf[3]];
            let Some(header) = FrameHeader::parse(raw) else {
                self.resync();
                continue;
            };
            if self.skipped > 0 {
                warn!(bytes = self.skipped, "skipped bytes before mp3 frame sync");
                self.skipped = 0;
            }

            let len = header.frame_len();
            if len < HEADER_LEN || self.buf.len() < len {
                return None;
            }
            let data: Vec<u8> = self.buf.drain(..len).collect();
            return Some(Mp3Frame { header, data });
        }
    }

    /// Drop everything before the next valid header. Without one, keep the last
    /// `HEADER_LEN - 1` bytes since they may start a header.
    fn resync(&mut self) {
        let skip = self
            .buf
            .windows(HEADER_LEN)
            .skip(1)
            .position(|w| FrameHeader::parse([w[0], w[1], w[2], w[3]]).is_some())
            .map_or(self.buf.len() - (HEADER_LEN - 1), |pos| pos + 1);
        self.buf.drain(..skip);
        self.skipped += skip;
    }

    /// Bytes left after the last complete frame.
    pub fn take_remainder(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // MPEG-1 Layer III, 192 kbps, 44.1 kHz, no padding, joint stereo.
    const HEADER_192_44K: [u8; 4] = [0xFF, 0xFB, 0xB0, 0x40];

    fn frame_bytes(header: [u8; 4]) -> Vec<u8> {
        let len = FrameHeader::parse(header).expect("valid header").frame_len();
        let mut out = header.to_vec();
        out.resize(len, 0);
        out
    }

    #[test]
    fn parses_cd_rate_header() {
        let header = FrameHeader::parse(HEADER_192_44K).expect("valid header");
        assert_eq!(header.version, MpegVersion::Mpeg1);
        assert_eq!(header.bitrate_kbps, 192);
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.channels, 2);
        assert_eq!(header.samples_per_frame(), 1152);
        assert_eq!(header.frame_len(), 626);
    }

    #[test]
    fn padding_adds_one_byte() {
        let mut raw = HEADER_192_44K;
        raw[2] |= 0b10;
        assert_eq!(FrameHeader::parse(raw).map(|h| h.frame_len()), Some(627));
    }

    #[test]
    fn mpeg2_uses_half_size_frames() {
        // MPEG-2 Layer III, 64 kbps, 22.05 kHz, mono.
        let header = FrameHeader::parse([0xFF, 0xF3, 0x80, 0xC0]).expect("valid header");
        assert_eq!(header.version, MpegVersion::Mpeg2);
        assert_eq!(header.sample_rate, 22_050);
        assert_eq!(header.channels, 1);
        assert_eq!(header.samples_per_frame(), 576);
        assert_eq!(header.frame_len(), 208);
    }

    #[test]
    fn rejects_non_layer3_and_reserved() {
        assert!(FrameHeader::parse([0xFF, 0xFD, 0xB0, 0x40]).is_none()); // layer II
        assert!(FrameHeader::parse([0xFF, 0xFB, 0xF0, 0x40]).is_none()); // bad bitrate
        assert!(FrameHeader::parse([0x49, 0x44, 0x33, 0x04]).is_none()); // "ID3"
    }

    #[test]
    fn packetizer_splits_and_resyncs() {
        let mut stream = vec![0x00, 0x12];
        stream.extend(frame_bytes(HEADER_192_44K));
        stream.extend(frame_bytes(HEADER_192_44K));
        stream.extend_from_slice(&HEADER_192_44K[..3]);

        let mut p = Packetizer::new();
        p.push(&stream[..100]);
        assert!(p.next_frame().is_none());
        p.push(&stream[100..]);

        assert_eq!(p.next_frame().map(|f| f.data.len()), Some(626));
        assert_eq!(p.next_frame().map(|f| f.data.len()), Some(626));
        assert!(p.next_frame().is_none());
        assert_eq!(p.take_remainder().len(), 3);
    }

    #[test]
    fn long_garbage_run_is_skipped_in_one_pass() {
        let mut stream = vec![0x5Au8; 100_000];
        stream.extend(frame_bytes(HEADER_192_44K));

        let mut p = Packetizer::new();
        p.push(&stream[..50_000]);
        assert!(p.next_frame().is_none());
        assert_eq!(p.buf.len(), HEADER_LEN - 1);

        p.push(&stream[50_000..]);
        let frame = p.next_frame().expect("frame after garbage");
        assert_eq!(frame.data[..4], HEADER_192_44K);
        assert_eq!(p.skipped, 0);
        assert!(p.take_remainder().is_empty());
    }

    #[test]
    fn picks_nearest_rate() {
        assert_eq!(nearest_supported_rate(44_100), 44_100);
        assert_eq!(nearest_supported_rate(88_200), 44_100);
        assert_eq!(nearest_supported_rate(96_000), 48_000);
        assert_eq!(nearest_supported_rate(37_800), 32_000);
        assert_eq!(nearest_supported_rate(7_000), 8_000);
        assert_eq!(frame_samples_for_rate(48_000), 1152);
        assert_eq!(frame_samples_for_rate(24_000), 576);
    }
}
