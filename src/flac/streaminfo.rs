/// Technical stream properties carried by a STREAMINFO block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    /// Inter-channel samples; zero means unknown.
    pub total_samples: u64,
}

/// STREAMINFO is always exactly this long; shorter blocks are malformed.
pub const STREAMINFO_LEN: usize = 34;

impl StreamInfo {
    /// Decode the rate/channel/depth/length fields. Returns `None` for blocks shorter than 34 bytes.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < STREAMINFO_LEN {
            return None;
        }

        // Bytes 10..14: 20 bits sample rate, 3 bits channels-1, 5 bits bps-1, 4 high bits of
        // the 36-bit sample count.
        let word = u32::from_be_bytes([data[10], data[11], data[12], data[13]]);
        let sample_rate = word >> 12;
        let channels = ((word >> 9) & 0x7) as u8 + 1;
        let bits_per_sample = ((word >> 4) & 0x1F) as u8 + 1;

        let low = u32::from_be_bytes([data[14], data[15], data[16], data[17]]);
        let total_samples = (u64::from(word & 0xF) << 32) | u64::from(low);

        Some(Self {
            sample_rate,
            channels,
            bits_per_sample,
            total_samples,
        })
    }
}

#[cfg(test)]
pub(crate) fn encode_for_tests(info: StreamInfo) -> Vec<u8> {
    let mut data = vec![0u8; STREAMINFO_LEN];
    // min/max block size
    data[0..2].copy_from_slice(&4096u16.to_be_bytes());
    data[2..4].copy_from_slice(&4096u16.to_be_bytes());
    let word = (info.sample_rate << 12)
        | (u32::from(info.channels - 1) << 9)
        | (u32::from(info.bits_per_sample - 1) << 4)
        | ((info.total_samples >> 32) as u32 & 0xF);
    data[10..14].copy_from_slice(&word.to_be_bytes());
    data[14..18].copy_from_slice(&(info.total_samples as u32).to_be_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cd_quality_stream() {
        let info = StreamInfo {
            sample_rate: 44_100,
            channels: 2,
            bits_per_sample: 16,
            total_samples: 132_300,
        };
        assert_eq!(StreamInfo::parse(&encode_for_tests(info)), Some(info));
    }

    #[test]
    fn keeps_all_36_bits_of_the_sample_count() {
        let info = StreamInfo {
            sample_rate: 192_000,
            channels: 8,
            bits_per_sample: 24,
            total_samples: 0xA_1234_5678,
        };
        assert_eq!(StreamInfo::parse(&encode_for_tests(info)), Some(info));
    }

    #[test]
    fn short_blocks_are_ignored() {
        assert_eq!(StreamInfo::parse(&[0u8; 33]), None);
    }
}
