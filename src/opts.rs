use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Constant bitrate presets offered for MP3 output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Bitrate {
    #[cfg_attr(feature = "cli", value(name = "128"))]
    Kbps128,
    #[default]
    #[cfg_attr(feature = "cli", value(name = "192"))]
    Kbps192,
    #[cfg_attr(feature = "cli", value(name = "256"))]
    Kbps256,
    #[cfg_attr(feature = "cli", value(name = "320"))]
    Kbps320,
}

impl Bitrate {
    pub const ALL: [Bitrate; 4] = [
        Bitrate::Kbps128,
        Bitrate::Kbps192,
        Bitrate::Kbps256,
        Bitrate::Kbps320,
    ];

    pub fn kbps(self) -> u32 {
        match self {
            Bitrate::Kbps128 => 128,
            Bitrate::Kbps192 => 192,
            Bitrate::Kbps256 => 256,
            Bitrate::Kbps320 => 320,
        }
    }

    pub fn bits_per_second(self) -> u32 {
        self.kbps() * 1000
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kbps", self.kbps())
    }
}

impl FromStr for Bitrate {
    type Err = String;

    /// Accepts `192`, `192k`, `192kbps` or the full bits-per-second value `192000`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        let digits = trimmed
            .trim_end_matches("kbps")
            .trim_end_matches('k')
            .trim();
        let value: u32 = digits
            .parse()
            .map_err(|_| format!("invalid bitrate '{s}'"))?;
        let kbps = if value >= 1000 { value / 1000 } else { value };

        Bitrate::ALL
            .into_iter()
            .find(|b| b.kbps() == kbps)
            .ok_or_else(|| format!("unsupported bitrate '{s}' (expected 128, 192, 256 or 320)"))
    }
}

/// Encoder effort, traded against speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Quality {
    Fast,
    #[default]
    Good,
    Best,
}

/// Options that control how a conversion is performed.
///
/// This struct represents *library-level configuration*, not CLI flags directly.
/// The CLI is responsible for mapping user input into this type so that
/// other frontends (tests, batch jobs) can construct options programmatically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscodeOpts {
    /// Target constant bitrate of the MP3 stream.
    pub bitrate: Bitrate,

    /// LAME quality setting.
    pub quality: Quality,

    /// Optional container hint (e.g. "flac", "ogg", "m4a").
    ///
    /// When unset the input path's extension is used.
    pub hint_extension: Option<String>,
}

impl TranscodeOpts {
    pub fn with_bitrate(bitrate: Bitrate) -> Self {
        Self {
            bitrate,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_bitrate_spellings() {
        assert_eq!("128".parse::<Bitrate>(), Ok(Bitrate::Kbps128));
        assert_eq!("192k".parse::<Bitrate>(), Ok(Bitrate::Kbps192));
        assert_eq!("256kbps".parse::<Bitrate>(), Ok(Bitrate::Kbps256));
        assert_eq!("320000".parse::<Bitrate>(), Ok(Bitrate::Kbps320));
    }

    #[test]
    fn rejects_bitrates_outside_the_presets() {
        assert!("160".parse::<Bitrate>().is_err());
        assert!("fast".parse::<Bitrate>().is_err());
    }

    #[test]
    fn bits_per_second_matches_preset() {
        assert_eq!(Bitrate::Kbps192.bits_per_second(), 192_000);
        assert_eq!(Bitrate::default(), Bitrate::Kbps192);
    }
}
