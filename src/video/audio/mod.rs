//! Canonical audio format and the ffmpeg-backed audio steps.
//!
//! Every clip that ends up in a stream-copy concat has to share sample rate,
//! channel count and codec, so all producers go through [`AudioFormat`].

pub mod mixer;
pub mod silence;

pub use mixer::AudioMixer;
pub use silence::SilenceGenerator;

use serde::{Deserialize, Serialize};

pub const CANONICAL_SAMPLE_RATE: u32 = 44_100;
const CANONICAL_CODEC: &str = "pcm_s16le";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn channels(self) -> u8 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelLayout::Mono => "mono",
            ChannelLayout::Stereo => "stereo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
}

impl AudioFormat {
    pub fn canonical(layout: ChannelLayout) -> Self {
        Self {
            sample_rate: CANONICAL_SAMPLE_RATE,
            layout,
        }
    }

    /// Output options forcing this format, placed right before the output path.
    pub fn push_output_args(&self, args: &mut Vec<String>) {
        args.extend([
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.layout.channels().to_string(),
            "-c:a".to_string(),
            CANONICAL_CODEC.to_string(),
        ]);
    }

    /// `anullsrc` source description producing silence in this format.
    pub fn null_source(&self) -> String {
        format!(
            "anullsrc=r={}:cl={}",
            self.sample_rate,
            self.layout.name()
        )
    }

    pub fn aformat_filter(&self) -> String {
        format!(
            "aformat=sample_fmts=s16:sample_rates={}:channel_layouts={}",
            self.sample_rate,
            self.layout.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_args_pin_rate_channels_and_codec() {
        let mut args = Vec::new();
        AudioFormat::canonical(ChannelLayout::Stereo).push_output_args(&mut args);
        assert_eq!(args.join(" "), "-ar 44100 -ac 2 -c:a pcm_s16le");
    }

    #[test]
    fn null_source_matches_layout() {
        let mono = AudioFormat::canonical(ChannelLayout::Mono);
        assert_eq!(mono.null_source(), "anullsrc=r=44100:cl=mono");
    }
}
