use serde::{Deserialize, Serialize};

/// Video codec family produced by the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    Hevc,
}

impl Codec {
    /// Short tag embedded in playlist and segment filenames.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// One (resolution, bitrate) variant produced by the transcoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

impl Rendition {
    #[must_use]
    pub fn new(
        name: &str,
        width: u32,
        height: u32,
        video_bitrate_kbps: u32,
        audio_bitrate_kbps: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            video_bitrate_kbps,
            audio_bitrate_kbps,
        }
    }

    /// Total HLS bandwidth hint in bits per second.
    #[must_use]
    pub const fn bandwidth(&self) -> u64 {
        (self.video_bitrate_kbps as u64 + self.audio_bitrate_kbps as u64) * 1000
    }

    /// `WxH` string used in `RESOLUTION=` playlist attributes.
    #[must_use]
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Variant playlist filename for this rendition of a stream.
    #[must_use]
    pub fn variant_filename(&self, stream_key: &str, codec: Codec) -> String {
        format!("{}_{}_{}.m3u8", stream_key, codec.tag(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_tags() {
        assert_eq!(Codec::H264.tag(), "h264");
        assert_eq!(Codec::Hevc.tag(), "hevc");
    }

    #[test]
    fn test_rendition_bandwidth() {
        let rendition = Rendition::new("720p", 1280, 720, 2500, 128);
        assert_eq!(rendition.bandwidth(), 2_628_000);
        assert_eq!(rendition.resolution(), "1280x720");
    }

    #[test]
    fn test_variant_filename() {
        let rendition = Rendition::new("480p", 854, 480, 1200, 96);
        assert_eq!(
            rendition.variant_filename("k1", Codec::H264),
            "k1_h264_480p.m3u8"
        );
    }
}
