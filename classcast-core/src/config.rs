use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::{Codec, Rendition};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub transcode: TranscodeConfig,
    pub cleanup: CleanupConfig,
    pub rooms: RoomsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    pub rtmp_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            rtmp_port: 1935,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Transient HLS outputs, deleted after each stream ends.
    pub streams_dir: PathBuf,
    /// Pass-through archival recordings, retained indefinitely.
    pub recordings_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            streams_dir: PathBuf::from("./streams"),
            recordings_dir: PathBuf::from("./recordings"),
        }
    }
}

/// One codec's ordered rendition ladder (highest quality first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecLadder {
    pub codec: Codec,
    pub renditions: Vec<Rendition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// HLS segment duration in seconds.
    pub segment_seconds: u64,
    /// Number of segments kept in each variant playlist.
    pub playlist_window: u32,
    /// Assumed source frame rate, used to force keyframes at segment boundaries.
    pub frame_rate: u32,
    /// Prefer a hardware encoder; falls back to software if it fails to initialize.
    pub hardware_accel: bool,
    /// Always produced.
    pub primary: CodecLadder,
    /// Produced only when the room's codec policy enables it.
    pub secondary: CodecLadder,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            segment_seconds: 1,
            playlist_window: 5,
            frame_rate: 30,
            hardware_accel: false,
            primary: CodecLadder {
                codec: Codec::H264,
                renditions: vec![
                    Rendition::new("720p", 1280, 720, 2500, 128),
                    Rendition::new("480p", 854, 480, 1200, 96),
                    Rendition::new("360p", 640, 360, 700, 64),
                ],
            },
            secondary: CodecLadder {
                codec: Codec::Hevc,
                renditions: vec![
                    Rendition::new("720p", 1280, 720, 1600, 128),
                    Rendition::new("480p", 854, 480, 800, 96),
                ],
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Delay between stream end and HLS artifact deletion, so draining
    /// players can still fetch late segments.
    pub grace_seconds: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { grace_seconds: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// How many chat messages a room retains for late joiners.
    pub chat_retention: usize,
    /// Bounded per-connection outbound queue; overflow drops the connection.
    pub send_queue_capacity: usize,
    /// Disconnect a connection after this much silence.
    pub idle_timeout_seconds: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            chat_retention: 50,
            send_queue_capacity: 256,
            idle_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (CLASSCAST_SERVER_HTTP_PORT, etc.)
        builder = builder.add_source(
            Environment::with_prefix("CLASSCAST")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.transcode.segment_seconds == 0 {
            errors.push("transcode.segment_seconds must be at least 1".to_string());
        }
        if self.transcode.segment_seconds > 2 {
            errors.push("transcode.segment_seconds must be 1 or 2 for low-latency playback".to_string());
        }
        if !(4..=6).contains(&self.transcode.playlist_window) {
            errors.push("transcode.playlist_window must be between 4 and 6".to_string());
        }
        if self.transcode.frame_rate == 0 {
            errors.push("transcode.frame_rate must be positive".to_string());
        }
        if self.transcode.primary.renditions.is_empty() {
            errors.push("transcode.primary must have at least one rendition".to_string());
        }
        if self.transcode.secondary.renditions.is_empty() {
            errors.push("transcode.secondary must have at least one rendition".to_string());
        }
        if self.transcode.primary.codec == self.transcode.secondary.codec {
            errors.push("primary and secondary codec must differ".to_string());
        }
        for rendition in self
            .transcode
            .primary
            .renditions
            .iter()
            .chain(self.transcode.secondary.renditions.iter())
        {
            if rendition.width == 0 || rendition.height == 0 || rendition.video_bitrate_kbps == 0 {
                errors.push(format!("rendition {} has a zero dimension or bitrate", rendition.name));
            }
        }
        if self.paths.streams_dir == self.paths.recordings_dir {
            errors.push("paths.streams_dir and paths.recordings_dir must differ".to_string());
        }
        if self.rooms.chat_retention < 50 {
            errors.push("rooms.chat_retention must retain at least the last 50 messages".to_string());
        }
        if self.rooms.send_queue_capacity == 0 {
            errors.push("rooms.send_queue_capacity must be positive".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// HTTP listen address
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// RTMP listen address
    pub fn rtmp_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.rtmp_port)
    }

    /// RTMP URL the transcoder reads a given stream key from.
    pub fn rtmp_pull_url(&self, stream_key: &str) -> String {
        format!("rtmp://127.0.0.1:{}/live/{}", self.server.rtmp_port, stream_key)
    }
}
