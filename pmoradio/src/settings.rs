//! Réglages de la radio.

use crate::error::{RadioError, Result};
use crate::pacing::chunk_duration;
use crate::registry::DEFAULT_CLIENT_BUFFER;
use pmoaudiocache::TranscodeSettings;
use pmoplaylist::Rotation;
use pmoutils::CommandTemplate;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_SKIP_BACKOFF: Duration = Duration::from_millis(1000);

/// Everything needed to start a [`Radio`](crate::Radio).
///
/// `Default` mirrors the embedded configuration. Use
/// [`RadioConfigExt::get_radio_settings`](crate::RadioConfigExt::get_radio_settings)
/// to read them from `pmoconfig`.
#[derive(Debug, Clone)]
pub struct RadioSettings {
    /// Directory scanned (non recursively) for source files
    pub music_dir: PathBuf,
    /// Accepted file extensions, case-insensitive
    pub extensions: Vec<String>,
    pub rotation: Rotation,
    /// Transcode cache directory
    pub cache_dir: PathBuf,
    /// Encoder run once per track (`{input}`, `{output}`, `{bitrate}`)
    pub encoder: CommandTemplate,
    /// Process streaming a cached file on stdout (`{input}`)
    pub streamer: CommandTemplate,
    /// Target bitrate in kbit/s
    pub bitrate_kbps: u32,
    /// Size of a broadcast chunk in bytes
    pub chunk_size: usize,
    /// Per-listener queue capacity in chunks
    pub client_buffer: usize,
    /// Delay before skipping a track that failed
    pub skip_backoff: Duration,
    /// Overrides the interval derived from `chunk_size` and `bitrate_kbps`
    pub chunk_interval: Option<Duration>,
    /// Transcode the whole catalog in the background at startup
    pub precache: bool,
}

impl RadioSettings {
    pub fn default_streamer() -> CommandTemplate {
        CommandTemplate::new(
            "ffmpeg",
            [
                "-hide_banner",
                "-loglevel",
                "error",
                "-nostdin",
                "-i",
                "{input}",
                "-vn",
                "-codec:a",
                "copy",
                "-f",
                "mp3",
                "pipe:1",
            ],
        )
    }

    /// Pause between two chunks.
    pub fn effective_chunk_interval(&self) -> Duration {
        self.chunk_interval
            .unwrap_or_else(|| chunk_duration(self.chunk_size, self.bitrate_kbps))
    }

    pub fn transcode_settings(&self) -> TranscodeSettings {
        TranscodeSettings {
            encoder: self.encoder.clone(),
            bitrate_kbps: self.bitrate_kbps,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(RadioError::InvalidSettings(msg.to_string()));
        if self.bitrate_kbps == 0 {
            return invalid("bitrate_kbps must be positive");
        }
        if self.chunk_size == 0 {
            return invalid("chunk_size must be positive");
        }
        if self.client_buffer == 0 {
            return invalid("client_buffer must be positive");
        }
        if self.extensions.is_empty() {
            return invalid("at least one file extension is required");
        }
        if self.encoder.program.is_empty() || self.streamer.program.is_empty() {
            return invalid("encoder and streamer programs are required");
        }
        Ok(())
    }
}

impl Default for RadioSettings {
    fn default() -> Self {
        let transcode = TranscodeSettings::default();
        Self {
            music_dir: PathBuf::from("music"),
            extensions: vec!["mp3".to_string()],
            rotation: Rotation::Sequential,
            cache_dir: PathBuf::from("cache_radio"),
            encoder: transcode.encoder,
            streamer: Self::default_streamer(),
            bitrate_kbps: transcode.bitrate_kbps,
            chunk_size: DEFAULT_CHUNK_SIZE,
            client_buffer: DEFAULT_CLIENT_BUFFER,
            skip_backoff: DEFAULT_SKIP_BACKOFF,
            chunk_interval: None,
            precache: true,
        }
    }
}
