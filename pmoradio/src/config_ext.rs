//! Extension pour lire les réglages de la radio depuis pmoconfig
//!
//! Toutes les clés vivent sous `radio:`. Le cache, l'encodeur et le débit
//! sont lus par [`AudioCacheConfigExt`].

use crate::error::{RadioError, Result};
use crate::registry::DEFAULT_CLIENT_BUFFER;
use crate::settings::{RadioSettings, DEFAULT_CHUNK_SIZE, DEFAULT_SKIP_BACKOFF};
use pmoaudiocache::AudioCacheConfigExt;
use pmoconfig::Config;
use pmoplaylist::Rotation;
use pmoutils::CommandTemplate;
use std::path::PathBuf;
use std::time::Duration;

const SECTION: &str = "radio";
const DEFAULT_MUSIC_DIR: &str = "music";

/// Trait d'extension pour la configuration de la radio
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmoradio::RadioConfigExt;
///
/// let settings = get_config().get_radio_settings()?;
/// ```
pub trait RadioConfigExt {
    /// Répertoire du catalogue (relatif au config_dir, créé si absent)
    fn get_music_dir(&self) -> Result<String>;

    fn get_extensions(&self) -> Vec<String>;

    /// Une valeur inconnue est refusée
    fn get_rotation(&self) -> Result<Rotation>;

    fn get_chunk_size(&self) -> usize;

    fn get_client_buffer(&self) -> usize;

    fn get_skip_backoff(&self) -> Duration;

    /// `None` quand `chunk_interval_ms` vaut 0
    fn get_chunk_interval(&self) -> Option<Duration>;

    fn get_precache(&self) -> bool;

    fn get_streamer_command(&self) -> CommandTemplate;

    /// Assemble et valide les réglages complets
    fn get_radio_settings(&self) -> Result<RadioSettings>;
}

impl RadioConfigExt for Config {
    fn get_music_dir(&self) -> Result<String> {
        Ok(self.get_managed_dir(&[SECTION, "music_dir"], DEFAULT_MUSIC_DIR)?)
    }

    fn get_extensions(&self) -> Vec<String> {
        self.get_string_list_or(&[SECTION, "extensions"], &["mp3"])
    }

    fn get_rotation(&self) -> Result<Rotation> {
        let value = self.get_string_or(&[SECTION, "rotation"], Rotation::Sequential.as_str());
        Ok(value.parse::<Rotation>()?)
    }

    fn get_chunk_size(&self) -> usize {
        self.get_usize_or(&[SECTION, "chunk_size"], DEFAULT_CHUNK_SIZE)
    }

    fn get_client_buffer(&self) -> usize {
        self.get_usize_or(&[SECTION, "client_buffer"], DEFAULT_CLIENT_BUFFER)
    }

    fn get_skip_backoff(&self) -> Duration {
        let default = DEFAULT_SKIP_BACKOFF.as_millis() as usize;
        Duration::from_millis(self.get_usize_or(&[SECTION, "skip_backoff_ms"], default) as u64)
    }

    fn get_chunk_interval(&self) -> Option<Duration> {
        match self.get_usize_or(&[SECTION, "chunk_interval_ms"], 0) {
            0 => None,
            ms => Some(Duration::from_millis(ms as u64)),
        }
    }

    fn get_precache(&self) -> bool {
        self.get_bool_or(&[SECTION, "precache"], true)
    }

    fn get_streamer_command(&self) -> CommandTemplate {
        let default = RadioSettings::default_streamer();
        let program = self.get_string_or(&[SECTION, "streamer", "program"], &default.program);
        let default_args: Vec<&str> = default.args.iter().map(String::as_str).collect();
        let args = self.get_string_list_or(&[SECTION, "streamer", "args"], &default_args);
        CommandTemplate::new(program, args)
    }

    fn get_radio_settings(&self) -> Result<RadioSettings> {
        let transcode = self.get_transcode_settings();
        let settings = RadioSettings {
            music_dir: PathBuf::from(self.get_music_dir()?),
            extensions: self.get_extensions(),
            rotation: self.get_rotation()?,
            cache_dir: PathBuf::from(self.get_audiocache_dir()?),
            encoder: transcode.encoder,
            streamer: self.get_streamer_command(),
            bitrate_kbps: transcode.bitrate_kbps,
            chunk_size: self.get_chunk_size(),
            client_buffer: self.get_client_buffer(),
            skip_backoff: self.get_skip_backoff(),
            chunk_interval: self.get_chunk_interval(),
            precache: self.get_precache(),
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_embedded_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        let settings = config.get_radio_settings().unwrap();
        assert_eq!(settings.music_dir, dir.path().join("music"));
        assert_eq!(settings.cache_dir, dir.path().join("cache_radio"));
        assert_eq!(settings.extensions, vec!["mp3".to_string()]);
        assert_eq!(settings.rotation, Rotation::Sequential);
        assert_eq!(settings.bitrate_kbps, 128);
        assert_eq!(settings.chunk_size, 4096);
        assert_eq!(settings.client_buffer, 100);
        assert_eq!(settings.skip_backoff, Duration::from_millis(1000));
        assert_eq!(settings.chunk_interval, None);
        assert!(settings.precache);
        assert_eq!(settings.streamer, RadioSettings::default_streamer());
    }

    #[test]
    fn test_overrides_are_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        config.set_usize(&["radio", "chunk_interval_ms"], 20).unwrap();
        config.set_usize(&["radio", "chunk_size"], 1024).unwrap();
        config
            .set_value(&["radio", "rotation"], "Random".into())
            .unwrap();

        assert_eq!(config.get_chunk_interval(), Some(Duration::from_millis(20)));
        assert_eq!(config.get_chunk_size(), 1024);
        assert_eq!(config.get_rotation().unwrap(), Rotation::Random);
    }

    #[test]
    fn test_unknown_rotation_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        config
            .set_value(&["radio", "rotation"], "backwards".into())
            .unwrap();

        assert!(matches!(
            config.get_radio_settings(),
            Err(RadioError::Playlist(pmoplaylist::Error::InvalidRotation(_)))
        ));
    }
}
