//! Extension pour intégrer le cache de transcodage dans pmoconfig
//!
//! Ce module fournit le trait `AudioCacheConfigExt` qui ajoute à
//! `pmoconfig::Config` la lecture des réglages du cache (`radio.cache`,
//! `radio.encoder`, `radio.bitrate_kbps`).

use crate::transcode::{TranscodeSettings, DEFAULT_BITRATE_KBPS};
use anyhow::Result;
use pmocache::CacheConfigExt;
use pmoconfig::Config;
use pmoutils::CommandTemplate;

const DEFAULT_AUDIO_CACHE_DIR: &str = "cache_radio";
const SECTION: &str = "radio";

/// Trait d'extension pour gérer le cache de transcodage dans pmoconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmoaudiocache::AudioCacheConfigExt;
///
/// let config = get_config();
/// let settings = config.get_transcode_settings();
/// ```
pub trait AudioCacheConfigExt {
    /// Répertoire du cache (default: "cache_radio", relatif au config_dir)
    fn get_audiocache_dir(&self) -> Result<String>;

    /// Commande de l'encodeur (`radio.encoder.program` / `radio.encoder.args`)
    fn get_encoder_command(&self) -> CommandTemplate;

    /// Débit cible en kbit/s
    fn get_bitrate_kbps(&self) -> u32;

    /// Réglages complets de l'encodeur
    fn get_transcode_settings(&self) -> TranscodeSettings {
        TranscodeSettings {
            encoder: self.get_encoder_command(),
            bitrate_kbps: self.get_bitrate_kbps(),
        }
    }
}

impl AudioCacheConfigExt for Config {
    fn get_audiocache_dir(&self) -> Result<String> {
        self.get_cache_dir(SECTION, DEFAULT_AUDIO_CACHE_DIR)
    }

    fn get_encoder_command(&self) -> CommandTemplate {
        let default = TranscodeSettings::default_encoder();
        let program = self.get_string_or(&[SECTION, "encoder", "program"], &default.program);
        let default_args: Vec<&str> = default.args.iter().map(String::as_str).collect();
        let args = self.get_string_list_or(&[SECTION, "encoder", "args"], &default_args);
        CommandTemplate::new(program, args)
    }

    fn get_bitrate_kbps(&self) -> u32 {
        self.get_usize_or(&[SECTION, "bitrate_kbps"], DEFAULT_BITRATE_KBPS as usize) as u32
    }
}
