//! Module du cache audio
//!
//! Ce module spécialise le cache générique de `pmocache` pour les pistes
//! transcodées au débit de diffusion.

use pmocache::CacheConfig;

/// Configuration pour le cache audio
pub struct AudioConfig;

impl CacheConfig for AudioConfig {
    fn file_extension() -> &'static str {
        "mp3"
    }

    fn cache_name() -> &'static str {
        "audio"
    }

    fn default_param() -> &'static str {
        "128k"
    }
}

/// Type alias pour le cache audio
pub type Cache = pmocache::Cache<AudioConfig>;

/// Type MIME des fichiers produits
pub const CONTENT_TYPE: &str = "audio/mpeg";

/// Qualificatif d'une variante pour un débit donné (ex: `"128k"`)
pub fn bitrate_qualifier(bitrate_kbps: u32) -> String {
    format!("{bitrate_kbps}k")
}
