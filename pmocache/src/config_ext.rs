//! Extension pour intégrer la gestion des caches dans pmoconfig
//!
//! Ce module fournit le trait `CacheConfigExt` qui ajoute à
//! `pmoconfig::Config` la lecture du répertoire d'un cache.

use anyhow::Result;
use pmoconfig::Config;

/// Trait d'extension pour ajouter la gestion des caches à pmoconfig
///
/// Les réglages d'un cache vivent sous `{section}.cache` dans la
/// configuration.
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmocache::CacheConfigExt;
///
/// let config = get_config();
/// let cache_dir = config.get_cache_dir("radio", "cache_radio")?;
/// ```
pub trait CacheConfigExt {
    /// Récupère le répertoire d'un cache (absolu, créé si besoin)
    ///
    /// # Arguments
    ///
    /// * `section` - Section de configuration (ex: "radio")
    /// * `default` - Nom de répertoire par défaut si non configuré
    fn get_cache_dir(&self, section: &str, default: &str) -> Result<String>;
}

impl CacheConfigExt for Config {
    fn get_cache_dir(&self, section: &str, default: &str) -> Result<String> {
        self.get_managed_dir(&[section, "cache", "directory"], default)
    }
}
