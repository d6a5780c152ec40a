//! Track : un morceau du catalogue

use pmocache::pk_from_path;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Un morceau du catalogue
///
/// Immuable après création. La clé de cache est dérivée du chemin source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    source_path: PathBuf,
    cache_key: String,
    name: String,
}

impl Track {
    /// Crée un morceau à partir de son chemin source
    ///
    /// Le nom affiché est le nom du fichier sans extension.
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        let source_path = path.into();
        let cache_key = pk_from_path(&source_path);
        let name = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_path.to_string_lossy().into_owned());

        Self {
            source_path,
            cache_key,
            name,
        }
    }

    /// Chemin du fichier source
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Clé dans le cache de transcodage
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Nom affiché
    pub fn name(&self) -> &str {
        &self.name
    }
}
