//! Types d'erreurs pour pmoplaylist

use std::path::PathBuf;

/// Erreurs de gestion de playlist
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No playable track in {}", directory.display())]
    EmptyCatalog { directory: PathBuf },

    #[error("Cannot read music directory {}: {source}", directory.display())]
    Io {
        directory: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown rotation mode: {0}")]
    InvalidRotation(String),
}

/// Type Result spécialisé pour pmoplaylist
pub type Result<T> = std::result::Result<T, Error>;
