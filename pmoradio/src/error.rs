//! Types d'erreurs pour pmoradio

/// Erreurs de démarrage de la radio
///
/// Une fois la radio lancée, les échecs par morceau ne remontent pas : ils
/// sont journalisés et le morceau est sauté.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error(transparent)]
    Playlist(#[from] pmoplaylist::Error),

    #[error("Invalid radio settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Type Result spécialisé pour pmoradio
pub type Result<T> = std::result::Result<T, RadioError>;
