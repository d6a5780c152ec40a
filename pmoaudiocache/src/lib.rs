//! # pmoaudiocache - Cache de pistes transcodées
//!
//! Cette crate spécialise `pmocache` pour préparer les fichiers du
//! catalogue à la diffusion : chaque morceau est converti une fois au débit
//! cible (MP3) par un encodeur externe, puis réutilisé.
//!
//! ## Structure des fichiers
//!
//! ```text
//! cache_radio/
//! ├── cache.db                     # Index SQLite
//! └── {sha1(chemin)}.128k.mp3      # Piste normalisée
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmoaudiocache::{TranscodeCache, TranscodeSettings};
//! use pmoplaylist::Track;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let cache = TranscodeCache::new("./cache_radio", TranscodeSettings::default())?;
//! let track = Track::from_path("/music/song.flac");
//! let path = cache.ensure_cached(&track).await?;
//! println!("Prêt: {}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod transcode;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

pub use cache::{AudioConfig, Cache, CONTENT_TYPE};
pub use transcode::{TranscodeCache, TranscodeError, TranscodeSettings, WarmUpReport};

#[cfg(feature = "pmoconfig")]
pub use config_ext::AudioCacheConfigExt;
