//! Cache de transcodage
//!
//! Chaque morceau du catalogue est converti une seule fois au débit cible
//! par un encodeur externe, puis servi depuis le cache.

use crate::cache::{bitrate_qualifier, Cache};
use pmocache::ConsolidateReport;
use pmoplaylist::Track;
use pmoutils::CommandTemplate;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Débit cible par défaut (kbit/s)
pub const DEFAULT_BITRATE_KBPS: u32 = 128;

/// Erreurs de transcodage
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Transcoding {} failed: {reason}", path.display())]
    TranscodeFailed { path: PathBuf, reason: String },

    #[error("Source {} unavailable: {reason}", path.display())]
    SourceUnavailable { path: PathBuf, reason: String },
}

impl TranscodeError {
    /// Chemin du fichier source concerné
    pub fn path(&self) -> &Path {
        match self {
            TranscodeError::TranscodeFailed { path, .. }
            | TranscodeError::SourceUnavailable { path, .. } => path,
        }
    }
}

/// Réglages de l'encodeur
///
/// Les arguments de `encoder` peuvent utiliser `{input}`, `{output}` et
/// `{bitrate}` (en kbit/s, sans unité).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSettings {
    pub encoder: CommandTemplate,
    pub bitrate_kbps: u32,
}

impl TranscodeSettings {
    /// Encodeur ffmpeg/LAME vers MP3 stéréo 44,1 kHz
    pub fn default_encoder() -> CommandTemplate {
        CommandTemplate::new(
            "ffmpeg",
            [
                "-hide_banner",
                "-loglevel",
                "error",
                "-nostdin",
                "-y",
                "-i",
                "{input}",
                "-vn",
                "-map_metadata",
                "-1",
                "-codec:a",
                "libmp3lame",
                "-b:a",
                "{bitrate}k",
                "-ar",
                "44100",
                "-ac",
                "2",
                "-f",
                "mp3",
                "{output}",
            ],
        )
    }

    pub fn qualifier(&self) -> String {
        bitrate_qualifier(self.bitrate_kbps)
    }
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            encoder: Self::default_encoder(),
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
        }
    }
}

/// Bilan d'un préchargement du catalogue
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WarmUpReport {
    pub ready: usize,
    pub failed: usize,
}

/// Cache des pistes normalisées au débit de diffusion
///
/// Une entrée publiée n'est jamais réécrite : redemander la même piste ne
/// relance pas l'encodeur. La clé dépend du chemin source seulement ; un
/// fichier modifié sur place n'est pas retranscodé.
pub struct TranscodeCache {
    cache: Cache,
    settings: TranscodeSettings,
    encodes: AtomicU64,
}

impl TranscodeCache {
    /// Ouvre le cache dans `dir`
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use pmoaudiocache::{TranscodeCache, TranscodeSettings};
    ///
    /// let cache = TranscodeCache::new("./cache_radio", TranscodeSettings::default()).unwrap();
    /// ```
    pub fn new(dir: &str, settings: TranscodeSettings) -> anyhow::Result<Self> {
        Ok(Self {
            cache: Cache::new(dir)?,
            settings,
            encodes: AtomicU64::new(0),
        })
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn settings(&self) -> &TranscodeSettings {
        &self.settings
    }

    /// Nombre d'invocations de l'encodeur depuis l'ouverture
    pub fn encoder_runs(&self) -> u64 {
        self.encodes.load(Ordering::Relaxed)
    }

    /// Chemin de la piste si elle est déjà transcodée
    pub fn cached_path(&self, track: &Track) -> Option<PathBuf> {
        let path = self
            .cache
            .get_file_path_with_qualifier(track.cache_key(), &self.settings.qualifier());
        path.is_file().then_some(path)
    }

    /// Nettoie les restes d'une exécution précédente
    pub async fn consolidate(&self) -> anyhow::Result<ConsolidateReport> {
        self.cache.consolidate().await
    }

    /// Garantit que la piste est transcodée et retourne le fichier publié
    ///
    /// - piste déjà publiée : retour immédiat, aucun processus lancé
    /// - source absente ou illisible : [`TranscodeError::SourceUnavailable`],
    ///   l'encodeur n'est pas lancé
    /// - échec de l'encodeur ou sortie vide : [`TranscodeError::TranscodeFailed`],
    ///   rien n'est publié
    ///
    /// Deux appels simultanés pour la même piste ne lancent qu'un encodage.
    pub async fn ensure_cached(&self, track: &Track) -> Result<PathBuf, TranscodeError> {
        let pk = track.cache_key();
        let qualifier = self.settings.qualifier();

        if let Some(path) = self.cache.lookup(pk, &qualifier) {
            debug!(track = %track.name(), pk, "Cache hit");
            return Ok(path);
        }

        let source = track.source_path();
        check_source(source).await?;

        let source_str = source.to_string_lossy().into_owned();
        let bitrate = self.settings.bitrate_kbps.to_string();
        let encoder = &self.settings.encoder;
        let encodes = &self.encodes;

        let result = self
            .cache
            .ensure(pk, &qualifier, &source_str, |part| {
                let source_str = source_str.clone();
                async move {
                    encodes.fetch_add(1, Ordering::Relaxed);
                    let started = Instant::now();
                    info!(track = %track.name(), pk, bitrate = %bitrate, "Transcoding track");

                    let output = part.to_string_lossy().into_owned();
                    encoder
                        .run(&[
                            ("input", source_str.as_str()),
                            ("output", output.as_str()),
                            ("bitrate", bitrate.as_str()),
                        ])
                        .await?;

                    info!(
                        track = %track.name(),
                        pk,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Track transcoded"
                    );
                    Ok(())
                }
            })
            .await;

        result.map_err(|e| TranscodeError::TranscodeFailed {
            path: source.to_path_buf(),
            reason: format!("{e:#}"),
        })
    }

    /// Transcode tout le catalogue, séquentiellement
    ///
    /// Les échecs sont journalisés et comptés sans interrompre le parcours.
    pub async fn warm_up(&self, tracks: &[Track]) -> WarmUpReport {
        let mut report = WarmUpReport::default();
        for track in tracks {
            match self.ensure_cached(track).await {
                Ok(_) => report.ready += 1,
                Err(e) => {
                    warn!(track = %track.name(), "Warm-up failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        info!(ready = report.ready, failed = report.failed, "Cache warm-up finished");
        report
    }
}

async fn check_source(source: &Path) -> Result<(), TranscodeError> {
    let unavailable = |reason: String| TranscodeError::SourceUnavailable {
        path: source.to_path_buf(),
        reason,
    };

    let file = tokio::fs::File::open(source)
        .await
        .map_err(|e| unavailable(e.to_string()))?;
    let meta = file.metadata().await.map_err(|e| unavailable(e.to_string()))?;
    if !meta.is_file() {
        return Err(unavailable("not a regular file".to_string()));
    }
    Ok(())
}
