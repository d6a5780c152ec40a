//! Façade de la radio : assemble catalogue, cache, moteur et registre.

use crate::config_ext::RadioConfigExt;
use crate::engine::{EngineConfig, EngineHandle, NowPlaying, PlaybackEngine, TrackInfo};
use crate::error::Result;
use crate::registry::{ClientRegistry, ClientStream};
use crate::settings::RadioSettings;
use pmoaudiocache::{TranscodeCache, WarmUpReport, CONTENT_TYPE};
use pmoconfig::get_config;
use pmoplaylist::Playlist;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Une radio en cours de diffusion.
///
/// Tous les auditeurs reçoivent le même flux, à partir du moment où ils
/// s'abonnent. La radio tourne jusqu'à [`Radio::shutdown`] ; la lâcher
/// sans l'arrêter demande l'arrêt du moteur sans l'attendre.
///
/// # Exemple
///
/// ```rust,no_run
/// use pmoradio::{Pop, Radio, RadioSettings};
/// use std::time::Duration;
///
/// # async fn demo() -> pmoradio::Result<()> {
/// let radio = Radio::start(RadioSettings::default()).await?;
/// let mut listener = radio.subscribe();
/// while let Pop::Chunk(chunk) = listener.pop(Duration::from_secs(5)).await {
///     // écrire `chunk` vers le client HTTP
///     let _ = chunk;
/// }
/// radio.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Radio {
    registry: ClientRegistry,
    cache: Arc<TranscodeCache>,
    engine: EngineHandle,
    engine_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    warm_up: Option<WarmUpReport>,
    settings: RadioSettings,
}

impl Radio {
    /// Démarre la radio.
    ///
    /// Avec `precache`, tout le catalogue est transcodé avant le lancement du
    /// moteur : un seul processus externe tourne à la fois.
    ///
    /// Échoue si les réglages sont invalides, si le catalogue est vide ou
    /// illisible, ou si le cache ne peut pas être ouvert. Doit être appelé
    /// depuis un runtime tokio.
    pub async fn start(settings: RadioSettings) -> Result<Self> {
        settings.validate()?;

        let playlist = Playlist::load(&settings.music_dir, &settings.extensions, settings.rotation)?;
        info!(
            directory = %settings.music_dir.display(),
            tracks = playlist.len(),
            rotation = %playlist.rotation(),
            "Catalog loaded"
        );

        let cache_dir = settings.cache_dir.to_string_lossy();
        let cache = Arc::new(TranscodeCache::new(&cache_dir, settings.transcode_settings())?);
        if let Err(e) = cache.consolidate().await {
            warn!(directory = %cache_dir, "Unable to consolidate transcode cache: {:#}", e);
        }

        let registry = ClientRegistry::new(settings.client_buffer);

        let warm_up = if settings.precache {
            Some(cache.warm_up(playlist.tracks()).await)
        } else {
            None
        };

        let engine = PlaybackEngine::new(
            playlist,
            cache.clone(),
            registry.clone(),
            EngineConfig::from(&settings),
        );
        let handle = engine.handle();
        let engine_task = tokio::spawn(engine.run());

        Ok(Self {
            registry,
            cache,
            engine: handle,
            engine_task: tokio::sync::Mutex::new(Some(engine_task)),
            warm_up,
            settings,
        })
    }

    /// Démarre la radio avec les réglages de `pmoconfig`.
    pub async fn start_configured() -> Result<Self> {
        let settings = get_config().get_radio_settings()?;
        Self::start(settings).await
    }

    /// Abonne un nouvel auditeur, à partir du prochain chunk diffusé.
    pub fn subscribe(&self) -> ClientStream {
        self.registry.register()
    }

    /// Morceau en préparation ou en cours de diffusion.
    pub fn current_track(&self) -> Option<TrackInfo> {
        self.engine.current_track()
    }

    pub fn now_playing(&self) -> NowPlaying {
        self.engine.now_playing()
    }

    /// Suit les changements d'état du moteur.
    pub fn watch_now_playing(&self) -> watch::Receiver<NowPlaying> {
        self.engine.watch()
    }

    /// Passe au morceau suivant.
    pub fn skip(&self) {
        self.engine.skip();
    }

    /// Nombre d'auditeurs inscrits.
    pub fn listeners(&self) -> usize {
        self.registry.len()
    }

    /// Nombre total d'auditeurs évincés pour lenteur.
    pub fn evictions(&self) -> u64 {
        self.registry.evictions()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<TranscodeCache> {
        &self.cache
    }

    pub fn settings(&self) -> &RadioSettings {
        &self.settings
    }

    /// Type MIME du flux diffusé.
    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    /// Bilan du préchargement fait au démarrage, `None` sans préchargement.
    pub fn warm_up_report(&self) -> Option<WarmUpReport> {
        self.warm_up
    }

    /// Arrête la radio.
    ///
    /// Au retour, le processus de lecture est récolté et tous les auditeurs
    /// voient leur flux fermé. Les appels suivants n'ont aucun effet.
    pub async fn shutdown(&self) {
        self.engine.stop();

        if let Some(task) = self.engine_task.lock().await.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Playback engine panicked: {}", e);
                }
            }
            info!("Radio stopped");
        }

        self.registry.close();
    }
}

impl Drop for Radio {
    fn drop(&mut self) {
        self.engine.stop();
    }
}
