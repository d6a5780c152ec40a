//! Moteur de lecture : producteur unique du flux diffusé.
//!
//! ```text
//! Idle → Loading → Streaming → (fin de morceau | échec) → Loading → …
//!                                                    ↘ Stopped (arrêt)
//! ```
//!
//! - **Loading** : le morceau courant est préparé par le cache de
//!   transcodage. En cas d'échec : avertissement, pause courte, morceau
//!   suivant.
//! - **Streaming** : un processus de lecture émet le fichier préparé sur sa
//!   sortie standard, découpée en chunks de taille fixe, diffusés un par un
//!   au rythme de la lecture.
//! - Fin de flux : le processus est récolté. Sortie normale, le dernier
//!   chunk incomplet est diffusé ; plantage, il est jeté. Un processus qui
//!   ferme sa sortie sans se terminer est tué après [`STREAM_EXIT_GRACE`]
//!   et compte comme un plantage. Puis morceau suivant.
//!
//! Un seul processus de lecture existe à tout instant ; il est toujours tué
//! et récolté avant le lancement du suivant et avant la fin de [`PlaybackEngine::run`].

use crate::pacing::ChunkPacer;
use crate::reader::{ChunkReader, ReadChunk};
use crate::registry::ClientRegistry;
use crate::settings::RadioSettings;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use pmoaudiocache::TranscodeCache;
use pmoplaylist::{Playlist, Track};
use pmoutils::{CommandTemplate, ManagedChild, ProcessError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Délai laissé au processus de lecture pour se terminer après la fin de sa
/// sortie ; passé ce délai il est tué et traité comme un plantage.
pub const STREAM_EXIT_GRACE: Duration = Duration::from_secs(2);

/// État du moteur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Loading,
    Streaming,
    Stopped,
}

/// Description publique d'un morceau.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub name: String,
    pub source_path: PathBuf,
    pub cache_key: String,
}

impl From<&Track> for TrackInfo {
    fn from(track: &Track) -> Self {
        Self {
            name: track.name().to_string(),
            source_path: track.source_path().to_path_buf(),
            cache_key: track.cache_key().to_string(),
        }
    }
}

/// Instantané de ce que diffuse la radio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    pub state: EngineState,
    /// Morceau en préparation ou en cours de diffusion
    pub track: Option<TrackInfo>,
    /// Début de la diffusion du morceau
    pub started_at: Option<DateTime<Utc>>,
    /// Chunks diffusés pour ce morceau
    pub chunks_produced: u64,
}

impl Default for NowPlaying {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
            track: None,
            started_at: None,
            chunks_produced: 0,
        }
    }
}

/// Réglages propres au moteur.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub streamer: CommandTemplate,
    pub chunk_size: usize,
    pub chunk_interval: Duration,
    pub skip_backoff: Duration,
}

impl From<&RadioSettings> for EngineConfig {
    fn from(settings: &RadioSettings) -> Self {
        Self {
            streamer: settings.streamer.clone(),
            chunk_size: settings.chunk_size,
            chunk_interval: settings.effective_chunk_interval(),
            skip_backoff: settings.skip_backoff,
        }
    }
}

struct EngineControl {
    cancel: CancellationToken,
    skip: Notify,
}

/// Poignée de pilotage d'un moteur lancé.
#[derive(Clone)]
pub struct EngineHandle {
    control: Arc<EngineControl>,
    status: watch::Receiver<NowPlaying>,
}

impl EngineHandle {
    /// Passe au morceau suivant.
    ///
    /// Demandé hors diffusion (préparation en cours), le saut s'applique au
    /// prochain morceau diffusé. Plusieurs demandes en attente n'en font qu'une.
    pub fn skip(&self) {
        self.control.skip.notify_one();
    }

    /// Demande l'arrêt ; `run` se termine après avoir récolté le processus.
    pub fn stop(&self) {
        self.control.cancel.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.control.cancel.is_cancelled()
    }

    pub fn now_playing(&self) -> NowPlaying {
        self.status.borrow().clone()
    }

    pub fn current_track(&self) -> Option<TrackInfo> {
        self.status.borrow().track.clone()
    }

    pub fn watch(&self) -> watch::Receiver<NowPlaying> {
        self.status.clone()
    }
}

enum StreamOutcome {
    Finished { chunks: u64 },
    Skipped { chunks: u64 },
    Failed { reason: String },
    Cancelled,
}

enum Ending {
    Eof(Option<Bytes>),
    Skipped,
    Cancelled,
}

enum Exit {
    Exited(Result<ExitStatus, ProcessError>),
    Hung,
    Skipped,
    Cancelled,
}

/// Producteur unique du flux.
pub struct PlaybackEngine {
    playlist: Playlist,
    cache: Arc<TranscodeCache>,
    registry: ClientRegistry,
    config: EngineConfig,
    pacer: ChunkPacer,
    control: Arc<EngineControl>,
    status: watch::Sender<NowPlaying>,
    status_rx: watch::Receiver<NowPlaying>,
    consecutive_failures: usize,
}

impl PlaybackEngine {
    pub fn new(
        playlist: Playlist,
        cache: Arc<TranscodeCache>,
        registry: ClientRegistry,
        config: EngineConfig,
    ) -> Self {
        let (status, status_rx) = watch::channel(NowPlaying::default());
        Self {
            playlist,
            cache,
            registry,
            pacer: ChunkPacer::new(config.chunk_interval),
            config,
            control: Arc::new(EngineControl {
                cancel: CancellationToken::new(),
                skip: Notify::new(),
            }),
            status,
            status_rx,
            consecutive_failures: 0,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            control: self.control.clone(),
            status: self.status_rx.clone(),
        }
    }

    /// Boucle principale, jusqu'à l'arrêt.
    ///
    /// À la sortie, l'état est `Stopped` et le registre est fermé.
    pub async fn run(mut self) {
        info!(
            tracks = self.playlist.len(),
            rotation = %self.playlist.rotation(),
            chunk_size = self.config.chunk_size,
            interval_ms = self.config.chunk_interval.as_millis() as u64,
            "Playback engine started"
        );
        let control = self.control.clone();

        loop {
            if control.cancel.is_cancelled() {
                break;
            }

            let track = self.playlist.current().clone();
            self.status.send_modify(|s| {
                s.state = EngineState::Loading;
                s.track = Some(TrackInfo::from(&track));
                s.started_at = None;
                s.chunks_produced = 0;
            });
            debug!(track = %track.name(), "Loading track");

            let loaded = tokio::select! {
                biased;
                _ = control.cancel.cancelled() => break,
                loaded = self.cache.ensure_cached(&track) => loaded,
            };

            let outcome = match loaded {
                Ok(path) => self.stream_track(&track, &path).await,
                Err(e) => StreamOutcome::Failed {
                    reason: e.to_string(),
                },
            };

            match outcome {
                StreamOutcome::Cancelled => break,
                StreamOutcome::Finished { chunks } => {
                    self.consecutive_failures = 0;
                    debug!(track = %track.name(), chunks, "End of track");
                }
                StreamOutcome::Skipped { chunks } => {
                    self.consecutive_failures = 0;
                    info!(track = %track.name(), chunks, "Track skipped");
                }
                StreamOutcome::Failed { reason } => {
                    warn!(track = %track.name(), %reason, "Skipping unplayable track");
                    self.record_failure();
                    let resumed = tokio::select! {
                        biased;
                        _ = control.cancel.cancelled() => false,
                        _ = tokio::time::sleep(self.config.skip_backoff) => true,
                    };
                    if !resumed {
                        break;
                    }
                }
            }

            self.playlist.advance();
        }

        self.status.send_modify(|s| {
            s.state = EngineState::Stopped;
            s.track = None;
            s.started_at = None;
        });
        self.registry.close();
        info!("Playback engine stopped");
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures % self.playlist.len() == 0 {
            error!(
                tracks = self.playlist.len(),
                failures = self.consecutive_failures,
                "No track of the catalog could be played, retrying"
            );
        }
    }

    fn emit(&mut self, chunk: Bytes) {
        let report = self.registry.broadcast(chunk);
        if report.evicted > 0 {
            debug!(
                evicted = report.evicted,
                listeners = report.delivered,
                "Slow listeners evicted"
            );
        }
        self.status.send_modify(|s| s.chunks_produced += 1);
    }

    async fn stream_track(&mut self, track: &Track, path: &Path) -> StreamOutcome {
        let input = path.to_string_lossy().into_owned();
        let mut child = match self.config.streamer.spawn_piped(&[("input", input.as_str())]) {
            Ok(child) => child,
            Err(e) => {
                return StreamOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let Some(stdout) = child.take_stdout() else {
            reap(&mut child, track).await;
            return StreamOutcome::Failed {
                reason: "stream process has no stdout".to_string(),
            };
        };

        let mut reader = ChunkReader::new(stdout, self.config.chunk_size);
        let control = self.control.clone();
        let mut chunks = 0u64;

        self.status.send_modify(|s| {
            s.state = EngineState::Streaming;
            s.started_at = Some(Utc::now());
            s.chunks_produced = 0;
        });
        info!(track = %track.name(), pid = ?child.id(), "Streaming track");

        let ending = loop {
            let read = tokio::select! {
                biased;
                _ = control.cancel.cancelled() => break Ending::Cancelled,
                _ = control.skip.notified() => break Ending::Skipped,
                read = reader.next_chunk() => read,
            };

            match read {
                Ok(ReadChunk::Full(chunk)) => {
                    self.emit(chunk);
                    chunks += 1;
                    tokio::select! {
                        biased;
                        _ = control.cancel.cancelled() => break Ending::Cancelled,
                        _ = control.skip.notified() => break Ending::Skipped,
                        _ = self.pacer.wait() => {}
                    }
                }
                Ok(ReadChunk::Partial(rest)) => break Ending::Eof(Some(rest)),
                Ok(ReadChunk::Eof) => break Ending::Eof(None),
                Err(e) => {
                    warn!(track = %track.name(), "Read error on stream process: {}", e);
                    break Ending::Eof(None);
                }
            }
        };
        drop(reader);

        match ending {
            Ending::Cancelled => {
                reap(&mut child, track).await;
                StreamOutcome::Cancelled
            }
            Ending::Skipped => {
                reap(&mut child, track).await;
                StreamOutcome::Skipped { chunks }
            }
            Ending::Eof(rest) => {
                let exit = tokio::select! {
                    biased;
                    _ = control.cancel.cancelled() => Exit::Cancelled,
                    _ = control.skip.notified() => Exit::Skipped,
                    waited = tokio::time::timeout(STREAM_EXIT_GRACE, child.wait()) => match waited {
                        Ok(status) => Exit::Exited(status),
                        Err(_) => Exit::Hung,
                    },
                };
                let status = match exit {
                    Exit::Cancelled => {
                        reap(&mut child, track).await;
                        return StreamOutcome::Cancelled;
                    }
                    Exit::Skipped => {
                        reap(&mut child, track).await;
                        return StreamOutcome::Skipped { chunks };
                    }
                    Exit::Hung => {
                        warn!(
                            track = %track.name(),
                            grace_ms = STREAM_EXIT_GRACE.as_millis() as u64,
                            "Stream process closed its output but did not exit, killing it"
                        );
                        reap(&mut child, track).await;
                        None
                    }
                    Exit::Exited(Ok(status)) => Some(status),
                    Exit::Exited(Err(e)) => {
                        warn!(track = %track.name(), "Unable to reap stream process: {}", e);
                        None
                    }
                };

                let clean = status.is_some_and(|s| s.success());
                match rest {
                    Some(rest) if clean => {
                        self.emit(rest);
                        chunks += 1;
                        tokio::select! {
                            biased;
                            _ = control.cancel.cancelled() => return StreamOutcome::Cancelled,
                            _ = control.skip.notified() => {}
                            _ = self.pacer.wait() => {}
                        }
                    }
                    Some(rest) => {
                        warn!(
                            track = %track.name(),
                            status = ?status,
                            discarded = rest.len(),
                            "Stream process crashed, trailing bytes discarded"
                        );
                    }
                    None if !clean => {
                        warn!(track = %track.name(), status = ?status, "Stream process crashed");
                    }
                    None => {}
                }

                if chunks == 0 {
                    StreamOutcome::Failed {
                        reason: format!("stream process produced no audio (status {status:?})"),
                    }
                } else {
                    StreamOutcome::Finished { chunks }
                }
            }
        }
    }
}

async fn reap(child: &mut ManagedChild, track: &Track) {
    if let Err(e) = child.terminate().await {
        warn!(track = %track.name(), "Unable to reap stream process: {}", e);
    }
}
