//! # pmoradio - Diffusion radio continue
//!
//! Ce crate diffuse en boucle un répertoire de fichiers audio sous la forme
//! d'un flux MP3 unique, partagé par tous les auditeurs.
//!
//! ## Architecture
//!
//! ```text
//! Playlist ──▶ TranscodeCache ──▶ PlaybackEngine ──▶ ClientRegistry ──▶ ClientStream (×N)
//!  (rotation)   (1 encodage/piste)  (lecture cadencée)  (files bornées)
//! ```
//!
//! - un seul producteur ([`PlaybackEngine`]) lit le morceau courant et le
//!   découpe en chunks de taille fixe, au rythme de la lecture
//! - chaque auditeur dispose d'une file bornée ; un auditeur trop lent est
//!   évincé, il ne ralentit jamais les autres
//! - un morceau illisible est sauté après une courte pause, la radio ne
//!   s'arrête pas
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmoradio::{logs::init_logging, Radio};
//!
//! # async fn demo() -> pmoradio::Result<()> {
//! let _logs = init_logging();
//! let radio = Radio::start_configured().await?;
//! println!("{} listeners", radio.listeners());
//! radio.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! La couche HTTP est laissée à l'application : elle sert `radio.subscribe()`
//! (un `futures::Stream<Item = Bytes>`) avec `radio.content_type()`.

pub mod config_ext;
pub mod engine;
pub mod error;
pub mod logs;
pub mod pacing;
pub mod radio;
pub mod reader;
pub mod registry;
pub mod settings;

pub use config_ext::RadioConfigExt;
pub use engine::{EngineConfig, EngineHandle, EngineState, NowPlaying, PlaybackEngine, TrackInfo};
pub use error::{RadioError, Result};
pub use radio::Radio;
pub use registry::{BroadcastReport, ClientId, ClientRegistry, ClientStream, Pop};
pub use settings::RadioSettings;

pub use pmoaudiocache::{TranscodeCache, TranscodeError, TranscodeSettings};
pub use pmoplaylist::{Playlist, Rotation, Track};
