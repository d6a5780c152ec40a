//! Initialisation du logging
//!
//! Le niveau minimal et la sortie console sont lus dans `host.logger` ; le
//! niveau peut être changé à chaud via [`LogState::set_max_level`].

use pmoconfig::get_config;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt, Registry,
};

/// Poignée sur le filtre de niveau du subscriber global
#[derive(Clone)]
pub struct LogState {
    max_level: Arc<RwLock<Level>>,
    reload_handle: reload::Handle<LevelFilter, Registry>,
}

impl LogState {
    fn new(level: Level, reload_handle: reload::Handle<LevelFilter, Registry>) -> Self {
        Self {
            max_level: Arc::new(RwLock::new(level)),
            reload_handle,
        }
    }

    pub fn set_max_level(&self, level: Level) {
        *self
            .max_level
            .write()
            .unwrap_or_else(PoisonError::into_inner) = level;

        if let Err(e) = self.reload_handle.reload(level_to_levelfilter(level)) {
            eprintln!("Failed to reload log level filter: {}", e);
        }
    }

    pub fn get_max_level(&self) -> Level {
        *self
            .max_level
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Installe le subscriber global
///
/// Un second appel (ou un subscriber déjà installé par l'application) est
/// signalé sur stderr ; la poignée retournée reste utilisable mais sans effet.
///
/// # Exemple
///
/// ```rust,no_run
/// use pmoradio::logs::init_logging;
///
/// let logs = init_logging();
/// logs.set_max_level(tracing::Level::DEBUG);
/// ```
pub fn init_logging() -> LogState {
    let config = get_config();

    let level = config
        .get_log_min_level()
        .ok()
        .and_then(|l| string_to_level(&l))
        .unwrap_or(Level::INFO);
    let enable_console = config.get_log_enable_console().unwrap_or(true);

    let (filter, reload_handle) = reload::Layer::new(level_to_levelfilter(level));
    let log_state = LogState::new(level, reload_handle);

    let subscriber = Registry::default().with(filter);
    let result = if enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init()
    } else {
        subscriber.try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }

    log_state
}

pub fn string_to_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

fn level_to_levelfilter(level: Level) -> LevelFilter {
    match level {
        Level::ERROR => LevelFilter::ERROR,
        Level::WARN => LevelFilter::WARN,
        Level::INFO => LevelFilter::INFO,
        Level::DEBUG => LevelFilter::DEBUG,
        Level::TRACE => LevelFilter::TRACE,
    }
}
