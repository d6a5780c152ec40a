//! Cadencement temps réel de la production.
//!
//! Le producteur diffuse un chunk puis attend l'échéance suivante. Les
//! échéances sont calculées à partir de la précédente (pas de dérive
//! cumulée) ; si le producteur a pris plus de [`MAX_LAG`] de retard, le
//! calendrier repart de l'instant présent au lieu de rattraper en rafale.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Retard au-delà duquel le calendrier est réinitialisé.
pub const MAX_LAG: Duration = Duration::from_secs(1);

/// Durée de lecture d'un chunk de `chunk_size` octets à `bitrate_kbps`.
pub fn chunk_duration(chunk_size: usize, bitrate_kbps: u32) -> Duration {
    if bitrate_kbps == 0 {
        return Duration::ZERO;
    }
    let bits = chunk_size as u64 * 8;
    Duration::from_micros(bits * 1_000 / bitrate_kbps as u64)
}

/// Calendrier d'émission des chunks.
#[derive(Debug)]
pub struct ChunkPacer {
    interval: Duration,
    next_deadline: Option<Instant>,
}

impl ChunkPacer {
    /// Un intervalle nul désactive le cadencement.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Oublie le calendrier ; la prochaine attente repart de maintenant.
    pub fn reset(&mut self) {
        self.next_deadline = None;
    }

    /// Attend l'échéance du prochain chunk.
    pub async fn wait(&mut self) {
        if self.interval.is_zero() {
            return;
        }

        let now = Instant::now();
        let base = match self.next_deadline {
            Some(deadline) if now.saturating_duration_since(deadline) <= MAX_LAG => deadline,
            Some(deadline) => {
                debug!(
                    lag_ms = now.duration_since(deadline).as_millis() as u64,
                    "Producer fell behind, resetting schedule"
                );
                now
            }
            None => now,
        };

        let deadline = base + self.interval;
        self.next_deadline = Some(deadline);
        tokio::time::sleep_until(deadline).await;
    }
}
