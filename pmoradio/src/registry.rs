//! Registre des auditeurs et diffusion des chunks.
//!
//! Chaque auditeur possède sa propre file bornée (`tokio::sync::mpsc`).
//! Le producteur ne fait jamais que des `try_send` : un auditeur dont la
//! file est pleine est évincé sur le champ, il ne ralentit jamais le flux
//! commun.
//!
//! Le verrou du registre ne protège que l'ensemble des auditeurs ; il est
//! pris pour inscrire, désinscrire et photographier cet ensemble, jamais
//! pendant les envois.

use std::{
    collections::HashMap,
    fmt,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, trace};

/// Capacité par défaut de la file d'un auditeur (en chunks).
pub const DEFAULT_CLIENT_BUFFER: usize = 100;

/// Identifiant d'un auditeur, unique pour la durée de vie du registre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Résultat d'un appel à [`ClientRegistry::broadcast`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Auditeurs ayant reçu le chunk
    pub delivered: usize,
    /// Auditeurs évincés pendant cet appel
    pub evicted: usize,
}

/// Résultat d'une tentative de lecture côté auditeur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop {
    /// Chunk suivant du flux
    Chunk(Bytes),
    /// Rien pour l'instant ; la connexion peut être maintenue
    Timeout,
    /// Flux terminé (évincé, désinscrit ou radio arrêtée)
    Closed,
}

struct ClientSlot {
    tx: mpsc::Sender<Bytes>,
    alive: Arc<AtomicBool>,
}

struct RegistryInner {
    clients: Mutex<HashMap<ClientId, ClientSlot>>,
    next_id: AtomicU64,
    capacity: usize,
    evictions: AtomicU64,
    closed: AtomicBool,
}

impl RegistryInner {
    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, ClientSlot>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unregister(&self, id: ClientId) -> bool {
        let removed = self.clients().remove(&id);
        match removed {
            Some(slot) => {
                slot.alive.store(false, Ordering::SeqCst);
                debug!(client = %id, "Client unregistered");
                true
            }
            None => false,
        }
    }

    fn evict(&self, id: ClientId, reason: &str) -> bool {
        let removed = self.clients().remove(&id);
        match removed {
            Some(slot) => {
                slot.alive.store(false, Ordering::SeqCst);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(client = %id, reason, "Client evicted");
                true
            }
            // Désinscrit entre la photographie et l'envoi
            None => false,
        }
    }
}

/// Ensemble des auditeurs connectés.
///
/// Clonable à bas coût ; tous les clones partagent le même ensemble.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.len())
            .field("capacity", &self.inner.capacity)
            .field("evictions", &self.evictions())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_BUFFER)
    }
}

impl ClientRegistry {
    /// Crée un registre dont chaque auditeur dispose de `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                clients: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                evictions: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Inscrit un nouvel auditeur, file vide.
    ///
    /// Le premier chunk reçu sera le prochain diffusé. Après [`close`](Self::close),
    /// le flux retourné est déjà fermé.
    pub fn register(&self) -> ClientStream {
        let id = ClientId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let alive = Arc::new(AtomicBool::new(true));

        {
            let mut clients = self.inner.clients();
            if self.inner.closed.load(Ordering::SeqCst) {
                alive.store(false, Ordering::SeqCst);
            } else {
                clients.insert(
                    id,
                    ClientSlot {
                        tx,
                        alive: alive.clone(),
                    },
                );
            }
        }

        if alive.load(Ordering::SeqCst) {
            debug!(client = %id, "Client registered");
        }

        ClientStream {
            id,
            rx,
            alive,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Désinscrit un auditeur. Retourne `false` s'il n'était plus inscrit.
    pub fn unregister(&self, id: ClientId) -> bool {
        self.inner.unregister(id)
    }

    /// Diffuse un chunk à tous les auditeurs inscrits, sans jamais attendre.
    ///
    /// Un auditeur dont la file est pleine, ou dont le côté lecture a
    /// disparu, est évincé immédiatement.
    pub fn broadcast(&self, chunk: Bytes) -> BroadcastReport {
        let snapshot: Vec<(ClientId, mpsc::Sender<Bytes>)> = self
            .inner
            .clients()
            .iter()
            .map(|(id, slot)| (*id, slot.tx.clone()))
            .collect();

        let mut report = BroadcastReport::default();
        for (id, tx) in snapshot {
            match tx.try_send(chunk.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    if self.inner.evict(id, "buffer full") {
                        report.evicted += 1;
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    if self.inner.evict(id, "receiver dropped") {
                        report.evicted += 1;
                    }
                }
            }
        }

        trace!(
            delivered = report.delivered,
            evicted = report.evicted,
            bytes = chunk.len(),
            "Chunk broadcast"
        );
        report
    }

    /// Ferme le registre : tous les auditeurs sont libérés et les
    /// inscriptions suivantes reçoivent un flux fermé.
    pub fn close(&self) {
        let drained: Vec<ClientSlot> = {
            let mut clients = self.inner.clients();
            self.inner.closed.store(true, Ordering::SeqCst);
            clients.drain().map(|(_, slot)| slot).collect()
        };
        for slot in &drained {
            slot.alive.store(false, Ordering::SeqCst);
        }
        if !drained.is_empty() {
            debug!(clients = drained.len(), "Registry closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Nombre d'auditeurs inscrits.
    pub fn len(&self) -> usize {
        self.inner.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacité de la file de chaque auditeur.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Nombre total d'évictions depuis la création.
    pub fn evictions(&self) -> u64 {
        self.inner.evictions.load(Ordering::Relaxed)
    }
}

/// Côté lecture d'un auditeur.
///
/// S'utilise soit par [`pop`](Self::pop) avec un délai (le délai écoulé
/// n'est pas une erreur, il sert au keep-alive), soit comme
/// `futures::Stream<Item = Bytes>`. Un auditeur évincé est fermé dès la
/// lecture suivante, même si des chunks restent dans sa file.
///
/// L'abandon du flux le désinscrit.
pub struct ClientStream {
    id: ClientId,
    rx: mpsc::Receiver<Bytes>,
    alive: Arc<AtomicBool>,
    registry: Weak<RegistryInner>,
}

impl fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStream")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl ClientStream {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// `false` une fois évincé, désinscrit ou le registre fermé.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Attend le prochain chunk au plus `timeout`.
    pub async fn pop(&mut self, timeout: Duration) -> Pop {
        if !self.is_alive() {
            return Pop::Closed;
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(chunk)) if self.is_alive() => Pop::Chunk(chunk),
            Ok(Some(_)) => Pop::Closed,
            Ok(None) => {
                self.alive.store(false, Ordering::SeqCst);
                Pop::Closed
            }
            Err(_) => Pop::Timeout,
        }
    }

    /// Lecture sans attente ; une file vide donne [`Pop::Timeout`].
    pub fn try_pop(&mut self) -> Pop {
        if !self.is_alive() {
            return Pop::Closed;
        }
        match self.rx.try_recv() {
            Ok(chunk) => Pop::Chunk(chunk),
            Err(TryRecvError::Empty) => Pop::Timeout,
            Err(TryRecvError::Disconnected) => {
                self.alive.store(false, Ordering::SeqCst);
                Pop::Closed
            }
        }
    }

    /// Quitte explicitement le flux.
    pub fn close(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.unregister(self.id);
        }
        self.alive.store(false, Ordering::SeqCst);
        self.rx.close();
    }
}

impl Stream for ClientStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.is_alive() {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) if self.is_alive() => Poll::Ready(Some(chunk)),
            Poll::Ready(Some(_)) => Poll::Ready(None),
            Poll::Ready(None) => {
                self.alive.store(false, Ordering::SeqCst);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.unregister(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister_counts() {
        let registry = ClientRegistry::new(4);
        let a = registry.register();
        let b = registry.register();
        assert_eq!(registry.len(), 2);
        assert_ne!(a.id(), b.id());

        assert!(registry.unregister(a.id()));
        assert!(!registry.unregister(a.id()));
        assert_eq!(registry.len(), 1);

        drop(b);
        assert!(registry.is_empty());
        // La désinscription par abandon est idempotente avec la précédente
        drop(a);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_zero_clients_broadcast() {
        let registry = ClientRegistry::new(4);
        let report = registry.broadcast(Bytes::from_static(b"chunk"));
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(registry.evictions(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ClientRegistry::new(0).capacity(), 1);
    }

    #[test]
    fn test_try_pop() {
        let registry = ClientRegistry::new(4);
        let mut client = registry.register();
        assert_eq!(client.try_pop(), Pop::Timeout);
        registry.broadcast(Bytes::from_static(b"x"));
        assert_eq!(client.try_pop(), Pop::Chunk(Bytes::from_static(b"x")));
        client.close();
        assert_eq!(client.try_pop(), Pop::Closed);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closed_receiver_is_evicted() {
        let registry = ClientRegistry::new(4);
        let mut client = registry.register();
        // Côté lecture fermé sans désinscription
        client.rx.close();

        let report = registry.broadcast(Bytes::from_static(b"x"));
        assert_eq!(report.evicted, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(registry.evictions(), 1);
        assert!(!client.is_alive());
        assert!(registry.is_empty());
    }
}
