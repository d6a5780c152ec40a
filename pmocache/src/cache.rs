//! Module de gestion du cache générique
//!
//! Ce module fournit un cache de fichiers produits à la demande, indexés
//! dans une base de données SQLite. Un fichier n'est visible sous son nom
//! définitif qu'une fois complètement produit.

use crate::db::{CacheEntry, DB};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Nom du fichier d'index dans le répertoire du cache.
pub const DB_FILE_NAME: &str = "cache.db";

/// Suffixe des fichiers en cours de production.
pub const PART_SUFFIX: &str = "part";

/// Paramètres statiques d'un cache spécialisé.
pub trait CacheConfig: Send + Sync {
    /// Extension des fichiers générés (ex: `"mp3"`).
    fn file_extension() -> &'static str;
    /// Nom du cache (ex: `"audio"`). Sert de nom de table dans l'index.
    fn cache_name() -> &'static str {
        "cache"
    }
    /// Qualifier par défaut (ex: `"orig"`).
    fn default_param() -> &'static str {
        "orig"
    }
}

/// Bilan d'une consolidation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsolidateReport {
    /// Fichiers `*.part` abandonnés supprimés
    pub removed_parts: usize,
    /// Entrées d'index sans fichier supprimées
    pub dropped_rows: usize,
    /// Fichiers publiés sans entrée d'index supprimés
    pub removed_orphans: usize,
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Cache générique de fichiers produits à la demande
///
/// # Paramètres de type
///
/// * `C` - Configuration du cache (implémente `CacheConfig`)
///
/// Les appels à [`Cache::ensure`] pour une même variante `(pk, qualifier)`
/// sont sérialisés ; des variantes différentes sont produites en parallèle.
///
/// Note : Ce type est conçu pour être utilisé derrière un `Arc<Cache>`.
pub struct Cache<C: CacheConfig> {
    /// Répertoire de stockage
    dir: PathBuf,
    /// Base de données SQLite
    pub db: Arc<DB>,
    /// Verrous par variante en cours de production
    locks: Mutex<HashMap<String, KeyLock>>,
    _phantom: std::marker::PhantomData<C>,
}

impl<C: CacheConfig> Cache<C> {
    /// Ouvre (ou crée) un cache dans `dir`.
    pub fn new(dir: &str) -> Result<Self> {
        let directory = PathBuf::from(dir);
        std::fs::create_dir_all(&directory)?;
        let db = DB::init(&directory.join(DB_FILE_NAME), C::cache_name())?;

        Ok(Self {
            dir: directory,
            db: Arc::new(db),
            locks: Mutex::new(HashMap::new()),
            _phantom: std::marker::PhantomData,
        })
    }

    /// Retourne le répertoire du cache
    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    /// Construit le chemin complet d'un fichier avec le param par défaut
    pub fn get_file_path(&self, pk: &str) -> PathBuf {
        self.get_file_path_with_qualifier(pk, C::default_param())
    }

    /// Construit le chemin d'un fichier dans le cache avec un qualificatif
    ///
    /// Format: `{pk}.{qualifier}.{extension}`
    pub fn get_file_path_with_qualifier(&self, pk: &str, qualifier: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{}", pk, qualifier, C::file_extension()))
    }

    fn part_path(&self, pk: &str, qualifier: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{}.{}",
            pk,
            qualifier,
            C::file_extension(),
            PART_SUFFIX
        ))
    }

    /// Indique si la variante est publiée
    pub fn is_ready(&self, pk: &str, qualifier: &str) -> bool {
        self.get_file_path_with_qualifier(pk, qualifier).is_file()
    }

    /// Retourne le chemin de la variante si elle est publiée, en comptant l'accès
    pub fn lookup(&self, pk: &str, qualifier: &str) -> Option<PathBuf> {
        let path = self.get_file_path_with_qualifier(pk, qualifier);
        if !path.is_file() {
            return None;
        }
        if let Err(e) = self.db.update_hit(pk, qualifier) {
            warn!(pk, qualifier, "Unable to update cache hit: {}", e);
        }
        Some(path)
    }

    /// Garantit que la variante `(pk, qualifier)` est publiée
    ///
    /// Si le fichier existe déjà, son chemin est retourné sans appeler
    /// `produce`. Sinon `produce` reçoit le chemin d'un fichier temporaire
    /// à remplir ; le fichier n'est renommé sous son nom définitif que si
    /// `produce` réussit et a écrit au moins un octet. En cas d'échec le
    /// fichier temporaire est supprimé et aucune entrée n'est créée.
    ///
    /// # Arguments
    ///
    /// * `pk` - Clé primaire
    /// * `qualifier` - Qualificatif de la variante
    /// * `source` - Origine enregistrée dans l'index
    /// * `produce` - Producteur du fichier
    pub async fn ensure<F, Fut>(
        &self,
        pk: &str,
        qualifier: &str,
        source: &str,
        produce: F,
    ) -> Result<PathBuf>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let lock_key = format!("{pk}.{qualifier}");
        let lock = self.acquire_key_lock(&lock_key)?;

        let result = {
            let _guard = lock.lock().await;
            self.ensure_locked(pk, qualifier, source, produce).await
        };

        self.release_key_lock(&lock_key, lock);
        result
    }

    async fn ensure_locked<F, Fut>(
        &self,
        pk: &str,
        qualifier: &str,
        source: &str,
        produce: F,
    ) -> Result<PathBuf>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        // Un autre appelant a pu publier pendant l'attente du verrou
        if let Some(path) = self.lookup(pk, qualifier) {
            debug!(pk, qualifier, "Variant already published");
            return Ok(path);
        }

        let final_path = self.get_file_path_with_qualifier(pk, qualifier);
        let part_path = self.part_path(pk, qualifier);
        let _ = tokio::fs::remove_file(&part_path).await;

        let outcome = match produce(part_path.clone()).await {
            Ok(()) => match tokio::fs::metadata(&part_path).await {
                Ok(meta) if meta.len() > 0 => Ok(()),
                Ok(_) => Err(anyhow!("producer wrote an empty file")),
                Err(e) => Err(anyhow!("producer output missing: {}", e)),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(anyhow!("Unable to publish {}: {}", final_path.display(), e));
        }

        // Un fichier sans entrée serait supprimé par `consolidate`
        if let Err(e) = self.db.add(pk, qualifier, source) {
            let _ = tokio::fs::remove_file(&final_path).await;
            return Err(e.context(format!("Unable to index {}", final_path.display())));
        }

        debug!(pk, qualifier, path = %final_path.display(), "Published cache file");
        Ok(final_path)
    }

    fn acquire_key_lock(&self, key: &str) -> Result<KeyLock> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| anyhow!("Cache lock table poisoned"))?;
        Ok(locks.entry(key.to_string()).or_default().clone())
    }

    fn release_key_lock(&self, key: &str, lock: KeyLock) {
        if let Ok(mut locks) = self.locks.lock() {
            // La table et nous : personne d'autre n'attend sur ce verrou
            if Arc::strong_count(&lock) == 2 {
                locks.remove(key);
            }
        }
    }

    /// Liste les entrées de l'index
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        self.db.get_all()
    }

    /// Supprime tous les fichiers et entrées du cache
    pub async fn purge(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && !is_db_file(&path) {
                tokio::fs::remove_file(path).await?;
            }
        }

        self.db.purge()
    }

    /// Consolide le cache
    ///
    /// - supprime les fichiers `*.part` laissés par un producteur interrompu
    /// - supprime les entrées d'index dont le fichier a disparu
    /// - supprime les fichiers publiés sans entrée d'index
    ///
    /// À appeler au démarrage, avant toute production.
    pub async fn consolidate(&self) -> Result<ConsolidateReport> {
        let mut report = ConsolidateReport::default();

        // Supprimer les entrées sans fichiers correspondants
        for entry in self.db.get_all()? {
            if !self.is_ready(&entry.pk, &entry.qualifier) {
                self.db.delete(&entry.pk, &entry.qualifier)?;
                report.dropped_rows += 1;
            }
        }

        let ext_suffix = format!(".{}", C::file_extension());
        let part_suffix = format!(".{PART_SUFFIX}");

        let mut dir_entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir_entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() || is_db_file(&path) {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if file_name.ends_with(&part_suffix) {
                tokio::fs::remove_file(&path).await?;
                report.removed_parts += 1;
                continue;
            }

            // Format attendu: {pk}.{qualifier}.{EXT}
            let Some((pk, qualifier)) = file_name
                .strip_suffix(&ext_suffix)
                .and_then(|stem| stem.split_once('.'))
            else {
                continue;
            };

            if self.db.get(pk, qualifier)?.is_none() {
                tokio::fs::remove_file(&path).await?;
                report.removed_orphans += 1;
            }
        }

        if report != ConsolidateReport::default() {
            info!(
                cache = C::cache_name(),
                removed_parts = report.removed_parts,
                dropped_rows = report.dropped_rows,
                removed_orphans = report.removed_orphans,
                "Cache consolidated"
            );
        }

        Ok(report)
    }
}

fn is_db_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(DB_FILE_NAME))
}
