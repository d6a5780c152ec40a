//! Module de gestion de la base de données SQLite pour le cache
//!
//! Ce module fournit l'index des fichiers publiés dans le cache, avec
//! tracking des accès et des statistiques. Un fichier publié a toujours son
//! entrée : `consolidate` supprime les fichiers non indexés.

use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Entrée de cache représentant une variante publiée dans la base de données
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Clé primaire (hash SHA1 du chemin source)
    pub pk: String,
    /// Qualificatif de la variante (ex: `"128k"`)
    pub qualifier: String,
    /// Chemin source de l'élément
    pub source: String,
    /// Nombre d'accès à l'élément
    pub hits: i64,
    /// Date/heure de publication (RFC3339)
    pub created: String,
    /// Date/heure du dernier accès (RFC3339)
    pub last_used: Option<String>,
}

impl CacheEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            pk: row.get(0)?,
            qualifier: row.get(1)?,
            source: row.get(2)?,
            hits: row.get(3)?,
            created: row.get(4)?,
            last_used: row.get(5)?,
        })
    }
}

const COLUMNS: &str = "pk, qualifier, source, hits, created, last_used";

/// Base de données SQLite pour le cache
///
/// Gère les métadonnées des éléments en cache :
/// - Clés primaires (pk, qualifier) et chemins sources
/// - Statistiques d'utilisation (hits, last_used)
/// - Opérations CRUD de base
#[derive(Debug)]
pub struct DB {
    conn: Mutex<Connection>,
    table_name: String,
}

impl DB {
    /// Initialise une nouvelle base de données avec une table personnalisée
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use pmocache::DB;
    /// use std::path::Path;
    ///
    /// let db = DB::init(Path::new("cache.db"), "audio").unwrap();
    /// ```
    pub fn init(path: &Path, table_name: &str) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    pk TEXT NOT NULL,
                    qualifier TEXT NOT NULL,
                    source TEXT NOT NULL,
                    hits INTEGER DEFAULT 0,
                    created TEXT NOT NULL,
                    last_used TEXT,
                    PRIMARY KEY (pk, qualifier)
                )"
            ),
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            table_name: table_name.to_string(),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Cache database mutex poisoned"))
    }

    /// Enregistre (ou réenregistre) une variante publiée
    pub fn add(&self, pk: &str, qualifier: &str, source: &str) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!(
            "INSERT INTO {} (pk, qualifier, source, hits, created, last_used)
             VALUES (?1, ?2, ?3, 0, ?4, NULL)
             ON CONFLICT(pk, qualifier) DO UPDATE SET
                 source = excluded.source,
                 created = excluded.created",
            self.table_name
        );
        conn.execute(&sql, params![pk, qualifier, source, Utc::now().to_rfc3339()])?;
        Ok(())
    }

    /// Récupère une entrée, `None` si absente
    pub fn get(&self, pk: &str, qualifier: &str) -> Result<Option<CacheEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE pk = ?1 AND qualifier = ?2",
            self.table_name
        );
        match conn.query_row(&sql, params![pk, qualifier], CacheEntry::from_row) {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Met à jour le compteur d'accès et la date du dernier accès
    pub fn update_hit(&self, pk: &str, qualifier: &str) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE {} SET hits = hits + 1, last_used = ?1 WHERE pk = ?2 AND qualifier = ?3",
            self.table_name
        );
        conn.execute(&sql, params![Utc::now().to_rfc3339(), pk, qualifier])?;
        Ok(())
    }

    /// Supprime une entrée
    pub fn delete(&self, pk: &str, qualifier: &str) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!(
            "DELETE FROM {} WHERE pk = ?1 AND qualifier = ?2",
            self.table_name
        );
        conn.execute(&sql, params![pk, qualifier])?;
        Ok(())
    }

    /// Purge toutes les entrées de la base de données
    pub fn purge(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(&format!("DELETE FROM {}", self.table_name), [])?;
        Ok(())
    }

    /// Récupère toutes les entrées, triées par nombre d'accès décroissant
    pub fn get_all(&self) -> Result<Vec<CacheEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {} ORDER BY hits DESC, pk ASC",
            self.table_name
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], CacheEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Compte le nombre total d'entrées dans le cache
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table_name),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_hit_delete() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::init(&dir.path().join("cache.db"), "audio").unwrap();

        assert!(db.get("abc", "128k").unwrap().is_none());

        db.add("abc", "128k", "/music/a.mp3").unwrap();
        db.update_hit("abc", "128k").unwrap();
        db.update_hit("abc", "128k").unwrap();

        let entry = db.get("abc", "128k").unwrap().unwrap();
        assert_eq!(entry.source, "/music/a.mp3");
        assert_eq!(entry.hits, 2);
        assert!(entry.last_used.is_some());

        // Autre variante, même clé
        db.add("abc", "192k", "/music/a.mp3").unwrap();
        assert_eq!(db.count().unwrap(), 2);

        db.delete("abc", "128k").unwrap();
        assert!(db.get("abc", "128k").unwrap().is_none());
        assert_eq!(db.count().unwrap(), 1);

        db.purge().unwrap();
        assert_eq!(db.count().unwrap(), 0);
    }
}
