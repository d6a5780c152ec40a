//! # pmocache - Cache générique de fichiers produits à la demande
//!
//! Cette crate fournit un cache de fichiers sur disque indexé par une base
//! SQLite. Elle sert de base à `pmoaudiocache` (pistes transcodées au débit
//! de diffusion).
//!
//! ## Vue d'ensemble
//!
//! `pmocache` fournit les composants de base pour :
//! - Calculer une clé stable à partir du chemin d'un fichier source
//! - Produire un fichier au plus une fois par variante, même sous concurrence
//! - Publier atomiquement (fichier temporaire puis renommage)
//! - Suivre les statistiques d'utilisation (hits, dernière utilisation)
//! - Consolider et purger le cache
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmocache::{pk_from_path, Cache, CacheConfig};
//!
//! struct MyConfig;
//! impl CacheConfig for MyConfig {
//!     fn file_extension() -> &'static str { "dat" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = Cache::<MyConfig>::new("./cache")?;
//!     let pk = pk_from_path("/data/input.txt");
//!
//!     let path = cache
//!         .ensure(&pk, "orig", "/data/input.txt", |part| async move {
//!             tokio::fs::copy("/data/input.txt", part).await?;
//!             Ok(())
//!         })
//!         .await?;
//!     println!("Fichier stocké à: {:?}", path);
//!     Ok(())
//! }
//! ```
//!
//! ## Structure des fichiers
//!
//! ```text
//! cache/
//! ├── cache.db                      # Base de données SQLite
//! ├── 1a2b3c4d….128k.mp3            # Variante publiée
//! └── 5e6f7a8b….128k.mp3.part       # Production en cours
//! ```
//!
//! ## Schéma de base de données
//!
//! ```sql
//! CREATE TABLE {cache_name} (
//!     pk TEXT,                       -- Clé (hash SHA1 du chemin source)
//!     qualifier TEXT,                -- Variante (ex: 128k)
//!     source TEXT,                   -- Chemin source
//!     hits INTEGER DEFAULT 0,        -- Nombre d'accès
//!     created TEXT,                  -- Publication (RFC3339)
//!     last_used TEXT,                -- Dernière utilisation (RFC3339)
//!     PRIMARY KEY (pk, qualifier)
//! );
//! ```

pub mod cache;
pub mod db;
pub mod key;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

pub use cache::{Cache, CacheConfig, ConsolidateReport};
pub use db::{CacheEntry, DB};
pub use key::pk_from_path;

#[cfg(feature = "pmoconfig")]
pub use config_ext::CacheConfigExt;
