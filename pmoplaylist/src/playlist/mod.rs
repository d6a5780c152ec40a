//! Catalogue de morceaux et curseur de lecture

mod rotation;

pub use rotation::Rotation;

use crate::{Error, Result, Track};
use rand::Rng;
use std::path::Path;
use tracing::{debug, info};

/// Catalogue immuable de morceaux avec un curseur
///
/// Invariant : le catalogue n'est jamais vide et `0 <= index < len`.
#[derive(Debug, Clone)]
pub struct Playlist {
    tracks: Vec<Track>,
    index: usize,
    rotation: Rotation,
}

impl Playlist {
    /// Charge les fichiers d'un répertoire
    ///
    /// Liste non récursive des fichiers réguliers dont l'extension figure
    /// dans `extensions` (sans tenir compte de la casse), triés par nom.
    ///
    /// # Erreurs
    ///
    /// - [`Error::Io`] si le répertoire est illisible
    /// - [`Error::EmptyCatalog`] si aucun fichier ne correspond
    pub fn load<P: AsRef<Path>>(
        directory: P,
        extensions: &[String],
        rotation: Rotation,
    ) -> Result<Self> {
        let directory = directory.as_ref();
        let io_err = |source| Error::Io {
            directory: directory.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(directory).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)));
            if matches {
                paths.push(path);
            }
        }

        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        if paths.is_empty() {
            return Err(Error::EmptyCatalog {
                directory: directory.to_path_buf(),
            });
        }

        info!(
            directory = %directory.display(),
            tracks = paths.len(),
            %rotation,
            "Loaded playlist"
        );

        Self::from_tracks(paths.into_iter().map(Track::from_path).collect(), rotation)
    }

    /// Construit une playlist à partir de morceaux déjà connus
    pub fn from_tracks(tracks: Vec<Track>, rotation: Rotation) -> Result<Self> {
        if tracks.is_empty() {
            return Err(Error::EmptyCatalog {
                directory: Default::default(),
            });
        }

        let index = match rotation {
            Rotation::Sequential => 0,
            Rotation::Random => rand::rng().random_range(0..tracks.len()),
        };

        Ok(Self {
            tracks,
            index,
            rotation,
        })
    }

    /// Morceau sous le curseur
    pub fn current(&self) -> &Track {
        &self.tracks[self.index]
    }

    /// Avance le curseur et retourne le nouveau morceau
    ///
    /// - séquentiel : `(index + 1) mod len`
    /// - aléatoire : tirage uniforme sur `0..len`, le même morceau peut revenir
    pub fn advance(&mut self) -> &Track {
        self.index = match self.rotation {
            Rotation::Sequential => (self.index + 1) % self.tracks.len(),
            Rotation::Random => rand::rng().random_range(0..self.tracks.len()),
        };
        debug!(index = self.index, track = %self.current().name(), "Playlist advanced");
        self.current()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Toujours faux : une playlist vide ne peut pas être construite
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }
}
