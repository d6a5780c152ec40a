//! # pmoplaylist - Catalogue de la radio
//!
//! Cette crate fournit le catalogue de morceaux diffusés en boucle :
//! - **Track** : un fichier source et sa clé de cache
//! - **Playlist** : liste immuable chargée depuis un répertoire, avec curseur
//! - **Rotation** : ordre séquentiel ou aléatoire
//!
//! # Exemple d'utilisation
//!
//! ```no_run
//! use pmoplaylist::{Playlist, Rotation};
//!
//! # fn main() -> pmoplaylist::Result<()> {
//! let mut playlist = Playlist::load("./music", &["mp3".to_string()], Rotation::Sequential)?;
//! println!("Playing: {}", playlist.current().name());
//! let next = playlist.advance();
//! println!("Next: {}", next.name());
//! # Ok(())
//! # }
//! ```

mod error;
mod playlist;
mod track;

// Réexports publics
pub use error::{Error, Result};
pub use playlist::{Playlist, Rotation};
pub use track::Track;
