use sha1::{Digest, Sha1};
use std::path::Path;

/// Génère une clé primaire à partir du chemin d'un fichier source
///
/// La clé est le SHA1 (hexadécimal, 40 caractères) de la représentation
/// textuelle du chemin. Le contenu du fichier n'intervient pas : un fichier
/// modifié sur place conserve sa clé.
///
/// # Exemple
///
/// ```
/// use pmocache::pk_from_path;
///
/// let pk = pk_from_path("/music/track.mp3");
/// assert_eq!(pk.len(), 40);
/// assert_eq!(pk, pk_from_path("/music/track.mp3"));
/// ```
pub fn pk_from_path<P: AsRef<Path>>(path: P) -> String {
    let mut hasher = Sha1::new();
    hasher.update(path.as_ref().to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // sha1("abc")
        assert_eq!(pk_from_path("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_distinct_paths_distinct_keys() {
        assert_ne!(pk_from_path("/music/a.mp3"), pk_from_path("/music/b.mp3"));
    }
}
