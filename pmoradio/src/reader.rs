//! Découpage de la sortie du processus de lecture en chunks de taille fixe.

use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Résultat d'une lecture de [`ChunkReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadChunk {
    /// Chunk complet
    Full(Bytes),
    /// Reste incomplet avant la fin du flux
    Partial(Bytes),
    /// Fin du flux, plus rien à lire
    Eof,
}

/// Lit un flux par blocs de `chunk_size` octets.
///
/// Chaque bloc est rempli complètement sauf en fin de flux. Les octets déjà
/// lus sont conservés dans le lecteur : abandonner `next_chunk` en cours de
/// route ne perd rien.
pub struct ChunkReader<R> {
    inner: R,
    chunk_size: usize,
    buf: Vec<u8>,
    filled: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(inner: R, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            inner,
            chunk_size,
            buf: vec![0; chunk_size],
            filled: 0,
            eof: false,
        }
    }

    pub async fn next_chunk(&mut self) -> io::Result<ReadChunk> {
        while !self.eof && self.filled < self.chunk_size {
            let n = self.inner.read(&mut self.buf[self.filled..]).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.filled += n;
            }
        }

        if self.filled == 0 {
            return Ok(ReadChunk::Eof);
        }

        let mut data = std::mem::replace(&mut self.buf, vec![0; self.chunk_size]);
        let len = std::mem::take(&mut self.filled);
        if len == self.chunk_size {
            Ok(ReadChunk::Full(Bytes::from(data)))
        } else {
            data.truncate(len);
            Ok(ReadChunk::Partial(Bytes::from(data)))
        }
    }
}
