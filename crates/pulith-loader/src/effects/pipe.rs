//! Bounded byte pipe between an upload producer and an engine.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Default pipe capacity, in chunks.
pub const DEFAULT_PIPE_CAPACITY: usize = 4;

/// Create a pipe holding at most `capacity` undrained chunks (minimum 1).
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PipeWriter(tx), PipeReader(rx))
}

#[derive(Debug, Clone)]
pub struct PipeWriter(mpsc::Sender<Bytes>);

impl PipeWriter {
    /// Drain `chunk` into the pipe, waiting for room.
    ///
    /// # Errors
    ///
    /// [`Error::PipeClosed`] if the reader is gone.
    pub async fn write(&self, chunk: Bytes) -> Result<()> {
        self.0.send(chunk).await.map_err(|_| Error::PipeClosed)
    }

    pub fn is_closed(&self) -> bool { self.0.is_closed() }
}

#[derive(Debug)]
pub struct PipeReader(mpsc::Receiver<Bytes>);

impl PipeReader {
    /// Next chunk, or `None` once every writer is gone and the pipe is empty.
    pub async fn read(&mut self) -> Option<Bytes> { self.0.recv().await }

    /// Stop accepting chunks; pending writes fail with [`Error::PipeClosed`].
    pub fn close(&mut self) { self.0.close() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_arrive_in_order() {
        let (writer, mut reader) = pipe(2);
        writer.write(Bytes::from_static(b"a")).await.unwrap();
        writer.write(Bytes::from_static(b"b")).await.unwrap();
        drop(writer);

        assert_eq!(reader.read().await.as_deref(), Some(&b"a"[..]));
        assert_eq!(reader.read().await.as_deref(), Some(&b"b"[..]));
        assert_eq!(reader.read().await, None);
    }

    #[tokio::test]
    async fn write_fails_once_reader_is_gone() {
        let (writer, reader) = pipe(1);
        drop(reader);
        assert!(writer.is_closed());
        assert!(matches!(
            writer.write(Bytes::from_static(b"x")).await,
            Err(Error::PipeClosed)
        ));
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let (writer, mut reader) = pipe(0);
        writer.write(Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(reader.read().await.map(|b| b.len()), Some(1));
    }
}
