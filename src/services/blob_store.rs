//! On-disk payload storage.
//!
//! Blobs are immutable files named by UUID and sharded beneath
//! `root/{aa}/{bb}/{uuid}`. Every write lands in a temporary file first and
//! is renamed into place only after it has been fully written and synced, so
//! a blob path either does not exist or holds complete content. Shard
//! directories are never pruned, since a concurrent writer may be about to
//! create a file in one.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

const COPY_BUF_LEN: usize = 64 * 1024;

/// Result of writing one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenBlob {
    pub id: Uuid,
    pub size_bytes: i64,
    /// Lowercase hex MD5 of the blob content.
    pub etag: String,
}

#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

/// Removes a temporary file when dropped unless it was persisted. Covers
/// both error returns and futures cancelled mid-upload.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != ErrorKind::NotFound {
                    debug!("failed to remove temp file {}: {}", self.path.display(), err);
                }
            }
        }
    }
}

/// Streams bytes into a temporary file while hashing them.
struct BlobWriter {
    id: Uuid,
    final_path: PathBuf,
    guard: TempFileGuard,
    file: File,
    size_bytes: i64,
    digest: Context,
}

impl BlobWriter {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.size_bytes += chunk.len() as i64;
        self.digest.consume(chunk);
        self.file.write_all(chunk).await
    }

    async fn finish(mut self) -> io::Result<WrittenBlob> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        fs::rename(&self.guard.path, &self.final_path).await?;
        self.guard.disarm();
        Ok(WrittenBlob {
            id: self.id,
            size_bytes: self.size_bytes,
            etag: format!("{:x}", self.digest.compute()),
        })
    }
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Two-level shard directory for a blob, taken from its leading bytes.
    fn blob_dir(&self, id: Uuid) -> PathBuf {
        let bytes = id.as_bytes();
        let mut path = self.root.clone();
        path.push(format!("{:02x}", bytes[0]));
        path.push(format!("{:02x}", bytes[1]));
        path
    }

    pub fn blob_path(&self, id: Uuid) -> PathBuf {
        self.blob_dir(id).join(id.simple().to_string())
    }

    async fn writer(&self) -> io::Result<BlobWriter> {
        let id = Uuid::new_v4();
        let dir = self.blob_dir(id);
        fs::create_dir_all(&dir).await?;
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let guard = TempFileGuard::new(tmp_path.clone());
        let file = File::create(&tmp_path).await?;
        Ok(BlobWriter {
            id,
            final_path: self.blob_path(id),
            guard,
            file,
            size_bytes: 0,
            digest: Context::new(),
        })
    }

    /// Write a new blob from a byte stream.
    pub async fn write_stream<S>(&self, stream: S) -> io::Result<WrittenBlob>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let mut writer = self.writer().await?;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            writer.write(&chunk?).await?;
        }
        writer.finish().await
    }

    /// Write a new blob holding the contents of `sources` in order.
    pub async fn concat(&self, sources: &[Uuid]) -> io::Result<WrittenBlob> {
        let mut writer = self.writer().await?;
        let mut buf = vec![0u8; COPY_BUF_LEN];
        for source in sources {
            let mut file = File::open(self.blob_path(*source)).await?;
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                writer.write(&buf[..n]).await?;
            }
        }
        writer.finish().await
    }

    pub async fn open(&self, id: Uuid) -> io::Result<File> {
        File::open(self.blob_path(id)).await
    }

    pub async fn read(&self, id: Uuid) -> io::Result<Bytes> {
        fs::read(self.blob_path(id)).await.map(Bytes::from)
    }

    /// Remove a blob. Missing blobs are not an error.
    pub async fn remove(&self, id: Uuid) -> io::Result<()> {
        let path = self.blob_path(id);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed blob {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path.display());
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Remove a blob whose metadata is already gone; failures are only logged.
    pub async fn discard(&self, id: Uuid) {
        if let Err(err) = self.remove(id).await {
            tracing::warn!("failed to remove orphaned blob {}: {}", id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = io::Result<Bytes>> {
        stream::iter(parts.iter().map(|p| Ok(Bytes::from_static(*p))).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(dir.path());

        let written = blobs.write_stream(chunks(&[b"hello", b" world"])).await.unwrap();
        assert_eq!(written.size_bytes, 11);
        assert_eq!(written.etag, format!("{:x}", md5::compute(b"hello world")));
        assert_eq!(blobs.read(written.id).await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn concat_joins_in_order() {
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(dir.path());

        let a = blobs.write_stream(chunks(&[b"abc"])).await.unwrap();
        let b = blobs.write_stream(chunks(&[b"def"])).await.unwrap();
        let joined = blobs.concat(&[a.id, b.id]).await.unwrap();

        assert_eq!(blobs.read(joined.id).await.unwrap(), Bytes::from_static(b"abcdef"));
        assert_eq!(joined.etag, format!("{:x}", md5::compute(b"abcdef")));
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_files() {
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(dir.path());

        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("client went away")),
        ]);
        assert!(blobs.write_stream(failing).await.is_err());

        let mut stack = vec![dir.path().to_path_buf()];
        while let Some(path) = stack.pop() {
            let mut entries = fs::read_dir(&path).await.unwrap();
            while let Some(entry) = entries.next_entry().await.unwrap() {
                let ty = entry.file_type().await.unwrap();
                assert!(!ty.is_file(), "leftover file {:?}", entry.path());
                if ty.is_dir() {
                    stack.push(entry.path());
                }
            }
        }
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(dir.path());

        let written = blobs.write_stream(chunks(&[b"x"])).await.unwrap();
        blobs.remove(written.id).await.unwrap();
        blobs.remove(written.id).await.unwrap();
        assert!(!blobs.blob_path(written.id).exists());
    }
}
