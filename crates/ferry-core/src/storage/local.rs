//! Local-filesystem storage driver.
//!
//! Files land under `<filesDir>/<trimmedPersistentId>/<filename>`; the
//! trimmed persistent id may contain `/` and maps onto subdirectories.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::dataset::ByteSource;
use crate::error::{Error, Result};

/// Stream `reader` into a freshly created file, making parent directories
/// as needed.
pub(crate) async fn write<R>(
    files_dir: &Path,
    trimmed_pid: &str,
    filename: &str,
    reader: &mut R,
) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let dir = files_dir.join(trimmed_pid);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(filename);
    let mut file = tokio::fs::File::create(&path).await?;
    tokio::io::copy(reader, &mut file)
        .await
        .map_err(|e| Error::StreamWrite {
            message: format!("{}: {e}", path.display()),
        })?;
    file.flush().await?;
    Ok(())
}

/// Open a stored file for reading.
pub(crate) async fn read(files_dir: &Path, trimmed_pid: &str, filename: &str) -> Result<ByteSource> {
    let path = files_dir.join(trimmed_pid).join(filename);
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| Error::StreamOpen {
            message: format!("{}: {e}", path.display()),
        })?;
    Ok(Box::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = b"hello storage".as_slice();

        write(dir.path(), "10.5072/FK2/ABC", "f1", &mut source)
            .await
            .unwrap();

        let mut reader = read(dir.path(), "10.5072/FK2/ABC", "f1").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello storage");
    }

    #[tokio::test]
    async fn read_missing_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let err = read(dir.path(), "10.1/X", "nope").await.unwrap_err();
        assert!(matches!(err, Error::StreamOpen { .. }));
    }

    #[tokio::test]
    async fn nested_persistent_id_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = b"x".as_slice();
        write(dir.path(), "10.5072/FK2/DEEP", "f2", &mut source)
            .await
            .unwrap();
        assert!(dir.path().join("10.5072/FK2/DEEP/f2").exists());
    }
}
