//! Indirect storage via the repository's streaming deposit endpoint.
//!
//! The bytes flow through an in-memory duplex pipe: this side writes a
//! ZIP archive with a single entry named after the node, a background task
//! reads the pipe and POSTs it to the deposit endpoint. Closing the
//! archive closes the pipe, which ends the POST body; the deposit task's
//! error is observed before this function returns.

use std::sync::Arc;

use async_zip::base::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use futures::AsyncWriteExt;
use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream};
use tokio_util::compat::TokioAsyncWriteCompatExt;

use crate::constants::COPY_BUFFER_SIZE;
use crate::engine::Engine;
use crate::error::{Error, Result};

/// Package `reader` as a one-entry ZIP and deposit it.
pub(crate) async fn deposit<R>(
    engine: &Engine,
    dataset_key: &str,
    persistent_id: &str,
    node_id: &str,
    reader: &mut R,
) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let (read_half, write_half) = tokio::io::duplex(COPY_BUFFER_SIZE);

    let repo = Arc::clone(&engine.repo);
    let token = dataset_key.to_string();
    let pid = persistent_id.to_string();
    let deposit_task =
        tokio::spawn(async move { repo.deposit_zip(&token, &pid, Box::new(read_half)).await });

    let write_result = write_zip_entry(write_half, node_id, reader).await;

    // The archive writer is gone either way, so the pipe is closed and the
    // POST terminates. A broken-pipe write error usually means the deposit
    // died first; prefer its error as the cause.
    let deposit_result = match deposit_task.await {
        Ok(result) => result,
        Err(join_err) => Err(Error::RemoteClosed {
            message: format!("deposit task panicked: {join_err}"),
        }),
    };
    deposit_result?;
    write_result
}

async fn write_zip_entry<R>(write_half: DuplexStream, node_id: &str, reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut zip = ZipFileWriter::new(write_half.compat_write());
    let builder = ZipEntryBuilder::new(node_id.to_string().into(), Compression::Deflate);
    let mut entry = zip.write_entry_stream(builder).await.map_err(zip_err)?;

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await.map_err(|e| Error::StreamRead {
            message: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        entry
            .write_all(&buf[..n])
            .await
            .map_err(|e| Error::StreamWrite {
                message: e.to_string(),
            })?;
    }

    entry.close().await.map_err(zip_err)?;
    zip.close().await.map_err(zip_err)?;
    Ok(())
}

fn zip_err(err: async_zip::error::ZipError) -> Error {
    Error::StreamWrite {
        message: err.to_string(),
    }
}
