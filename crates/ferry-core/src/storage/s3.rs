//! S3-compatible storage driver.
//!
//! Writes are managed multipart uploads: the first part is buffered to
//! decide between a single `PutObject` (small files) and a full multipart
//! sequence. Credentials come from the process environment; region,
//! endpoint, and path-style addressing from configuration.

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::config::S3Config;
use crate::constants::S3_PART_SIZE;
use crate::dataset::ByteSource;
use crate::error::{Error, Result};

async fn client(config: &S3Config) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()));
    if !config.endpoint.is_empty() {
        loader = loader.endpoint_url(&config.endpoint);
    }
    let shared = loader.load().await;
    let conf = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(config.path_style)
        .build();
    aws_sdk_s3::Client::from_conf(conf)
}

fn write_err(err: impl std::fmt::Display) -> Error {
    Error::StreamWrite {
        message: err.to_string(),
    }
}

/// Read up to one part worth of bytes.
async fn read_part<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    (&mut *reader)
        .take(S3_PART_SIZE as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| Error::StreamRead {
            message: e.to_string(),
        })?;
    Ok(buf)
}

/// Upload `reader` to `bucket`/`key`.
pub(crate) async fn upload<R>(config: &S3Config, bucket: &str, key: &str, reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let client = client(config).await;

    let first = read_part(reader).await?;
    if first.len() < S3_PART_SIZE {
        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(first))
            .send()
            .await
            .map_err(write_err)?;
        return Ok(());
    }

    let created = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(write_err)?;
    let upload_id = created.upload_id().unwrap_or_default().to_string();

    let mut parts = Vec::new();
    let mut part_number = 1i32;
    let mut chunk = first;
    let result = loop {
        let uploaded = client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .part_number(part_number)
            .body(ByteStream::from(std::mem::take(&mut chunk)))
            .send()
            .await;
        let uploaded = match uploaded {
            Ok(p) => p,
            Err(e) => break Err(write_err(e)),
        };
        parts.push(
            CompletedPart::builder()
                .set_e_tag(uploaded.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );

        chunk = match read_part(reader).await {
            Ok(c) => c,
            Err(e) => break Err(e),
        };
        if chunk.is_empty() {
            break Ok(());
        }
        part_number += 1;
    };

    if let Err(err) = result {
        if let Err(abort_err) = client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .send()
            .await
        {
            warn!(bucket, key, error = %abort_err, "aborting multipart upload failed");
        }
        return Err(err);
    }

    debug!(bucket, key, parts = parts.len(), "completing multipart upload");
    client
        .complete_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(&upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .set_parts(Some(parts))
                .build(),
        )
        .send()
        .await
        .map_err(write_err)?;
    Ok(())
}

/// Open a stored object for reading.
pub(crate) async fn read(config: &S3Config, bucket: &str, key: &str) -> Result<ByteSource> {
    let client = client(config).await;
    let object = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| Error::StreamOpen {
            message: e.to_string(),
        })?;
    Ok(Box::new(object.body.into_async_read()))
}
