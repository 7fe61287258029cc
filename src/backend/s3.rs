//! S3-compatible backend.
//!
//! Serves every catalog provider that speaks the S3 API (Yandex Object
//! Storage, Timeweb, MinIO, ...). One client is built per (provider, account)
//! pair with static credentials and path-style addressing.

use super::{
    BackendError, BackendFactory, BackendResult, ByteStream, MultipartRef, ObjectStorageBackend,
    cancellable,
};
use crate::models::{
    account::{Provider, ServiceAccount},
    bucket::Bucket,
    object::ObjectInfo,
    upload::UploadPart,
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client as S3Client,
    config::{BehaviorVersion, Credentials, Region},
    primitives::ByteStream as S3ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::{collections::HashMap, ops::Range, sync::Arc};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::debug;

pub struct S3Backend {
    client: S3Client,
    provider_id: String,
}

impl S3Backend {
    pub fn new(provider: &Provider, account: &ServiceAccount) -> Self {
        let credentials = Credentials::new(
            account.access_key.clone(),
            account.secret.clone(),
            None,
            None,
            "static",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(account.region.clone()))
            .endpoint_url(provider.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: S3Client::from_conf(config),
            provider_id: provider.id.clone(),
        }
    }
}

/// S3 ranges are inclusive on both ends.
fn range_header(range: &Range<u64>) -> String {
    format!("bytes={}-{}", range.start, range.end - 1)
}

fn request_error(op: &str, err: impl std::fmt::Display) -> BackendError {
    BackendError::Request(format!("{op}: {err}"))
}

#[async_trait]
impl ObjectStorageBackend for S3Backend {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn begin_multipart(
        &self,
        bucket: &str,
        object_id: &str,
        metadata: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> BackendResult<String> {
        cancellable(cancel, async {
            let output = self
                .client
                .create_multipart_upload()
                .bucket(bucket)
                .key(object_id)
                .set_metadata(Some(metadata.clone()))
                .send()
                .await
                .map_err(|err| request_error("create_multipart_upload", err.into_service_error()))?;

            output
                .upload_id()
                .map(str::to_string)
                .ok_or_else(|| request_error("create_multipart_upload", "response without upload id"))
        })
        .await
    }

    async fn write_part(
        &self,
        target: MultipartRef<'_>,
        position: u32,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> BackendResult<String> {
        cancellable(cancel, async {
            let length = data.len() as i64;
            let output = self
                .client
                .upload_part()
                .bucket(target.bucket)
                .key(target.object_id)
                .upload_id(target.upload_id)
                .part_number(position as i32)
                .content_length(length)
                .body(S3ByteStream::from(data))
                .send()
                .await
                .map_err(|err| request_error("upload_part", err.into_service_error()))?;

            output
                .e_tag()
                .map(str::to_string)
                .ok_or_else(|| request_error("upload_part", "response without etag"))
        })
        .await
    }

    async fn finish(
        &self,
        target: MultipartRef<'_>,
        parts: &[UploadPart],
        cancel: &CancellationToken,
    ) -> BackendResult<()> {
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.position as i32)
                    .e_tag(part.tag.clone())
                    .build()
            })
            .collect();

        cancellable(cancel, async {
            self.client
                .complete_multipart_upload()
                .bucket(target.bucket)
                .key(target.object_id)
                .upload_id(target.upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(completed))
                        .build(),
                )
                .send()
                .await
                .map_err(|err| {
                    request_error("complete_multipart_upload", err.into_service_error())
                })?;
            Ok(())
        })
        .await
    }

    async fn abort(&self, target: MultipartRef<'_>, cancel: &CancellationToken) -> BackendResult<()> {
        cancellable(cancel, async {
            self.client
                .abort_multipart_upload()
                .bucket(target.bucket)
                .key(target.object_id)
                .upload_id(target.upload_id)
                .send()
                .await
                .map_err(|err| request_error("abort_multipart_upload", err.into_service_error()))?;
            Ok(())
        })
        .await
    }

    async fn list_buckets(&self, cancel: &CancellationToken) -> BackendResult<Vec<Bucket>> {
        cancellable(cancel, async {
            let output = self
                .client
                .list_buckets()
                .send()
                .await
                .map_err(|err| request_error("list_buckets", err.into_service_error()))?;

            Ok(output
                .buckets()
                .iter()
                .filter_map(|bucket| bucket.name())
                .map(|name| Bucket::new(name, self.provider_id.clone()))
                .collect())
        })
        .await
    }

    async fn bucket_exists(&self, bucket: &str, cancel: &CancellationToken) -> BackendResult<bool> {
        cancellable(cancel, async {
            match self.client.head_bucket().bucket(bucket).send().await {
                Ok(_) => Ok(true),
                Err(err) => {
                    let err = err.into_service_error();
                    if err.is_not_found() {
                        Ok(false)
                    } else {
                        Err(request_error("head_bucket", err))
                    }
                }
            }
        })
        .await
    }

    async fn get_object(
        &self,
        bucket: &str,
        object_id: &str,
        cancel: &CancellationToken,
    ) -> BackendResult<ObjectInfo> {
        cancellable(cancel, async {
            let output = match self
                .client
                .head_object()
                .bucket(bucket)
                .key(object_id)
                .send()
                .await
            {
                Ok(output) => output,
                Err(err) => {
                    let err = err.into_service_error();
                    if err.is_not_found() {
                        return Err(BackendError::NotFound(format!("{bucket}/{object_id}")));
                    }
                    return Err(request_error("head_object", err));
                }
            };

            Ok(ObjectInfo {
                id: object_id.to_string(),
                bucket: bucket.to_string(),
                size: output.content_length().unwrap_or_default().max(0) as u64,
                metadata: output.metadata().cloned().unwrap_or_default(),
            })
        })
        .await
    }

    async fn stream_download(
        &self,
        bucket: &str,
        object_id: &str,
        range: Range<u64>,
        cancel: &CancellationToken,
    ) -> BackendResult<ByteStream> {
        if range.is_empty() {
            return Ok(futures::stream::empty().boxed());
        }

        cancellable(cancel, async {
            let output = match self
                .client
                .get_object()
                .bucket(bucket)
                .key(object_id)
                .range(range_header(&range))
                .send()
                .await
            {
                Ok(output) => output,
                Err(err) => {
                    let err = err.into_service_error();
                    if err.is_no_such_key() {
                        return Err(BackendError::NotFound(format!("{bucket}/{object_id}")));
                    }
                    return Err(request_error("get_object", err));
                }
            };

            debug!(
                "streaming {}/{} range {}..{}",
                bucket, object_id, range.start, range.end
            );
            let reader = output.body.into_async_read();
            Ok(ReaderStream::new(reader).boxed())
        })
        .await
    }

    async fn stream_write_part(
        &self,
        target: MultipartRef<'_>,
        position: u32,
        mut body: ByteStream,
        length: u64,
        cancel: &CancellationToken,
    ) -> BackendResult<String> {
        // UploadPart needs a sized, replayable body; stage at most one part.
        let staged = cancellable(cancel, async {
            let mut data = BytesMut::with_capacity(length as usize);
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|err| request_error("read part body", err))?;
                data.extend_from_slice(&chunk);
            }
            if data.len() as u64 != length {
                return Err(request_error(
                    "read part body",
                    format!("expected {length} bytes, got {}", data.len()),
                ));
            }
            Ok(data.freeze())
        })
        .await?;

        self.write_part(target, position, staged, cancel).await
    }
}

/// Builds [`S3Backend`] handles.
#[derive(Default)]
pub struct S3BackendFactory;

#[async_trait]
impl BackendFactory for S3BackendFactory {
    async fn connect(
        &self,
        provider: &Provider,
        account: &ServiceAccount,
    ) -> BackendResult<Arc<dyn ObjectStorageBackend>> {
        if provider.endpoint.is_empty() {
            return Err(BackendError::Request(format!(
                "provider `{}` has no endpoint",
                provider.id
            )));
        }
        Ok(Arc::new(S3Backend::new(provider, account)))
    }
}
