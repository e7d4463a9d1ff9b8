//! S3-compatible file source.
//!
//! This module provides a file source implementation for S3-compatible
//! services including AWS S3, Backblaze B2, Tigris (Fly.io), MinIO and others.
//!
//! # Metadata
//!
//! Object stores only know when *they* stored an object, so writes stamp the
//! producer date and the owner tag as user metadata
//! (`x-amz-meta-producer-modified`, `x-amz-meta-owner`). Objects written by
//! something else fall back to `LastModified` for both dates.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file, or by
//! handing in an already-built [`Client`]. There is no process-wide client.

use crate::backend::{BoxAsyncRead, FileStream};
use crate::error::{Error, ErrorKind, Result};
use crate::mime::{self, SNIFF_LEN};
use crate::{ConnectionStatus, FileId, FileQuery, FileSource, FileSourceConfig, FileSourceFile};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, http::HttpResponse, retry::RetryConfig},
    error::{ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTime},
    types::{CompletedMultipartUpload, CompletedPart},
};
use exn::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::instrument;

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
/// Uploads at least this large go through multipart upload. Also the part size.
const PART_SIZE: usize = 8 * 1024 * 1024;
/// S3 lower-cases user metadata keys, so these are lower-case too.
const META_PRODUCER_MODIFIED: &str = "producer-modified";
const META_OWNER: &str = "owner";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const CREDENTIAL_ERROR_CODES: &[&str] = &[
    "AccessDenied",
    "ExpiredToken",
    "InvalidAccessKeyId",
    "InvalidToken",
    "SignatureDoesNotMatch",
];

/// Explicit connection settings for [`S3FileSource::new()`].
#[derive(Clone)]
pub struct S3Credentials {
    /// AWS region or provider-specific region (e.g., "us-west-004" for Backblaze)
    pub region: String,
    /// Custom endpoint URL for S3-compatible services
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
}
impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .finish()
    }
}

/// S3-compatible file source.
///
/// Stores files in a bucket, optionally under a key prefix: a location of
/// `connector-bucket/plant-a` stores id `line/1.csv` at key
/// `plant-a/line/1.csv`.
///
/// # Examples
///
/// ```no_run
/// use siphon_storage::FileSourceConfig;
/// use siphon_storage::backend::{S3Credentials, S3FileSource};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = S3FileSource::new(
///     "archive",
///     FileSourceConfig::new("connector-bucket/plant-a", "plant-a"),
///     S3Credentials {
///         region: "us-west-004".to_string(),
///         endpoint: Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///         key_id: "access_key_id".to_string(),
///         key_secret: "secret_access_key".to_string(),
///     },
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3FileSource {
    name: String,
    config: FileSourceConfig,
    client: Client,
    bucket: String,
    prefix: Option<FileId>,
    connection: Arc<RwLock<ConnectionStatus>>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3FileSource {
    /// Create a new S3 file source with its own client.
    pub fn new(name: impl Into<String>, config: FileSourceConfig, credentials: S3Credentials) -> Result<Self> {
        let S3Credentials { region, endpoint, key_id, key_secret } = credentials;
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(Credentials::new(key_id, key_secret, None, None, "siphon-config"))
            .region(Region::new(region))
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Self::with_client(name, config, Client::from_conf(config_builder.build()))
    }

    /// Create a new S3 file source around an existing client.
    ///
    /// The client is owned by this source from here on.
    pub fn with_client(name: impl Into<String>, config: FileSourceConfig, client: Client) -> Result<Self> {
        let (bucket, prefix) = Self::parse_location(&config.location)?;
        Ok(Self {
            name: name.into(),
            config,
            client,
            bucket,
            prefix,
            connection: Arc::new(RwLock::new(ConnectionStatus::Closed)),
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Split `bucket[/prefix]`.
    fn parse_location(location: &str) -> Result<(String, Option<FileId>)> {
        let location = location.trim_matches('/');
        let (bucket, prefix) = match location.split_once('/') {
            Some((bucket, prefix)) => (bucket, Some(prefix)),
            None => (location, None),
        };
        if bucket.is_empty() {
            exn::bail!(ErrorKind::Configuration(format!("location `{location}` does not name a bucket")));
        }
        let prefix = prefix
            .map(FileId::parse)
            .transpose()
            .or_raise(|| ErrorKind::Configuration(format!("location `{location}` has an invalid key prefix")))?;
        Ok((bucket.to_string(), prefix))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Construct the full S3 key from a file id.
    fn full_key(&self, id: &FileId) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{id}"),
            None => id.to_string(),
        }
    }

    /// Strip the configured prefix from an S3 key to get the file id.
    ///
    /// Keys that only parse by normalisation (`a//b`, `x/../b`) are rejected:
    /// their id would address a different object.
    fn relative_id(&self, key: &str) -> Result<FileId> {
        let relative = match &self.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .and_then(|s| s.strip_prefix('/'))
                .ok_or_raise(|| ErrorKind::Backend(format!("key `{key}` is outside prefix `{prefix}`")))?,
            None => key,
        };
        let id = FileId::parse(relative)?;
        if self.full_key(&id) != key {
            exn::bail!(ErrorKind::InvalidId(key.to_string()));
        }
        Ok(id)
    }

    /// Key prefix used for listing (`None` lists the whole bucket).
    fn list_prefix(&self) -> Option<String> {
        self.prefix.as_ref().map(|prefix| format!("{prefix}/"))
    }

    /// `CopySource` wants the key URL-encoded, but keeps its slashes.
    fn copy_source(&self, key: &str) -> String {
        let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
        format!("{}/{}", self.bucket, encoded.join("/"))
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::Backend("S3 rate limiter closed".to_string()))
    }

    /// Fail fast once the remote has rejected our credentials.
    async fn ensure_usable(&self) -> Result<()> {
        if *self.connection.read().await == ConnectionStatus::LockedOut {
            exn::bail!(ErrorKind::Credentials(format!("source `{}` is locked out", self.name)));
        }
        Ok(())
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::Backend("S3 datetime out of range".to_string()))
    }

    /// Build file metadata from a `HeadObject` response.
    fn describe(
        &self,
        id: FileId,
        size: Option<i64>,
        last_modified: Option<&DateTime>,
        metadata: Option<&HashMap<String, String>>,
        content_type: Option<&str>,
    ) -> Result<FileSourceFile> {
        let stored = last_modified.ok_or_raise(|| ErrorKind::Backend(format!("no LastModified for `{id}`")))?;
        let stored = Self::parse_datetime(stored)?;
        let producer = match metadata.and_then(|m| m.get(META_PRODUCER_MODIFIED)) {
            Some(raw) => match OffsetDateTime::parse(raw, &Rfc3339) {
                Ok(at) => at,
                Err(e) => {
                    tracing::debug!(source = %self.name, %id, %raw, error = %e, "Unparseable producer date; using LastModified");
                    stored
                },
            },
            None => stored,
        };
        let owner = metadata.and_then(|m| m.get(META_OWNER)).cloned().unwrap_or_default();
        let size = u64::try_from(size.unwrap_or_default()).unwrap_or_default();
        let mime_type = content_type.filter(|ct| *ct != DEFAULT_CONTENT_TYPE);
        Ok(FileSourceFile::new(id, stored, owner, size).with_producer_modified(producer).with_mime_type(mime_type))
    }

    fn content_type(file: &FileSourceFile, head: &[u8]) -> String {
        file.mime_type
            .clone()
            .or_else(|| mime::sniff(&head[..head.len().min(SNIFF_LEN)]).map(String::from))
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
    }

    fn producer_modified(file: &FileSourceFile) -> Result<String> {
        file.producer_modified
            .format(&Rfc3339)
            .or_raise(|| ErrorKind::Backend(format!("cannot format producer date of `{}`", file.id)))
    }

    #[instrument(skip(self, source, first, file, content_type, producer), fields(source_name = %self.name, id = %file.id))]
    async fn put_multipart(
        &self,
        key: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        first: Vec<u8>,
        file: &FileSourceFile,
        content_type: String,
        producer: String,
    ) -> Result<()> {
        let upload = {
            let _permit = self.acquire_permit().await?;
            self.client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .content_type(content_type)
                .metadata(META_PRODUCER_MODIFIED, producer)
                .metadata(META_OWNER, &self.config.owner)
                .send()
                .await
                .map_err(|e| raise_transfer(e, "put", &file.id, false))?
        };
        let upload_id = upload
            .upload_id()
            .ok_or_raise(|| ErrorKind::Backend("multipart upload started without an id".to_string()))?
            .to_string();

        match self.upload_parts(key, &upload_id, source, first, file).await {
            Ok(parts) => {
                let _permit = self.acquire_permit().await?;
                let completed = CompletedMultipartUpload::builder().set_parts(Some(parts)).build();
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| raise_transfer(e, "put", &file.id, false))?;
                Ok(())
            },
            Err(e) => {
                let _permit = self.acquire_permit().await?;
                let aborted =
                    self.client.abort_multipart_upload().bucket(&self.bucket).key(key).upload_id(&upload_id).send().await;
                if let Err(abort) = aborted {
                    tracing::warn!(%upload_id, error = %abort, "Could not abort multipart upload; parts may linger");
                }
                Err(e)
            },
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        first: Vec<u8>,
        file: &FileSourceFile,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut buffer = first;
        let mut part_number = 1;
        while !buffer.is_empty() {
            let output = {
                let _permit = self.acquire_permit().await?;
                self.client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(buffer))
                    .send()
                    .await
                    .map_err(|e| raise_transfer(e, "put", &file.id, false))?
            };
            tracing::trace!(part_number, "Uploaded part");
            parts.push(CompletedPart::builder().set_e_tag(output.e_tag().map(String::from)).part_number(part_number).build());
            part_number += 1;
            buffer = read_part(source).await.or_raise(|| ErrorKind::transfer("put", &file.id))?;
        }
        Ok(parts)
    }
}

/// Read up to one part's worth of bytes; short reads only happen at EOF.
async fn read_part(source: &mut (dyn AsyncRead + Send + Unpin)) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(PART_SIZE);
    (&mut *source).take(PART_SIZE as u64).read_to_end(&mut buffer).await?;
    Ok(buffer)
}

/// Map an SDK failure onto an actionable kind.
///
/// `not_found` is the operation-specific "no such key" check, since modeled
/// service errors don't always carry an HTTP status or error code.
fn classify<E>(err: &SdkError<E, HttpResponse>, subject: &str, not_found: bool) -> ErrorKind
where
    E: ProvideErrorMetadata,
{
    let transport = matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_));
    let status = err.raw_response().map(|response| response.status().as_u16());
    classify_parts(subject, transport, status, err.code(), not_found)
}

fn classify_parts(subject: &str, transport: bool, status: Option<u16>, code: Option<&str>, not_found: bool) -> ErrorKind {
    if transport {
        return ErrorKind::Network(format!("could not reach S3 for `{subject}`"));
    }
    if let Some(code) = code
        && CREDENTIAL_ERROR_CODES.contains(&code)
    {
        return ErrorKind::Credentials(code.to_string());
    }
    match status {
        Some(status @ (401 | 403)) => ErrorKind::Credentials(format!("HTTP {status}")),
        Some(404) => ErrorKind::NotFound(subject.to_string()),
        _ if not_found || matches!(code, Some("NoSuchKey" | "NotFound")) => ErrorKind::NotFound(subject.to_string()),
        _ => ErrorKind::Backend(format!("S3 request for `{subject}` failed ({})", code.unwrap_or("unknown error"))),
    }
}

/// Raise an SDK failure as a storage error, keeping the SDK error as a child.
fn raise_sdk<E>(err: SdkError<E, HttpResponse>, subject: &str, not_found: bool) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let kind = classify(&err, subject, not_found);
    exn::Exn::from(err).raise(kind)
}

/// Like [`raise_sdk`], but wraps anything other than "not found" and
/// "bad credentials" in a transfer error so callers see which operation failed.
fn raise_transfer<E>(err: SdkError<E, HttpResponse>, operation: &'static str, id: &FileId, not_found: bool) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let err = raise_sdk(err, id.as_str(), not_found);
    match &*err {
        ErrorKind::NotFound(_) | ErrorKind::Credentials(_) => err,
        _ => err.raise(ErrorKind::transfer(operation, id)),
    }
}

#[async_trait]
impl FileSource for S3FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &FileSourceConfig {
        &self.config
    }

    /// Probe the bucket. Rejected credentials lock the source out instead of
    /// erroring, so a connection test can report them as such.
    async fn open_connection(&self) -> Result<ConnectionStatus> {
        let probe = {
            let _permit = self.acquire_permit().await?;
            self.client.head_bucket().bucket(&self.bucket).send().await
        };
        let status = match probe {
            Ok(_) => ConnectionStatus::Open,
            Err(e) => {
                let err = raise_sdk(e, &self.bucket, false);
                match &*err {
                    ErrorKind::Credentials(_) => {
                        tracing::warn!(source = %self.name, bucket = %self.bucket, "S3 rejected credentials; locking out");
                        ConnectionStatus::LockedOut
                    },
                    ErrorKind::NotFound(_) => {
                        return Err(err.raise(ErrorKind::Configuration(format!("bucket `{}` does not exist", self.bucket))));
                    },
                    _ => return Err(err),
                }
            },
        };
        *self.connection.write().await = status;
        tracing::debug!(source = %self.name, bucket = %self.bucket, %status, "Opened S3 file source");
        Ok(status)
    }

    async fn close_connection(&self) -> Result<ConnectionStatus> {
        *self.connection.write().await = ConnectionStatus::Closed;
        Ok(ConnectionStatus::Closed)
    }

    async fn find_file(&self, id: &FileId) -> Result<Option<FileSourceFile>> {
        self.ensure_usable().await?;
        let key = self.full_key(id);
        let response = {
            let _permit = self.acquire_permit().await?;
            self.client.head_object().bucket(&self.bucket).key(&key).send().await
        };
        match response {
            Ok(head) => Ok(Some(self.describe(
                id.clone(),
                head.content_length(),
                head.last_modified(),
                head.metadata(),
                head.content_type(),
            )?)),
            Err(e) => {
                let not_found = e.as_service_error().is_some_and(|s| s.is_not_found());
                let err = raise_sdk(e, id.as_str(), not_found);
                match &*err {
                    ErrorKind::NotFound(_) => Ok(None),
                    _ => Err(err),
                }
            },
        }
    }

    fn scan<'a>(&'a self, query: &'a FileQuery) -> FileStream<'a> {
        Box::pin(stream! {
            if let Err(e) = self.ensure_usable().await {
                yield Err(e);
                return;
            }
            let list_prefix = self.list_prefix();
            let mut request = self.client.list_objects_v2().bucket(&self.bucket).set_prefix(list_prefix.clone());
            if !query.is_recursive() {
                request = request.delimiter("/");
            }
            let mut pages = request.into_paginator().send();
            while let Some(page) = pages.next().await {
                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(raise_sdk(e, list_prefix.as_deref().unwrap_or(&self.bucket), false));
                        return;
                    }
                };
                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    // Zero-byte "directory" markers.
                    if key.ends_with('/') {
                        continue;
                    }
                    let id = match self.relative_id(key) {
                        Ok(id) => id,
                        Err(e) => {
                            tracing::debug!(source = %self.name, key, error = ?e, "Skipping key that isn't a valid file id");
                            continue;
                        }
                    };
                    if id.is_hidden() || !query.matches_name(id.file_name()) {
                        continue;
                    }
                    // Listings don't carry user metadata. A key deleted since
                    // the listing just drops out.
                    match self.find_file(&id).await {
                        Ok(Some(file)) => yield Ok(file),
                        Ok(None) => {},
                        Err(e) => yield Err(e),
                    }
                }
            }
        })
    }

    async fn get_input_stream(&self, file: &FileSourceFile) -> Result<BoxAsyncRead> {
        self.ensure_usable().await?;
        let key = self.full_key(&file.id);
        let response = {
            let _permit = self.acquire_permit().await?;
            self.client.get_object().bucket(&self.bucket).key(&key).send().await
        };
        match response {
            Ok(output) => Ok(Box::pin(output.body.into_async_read())),
            Err(e) => {
                let not_found = e.as_service_error().is_some_and(|s| s.is_no_such_key());
                Err(raise_transfer(e, "get", &file.id, not_found))
            },
        }
    }

    #[instrument(skip(self, source, file), fields(source_name = %self.name, id = %file.id))]
    async fn put_content(&self, source: &mut (dyn AsyncRead + Send + Unpin), file: &FileSourceFile) -> Result<()> {
        self.ensure_usable().await?;
        let key = self.full_key(&file.id);
        let producer = Self::producer_modified(file)?;
        let first = read_part(source).await.or_raise(|| ErrorKind::transfer("put", &file.id))?;
        let content_type = Self::content_type(file, &first);
        if first.len() >= PART_SIZE {
            return self.put_multipart(&key, source, first, file, content_type, producer).await;
        }
        let bytes = first.len();
        let _permit = self.acquire_permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .metadata(META_PRODUCER_MODIFIED, producer)
            .metadata(META_OWNER, &self.config.owner)
            .body(ByteStream::from(first))
            .send()
            .await
            .map_err(|e| raise_transfer(e, "put", &file.id, false))?;
        tracing::debug!(bytes, "Uploaded object");
        Ok(())
    }

    /// Copy then delete; not atomic. If the delete fails after a successful
    /// copy, the move fails and the file exists at both ids.
    #[instrument(skip(self, file), fields(source_name = %self.name, from = %file.id, to = %new_id))]
    async fn move_file(&self, file: &FileSourceFile, new_id: &FileId) -> Result<FileSourceFile> {
        self.ensure_usable().await?;
        // S3 rejects a copy onto itself that changes nothing.
        if new_id == &file.id {
            return self.find_file(new_id).await?.ok_or_raise(|| ErrorKind::NotFound(new_id.to_string()));
        }
        let from_key = self.full_key(&file.id);
        let to_key = self.full_key(new_id);
        {
            let _permit = self.acquire_permit().await?;
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .key(&to_key)
                .copy_source(self.copy_source(&from_key))
                .send()
                .await
                .map_err(|e| raise_transfer(e, "move", &file.id, false))?;
        }
        let deleted = {
            let _permit = self.acquire_permit().await?;
            self.client.delete_object().bucket(&self.bucket).key(&from_key).send().await
        };
        if let Err(e) = deleted {
            let err = raise_sdk(e, &from_key, false).raise(ErrorKind::Backend(format!(
                "copied to `{new_id}` but could not delete the original; the file now exists at both ids"
            )));
            return Err(err.raise(ErrorKind::transfer("move", &file.id)));
        }
        self.find_file(new_id).await?.ok_or_raise(|| ErrorKind::NotFound(new_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::{
        copy_object::CopyObjectOutput,
        delete_object::{DeleteObjectError, DeleteObjectOutput},
        get_object::{GetObjectError, GetObjectOutput},
        head_bucket::HeadBucketOutput,
        head_object::{HeadObjectError, HeadObjectOutput},
        list_objects_v2::ListObjectsV2Output,
        put_object::PutObjectOutput,
    };
    use aws_sdk_s3::primitives::SdkBody;
    use aws_sdk_s3::types::Object;
    use aws_sdk_s3::types::error::{NoSuchKey, NotFound};
    use aws_smithy_mocks::{RuleMode, mock, mock_client};
    use futures::TryStreamExt;
    use rstest::rstest;
    use std::io::Cursor;
    use time::macros::datetime;

    const STORED_SECS: i64 = 1_700_000_000;

    fn source(client: Client) -> S3FileSource {
        S3FileSource::with_client("archive", FileSourceConfig::new("bucket/plant-a", "plant-a"), client).unwrap()
    }

    fn id(s: &str) -> FileId {
        FileId::parse(s).unwrap()
    }

    /// A client whose only rule never matches the calls under test.
    fn idle_client() -> Client {
        let rule = mock!(Client::head_bucket).then_output(|| HeadBucketOutput::builder().build());
        mock_client!(aws_sdk_s3, [&rule])
    }

    fn head(producer: Option<&'static str>) -> HeadObjectOutput {
        let mut builder = HeadObjectOutput::builder()
            .content_length(5)
            .last_modified(DateTime::from_secs(STORED_SECS))
            .content_type("text/plain")
            .metadata(META_OWNER, "plant-b");
        if let Some(producer) = producer {
            builder = builder.metadata(META_PRODUCER_MODIFIED, producer);
        }
        builder.build()
    }

    #[rstest]
    #[case("bucket", "bucket", None)]
    #[case("bucket/", "bucket", None)]
    #[case("/bucket/plant-a/", "bucket", Some("plant-a"))]
    #[case("bucket/a//b", "bucket", Some("a/b"))]
    fn test_parse_location(#[case] location: &str, #[case] bucket: &str, #[case] prefix: Option<&str>) {
        let (parsed_bucket, parsed_prefix) = S3FileSource::parse_location(location).unwrap();
        assert_eq!(parsed_bucket, bucket);
        assert_eq!(parsed_prefix.as_ref().map(FileId::as_str), prefix);
    }

    #[rstest]
    #[case("")]
    #[case("/")]
    #[case("bucket/../..")]
    fn test_parse_location_invalid(#[case] location: &str) {
        let err = S3FileSource::parse_location(location).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Configuration(_)));
    }

    #[test]
    fn test_keys() {
        let source = source(idle_client());
        assert_eq!(source.full_key(&id("line/1.csv")), "plant-a/line/1.csv");
        assert_eq!(source.relative_id("plant-a/line/1.csv").unwrap(), id("line/1.csv"));
        assert!(source.relative_id("plant-b/line/1.csv").is_err());
        assert!(source.relative_id("plant-abc/1.csv").is_err());
        assert!(source.relative_id("plant-a/a//b.csv").is_err());
        assert!(source.relative_id("plant-a/x/../b.csv").is_err());
        assert!(source.relative_id("plant-a/./b.csv").is_err());
        assert_eq!(source.copy_source("plant-a/a b/c+d.csv"), "bucket/plant-a/a%20b/c%2Bd.csv");
    }

    #[rstest]
    #[case(true, None, None, false, "network")]
    #[case(false, Some(403), None, false, "credentials")]
    #[case(false, Some(401), None, false, "credentials")]
    #[case(false, Some(400), Some("InvalidAccessKeyId"), false, "credentials")]
    #[case(false, Some(404), None, false, "not found")]
    #[case(false, None, Some("NoSuchKey"), false, "not found")]
    #[case(false, None, None, true, "not found")]
    #[case(false, Some(500), Some("InternalError"), false, "backend")]
    fn test_classify(
        #[case] transport: bool,
        #[case] status: Option<u16>,
        #[case] code: Option<&str>,
        #[case] not_found: bool,
        #[case] expected: &str,
    ) {
        let kind = classify_parts("a.csv", transport, status, code, not_found);
        let actual = match kind {
            ErrorKind::Network(_) => "network",
            ErrorKind::Credentials(_) => "credentials",
            ErrorKind::NotFound(_) => "not found",
            ErrorKind::Backend(_) => "backend",
            _ => "other",
        };
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_find_file_with_metadata() {
        let rule = mock!(Client::head_object)
            .match_requests(|req| req.bucket() == Some("bucket") && req.key() == Some("plant-a/a.csv"))
            .then_output(|| head(Some("2024-03-01T08:00:00.25Z")));
        let source = source(mock_client!(aws_sdk_s3, [&rule]));
        let file = source.find_file(&id("a.csv")).await.unwrap().unwrap();
        assert_eq!(file.size, 5);
        assert_eq!(file.owner, "plant-b");
        assert_eq!(file.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(file.producer_modified, datetime!(2024-03-01 08:00:00.25 UTC));
        assert_eq!(file.source_modified.unix_timestamp(), STORED_SECS);
    }

    #[tokio::test]
    async fn test_find_file_without_producer_metadata() {
        let rule = mock!(Client::head_object).then_output(|| head(None));
        let source = source(mock_client!(aws_sdk_s3, [&rule]));
        let file = source.find_file(&id("a.csv")).await.unwrap().unwrap();
        assert_eq!(file.producer_modified, file.source_modified);
    }

    #[tokio::test]
    async fn test_find_file_missing() {
        let rule = mock!(Client::head_object).then_error(|| HeadObjectError::NotFound(NotFound::builder().build()));
        let source = source(mock_client!(aws_sdk_s3, [&rule]));
        assert!(source.find_file(&id("missing.csv")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_missing_is_not_present() {
        let rule = mock!(Client::head_object).then_error(|| HeadObjectError::NotFound(NotFound::builder().build()));
        let source = source(mock_client!(aws_sdk_s3, [&rule]));
        let candidate = FileSourceFile::new(id("missing.csv"), datetime!(2024-01-01 00:00 UTC), "plant-a", 1);
        let comparison = source.compare(&candidate).await.unwrap();
        assert_eq!(comparison.status, crate::ComparisonStatus::NotPresent);
        assert!(comparison.file.is_none());
    }

    #[tokio::test]
    async fn test_compare_older_remote() {
        let rule = mock!(Client::head_object).then_output(|| head(Some("2024-01-01T00:00:00Z")));
        let source = source(mock_client!(aws_sdk_s3, [&rule]));
        let candidate = FileSourceFile::new(id("a.csv"), datetime!(2024-06-01 00:00 UTC), "plant-a", 5);
        assert_eq!(source.compare(&candidate).await.unwrap().status, crate::ComparisonStatus::Older);
    }

    #[tokio::test]
    async fn test_get_input_stream() {
        let rule = mock!(Client::get_object)
            .match_requests(|req| req.key() == Some("plant-a/a.csv"))
            .then_output(|| GetObjectOutput::builder().body(ByteStream::from_static(b"hello")).build());
        let source = source(mock_client!(aws_sdk_s3, [&rule]));
        let file = FileSourceFile::new(id("a.csv"), OffsetDateTime::UNIX_EPOCH, "plant-a", 5);
        let mut reader = source.get_input_stream(&file).await.unwrap();
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn test_get_content_missing() {
        let rule = mock!(Client::get_object).then_error(|| GetObjectError::NoSuchKey(NoSuchKey::builder().build()));
        let source = source(mock_client!(aws_sdk_s3, [&rule]));
        let file = FileSourceFile::new(id("gone.csv"), OffsetDateTime::UNIX_EPOCH, "plant-a", 5);
        let err = source.get_content(&mut Vec::<u8>::new(), &file).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_put_content_stamps_metadata() {
        let rule = mock!(Client::put_object)
            .match_requests(|req| {
                let metadata = req.metadata().cloned().unwrap_or_default();
                req.key() == Some("plant-a/out/a.csv")
                    && req.content_type() == Some("text/plain")
                    && metadata.get(META_OWNER).map(String::as_str) == Some("plant-a")
                    && metadata.get(META_PRODUCER_MODIFIED).map(String::as_str) == Some("2024-03-01T08:00:00.25Z")
            })
            .then_output(|| PutObjectOutput::builder().build());
        let source = source(mock_client!(aws_sdk_s3, [&rule]));
        let file = FileSourceFile::new(id("out/a.csv"), datetime!(2024-03-01 08:00:00.25 UTC), "plant-x", 5);
        source.put_content(&mut Cursor::new(b"hello".to_vec()), &file).await.unwrap();
    }

    #[tokio::test]
    async fn test_move_file() {
        let copy = mock!(Client::copy_object)
            .match_requests(|req| req.key() == Some("plant-a/archive/a.csv") && req.copy_source() == Some("bucket/plant-a/a.csv"))
            .then_output(|| CopyObjectOutput::builder().build());
        let delete = mock!(Client::delete_object)
            .match_requests(|req| req.key() == Some("plant-a/a.csv"))
            .then_output(|| DeleteObjectOutput::builder().build());
        let lookup = mock!(Client::head_object)
            .match_requests(|req| req.key() == Some("plant-a/archive/a.csv"))
            .then_output(|| head(None));
        let source = source(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&copy, &delete, &lookup]));
        let file = FileSourceFile::new(id("a.csv"), OffsetDateTime::UNIX_EPOCH, "plant-a", 5);
        let moved = source.move_file(&file, &id("archive/a.csv")).await.unwrap();
        assert_eq!(moved.id, id("archive/a.csv"));
        assert_eq!(moved.size, 5);
    }

    #[tokio::test]
    async fn test_move_file_failed_delete() {
        let copy = mock!(Client::copy_object).then_output(|| CopyObjectOutput::builder().build());
        let delete = mock!(Client::delete_object).then_error(|| DeleteObjectError::unhandled("boom"));
        let lookup = mock!(Client::head_object).then_output(|| head(None));
        let source = source(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&copy, &delete, &lookup]));
        let file = FileSourceFile::new(id("a.csv"), OffsetDateTime::UNIX_EPOCH, "plant-a", 5);
        let err = source.move_file(&file, &id("archive/a.csv")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transfer { operation: "move", .. }));
        assert!(format!("{err:?}").contains("exists at both ids"));
    }

    #[tokio::test]
    async fn test_move_file_onto_itself() {
        // No copy or delete rule: either request would fail the move.
        let lookup = mock!(Client::head_object)
            .match_requests(|req| req.key() == Some("plant-a/a.csv"))
            .then_output(|| head(None));
        let source = source(mock_client!(aws_sdk_s3, [&lookup]));
        let file = FileSourceFile::new(id("a.csv"), OffsetDateTime::UNIX_EPOCH, "plant-a", 5);
        let moved = source.move_file(&file, &id("a.csv")).await.unwrap();
        assert_eq!(moved.id, id("a.csv"));
    }

    #[tokio::test]
    async fn test_scan_skips_keys_that_do_not_round_trip() {
        let list = mock!(Client::list_objects_v2).then_output(|| {
            ListObjectsV2Output::builder()
                .contents(Object::builder().key("plant-a/a//b.csv").build())
                .contents(Object::builder().key("plant-a/x/../b.csv").build())
                .contents(Object::builder().key("plant-a/a/b.csv").build())
                .build()
        });
        let lookup = mock!(Client::head_object)
            .match_requests(|req| req.key() == Some("plant-a/a/b.csv"))
            .then_output(|| head(None));
        let source = source(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&list, &lookup]));
        let files = source.find_files(&FileQuery::all().recursive(true)).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, id("a/b.csv"));
    }

    #[tokio::test]
    async fn test_scan_filters_hidden_and_pattern() {
        let list = mock!(Client::list_objects_v2)
            .match_requests(|req| req.prefix() == Some("plant-a/") && req.delimiter().is_none())
            .then_output(|| {
                ListObjectsV2Output::builder()
                    .contents(Object::builder().key("plant-a/a.csv").build())
                    .contents(Object::builder().key("plant-a/dir/").build())
                    .contents(Object::builder().key("plant-a/.hidden.csv").build())
                    .contents(Object::builder().key("plant-a/.git/x.csv").build())
                    .contents(Object::builder().key("plant-a/notes.txt").build())
                    .build()
            });
        let lookup = mock!(Client::head_object)
            .match_requests(|req| req.key() == Some("plant-a/a.csv"))
            .then_output(|| head(None));
        let source = source(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&list, &lookup]));
        let query = FileQuery::all().pattern(r".*\.csv").unwrap().recursive(true);
        let files: Vec<_> = source.find_files_stream(&query).try_collect().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, id("a.csv"));
    }

    #[tokio::test]
    async fn test_scan_non_recursive_uses_delimiter() {
        let list = mock!(Client::list_objects_v2)
            .match_requests(|req| req.delimiter() == Some("/"))
            .then_output(|| ListObjectsV2Output::builder().build());
        let source = source(mock_client!(aws_sdk_s3, [&list]));
        assert!(source.find_files(&FileQuery::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_connection() {
        let rule = mock!(Client::head_bucket)
            .match_requests(|req| req.bucket() == Some("bucket"))
            .then_output(|| HeadBucketOutput::builder().build());
        let source = source(mock_client!(aws_sdk_s3, [&rule]));
        assert_eq!(source.open_connection().await.unwrap(), ConnectionStatus::Open);
        assert_eq!(source.close_connection().await.unwrap(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn test_rejected_credentials_lock_out() {
        let rule = mock!(Client::head_bucket)
            .then_http_response(|| HttpResponse::new(403u16.try_into().unwrap(), SdkBody::empty()));
        let source = source(mock_client!(aws_sdk_s3, [&rule]));
        assert_eq!(source.open_connection().await.unwrap(), ConnectionStatus::LockedOut);
        let err = source.find_file(&id("a.csv")).await.unwrap_err();
        assert!(err.is_credentials());
    }

    #[tokio::test]
    async fn test_missing_bucket_is_configuration_error() {
        let rule = mock!(Client::head_bucket)
            .then_http_response(|| HttpResponse::new(404u16.try_into().unwrap(), SdkBody::empty()));
        let source = source(mock_client!(aws_sdk_s3, [&rule]));
        let err = source.open_connection().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Configuration(_)));
        assert_eq!(*source.connection.read().await, ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn test_locked_out_fails_fast() {
        // Any request reaching the client would fail with a non-credentials error.
        let source = source(idle_client());
        *source.connection.write().await = ConnectionStatus::LockedOut;
        let err = source.find_file(&id("a.csv")).await.unwrap_err();
        assert!(err.is_credentials());
        let err = source.find_files(&FileQuery::all()).await.unwrap_err();
        assert!(err.is_credentials());
        // Closing resets the lock-out.
        source.close_connection().await.unwrap();
        assert_eq!(*source.connection.read().await, ConnectionStatus::Closed);
    }

    #[test]
    fn test_content_type_prefers_file_metadata() {
        let file = FileSourceFile::new(id("a.bin"), OffsetDateTime::UNIX_EPOCH, "o", 0);
        assert_eq!(S3FileSource::content_type(&file, b"%PDF-1.4"), "application/pdf");
        assert_eq!(S3FileSource::content_type(&file, &[0x00, 0x01]), DEFAULT_CONTENT_TYPE);
        let typed = file.with_mime_type(Some("text/csv"));
        assert_eq!(S3FileSource::content_type(&typed, b"%PDF-1.4"), "text/csv");
    }
}
