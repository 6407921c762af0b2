use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use drive_storage_core::path::{file_slug, join_path, last_segment, normalize_path};
use drive_storage_core::{
    content_digest, ListingResult, StorageBackend, StorageError, StoredFileInfo,
};
use tracing::{debug, info, instrument, warn};

use crate::listing::{build_listing, ObjectSummary};

/// Maximum retries for transient errors (429 / 5xx).
const MAX_RETRIES: u32 = 5;
/// Base delay for exponential backoff.
const BASE_DELAY_MS: u64 = 200;
/// DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH_SIZE: usize = 1000;

/// Object store backend over an S3-compatible bucket.
///
/// Storage layout in the bucket:
/// ```text
/// {bucket}/
///   accepted_invites/{project}/.../{file}   # uploaded files
///   accepted_processed/{project}/           # zero-byte folder markers
/// ```
/// Intermediate folders of uploaded files are not materialized; listings
/// report them as implicit folders.
#[derive(Clone)]
pub struct ObjectStoreBackend {
    s3_client: S3Client,
    bucket_name: String,
}

impl ObjectStoreBackend {
    /// Create a new ObjectStoreBackend.
    pub fn new(s3_client: S3Client, bucket_name: String) -> Self {
        info!("S3 storage initialized for bucket: {}", bucket_name);
        Self {
            s3_client,
            bucket_name,
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    // =========================================================================
    // Retry helper
    // =========================================================================

    /// Sleep with exponential backoff + jitter.
    async fn backoff_sleep(attempt: u32) {
        let base = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt));
        let jitter = Duration::from_millis(rand_jitter());
        tokio::time::sleep(base + jitter).await;
    }

    /// Check if an S3 error is retryable (429 or 5xx).
    fn is_retryable_s3_error(err: &aws_sdk_s3::error::SdkError<impl std::fmt::Debug>) -> bool {
        use aws_sdk_s3::error::SdkError;
        match err {
            SdkError::ServiceError(e) => {
                let status = e.raw().status().as_u16();
                status == 429 || (500..=504).contains(&status)
            }
            SdkError::ResponseError(e) => {
                let status = e.raw().status().as_u16();
                status == 429 || (500..=504).contains(&status)
            }
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
            _ => false,
        }
    }

    // =========================================================================
    // S3 primitives with retry
    // =========================================================================

    /// Put an object, with retry on transient errors.
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        metadata: &[(&str, &str)],
    ) -> Result<(), StorageError> {
        for attempt in 0..=MAX_RETRIES {
            let mut request = self
                .s3_client
                .put_object()
                .bucket(&self.bucket_name)
                .key(key)
                .body(ByteStream::from(data.clone()));
            for (name, value) in metadata {
                request = request.metadata(*name, *value);
            }

            match request.send().await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if Self::is_retryable_s3_error(&e) && attempt < MAX_RETRIES {
                        warn!(attempt, key, "S3 put_object retryable error, retrying");
                        Self::backoff_sleep(attempt).await;
                        continue;
                    }
                    return Err(StorageError::Backend(format!(
                        "S3 put_object error for {}: {}",
                        key,
                        DisplayErrorContext(&e)
                    )));
                }
            }
        }
        unreachable!()
    }

    /// Whether an object exists, with retry on transient errors.
    async fn object_exists(&self, key: &str) -> Result<bool, StorageError> {
        for attempt in 0..=MAX_RETRIES {
            let result = self
                .s3_client
                .head_object()
                .bucket(&self.bucket_name)
                .key(key)
                .send()
                .await;

            match result {
                Ok(_) => return Ok(true),
                Err(e) => {
                    if Self::is_retryable_s3_error(&e) && attempt < MAX_RETRIES {
                        warn!(attempt, key, "S3 head_object retryable error, retrying");
                        Self::backoff_sleep(attempt).await;
                        continue;
                    }
                    let service_error = e.into_service_error();
                    if service_error.is_not_found() {
                        return Ok(false);
                    }
                    return Err(StorageError::Backend(format!(
                        "S3 head_object error for {}: {}",
                        key,
                        DisplayErrorContext(&service_error)
                    )));
                }
            }
        }
        unreachable!()
    }

    /// Delete an object, with retry on transient errors.
    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        for attempt in 0..=MAX_RETRIES {
            let result = self
                .s3_client
                .delete_object()
                .bucket(&self.bucket_name)
                .key(key)
                .send()
                .await;

            match result {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if Self::is_retryable_s3_error(&e) && attempt < MAX_RETRIES {
                        warn!(attempt, key, "S3 delete_object retryable error, retrying");
                        Self::backoff_sleep(attempt).await;
                        continue;
                    }
                    return Err(StorageError::Backend(format!(
                        "S3 delete_object error for {}: {}",
                        key,
                        DisplayErrorContext(&e)
                    )));
                }
            }
        }
        unreachable!()
    }

    /// Delete up to `DELETE_BATCH_SIZE` keys in one request, with retry.
    async fn delete_objects(&self, keys: &[String]) -> Result<(), StorageError> {
        let identifiers = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| StorageError::Backend(format!("Invalid object key {}: {}", key, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::Backend(format!("Invalid delete request: {}", e)))?;

        for attempt in 0..=MAX_RETRIES {
            let result = self
                .s3_client
                .delete_objects()
                .bucket(&self.bucket_name)
                .delete(delete.clone())
                .send()
                .await;

            match result {
                Ok(output) => {
                    let failures = output.errors();
                    if let Some(first) = failures.first() {
                        return Err(StorageError::Backend(format!(
                            "S3 delete_objects failed for {} keys (first: {} - {})",
                            failures.len(),
                            first.key().unwrap_or_default(),
                            first.message().unwrap_or_default()
                        )));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if Self::is_retryable_s3_error(&e) && attempt < MAX_RETRIES {
                        warn!(attempt, "S3 delete_objects retryable error, retrying");
                        Self::backoff_sleep(attempt).await;
                        continue;
                    }
                    return Err(StorageError::Backend(format!(
                        "S3 delete_objects error: {}",
                        DisplayErrorContext(&e)
                    )));
                }
            }
        }
        unreachable!()
    }

    /// List objects with a prefix (all objects when `None`), with retry on transient errors.
    async fn list_objects(&self, prefix: Option<&str>) -> Result<Vec<ObjectSummary>, StorageError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .s3_client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .set_prefix(prefix.map(str::to_string));

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let output = {
                let mut result = None;
                for attempt in 0..=MAX_RETRIES {
                    match request.clone().send().await {
                        Ok(o) => {
                            result = Some(o);
                            break;
                        }
                        Err(e) => {
                            if Self::is_retryable_s3_error(&e) && attempt < MAX_RETRIES {
                                warn!(attempt, ?prefix, "S3 list_objects retryable error, retrying");
                                Self::backoff_sleep(attempt).await;
                                continue;
                            }
                            return Err(StorageError::Backend(format!(
                                "S3 list_objects error: {}",
                                DisplayErrorContext(&e)
                            )));
                        }
                    }
                }
                result.ok_or_else(|| {
                    StorageError::Backend("S3 list_objects exhausted retries".to_string())
                })?
            };

            for obj in output.contents() {
                let Some(key) = obj.key() else {
                    continue;
                };
                let last_modified = obj
                    .last_modified()
                    .and_then(|dt| chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
                    .unwrap_or_else(chrono::Utc::now);
                objects.push(ObjectSummary {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified,
                });
            }

            if output.is_truncated().unwrap_or(false) {
                continuation_token = output.next_continuation_token().map(str::to_string);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(objects)
    }
}

/// Simple jitter: random-ish value 0..50ms using timestamp nanos.
fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % 50)
        .unwrap_or(0)
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    fn backend_id(&self) -> String {
        format!("s3:{}", self.bucket_name)
    }

    #[instrument(skip(self, content), level = "debug", fields(content_len = content.len()))]
    async fn put(
        &self,
        content: Bytes,
        folder_path: &str,
        filename: &str,
    ) -> Result<StoredFileInfo, StorageError> {
        let filename = last_segment(filename).to_string();
        if filename.is_empty() {
            return Err(StorageError::InvalidPath("empty filename".to_string()));
        }

        let folder = normalize_path(folder_path);
        let key = join_path(&folder, &filename);
        let slug = file_slug(&filename);
        let sha256 = content_digest(&content);
        let size_bytes = content.len() as u64;

        self.put_object(&key, content, &[("slug", slug.as_str()), ("sha256", sha256.as_str())])
            .await?;

        info!("Uploaded file to S3: {}", key);
        Ok(StoredFileInfo {
            filename,
            path: key,
            slug,
            folder: if folder.is_empty() { "/".to_string() } else { folder },
            size_bytes,
            sha256,
            backend: self.backend_name().to_string(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let key = normalize_path(path);
        if key.is_empty() || !self.object_exists(&key).await? {
            return Err(StorageError::NotFound(format!("File not found: {}", key)));
        }

        self.delete_object(&key).await?;
        info!("Deleted file from S3: {}", key);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_folder(&self, path: &str) -> Result<(), StorageError> {
        let folder = normalize_path(path);
        if folder.is_empty() {
            return Err(StorageError::InvalidPath(
                "refusing to delete the whole bucket".to_string(),
            ));
        }

        let prefix = format!("{}/", folder);
        let keys: Vec<String> = self
            .list_objects(Some(&prefix))
            .await?
            .into_iter()
            .map(|o| o.key)
            .collect();

        if keys.is_empty() {
            return Err(StorageError::NotFound(format!("Folder not found: {}", folder)));
        }

        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            self.delete_objects(batch).await?;
        }

        info!("Deleted folder from S3: {} ({} objects)", folder, keys.len());
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn create_folder(&self, path: &str) -> Result<(), StorageError> {
        let folder = normalize_path(path);
        if folder.is_empty() {
            return Ok(());
        }

        // Re-putting an existing marker overwrites it, so this is idempotent
        let marker = format!("{}/", folder);
        self.put_object(&marker, Bytes::new(), &[]).await?;
        debug!("Created folder in S3: {}", marker);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_all(&self) -> Result<ListingResult, StorageError> {
        let objects = self.list_objects(None).await?;
        let count = objects.len();
        let listing = build_listing(objects);

        debug!(
            "Listed {} objects in bucket {} ({} implicit folders)",
            count,
            self.bucket_name,
            listing.implicit_folders.len()
        );
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::S3ClientOptions;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BUCKET: &str = "test-bucket";

    fn backend(server: &MockServer) -> ObjectStoreBackend {
        let options = S3ClientOptions {
            access_key_id: "test-key".into(),
            secret_access_key: "test-secret".into(),
            region: "us-east-1".into(),
            endpoint_url: Some(server.uri()),
        };
        ObjectStoreBackend::new(options.build_client(), BUCKET.to_string())
    }

    fn xml(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body, "application/xml")
    }

    /// A ListObjectsV2 page holding `keys`.
    fn list_page(keys: &[String]) -> ResponseTemplate {
        let contents: String = keys
            .iter()
            .map(|key| {
                format!(
                    "<Contents><Key>{}</Key><LastModified>2024-05-01T12:00:00.000Z</LastModified>\
                     <ETag>&quot;etag&quot;</ETag><Size>5</Size><StorageClass>STANDARD</StorageClass></Contents>",
                    key
                )
            })
            .collect();
        xml(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Name>{}</Name><KeyCount>{}</KeyCount><MaxKeys>1000</MaxKeys>\
             <IsTruncated>false</IsTruncated>{}</ListBucketResult>",
            BUCKET,
            keys.len(),
            contents
        ))
    }

    fn delete_result() -> ResponseTemplate {
        xml("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <DeleteResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"></DeleteResult>"
            .to_string())
    }

    #[tokio::test]
    async fn test_put_builds_key_slug_and_metadata() {
        let server = MockServer::start().await;
        let digest = content_digest(b"hello");
        Mock::given(method("PUT"))
            .and(path("/test-bucket/Projects/Q3/Q3-Report.PDF"))
            .and(header("x-amz-meta-slug", "q3-report.PDF"))
            .and(header("x-amz-meta-sha256", digest.as_str()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let info = backend(&server)
            .put(Bytes::from_static(b"hello"), "/Projects//Q3/", "nested/Q3-Report.PDF")
            .await
            .unwrap();

        assert_eq!(info.filename, "Q3-Report.PDF");
        assert_eq!(info.path, "Projects/Q3/Q3-Report.PDF");
        assert_eq!(info.folder, "Projects/Q3");
        assert_eq!(info.slug, "q3-report.PDF");
        assert_eq!(info.size_bytes, 5);
        assert_eq!(info.sha256, digest);
        assert_eq!(info.backend, "s3");
    }

    #[tokio::test]
    async fn test_put_rejects_empty_filename() {
        let server = MockServer::start().await;
        let err = backend(&server)
            .put(Bytes::from_static(b"x"), "docs", "/")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/test-bucket/docs/missing.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let err = backend(&server)
            .delete_file("docs/missing.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_existing_file() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/test-bucket/docs/a.txt"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/test-bucket/docs/a.txt"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server).delete_file("/docs/a.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_create_folder_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/test-bucket/p/q/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let backend = backend(&server);
        backend.create_folder("p/q").await.unwrap();
        backend.create_folder("/p/q/").await.unwrap();
        // The bucket root needs no marker
        backend.create_folder("").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_all_synthesizes_implicit_folders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("list-type", "2"))
            .respond_with(list_page(&["a/b/file.txt".to_string()]))
            .mount(&server)
            .await;

        let listing = backend(&server).list_all().await.unwrap();
        assert_eq!(listing.items.len(), 1);
        assert_eq!(listing.items[0].path, "a/b/file.txt");
        assert_eq!(
            listing.implicit_folders.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["a", "a/b"]
        );
    }

    #[tokio::test]
    async fn test_delete_empty_folder_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("list-type", "2"))
            .and(query_param("prefix", "empty/"))
            .respond_with(list_page(&[]))
            .mount(&server)
            .await;

        let backend = backend(&server);
        let err = backend.delete_folder("empty").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        let err = backend.delete_folder("/").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_delete_folder_batches_keys() {
        let server = MockServer::start().await;
        let keys: Vec<String> = (0..1500).map(|i| format!("bulk/file{}.txt", i)).collect();
        Mock::given(method("GET"))
            .and(query_param("list-type", "2"))
            .and(query_param("prefix", "bulk/"))
            .respond_with(list_page(&keys))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(delete_result())
            .expect(2)
            .mount(&server)
            .await;

        backend(&server).delete_folder("bulk").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let mut batch_sizes: Vec<usize> = requests
            .iter()
            .filter(|r| r.method.as_str() == "POST")
            .map(|r| String::from_utf8_lossy(&r.body).matches("<Key>").count())
            .collect();
        batch_sizes.sort_unstable();
        assert_eq!(batch_sizes, vec![500, 1000]);
    }
}
