use aws_config::Region;
use aws_sdk_s3::config::{BehaviorVersion, Credentials};
use aws_sdk_s3::Client as S3Client;

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct S3ClientOptions {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// Custom endpoint (R2, MinIO); switches to path-style addressing
    pub endpoint_url: Option<String>,
}

impl S3ClientOptions {
    /// Build an S3 client from static credentials.
    pub fn build_client(&self) -> S3Client {
        let credentials = Credentials::new(
            &self.access_key_id,
            &self.secret_access_key,
            None,
            None,
            "intake-drive",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(self.region.clone()));

        if let Some(endpoint) = self.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        S3Client::from_conf(builder.build())
    }
}
