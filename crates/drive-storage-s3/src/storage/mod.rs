mod s3;

pub use s3::ObjectStoreBackend;
