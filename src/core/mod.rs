pub mod catalog;
pub mod duplicate;
pub mod fingerprint;
pub mod ingest;
pub mod payload;
pub mod photo;
pub mod trash;
