//! Media ingestion pipeline, leaves first: wire decoding, content sniffing,
//! sanitizing, disk storage, and the coordinator that ties them to entity
//! records.

pub mod classifier;
pub mod coordinator;
pub mod media_store;
pub mod multipart;
pub mod reconcile;
pub mod repository;
pub mod sanitizer;
