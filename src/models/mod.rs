//! Core data models for the recipe media service.
//!
//! `entity` describes the records that own media; `upload` holds the
//! request-scoped types that flow through the ingestion pipeline.

pub mod entity;
pub mod upload;
