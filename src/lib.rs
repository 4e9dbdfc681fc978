//! Media ingestion for the recipe catalog.
//!
//! Multipart uploads are decoded by hand, every file is sniffed by content,
//! cleared files get collision-resistant names and land in one directory per
//! recipe or user, and the owning record's media list is kept in step.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
