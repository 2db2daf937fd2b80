//! Core data models for the upload/build service.
//!
//! Uploads are transient files on disk; the records here carry only the
//! per-request bookkeeping and serialize naturally as JSON via `serde`.

pub mod upload;
