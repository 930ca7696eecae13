//! Core data models.
//!
//! Buckets and objects map to the store's metadata tables via
//! `sqlx::FromRow`; ledger and history rows are plain records owned by their
//! repositories. Everything serializes as JSON via `serde`.

pub mod bucket;
pub mod copy;
pub mod event;
pub mod object;
pub mod size_sample;
