//! Core pipeline orchestration and domain logic for SpaceCraft.
//!
//! This crate ties together the archive.org client, the local content cache,
//! custom overlays and the Unity export into end-to-end workflows
//! (e.g., `run_pipeline`).

pub mod cache;
pub mod cover;
pub mod export;
pub mod filter;
pub mod import;
pub mod normalize;
pub mod overlay;
pub mod pipeline;
pub mod validate;
