//! recon-ingest: load reconnaissance tool output into Qdrant
//!
//! The pipeline for one run is:
//! input file -> [`normalize`] -> [`embed`] + [`correlate`] -> [`upsert`] -> [`store`]
//!
//! [`bootstrap`] makes sure the destination collection and its payload
//! indexes exist before the first write.

pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod correlate;
pub mod embed;
pub mod error;
pub mod input;
pub mod normalize;
pub mod progress;
pub mod store;
pub mod upsert;
