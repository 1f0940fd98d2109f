//! Devwin library: customized bootable Windows installation media.
//!
//! Exposes the pipeline stages for the `devwin` binary and for integration
//! testing with fake platform adapters.
//!
//! See `tests/helpers.rs` for the synthetic image writer and fakes.

pub mod archive;
pub mod cache;
pub mod cleanup;
pub mod common;
pub mod config;
pub mod eltorito;
pub mod error;
pub mod mount;
pub mod pipeline;
pub mod platform;
pub mod preflight;
pub mod process;
pub mod repack;
pub mod timing;

pub use error::{Error, Result};
