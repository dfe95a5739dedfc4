//! Report renderers for scan results.
//!
//! - [`terminal`]: summary box plus a per-detector status table; respects `--verbose` / `--quiet`.
//! - [`json`]: machine-readable evaluations and written code locations.

pub mod json;
pub mod terminal;
