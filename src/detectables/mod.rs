//! Ecosystem detectors. Each submodule implements [`crate::detectable::Detectable`]
//! for one input kind and is wired into the scan by `detector::registry`.

pub mod cargo;
pub mod clang;
pub mod maven;
pub mod npm;
pub mod pip;
pub mod setuptools;
pub mod swift;
pub mod xcode;
