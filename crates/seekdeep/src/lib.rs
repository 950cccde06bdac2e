//! Public facade crate for `seekdeep`.
//!
//! This crate intentionally contains no IO or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `seekdeep-core`.

pub use seekdeep_core::*;
