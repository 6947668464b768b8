//! # deeplift_core
//!
//! Core types for DeepLIFT-Rescale attribution over small unit graphs.
//!
//! This crate provides:
//! - [`Graph`]: an ordered chain of linear and activation units with an
//!   explicit, rule-driven backward walk
//! - [`ActivationObserver`] / [`ActivationRule`]: the forward and backward
//!   hook points an explainer uses to observe and re-route activations
//! - [`ExplainError`] and the crate [`Result`] alias
//!
//! ## Shape convention
//!
//! Graphs operate on `(1, features)` tensors: a single sample with a leading
//! singleton batch dimension. Explainers accept and return rank-1 feature
//! vectors and add the batch dimension internally.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod graph;

pub use error::{ExplainError, Result};
pub use graph::{
    ActivationBehavior, ActivationKind, ActivationObserver, ActivationRule, ActivationUnit,
    ForwardPass, Graph, LinearUnit, NullObserver, StandardRule, Unit, UnitId,
};

/// Backend type aliases for convenience
pub mod backend {
    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::NdArray;

    #[cfg(feature = "backend-wgpu")]
    pub use burn_wgpu::Wgpu;
}
