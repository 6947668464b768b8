//! # deeplift_explain
//!
//! DeepLIFT-Rescale feature attribution over [`deeplift_core`] graphs.
//!
//! This crate provides:
//! - [`ReferenceRecord`]: call-scoped capture of each rectifying unit's
//!   (input, output) pairs across the reference and real passes
//! - [`RescaleRule`] / [`rescale_gradient`]: the finite-difference backward
//!   rule with its smoothed fallback near the singularity
//! - [`GradTimesInputExplainer`] and [`DeepLiftRescaleExplainer`]
//!
//! ## Scope
//!
//! Attribution flows exactly through chains of linear units and ReLU
//! activations; ReLU is the only nonlinearity with an installed Rescale
//! rule. Models are explained one call at a time: the explainer borrows the
//! graph for its lifetime and every call starts from fresh recorded state.
//!
//! ## Example
//!
//! ```rust,ignore
//! use deeplift_core::Graph;
//! use deeplift_explain::DeepLiftRescaleExplainer;
//!
//! let mut graph = Graph::new().with_linear(weights).with_relu();
//! let explainer = DeepLiftRescaleExplainer::new(&mut graph);
//! let attribution = explainer.explain(&input, Some(0))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod explain;
mod recorder;
mod rescale;

pub use explain::{
    Attribution, AttributionMethod, DeepLiftRescaleExplainer, GradTimesInputExplainer,
};
pub use recorder::{ObservedPair, ReferenceRecord};
pub use rescale::{rescale_gradient, RescaleConfig, RescaleRule, DEFAULT_EPSILON};
