//! The DeepLIFT Rescale backward rule.
//!
//! In place of the local ReLU derivative, the rule propagates the discrete
//! slope between the reference and real operating points,
//! `delta_out / delta_in`, falling back to a smoothed approximation where
//! the two points (nearly) coincide and the slope degenerates to 0/0.
//!
//! Based on the formulation in DeepExplain, <https://arxiv.org/abs/1711.06104>.

use burn::prelude::*;
use deeplift_core::{ActivationKind, ActivationObserver, ActivationRule, Result, UnitId};
use serde::{Deserialize, Serialize};

use crate::recorder::{ObservedPair, ReferenceRecord};

/// Threshold below which `delta_in` is treated as a removable singularity.
pub const DEFAULT_EPSILON: f32 = 1e-5;

/// Configuration for the Rescale rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescaleConfig {
    /// Singularity threshold for `|delta_in|`.
    pub epsilon: f32,
}

impl Default for RescaleConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

/// Rescale gradient for one rectifying unit.
///
/// Elementwise, with `delta_in = actual_in - ref_in` and
/// `delta_out = actual_out - ref_out`:
/// - where `|delta_in| > epsilon`: `upstream * delta_out / delta_in`
/// - elsewhere: `0.5 * upstream` where `ref_in + actual_in > 0`, else `0`
///
/// The two cases are disjoint indicator masks, so their sum is the whole
/// gradient. Near-singular lanes are excluded from the division itself, not
/// just zeroed afterwards, so no NaN can leak out of the masked branch.
pub fn rescale_gradient<B: Backend>(
    pair: &ObservedPair<B>,
    upstream: Tensor<B, 2>,
    epsilon: f32,
) -> Tensor<B, 2> {
    let delta_in = pair.actual_input.clone() - pair.reference_input.clone();
    let delta_out = pair.actual_output.clone() - pair.reference_output.clone();

    let far = delta_in.clone().abs().greater_elem(epsilon);
    let near = far.clone().bool_not();

    let safe_in = delta_in.mask_fill(near.clone(), 1.0);
    let slope = delta_out / safe_in;
    let far_grad = upstream.clone() * slope * far.float();

    let crossing = (pair.reference_input.clone() + pair.actual_input.clone())
        .greater_elem(0.0)
        .float();
    let near_grad = upstream * crossing * near.float() * 0.5;

    far_grad + near_grad
}

/// The complete Rescale strategy: records activations during the forward
/// passes (as an [`ActivationObserver`]) and replaces their backward rule
/// (as an [`ActivationRule`]) by consuming the recorded pairs.
#[derive(Debug, Clone)]
pub struct RescaleRule<B: Backend> {
    record: ReferenceRecord<B>,
    epsilon: f32,
}

impl<B: Backend> RescaleRule<B> {
    /// Create a rule with a fresh record and the default epsilon.
    pub fn new() -> Self {
        Self::with_config(&RescaleConfig::default())
    }

    /// Create a rule with a fresh record and the given configuration.
    pub fn with_config(config: &RescaleConfig) -> Self {
        Self {
            record: ReferenceRecord::new(),
            epsilon: config.epsilon,
        }
    }

    /// Create a rule over an already-populated record.
    pub fn from_record(record: ReferenceRecord<B>, config: &RescaleConfig) -> Self {
        Self {
            record,
            epsilon: config.epsilon,
        }
    }

    /// The recorded observations accumulated so far.
    pub fn record(&self) -> &ReferenceRecord<B> {
        &self.record
    }
}

impl<B: Backend> Default for RescaleRule<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ActivationObserver<B> for RescaleRule<B> {
    fn observe(
        &mut self,
        unit: UnitId,
        kind: ActivationKind,
        input: &Tensor<B, 2>,
        output: &Tensor<B, 2>,
    ) {
        self.record.observe(unit, kind, input, output);
    }
}

impl<B: Backend> ActivationRule<B> for RescaleRule<B> {
    fn activation_grad(
        &mut self,
        unit: UnitId,
        kind: ActivationKind,
        upstream: Tensor<B, 2>,
        _pre_activation: &Tensor<B, 2>,
    ) -> Result<Tensor<B, 2>> {
        // Only ReLU exists; the recorded pair already reflects its forward.
        let ActivationKind::Relu = kind;
        let pair = self.record.take_pair(unit)?;
        Ok(rescale_gradient(&pair, upstream, self.epsilon))
    }
}
