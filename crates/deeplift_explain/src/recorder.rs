//! Reference-pass recording.
//!
//! A [`ReferenceRecord`] is the call-scoped context that collects what the
//! instrumented activations see: per unit, an ordered sequence of
//! pre-activation inputs and one of post-activation outputs. Over one
//! explanation the sequences grow to exactly two entries each (reference
//! pass first, real pass second) and are then consumed by the Rescale rule.

use std::collections::BTreeMap;

use burn::prelude::*;
use deeplift_core::{ActivationKind, ActivationObserver, ExplainError, Result, UnitId};

/// The two (input, output) observations for one rectifying unit:
/// reference pass and real pass.
#[derive(Debug, Clone)]
pub struct ObservedPair<B: Backend> {
    /// Pre-activation input seen during the reference pass.
    pub reference_input: Tensor<B, 2>,
    /// Pre-activation input seen during the real pass.
    pub actual_input: Tensor<B, 2>,
    /// Post-activation output seen during the reference pass.
    pub reference_output: Tensor<B, 2>,
    /// Post-activation output seen during the real pass.
    pub actual_output: Tensor<B, 2>,
}

/// Per-unit observation sequences for one explanation call.
///
/// Observations are value snapshots (tensor clones), so later mutation of
/// the pass's tensors cannot disturb recorded reference data.
#[derive(Debug, Clone)]
pub struct ReferenceRecord<B: Backend> {
    inputs: BTreeMap<UnitId, Vec<Tensor<B, 2>>>,
    outputs: BTreeMap<UnitId, Vec<Tensor<B, 2>>>,
}

impl<B: Backend> ReferenceRecord<B> {
    /// Create an empty record.
    pub fn new() -> Self {
        Self {
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Clear all recorded sequences. Idempotent.
    pub fn reset(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Number of recorded (inputs, outputs) for a unit.
    pub fn recorded(&self, unit: UnitId) -> (usize, usize) {
        (
            self.inputs.get(&unit).map_or(0, Vec::len),
            self.outputs.get(&unit).map_or(0, Vec::len),
        )
    }

    /// Consume the unit's recorded state as a reference/actual pair.
    ///
    /// # Errors
    ///
    /// [`ExplainError::IncompleteReferenceState`] unless exactly two inputs
    /// and two outputs were recorded — e.g. the reference pass never ran, or
    /// the unit fired a different number of times on the two passes.
    pub fn take_pair(&mut self, unit: UnitId) -> Result<ObservedPair<B>> {
        let inputs = self.inputs.remove(&unit).unwrap_or_default();
        let outputs = self.outputs.remove(&unit).unwrap_or_default();
        let counts = (inputs.len(), outputs.len());
        match (
            <[Tensor<B, 2>; 2]>::try_from(inputs),
            <[Tensor<B, 2>; 2]>::try_from(outputs),
        ) {
            (Ok([reference_input, actual_input]), Ok([reference_output, actual_output])) => {
                Ok(ObservedPair {
                    reference_input,
                    actual_input,
                    reference_output,
                    actual_output,
                })
            }
            _ => Err(ExplainError::IncompleteReferenceState {
                unit,
                inputs: counts.0,
                outputs: counts.1,
            }),
        }
    }
}

impl<B: Backend> Default for ReferenceRecord<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ActivationObserver<B> for ReferenceRecord<B> {
    fn observe(
        &mut self,
        unit: UnitId,
        _kind: ActivationKind,
        input: &Tensor<B, 2>,
        output: &Tensor<B, 2>,
    ) {
        self.inputs.entry(unit).or_default().push(input.clone());
        self.outputs.entry(unit).or_default().push(output.clone());
    }
}
