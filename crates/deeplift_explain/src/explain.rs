//! Explainers: gradient×input and DeepLIFT-Rescale.

use burn::prelude::*;
use deeplift_core::{
    ActivationObserver, ActivationRule, ExplainError, Graph, Result, StandardRule,
};
use serde::{Deserialize, Serialize};

use crate::rescale::{RescaleConfig, RescaleRule};

/// Method that produced an attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributionMethod {
    /// Plain gradient multiplied elementwise by the input.
    GradTimesInput,
    /// DeepLIFT with the Rescale backward rule against a zero reference.
    DeepLiftRescale,
}

/// Per-feature attribution scores for one input.
#[derive(Debug, Clone)]
pub struct Attribution<B: Backend> {
    /// The attribution values, same shape as the input.
    pub values: Tensor<B, 1>,
    /// The method used.
    pub method: AttributionMethod,
    /// Target output unit, if one was selected.
    pub target: Option<usize>,
}

impl<B: Backend> Attribution<B> {
    /// Number of features.
    pub fn len(&self) -> usize {
        self.values.dims()[0]
    }

    /// Whether the attribution is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalize the attribution values to [0, 1].
    pub fn normalize(&self) -> Self {
        let min_val: f32 = self.values.clone().min().into_scalar().elem();
        let max_val: f32 = self.values.clone().max().into_scalar().elem();
        let range = max_val - min_val;

        let normalized = if range > 1e-8 {
            (self.values.clone() - min_val) / range
        } else {
            self.values.clone()
        };

        Self {
            values: normalized,
            method: self.method,
            target: self.target,
        }
    }
}

/// Check the input against the graph before any pass runs.
fn validate_input<B: Backend>(graph: &Graph<B>, input: &Tensor<B, 1>) -> Result<usize> {
    if graph.is_empty() {
        return Err(ExplainError::EmptyGraph);
    }
    let n = input.dims()[0];
    if let Some(expected) = graph.input_width() {
        if expected != n {
            return Err(ExplainError::ShapeMismatch {
                expected: format!("input of {expected} feature(s)"),
                got: format!("{n} feature(s)"),
            });
        }
    }
    Ok(n)
}

/// Upstream gradient seeded at the output: one-hot at `target`, or all ones
/// when no target is selected.
fn seed_gradient<B: Backend>(
    output: &Tensor<B, 2>,
    target: Option<usize>,
) -> Result<Tensor<B, 2>> {
    let [_, width] = output.dims();
    match target {
        None => Ok(output.ones_like()),
        Some(index) if index < width => {
            let mut seed = vec![0.0f32; width];
            seed[index] = 1.0;
            Ok(Tensor::<B, 1>::from_floats(seed.as_slice(), &output.device()).reshape([1, width]))
        }
        Some(index) => Err(ExplainError::TargetOutOfRange {
            target: index,
            outputs: width,
        }),
    }
}

/// Gradient×input explainer.
///
/// Runs one forward and one backward pass over the graph with the standard
/// activation rule and returns the input-feature gradient multiplied
/// elementwise by the input.
#[derive(Debug)]
pub struct GradTimesInputExplainer<'m, B: Backend> {
    model: &'m Graph<B>,
}

impl<'m, B: Backend> GradTimesInputExplainer<'m, B> {
    /// Create an explainer over the given model.
    pub fn new(model: &'m Graph<B>) -> Self {
        Self { model }
    }

    /// The model being explained.
    pub fn model(&self) -> &Graph<B> {
        self.model
    }

    /// Explain `input` for the chosen output unit.
    pub fn explain(
        &self,
        input: &Tensor<B, 1>,
        target: Option<usize>,
    ) -> Result<Attribution<B>> {
        let mut rule = StandardRule;
        let values = self.explain_with(input, target, &mut rule)?;
        Ok(Attribution {
            values,
            method: AttributionMethod::GradTimesInput,
            target,
        })
    }

    /// The gradient×input procedure with a caller-supplied activation
    /// strategy: `strategy` observes the forward pass and supplies the
    /// backward rule at every activation unit.
    pub fn explain_with<S>(
        &self,
        input: &Tensor<B, 1>,
        target: Option<usize>,
        strategy: &mut S,
    ) -> Result<Tensor<B, 1>>
    where
        S: ActivationObserver<B> + ActivationRule<B>,
    {
        let n = validate_input(self.model, input)?;
        let x = input.clone().reshape([1, n]);
        let pass = self.model.run(x, &mut *strategy);
        let seed = seed_gradient(&pass.output, target)?;
        let grad = self.model.backward(&pass, seed, strategy)?;
        Ok(grad.reshape([n]) * input.clone())
    }
}

/// DeepLIFT-Rescale explainer.
///
/// Instruments every rectifying unit of the model at construction, then per
/// [`Self::explain`] call: runs the model on an all-zero reference input,
/// runs it on the real input, and propagates the output gradient back with
/// the Rescale rule instead of the local ReLU derivative. The recorded
/// state is scoped to the call; nothing leaks between explanations.
///
/// The explainer holds the model exclusively for its lifetime, so two
/// overlapping explanations over one model cannot interleave their
/// reference state.
#[derive(Debug)]
pub struct DeepLiftRescaleExplainer<'m, B: Backend> {
    base: GradTimesInputExplainer<'m, B>,
    config: RescaleConfig,
}

impl<'m, B: Backend> DeepLiftRescaleExplainer<'m, B> {
    /// Create an explainer over the given model with the default epsilon.
    pub fn new(model: &'m mut Graph<B>) -> Self {
        Self::with_config(model, RescaleConfig::default())
    }

    /// Create an explainer with an explicit configuration.
    pub fn with_config(model: &'m mut Graph<B>, config: RescaleConfig) -> Self {
        model.instrument_activations();
        Self {
            base: GradTimesInputExplainer::new(model),
            config,
        }
    }

    /// The model being explained.
    pub fn model(&self) -> &Graph<B> {
        self.base.model()
    }

    /// Attribute the difference between the model's output on `input` and
    /// its output on an all-zero reference input back to the input features.
    pub fn explain(
        &self,
        input: &Tensor<B, 1>,
        target: Option<usize>,
    ) -> Result<Attribution<B>> {
        let n = validate_input(self.model(), input)?;

        let mut strategy = RescaleRule::with_config(&self.config);

        let baseline = input.zeros_like().reshape([1, n]);
        let reference = self.model().run(baseline, &mut strategy);
        tracing::debug!(
            tracked_units = self.model().tracked_activations(),
            output_width = reference.output.dims()[1],
            "reference pass complete"
        );

        let values = self.base.explain_with(input, target, &mut strategy)?;
        tracing::debug!(features = values.dims()[0], ?target, "attribution computed");

        Ok(Attribution {
            values,
            method: AttributionMethod::DeepLiftRescale,
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deeplift_core::backend::NdArray;

    type TestBackend = NdArray;

    fn vector(values: &[f32]) -> Tensor<TestBackend, 1> {
        let device = Default::default();
        Tensor::<TestBackend, 1>::from_floats(values, &device)
    }

    fn matrix(rows: usize, cols: usize, values: &[f32]) -> Tensor<TestBackend, 2> {
        let device = Default::default();
        Tensor::<TestBackend, 1>::from_floats(values, &device).reshape([rows, cols])
    }

    #[test]
    fn test_seed_gradient_one_hot() {
        let output = matrix(1, 3, &[0.1, 0.2, 0.3]);
        let seed = seed_gradient(&output, Some(1)).unwrap();
        let values = seed.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_seed_gradient_all_ones_without_target() {
        let output = matrix(1, 2, &[0.5, -0.5]);
        let seed = seed_gradient(&output, None).unwrap();
        let values = seed.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![1.0, 1.0]);
    }

    #[test]
    fn test_seed_gradient_target_out_of_range() {
        let output = matrix(1, 2, &[0.0, 0.0]);
        let err = seed_gradient(&output, Some(2)).unwrap_err();
        assert!(matches!(
            err,
            ExplainError::TargetOutOfRange {
                target: 2,
                outputs: 2
            }
        ));
    }

    #[test]
    fn test_validate_rejects_empty_graph() {
        let graph: Graph<TestBackend> = Graph::new();
        let err = validate_input(&graph, &vector(&[1.0])).unwrap_err();
        assert!(matches!(err, ExplainError::EmptyGraph));
    }

    #[test]
    fn test_validate_rejects_width_mismatch() {
        let graph = Graph::new().with_linear(matrix(2, 1, &[1.0, 1.0]));
        let err = validate_input(&graph, &vector(&[1.0, 2.0, 3.0])).unwrap_err();
        assert!(matches!(err, ExplainError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_grad_times_input_known_values() {
        // y = relu(x . [[2], [-1]]); at x = [3, 1]: pre-activation 5, active
        let graph = Graph::new()
            .with_linear(matrix(2, 1, &[2.0, -1.0]))
            .with_relu();
        let explainer = GradTimesInputExplainer::new(&graph);

        let attribution = explainer.explain(&vector(&[3.0, 1.0]), Some(0)).unwrap();
        assert_eq!(attribution.method, AttributionMethod::GradTimesInput);
        assert_eq!(attribution.target, Some(0));

        // gradient [2, -1] times input [3, 1]
        let values = attribution.values.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![6.0, -1.0]);
    }

    #[test]
    fn test_normalize_bounds() {
        let attribution = Attribution::<TestBackend> {
            values: vector(&[2.0, 4.0, 10.0]),
            method: AttributionMethod::GradTimesInput,
            target: None,
        };
        let normalized = attribution.normalize();
        let values = normalized.values.into_data().to_vec::<f32>().unwrap();
        assert!((values[0] - 0.0).abs() < 1e-6);
        assert!((values[1] - 0.25).abs() < 1e-6);
        assert!((values[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_attribution_method_serde() {
        let json = serde_json::to_string(&AttributionMethod::DeepLiftRescale).unwrap();
        let decoded: AttributionMethod = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, AttributionMethod::DeepLiftRescale);
    }
}
