//! Unit graphs: ordered chains of linear and activation units.
//!
//! A [`Graph`] is the model object attributions are computed over. It is a
//! sequence of [`Unit`]s feeding one into the next, with shapes `(1, features)`
//! throughout. Gradients are propagated explicitly by [`Graph::backward`],
//! which applies a caller-supplied [`ActivationRule`] at every activation
//! unit; this is the hook point that lets an explainer replace the ordinary
//! local derivative with a reference-based rule.

use burn::prelude::*;
use burn::tensor::activation::relu;
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};

/// Identifier of a unit within a graph: its position in the chain.
pub type UnitId = usize;

/// The nonlinearity computed by an activation unit.
///
/// Matching on this tag is how code identifies rectifying units; there is no
/// name-based discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    /// Rectified linear unit, `max(0, x)`.
    Relu,
}

/// How an activation unit behaves during a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationBehavior {
    /// Compute the activation and nothing else.
    Standard,
    /// Additionally report each (input, output) pair to the pass's
    /// [`ActivationObserver`]. Numerically identical to [`Self::Standard`].
    ReferenceTracking,
}

/// Receives per-invocation observations from reference-tracking activations.
pub trait ActivationObserver<B: Backend> {
    /// Called once per invocation of a reference-tracking activation unit,
    /// with the pre-activation input and post-activation output.
    fn observe(
        &mut self,
        unit: UnitId,
        kind: ActivationKind,
        input: &Tensor<B, 2>,
        output: &Tensor<B, 2>,
    );
}

/// Observer that discards all observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl<B: Backend> ActivationObserver<B> for NullObserver {
    fn observe(
        &mut self,
        _unit: UnitId,
        _kind: ActivationKind,
        _input: &Tensor<B, 2>,
        _output: &Tensor<B, 2>,
    ) {
    }
}

/// Computes the gradient flowing backward through an activation unit.
///
/// Implementations replace the unit's backward behavior wholesale: the graph
/// walk supplies the upstream gradient and the recorded pre-activation input,
/// and the rule decides what flows further down.
pub trait ActivationRule<B: Backend> {
    /// Gradient to propagate below the given activation unit.
    fn activation_grad(
        &mut self,
        unit: UnitId,
        kind: ActivationKind,
        upstream: Tensor<B, 2>,
        pre_activation: &Tensor<B, 2>,
    ) -> Result<Tensor<B, 2>>;
}

/// The ordinary local-derivative rule.
///
/// For ReLU this passes the upstream gradient through where the
/// pre-activation input is positive and zeroes it elsewhere. Also a no-op
/// [`ActivationObserver`], so it can serve as a complete standard strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRule;

impl<B: Backend> ActivationRule<B> for StandardRule {
    fn activation_grad(
        &mut self,
        _unit: UnitId,
        kind: ActivationKind,
        upstream: Tensor<B, 2>,
        pre_activation: &Tensor<B, 2>,
    ) -> Result<Tensor<B, 2>> {
        match kind {
            ActivationKind::Relu => {
                Ok(upstream * pre_activation.clone().greater_elem(0.0).float())
            }
        }
    }
}

impl<B: Backend> ActivationObserver<B> for StandardRule {
    fn observe(
        &mut self,
        _unit: UnitId,
        _kind: ActivationKind,
        _input: &Tensor<B, 2>,
        _output: &Tensor<B, 2>,
    ) {
    }
}

/// A fully connected unit, `y = x · W (+ b)`.
#[derive(Debug, Clone)]
pub struct LinearUnit<B: Backend> {
    weight: Tensor<B, 2>,
    bias: Option<Tensor<B, 1>>,
}

impl<B: Backend> LinearUnit<B> {
    /// Create a linear unit from a weight matrix of shape `(in, out)`.
    pub fn new(weight: Tensor<B, 2>) -> Self {
        Self { weight, bias: None }
    }

    /// Create a linear unit with a bias vector of shape `(out,)`.
    pub fn with_bias(weight: Tensor<B, 2>, bias: Tensor<B, 1>) -> Self {
        Self {
            weight,
            bias: Some(bias),
        }
    }

    /// Number of input features.
    pub fn in_features(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Number of output features.
    pub fn out_features(&self) -> usize {
        self.weight.dims()[1]
    }

    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let out = x.matmul(self.weight.clone());
        match &self.bias {
            Some(bias) => out + bias.clone().unsqueeze::<2>(),
            None => out,
        }
    }

    fn backward(&self, grad: Tensor<B, 2>) -> Tensor<B, 2> {
        grad.matmul(self.weight.clone().transpose())
    }
}

/// An activation unit: a nonlinearity tag plus its current behavior.
#[derive(Debug, Clone, Copy)]
pub struct ActivationUnit {
    kind: ActivationKind,
    behavior: ActivationBehavior,
}

impl ActivationUnit {
    /// Create an activation unit with [`ActivationBehavior::Standard`].
    pub fn new(kind: ActivationKind) -> Self {
        Self {
            kind,
            behavior: ActivationBehavior::Standard,
        }
    }

    /// The nonlinearity this unit computes.
    pub fn kind(&self) -> ActivationKind {
        self.kind
    }

    /// The unit's current forward behavior.
    pub fn behavior(&self) -> ActivationBehavior {
        self.behavior
    }

    /// Switch the unit's forward behavior.
    pub fn set_behavior(&mut self, behavior: ActivationBehavior) {
        self.behavior = behavior;
    }
}

/// A single computation unit in a graph.
#[derive(Debug, Clone)]
pub enum Unit<B: Backend> {
    /// Fully connected unit.
    Linear(LinearUnit<B>),
    /// Elementwise nonlinearity.
    Activation(ActivationUnit),
}

/// Per-unit data captured during one forward pass, consumed by
/// [`Graph::backward`].
#[derive(Debug, Clone)]
enum TraceStep<B: Backend> {
    Linear,
    Activation(Tensor<B, 2>),
}

/// The result of one forward pass: the output plus the per-unit trace the
/// backward walk needs.
#[derive(Debug, Clone)]
pub struct ForwardPass<B: Backend> {
    /// The graph's output, shape `(1, out_features)`.
    pub output: Tensor<B, 2>,
    steps: Vec<TraceStep<B>>,
}

/// An ordered chain of computation units.
#[derive(Debug, Clone)]
pub struct Graph<B: Backend> {
    units: Vec<Unit<B>>,
}

impl<B: Backend> Default for Graph<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Graph<B> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self { units: Vec::new() }
    }

    /// Append a unit.
    pub fn push(&mut self, unit: Unit<B>) {
        self.units.push(unit);
    }

    /// Append a linear unit with the given weight matrix `(in, out)`.
    #[must_use]
    pub fn with_linear(mut self, weight: Tensor<B, 2>) -> Self {
        self.push(Unit::Linear(LinearUnit::new(weight)));
        self
    }

    /// Append a linear unit with weight `(in, out)` and bias `(out,)`.
    #[must_use]
    pub fn with_linear_bias(mut self, weight: Tensor<B, 2>, bias: Tensor<B, 1>) -> Self {
        self.push(Unit::Linear(LinearUnit::with_bias(weight, bias)));
        self
    }

    /// Append a ReLU activation unit.
    #[must_use]
    pub fn with_relu(mut self) -> Self {
        self.push(Unit::Activation(ActivationUnit::new(ActivationKind::Relu)));
        self
    }

    /// Number of units in the graph.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the graph has no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Input width the graph expects, if any unit constrains it.
    pub fn input_width(&self) -> Option<usize> {
        self.units.iter().find_map(|unit| match unit {
            Unit::Linear(linear) => Some(linear.in_features()),
            Unit::Activation(_) => None,
        })
    }

    /// Ids of all activation units, in forward order.
    pub fn activation_units(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.units
            .iter()
            .enumerate()
            .filter_map(|(id, unit)| match unit {
                Unit::Activation(_) => Some(id),
                Unit::Linear(_) => None,
            })
    }

    /// Visit every activation unit mutably.
    pub fn visit_activations_mut(&mut self, mut f: impl FnMut(UnitId, &mut ActivationUnit)) {
        for (id, unit) in self.units.iter_mut().enumerate() {
            if let Unit::Activation(activation) = unit {
                f(id, activation);
            }
        }
    }

    /// Switch every activation unit to [`ActivationBehavior::ReferenceTracking`].
    ///
    /// Purely additive: forward outputs are unchanged, the units merely start
    /// reporting their invocations to the pass's observer.
    pub fn instrument_activations(&mut self) {
        self.visit_activations_mut(|_, activation| {
            activation.set_behavior(ActivationBehavior::ReferenceTracking);
        });
    }

    /// Switch every activation unit back to [`ActivationBehavior::Standard`].
    pub fn restore_activations(&mut self) {
        self.visit_activations_mut(|_, activation| {
            activation.set_behavior(ActivationBehavior::Standard);
        });
    }

    /// Number of activation units currently reference-tracking.
    pub fn tracked_activations(&self) -> usize {
        self.units
            .iter()
            .filter(|unit| {
                matches!(
                    unit,
                    Unit::Activation(a) if a.behavior() == ActivationBehavior::ReferenceTracking
                )
            })
            .count()
    }

    /// Forward pass without observation, returning only the output.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.run(x, &mut NullObserver).output
    }

    /// Forward pass with an observer, returning the output and the trace
    /// needed for [`Self::backward`].
    pub fn run<O>(&self, x: Tensor<B, 2>, observer: &mut O) -> ForwardPass<B>
    where
        O: ActivationObserver<B> + ?Sized,
    {
        let mut steps = Vec::with_capacity(self.units.len());
        let mut value = x;
        for (id, unit) in self.units.iter().enumerate() {
            match unit {
                Unit::Linear(linear) => {
                    value = linear.forward(value);
                    steps.push(TraceStep::Linear);
                }
                Unit::Activation(activation) => {
                    let input = value;
                    let output = match activation.kind() {
                        ActivationKind::Relu => relu(input.clone()),
                    };
                    if activation.behavior() == ActivationBehavior::ReferenceTracking {
                        observer.observe(id, activation.kind(), &input, &output);
                    }
                    steps.push(TraceStep::Activation(input));
                    value = output;
                }
            }
        }
        ForwardPass {
            output: value,
            steps,
        }
    }

    /// Walk the graph in reverse, propagating `seed` from the output back to
    /// the input. Linear units apply their exact backward (`g · Wᵀ`);
    /// activation units defer to `rule`.
    pub fn backward<R>(
        &self,
        pass: &ForwardPass<B>,
        seed: Tensor<B, 2>,
        rule: &mut R,
    ) -> Result<Tensor<B, 2>>
    where
        R: ActivationRule<B> + ?Sized,
    {
        if pass.steps.len() != self.units.len() {
            return Err(ExplainError::Other(
                "forward pass does not belong to this graph".to_string(),
            ));
        }
        let mut grad = seed;
        for (id, unit) in self.units.iter().enumerate().rev() {
            grad = match (unit, &pass.steps[id]) {
                (Unit::Linear(linear), TraceStep::Linear) => linear.backward(grad),
                (Unit::Activation(activation), TraceStep::Activation(pre)) => {
                    rule.activation_grad(id, activation.kind(), grad, pre)?
                }
                _ => {
                    return Err(ExplainError::Other(
                        "forward pass does not belong to this graph".to_string(),
                    ))
                }
            };
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NdArray;

    type TestBackend = NdArray;

    fn row(values: &[f32]) -> Tensor<TestBackend, 2> {
        let device = Default::default();
        let n = values.len();
        Tensor::<TestBackend, 1>::from_floats(values, &device).reshape([1, n])
    }

    fn matrix(rows: usize, cols: usize, values: &[f32]) -> Tensor<TestBackend, 2> {
        let device = Default::default();
        Tensor::<TestBackend, 1>::from_floats(values, &device).reshape([rows, cols])
    }

    fn to_vec(t: Tensor<TestBackend, 2>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_linear_relu_forward() {
        let graph = Graph::new()
            .with_linear(matrix(2, 1, &[2.0, -1.0]))
            .with_relu();

        let out = to_vec(graph.forward(row(&[3.0, 1.0])));
        assert_eq!(out, vec![5.0]);

        let out = to_vec(graph.forward(row(&[0.0, 4.0])));
        assert_eq!(out, vec![0.0]);
    }

    #[test]
    fn test_linear_bias_broadcast() {
        let device = Default::default();
        let bias = Tensor::<TestBackend, 1>::from_floats([1.0, -1.0].as_slice(), &device);
        let graph = Graph::new().with_linear_bias(matrix(1, 2, &[1.0, 1.0]), bias);

        let out = to_vec(graph.forward(row(&[2.0])));
        assert_eq!(out, vec![3.0, 1.0]);
    }

    #[test]
    fn test_input_width() {
        let graph: Graph<TestBackend> = Graph::new().with_relu();
        assert_eq!(graph.input_width(), None);

        let graph = Graph::new()
            .with_relu()
            .with_linear(matrix(3, 2, &[0.0; 6]));
        assert_eq!(graph.input_width(), Some(3));
    }

    #[test]
    fn test_instrument_and_restore() {
        let mut graph = Graph::new()
            .with_linear(matrix(1, 1, &[1.0]))
            .with_relu()
            .with_linear(matrix(1, 1, &[1.0]))
            .with_relu();

        assert_eq!(graph.tracked_activations(), 0);
        graph.instrument_activations();
        assert_eq!(graph.tracked_activations(), 2);
        assert_eq!(graph.activation_units().collect::<Vec<_>>(), vec![1, 3]);

        graph.restore_activations();
        assert_eq!(graph.tracked_activations(), 0);
    }

    #[test]
    fn test_observer_sees_tracked_units_only() {
        struct Counter(Vec<UnitId>);
        impl ActivationObserver<TestBackend> for Counter {
            fn observe(
                &mut self,
                unit: UnitId,
                _kind: ActivationKind,
                _input: &Tensor<TestBackend, 2>,
                _output: &Tensor<TestBackend, 2>,
            ) {
                self.0.push(unit);
            }
        }

        let mut graph = Graph::new().with_linear(matrix(1, 1, &[2.0])).with_relu();

        let mut counter = Counter(Vec::new());
        let _ = graph.run(row(&[1.0]), &mut counter);
        assert!(counter.0.is_empty());

        graph.instrument_activations();
        let _ = graph.run(row(&[1.0]), &mut counter);
        let _ = graph.run(row(&[1.0]), &mut counter);
        assert_eq!(counter.0, vec![1, 1]);
    }

    #[test]
    fn test_standard_backward_rule() {
        let graph = Graph::new()
            .with_linear(matrix(1, 2, &[2.0, -3.0]))
            .with_relu();

        // x = 1 -> pre-activation [2, -3] -> output [2, 0]
        let pass = graph.run(row(&[1.0]), &mut NullObserver);
        assert_eq!(to_vec(pass.output.clone()), vec![2.0, 0.0]);

        // seed of ones: relu passes lane 0, blocks lane 1; then g . W^T = 2
        let grad = graph
            .backward(&pass, pass.output.ones_like(), &mut StandardRule)
            .unwrap();
        assert_eq!(to_vec(grad), vec![2.0]);
    }

    #[test]
    fn test_backward_rejects_foreign_pass() {
        let graph = Graph::new().with_linear(matrix(1, 1, &[1.0])).with_relu();
        let other: Graph<TestBackend> = Graph::new().with_relu();

        let pass = other.run(row(&[1.0]), &mut NullObserver);
        let result = graph.backward(&pass, row(&[1.0]), &mut StandardRule);
        assert!(matches!(result, Err(ExplainError::Other(_))));
    }

    #[test]
    fn test_activation_kind_serde() {
        let json = serde_json::to_string(&ActivationKind::Relu).unwrap();
        let decoded: ActivationKind = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, ActivationKind::Relu);
    }
}
