//! Example: DeepLIFT-Rescale attribution over a small ReLU network
//!
//! Builds a two-layer ReLU network, explains one input against a zero
//! baseline, and compares the result with plain gradient×input.
//!
//! Run with: cargo run --example explain_relu_chain

use burn::prelude::*;
use deeplift_core::backend::NdArray;
use deeplift_core::Graph;
use deeplift_explain::{DeepLiftRescaleExplainer, GradTimesInputExplainer};

fn main() {
    println!("=== DeepLIFT-Rescale Attribution ===\n");

    let device = Default::default();
    let w1 = Tensor::<NdArray, 1>::from_floats(
        [1.0, -0.5, 0.5, 2.0, -1.0, 1.0].as_slice(),
        &device,
    )
    .reshape([3, 2]);
    let w2 = Tensor::<NdArray, 1>::from_floats([1.0, -1.0].as_slice(), &device).reshape([2, 1]);

    let input = Tensor::<NdArray, 1>::from_floats([2.0, -1.0, 0.5].as_slice(), &device);

    // y = relu(relu(x . W1) . W2)
    let graph = Graph::new()
        .with_linear(w1.clone())
        .with_relu()
        .with_linear(w2.clone())
        .with_relu();

    let output: f32 = graph
        .forward(input.clone().reshape([1, 3]))
        .into_scalar()
        .elem();
    println!("model output at input: {output:.4}");
    println!("model output at zero baseline: 0.0000\n");

    let base = GradTimesInputExplainer::new(&graph);
    let plain = base
        .explain(&input, Some(0))
        .expect("gradient x input failed");
    println!("gradient x input:  {:?}", to_vec(plain.values));

    let mut graph = Graph::new()
        .with_linear(w1)
        .with_relu()
        .with_linear(w2)
        .with_relu();
    let explainer = DeepLiftRescaleExplainer::new(&mut graph);
    let rescale = explainer
        .explain(&input, Some(0))
        .expect("deeplift rescale failed");
    println!("deeplift rescale:  {:?}", to_vec(rescale.values.clone()));

    let total: f32 = rescale.values.sum().into_scalar().elem();
    println!("\nsum of attributions: {total:.4} (output delta from baseline: {output:.4})");
}

fn to_vec(t: Tensor<NdArray, 1>) -> Vec<f32> {
    t.into_data().to_vec::<f32>().unwrap()
}
