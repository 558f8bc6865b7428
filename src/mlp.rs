use crate::activation::Activation;
use crate::catalog::KernelCatalog;
use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::loss::Loss;
use crate::matrix::DeviceMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// A feed-forward network trained with plain SGD.
///
/// The topology is fixed at construction; `train_step` mutates weights in place and may be
/// interleaved freely with `evaluate`.
#[derive(Debug)]
pub struct Mlp {
    layers: Vec<Layer>,
    learning_rate: f32,
    loss: Loss,
}

impl Mlp {
    /// Chain `layers` first to last; adjacent widths must agree
    pub fn new(layers: Vec<Layer>, learning_rate: f32, loss: Loss) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::usage("an Mlp needs at least one layer"));
        }
        for pair in layers.windows(2) {
            if pair[0].outputs() != pair[1].inputs() {
                return Err(Error::shape(
                    "layer chain",
                    pair[0].weight().shape(),
                    pair[1].weight().shape(),
                ));
            }
        }
        Ok(Self {
            layers,
            learning_rate,
            loss,
        })
    }

    /// Randomly initialized network with `widths[0]` inputs and one layer per following
    /// width, reproducible from `seed`
    pub fn with_topology(
        catalog: &Arc<KernelCatalog>,
        widths: &[usize],
        activations: &[Activation],
        learning_rate: f32,
        loss: Loss,
        seed: u64,
    ) -> Result<Self> {
        if widths.len() < 2 || activations.len() != widths.len() - 1 {
            return Err(Error::usage(format!(
                "{} widths need {} activations, got {}",
                widths.len(),
                widths.len().saturating_sub(1),
                activations.len()
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let layers = widths
            .windows(2)
            .zip(activations)
            .map(|(w, &activation)| Layer::new(catalog, w[0], w[1], activation, &mut rng))
            .collect::<Result<Vec<_>>>()?;
        Self::new(layers, learning_rate, loss)
    }

    /// Run every layer in order, caching what `train_step` needs
    pub fn forward(&mut self, input: &DeviceMatrix) -> Result<DeviceMatrix> {
        let (first, rest) = self
            .layers
            .split_first_mut()
            .ok_or_else(|| Error::usage("an Mlp needs at least one layer"))?;
        let mut activations = first.forward(input)?;
        for layer in rest {
            activations = layer.forward(&activations)?;
        }
        Ok(activations)
    }

    /// Network output for `input`; parameters and caches are untouched
    pub fn evaluate(&self, input: &DeviceMatrix) -> Result<DeviceMatrix> {
        let (first, rest) = self
            .layers
            .split_first()
            .ok_or_else(|| Error::usage("an Mlp needs at least one layer"))?;
        let mut activations = first.infer(input)?;
        for layer in rest {
            activations = layer.infer(&activations)?;
        }
        Ok(activations)
    }

    /// Configured loss of the current network on `input` against `target`
    pub fn loss(&self, input: &DeviceMatrix, target: &DeviceMatrix) -> Result<f32> {
        let output = self.evaluate(input)?;
        self.loss.evaluate(&output, target)
    }

    /// Forward, loss, backward and exactly one SGD update of every layer. Returns the loss
    /// measured before the update.
    pub fn train_step(&mut self, input: &DeviceMatrix, target: &DeviceMatrix) -> Result<f32> {
        let output = self.forward(input)?;
        output.ensure_same_shape(target, "train step")?;
        let loss = self.loss.evaluate(&output, target)?;
        let mut grad = self.loss.gradient(&output, target)?;
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad, self.learning_rate)?;
        }
        Ok(loss)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn input_width(&self) -> usize {
        self.layers[0].inputs()
    }

    pub fn output_width(&self) -> usize {
        self.layers[self.layers.len() - 1].outputs()
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    pub fn loss_kind(&self) -> Loss {
        self.loss
    }
}
