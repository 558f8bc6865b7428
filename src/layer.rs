use crate::activation::Activation;
use crate::catalog::KernelCatalog;
use crate::error::{Error, Result};
use crate::matrix::DeviceMatrix;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use std::fmt;
use std::sync::Arc;

/// Values from the latest `forward`, consumed by `backward`
struct ForwardCache {
    input: DeviceMatrix,
    pre: DeviceMatrix,
    post: DeviceMatrix,
}

/// A fully connected layer: `activation(input × weight + bias)`.
///
/// Inputs are `batch x inputs` row-major matrices; `weight` is `inputs x outputs` and `bias`
/// is a `1 x outputs` row added to every batch row.
pub struct Layer {
    weight: DeviceMatrix,
    bias: DeviceMatrix,
    activation: Activation,
    cache: Option<ForwardCache>,
}

impl Layer {
    /// Xavier-uniform weights and zero bias
    pub fn new(
        catalog: &Arc<KernelCatalog>,
        inputs: usize,
        outputs: usize,
        activation: Activation,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let limit = (6. / (inputs + outputs).max(1) as f32).sqrt();
        let unif = Uniform::new_inclusive(-limit, limit);
        let weights = unif
            .sample_iter(rng)
            .take(inputs * outputs)
            .collect::<Vec<f32>>();
        Ok(Self {
            weight: DeviceMatrix::from_host(catalog, inputs, outputs, &weights)?,
            bias: DeviceMatrix::zeros(catalog, 1, outputs)?,
            activation,
            cache: None,
        })
    }

    /// Caller-supplied parameters, both row-major
    pub fn from_host(
        catalog: &Arc<KernelCatalog>,
        inputs: usize,
        outputs: usize,
        activation: Activation,
        weights: &[f32],
        bias: &[f32],
    ) -> Result<Self> {
        Ok(Self {
            weight: DeviceMatrix::from_host(catalog, inputs, outputs, weights)?,
            bias: DeviceMatrix::from_host(catalog, 1, outputs, bias)?,
            activation,
            cache: None,
        })
    }

    pub fn inputs(&self) -> usize {
        self.weight.rows()
    }

    pub fn outputs(&self) -> usize {
        self.weight.cols()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn weight(&self) -> &DeviceMatrix {
        &self.weight
    }

    pub fn bias(&self) -> &DeviceMatrix {
        &self.bias
    }

    /// Compute the layer output and remember what `backward` needs; any previous cache is
    /// replaced
    pub fn forward(&mut self, input: &DeviceMatrix) -> Result<DeviceMatrix> {
        let pre = self.affine(input)?;
        let mut post = pre.try_clone()?;
        post.apply_activation(self.activation)?;
        self.cache = Some(ForwardCache {
            input: input.try_clone()?,
            pre,
            post: post.try_clone()?,
        });
        Ok(post)
    }

    /// Same as `forward` without touching the cache
    pub fn infer(&self, input: &DeviceMatrix) -> Result<DeviceMatrix> {
        let mut out = self.affine(input)?;
        out.apply_activation(self.activation)?;
        Ok(out)
    }

    fn affine(&self, input: &DeviceMatrix) -> Result<DeviceMatrix> {
        let mut pre = input.multiply(&self.weight)?;
        pre.add_row_in_place(&self.bias)?;
        Ok(pre)
    }

    /// Pre-activation values from the latest `forward`, if `backward` has not consumed them
    pub fn cached_pre_activation(&self) -> Option<&DeviceMatrix> {
        self.cache.as_ref().map(|cache| &cache.pre)
    }

    /// Output of the latest `forward`, if `backward` has not consumed it
    pub fn cached_output(&self) -> Option<&DeviceMatrix> {
        self.cache.as_ref().map(|cache| &cache.post)
    }

    /// Backpropagate `grad_output` (∂loss/∂output), apply one SGD update to the weight and
    /// bias and return ∂loss/∂input.
    ///
    /// Consumes the cache left by `forward`; calling it without a fresh `forward` is a
    /// [`Error::UsageContract`] violation.
    pub fn backward(&mut self, grad_output: &DeviceMatrix, learning_rate: f32) -> Result<DeviceMatrix> {
        let cache = match self.cache.as_ref() {
            Some(cache) => cache,
            None => return Err(Error::usage("Layer::backward called without a preceding forward")),
        };
        cache.post.ensure_same_shape(grad_output, "backward")?;

        // delta = activation'(post) ⊙ grad_output
        let mut delta = cache.post.try_clone()?;
        delta.apply_activation_derivative(self.activation)?;
        delta.multiply_in_place(grad_output)?;

        let mut grad_weight = cache.input.multiply_transposed(&delta, true, false)?;
        let mut grad_bias = delta.column_sums()?;
        // Taken before the update so it reflects the weights used in forward
        let grad_input = delta.multiply_transposed(&self.weight, false, true)?;

        grad_weight.scale(-learning_rate)?;
        grad_bias.scale(-learning_rate)?;
        self.weight.add_in_place(&grad_weight)?;
        self.bias.add_in_place(&grad_bias)?;

        self.cache = None;
        Ok(grad_input)
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("inputs", &self.inputs())
            .field("outputs", &self.outputs())
            .field("activation", &self.activation)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}
