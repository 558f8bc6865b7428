use crate::catalog::PushConstants;
use crate::error::Result;
use crate::matrix::DeviceMatrix;
use crate::pass::{BufferAction, Pass};

/// Element-wise nonlinearity applied after a layer's affine transform.
///
/// Derivatives are always evaluated from the activation's *output*: `y(1 - y)` for sigmoid,
/// `y > 0` for ReLU, `1 - y²` for tanh and `1` for identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Activation {
    Identity,
    Sigmoid,
    Relu,
    Tanh,
}

impl Activation {
    fn kernel(self) -> Option<&'static str> {
        match self {
            Activation::Identity => None,
            Activation::Sigmoid => Some("sigmoid"),
            Activation::Relu => Some("relu"),
            Activation::Tanh => Some("tanh"),
        }
    }

    fn derivative_kernel(self) -> Option<&'static str> {
        match self {
            Activation::Identity => None,
            Activation::Sigmoid => Some("sigmoid_derivative"),
            Activation::Relu => Some("relu_derivative"),
            Activation::Tanh => Some("tanh_derivative"),
        }
    }
}

impl DeviceMatrix {
    /// Replace every value `x` with `activation(x)`
    pub fn apply_activation(&mut self, activation: Activation) -> Result<()> {
        match activation.kernel() {
            Some(kernel) => self.map_in_place(kernel),
            None => Ok(()),
        }
    }

    /// Replace every activated value `y` with the activation's derivative at that point.
    /// Expects `self` to already hold `activation(x)`.
    pub fn apply_activation_derivative(&mut self, activation: Activation) -> Result<()> {
        match activation.derivative_kernel() {
            Some(kernel) => self.map_in_place(kernel),
            None => {
                let mut pass = Pass::new();
                pass.fill(self.buffer(), 1.);
                pass.flow(self.context())
            }
        }
    }

    fn map_in_place(&mut self, kernel: &str) -> Result<()> {
        let kernel = self.catalog().kernel(kernel)?;
        let mut pass = Pass::new();
        pass.linear(
            kernel,
            vec![BufferAction::read_write(self.buffer())],
            self.len(),
            PushConstants::len(self.len()),
        )?;
        pass.flow(self.context())
    }
}
