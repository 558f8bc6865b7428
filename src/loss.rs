use crate::catalog::PushConstants;
use crate::error::Result;
use crate::matrix::DeviceMatrix;
use crate::pass::{BufferAction, Pass};

/// Training objective comparing network output against targets
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Loss {
    /// `mean((y - t)²)`
    MeanSquaredError,
    /// `mean(-(t ln y + (1 - t) ln(1 - y)))` with `y` clamped to `[1e-7, 1 - 1e-7]`;
    /// expects outputs in `(0, 1)`, e.g. from a sigmoid layer
    BinaryCrossEntropy,
}

impl Loss {
    /// Scalar loss, averaged over every element
    pub fn evaluate(self, output: &DeviceMatrix, target: &DeviceMatrix) -> Result<f32> {
        output.ensure_same_shape(target, "loss")?;
        let terms = match self {
            Loss::MeanSquaredError => {
                let mut diff = output.subtract(target)?;
                let square = diff.try_clone()?;
                diff.multiply_in_place(&square)?;
                diff
            }
            Loss::BinaryCrossEntropy => {
                let mut terms = output.try_clone()?;
                paired_in_place(&mut terms, target, "bce_loss", PushConstants::len(output.len()))?;
                terms
            }
        };
        Ok(mean(&terms.copy_to_host()?))
    }

    /// Gradient of [`Loss::evaluate`] with respect to `output`
    pub fn gradient(self, output: &DeviceMatrix, target: &DeviceMatrix) -> Result<DeviceMatrix> {
        output.ensure_same_shape(target, "loss gradient")?;
        let count = output.len().max(1) as f32;
        match self {
            Loss::MeanSquaredError => {
                let mut grad = output.subtract(target)?;
                grad.scale(2. / count)?;
                Ok(grad)
            }
            Loss::BinaryCrossEntropy => {
                let mut grad = output.try_clone()?;
                paired_in_place(
                    &mut grad,
                    target,
                    "bce_gradient",
                    PushConstants::len(output.len()).with_scalar(1. / count),
                )?;
                Ok(grad)
            }
        }
    }
}

fn paired_in_place(
    target: &mut DeviceMatrix,
    operand: &DeviceMatrix,
    kernel: &str,
    constants: PushConstants,
) -> Result<()> {
    let kernel = target.catalog().kernel(kernel)?;
    let mut pass = Pass::new();
    pass.linear(
        kernel,
        vec![
            BufferAction::read_write(target.buffer()),
            BufferAction::read(operand.buffer()),
        ],
        target.len(),
        constants,
    )?;
    pass.flow(target.context())
}

/// Sum in `f64`, front to back, so the result does not depend on the device
fn mean(terms: &[f32]) -> f32 {
    if terms.is_empty() {
        return 0.;
    }
    let sum: f64 = terms.iter().map(|&v| v as f64).sum();
    (sum / terms.len() as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::mean;

    #[test]
    fn mean_of_nothing_is_zero() {
        assert_eq!(mean(&[]), 0.);
    }

    #[test]
    fn mean_accumulates_in_double() {
        let terms = vec![1e-8f32; 1000];
        assert!((mean(&terms) - 1e-8).abs() < 1e-12);
        assert_eq!(mean(&[1., 2., 3., 4.]), 2.5);
    }
}
