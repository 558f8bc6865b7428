use crate::catalog::PushConstants;
use crate::error::{Error, Result};
use crate::matrix::DeviceMatrix;
use crate::pass::{BufferAction, Pass};

const LHS_TRANSPOSED: u32 = 1;
const RHS_TRANSPOSED: u32 = 2;

impl DeviceMatrix {
    /// Matrix product `self × other`, shaped `self.rows() x other.cols()`.
    ///
    /// Accumulation is tiled, so the summation order differs from a naive loop; compare
    /// results with a tolerance.
    pub fn multiply(&self, other: &DeviceMatrix) -> Result<DeviceMatrix> {
        self.multiply_transposed(other, false, false)
    }

    /// Matrix product treating either operand as transposed, without materializing it
    pub(crate) fn multiply_transposed(
        &self,
        other: &DeviceMatrix,
        lhs_transpose: bool,
        rhs_transpose: bool,
    ) -> Result<DeviceMatrix> {
        let (m, k) = if lhs_transpose {
            (self.cols(), self.rows())
        } else {
            self.shape()
        };
        let (other_k, n) = if rhs_transpose {
            (other.cols(), other.rows())
        } else {
            other.shape()
        };
        if k != other_k {
            return Err(Error::shape("multiply", self.shape(), other.shape()));
        }

        let kernel = self.catalog().kernel("matmul")?;
        let out = DeviceMatrix::uninitialized(self.catalog(), m, n)?;

        let mut flags = 0;
        if lhs_transpose {
            flags |= LHS_TRANSPOSED;
        }
        if rhs_transpose {
            flags |= RHS_TRANSPOSED;
        }

        let mut pass = Pass::new();
        if k == 0 {
            // Empty inner dimension: the product is all zeros
            pass.fill(out.buffer(), 0.);
        } else {
            pass.tiled(
                kernel,
                vec![
                    BufferAction::read(self.buffer()),
                    BufferAction::read(other.buffer()),
                    BufferAction::write(out.buffer()),
                ],
                (m, n),
                PushConstants::dims(m, k, n).with_flags(flags),
            )?;
        }
        pass.flow(self.context())?;
        Ok(out)
    }

    /// A new `cols x rows` matrix; `self` is left untouched
    pub fn transpose(&self) -> Result<DeviceMatrix> {
        let kernel = self.catalog().kernel("transpose")?;
        let out = DeviceMatrix::uninitialized(self.catalog(), self.cols(), self.rows())?;
        let mut pass = Pass::new();
        pass.tiled(
            kernel,
            vec![
                BufferAction::read(self.buffer()),
                BufferAction::write(out.buffer()),
            ],
            self.shape(),
            PushConstants::dims(self.rows(), self.cols(), 0),
        )?;
        pass.flow(self.context())?;
        Ok(out)
    }
}
