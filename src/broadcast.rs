//! Row-vector broadcast and its adjoint, used for layer biases

use crate::catalog::PushConstants;
use crate::error::{Error, Result};
use crate::matrix::DeviceMatrix;
use crate::pass::{BufferAction, Pass};

impl DeviceMatrix {
    /// Add the `1 x cols` matrix `row` to every row of `self`
    pub(crate) fn add_row_in_place(&mut self, row: &DeviceMatrix) -> Result<()> {
        if row.rows() != 1 || row.cols() != self.cols() {
            return Err(Error::shape("row broadcast", self.shape(), row.shape()));
        }
        let kernel = self.catalog().kernel("add_row")?;
        let mut pass = Pass::new();
        pass.linear(
            kernel,
            vec![
                BufferAction::read_write(self.buffer()),
                BufferAction::read(row.buffer()),
            ],
            self.len(),
            PushConstants::dims(self.rows(), self.cols(), 0),
        )?;
        pass.flow(self.context())
    }

    /// `1 x cols` matrix of column totals, each summed top to bottom
    pub(crate) fn column_sums(&self) -> Result<DeviceMatrix> {
        let kernel = self.catalog().kernel("column_sum")?;
        let out = DeviceMatrix::uninitialized(self.catalog(), 1, self.cols())?;
        let mut pass = Pass::new();
        if self.rows() == 0 {
            pass.fill(out.buffer(), 0.);
        } else {
            pass.linear(
                kernel,
                vec![
                    BufferAction::read(self.buffer()),
                    BufferAction::write(out.buffer()),
                ],
                self.cols(),
                PushConstants::dims(self.rows(), self.cols(), 0),
            )?;
        }
        pass.flow(self.context())?;
        Ok(out)
    }
}
