//! Element-wise arithmetic. The kernels update their first operand in place; the
//! value-returning forms copy the receiver first within the same pass.

use crate::catalog::PushConstants;
use crate::error::Result;
use crate::matrix::DeviceMatrix;
use crate::pass::{BufferAction, Pass};

const ADD: &str = "elem_add";
const SUB: &str = "elem_sub";
const MULT: &str = "elem_mul";

impl DeviceMatrix {
    /// `self + other`
    pub fn add(&self, other: &DeviceMatrix) -> Result<DeviceMatrix> {
        self.elementwise(other, ADD, "add")
    }

    /// `self - other`
    pub fn subtract(&self, other: &DeviceMatrix) -> Result<DeviceMatrix> {
        self.elementwise(other, SUB, "subtract")
    }

    /// Hadamard product `self ⊙ other`
    pub fn elementwise_multiply(&self, other: &DeviceMatrix) -> Result<DeviceMatrix> {
        self.elementwise(other, MULT, "elementwise multiply")
    }

    /// `self += other`
    pub fn add_in_place(&mut self, other: &DeviceMatrix) -> Result<()> {
        self.elementwise_in_place(other, ADD, "add in place")
    }

    /// `self -= other`
    pub fn subtract_in_place(&mut self, other: &DeviceMatrix) -> Result<()> {
        self.elementwise_in_place(other, SUB, "subtract in place")
    }

    /// `self ⊙= other`
    pub fn multiply_in_place(&mut self, other: &DeviceMatrix) -> Result<()> {
        self.elementwise_in_place(other, MULT, "multiply in place")
    }

    /// Multiply every element by `scalar`
    pub fn scale(&mut self, scalar: f32) -> Result<()> {
        let kernel = self.catalog().kernel("scale")?;
        let mut pass = Pass::new();
        pass.linear(
            kernel,
            vec![BufferAction::read_write(self.buffer())],
            self.len(),
            PushConstants::len(self.len()).with_scalar(scalar),
        )?;
        pass.flow(self.context())
    }

    fn elementwise(
        &self,
        other: &DeviceMatrix,
        kernel: &str,
        op: &'static str,
    ) -> Result<DeviceMatrix> {
        self.ensure_same_shape(other, op)?;
        let kernel = self.catalog().kernel(kernel)?;
        let out = DeviceMatrix::uninitialized(self.catalog(), self.rows(), self.cols())?;

        let mut pass = Pass::new();
        pass.copy(self.buffer(), out.buffer(), self.byte_len())
            .linear(
                kernel,
                vec![
                    BufferAction::read_write(out.buffer()),
                    BufferAction::read(other.buffer()),
                ],
                self.len(),
                PushConstants::len(self.len()),
            )?;
        pass.flow(self.context())?;
        Ok(out)
    }

    fn elementwise_in_place(
        &mut self,
        other: &DeviceMatrix,
        kernel: &str,
        op: &'static str,
    ) -> Result<()> {
        self.ensure_same_shape(other, op)?;
        let kernel = self.catalog().kernel(kernel)?;
        let mut pass = Pass::new();
        pass.linear(
            kernel,
            vec![
                BufferAction::read_write(self.buffer()),
                BufferAction::read(other.buffer()),
            ],
            self.len(),
            PushConstants::len(self.len()),
        )?;
        pass.flow(self.context())
    }
}
