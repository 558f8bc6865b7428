use crate::catalog::KernelCatalog;
use crate::context::Context;
use crate::error::{device_error, Error, Result};
use crate::pass::Pass;
use erupt::{utils::allocator::Allocation, vk1_0 as vk};
use std::fmt;
use std::sync::Arc;

/// A row-major `rows x cols` matrix of `f32` living in device memory.
///
/// The buffer is owned exclusively and released on drop. Every operation blocks until the
/// device has finished with it.
pub struct DeviceMatrix {
    rows: usize,
    cols: usize,
    data: Option<Allocation<vk::Buffer>>,
    catalog: Arc<KernelCatalog>,
}

impl DeviceMatrix {
    /// Allocate without initializing the contents
    pub fn uninitialized(catalog: &Arc<KernelCatalog>, rows: usize, cols: usize) -> Result<Self> {
        let size = Self::byte_size(rows, cols);
        let data = catalog.context().allocate_buffer(size)?;
        Ok(Self {
            rows,
            cols,
            data: Some(data),
            catalog: catalog.clone(),
        })
    }

    /// Allocate and fill with zeros on the device
    pub fn zeros(catalog: &Arc<KernelCatalog>, rows: usize, cols: usize) -> Result<Self> {
        Self::filled(catalog, rows, cols, 0.)
    }

    pub(crate) fn filled(
        catalog: &Arc<KernelCatalog>,
        rows: usize,
        cols: usize,
        value: f32,
    ) -> Result<Self> {
        let matrix = Self::uninitialized(catalog, rows, cols)?;
        let mut pass = Pass::new();
        pass.fill(matrix.buffer(), value);
        pass.flow(matrix.context())?;
        Ok(matrix)
    }

    /// Upload `data`, which must hold exactly `rows * cols` values in row-major order
    pub fn from_host(
        catalog: &Arc<KernelCatalog>,
        rows: usize,
        cols: usize,
        data: &[f32],
    ) -> Result<Self> {
        check_len(rows, cols, data.len())?;
        let mut matrix = Self::uninitialized(catalog, rows, cols)?;
        matrix.write(data)?;
        Ok(matrix)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn catalog(&self) -> &Arc<KernelCatalog> {
        &self.catalog
    }

    /// Download the contents in row-major order
    pub fn copy_to_host(&self) -> Result<Vec<f32>> {
        let mut data = vec![0.; self.len()];
        self.read(&mut data)?;
        Ok(data)
    }

    /// Read data from the matrix in row-major order
    pub fn read(&self, buf: &mut [f32]) -> Result<()> {
        check_len(self.rows, self.cols, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }
        let device = &self.context().device;
        let size = (buf.len() * std::mem::size_of::<f32>()) as u64;
        let mapping = self
            .allocation()
            .map(device, 0..size)
            .result()
            .map_err(device_error("buffer map"))?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(buf);
        bytes.copy_from_slice(&mapping.read()[..bytes.len()]);
        mapping
            .unmap(device)
            .result()
            .map_err(device_error("buffer unmap"))?;
        Ok(())
    }

    /// Write data to the matrix in row-major order
    pub fn write(&mut self, buf: &[f32]) -> Result<()> {
        check_len(self.rows, self.cols, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }
        let device = &self.context().device;
        let size = (buf.len() * std::mem::size_of::<f32>()) as u64;
        let mut mapping = self
            .allocation()
            .map(device, 0..size)
            .result()
            .map_err(device_error("buffer map"))?;
        mapping.import(bytemuck::cast_slice(buf));
        mapping
            .unmap(device)
            .result()
            .map_err(device_error("buffer unmap"))?;
        Ok(())
    }

    /// Copy into a freshly allocated matrix on the device
    pub fn try_clone(&self) -> Result<Self> {
        let copy = Self::uninitialized(&self.catalog, self.rows, self.cols)?;
        let mut pass = Pass::new();
        pass.copy(self.buffer(), copy.buffer(), self.byte_len());
        pass.flow(self.context())?;
        Ok(copy)
    }

    pub(crate) fn context(&self) -> &Context {
        self.catalog.context()
    }

    pub(crate) fn buffer(&self) -> vk::Buffer {
        *self.allocation().object()
    }

    fn allocation(&self) -> &Allocation<vk::Buffer> {
        // Only `Drop` takes the allocation
        match &self.data {
            Some(data) => data,
            None => unreachable!("matrix buffer used after release"),
        }
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }

    fn byte_size(rows: usize, cols: usize) -> usize {
        // Vulkan rejects zero-sized buffers
        (rows * cols * std::mem::size_of::<f32>()).max(std::mem::size_of::<f32>())
    }

    pub(crate) fn ensure_same_shape(&self, other: &Self, op: &'static str) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(Error::shape(op, self.shape(), other.shape()));
        }
        Ok(())
    }
}

fn check_len(rows: usize, cols: usize, got: usize) -> Result<()> {
    let expected = rows * cols;
    if got != expected {
        return Err(Error::SizeMismatch {
            rows,
            cols,
            expected,
            got,
        });
    }
    Ok(())
}

impl fmt::Debug for DeviceMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMatrix")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

impl Drop for DeviceMatrix {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            let size = Self::byte_size(self.rows, self.cols);
            self.catalog.context().free_buffer(data, size);
        }
    }
}
