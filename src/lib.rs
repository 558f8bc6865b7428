//! Dense `f32` matrices on a Vulkan compute device, and a small multilayer perceptron
//! trained with SGD on top of them.
//!
//! ```no_run
//! use vk_mlp::*;
//!
//! # fn main() -> vk_mlp::Result<()> {
//! let context = Context::new()?;
//! let catalog = KernelCatalog::initialize(&context, &KernelSource::builtin())?;
//!
//! let a = DeviceMatrix::from_host(&catalog, 2, 2, &[1., 2., 3., 4.])?;
//! let b = a.transpose()?;
//! let product = a.multiply(&b)?;
//! assert_eq!(product.shape(), (2, 2));
//! # Ok(())
//! # }
//! ```
mod activation;
mod broadcast;
mod catalog;
mod compiler;
mod context;
mod elem_arithmetic;
mod error;
mod layer;
mod loss;
mod matrix;
mod matrix_multiply;
mod mlp;
mod pass;
mod training;

pub use activation::Activation;
pub use catalog::{Kernel, KernelCatalog, KernelSource, REQUIRED_KERNELS};
pub use context::{Context, SharedContext, WorkgroupLimits};
pub use error::{BuildLog, Error, ErrorKind, Result};
pub use layer::Layer;
pub use loss::Loss;
pub use matrix::DeviceMatrix;
pub use mlp::Mlp;
pub use training::{LearningRateSchedule, Trainer, TrainingConfig, TrainingReport};
