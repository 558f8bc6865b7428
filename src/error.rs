use erupt::vk1_0 as vk;
use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Compiler output for one device that failed to build the kernel bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLog {
    /// Name reported by the device driver
    pub device: String,
    /// Raw `VkResult` of the failing step
    pub code: i32,
    /// Rendered diagnostics for every kernel that failed on this device
    pub log: String,
}

impl fmt::Display for BuildLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "device \"{}\" (code {}):", self.device, self.code)?;
        write!(f, "{}", self.log)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Kernel source failed to build; no kernel from the bundle is usable
    #[error("kernel build failed on {} device(s)", logs.len())]
    CompileFailure { logs: Vec<BuildLog> },

    /// Operand shapes are incompatible; nothing was dispatched
    #[error("shape mismatch in {op}: {}x{} vs {}x{}", lhs.0, lhs.1, rhs.0, rhs.1)]
    ShapeMismatch {
        op: &'static str,
        lhs: (usize, usize),
        rhs: (usize, usize),
    },

    /// Host slice length does not match the matrix
    #[error("a {rows}x{cols} matrix needs {expected} values, got {got}")]
    SizeMismatch {
        rows: usize,
        cols: usize,
        expected: usize,
        got: usize,
    },

    /// A transfer, submission or allocation failed in the driver
    #[error("device communication failed during {operation}: {status:?}")]
    DeviceCommunication {
        operation: &'static str,
        status: vk::Result,
    },

    /// The caller broke an API contract
    #[error("usage contract violated: {0}")]
    UsageContract(String),

    /// The Vulkan context could not be created
    #[error("vulkan setup failed: {0}")]
    Setup(String),

    #[error("{0} mutex poisoned")]
    Poisoned(&'static str),
}

/// Discriminant of [`Error`], for callers that branch on the failure class
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    CompileFailure,
    ShapeMismatch,
    SizeMismatch,
    DeviceCommunication,
    UsageContract,
    Setup,
    Poisoned,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CompileFailure { .. } => ErrorKind::CompileFailure,
            Error::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Error::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Error::DeviceCommunication { .. } => ErrorKind::DeviceCommunication,
            Error::UsageContract(_) => ErrorKind::UsageContract,
            Error::Setup(_) => ErrorKind::Setup,
            Error::Poisoned(_) => ErrorKind::Poisoned,
        }
    }

    /// Numeric driver status for device communication failures
    pub fn status_code(&self) -> Option<i32> {
        match self {
            Error::DeviceCommunication { status, .. } => Some(status.0),
            _ => None,
        }
    }

    pub(crate) fn shape(op: &'static str, lhs: (usize, usize), rhs: (usize, usize)) -> Self {
        Error::ShapeMismatch { op, lhs, rhs }
    }

    pub(crate) fn usage(msg: impl Into<String>) -> Self {
        Error::UsageContract(msg.into())
    }
}

/// Maps a failed `VkResult` to [`Error::DeviceCommunication`] tagged with `operation`
pub(crate) fn device_error(operation: &'static str) -> impl FnOnce(vk::Result) -> Error {
    move |status| Error::DeviceCommunication { operation, status }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let shape = Error::shape("add", (2, 3), (3, 2));
        assert_eq!(shape.kind(), ErrorKind::ShapeMismatch);
        assert_eq!(shape.to_string(), "shape mismatch in add: 2x3 vs 3x2");
        assert_eq!(shape.status_code(), None);

        let usage = Error::usage("backward before forward");
        assert_eq!(usage.kind(), ErrorKind::UsageContract);

        let device = device_error("queue submit")(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(device.kind(), ErrorKind::DeviceCommunication);
        assert_eq!(device.status_code(), Some(vk::Result::ERROR_DEVICE_LOST.0));
    }

    #[test]
    fn build_log_display_names_device() {
        let log = BuildLog {
            device: "llvmpipe".into(),
            code: -3,
            log: "kernel `matmul`: unexpected token".into(),
        };
        let text = log.to_string();
        assert!(text.contains("llvmpipe"));
        assert!(text.contains("unexpected token"));

        let err = Error::CompileFailure { logs: vec![log] };
        assert_eq!(err.kind(), ErrorKind::CompileFailure);
        assert_eq!(err.to_string(), "kernel build failed on 1 device(s)");
    }
}
