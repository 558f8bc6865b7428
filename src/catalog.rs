use crate::compiler::{self, CompiledKernel};
use crate::context::{SharedContext, WorkgroupLimits};
use crate::error::{BuildLog, Error, Result};
use erupt::vk1_0 as vk;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

/// Kernels every matrix operation relies on
pub const REQUIRED_KERNELS: &[&str] = &[
    "elem_add",
    "elem_sub",
    "elem_mul",
    "scale",
    "add_row",
    "column_sum",
    "matmul",
    "transpose",
    "sigmoid",
    "sigmoid_derivative",
    "relu",
    "relu_derivative",
    "tanh",
    "tanh_derivative",
    "bce_gradient",
    "bce_loss",
];

macro_rules! builtin_sources {
    ($($name:literal),* $(,)?) => {
        &[$(($name, include_str!(concat!("../shaders/", $name, ".comp")))),*]
    };
}

const BUILTIN: &[(&str, &str)] = builtin_sources![
    "elem_add",
    "elem_sub",
    "elem_mul",
    "scale",
    "add_row",
    "column_sum",
    "matmul",
    "transpose",
    "sigmoid",
    "sigmoid_derivative",
    "relu",
    "relu_derivative",
    "tanh",
    "tanh_derivative",
    "bce_gradient",
    "bce_loss",
];

/// A bundle of named GLSL compute shaders
#[derive(Clone, Debug, Default)]
pub struct KernelSource {
    kernels: Vec<(String, String)>,
}

impl KernelSource {
    /// The shaders shipped with the crate
    pub fn builtin() -> Self {
        Self {
            kernels: BUILTIN
                .iter()
                .map(|(name, glsl)| (name.to_string(), glsl.to_string()))
                .collect(),
        }
    }

    /// Add a kernel, replacing any existing one of the same name
    pub fn with_kernel(mut self, name: impl Into<String>, glsl: impl Into<String>) -> Self {
        let name = name.into();
        let glsl = glsl.into();
        match self.kernels.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = glsl,
            None => self.kernels.push((name, glsl)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.kernels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, glsl)| glsl.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.kernels.iter().map(|(n, g)| (n.as_str(), g.as_str()))
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// Push constant block shared by every kernel; each shader declares the prefix it reads
#[repr(C)]
#[derive(Default, Copy, Clone, Debug)]
pub(crate) struct PushConstants {
    pub dims: [u32; 3],
    pub extra: u32,
}

unsafe impl bytemuck::Zeroable for PushConstants {}
unsafe impl bytemuck::Pod for PushConstants {}

impl PushConstants {
    pub fn len(len: usize) -> Self {
        Self {
            dims: [len as u32, 0, 0],
            extra: 0,
        }
    }

    pub fn dims(a: usize, b: usize, c: usize) -> Self {
        Self {
            dims: [a as u32, b as u32, c as u32],
            extra: 0,
        }
    }

    pub fn with_scalar(mut self, scalar: f32) -> Self {
        self.extra = scalar.to_bits();
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.extra = flags;
        self
    }
}

/// A compiled compute pipeline and the layouts needed to bind it
pub struct Kernel {
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    descriptor_set_layout: vk::DescriptorSetLayout,
    bindings: u32,
    context: SharedContext,
}

impl Kernel {
    fn new(context: SharedContext, compiled: &CompiledKernel) -> std::result::Result<Self, vk::Result> {
        let device = &context.device;

        // Layout: one storage buffer per reflected binding
        let bindings = (0..compiled.bindings)
            .map(|binding| {
                vk::DescriptorSetLayoutBindingBuilder::new()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect::<Vec<_>>();
        let create_info = vk::DescriptorSetLayoutCreateInfoBuilder::new().bindings(&bindings);
        let descriptor_set_layout =
            unsafe { device.create_descriptor_set_layout(&create_info, None, None) }.result()?;

        let push_constant_ranges = [vk::PushConstantRangeBuilder::new()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<PushConstants>() as u32)];
        let descriptor_set_layouts = [descriptor_set_layout];
        let create_info = vk::PipelineLayoutCreateInfoBuilder::new()
            .set_layouts(&descriptor_set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let pipeline_layout =
            match unsafe { device.create_pipeline_layout(&create_info, None, None) }.result() {
                Ok(layout) => layout,
                Err(status) => {
                    unsafe {
                        device.destroy_descriptor_set_layout(Some(descriptor_set_layout), None)
                    };
                    return Err(status);
                }
            };

        let destroy_layouts = || unsafe {
            device.destroy_pipeline_layout(Some(pipeline_layout), None);
            device.destroy_descriptor_set_layout(Some(descriptor_set_layout), None);
        };

        let create_info = vk::ShaderModuleCreateInfoBuilder::new().code(&compiled.spirv);
        let shader_module =
            match unsafe { device.create_shader_module(&create_info, None, None) }.result() {
                Ok(module) => module,
                Err(status) => {
                    destroy_layouts();
                    return Err(status);
                }
            };

        let stage = vk::PipelineShaderStageCreateInfoBuilder::new()
            .stage(vk::ShaderStageFlagBits::COMPUTE)
            .module(shader_module)
            .name(c"main")
            .build();
        let create_info = vk::ComputePipelineCreateInfoBuilder::new()
            .stage(stage)
            .layout(pipeline_layout);
        let pipelines =
            unsafe { device.create_compute_pipelines(None, &[create_info], None) }.result();

        unsafe {
            device.destroy_shader_module(Some(shader_module), None);
        }

        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err(status) => {
                destroy_layouts();
                return Err(status);
            }
        };

        context.kernel_created();
        Ok(Self {
            pipeline,
            pipeline_layout,
            descriptor_set_layout,
            bindings: compiled.bindings,
            context,
        })
    }

    pub(crate) fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub(crate) fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub(crate) fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_set_layout
    }

    /// Storage buffers this kernel binds, in binding order
    pub fn bindings(&self) -> u32 {
        self.bindings
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        unsafe {
            let device = &self.context.device;
            device.destroy_pipeline(Some(self.pipeline), None);
            device.destroy_pipeline_layout(Some(self.pipeline_layout), None);
            device.destroy_descriptor_set_layout(Some(self.descriptor_set_layout), None);
        }
        self.context.kernel_destroyed();
    }
}

/// Every kernel of a [`KernelSource`], built for one context and shared by all matrices on it.
///
/// Holding an `Arc<KernelCatalog>` is the proof of initialization: matrices can only be
/// created from one, and the catalog keeps its context alive for as long as they exist.
pub struct KernelCatalog {
    kernels: HashMap<String, Kernel>,
    context: SharedContext,
}

impl KernelCatalog {
    /// Compile `source` and build it for the context's device.
    ///
    /// Either every kernel is built or the call fails with [`Error::CompileFailure`] and any
    /// pipeline created along the way is destroyed.
    pub fn initialize(context: &SharedContext, source: &KernelSource) -> Result<Arc<Self>> {
        for name in REQUIRED_KERNELS {
            if source.get(name).is_none() {
                return Err(Error::usage(format!("kernel source lacks `{}`", name)));
            }
        }

        // Front end, shared by all devices
        let mut compiled = Vec::with_capacity(source.len());
        let mut diagnostics = String::new();
        for (name, glsl) in source.iter() {
            match compiler::compile(glsl) {
                Ok(kernel) => compiled.push((name, kernel)),
                Err(log) => {
                    let _ = writeln!(diagnostics, "kernel `{}`:\n{}", name, log);
                }
            }
        }
        if !diagnostics.is_empty() {
            return Err(Error::CompileFailure {
                logs: vec![BuildLog {
                    device: context.device_name().to_string(),
                    code: vk::Result::ERROR_INITIALIZATION_FAILED.0,
                    log: diagnostics,
                }],
            });
        }

        let kernels = build_for_device(context, &compiled)
            .map_err(|log| Error::CompileFailure { logs: vec![log] })?;

        log::debug!(
            "built {} kernels for \"{}\"",
            kernels.len(),
            context.device_name()
        );
        Ok(Arc::new(Self {
            kernels,
            context: context.clone(),
        }))
    }

    /// Look up a kernel; an unknown name is a programming error
    pub fn kernel(&self, name: &str) -> Result<&Kernel> {
        self.kernels
            .get(name)
            .ok_or_else(|| Error::usage(format!("no kernel named `{}`", name)))
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

fn build_for_device(
    context: &SharedContext,
    compiled: &[(&str, CompiledKernel)],
) -> std::result::Result<HashMap<String, Kernel>, BuildLog> {
    let mut kernels = HashMap::with_capacity(compiled.len());
    let mut log = String::new();
    let mut code = None;
    for (name, kernel) in compiled {
        if let Err(reason) = check_workgroup(kernel.workgroup_size, context.workgroup_limits()) {
            let _ = writeln!(log, "kernel `{}`: {}", name, reason);
            code.get_or_insert(vk::Result::ERROR_INITIALIZATION_FAILED.0);
            continue;
        }
        match Kernel::new(context.clone(), kernel) {
            Ok(kernel) => {
                kernels.insert(name.to_string(), kernel);
            }
            Err(status) => {
                let _ = writeln!(log, "kernel `{}`: pipeline creation failed ({:?})", name, status);
                code.get_or_insert(status.0);
            }
        }
    }

    match code {
        // Dropping `kernels` releases whatever was built before the failure
        Some(code) => Err(BuildLog {
            device: context.device_name().to_string(),
            code,
            log,
        }),
        None => Ok(kernels),
    }
}

/// Drivers are not required to reject oversized workgroups, so they are refused here
fn check_workgroup(size: [u32; 3], limits: WorkgroupLimits) -> std::result::Result<(), String> {
    for (axis, (&len, &max)) in size.iter().zip(&limits.max_size).enumerate() {
        if len > max {
            return Err(format!(
                "workgroup size {:?} exceeds the device maximum of {} along axis {}",
                size, max, axis
            ));
        }
    }
    let invocations = size.iter().map(|&len| len as u64).product::<u64>();
    if invocations > limits.max_invocations as u64 {
        return Err(format!(
            "workgroup of {} invocations exceeds the device maximum of {}",
            invocations, limits.max_invocations
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroup_limits_are_enforced() {
        let limits = WorkgroupLimits {
            max_size: [1024, 1024, 64],
            max_invocations: 1024,
        };
        assert!(check_workgroup([64, 1, 1], limits).is_ok());
        assert!(check_workgroup([16, 16, 1], limits).is_ok());
        assert!(check_workgroup([32, 32, 1], limits).is_ok());

        let err = check_workgroup([1, 1, 128], limits).unwrap_err();
        assert!(err.contains("axis 2"), "{}", err);
        let err = check_workgroup([64, 64, 1], limits).unwrap_err();
        assert!(err.contains("4096 invocations"), "{}", err);
    }

    #[test]
    fn builtin_covers_required_kernels() {
        let source = KernelSource::builtin();
        for name in REQUIRED_KERNELS {
            assert!(source.get(name).is_some(), "{}", name);
        }
        assert_eq!(source.len(), REQUIRED_KERNELS.len());
    }

    #[test]
    fn with_kernel_replaces_in_place() {
        let source = KernelSource::builtin().with_kernel("matmul", "broken");
        assert_eq!(source.get("matmul"), Some("broken"));
        assert_eq!(source.len(), REQUIRED_KERNELS.len());

        let source = source.with_kernel("extra", "void main() {}");
        assert_eq!(source.len(), REQUIRED_KERNELS.len() + 1);
    }

    #[test]
    fn push_constants_are_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<PushConstants>(), 16);
        let constants = PushConstants::len(7).with_scalar(0.5);
        let bytes: &[u8] = bytemuck::bytes_of(&constants);
        assert_eq!(&bytes[12..16], &0.5f32.to_bits().to_ne_bytes());
    }
}
