use crate::catalog::{Kernel, PushConstants};
use crate::context::Context;
use crate::error::{device_error, Error, Result};
use erupt::vk1_0 as vk;
use std::collections::HashSet;

pub(crate) const LOCAL_SIZE_LINEAR: u32 = 64;
pub(crate) const LOCAL_SIZE_TILE: u32 = 16;
const MAX_GROUPS: u32 = 65535;

/// How a step touches one buffer
#[derive(Copy, Clone)]
pub(crate) struct BufferAction {
    pub buffer: vk::Buffer,
    pub read: bool,
    pub write: bool,
}

impl BufferAction {
    pub fn read(buffer: vk::Buffer) -> Self {
        Self {
            buffer,
            read: true,
            write: false,
        }
    }

    pub fn write(buffer: vk::Buffer) -> Self {
        Self {
            buffer,
            read: false,
            write: true,
        }
    }

    pub fn read_write(buffer: vk::Buffer) -> Self {
        Self {
            buffer,
            read: true,
            write: true,
        }
    }
}

enum Step<'k> {
    Dispatch {
        kernel: &'k Kernel,
        buffers: Vec<BufferAction>,
        constants: PushConstants,
        groups: (u32, u32),
    },
    Copy {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: u64,
    },
    Fill {
        dst: vk::Buffer,
        value: f32,
    },
}

impl Step<'_> {
    fn actions(&self) -> Vec<BufferAction> {
        match self {
            Step::Dispatch { buffers, .. } => buffers.clone(),
            Step::Copy { src, dst, .. } => vec![BufferAction::read(*src), BufferAction::write(*dst)],
            Step::Fill { dst, .. } => vec![BufferAction::write(*dst)],
        }
    }
}

/// A short sequence of device work submitted as one command buffer.
///
/// Steps run in order; a buffer written by one step is guarded by a barrier before the next
/// step that touches it.
#[derive(Default)]
pub(crate) struct Pass<'k> {
    steps: Vec<Step<'k>>,
}

fn groups_for(len: usize, local: u32) -> Result<u32> {
    let groups = (len as u64 + local as u64 - 1) / local as u64;
    if groups > MAX_GROUPS as u64 {
        return Err(Error::usage(format!(
            "{} elements exceed a single dispatch",
            len
        )));
    }
    Ok(groups as u32)
}

/// Spread `len` elements over a 2-D grid of linear groups; shaders flatten it back as
/// `gid.y * num_groups.x * 64 + gid.x`
fn linear_groups(len: usize) -> Result<(u32, u32)> {
    let total = (len as u64 + LOCAL_SIZE_LINEAR as u64 - 1) / LOCAL_SIZE_LINEAR as u64;
    let x = total.min(MAX_GROUPS as u64).max(1);
    let y = (total + x - 1) / x;
    if y > MAX_GROUPS as u64 {
        return Err(Error::usage(format!(
            "{} elements exceed a single dispatch",
            len
        )));
    }
    Ok((x as u32, y as u32))
}

impl<'k> Pass<'k> {
    pub fn new() -> Self {
        Self::default()
    }

    /// One invocation per element, `len` elements
    pub fn linear(
        &mut self,
        kernel: &'k Kernel,
        buffers: Vec<BufferAction>,
        len: usize,
        constants: PushConstants,
    ) -> Result<&mut Self> {
        debug_assert_eq!(buffers.len(), kernel.bindings() as usize);
        if len > 0 {
            let groups = linear_groups(len)?;
            self.steps.push(Step::Dispatch {
                kernel,
                buffers,
                constants,
                groups,
            });
        }
        Ok(self)
    }

    /// One invocation per cell of a `rows x cols` grid, in 16x16 tiles
    pub fn tiled(
        &mut self,
        kernel: &'k Kernel,
        buffers: Vec<BufferAction>,
        (rows, cols): (usize, usize),
        constants: PushConstants,
    ) -> Result<&mut Self> {
        debug_assert_eq!(buffers.len(), kernel.bindings() as usize);
        if rows > 0 && cols > 0 {
            let groups = (
                groups_for(cols, LOCAL_SIZE_TILE)?,
                groups_for(rows, LOCAL_SIZE_TILE)?,
            );
            self.steps.push(Step::Dispatch {
                kernel,
                buffers,
                constants,
                groups,
            });
        }
        Ok(self)
    }

    pub fn copy(&mut self, src: vk::Buffer, dst: vk::Buffer, size: usize) -> &mut Self {
        if size > 0 {
            self.steps.push(Step::Copy {
                src,
                dst,
                size: size as u64,
            });
        }
        self
    }

    pub fn fill(&mut self, dst: vk::Buffer, value: f32) -> &mut Self {
        self.steps.push(Step::Fill { dst, value });
        self
    }

    fn dispatch_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::Dispatch { .. }))
            .count()
    }

    fn binding_count(&self) -> usize {
        self.steps
            .iter()
            .map(|s| match s {
                Step::Dispatch { buffers, .. } => buffers.len(),
                _ => 0,
            })
            .sum()
    }

    /// Record, submit and block until the queue is idle
    pub fn flow(&self, context: &Context) -> Result<()> {
        if self.steps.is_empty() {
            return Ok(());
        }

        let submission = context.submission()?;
        let device = &context.device;
        let command_buffer = submission.command_buffer;

        let pool = DescriptorPool::new(context, self.dispatch_count(), self.binding_count())?;
        let layouts = self
            .steps
            .iter()
            .filter_map(|s| match s {
                Step::Dispatch { kernel, .. } => Some(kernel.descriptor_set_layout()),
                _ => None,
            })
            .collect::<Vec<_>>();
        let mut descriptor_sets = pool.allocate(&layouts)?.into_iter();

        // Write command buffer
        let mut dirty_list = HashSet::new(); // Naughy buffers!
        unsafe {
            device
                .reset_command_buffer(command_buffer, None)
                .result()
                .map_err(device_error("command buffer reset"))?;
            let begin_info = vk::CommandBufferBeginInfoBuilder::new()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .result()
                .map_err(device_error("command buffer begin"))?;

            for step in &self.steps {
                let mut barriers = Vec::new();
                for action in step.actions() {
                    if (action.read || action.write) && dirty_list.remove(&action.buffer) {
                        let mut dst_flags = vk::AccessFlags::empty();
                        if action.read {
                            dst_flags |= vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ;
                        }
                        if action.write {
                            dst_flags |=
                                vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::TRANSFER_WRITE;
                        }
                        barriers.push(
                            vk::BufferMemoryBarrierBuilder::new()
                                .buffer(action.buffer)
                                .src_access_mask(
                                    vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::TRANSFER_WRITE,
                                )
                                .dst_access_mask(dst_flags)
                                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                                .offset(0)
                                .size(vk::WHOLE_SIZE),
                        );
                    }

                    if action.write {
                        dirty_list.insert(action.buffer);
                    }
                }

                if !barriers.is_empty() {
                    device.cmd_pipeline_barrier(
                        command_buffer,
                        vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER,
                        None,
                        &[],
                        &barriers,
                        &[],
                    );
                }

                match step {
                    Step::Dispatch {
                        kernel,
                        buffers,
                        constants,
                        groups,
                    } => {
                        let descriptor_set = descriptor_sets.next().ok_or_else(|| {
                            Error::usage("descriptor pool sized below dispatch count")
                        })?;
                        let buffer_infos = buffers
                            .iter()
                            .map(|action| {
                                [vk::DescriptorBufferInfoBuilder::new()
                                    .buffer(action.buffer)
                                    .offset(0)
                                    .range(vk::WHOLE_SIZE)]
                            })
                            .collect::<Vec<_>>();
                        let writes = buffer_infos
                            .iter()
                            .enumerate()
                            .map(|(binding, info)| {
                                vk::WriteDescriptorSetBuilder::new()
                                    .dst_set(descriptor_set)
                                    .dst_binding(binding as u32)
                                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                                    .buffer_info(info)
                            })
                            .collect::<Vec<_>>();
                        device.update_descriptor_sets(&writes, &[]);

                        let slice = [*constants];
                        let bytes: &[u8] = bytemuck::cast_slice(&slice);
                        device.cmd_push_constants(
                            command_buffer,
                            kernel.pipeline_layout(),
                            vk::ShaderStageFlags::COMPUTE,
                            0,
                            bytes.len() as u32,
                            bytes.as_ptr() as _,
                        );
                        device.cmd_bind_descriptor_sets(
                            command_buffer,
                            vk::PipelineBindPoint::COMPUTE,
                            kernel.pipeline_layout(),
                            0,
                            &[descriptor_set],
                            &[],
                        );
                        device.cmd_bind_pipeline(
                            command_buffer,
                            vk::PipelineBindPoint::COMPUTE,
                            kernel.pipeline(),
                        );
                        device.cmd_dispatch(command_buffer, groups.0, groups.1, 1);
                    }
                    Step::Copy { src, dst, size } => {
                        let region = vk::BufferCopyBuilder::new()
                            .src_offset(0)
                            .dst_offset(0)
                            .size(*size);
                        device.cmd_copy_buffer(command_buffer, *src, *dst, &[region]);
                    }
                    Step::Fill { dst, value } => {
                        device.cmd_fill_buffer(command_buffer, *dst, 0, vk::WHOLE_SIZE, value.to_bits());
                    }
                }
            }

            // Make device writes visible to mapped reads
            let barrier = vk::MemoryBarrierBuilder::new()
                .src_access_mask(vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ);
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                None,
                &[barrier],
                &[],
                &[],
            );

            device
                .end_command_buffer(command_buffer)
                .result()
                .map_err(device_error("command buffer end"))?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfoBuilder::new().command_buffers(&command_buffers);
            device
                .queue_submit(submission.queue, &[submit_info], None)
                .result()
                .map_err(device_error("queue submit"))?;
            device
                .queue_wait_idle(submission.queue)
                .result()
                .map_err(device_error("queue wait"))?;
        }

        Ok(())
    }
}

/// Descriptor sets for one pass, released once the queue is idle
struct DescriptorPool<'c> {
    pool: vk::DescriptorPool,
    context: &'c Context,
}

impl<'c> DescriptorPool<'c> {
    fn new(context: &'c Context, sets: usize, buffers: usize) -> Result<Self> {
        let sizes = [vk::DescriptorPoolSizeBuilder::new()
            ._type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(buffers.max(1) as u32)];
        let create_info = vk::DescriptorPoolCreateInfoBuilder::new()
            .pool_sizes(&sizes)
            .max_sets(sets.max(1) as u32);
        let pool = unsafe { context.device.create_descriptor_pool(&create_info, None, None) }
            .result()
            .map_err(device_error("descriptor pool creation"))?;
        Ok(Self { pool, context })
    }

    fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> Result<Vec<vk::DescriptorSet>> {
        if layouts.is_empty() {
            return Ok(Vec::new());
        }
        let allocate_info = vk::DescriptorSetAllocateInfoBuilder::new()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);
        let sets = unsafe { self.context.device.allocate_descriptor_sets(&allocate_info) }
            .result()
            .map_err(device_error("descriptor set allocation"))?;
        Ok(sets.into_iter().collect())
    }
}

impl Drop for DescriptorPool<'_> {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device
                .destroy_descriptor_pool(Some(self.pool), None);
        }
    }
}
