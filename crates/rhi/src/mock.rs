//! Recording mock backend for tests.
//!
//! [`MockBackend`] implements [`Backend`] without a GPU. It hands out unique
//! handles, records the calls the frame loop cares about, counts every
//! create/destroy per [`ObjectKind`] and reports misuse as violations
//! instead of panicking, so tests can assert on all of it afterwards.
//!
//! # Slow device
//!
//! Submitted work never completes on its own. A fence passed to
//! [`Backend::queue_submit`] only signals when the host waits on it (counted
//! as a blocked wait) or when the device or queue is waited idle. While a
//! submission is pending, its command buffers must not be reset or
//! re-recorded, and the uniform buffers its descriptor sets reference must
//! not be written by the host. The second rule is checked by snapshotting
//! the mapped bytes at submit time and comparing them when the work
//! completes.
//!
//! # Scripting
//!
//! - [`MockBackend::fail_next`] makes the next call of a named entry point fail
//! - [`MockBackend::push_acquire_result`] and
//!   [`MockBackend::push_present_result`] script swapchain results; without a
//!   script, acquire hands out images round-robin and present succeeds
//! - [`MockBackend::hang_fences`] makes pending fences time out instead

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::c_char;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::backend::{Backend, DescriptorWrite, QueueFamilies, RenderPassBegin, SubmitDesc};
use crate::error::RhiResult;
use crate::shader::SPIRV_MAGIC;
use crate::surface::SurfaceProvider;
use crate::swapchain::{REQUIRED_SURFACE_FORMAT, SwapchainSupportDetails};

const GRAPHICS_QUEUE: u64 = 0xA000;
const PRESENT_QUEUE: u64 = 0xB000;
const SURFACE: u64 = 0x5000;
const MEMORY_ALIGNMENT: u64 = 256;

/// Kinds of objects the mock counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Buffer,
    Memory,
    Image,
    ImageView,
    Sampler,
    ShaderModule,
    RenderPass,
    Framebuffer,
    PipelineLayout,
    Pipeline,
    DescriptorSetLayout,
    DescriptorPool,
    CommandPool,
    CommandBuffer,
    Fence,
    Semaphore,
    Swapchain,
}

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum MockCall {
    WaitForFence {
        fence: vk::Fence,
        /// The host had to wait for pending work to finish.
        blocked: bool,
    },
    ResetFence {
        fence: vk::Fence,
    },
    AcquireNextImage {
        semaphore: vk::Semaphore,
        result: VkResult<(u32, bool)>,
    },
    ResetCommandBuffer {
        command_buffer: vk::CommandBuffer,
    },
    BeginCommandBuffer {
        command_buffer: vk::CommandBuffer,
    },
    EndCommandBuffer {
        command_buffer: vk::CommandBuffer,
    },
    QueueSubmit {
        queue: vk::Queue,
        command_buffers: Vec<vk::CommandBuffer>,
        wait: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
        signal: Vec<vk::Semaphore>,
        fence: vk::Fence,
    },
    QueuePresent {
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    },
    DeviceWaitIdle,
    QueueWaitIdle {
        queue: vk::Queue,
    },
    SurfaceQuery,
    CreateSwapchain {
        min_image_count: u32,
        extent: vk::Extent2D,
        sharing_mode: vk::SharingMode,
        queue_family_index_count: u32,
        old_swapchain: vk::SwapchainKHR,
    },
    CreateFramebuffer {
        attachments: Vec<vk::ImageView>,
        extent: vk::Extent2D,
    },
    /// One entry per image barrier.
    PipelineBarrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    CopyBuffer {
        size: vk::DeviceSize,
    },
    CopyBufferToImage {
        extent: vk::Extent3D,
        layout: vk::ImageLayout,
    },
    BeginRenderPass {
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
        clear_depth: f32,
    },
    EndRenderPass,
    BindPipeline {
        pipeline: vk::Pipeline,
    },
    SetViewport {
        width: f32,
        height: f32,
    },
    SetScissor {
        extent: vk::Extent2D,
    },
    BindVertexBuffer {
        buffer: vk::Buffer,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
    },
    BindDescriptorSet {
        set: vk::DescriptorSet,
    },
    DrawIndexed {
        index_count: u32,
    },
    Destroy {
        kind: ObjectKind,
        /// Raw handle of the destroyed object.
        raw: u64,
    },
}

#[derive(Default, Clone, Copy)]
struct Counts {
    created: usize,
    destroyed: usize,
}

/// Host backing store of a host-visible allocation.
struct HostAllocation {
    ptr: NonNull<u8>,
    len: usize,
}

impl HostAllocation {
    fn zeroed(len: usize) -> Self {
        let boxed = vec![0u8; len.max(1)].into_boxed_slice();
        let len = boxed.len();
        let ptr = NonNull::from(Box::leak(boxed)).cast::<u8>();
        Self { ptr, len }
    }

    fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        let end = (offset + len).min(self.len);
        let start = offset.min(end);
        // SAFETY: the range is clamped to the allocation.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(start), end - start).to_vec() }
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from Box::leak of a boxed slice of this length.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

// SAFETY: the allocation is plain bytes owned by this value.
unsafe impl Send for HostAllocation {}

struct MemoryState {
    host: Option<HostAllocation>,
    mapped: bool,
}

struct FenceState {
    signaled: bool,
}

struct UniformSnapshot {
    buffer: u64,
    memory: u64,
    offset: u64,
    bytes: Vec<u8>,
}

struct PendingSubmit {
    fence: u64,
    command_buffers: Vec<u64>,
    snapshots: Vec<UniformSnapshot>,
}

struct MockState {
    next_handle: u64,
    counts: HashMap<ObjectKind, Counts>,
    live: HashSet<(ObjectKind, u64)>,
    calls: Vec<MockCall>,
    violations: Vec<String>,
    failures: HashMap<&'static str, VecDeque<vk::Result>>,

    memory_types: Vec<vk::MemoryPropertyFlags>,
    format_features: HashMap<vk::Format, vk::FormatFeatureFlags>,
    queue_families: QueueFamilies,
    max_anisotropy: f32,

    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,

    memories: HashMap<u64, MemoryState>,
    buffer_sizes: HashMap<u64, u64>,
    buffer_bindings: HashMap<u64, (u64, u64)>,
    image_sizes: HashMap<u64, u64>,
    pool_buffers: HashMap<u64, HashSet<u64>>,
    set_buffers: HashMap<u64, Vec<(u64, u64)>>,
    recorded_sets: HashMap<u64, Vec<u64>>,
    fences: HashMap<u64, FenceState>,
    pending: Vec<PendingSubmit>,
    hang_fences: bool,
    blocked_waits: usize,

    swapchains: HashMap<u64, (u32, u32)>,
    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    present_script: VecDeque<VkResult<bool>>,
}

impl MockState {
    fn new() -> Self {
        let mut format_features = HashMap::new();
        for format in [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ] {
            format_features.insert(format, vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT);
        }

        Self {
            next_handle: 1,
            counts: HashMap::new(),
            live: HashSet::new(),
            calls: Vec::new(),
            violations: Vec::new(),
            failures: HashMap::new(),
            memory_types: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ],
            format_features,
            queue_families: QueueFamilies {
                graphics: 0,
                present: 0,
            },
            max_anisotropy: 16.0,
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 0,
                current_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            },
            formats: vec![REQUIRED_SURFACE_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            memories: HashMap::new(),
            buffer_sizes: HashMap::new(),
            buffer_bindings: HashMap::new(),
            image_sizes: HashMap::new(),
            pool_buffers: HashMap::new(),
            set_buffers: HashMap::new(),
            recorded_sets: HashMap::new(),
            fences: HashMap::new(),
            pending: Vec::new(),
            hang_fences: false,
            blocked_waits: 0,
            swapchains: HashMap::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
        }
    }

    fn check(&mut self, operation: &'static str) -> VkResult<()> {
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(result) => Err(result),
            None => Ok(()),
        }
    }

    fn create(&mut self, kind: ObjectKind) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.counts.entry(kind).or_default().created += 1;
        self.live.insert((kind, raw));
        raw
    }

    fn destroy(&mut self, kind: ObjectKind, raw: u64) {
        if raw == 0 {
            self.violations
                .push(format!("destroy of null {kind:?} handle"));
            return;
        }
        if !self.live.remove(&(kind, raw)) {
            self.violations
                .push(format!("double or foreign destroy of {kind:?} {raw:#x}"));
            return;
        }
        self.counts.entry(kind).or_default().destroyed += 1;
        self.calls.push(MockCall::Destroy { kind, raw });
    }

    fn is_pending(&self, command_buffer: u64) -> bool {
        self.pending
            .iter()
            .any(|p| p.command_buffers.contains(&command_buffer))
    }

    fn snapshot(&self, memory: u64, offset: u64, size: u64) -> Option<Vec<u8>> {
        self.memories
            .get(&memory)?
            .host
            .as_ref()
            .map(|host| host.read(offset as usize, size as usize))
    }

    /// Completes every pending submission matching `select`.
    fn complete(&mut self, mut select: impl FnMut(&PendingSubmit) -> bool) {
        let (done, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|p| select(p));
        self.pending = rest;

        for submit in done {
            for snap in &submit.snapshots {
                let now = self.snapshot(snap.memory, snap.offset, snap.bytes.len() as u64);
                if now.as_deref() != Some(snap.bytes.as_slice()) {
                    self.violations.push(format!(
                        "host wrote uniform buffer {:#x} while the device was reading it",
                        snap.buffer
                    ));
                }
            }
            if let Some(fence) = self.fences.get_mut(&submit.fence) {
                fence.signaled = true;
            }
        }
    }

    fn violation(&mut self, what: &str, raw: u64) {
        self.violations.push(format!("{what} {raw:#x}"));
    }
}

/// A [`Backend`] that records calls and simulates a slow device.
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Creates a mock with two memory types (device-local and
    /// host-visible/coherent), one shared queue family, and a surface that
    /// reports `minImageCount = 2`, `maxImageCount = 0` and an 800x600
    /// current extent with the required surface format.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Scripting.

    /// Makes the next call of `operation` fail with `result`.
    ///
    /// Operation names are Vulkan entry points, e.g. `"vkQueueSubmit"`.
    /// Repeated calls queue several failures.
    pub fn fail_next(&self, operation: &'static str, result: vk::Result) {
        self.state()
            .failures
            .entry(operation)
            .or_default()
            .push_back(result);
    }

    /// Queues a result for the next acquire.
    pub fn push_acquire_result(&self, result: VkResult<(u32, bool)>) {
        self.state().acquire_script.push_back(result);
    }

    /// Queues a result for the next present.
    pub fn push_present_result(&self, result: VkResult<bool>) {
        self.state().present_script.push_back(result);
    }

    /// Makes waits on pending fences time out.
    pub fn hang_fences(&self, hang: bool) {
        self.state().hang_fences = hang;
    }

    /// Replaces the advertised memory types.
    pub fn set_memory_types(&self, types: &[vk::MemoryPropertyFlags]) {
        self.state().memory_types = types.to_vec();
    }

    /// Sets the optimal-tiling features reported for `format`.
    pub fn set_format_features(&self, format: vk::Format, features: vk::FormatFeatureFlags) {
        self.state().format_features.insert(format, features);
    }

    pub fn set_queue_families(&self, families: QueueFamilies) {
        self.state().queue_families = families;
    }

    pub fn set_surface_capabilities(&self, capabilities: vk::SurfaceCapabilitiesKHR) {
        self.state().capabilities = capabilities;
    }

    /// Changes only the surface's current extent.
    pub fn set_current_extent(&self, width: u32, height: u32) {
        self.state().capabilities.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_surface_formats(&self, formats: &[vk::SurfaceFormatKHR]) {
        self.state().formats = formats.to_vec();
    }

    pub fn set_present_modes(&self, modes: &[vk::PresentModeKHR]) {
        self.state().present_modes = modes.to_vec();
    }

    // Inspection.

    /// Objects of `kind` created so far.
    pub fn created(&self, kind: ObjectKind) -> usize {
        self.state().counts.get(&kind).map_or(0, |c| c.created)
    }

    /// Objects of `kind` destroyed so far.
    pub fn destroyed(&self, kind: ObjectKind) -> usize {
        self.state().counts.get(&kind).map_or(0, |c| c.destroyed)
    }

    /// Objects of `kind` still alive.
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.state()
            .counts
            .get(&kind)
            .map_or(0, |c| c.created - c.destroyed)
    }

    /// Objects of any kind still alive.
    pub fn live_objects(&self) -> usize {
        self.state().live.len()
    }

    /// Misuse detected so far, one message per event.
    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    /// Fence waits that had to wait for pending work.
    pub fn blocked_waits(&self) -> usize {
        self.state().blocked_waits
    }

    /// Submissions not yet completed.
    pub fn pending_submissions(&self) -> usize {
        self.state().pending.len()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl Backend for MockBackend {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let state = self.state();
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: state.memory_types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(&state.memory_types) {
            *slot = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
        }
        props.memory_heaps[0] = vk::MemoryHeap {
            size: 1 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        props
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let features = self
            .state()
            .format_features
            .get(&format)
            .copied()
            .unwrap_or(vk::FormatFeatureFlags::SAMPLED_IMAGE);
        vk::FormatProperties {
            optimal_tiling_features: features,
            ..Default::default()
        }
    }

    fn max_sampler_anisotropy(&self) -> f32 {
        self.state().max_anisotropy
    }

    fn queue_families(&self) -> QueueFamilies {
        self.state().queue_families
    }

    fn graphics_queue(&self) -> vk::Queue {
        vk::Queue::from_raw(GRAPHICS_QUEUE)
    }

    fn present_queue(&self) -> vk::Queue {
        if self.state().queue_families.is_split() {
            vk::Queue::from_raw(PRESENT_QUEUE)
        } else {
            vk::Queue::from_raw(GRAPHICS_QUEUE)
        }
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut state = self.state();
        state.check("vkDeviceWaitIdle")?;
        state.calls.push(MockCall::DeviceWaitIdle);
        state.complete(|_| true);
        Ok(())
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        let mut state = self.state();
        state.check("vkQueueWaitIdle")?;
        state.calls.push(MockCall::QueueWaitIdle { queue });
        state.complete(|_| true);
        Ok(())
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let mut state = self.state();
        state.check("vkAllocateMemory")?;
        let Some(&flags) = state.memory_types.get(memory_type_index as usize) else {
            state.violation("allocation from unknown memory type", memory_type_index.into());
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        };
        let host = flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
            .then(|| HostAllocation::zeroed(size as usize));
        let raw = state.create(ObjectKind::Memory);
        state.memories.insert(raw, MemoryState { host, mapped: false });
        Ok(vk::DeviceMemory::from_raw(raw))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state();
        state.memories.remove(&memory.as_raw());
        state.destroy(ObjectKind::Memory, memory.as_raw());
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        _size: vk::DeviceSize,
    ) -> VkResult<NonNull<u8>> {
        let mut state = self.state();
        state.check("vkMapMemory")?;
        let raw = memory.as_raw();
        let Some(mem) = state.memories.get_mut(&raw) else {
            state.violation("map of unknown memory", raw);
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        };
        let already_mapped = mem.mapped;
        let ptr = match &mem.host {
            Some(host) if (offset as usize) < host.len => {
                mem.mapped = true;
                // SAFETY: offset is within the allocation.
                unsafe { NonNull::new_unchecked(host.ptr.as_ptr().add(offset as usize)) }
            }
            _ => return Err(vk::Result::ERROR_MEMORY_MAP_FAILED),
        };
        if already_mapped {
            state.violation("memory mapped twice", raw);
        }
        Ok(ptr)
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state();
        let raw = memory.as_raw();
        let was_mapped = state
            .memories
            .get_mut(&raw)
            .map(|mem| std::mem::replace(&mut mem.mapped, false));
        if was_mapped != Some(true) {
            state.violation("unmap of memory that is not mapped", raw);
        }
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        let mut state = self.state();
        state.check("vkCreateBuffer")?;
        let raw = state.create(ObjectKind::Buffer);
        state.buffer_sizes.insert(raw, info.size);
        Ok(vk::Buffer::from_raw(raw))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state();
        let raw = buffer.as_raw();
        state.buffer_sizes.remove(&raw);
        state.buffer_bindings.remove(&raw);
        state.destroy(ObjectKind::Buffer, raw);
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.state();
        vk::MemoryRequirements {
            size: state.buffer_sizes.get(&buffer.as_raw()).copied().unwrap_or(0),
            alignment: MEMORY_ALIGNMENT,
            memory_type_bits: (1u32 << state.memory_types.len()) - 1,
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let mut state = self.state();
        state.check("vkBindBufferMemory")?;
        state
            .buffer_bindings
            .insert(buffer.as_raw(), (memory.as_raw(), offset));
        Ok(())
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        let mut state = self.state();
        state.check("vkCreateImage")?;
        let raw = state.create(ObjectKind::Image);
        let size = u64::from(info.extent.width) * u64::from(info.extent.height) * 4;
        state.image_sizes.insert(raw, size);
        Ok(vk::Image::from_raw(raw))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state();
        state.image_sizes.remove(&image.as_raw());
        state.destroy(ObjectKind::Image, image.as_raw());
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let state = self.state();
        vk::MemoryRequirements {
            size: state.image_sizes.get(&image.as_raw()).copied().unwrap_or(0),
            alignment: MEMORY_ALIGNMENT,
            memory_type_bits: (1u32 << state.memory_types.len()) - 1,
        }
    }

    fn bind_image_memory(
        &self,
        _image: vk::Image,
        _memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> VkResult<()> {
        self.state().check("vkBindImageMemory")
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        let mut state = self.state();
        state.check("vkCreateImageView")?;
        Ok(vk::ImageView::from_raw(state.create(ObjectKind::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state().destroy(ObjectKind::ImageView, view.as_raw());
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler> {
        let mut state = self.state();
        state.check("vkCreateSampler")?;
        Ok(vk::Sampler::from_raw(state.create(ObjectKind::Sampler)))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state().destroy(ObjectKind::Sampler, sampler.as_raw());
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let mut state = self.state();
        state.check("vkCreateShaderModule")?;
        if code.first() != Some(&SPIRV_MAGIC) {
            return Err(vk::Result::ERROR_INVALID_SHADER_NV);
        }
        Ok(vk::ShaderModule::from_raw(
            state.create(ObjectKind::ShaderModule),
        ))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state().destroy(ObjectKind::ShaderModule, module.as_raw());
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        let mut state = self.state();
        state.check("vkCreateRenderPass")?;
        Ok(vk::RenderPass::from_raw(state.create(ObjectKind::RenderPass)))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state()
            .destroy(ObjectKind::RenderPass, render_pass.as_raw());
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut state = self.state();
        state.check("vkCreateFramebuffer")?;
        state.calls.push(MockCall::CreateFramebuffer {
            attachments: attachments.to_vec(),
            extent,
        });
        Ok(vk::Framebuffer::from_raw(state.create(ObjectKind::Framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state()
            .destroy(ObjectKind::Framebuffer, framebuffer.as_raw());
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        let mut state = self.state();
        state.check("vkCreatePipelineLayout")?;
        Ok(vk::PipelineLayout::from_raw(
            state.create(ObjectKind::PipelineLayout),
        ))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state()
            .destroy(ObjectKind::PipelineLayout, layout.as_raw());
    }

    fn create_graphics_pipeline(
        &self,
        _info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        let mut state = self.state();
        state.check("vkCreateGraphicsPipelines")?;
        Ok(vk::Pipeline::from_raw(state.create(ObjectKind::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state().destroy(ObjectKind::Pipeline, pipeline.as_raw());
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout> {
        let mut state = self.state();
        state.check("vkCreateDescriptorSetLayout")?;
        Ok(vk::DescriptorSetLayout::from_raw(
            state.create(ObjectKind::DescriptorSetLayout),
        ))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state()
            .destroy(ObjectKind::DescriptorSetLayout, layout.as_raw());
    }

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        let mut state = self.state();
        state.check("vkCreateDescriptorPool")?;
        Ok(vk::DescriptorPool::from_raw(
            state.create(ObjectKind::DescriptorPool),
        ))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state().destroy(ObjectKind::DescriptorPool, pool.as_raw());
    }

    fn allocate_descriptor_sets(
        &self,
        _pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state();
        state.check("vkAllocateDescriptorSets")?;
        let sets = layouts
            .iter()
            .map(|_| {
                let raw = state.next_handle;
                state.next_handle += 1;
                vk::DescriptorSet::from_raw(raw)
            })
            .collect();
        Ok(sets)
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut state = self.state();
        for write in writes {
            if let DescriptorWrite::UniformBuffer {
                set, buffer, range, ..
            } = *write
            {
                state
                    .set_buffers
                    .entry(set.as_raw())
                    .or_default()
                    .push((buffer.as_raw(), range));
            }
        }
    }

    fn create_command_pool(
        &self,
        _queue_family_index: u32,
        _flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        let mut state = self.state();
        state.check("vkCreateCommandPool")?;
        let raw = state.create(ObjectKind::CommandPool);
        state.pool_buffers.insert(raw, HashSet::new());
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        let raw = pool.as_raw();
        let buffers = state.pool_buffers.remove(&raw).unwrap_or_default();
        for cb in buffers {
            if state.is_pending(cb) {
                state.violation("command pool destroyed with pending command buffer", cb);
            }
            state.destroy(ObjectKind::CommandBuffer, cb);
        }
        state.destroy(ObjectKind::CommandPool, raw);
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        state.check("vkAllocateCommandBuffers")?;
        let buffers: Vec<u64> = (0..count)
            .map(|_| state.create(ObjectKind::CommandBuffer))
            .collect();
        state
            .pool_buffers
            .entry(pool.as_raw())
            .or_default()
            .extend(buffers.iter().copied());
        Ok(buffers.into_iter().map(vk::CommandBuffer::from_raw).collect())
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state();
        for cb in buffers {
            let raw = cb.as_raw();
            if state.is_pending(raw) {
                state.violation("freed pending command buffer", raw);
            }
            if let Some(owned) = state.pool_buffers.get_mut(&pool.as_raw()) {
                owned.remove(&raw);
            }
            state.recorded_sets.remove(&raw);
            state.destroy(ObjectKind::CommandBuffer, raw);
        }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let mut state = self.state();
        state.check("vkBeginCommandBuffer")?;
        let raw = cmd.as_raw();
        if state.is_pending(raw) {
            state.violation("re-recorded pending command buffer", raw);
        }
        state.recorded_sets.insert(raw, Vec::new());
        state.calls.push(MockCall::BeginCommandBuffer {
            command_buffer: cmd,
        });
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state();
        state.check("vkEndCommandBuffer")?;
        state.calls.push(MockCall::EndCommandBuffer {
            command_buffer: cmd,
        });
        Ok(())
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state();
        state.check("vkResetCommandBuffer")?;
        let raw = cmd.as_raw();
        if state.is_pending(raw) {
            state.violation("reset pending command buffer", raw);
        }
        state.recorded_sets.remove(&raw);
        state.calls.push(MockCall::ResetCommandBuffer {
            command_buffer: cmd,
        });
        Ok(())
    }

    fn cmd_pipeline_barrier(
        &self,
        _cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        let mut state = self.state();
        for barrier in image_barriers {
            state.calls.push(MockCall::PipelineBarrier {
                src_stage,
                dst_stage,
                src_access: barrier.src_access_mask,
                dst_access: barrier.dst_access_mask,
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
            });
        }
    }

    fn cmd_copy_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        _dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        let size = regions.iter().map(|r| r.size).sum();
        self.state().calls.push(MockCall::CopyBuffer { size });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        _dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        let mut state = self.state();
        for region in regions {
            state.calls.push(MockCall::CopyBufferToImage {
                extent: region.image_extent,
                layout: dst_layout,
            });
        }
    }

    fn cmd_begin_render_pass(&self, _cmd: vk::CommandBuffer, begin: &RenderPassBegin) {
        self.state().calls.push(MockCall::BeginRenderPass {
            framebuffer: begin.framebuffer,
            extent: begin.extent,
            clear_color: begin.clear_color,
            clear_depth: begin.clear_depth,
        });
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.state().calls.push(MockCall::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.state().calls.push(MockCall::BindPipeline { pipeline });
    }

    fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.state().calls.push(MockCall::SetViewport {
            width: viewport.width,
            height: viewport.height,
        });
    }

    fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.state().calls.push(MockCall::SetScissor {
            extent: scissor.extent,
        });
    }

    fn cmd_bind_vertex_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
    ) {
        self.state()
            .calls
            .push(MockCall::BindVertexBuffer { buffer });
    }

    fn cmd_bind_index_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _index_type: vk::IndexType,
    ) {
        self.state().calls.push(MockCall::BindIndexBuffer { buffer });
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        let mut state = self.state();
        state
            .recorded_sets
            .entry(cmd.as_raw())
            .or_default()
            .push(set.as_raw());
        state.calls.push(MockCall::BindDescriptorSet { set });
    }

    fn cmd_draw_indexed(&self, _cmd: vk::CommandBuffer, index_count: u32, _instance_count: u32) {
        self.state().calls.push(MockCall::DrawIndexed { index_count });
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submit: &SubmitDesc<'_>,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state();
        state.check("vkQueueSubmit")?;

        let fence_raw = fence.as_raw();
        if fence_raw != 0 {
            let signaled = state.fences.get(&fence_raw).map(|f| f.signaled);
            let pending = state.pending.iter().any(|p| p.fence == fence_raw);
            match signaled {
                Some(true) => state.violation("submit with signaled fence", fence_raw),
                None => state.violation("submit with unknown fence", fence_raw),
                Some(false) if pending => {
                    state.violation("submit with fence already in flight", fence_raw)
                }
                Some(false) => {}
            }
        }

        let command_buffers: Vec<u64> = submit.command_buffers.iter().map(|c| c.as_raw()).collect();

        let mut snapshots = Vec::new();
        for cb in &command_buffers {
            let sets = state.recorded_sets.get(cb).cloned().unwrap_or_default();
            for set in sets {
                let buffers = state.set_buffers.get(&set).cloned().unwrap_or_default();
                for (buffer, range) in buffers {
                    let Some(&(memory, offset)) = state.buffer_bindings.get(&buffer) else {
                        continue;
                    };
                    if let Some(bytes) = state.snapshot(memory, offset, range) {
                        snapshots.push(UniformSnapshot {
                            buffer,
                            memory,
                            offset,
                            bytes,
                        });
                    }
                }
            }
        }

        state.pending.push(PendingSubmit {
            fence: fence_raw,
            command_buffers,
            snapshots,
        });
        state.calls.push(MockCall::QueueSubmit {
            queue,
            command_buffers: submit.command_buffers.to_vec(),
            wait: submit.wait.to_vec(),
            signal: submit.signal.to_vec(),
            fence,
        });
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state();
        state.check("vkCreateFence")?;
        let raw = state.create(ObjectKind::Fence);
        state.fences.insert(raw, FenceState { signaled });
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        let raw = fence.as_raw();
        if state.pending.iter().any(|p| p.fence == raw) {
            state.violation("destroyed in-flight fence", raw);
        }
        state.fences.remove(&raw);
        state.destroy(ObjectKind::Fence, raw);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut state = self.state();
        state.check("vkWaitForFences")?;
        let raw = fence.as_raw();

        if state.fences.get(&raw).is_some_and(|f| f.signaled) {
            state.calls.push(MockCall::WaitForFence {
                fence,
                blocked: false,
            });
            return Ok(());
        }

        let pending = state.pending.iter().any(|p| p.fence == raw);
        if !pending || state.hang_fences {
            // Nothing will ever signal it.
            return Err(vk::Result::TIMEOUT);
        }

        state.complete(|p| p.fence == raw);
        state.blocked_waits += 1;
        state.calls.push(MockCall::WaitForFence {
            fence,
            blocked: true,
        });
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state();
        state.check("vkResetFences")?;
        let raw = fence.as_raw();
        if state.pending.iter().any(|p| p.fence == raw) {
            state.violation("reset in-flight fence", raw);
        }
        if let Some(f) = state.fences.get_mut(&raw) {
            f.signaled = false;
        }
        state.calls.push(MockCall::ResetFence { fence });
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        let mut state = self.state();
        state.check("vkGetFenceStatus")?;
        Ok(state
            .fences
            .get(&fence.as_raw())
            .is_some_and(|f| f.signaled))
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state();
        state.check("vkCreateSemaphore")?;
        Ok(vk::Semaphore::from_raw(state.create(ObjectKind::Semaphore)))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state()
            .destroy(ObjectKind::Semaphore, semaphore.as_raw());
    }

    fn surface(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(SURFACE)
    }

    fn surface_support(&self) -> VkResult<SwapchainSupportDetails> {
        let mut state = self.state();
        state.check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        state.calls.push(MockCall::SurfaceQuery);
        Ok(SwapchainSupportDetails {
            capabilities: state.capabilities,
            formats: state.formats.clone(),
            present_modes: state.present_modes.clone(),
        })
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.state();
        state.check("vkCreateSwapchainKHR")?;
        if info.image_extent.width == 0 || info.image_extent.height == 0 {
            state.violation("zero-sized swapchain", 0);
        }
        state.calls.push(MockCall::CreateSwapchain {
            min_image_count: info.min_image_count,
            extent: info.image_extent,
            sharing_mode: info.image_sharing_mode,
            queue_family_index_count: info.queue_family_index_count,
            old_swapchain: info.old_swapchain,
        });
        let raw = state.create(ObjectKind::Swapchain);
        state.swapchains.insert(raw, (info.min_image_count, 0));
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        state.swapchains.remove(&swapchain.as_raw());
        state.destroy(ObjectKind::Swapchain, swapchain.as_raw());
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut state = self.state();
        state.check("vkGetSwapchainImagesKHR")?;
        let count = state
            .swapchains
            .get(&swapchain.as_raw())
            .map_or(0, |&(count, _)| count);
        let images = (0..count)
            .map(|_| {
                let raw = state.next_handle;
                state.next_handle += 1;
                vk::Image::from_raw(raw)
            })
            .collect();
        Ok(images)
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state();
        let result = match state.check("vkAcquireNextImageKHR") {
            Err(e) => Err(e),
            Ok(()) => match state.acquire_script.pop_front() {
                Some(result) => result,
                None => {
                    let index = state
                        .swapchains
                        .get_mut(&swapchain.as_raw())
                        .filter(|(count, _)| *count > 0)
                        .map(|(count, next)| {
                            let index = *next % *count;
                            *next = next.wrapping_add(1);
                            index
                        });
                    match index {
                        Some(index) => Ok((index, false)),
                        None => {
                            state.violation("acquire from unknown swapchain", swapchain.as_raw());
                            Err(vk::Result::ERROR_SURFACE_LOST_KHR)
                        }
                    }
                }
            },
        };
        state.calls.push(MockCall::AcquireNextImage {
            semaphore,
            result: result.clone(),
        });
        result
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut state = self.state();
        state.check("vkQueuePresentKHR")?;
        if !state.swapchains.contains_key(&swapchain.as_raw()) {
            state.violation("present to unknown swapchain", swapchain.as_raw());
        }
        state.calls.push(MockCall::QueuePresent {
            queue,
            image_index,
            wait_semaphore,
        });
        state.present_script.pop_front().unwrap_or(Ok(false))
    }
}

/// A [`SurfaceProvider`] that replays scripted sizes and resize events.
///
/// Each [`framebuffer_size`](SurfaceProvider::framebuffer_size) call pops the
/// next scripted size; once the script runs out, the last size repeats.
pub struct MockSurfaceProvider {
    sizes: RefCell<VecDeque<(u32, u32)>>,
    current: Cell<(u32, u32)>,
    size_queries: Cell<usize>,
    resizes: VecDeque<bool>,
    close_after_polls: Option<usize>,
    polls: usize,
    waits: usize,
}

impl MockSurfaceProvider {
    /// Creates a provider that always reports `width` x `height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            sizes: RefCell::new(VecDeque::new()),
            current: Cell::new((width, height)),
            size_queries: Cell::new(0),
            resizes: VecDeque::new(),
            close_after_polls: None,
            polls: 0,
            waits: 0,
        }
    }

    /// Queues sizes returned by the next `framebuffer_size` calls.
    pub fn with_sizes(self, sizes: &[(u32, u32)]) -> Self {
        self.sizes.borrow_mut().extend(sizes.iter().copied());
        self
    }

    /// Queues values returned by the next `take_resized` calls.
    pub fn with_resizes(mut self, resizes: &[bool]) -> Self {
        self.resizes.extend(resizes.iter().copied());
        self
    }

    /// Reports `should_close` after `polls` calls to `poll_events`.
    pub fn close_after(mut self, polls: usize) -> Self {
        self.close_after_polls = Some(polls);
        self
    }

    /// Queues sizes after construction.
    pub fn push_sizes(&mut self, sizes: &[(u32, u32)]) {
        self.sizes.get_mut().extend(sizes.iter().copied());
    }

    /// Raises the resize flag once.
    pub fn push_resize(&mut self) {
        self.resizes.push_back(true);
    }

    /// Calls to `framebuffer_size` so far.
    pub fn size_queries(&self) -> usize {
        self.size_queries.get()
    }

    pub fn reset_size_queries(&mut self) {
        self.size_queries.set(0);
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    pub fn waits(&self) -> usize {
        self.waits
    }
}

impl SurfaceProvider for MockSurfaceProvider {
    fn poll_events(&mut self) {
        self.polls += 1;
    }

    fn wait_events(&mut self) {
        self.waits += 1;
    }

    fn should_close(&self) -> bool {
        self.close_after_polls
            .is_some_and(|limit| self.polls >= limit)
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.size_queries.set(self.size_queries.get() + 1);
        if let Some(size) = self.sizes.borrow_mut().pop_front() {
            self.current.set(size);
        }
        self.current.get()
    }

    fn take_resized(&mut self) -> bool {
        self.resizes.pop_front().unwrap_or(false)
    }

    fn required_instance_extensions(&self) -> RhiResult<Vec<*const c_char>> {
        Ok(Vec::new())
    }

    fn create_surface(
        &self,
        _entry: &ash::Entry,
        _instance: &ash::Instance,
    ) -> RhiResult<vk::SurfaceKHR> {
        Ok(vk::SurfaceKHR::from_raw(SURFACE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_destroy_is_reported() {
        let backend = MockBackend::new();
        let fence = backend.create_fence(true).unwrap();
        backend.destroy_fence(fence);
        backend.destroy_fence(fence);

        assert_eq!(backend.created(ObjectKind::Fence), 1);
        assert_eq!(backend.destroyed(ObjectKind::Fence), 1);
        assert_eq!(backend.violations().len(), 1);
    }

    #[test]
    fn test_fence_signals_only_when_waited() {
        let backend = MockBackend::new();
        let fence = backend.create_fence(false).unwrap();
        backend
            .queue_submit(backend.graphics_queue(), &SubmitDesc::default(), fence)
            .unwrap();

        assert!(!backend.fence_status(fence).unwrap());
        assert_eq!(backend.pending_submissions(), 1);

        backend.wait_for_fence(fence, u64::MAX).unwrap();
        assert!(backend.fence_status(fence).unwrap());
        assert_eq!(backend.blocked_waits(), 1);
        assert_eq!(backend.pending_submissions(), 0);
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_unsubmitted_fence_never_signals() {
        let backend = MockBackend::new();
        let fence = backend.create_fence(false).unwrap();
        assert_eq!(
            backend.wait_for_fence(fence, 1_000),
            Err(vk::Result::TIMEOUT)
        );
    }

    #[test]
    fn test_rerecording_pending_command_buffer_is_reported() {
        let backend = MockBackend::new();
        let pool = backend
            .create_command_pool(0, vk::CommandPoolCreateFlags::empty())
            .unwrap();
        let cb = backend.allocate_command_buffers(pool, 1).unwrap()[0];
        let fence = backend.create_fence(false).unwrap();

        backend
            .queue_submit(
                backend.graphics_queue(),
                &SubmitDesc {
                    command_buffers: &[cb],
                    ..Default::default()
                },
                fence,
            )
            .unwrap();
        backend.reset_command_buffer(cb).unwrap();

        assert_eq!(backend.violations().len(), 1);
    }

    #[test]
    fn test_uniform_write_while_pending_is_reported() {
        let backend = MockBackend::new();
        let buffer = backend
            .create_buffer(&vk::BufferCreateInfo::default().size(16))
            .unwrap();
        let memory = backend.allocate_memory(16, 1).unwrap();
        backend.bind_buffer_memory(buffer, memory, 0).unwrap();
        let ptr = backend.map_memory(memory, 0, 16).unwrap();

        let set = vk::DescriptorSet::from_raw(0xDE5);
        backend.update_descriptor_sets(&[DescriptorWrite::UniformBuffer {
            set,
            binding: 0,
            buffer,
            range: 16,
        }]);

        let cb = vk::CommandBuffer::from_raw(0xCB);
        backend
            .begin_command_buffer(cb, vk::CommandBufferUsageFlags::empty())
            .unwrap();
        backend.cmd_bind_descriptor_set(cb, vk::PipelineLayout::null(), set);
        let fence = backend.create_fence(false).unwrap();
        backend
            .queue_submit(
                backend.graphics_queue(),
                &SubmitDesc {
                    command_buffers: &[cb],
                    ..Default::default()
                },
                fence,
            )
            .unwrap();

        // SAFETY: the mapping is 16 bytes long.
        unsafe { ptr.as_ptr().write(0xFF) };
        backend.wait_for_fence(fence, u64::MAX).unwrap();

        let violations = backend.violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("uniform buffer"));
    }

    #[test]
    fn test_acquire_round_robin() {
        let backend = MockBackend::new();
        let swapchain = backend
            .create_swapchain(&vk::SwapchainCreateInfoKHR::default().min_image_count(3))
            .unwrap();

        let indices: Vec<u32> = (0..4)
            .map(|_| {
                backend
                    .acquire_next_image(swapchain, u64::MAX, vk::Semaphore::null())
                    .unwrap()
                    .0
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let backend = MockBackend::new();
        backend.fail_next("vkCreateFence", vk::Result::ERROR_OUT_OF_HOST_MEMORY);

        assert_eq!(
            backend.create_fence(true),
            Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
        );
        assert!(backend.create_fence(true).is_ok());
    }

    #[test]
    fn test_scripted_provider_sizes() {
        let provider = MockSurfaceProvider::new(800, 600).with_sizes(&[(0, 0), (1024, 768)]);
        assert_eq!(provider.framebuffer_size(), (0, 0));
        assert_eq!(provider.framebuffer_size(), (1024, 768));
        assert_eq!(provider.framebuffer_size(), (1024, 768));
        assert_eq!(provider.size_queries(), 3);
    }
}
