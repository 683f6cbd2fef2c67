//! Frame lifecycle and swapchain recreation.
//!
//! This crate drives the per-frame loop on top of `frameloop-rhi`:
//! - Frame slots and their synchronization primitives
//! - The acquire / record / submit / present state machine
//! - Swapchain object graph rebuilds on resize and invalidation
//! - Static scene resources (mesh, texture, uniform buffers)

pub mod depth_target;
pub mod draw_pipeline;
pub mod executor;
pub mod frame_ring;
pub mod mesh;
pub mod resource_pool;
pub mod swapchain_manager;
pub mod texture;
pub mod ubo;

pub use draw_pipeline::ShaderBinaries;
pub use executor::{FrameExecutor, FrameOutcome, FrameState};
pub use frame_ring::{FrameRing, FrameSlot};
pub use swapchain_manager::SwapchainManager;
