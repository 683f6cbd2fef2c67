//! Static scene geometry.
//!
//! Two textured quads stacked along Z, uploaded once into device-local
//! vertex and index buffers and shared read-only by every frame.

use glam::{Vec2, Vec3};
use tracing::info;

use frameloop_rhi::RhiResult;
use frameloop_rhi::backend::Backend;
use frameloop_rhi::buffer::{Buffer, BufferUsage};
use frameloop_rhi::vertex::Vertex;

use crate::resource_pool::ResourcePool;

/// Z coordinates of the two quads, front first.
const QUAD_DEPTHS: [f32; 2] = [0.0, -0.5];

/// Vertices of two stacked unit quads centered on the Z axis.
pub fn stacked_quad_vertices() -> Vec<Vertex> {
    let corners = [
        (Vec2::new(-0.5, -0.5), Vec3::new(1.0, 0.0, 0.0), Vec2::new(1.0, 0.0)),
        (Vec2::new(0.5, -0.5), Vec3::new(0.0, 1.0, 0.0), Vec2::new(0.0, 0.0)),
        (Vec2::new(0.5, 0.5), Vec3::new(0.0, 0.0, 1.0), Vec2::new(0.0, 1.0)),
        (Vec2::new(-0.5, 0.5), Vec3::new(1.0, 1.0, 1.0), Vec2::new(1.0, 1.0)),
    ];

    QUAD_DEPTHS
        .iter()
        .flat_map(|&z| {
            corners
                .iter()
                .map(move |&(xy, color, uv)| Vertex::new(xy.extend(z), color, uv))
        })
        .collect()
}

/// Two counter-clockwise triangles per quad.
pub fn stacked_quad_indices() -> Vec<u32> {
    (0..QUAD_DEPTHS.len() as u32)
        .flat_map(|quad| {
            let base = quad * 4;
            [base, base + 1, base + 2, base + 2, base + 3, base]
        })
        .collect()
}

/// Device-local vertex and index buffers of the static scene.
///
/// Fields drop in declaration order: the index buffer, created last, is
/// released first.
pub struct Mesh<B: Backend> {
    index_buffer: Buffer<B>,
    vertex_buffer: Buffer<B>,
    index_count: u32,
}

impl<B: Backend> Mesh<B> {
    /// Uploads `vertices` and `indices` through staging buffers.
    ///
    /// # Errors
    ///
    /// Returns any buffer creation or one-shot submission failure.
    pub fn upload(pool: &ResourcePool<B>, vertices: &[Vertex], indices: &[u32]) -> RhiResult<Self> {
        let vertex_buffer = pool.upload_buffer(BufferUsage::Vertex, bytemuck::cast_slice(vertices))?;
        let index_buffer = pool.upload_buffer(BufferUsage::Index, bytemuck::cast_slice(indices))?;

        info!(
            "Mesh uploaded: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }

    /// Uploads the two stacked quads.
    pub fn stacked_quads(pool: &ResourcePool<B>) -> RhiResult<Self> {
        Self::upload(pool, &stacked_quad_vertices(), &stacked_quad_indices())
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &Buffer<B> {
        &self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> &Buffer<B> {
        &self.index_buffer
    }

    /// Number of indices drawn per frame.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use frameloop_rhi::mock::{MockBackend, MockCall, ObjectKind};

    #[test]
    fn test_stacked_quads_shape() {
        let vertices = stacked_quad_vertices();
        let indices = stacked_quad_indices();

        assert_eq!(vertices.len(), 8);
        assert_eq!(indices, vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4]);
        assert!(vertices[..4].iter().all(|v| v.position.z == 0.0));
        assert!(vertices[4..].iter().all(|v| v.position.z == -0.5));
    }

    #[test]
    fn test_quads_share_colors_and_uvs() {
        let vertices = stacked_quad_vertices();
        for (front, back) in vertices[..4].iter().zip(&vertices[4..]) {
            assert_eq!(front.color, back.color);
            assert_eq!(front.tex_coord, back.tex_coord);
            assert_eq!(front.position.truncate(), back.position.truncate());
        }
    }

    #[test]
    fn test_upload_copies_both_buffers() {
        let backend = Arc::new(MockBackend::new());
        let pool = ResourcePool::new(Arc::clone(&backend)).unwrap();

        let mesh = Mesh::stacked_quads(&pool).unwrap();

        assert_eq!(mesh.index_count(), 12);
        assert_eq!(mesh.vertex_buffer().size(), 8 * 32);
        assert_eq!(mesh.index_buffer().size(), 12 * 4);
        let copies: Vec<MockCall> = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::CopyBuffer { .. }))
            .collect();
        assert_eq!(
            copies,
            vec![
                MockCall::CopyBuffer { size: 256 },
                MockCall::CopyBuffer { size: 48 }
            ]
        );
        assert_eq!(backend.live(ObjectKind::Buffer), 2);
    }
}
