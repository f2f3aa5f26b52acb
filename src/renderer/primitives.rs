use std::f32::consts::PI;

use glam::{Vec2, Vec3};

use super::device::PrimitiveTopology;
use super::mesh::{IndexData, MeshData, VertexAccessor};
use super::vertex::{VertexAttribute, VertexAttributeSemantic};

fn semantic(attribute: VertexAttribute) -> VertexAttributeSemantic {
    VertexAttributeSemantic::primary(attribute)
}

/// Screen-space quad covering clip space: 2x2 with its origin at (-1, -1).
pub fn screen_quad() -> MeshData {
    let positions = [
        Vec3::new(-1.0, -1.0, 0.0),
        Vec3::new(1.0, -1.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(-1.0, 1.0, 0.0),
    ];
    let uvs = [
        Vec2::new(0.0, 1.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(0.0, 0.0),
    ];
    let normals = [Vec3::Z; 4];

    MeshData::new("screen_quad", PrimitiveTopology::TriangleList)
        .with_positions(&positions)
        .with_attribute(semantic(VertexAttribute::Normal), VertexAccessor::vec3(&normals))
        .with_attribute(semantic(VertexAttribute::TexCoord), VertexAccessor::vec2(&uvs))
        .with_indices(IndexData::U16(vec![0, 1, 2, 0, 2, 3]))
}

/// Unit UV sphere with outward normals.
pub fn sphere(segments: u32, rings: u32) -> MeshData {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut positions = Vec::new();
    let mut uvs = Vec::new();

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let y = phi.cos();
        let ring_radius = phi.sin();

        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            positions.push(Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin()));
            uvs.push(Vec2::new(
                segment as f32 / segments as f32,
                ring as f32 / rings as f32,
            ));
        }
    }

    let mut indices = Vec::new();
    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * (segments + 1) + segment;
            let next = current + segments + 1;

            indices.extend_from_slice(&[current, next, current + 1]);
            indices.extend_from_slice(&[current + 1, next, next + 1]);
        }
    }

    MeshData::new("sphere", PrimitiveTopology::TriangleList)
        .with_positions(&positions)
        .with_attribute(semantic(VertexAttribute::Normal), VertexAccessor::vec3(&positions))
        .with_attribute(semantic(VertexAttribute::TexCoord), VertexAccessor::vec2(&uvs))
        .with_indices(IndexData::U32(indices))
}

/// Axis aligned box with flat face normals, centered on the origin.
pub fn cube(half_extents: Vec3) -> MeshData {
    // (normal, u axis, v axis) per face.
    let faces = [
        (Vec3::X, Vec3::Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::Z, Vec3::NEG_X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::X, Vec3::Y),
    ];

    let mut positions = Vec::with_capacity(24);
    let mut normals = Vec::with_capacity(24);
    let mut uvs = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u_axis, v_axis) in faces {
        let base = positions.len() as u16;
        for (u, v) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            positions.push((normal + u_axis * u + v_axis * v) * half_extents);
            normals.push(normal);
            uvs.push(Vec2::new((u + 1.0) * 0.5, 1.0 - (v + 1.0) * 0.5));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshData::new("cube", PrimitiveTopology::TriangleList)
        .with_positions(&positions)
        .with_attribute(semantic(VertexAttribute::Normal), VertexAccessor::vec3(&normals))
        .with_attribute(semantic(VertexAttribute::TexCoord), VertexAccessor::vec2(&uvs))
        .with_indices(IndexData::U16(indices))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_spans_clip_space() {
        let quad = screen_quad();
        let positions = quad.positions().unwrap();
        assert_eq!(positions[0], Vec3::new(-1.0, -1.0, 0.0));
        assert_eq!(positions[2], Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(quad.indices().unwrap().len(), 6);
    }

    #[test]
    fn sphere_vertices_are_on_the_unit_sphere() {
        let mesh = sphere(16, 8);
        for position in mesh.positions().unwrap() {
            assert!((position.length() - 1.0).abs() < 1e-5);
        }
        assert_eq!(mesh.indices().unwrap().len(), (16 * 8 * 6) as usize);
    }

    #[test]
    fn cube_faces_are_outward() {
        let mesh = cube(Vec3::splat(0.5));
        let positions = mesh.positions().unwrap();
        let normals = mesh
            .attribute(VertexAttributeSemantic::primary(VertexAttribute::Normal))
            .and_then(VertexAccessor::vec3s)
            .unwrap();
        assert_eq!(positions.len(), 24);
        for (position, normal) in positions.iter().zip(&normals) {
            assert!((position.dot(*normal) - 0.5).abs() < 1e-6);
        }
    }
}
