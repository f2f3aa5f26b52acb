use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::error::{RenderError, RenderResult};
use crate::renderer::device::{
    BufferDesc, BufferKind, IndexBufferBinding, PrimitiveTopology, RenderDevice,
    VertexBufferBinding,
};
use crate::renderer::mesh::{MeshData, VertexAccessor};
use crate::renderer::vertex::{
    ElementComponent, ElementType, VertexAttribute, VertexAttributeElement,
    VertexAttributeSemantic,
};
use crate::scene::components::SkinnedMesh;

/// Size of the bone palette uploaded per draw.
pub const MAX_BONES: usize = 96;
pub const MAX_MORPH_TARGETS: usize = 8;

/// Per-draw animation state.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererAnimationData {
    pub bone_transforms: Vec<Mat4>,
    pub morph_weights: [f32; MAX_MORPH_TARGETS],
}

impl Default for RendererAnimationData {
    fn default() -> Self {
        Self {
            bone_transforms: Vec::new(),
            morph_weights: [0.0; MAX_MORPH_TARGETS],
        }
    }
}

impl RendererAnimationData {
    pub fn num_bones(&self) -> usize {
        self.bone_transforms.len()
    }

    pub fn clear(&mut self) {
        self.bone_transforms.clear();
        self.morph_weights = [0.0; MAX_MORPH_TARGETS];
    }

    /// Copies the first weights; the remainder is zeroed.
    pub fn set_morph_weights(&mut self, weights: &[f32]) {
        self.morph_weights = [0.0; MAX_MORPH_TARGETS];
        for (target, weight) in self.morph_weights.iter_mut().zip(weights) {
            *target = *weight;
        }
    }

    /// Joint palette relative to the mesh root:
    /// `inverse(root) * joint_world * inverse_bind`.
    pub fn set_skin(&mut self, root_world: &Mat4, skin: &SkinnedMesh) -> RenderResult<()> {
        if skin.joint_transforms.len() != skin.inverse_bind_matrices.len() {
            return Err(RenderError::configuration(
                "Size of joints and inverse bone transform arrays must match.",
            ));
        }
        if skin.inverse_bind_matrices.len() > MAX_BONES {
            return Err(RenderError::configuration(format!(
                "Maximum number of bone transforms exceeded: {} > {MAX_BONES}",
                skin.inverse_bind_matrices.len()
            )));
        }

        let inv_root = root_world.inverse();
        self.bone_transforms = skin
            .joint_transforms
            .iter()
            .zip(&skin.inverse_bind_matrices)
            .map(|(joint_world, inverse_bind)| inv_root * *joint_world * *inverse_bind)
            .collect();
        Ok(())
    }

    /// Bone palette padded to `MAX_BONES` matrices.
    pub fn bone_bytes(&self) -> Vec<u8> {
        let mut palette = vec![[[0f32; 4]; 4]; MAX_BONES];
        for (slot, transform) in palette.iter_mut().zip(&self.bone_transforms) {
            *slot = transform.to_cols_array_2d();
        }
        bytemuck::cast_slice(&palette).to_vec()
    }

    pub fn bone_buffer_size() -> u64 {
        (std::mem::size_of::<[[f32; 4]; 4]>() * MAX_BONES) as u64
    }
}

/// Device buffers for one mesh, laid out for one set of vertex inputs.
#[derive(Debug)]
pub struct RendererData {
    inputs: Vec<VertexAttributeElement>,
    vertex_buffers: Vec<VertexBufferBinding>,
    index_buffer: Option<IndexBufferBinding>,
    vertex_count: u32,
    index_count: u32,
    topology: PrimitiveTopology,
    stale: bool,
}

impl RendererData {
    /// One vertex buffer per input, in input order. Normals, tangents and
    /// bi-tangents are generated when the mesh lacks them.
    pub fn create(
        device: &mut dyn RenderDevice,
        mesh: &MeshData,
        inputs: &[VertexAttributeElement],
    ) -> RenderResult<Self> {
        let streams = VertexStreams::gather(mesh, inputs)?;

        let mut data = Self {
            inputs: inputs.to_vec(),
            vertex_buffers: Vec::with_capacity(inputs.len()),
            index_buffer: None,
            vertex_count: mesh.vertex_count() as u32,
            index_count: 0,
            topology: mesh.topology(),
            stale: false,
        };

        for (input, bytes) in inputs.iter().zip(streams.0) {
            let label = format!("{} {}", mesh.name(), input.semantic);
            match device.create_buffer(
                &BufferDesc {
                    label: &label,
                    kind: BufferKind::Vertex,
                    size: bytes.len() as u64,
                },
                Some(&bytes),
            ) {
                Ok(buffer) => data.vertex_buffers.push(VertexBufferBinding {
                    buffer,
                    stride: input.byte_size(),
                    offset: 0,
                }),
                Err(err) => {
                    data.destroy(device);
                    return Err(err);
                }
            }
        }

        if let Some(indices) = mesh.indices() {
            let label = format!("{} indices", mesh.name());
            match device.create_buffer(
                &BufferDesc {
                    label: &label,
                    kind: BufferKind::Index,
                    size: indices.bytes().len() as u64,
                },
                Some(indices.bytes()),
            ) {
                Ok(buffer) => {
                    data.index_buffer = Some(IndexBufferBinding {
                        buffer,
                        format: indices.format(),
                        offset: 0,
                    });
                    data.index_count = indices.len() as u32;
                }
                Err(err) => {
                    data.destroy(device);
                    return Err(err);
                }
            }
        }

        Ok(data)
    }

    pub fn inputs(&self) -> &[VertexAttributeElement] {
        &self.inputs
    }

    /// False once the data was marked stale, whatever the inputs.
    pub fn matches(&self, inputs: &[VertexAttributeElement]) -> bool {
        !self.stale && self.inputs == inputs
    }

    /// The source mesh changed. The buffers are released on the next draw or
    /// when the device is torn down.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn is_indexed(&self) -> bool {
        self.index_buffer.is_some()
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn vertex_buffers(&self) -> &[VertexBufferBinding] {
        &self.vertex_buffers
    }

    pub fn bind(&self, device: &mut dyn RenderDevice) {
        device.set_vertex_buffers(&self.vertex_buffers);
        device.set_index_buffer(self.index_buffer);
        device.set_topology(self.topology);
    }

    pub fn draw(&self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        if self.is_indexed() {
            device.draw_indexed(self.index_count)
        } else {
            device.draw(self.vertex_count)
        }
    }

    pub fn destroy(&mut self, device: &mut dyn RenderDevice) {
        for binding in self.vertex_buffers.drain(..) {
            device.destroy_buffer(binding.buffer);
        }
        if let Some(binding) = self.index_buffer.take() {
            device.destroy_buffer(binding.buffer);
        }
    }
}

/// Raw bytes of every requested input, in request order.
struct VertexStreams(Vec<Vec<u8>>);

impl VertexStreams {
    fn gather(mesh: &MeshData, inputs: &[VertexAttributeElement]) -> RenderResult<Self> {
        let mut generated = GeneratedAttributes::default();
        let mut streams = Vec::with_capacity(inputs.len());

        for input in inputs {
            let semantic = input.semantic;
            if let Some(accessor) = mesh.attribute(semantic) {
                streams.push(convert_accessor(mesh, input, accessor)?);
                continue;
            }

            if semantic.semantic_index > 0 {
                streams.push(morph_target_stream(mesh, input)?);
                continue;
            }

            let bytes = match semantic.attribute {
                VertexAttribute::Normal => {
                    let normals = generated.normals(mesh)?;
                    encode_vec3s(normals, input.ty)
                }
                VertexAttribute::Tangent => {
                    let tangents = generated.tangents(mesh)?;
                    encode_vec4s(tangents, input.ty)
                }
                VertexAttribute::BiTangent => {
                    let normals = generated.normals(mesh)?.to_vec();
                    let tangents = generated.tangents(mesh)?;
                    let bitangents: Vec<Vec3> = normals
                        .iter()
                        .zip(tangents)
                        .map(|(normal, tangent)| normal.cross(tangent.truncate()) * tangent.w)
                        .collect();
                    encode_vec3s(&bitangents, input.ty)
                }
                _ => {
                    return Err(RenderError::configuration(format!(
                        "Mesh {} does not have required attribute: {}",
                        mesh.name(),
                        semantic
                    )))
                }
            };
            streams.push(bytes);
        }

        Ok(Self(streams))
    }
}

fn convert_accessor(
    mesh: &MeshData,
    input: &VertexAttributeElement,
    accessor: &VertexAccessor,
) -> RenderResult<Vec<u8>> {
    if accessor.ty == input.ty && accessor.component == input.component {
        return Ok(accessor.bytes().to_vec());
    }
    if input.component == ElementComponent::Float && accessor.component == ElementComponent::Float {
        if let (ElementType::Vector4, Some(values)) = (input.ty, accessor.vec3s()) {
            return Ok(encode_vec3s(&values, ElementType::Vector4));
        }
    }
    Err(RenderError::configuration(format!(
        "Mesh {} attribute {} is {:?}/{:?}, expected {:?}/{:?}",
        mesh.name(),
        input.semantic,
        accessor.ty,
        accessor.component,
        input.ty,
        input.component
    )))
}

/// Morph target displacements are exposed as semantic indices 1..=N.
fn morph_target_stream(mesh: &MeshData, input: &VertexAttributeElement) -> RenderResult<Vec<u8>> {
    let semantic = input.semantic;
    let target_index = semantic.semantic_index as usize - 1;
    let values = mesh
        .morph_targets()
        .get(target_index)
        .and_then(|target| target.get(semantic.attribute))
        .ok_or_else(|| {
            RenderError::configuration(format!(
                "Mesh {} does not have required morph target attribute: {}",
                mesh.name(),
                semantic
            ))
        })?;
    Ok(encode_vec3s(values, input.ty))
}

fn encode_vec3s(values: &[Vec3], ty: ElementType) -> Vec<u8> {
    match ty {
        ElementType::Vector4 => {
            let data: Vec<[f32; 4]> = values.iter().map(|value| value.extend(0.0).to_array()).collect();
            bytemuck::cast_slice(&data).to_vec()
        }
        _ => {
            let data: Vec<[f32; 3]> = values.iter().map(|value| value.to_array()).collect();
            bytemuck::cast_slice(&data).to_vec()
        }
    }
}

fn encode_vec4s(values: &[Vec4], ty: ElementType) -> Vec<u8> {
    match ty {
        ElementType::Vector3 => {
            let data: Vec<[f32; 3]> = values.iter().map(|value| value.truncate().to_array()).collect();
            bytemuck::cast_slice(&data).to_vec()
        }
        _ => {
            let data: Vec<[f32; 4]> = values.iter().map(|value| value.to_array()).collect();
            bytemuck::cast_slice(&data).to_vec()
        }
    }
}

#[derive(Default)]
struct GeneratedAttributes {
    normals: Option<Vec<Vec3>>,
    tangents: Option<Vec<Vec4>>,
}

impl GeneratedAttributes {
    fn normals(&mut self, mesh: &MeshData) -> RenderResult<&[Vec3]> {
        if self.normals.is_none() {
            let normals = match mesh
                .attribute(VertexAttributeSemantic::primary(VertexAttribute::Normal))
                .and_then(VertexAccessor::vec3s)
            {
                Some(normals) => normals,
                None => {
                    log::warn!("Generating missing normals for mesh {}", mesh.name());
                    let positions = require_positions(mesh)?;
                    generate_normals(&positions, &triangle_indices(mesh, positions.len()))
                }
            };
            self.normals = Some(normals);
        }
        Ok(self.normals.as_deref().unwrap_or_default())
    }

    fn tangents(&mut self, mesh: &MeshData) -> RenderResult<&[Vec4]> {
        if self.tangents.is_none() {
            log::warn!("Generating missing tangents for mesh {}", mesh.name());
            let positions = require_positions(mesh)?;
            let normals = self.normals(mesh)?.to_vec();
            let uvs = mesh
                .attribute(VertexAttributeSemantic::primary(VertexAttribute::TexCoord))
                .and_then(VertexAccessor::vec2s)
                .ok_or_else(|| {
                    RenderError::configuration(format!(
                        "Mesh {} needs texture coordinates to generate tangents",
                        mesh.name()
                    ))
                })?;
            let indices = triangle_indices(mesh, positions.len());
            self.tangents = Some(generate_tangents(&positions, &normals, &uvs, &indices));
        }
        Ok(self.tangents.as_deref().unwrap_or_default())
    }
}

fn require_positions(mesh: &MeshData) -> RenderResult<Vec<Vec3>> {
    mesh.positions().ok_or_else(|| {
        RenderError::configuration(format!("Mesh {} has no float3 positions", mesh.name()))
    })
}

fn triangle_indices(mesh: &MeshData, vertex_count: usize) -> Vec<u32> {
    match mesh.indices() {
        Some(indices) => indices.to_u32(),
        None => (0..vertex_count as u32).collect(),
    }
}

/// Area-weighted vertex normals of an indexed triangle list.
pub fn generate_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [triangle[0] as usize, triangle[1] as usize, triangle[2] as usize];
        if a >= positions.len() || b >= positions.len() || c >= positions.len() {
            continue;
        }
        let face = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }
    normals
        .into_iter()
        .map(|normal| normal.try_normalize().unwrap_or(Vec3::Y))
        .collect()
}

/// Per-vertex tangents with handedness in `w`.
pub fn generate_tangents(positions: &[Vec3], normals: &[Vec3], uvs: &[Vec2], indices: &[u32]) -> Vec<Vec4> {
    let count = positions.len();
    let mut tangents = vec![Vec3::ZERO; count];
    let mut bitangents = vec![Vec3::ZERO; count];

    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [triangle[0] as usize, triangle[1] as usize, triangle[2] as usize];
        if a >= count || b >= count || c >= count || a >= uvs.len() || b >= uvs.len() || c >= uvs.len() {
            continue;
        }
        let edge1 = positions[b] - positions[a];
        let edge2 = positions[c] - positions[a];
        let duv1 = uvs[b] - uvs[a];
        let duv2 = uvs[c] - uvs[a];
        let det = duv1.x * duv2.y - duv2.x * duv1.y;
        if det.abs() <= f32::EPSILON {
            continue;
        }
        let r = 1.0 / det;
        let tangent = (edge1 * duv2.y - edge2 * duv1.y) * r;
        let bitangent = (edge2 * duv1.x - edge1 * duv2.x) * r;
        for index in [a, b, c] {
            tangents[index] += tangent;
            bitangents[index] += bitangent;
        }
    }

    (0..count)
        .map(|i| {
            let normal = normals.get(i).copied().unwrap_or(Vec3::Y);
            // Gram-Schmidt against the normal.
            let tangent = (tangents[i] - normal * normal.dot(tangents[i]))
                .try_normalize()
                .unwrap_or_else(|| normal.any_orthonormal_vector());
            let handedness = if normal.cross(tangent).dot(bitangents[i]) < 0.0 {
                -1.0
            } else {
                1.0
            };
            tangent.extend(handedness)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::HeadlessDevice;
    use crate::renderer::mesh::{IndexData, MorphTarget};
    use crate::renderer::primitives;

    fn triangle() -> MeshData {
        MeshData::new("triangle", PrimitiveTopology::TriangleList)
            .with_positions(&[Vec3::ZERO, Vec3::X, Vec3::Y])
            .with_attribute(
                VertexAttributeSemantic::primary(VertexAttribute::TexCoord),
                VertexAccessor::vec2(&[Vec2::ZERO, Vec2::X, Vec2::Y]),
            )
            .with_indices(IndexData::U16(vec![0, 1, 2]))
    }

    #[test]
    fn generated_normals_follow_the_winding() {
        let normals = generate_normals(&[Vec3::ZERO, Vec3::X, Vec3::Y], &[0, 1, 2]);
        for normal in normals {
            assert!(normal.abs_diff_eq(Vec3::Z, 1e-6));
        }
    }

    #[test]
    fn generated_tangents_follow_the_u_axis() {
        let tangents = generate_tangents(
            &[Vec3::ZERO, Vec3::X, Vec3::Y],
            &[Vec3::Z; 3],
            &[Vec2::ZERO, Vec2::X, Vec2::Y],
            &[0, 1, 2],
        );
        for tangent in tangents {
            assert!(tangent.abs_diff_eq(Vec4::new(1.0, 0.0, 0.0, 1.0), 1e-6));
        }
    }

    #[test]
    fn creates_one_buffer_per_input_and_generates_missing_streams() {
        let mut device = HeadlessDevice::new();
        let inputs = [
            VertexAttributeElement::float(VertexAttribute::Position, 0, ElementType::Vector3),
            VertexAttributeElement::float(VertexAttribute::Normal, 0, ElementType::Vector3),
            VertexAttributeElement::float(VertexAttribute::Tangent, 0, ElementType::Vector4),
            VertexAttributeElement::float(VertexAttribute::TexCoord, 0, ElementType::Vector2),
        ];
        let mut data = RendererData::create(&mut device, &triangle(), &inputs).unwrap();
        assert_eq!(data.vertex_buffers().len(), 4);
        assert_eq!(data.vertex_buffers()[2].stride, 16);
        assert!(data.is_indexed());
        assert_eq!(data.index_count(), 3);
        assert!(data.matches(&inputs));
        assert_eq!(device.live_buffer_count(), 5);

        let normals = device.buffer_contents(data.vertex_buffers()[1].buffer).unwrap();
        let first: [f32; 3] = bytemuck::pod_read_unaligned(&normals[..12]);
        assert_eq!(first, [0.0, 0.0, 1.0]);

        data.destroy(&mut device);
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn other_missing_attributes_are_configuration_errors() {
        let mut device = HeadlessDevice::new();
        let inputs = [
            VertexAttributeElement::float(VertexAttribute::Position, 0, ElementType::Vector3),
            VertexAttributeElement::float(VertexAttribute::Color, 0, ElementType::Vector4),
        ];
        let result = RendererData::create(&mut device, &triangle(), &inputs);
        assert!(matches!(result, Err(RenderError::Configuration(_))));
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn morph_target_inputs_read_the_matching_target() {
        let mut device = HeadlessDevice::new();
        let mesh = triangle().with_morph_targets(vec![
            MorphTarget {
                positions: Some(vec![Vec3::ONE; 3]),
                ..Default::default()
            },
            MorphTarget {
                positions: Some(vec![Vec3::splat(2.0); 3]),
                ..Default::default()
            },
        ]);
        let inputs = [
            VertexAttributeElement::float(VertexAttribute::Position, 0, ElementType::Vector3),
            VertexAttributeElement::float(VertexAttribute::Position, 2, ElementType::Vector3),
        ];
        let data = RendererData::create(&mut device, &mesh, &inputs).unwrap();
        let second = device.buffer_contents(data.vertex_buffers()[1].buffer).unwrap();
        let value: [f32; 3] = bytemuck::pod_read_unaligned(&second[..12]);
        assert_eq!(value, [2.0; 3]);
    }

    #[test]
    fn quad_without_indices_draws_by_vertex_count() {
        let mut device = HeadlessDevice::new();
        let mesh = MeshData::new("strip", PrimitiveTopology::TriangleList)
            .with_positions(&[Vec3::ZERO, Vec3::X, Vec3::Y]);
        let inputs = [VertexAttributeElement::float(
            VertexAttribute::Position,
            0,
            ElementType::Vector3,
        )];
        let data = RendererData::create(&mut device, &mesh, &inputs).unwrap();
        assert!(!data.is_indexed());
        assert_eq!(data.vertex_count(), 3);
        assert_eq!(primitives::screen_quad().vertex_count(), 4);
    }

    #[test]
    fn skin_palette_is_relative_to_the_root() {
        let mut animation = RendererAnimationData::default();
        let root = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0));
        let joint = Mat4::from_translation(Vec3::new(1.0, 0.0, 5.0));
        let skin = SkinnedMesh {
            joint_transforms: vec![joint],
            inverse_bind_matrices: vec![Mat4::from_translation(Vec3::new(-1.0, 0.0, 0.0))],
        };
        animation.set_skin(&root, &skin).unwrap();
        assert_eq!(animation.num_bones(), 1);
        assert!(animation.bone_transforms[0].abs_diff_eq(Mat4::IDENTITY, 1e-6));
        assert_eq!(animation.bone_bytes().len() as u64, RendererAnimationData::bone_buffer_size());

        let mismatched = SkinnedMesh {
            joint_transforms: vec![joint; 2],
            inverse_bind_matrices: vec![Mat4::IDENTITY],
        };
        assert!(animation.set_skin(&root, &mismatched).is_err());

        let too_many = SkinnedMesh {
            joint_transforms: vec![Mat4::IDENTITY; MAX_BONES + 1],
            inverse_bind_matrices: vec![Mat4::IDENTITY; MAX_BONES + 1],
        };
        assert!(animation.set_skin(&root, &too_many).is_err());
    }

    #[test]
    fn morph_weights_are_zero_padded() {
        let mut animation = RendererAnimationData::default();
        animation.set_morph_weights(&[0.5; 12]);
        assert_eq!(animation.morph_weights, [0.5; MAX_MORPH_TARGETS]);
        animation.set_morph_weights(&[1.0, 0.25]);
        assert_eq!(animation.morph_weights[..3], [1.0, 0.25, 0.0]);
    }
}
