use std::collections::BTreeMap;

use bytemuck::Pod;
use glam::{Vec2, Vec3, Vec4};

use crate::renderer::device::{IndexFormat, PrimitiveTopology};
use crate::renderer::vertex::{
    ElementComponent, ElementType, MeshVertexLayout, VertexAttribute, VertexAttributeElement,
    VertexAttributeSemantic,
};
use crate::scene::bounds::BoundingSphere;

/// Tightly packed vertex data for one semantic.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexAccessor {
    pub ty: ElementType,
    pub component: ElementComponent,
    pub count: usize,
    bytes: Vec<u8>,
}

impl VertexAccessor {
    pub fn new<T: Pod>(ty: ElementType, component: ElementComponent, elements: &[T]) -> Self {
        let bytes: Vec<u8> = bytemuck::cast_slice(elements).to_vec();
        let stride = (ty.component_count() * component.size()) as usize;
        Self {
            ty,
            component,
            count: bytes.len() / stride,
            bytes,
        }
    }

    pub fn vec2(values: &[Vec2]) -> Self {
        let data: Vec<[f32; 2]> = values.iter().map(|value| value.to_array()).collect();
        Self::new(ElementType::Vector2, ElementComponent::Float, &data)
    }

    pub fn vec3(values: &[Vec3]) -> Self {
        let data: Vec<[f32; 3]> = values.iter().map(|value| value.to_array()).collect();
        Self::new(ElementType::Vector3, ElementComponent::Float, &data)
    }

    pub fn vec4(values: &[Vec4]) -> Self {
        let data: Vec<[f32; 4]> = values.iter().map(|value| value.to_array()).collect();
        Self::new(ElementType::Vector4, ElementComponent::Float, &data)
    }

    pub fn joints_u16(values: &[[u16; 4]]) -> Self {
        Self::new(ElementType::Vector4, ElementComponent::UnsignedShort, values)
    }

    pub fn stride(&self) -> u32 {
        self.ty.component_count() * self.component.size()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn element(&self, semantic: VertexAttributeSemantic) -> VertexAttributeElement {
        VertexAttributeElement::new(semantic, self.ty, self.component)
    }

    /// Float components, flattened. `None` when the data isn't float.
    pub fn floats(&self) -> Option<Vec<f32>> {
        (self.component == ElementComponent::Float).then(|| {
            self.bytes
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect()
        })
    }

    pub fn vec3s(&self) -> Option<Vec<Vec3>> {
        if self.ty != ElementType::Vector3 {
            return None;
        }
        self.floats()
            .map(|floats| floats.chunks_exact(3).map(Vec3::from_slice).collect())
    }

    pub fn vec2s(&self) -> Option<Vec<Vec2>> {
        if self.ty != ElementType::Vector2 {
            return None;
        }
        self.floats()
            .map(|floats| floats.chunks_exact(2).map(Vec2::from_slice).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    pub fn len(&self) -> usize {
        match self {
            IndexData::U16(indices) => indices.len(),
            IndexData::U32(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn format(&self) -> IndexFormat {
        match self {
            IndexData::U16(_) => IndexFormat::Uint16,
            IndexData::U32(_) => IndexFormat::Uint32,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            IndexData::U16(indices) => bytemuck::cast_slice(indices),
            IndexData::U32(indices) => bytemuck::cast_slice(indices),
        }
    }

    pub fn to_u32(&self) -> Vec<u32> {
        match self {
            IndexData::U16(indices) => indices.iter().map(|&index| index as u32).collect(),
            IndexData::U32(indices) => indices.clone(),
        }
    }
}

/// Per-target displacement data. Every target of a mesh carries the same set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MorphTarget {
    pub positions: Option<Vec<Vec3>>,
    pub normals: Option<Vec<Vec3>>,
    pub tangents: Option<Vec<Vec3>>,
}

impl MorphTarget {
    pub fn get(&self, attribute: VertexAttribute) -> Option<&[Vec3]> {
        match attribute {
            VertexAttribute::Position => self.positions.as_deref(),
            VertexAttribute::Normal => self.normals.as_deref(),
            VertexAttribute::Tangent => self.tangents.as_deref(),
            _ => None,
        }
    }
}

/// CPU-side mesh as produced by the asset importers.
#[derive(Debug, Clone)]
pub struct MeshData {
    name: String,
    attributes: BTreeMap<VertexAttributeSemantic, VertexAccessor>,
    indices: Option<IndexData>,
    topology: PrimitiveTopology,
    morph_targets: Vec<MorphTarget>,
    layout: MeshVertexLayout,
    bounds: BoundingSphere,
}

impl MeshData {
    pub fn new(name: impl Into<String>, topology: PrimitiveTopology) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            indices: None,
            topology,
            morph_targets: Vec::new(),
            layout: MeshVertexLayout::from_elements(Vec::new()),
            bounds: BoundingSphere::new(Vec3::ZERO, 0.0),
        }
    }

    pub fn with_attribute(mut self, semantic: VertexAttributeSemantic, accessor: VertexAccessor) -> Self {
        self.attributes.insert(semantic, accessor);
        self.refresh();
        self
    }

    pub fn with_positions(self, positions: &[Vec3]) -> Self {
        self.with_attribute(
            VertexAttributeSemantic::primary(VertexAttribute::Position),
            VertexAccessor::vec3(positions),
        )
    }

    pub fn with_indices(mut self, indices: IndexData) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn with_morph_targets(mut self, targets: Vec<MorphTarget>) -> Self {
        self.morph_targets = targets;
        self.refresh();
        self
    }

    fn refresh(&mut self) {
        let elements = self
            .attributes
            .iter()
            .map(|(semantic, accessor)| accessor.element(*semantic))
            .collect();

        let mut morph_layout = Vec::new();
        if let Some(first) = self.morph_targets.first() {
            for attribute in [
                VertexAttribute::Position,
                VertexAttribute::Normal,
                VertexAttribute::Tangent,
            ] {
                if first.get(attribute).is_some() {
                    morph_layout.push(VertexAttributeSemantic::primary(attribute));
                }
            }
        }

        let morph_count = self.morph_targets.len().min(u8::MAX as usize) as u8;
        self.layout = MeshVertexLayout::new(elements, morph_layout, morph_count);
        self.bounds = self
            .positions()
            .map(|positions| BoundingSphere::from_points(&positions))
            .unwrap_or(BoundingSphere::new(Vec3::ZERO, 0.0));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn layout(&self) -> &MeshVertexLayout {
        &self.layout
    }

    /// Local-space bounds of the base positions.
    pub fn bounds(&self) -> BoundingSphere {
        self.bounds
    }

    pub fn attribute(&self, semantic: VertexAttributeSemantic) -> Option<&VertexAccessor> {
        self.attributes.get(&semantic)
    }

    pub fn indices(&self) -> Option<&IndexData> {
        self.indices.as_ref()
    }

    pub fn morph_targets(&self) -> &[MorphTarget] {
        &self.morph_targets
    }

    pub fn vertex_count(&self) -> usize {
        self.attribute(VertexAttributeSemantic::primary(VertexAttribute::Position))
            .map(|accessor| accessor.count)
            .unwrap_or(0)
    }

    pub fn positions(&self) -> Option<Vec<Vec3>> {
        self.attribute(VertexAttributeSemantic::primary(VertexAttribute::Position))
            .and_then(VertexAccessor::vec3s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_tracks_attributes_and_morph_targets() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let mesh = MeshData::new("tri", PrimitiveTopology::TriangleList)
            .with_positions(&positions)
            .with_morph_targets(vec![
                MorphTarget {
                    positions: Some(positions.to_vec()),
                    ..Default::default()
                };
                2
            ]);

        let layout = mesh.layout();
        assert_eq!(layout.morph_target_count(), 2);
        assert_eq!(
            layout.morph_target_layout(),
            &[VertexAttributeSemantic::primary(VertexAttribute::Position)]
        );
        assert!(layout.contains(VertexAttributeSemantic::primary(VertexAttribute::Position)));
        assert_eq!(mesh.vertex_count(), 3);
    }

    #[test]
    fn bounds_follow_positions() {
        let mesh = MeshData::new("line", PrimitiveTopology::LineList)
            .with_positions(&[Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)]);
        assert!((mesh.bounds().radius - 2.0).abs() < 1e-6);
    }

    #[test]
    fn non_float_accessors_do_not_decode_as_floats() {
        let joints = VertexAccessor::joints_u16(&[[0, 1, 2, 3]]);
        assert_eq!(joints.count, 1);
        assert_eq!(joints.stride(), 8);
        assert!(joints.floats().is_none());
    }
}
