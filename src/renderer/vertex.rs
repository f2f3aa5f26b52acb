use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexAttribute {
    Position,
    Color,
    Normal,
    Tangent,
    BiTangent,
    TexCoord,
    Joints,
    Weights,
}

impl VertexAttribute {
    pub fn semantic_name(&self) -> &'static str {
        match self {
            VertexAttribute::Position => "POSITION",
            VertexAttribute::Color => "COLOR",
            VertexAttribute::Normal => "NORMAL",
            VertexAttribute::Tangent => "TANGENT",
            VertexAttribute::BiTangent => "BINORMAL",
            VertexAttribute::TexCoord => "TEXCOORD",
            VertexAttribute::Joints => "BLENDINDICES",
            VertexAttribute::Weights => "BLENDWEIGHT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexAttributeSemantic {
    pub attribute: VertexAttribute,
    pub semantic_index: u8,
}

impl VertexAttributeSemantic {
    pub const fn new(attribute: VertexAttribute, semantic_index: u8) -> Self {
        Self {
            attribute,
            semantic_index,
        }
    }

    pub const fn primary(attribute: VertexAttribute) -> Self {
        Self::new(attribute, 0)
    }
}

impl fmt::Display for VertexAttributeSemantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.attribute.semantic_name(), self.semantic_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Scalar,
    Vector2,
    Vector3,
    Vector4,
}

impl ElementType {
    pub fn component_count(&self) -> u32 {
        match self {
            ElementType::Scalar => 1,
            ElementType::Vector2 => 2,
            ElementType::Vector3 => 3,
            ElementType::Vector4 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementComponent {
    SignedByte,
    UnsignedByte,
    SignedShort,
    UnsignedShort,
    SignedInt,
    UnsignedInt,
    Float,
}

impl ElementComponent {
    pub fn size(&self) -> u32 {
        match self {
            ElementComponent::SignedByte | ElementComponent::UnsignedByte => 1,
            ElementComponent::SignedShort | ElementComponent::UnsignedShort => 2,
            ElementComponent::SignedInt
            | ElementComponent::UnsignedInt
            | ElementComponent::Float => 4,
        }
    }
}

/// One entry of a vertex input layout: which semantic, and how it is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeElement {
    pub semantic: VertexAttributeSemantic,
    pub ty: ElementType,
    pub component: ElementComponent,
}

impl VertexAttributeElement {
    pub const fn new(
        semantic: VertexAttributeSemantic,
        ty: ElementType,
        component: ElementComponent,
    ) -> Self {
        Self {
            semantic,
            ty,
            component,
        }
    }

    pub const fn float(attribute: VertexAttribute, semantic_index: u8, ty: ElementType) -> Self {
        Self::new(
            VertexAttributeSemantic::new(attribute, semantic_index),
            ty,
            ElementComponent::Float,
        )
    }

    pub fn byte_size(&self) -> u32 {
        self.ty.component_count() * self.component.size()
    }
}

/// Vertex layout of a mesh, as seen by the material variant cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshVertexLayout {
    vertex_layout: Vec<VertexAttributeElement>,
    morph_target_layout: Vec<VertexAttributeSemantic>,
    morph_target_count: u8,
    properties_hash: u64,
}

impl MeshVertexLayout {
    pub fn new(
        vertex_layout: Vec<VertexAttributeElement>,
        morph_target_layout: Vec<VertexAttributeSemantic>,
        morph_target_count: u8,
    ) -> Self {
        let properties_hash =
            Self::compute_hash(&vertex_layout, &morph_target_layout, morph_target_count);
        Self {
            vertex_layout,
            morph_target_layout,
            morph_target_count,
            properties_hash,
        }
    }

    pub fn from_elements(vertex_layout: Vec<VertexAttributeElement>) -> Self {
        Self::new(vertex_layout, Vec::new(), 0)
    }

    pub fn vertex_layout(&self) -> &[VertexAttributeElement] {
        &self.vertex_layout
    }

    pub fn morph_target_layout(&self) -> &[VertexAttributeSemantic] {
        &self.morph_target_layout
    }

    pub fn morph_target_count(&self) -> u8 {
        self.morph_target_count
    }

    pub fn properties_hash(&self) -> u64 {
        self.properties_hash
    }

    pub fn contains(&self, semantic: VertexAttributeSemantic) -> bool {
        self.vertex_layout
            .iter()
            .any(|element| element.semantic == semantic)
    }

    pub fn element(&self, semantic: VertexAttributeSemantic) -> Option<&VertexAttributeElement> {
        self.vertex_layout
            .iter()
            .find(|element| element.semantic == semantic)
    }

    fn compute_hash(
        vertex_layout: &[VertexAttributeElement],
        morph_target_layout: &[VertexAttributeSemantic],
        morph_target_count: u8,
    ) -> u64 {
        let mut hasher = DefaultHasher::new();
        morph_target_count.hash(&mut hasher);
        for element in vertex_layout {
            element.semantic.attribute.hash(&mut hasher);
            element.semantic.semantic_index.hash(&mut hasher);
            element.ty.hash(&mut hasher);
            element.component.hash(&mut hasher);
        }
        for semantic in morph_target_layout {
            semantic.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_normal() -> Vec<VertexAttributeElement> {
        vec![
            VertexAttributeElement::float(VertexAttribute::Position, 0, ElementType::Vector3),
            VertexAttributeElement::float(VertexAttribute::Normal, 0, ElementType::Vector3),
        ]
    }

    #[test]
    fn layout_hash_matches_for_equal_layouts() {
        let a = MeshVertexLayout::from_elements(position_normal());
        let b = MeshVertexLayout::from_elements(position_normal());
        assert_eq!(a.properties_hash(), b.properties_hash());
    }

    #[test]
    fn layout_hash_changes_with_morph_targets_and_components() {
        let base = MeshVertexLayout::from_elements(position_normal());
        let morphed = MeshVertexLayout::new(
            position_normal(),
            vec![VertexAttributeSemantic::primary(VertexAttribute::Position)],
            2,
        );
        assert_ne!(base.properties_hash(), morphed.properties_hash());

        let mut elements = position_normal();
        elements.push(VertexAttributeElement::new(
            VertexAttributeSemantic::primary(VertexAttribute::Joints),
            ElementType::Vector4,
            ElementComponent::UnsignedShort,
        ));
        let skinned_u16 = MeshVertexLayout::from_elements(elements.clone());
        elements[2].component = ElementComponent::UnsignedInt;
        let skinned_u32 = MeshVertexLayout::from_elements(elements);
        assert_ne!(skinned_u16.properties_hash(), skinned_u32.properties_hash());
    }

    #[test]
    fn element_sizes() {
        let tangent = VertexAttributeElement::float(VertexAttribute::Tangent, 0, ElementType::Vector4);
        assert_eq!(tangent.byte_size(), 16);
        let joints = VertexAttributeElement::new(
            VertexAttributeSemantic::primary(VertexAttribute::Joints),
            ElementType::Vector4,
            ElementComponent::UnsignedShort,
        );
        assert_eq!(joints.byte_size(), 8);
        assert_eq!(joints.semantic.to_string(), "BLENDINDICES0");
    }
}
