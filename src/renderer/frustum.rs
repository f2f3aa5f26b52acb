use glam::{Mat4, Vec3, Vec4};

use crate::scene::bounds::BoundingSphere;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    Outside,
    Intersects,
    Inside,
}

/// Six inward-facing planes (`xyz` normal, `w` distance) extracted from a
/// view-projection matrix with zero-to-one clip depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_view_proj(view_proj: &Mat4) -> Self {
        let row0 = view_proj.row(0);
        let row1 = view_proj.row(1);
        let row2 = view_proj.row(2);
        let row3 = view_proj.row(3);

        let planes = [
            row3 + row0, // left
            row3 - row0, // right
            row3 + row1, // bottom
            row3 - row1, // top
            row2,        // near
            row3 - row2, // far
        ]
        .map(normalize_plane);

        Self { planes }
    }

    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
    }

    pub fn contains_sphere(&self, sphere: &BoundingSphere) -> Containment {
        let mut result = Containment::Inside;
        for plane in &self.planes {
            let distance = plane.truncate().dot(sphere.center) + plane.w;
            if distance < -sphere.radius {
                return Containment::Outside;
            }
            if distance < sphere.radius {
                result = Containment::Intersects;
            }
        }
        result
    }
}

fn normalize_plane(plane: Vec4) -> Vec4 {
    let length = plane.truncate().length();
    if length > 0.0 {
        plane / length
    } else {
        plane
    }
}
