use glam::{Mat4, Quat, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Smallest sphere around the origin-centered AABB of `points`.
    pub fn from_points(points: &[Vec3]) -> Self {
        let Some(aabb) = Aabb::from_points(points) else {
            return Self::new(Vec3::ZERO, 0.0);
        };
        let center = aabb.center();
        let radius = points
            .iter()
            .map(|point| point.distance(center))
            .fold(0.0f32, f32::max);
        Self::new(center, radius)
    }

    /// Radius must be positive and every component finite.
    pub fn is_valid(&self) -> bool {
        self.center.is_finite() && self.radius.is_finite() && self.radius > 0.0
    }

    /// Transforms the sphere, scaling the radius by the largest axis scale.
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let center = matrix.transform_point3(self.center);
        let max_scale = matrix
            .x_axis
            .truncate()
            .length()
            .max(matrix.y_axis.truncate().length())
            .max(matrix.z_axis.truncate().length());
        Self::new(center, self.radius * max_scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut aabb = Self::new(*first, *first);
        for point in rest {
            aabb.extend_point(*point);
        }
        Some(aabb)
    }

    pub fn from_sphere(sphere: &BoundingSphere) -> Self {
        let radius = Vec3::splat(sphere.radius);
        Self::new(sphere.center - radius, sphere.center + radius)
    }

    pub fn extend_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn extend(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half size along each axis.
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// True when the sphere is inside or touches the box.
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        let closest = sphere.center.clamp(self.min, self.max);
        closest.distance_squared(sphere.center) <= sphere.radius * sphere.radius
    }

    /// Bounds of `spheres` in the frame rotated by `rotation`; that is, each
    /// center is brought into that space by the inverse rotation.
    pub fn from_spheres_in_space<'a>(
        spheres: impl IntoIterator<Item = &'a BoundingSphere>,
        rotation: Quat,
    ) -> Option<Self> {
        let to_space = rotation.inverse();
        let mut result: Option<Aabb> = None;
        for sphere in spheres {
            let local = BoundingSphere::new(to_space * sphere.center, sphere.radius);
            let aabb = Aabb::from_sphere(&local);
            match result.as_mut() {
                Some(existing) => existing.extend(&aabb),
                None => result = Some(aabb),
            }
        }
        result
    }
}
