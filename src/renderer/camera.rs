use glam::{Mat4, Vec3};

/// Per-pass camera state handed to every draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraData {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
    pub enable_pixel_shader: bool,
}

impl Default for CameraData {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl CameraData {
    /// Used by screen-space passes that emit clip-space positions directly.
    pub const IDENTITY: Self = Self {
        view: Mat4::IDENTITY,
        projection: Mat4::IDENTITY,
        position: Vec3::ZERO,
        enable_pixel_shader: true,
    };

    pub fn new(view: Mat4, projection: Mat4) -> Self {
        let position = view.inverse().w_axis.truncate();
        Self {
            view,
            projection,
            position,
            enable_pixel_shader: true,
        }
    }

    pub fn look_at(eye: Vec3, forward: Vec3, up: Vec3, projection: Mat4) -> Self {
        Self {
            view: Mat4::look_to_rh(eye, forward, up),
            projection,
            position: eye,
            enable_pixel_shader: true,
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_recovered_from_the_view_matrix() {
        let view = Mat4::look_at_rh(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO, Vec3::Y);
        let camera = CameraData::new(view, Mat4::IDENTITY);
        assert!(camera.position.abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-5));
    }

    #[test]
    fn identity_camera_leaves_positions_untouched() {
        let point = Vec3::new(-1.0, 1.0, 0.5);
        assert!(CameraData::IDENTITY
            .view_proj()
            .transform_point3(point)
            .abs_diff_eq(point, 1e-6));
    }
}
