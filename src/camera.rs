use glam::{vec3, Mat4, Vec3};

/// The scene camera: a position and target in a left-handed
/// space, with a perspective projection kept in sync with the
/// window's aspect ratio.
#[derive(Clone, Debug)]
pub struct Camera {
    pub origin: Vec3,
    pub target: Vec3,
    fov_y_degrees: f32,
    near: f32,
    far: f32,
    aspect: f32,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            origin: vec3(0.0, 0.0, -2.0),
            target: Vec3::ZERO,
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 1000.0,
            aspect: width as f32 / height as f32,
        }
    }

    /// Recomputes the aspect ratio after a window resize.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height as f32;
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_lh(self.origin, self.target, Vec3::Y)
    }

    /// The projection matrix, with Y flipped: glam follows the
    /// OpenGL convention of Y pointing up in clip space, while
    /// Vulkan's points down.
    pub fn projection(&self) -> Mat4 {
        let mut proj = Mat4::perspective_lh(
            self.fov_y_degrees.to_radians(),
            self.aspect,
            self.near,
            self.far,
        );
        proj.y_axis.y *= -1.0;
        proj
    }

    /// The view matrix of the 2D overlay: an inverse-aspect
    /// scale on X, so that overlay coordinates keep a square
    /// unit regardless of the window shape.
    pub fn overlay_view(&self) -> Mat4 {
        Mat4::from_scale(vec3(1.0 / self.aspect, 1.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_recomputes_aspect() {
        let mut camera = Camera::new(800, 600);
        assert!((camera.aspect() - 800.0 / 600.0).abs() < 1e-6);

        camera.set_viewport(400, 300);
        assert!((camera.aspect() - 400.0 / 300.0).abs() < 1e-6);
    }

    #[test]
    fn projection_flips_y() {
        let camera = Camera::new(800, 600);
        let proj = camera.projection();

        let mut reference = Mat4::perspective_lh(
            45f32.to_radians(),
            800.0 / 600.0,
            0.1,
            1000.0,
        );
        reference.y_axis.y *= -1.0;

        assert!(proj.y_axis.y < 0.0);
        assert_eq!(proj, reference);
    }

    #[test]
    fn overlay_view_scales_by_inverse_aspect() {
        let camera = Camera::new(1600, 800);
        let view = camera.overlay_view();

        assert!((view.x_axis.x - 0.5).abs() < 1e-6);
        assert_eq!(view.y_axis.y, 1.0);
        assert_eq!(view.z_axis.z, 1.0);
    }

    #[test]
    fn view_looks_at_target() {
        let camera = Camera::new(800, 600);
        let view = camera.view();

        // The target projects onto the view-space Z axis, in
        // front of the camera.
        let target = view.transform_point3(camera.target);
        assert!(target.x.abs() < 1e-6);
        assert!(target.y.abs() < 1e-6);
        assert!(target.z > 0.0);
    }
}
