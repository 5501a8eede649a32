//! Viewer camera

use glam::{Mat4, Vec2, Vec3};

pub const DEFAULT_FOV_Y: f32 = std::f32::consts::FRAC_PI_4;
pub const DEFAULT_NEAR_CLIP: f32 = 1.0;
pub const DEFAULT_FAR_CLIP: f32 = 10000.0;

/// Perspective camera looking from `position` towards `target`.
///
/// The projection can carry a sub-pixel jitter offset for temporal
/// anti-aliasing. Culling always uses the unjittered projection so that
/// visibility does not shimmer with the jitter sequence.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    jitter: Vec2,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: DEFAULT_FOV_Y,
            aspect: 16.0 / 9.0,
            near: DEFAULT_NEAR_CLIP,
            far: DEFAULT_FAR_CLIP,
            jitter: Vec2::ZERO,
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    /// Jitter offset in clip-space units
    pub fn jitter(&self) -> Vec2 {
        self.jitter
    }

    pub fn set_jitter(&mut self, jitter: Vec2) {
        self.jitter = jitter;
    }

    pub fn clear_jitter(&mut self) {
        self.jitter = Vec2::ZERO;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn inverse_view_matrix(&self) -> Mat4 {
        self.view_matrix().inverse()
    }

    pub fn unjittered_projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        let projection = self.unjittered_projection_matrix();
        if self.jitter == Vec2::ZERO {
            return projection;
        }
        Mat4::from_translation(self.jitter.extend(0.0)) * projection
    }

    pub fn inverse_projection_matrix(&self) -> Mat4 {
        self.projection_matrix().inverse()
    }

    /// Match the aspect ratio to a new screen size; ignored for an empty screen
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }
}
