//! World placement of light-emitting entities

use bevy_ecs::prelude::*;
use glam::{Mat4, Quat, Vec3};

/// Placement of an entity in world space. Lights have no use for scale.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Orient so that [`Transform::forward`] points along `direction`
    pub fn facing(mut self, direction: Vec3) -> Self {
        let direction = direction.normalize_or_zero();
        if direction != Vec3::ZERO {
            self.orientation = Quat::from_rotation_arc(-Vec3::Z, direction);
        }
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position)
    }

    /// Local -Z in world space
    pub fn forward(&self) -> Vec3 {
        self.orientation * -Vec3::Z
    }
}
