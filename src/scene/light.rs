//! Light sources and their GPU representation

use bevy_ecs::prelude::*;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::scene::Transform;

/// Maximum number of lights uploaded per frame
pub const LIGHT_RENDER_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightType {
    Point = 0,
    Spot = 1,
    Directional = 2,
}

impl LightType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(LightType::Point),
            1 => Some(LightType::Spot),
            2 => Some(LightType::Directional),
            _ => None,
        }
    }
}

/// Light flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightFlags(u32);

impl LightFlags {
    pub const NONE: Self = Self(0);
    pub const ENABLED: Self = Self(1 << 0);
    pub const SHADOW_MAP: Self = Self(1 << 1);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

impl std::ops::BitOr for LightFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Per-light record as read by the lighting shaders (112 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightData {
    pub position_ws: Vec4,
    pub direction_ws: Vec4,
    pub position_vs: Vec4,
    pub direction_vs: Vec4,
    pub colour: Vec4,

    pub light_type: u32,
    pub flags: u32,
    pub range: f32,
    pub intensity: f32,

    /// Cosine of the spotlight cone half-angle
    pub spot_angle_cos: f32,
    /// Constant, linear, quadratic
    pub attenuation: [f32; 3],
}

impl Default for LightData {
    fn default() -> Self {
        Self {
            position_ws: Vec4::new(0.0, 0.0, 0.0, 1.0),
            direction_ws: Vec4::new(0.0, 0.0, -1.0, 0.0),
            position_vs: Vec4::new(0.0, 0.0, 0.0, 1.0),
            direction_vs: Vec4::new(0.0, 0.0, 1.0, 0.0),
            colour: Vec4::ONE,
            light_type: LightType::Point as u32,
            flags: LightFlags::ENABLED.bits(),
            range: 100.0,
            intensity: 1.0,
            spot_angle_cos: std::f32::consts::FRAC_PI_4.cos(),
            attenuation: [1.0, 0.0, 0.0],
        }
    }
}

impl LightData {
    pub fn light_type(&self) -> Option<LightType> {
        LightType::from_raw(self.light_type)
    }

    pub fn flags(&self) -> LightFlags {
        LightFlags::from_bits(self.flags)
    }

    pub fn is_enabled(&self) -> bool {
        self.flags().contains(LightFlags::ENABLED)
    }

    pub fn casts_shadows(&self) -> bool {
        self.flags().contains(LightFlags::SHADOW_MAP)
    }

    /// Recompute the view-space fields from the world-space ones
    pub fn update_view_space(&mut self, view: Mat4) {
        self.position_vs = view * self.position_ws.truncate().extend(1.0);
        let direction = view.transform_vector3(self.direction_ws.truncate());
        self.direction_vs = direction.normalize_or_zero().extend(0.0);
    }

    /// World transform of the light volume: unit sphere scaled to range, or unit
    /// cone (apex at origin, base at -Z) stretched along the light direction
    pub fn volume_transform(&self) -> Mat4 {
        let position = self.position_ws.truncate();
        match self.light_type() {
            Some(LightType::Spot) => {
                let half_angle = self.spot_angle_cos.clamp(-1.0, 1.0).acos();
                let base_radius = self.range * half_angle.tan().max(0.0);
                let direction = self.direction_ws.truncate().normalize_or_zero();
                let rotation = if direction == Vec3::ZERO {
                    glam::Quat::IDENTITY
                } else {
                    glam::Quat::from_rotation_arc(-Vec3::Z, direction)
                };
                Mat4::from_scale_rotation_translation(
                    Vec3::new(base_radius, base_radius, self.range),
                    rotation,
                    position,
                )
            }
            _ => Mat4::from_scale_rotation_translation(
                Vec3::splat(self.range),
                glam::Quat::IDENTITY,
                position,
            ),
        }
    }
}

/// Light source component read once per frame.
///
/// When the entity also has a [`Transform`], position and direction come from
/// it; otherwise the component's own fields are used.
#[derive(Component, Debug, Clone)]
pub struct LightSource {
    pub light_type: LightType,
    pub position: Vec3,
    pub direction: Vec3,
    pub colour: Vec3,
    pub intensity: f32,
    pub range: f32,
    /// Cone half-angle in radians
    pub spot_half_angle: f32,
    pub enabled: bool,
    pub casts_shadows: bool,
}

impl Default for LightSource {
    fn default() -> Self {
        Self {
            light_type: LightType::Point,
            position: Vec3::ZERO,
            direction: -Vec3::Z,
            colour: Vec3::ONE,
            intensity: 1.0,
            range: 100.0,
            spot_half_angle: std::f32::consts::FRAC_PI_4,
            enabled: true,
            casts_shadows: false,
        }
    }
}

impl LightSource {
    pub fn point(position: Vec3, colour: Vec3, range: f32) -> Self {
        Self {
            light_type: LightType::Point,
            position,
            colour,
            range,
            ..Default::default()
        }
    }

    pub fn spot(position: Vec3, direction: Vec3, colour: Vec3, range: f32, half_angle: f32) -> Self {
        Self {
            light_type: LightType::Spot,
            position,
            direction: direction.normalize_or_zero(),
            colour,
            range,
            spot_half_angle: half_angle,
            ..Default::default()
        }
    }

    pub fn directional(direction: Vec3, colour: Vec3) -> Self {
        Self {
            light_type: LightType::Directional,
            direction: direction.normalize_or_zero(),
            colour,
            ..Default::default()
        }
    }

    pub fn to_light_data(&self, transform: Option<&Transform>, view: Mat4) -> LightData {
        let (position, direction) = match transform {
            Some(t) => (t.position, t.forward()),
            None => (self.position, self.direction),
        };

        let mut flags = LightFlags::NONE;
        if self.enabled {
            flags = flags | LightFlags::ENABLED;
        }
        if self.casts_shadows {
            flags = flags | LightFlags::SHADOW_MAP;
        }

        let mut data = LightData {
            position_ws: position.extend(1.0),
            direction_ws: direction.normalize_or_zero().extend(0.0),
            colour: self.colour.extend(1.0),
            light_type: self.light_type as u32,
            flags: flags.bits(),
            range: self.range,
            intensity: self.intensity,
            spot_angle_cos: self.spot_half_angle.cos(),
            ..Default::default()
        };
        data.update_view_space(view);
        data
    }
}

/// Collect every light source in the world into GPU records, capped at `limit`
pub fn extract_lights(world: &mut World, view: Mat4, limit: usize) -> Vec<LightData> {
    let mut query = world.query::<(&LightSource, Option<&Transform>)>();
    let mut lights = Vec::new();
    let mut skipped = 0usize;

    for (source, transform) in query.iter(world) {
        if lights.len() >= limit {
            skipped += 1;
            continue;
        }
        lights.push(source.to_light_data(transform, view));
    }

    if skipped > 0 {
        log::warn!(
            "Light render limit of {} reached, {} lights not rendered",
            limit,
            skipped
        );
    }
    lights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_data_is_gpu_sized() {
        assert_eq!(std::mem::size_of::<LightData>(), 112);
        let data = LightData::default();
        assert!(data.is_enabled());
        assert_eq!(data.light_type(), Some(LightType::Point));
    }

    #[test]
    fn extraction_derives_view_space() {
        let mut world = World::new();
        world.spawn(LightSource::point(Vec3::new(0.0, 0.0, -5.0), Vec3::ONE, 10.0));

        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -10.0));
        let lights = extract_lights(&mut world, view, LIGHT_RENDER_LIMIT);

        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0].position_ws, Vec4::new(0.0, 0.0, -5.0, 1.0));
        assert_eq!(lights[0].position_vs, Vec4::new(0.0, 0.0, -15.0, 1.0));
    }

    #[test]
    fn transform_overrides_component_position() {
        let mut world = World::new();
        world.spawn((
            LightSource::point(Vec3::ZERO, Vec3::ONE, 10.0),
            Transform::from_position(Vec3::new(3.0, 2.0, 1.0)),
        ));
        let lights = extract_lights(&mut world, Mat4::IDENTITY, LIGHT_RENDER_LIMIT);
        assert_eq!(lights[0].position_ws.truncate(), Vec3::new(3.0, 2.0, 1.0));
    }

    #[test]
    fn extraction_respects_limit_and_flags() {
        let mut world = World::new();
        for i in 0..5 {
            let mut light = LightSource::spot(Vec3::X * i as f32, -Vec3::Y, Vec3::ONE, 20.0, 0.5);
            light.enabled = i % 2 == 0;
            light.casts_shadows = i == 0;
            world.spawn(light);
        }

        let lights = extract_lights(&mut world, Mat4::IDENTITY, 3);
        assert_eq!(lights.len(), 3);
        assert!(lights.iter().all(|l| l.light_type() == Some(LightType::Spot)));
        assert!(lights[0].casts_shadows());
        assert!(!lights[1].is_enabled());
    }

    #[test]
    fn spot_volume_reaches_range_along_direction() {
        let light = LightSource::spot(Vec3::ZERO, Vec3::X, Vec3::ONE, 10.0, 0.3)
            .to_light_data(None, Mat4::IDENTITY);
        let tip = light.volume_transform().transform_point3(Vec3::new(0.0, 0.0, -1.0));
        assert!((tip - Vec3::new(10.0, 0.0, 0.0)).length() < 1e-4);
    }
}
