//! Sub-pixel projection jitter for temporal anti-aliasing

use glam::Vec2;

/// Length of the jitter cycle
pub const JITTER_SAMPLE_COUNT: usize = 16;

/// Element `index` of the radical-inverse sequence in `base`
pub fn halton(mut index: u32, base: u32) -> f32 {
    let mut fraction = 1.0;
    let mut result = 0.0;
    while index > 0 {
        fraction /= base as f32;
        result += fraction * (index % base) as f32;
        index /= base;
    }
    result
}

/// Halton(2,3) pixel offsets in [-0.5, 0.5)
pub fn halton_2_3_distribution() -> [Vec2; JITTER_SAMPLE_COUNT] {
    std::array::from_fn(|i| {
        let index = i as u32 + 1;
        Vec2::new(halton(index, 2) - 0.5, halton(index, 3) - 0.5)
    })
}

/// Cycles through the jitter distribution, one sample per frame
#[derive(Debug, Clone)]
pub struct FrustumJitter {
    enabled: bool,
    scale: f32,
    distribution: [Vec2; JITTER_SAMPLE_COUNT],
    frame: usize,
    current: Vec2,
    previous: Vec2,
}

impl Default for FrustumJitter {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl FrustumJitter {
    pub fn new(scale: f32) -> Self {
        Self {
            enabled: true,
            scale,
            distribution: halton_2_3_distribution(),
            frame: 0,
            current: Vec2::ZERO,
            previous: Vec2::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled != self.enabled {
            self.enabled = enabled;
            self.reset();
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    /// Advance to the next sample. The result is a clip-space offset, so one
    /// pixel spans `2 / screen size`.
    pub fn update(&mut self, width: u32, height: u32) -> Vec2 {
        self.previous = self.current;
        if !self.enabled {
            self.current = Vec2::ZERO;
            return self.current;
        }

        let offset = self.distribution[self.frame % JITTER_SAMPLE_COUNT];
        let screen = Vec2::new(width.max(1) as f32, height.max(1) as f32);
        self.current = offset * 2.0 * self.scale / screen;
        self.frame = (self.frame + 1) % JITTER_SAMPLE_COUNT;
        self.current
    }

    pub fn current(&self) -> Vec2 {
        self.current
    }

    pub fn previous(&self) -> Vec2 {
        self.previous
    }

    pub fn reset(&mut self) {
        self.frame = 0;
        self.current = Vec2::ZERO;
        self.previous = Vec2::ZERO;
    }
}
