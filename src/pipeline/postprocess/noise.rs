//! Screen-space noise shared by effects that dither their sample positions

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::postprocess::jitter::halton;

pub const DEFAULT_NOISE_SIZE: u32 = 64;
pub const DEFAULT_NOISE_SEED: u32 = 0x9e37_79b9;
pub const DEFAULT_NOISE_STRENGTH: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NoiseMethod {
    #[default]
    White,
    Halton,
    InterleavedGradient,
}

impl NoiseMethod {
    pub const ALL: [NoiseMethod; 3] = [
        NoiseMethod::White,
        NoiseMethod::Halton,
        NoiseMethod::InterleavedGradient,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NoiseMethod::White => "white",
            NoiseMethod::Halton => "halton",
            NoiseMethod::InterleavedGradient => "ign",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }
}

/// Noise parameters read by shaders (16 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct NoiseData {
    pub dimensions: Vec2,
    pub strength: f32,
    pub method: u32,
}

struct XorShift32(u32);

impl XorShift32 {
    fn new(seed: u32) -> Self {
        // Zero is a fixed point of the generator
        Self(if seed == 0 { DEFAULT_NOISE_SEED } else { seed })
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

fn interleaved_gradient(x: f32, y: f32) -> f32 {
    (52.982_918 * (0.067_110_56 * x + 0.005_837_15 * y).fract()).fract()
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Two-channel 8-bit noise, row-major, deterministic for a given seed
pub fn generate_noise(method: NoiseMethod, seed: u32, width: u32, height: u32) -> Vec<u8> {
    let texels = (width * height) as usize;
    let mut data = Vec::with_capacity(texels * 2);

    match method {
        NoiseMethod::White => {
            let mut rng = XorShift32::new(seed);
            for _ in 0..texels {
                data.push((rng.next_u32() >> 24) as u8);
                data.push((rng.next_u32() >> 24) as u8);
            }
        }
        NoiseMethod::Halton => {
            let offset = seed % 4096;
            for i in 0..texels as u32 {
                let index = i + offset + 1;
                data.push(unorm8(halton(index, 2)));
                data.push(unorm8(halton(index, 3)));
            }
        }
        NoiseMethod::InterleavedGradient => {
            let shift = (seed % 64) as f32;
            for y in 0..height {
                for x in 0..width {
                    let (fx, fy) = (x as f32 + shift, y as f32 + shift);
                    data.push(unorm8(interleaved_gradient(fx, fy)));
                    data.push(unorm8(interleaved_gradient(fy, fx)));
                }
            }
        }
    }
    data
}

/// Owns the noise texture and its parameter buffer
pub struct NoiseGenerator {
    method: NoiseMethod,
    seed: u32,
    size: u32,
    strength: f32,
    texture: TextureHandle,
    buffer: BufferHandle,
}

impl NoiseGenerator {
    pub fn new(device: &mut dyn RenderDevice, method: NoiseMethod, seed: u32, size: u32) -> BackendResult<Self> {
        let size = size.max(1);
        let texture = device.create_texture(&TextureDescriptor {
            label: Some("noise".to_string()),
            width: size,
            height: size,
            format: TextureFormat::Rg8Unorm,
            ..Default::default()
        })?;
        let buffer = match device.create_buffer(&BufferDescriptor::uniform(
            "noise_data",
            std::mem::size_of::<NoiseData>() as u64,
        )) {
            Ok(buffer) => buffer,
            Err(e) => {
                device.destroy_texture(texture);
                return Err(e);
            }
        };

        let mut generator = Self {
            method,
            seed,
            size,
            strength: DEFAULT_NOISE_STRENGTH,
            texture,
            buffer,
        };
        if let Err(e) = generator.regenerate(device) {
            generator.release(device);
            return Err(e);
        }
        Ok(generator)
    }

    pub fn method(&self) -> NoiseMethod {
        self.method
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn data(&self) -> NoiseData {
        NoiseData {
            dimensions: Vec2::splat(self.size as f32),
            strength: self.strength,
            method: self.method as u32,
        }
    }

    pub fn set_method(&mut self, device: &mut dyn RenderDevice, method: NoiseMethod) -> BackendResult<()> {
        if method == self.method {
            return Ok(());
        }
        self.method = method;
        log::info!("Noise generation method set to '{}'", method.name());
        self.regenerate(device)
    }

    pub fn set_strength(&mut self, device: &mut dyn RenderDevice, strength: f32) -> BackendResult<()> {
        self.strength = strength.max(0.0);
        device.write_buffer(self.buffer, 0, bytemuck::bytes_of(&self.data()))
    }

    fn regenerate(&mut self, device: &mut dyn RenderDevice) -> BackendResult<()> {
        let payload = generate_noise(self.method, self.seed, self.size, self.size);
        device.write_texture(self.texture, &payload)?;
        device.write_buffer(self.buffer, 0, bytemuck::bytes_of(&self.data()))
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        device.destroy_texture(self.texture);
        device.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingDevice;

    #[test]
    fn noise_data_layout() {
        assert_eq!(std::mem::size_of::<NoiseData>(), 16);
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        for method in NoiseMethod::ALL {
            let a = generate_noise(method, 7, 16, 8);
            let b = generate_noise(method, 7, 16, 8);
            assert_eq!(a.len(), 16 * 8 * 2);
            assert_eq!(a, b, "{:?}", method);
        }
        assert_ne!(
            generate_noise(NoiseMethod::White, 1, 8, 8),
            generate_noise(NoiseMethod::White, 2, 8, 8)
        );
    }

    #[test]
    fn white_noise_covers_the_range() {
        let data = generate_noise(NoiseMethod::White, 1234, 32, 32);
        let mean = data.iter().map(|v| *v as f32).sum::<f32>() / data.len() as f32;
        assert!((mean - 127.5).abs() < 16.0, "mean {}", mean);
        assert!(data.iter().any(|v| *v < 32) && data.iter().any(|v| *v > 224));
    }

    #[test]
    fn zero_seed_still_produces_noise() {
        let data = generate_noise(NoiseMethod::White, 0, 4, 4);
        assert!(data.iter().any(|v| *v != 0));
    }

    #[test]
    fn method_names() {
        assert_eq!(NoiseMethod::from_name("IGN"), Some(NoiseMethod::InterleavedGradient));
        assert_eq!(NoiseMethod::from_name("halton"), Some(NoiseMethod::Halton));
        assert_eq!(NoiseMethod::from_name("blue"), None);
    }

    #[test]
    fn changing_method_uploads_new_payload() {
        let mut device = RecordingDevice::new();
        let mut noise = NoiseGenerator::new(&mut device, NoiseMethod::White, 42, 8).unwrap();
        let white = device.texture_contents(noise.texture()).unwrap().to_vec();
        assert_eq!(white, generate_noise(NoiseMethod::White, 42, 8, 8));

        noise.set_method(&mut device, NoiseMethod::Halton).unwrap();
        let halton = device.texture_contents(noise.texture()).unwrap().to_vec();
        assert_eq!(halton, generate_noise(NoiseMethod::Halton, 42, 8, 8));

        let contents = device.buffer_contents(noise.buffer()).unwrap();
        let data: NoiseData = bytemuck::pod_read_unaligned(&contents[..16]);
        assert_eq!(data.method, NoiseMethod::Halton as u32);
        assert_eq!(data.dimensions, Vec2::splat(8.0));
    }
}
