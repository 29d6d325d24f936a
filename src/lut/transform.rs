use super::cube::ColorCube;
use crate::frame::FrameData;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("pixel format {0:?} cannot be color transformed")]
    UnsupportedFormat(crate::frame::PixelFormat),

    #[error("buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
}

/// Per-frame renderer for one cube.
///
/// 8-bit channel values are mapped through the cube's input domain to grid
/// coordinates once, when the transform is built, so per-pixel work is the
/// 8-point blend only.
pub struct LutTransform {
    cube: Arc<ColorCube>,
    axes: [Vec<(usize, f32)>; 3],
}

impl LutTransform {
    pub fn new(cube: Arc<ColorCube>) -> Self {
        let axes = [0, 1, 2].map(|channel| {
            (0..=255u32)
                .map(|value| {
                    let normalized = cube.normalize_channel(channel, value as f32 / 255.0);
                    cube.axis_position(normalized)
                })
                .collect()
        });
        Self { cube, axes }
    }

    pub fn cube(&self) -> &Arc<ColorCube> {
        &self.cube
    }

    /// Whether this transform was built for `cube`
    pub fn is_for(&self, cube: &Arc<ColorCube>) -> bool {
        Arc::ptr_eq(&self.cube, cube)
    }

    /// Map one 8-bit RGB value through the cube
    pub fn map_rgb8(&self, r: u8, g: u8, b: u8) -> [u8; 3] {
        let (r0, fr) = self.axes[0][r as usize];
        let (g0, fg) = self.axes[1][g as usize];
        let (b0, fb) = self.axes[2][b as usize];
        let out = self.cube.blend(r0, g0, b0, fr, fg, fb);
        [to_u8(out[0]), to_u8(out[1]), to_u8(out[2])]
    }

    /// Render a transformed copy of `frame` with identical geometry, pixel
    /// format and timing.
    pub fn render(&self, frame: &FrameData) -> Result<FrameData, RenderError> {
        let layout = frame
            .format
            .rgb_layout()
            .ok_or(RenderError::UnsupportedFormat(frame.format))?;

        let expected = frame.format.frame_size(frame.width, frame.height);
        if frame.data.len() != expected {
            return Err(RenderError::BufferSize {
                expected,
                actual: frame.data.len(),
            });
        }

        let mut output = frame.data.as_ref().clone();
        for pixel in output.chunks_exact_mut(layout.stride) {
            let mapped = self.map_rgb8(pixel[layout.r], pixel[layout.g], pixel[layout.b]);
            pixel[layout.r] = mapped[0];
            pixel[layout.g] = mapped[1];
            pixel[layout.b] = mapped[2];
        }

        Ok(frame.with_data(output))
    }
}

fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}
