//! Ray segments and the per-pixel ray output arrays.

use crate::math::Vec3;
use crate::params::OutputInfo;

/// A line segment in voxel space, from the eye side to the depth buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Near endpoint.
    pub start: Vec3,
    /// Far endpoint.
    pub end: Vec3,
}

impl Segment {
    /// Create a segment.
    pub fn new(start: Vec3, end: Vec3) -> Self {
        Self { start, end }
    }

    /// `end - start`.
    #[inline]
    pub fn direction(&self) -> Vec3 {
        self.end - self.start
    }

    /// Collapse to a zero-length segment at `end`.
    #[inline]
    pub fn collapse(&mut self) {
        self.start = self.end;
    }

    /// Whether both endpoints coincide.
    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }
}

/// A formed ray: where sampling starts, the per-step increment and how
/// many steps to take.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Ray {
    /// First sample position in voxels.
    pub start: Vec3,
    /// Offset between consecutive samples.
    pub increment: Vec3,
    /// Number of samples; fractional values are kept as computed.
    pub steps: f32,
}

impl Ray {
    /// A ray that samples nothing.
    pub fn is_empty(&self) -> bool {
        self.steps <= 0.0
    }

    /// Position after `steps` increments.
    pub fn end(&self) -> Vec3 {
        self.start + self.increment * self.steps
    }
}

/// Per-pixel ray outputs in structure-of-arrays layout.
///
/// Pixel `(x, y)` is stored at `x + y * width` in each of the seven arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct RayBuffers {
    output: OutputInfo,
    /// Start x per pixel.
    pub start_x: Vec<f32>,
    /// Start y per pixel.
    pub start_y: Vec<f32>,
    /// Start z per pixel.
    pub start_z: Vec<f32>,
    /// Increment x per pixel.
    pub inc_x: Vec<f32>,
    /// Increment y per pixel.
    pub inc_y: Vec<f32>,
    /// Increment z per pixel.
    pub inc_z: Vec<f32>,
    /// Step count per pixel.
    pub steps: Vec<f32>,
}

impl RayBuffers {
    /// Zeroed buffers sized for `output`.
    pub fn new(output: &OutputInfo) -> Self {
        let n = output.pixel_count();
        Self {
            output: *output,
            start_x: vec![0.0; n],
            start_y: vec![0.0; n],
            start_z: vec![0.0; n],
            inc_x: vec![0.0; n],
            inc_y: vec![0.0; n],
            inc_z: vec![0.0; n],
            steps: vec![0.0; n],
        }
    }

    /// Assemble from seven per-pixel columns in the order start xyz,
    /// increment xyz, steps. Returns `None` if any column has the wrong
    /// length.
    pub fn from_columns(output: &OutputInfo, columns: [Vec<f32>; 7]) -> Option<Self> {
        let n = output.pixel_count();
        if columns.iter().any(|c| c.len() != n) {
            return None;
        }
        let [start_x, start_y, start_z, inc_x, inc_y, inc_z, steps] = columns;
        Some(Self {
            output: *output,
            start_x,
            start_y,
            start_z,
            inc_x,
            inc_y,
            inc_z,
            steps,
        })
    }

    /// Image width.
    pub fn width(&self) -> u32 {
        self.output.width
    }

    /// Image height.
    pub fn height(&self) -> u32 {
        self.output.height
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the image has no pixels.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Store `ray` at linear pixel `index`.
    pub fn write(&mut self, index: usize, ray: &Ray) {
        self.start_x[index] = ray.start.x;
        self.start_y[index] = ray.start.y;
        self.start_z[index] = ray.start.z;
        self.inc_x[index] = ray.increment.x;
        self.inc_y[index] = ray.increment.y;
        self.inc_z[index] = ray.increment.z;
        self.steps[index] = ray.steps;
    }

    /// Ray at linear pixel `index`.
    pub fn ray(&self, index: usize) -> Ray {
        Ray {
            start: Vec3::new(self.start_x[index], self.start_y[index], self.start_z[index]),
            increment: Vec3::new(self.inc_x[index], self.inc_y[index], self.inc_z[index]),
            steps: self.steps[index],
        }
    }

    /// Ray at pixel `(x, y)`.
    pub fn ray_at(&self, x: u32, y: u32) -> Ray {
        self.ray(self.output.index(x, y))
    }

    /// Iterate rays in pixel order.
    pub fn rays(&self) -> impl Iterator<Item = Ray> + '_ {
        (0..self.len()).map(|i| self.ray(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_collapse() {
        let mut seg = Segment::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(seg.direction(), Vec3::new(1.0, 2.0, 3.0));
        assert!(!seg.is_degenerate());
        seg.collapse();
        assert_eq!(seg.start, Vec3::new(1.0, 2.0, 3.0));
        assert!(seg.is_degenerate());
    }

    #[test]
    fn test_ray_end() {
        let ray = Ray {
            start: Vec3::new(1.0, 1.0, 1.0),
            increment: Vec3::new(0.5, 0.0, 0.0),
            steps: 4.0,
        };
        assert_eq!(ray.end(), Vec3::new(3.0, 1.0, 1.0));
        assert!(!ray.is_empty());
        assert!(Ray::default().is_empty());
    }

    #[test]
    fn test_pixel_layout() {
        let output = OutputInfo::new(3, 2);
        let mut buffers = RayBuffers::new(&output);
        assert_eq!(buffers.len(), 6);

        let ray = Ray {
            start: Vec3::new(1.0, 2.0, 3.0),
            increment: Vec3::new(0.1, 0.2, 0.3),
            steps: 7.0,
        };
        buffers.write(output.index(2, 1), &ray);
        assert_eq!(buffers.start_x[5], 1.0);
        assert_eq!(buffers.steps[5], 7.0);
        assert_eq!(buffers.ray_at(2, 1), ray);
        assert!(buffers.ray_at(0, 0).is_empty());
    }

    #[test]
    fn test_from_columns_checks_lengths() {
        let output = OutputInfo::new(2, 1);
        let good: [Vec<f32>; 7] = std::array::from_fn(|i| vec![i as f32; 2]);
        let buffers = RayBuffers::from_columns(&output, good).unwrap();
        assert_eq!(buffers.ray(1).steps, 6.0);
        assert_eq!(buffers.ray(0).increment, Vec3::new(3.0, 4.0, 5.0));

        let bad: [Vec<f32>; 7] = std::array::from_fn(|i| vec![0.0; if i == 3 { 1 } else { 2 }]);
        assert!(RayBuffers::from_columns(&output, bad).is_none());
    }
}
