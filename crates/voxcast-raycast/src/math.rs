//! Single-precision math types for voxel-space geometry.
//!
//! Thin aliases over nalgebra. Matrices are indexed `(row, column)`; a
//! point is transformed as the column vector `(x, y, z, 1)`.

use nalgebra::{Matrix4, Vector3};

/// A point or vector in voxel space.
pub type Vec3 = Vector3<f32>;

/// A 4x4 homogeneous transform.
pub type Mat4 = Matrix4<f32>;

/// Transform `(x, y, z, 1)` by `m` and divide by the resulting w.
///
/// Each row is evaluated left to right so the result matches the compute
/// shader operation for operation.
#[inline]
pub fn transform_point(m: &Mat4, x: f32, y: f32, z: f32) -> Vec3 {
    let row = |i: usize| m[(i, 0)] * x + m[(i, 1)] * y + m[(i, 2)] * z + m[(i, 3)];
    let w = row(3);
    Vec3::new(row(0) / w, row(1) / w, row(2) / w)
}

/// Build a matrix from 16 values in row-major order.
pub fn from_row_major(values: &[f32; 16]) -> Mat4 {
    Mat4::from_row_slice(values)
}

/// Rows of `m`, each as `[m(i,0), m(i,1), m(i,2), m(i,3)]`.
pub fn rows(m: &Mat4) -> [[f32; 4]; 4] {
    std::array::from_fn(|i| [m[(i, 0)], m[(i, 1)], m[(i, 2)], m[(i, 3)]])
}
