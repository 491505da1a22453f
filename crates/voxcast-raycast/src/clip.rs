//! Segment clipping against cutting planes and the volume box.
//!
//! Both stages mirror the compute shader statement for statement so the
//! CPU kernel reproduces GPU output.

use crate::math::Vec3;
use crate::params::ClippingPlane;
use crate::ray::Segment;

/// Clip `segment` against each plane in order.
///
/// A plane whose intersection parameter falls strictly inside the segment
/// moves the endpoint on its positive side onto the plane. If any plane has
/// no endpoint on its negative side and at least one on its positive side,
/// the segment collapses onto its end once all planes are applied. A segment
/// lying in a plane is kept. Returns whether the segment was excluded.
pub fn clip_to_planes(segment: &mut Segment, planes: &[ClippingPlane]) -> bool {
    let mut excluded = false;
    for plane in planes {
        let dir = segment.direction();
        let d0 = plane.signed_distance(&segment.start);
        let d1 = plane.signed_distance(&segment.end);
        let denom = plane.normal.x * dir.x + plane.normal.y * dir.y + plane.normal.z * dir.z;
        if denom != 0.0 {
            let t = -d0 / denom;
            if t > 0.0 && t < 1.0 {
                if d0 > 0.0 {
                    segment.start += dir * t;
                } else {
                    segment.end = segment.start + dir * t;
                }
            }
        }
        excluded |= d0 >= 0.0 && d1 >= 0.0 && (d0 > 0.0 || d1 > 0.0);
    }
    if excluded {
        segment.collapse();
    }
    excluded
}

/// Clip `segment` to `bounds` shrunk by one voxel on every side.
///
/// Axes are handled x, y, z with the direction recomputed before each. An
/// endpoint still outside the unshrunk bounds afterwards collapses the
/// segment. Returns whether it collapsed.
pub fn clip_to_bounds(segment: &mut Segment, bounds: &[f32; 6]) -> bool {
    for axis in 0..3 {
        let lo = bounds[2 * axis] + 1.0;
        let hi = bounds[2 * axis + 1] - 1.0;
        let dir = segment.direction();
        let d = dir[axis];
        let s = segment.start[axis];
        let e = segment.end[axis];

        let mut advance = 0.0;
        let mut retreat = 0.0;
        if d > 0.0 {
            if s < lo {
                advance = (lo - s) / d;
            }
            if e > hi {
                retreat = (e - hi) / d;
            }
        } else if d < 0.0 {
            if s > hi {
                advance = (hi - s) / d;
            }
            if e < lo {
                retreat = (e - lo) / d;
            }
        }

        if advance.is_finite() {
            segment.start += dir * advance;
        }
        if retreat.is_finite() {
            segment.end -= dir * retreat;
        }
    }

    let outside = |p: &Vec3| {
        (0..3).any(|axis| p[axis] < bounds[2 * axis] || p[axis] > bounds[2 * axis + 1])
    };
    if outside(&segment.start) || outside(&segment.end) {
        segment.collapse();
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const BOUNDS: [f32; 6] = [0.0, 10.0, 0.0, 10.0, 0.0, 10.0];

    fn along_z(z0: f32, z1: f32) -> Segment {
        Segment::new(Vec3::new(5.0, 5.0, z0), Vec3::new(5.0, 5.0, z1))
    }

    #[test]
    fn test_plane_moves_far_endpoint() {
        // Cuts away z > 5.
        let plane = ClippingPlane::new([0.0, 0.0, 1.0], -5.0);
        let mut seg = along_z(0.0, 10.0);
        assert!(!clip_to_planes(&mut seg, &[plane]));
        assert_abs_diff_eq!(seg.start.z, 0.0);
        assert_abs_diff_eq!(seg.end.z, 5.0);
    }

    #[test]
    fn test_plane_moves_near_endpoint() {
        // Cuts away z < 5.
        let plane = ClippingPlane::new([0.0, 0.0, -1.0], 5.0);
        let mut seg = along_z(0.0, 10.0);
        assert!(!clip_to_planes(&mut seg, &[plane]));
        assert_abs_diff_eq!(seg.start.z, 5.0);
        assert_abs_diff_eq!(seg.end.z, 10.0);
        // Clipped start lies on the plane.
        assert_abs_diff_eq!(plane.signed_distance(&seg.start), 0.0);
    }

    #[test]
    fn test_segment_behind_plane_collapses() {
        let plane = ClippingPlane::new([0.0, 0.0, 1.0], 1.0);
        let mut seg = along_z(0.0, 10.0);
        assert!(clip_to_planes(&mut seg, &[plane]));
        assert_eq!(seg.start, seg.end);
        assert_eq!(seg.end.z, 10.0);
    }

    #[test]
    fn test_segment_touching_plane_from_cut_side_excluded() {
        // Cuts away z > 5.
        let plane = ClippingPlane::new([0.0, 0.0, 1.0], -5.0);

        let mut seg = along_z(5.0, 10.0);
        assert!(clip_to_planes(&mut seg, &[plane]));
        assert!(seg.is_degenerate());

        let mut seg = along_z(10.0, 5.0);
        assert!(clip_to_planes(&mut seg, &[plane]));
        assert!(seg.is_degenerate());

        // Touching from the kept side leaves the segment whole.
        let mut seg = along_z(0.0, 5.0);
        assert!(!clip_to_planes(&mut seg, &[plane]));
        assert_eq!(seg, along_z(0.0, 5.0));
    }

    #[test]
    fn test_segment_in_plane_kept() {
        // The plane x = 5 contains the whole segment.
        let plane = ClippingPlane::new([1.0, 0.0, 0.0], -5.0);
        let mut seg = along_z(0.0, 10.0);
        assert!(!clip_to_planes(&mut seg, &[plane]));
        assert_eq!(seg, along_z(0.0, 10.0));
    }

    #[test]
    fn test_each_slot_moves_one_endpoint() {
        let open = ClippingPlane::new([0.0, 0.0, 1.0], -100.0);
        let far_cut = ClippingPlane::new([0.0, 0.0, 1.0], -6.0);
        let near_cut = ClippingPlane::new([0.0, 0.0, -1.0], 4.0);
        let original = along_z(2.0, 8.0);

        for slot in 0..6 {
            let mut planes = [open; 6];
            planes[slot] = far_cut;
            let mut seg = original;
            assert!(!clip_to_planes(&mut seg, &planes));
            assert_eq!(seg.start, original.start, "slot {slot}");
            assert_abs_diff_eq!(seg.end.z, 6.0, epsilon = 1e-5);

            planes[slot] = near_cut;
            let mut seg = original;
            assert!(!clip_to_planes(&mut seg, &planes));
            assert_eq!(seg.end, original.end, "slot {slot}");
            assert_abs_diff_eq!(seg.start.z, 4.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_parallel_plane_skipped() {
        // Parallel and on the kept side.
        let keep = ClippingPlane::new([1.0, 0.0, 0.0], -8.0);
        let mut seg = along_z(0.0, 10.0);
        assert!(!clip_to_planes(&mut seg, &[keep]));
        assert_eq!(seg, along_z(0.0, 10.0));

        // Parallel and on the removed side.
        let remove = ClippingPlane::new([1.0, 0.0, 0.0], -2.0);
        assert!(clip_to_planes(&mut seg, &[remove]));
        assert!(seg.is_degenerate());
    }

    #[test]
    fn test_planes_applied_in_order() {
        // A slab 3 <= z <= 7.
        let planes = [
            ClippingPlane::new([0.0, 0.0, 1.0], -7.0),
            ClippingPlane::new([0.0, 0.0, -1.0], 3.0),
        ];
        let mut seg = along_z(0.0, 10.0);
        clip_to_planes(&mut seg, &planes);
        assert_abs_diff_eq!(seg.start.z, 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(seg.end.z, 7.0, epsilon = 1e-5);
        for plane in &planes {
            assert!(plane.signed_distance(&seg.start) <= 1e-6);
            assert!(plane.signed_distance(&seg.end) <= 1e-6);
        }
    }

    #[test]
    fn test_bounds_clip_to_shrunk_box() {
        let mut seg = along_z(-5.0, 15.0);
        assert!(!clip_to_bounds(&mut seg, &BOUNDS));
        assert_abs_diff_eq!(seg.start.z, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(seg.end.z, 9.0, epsilon = 1e-5);
    }

    #[test]
    fn test_bounds_clip_reversed_direction() {
        let mut seg = along_z(15.0, -5.0);
        assert!(!clip_to_bounds(&mut seg, &BOUNDS));
        assert_abs_diff_eq!(seg.start.z, 9.0, epsilon = 1e-5);
        assert_abs_diff_eq!(seg.end.z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_bounds_clip_diagonal() {
        let mut seg = Segment::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(11.0, 11.0, 11.0));
        assert!(!clip_to_bounds(&mut seg, &BOUNDS));
        for axis in 0..3 {
            assert_abs_diff_eq!(seg.start[axis], 1.0, epsilon = 1e-5);
            assert_abs_diff_eq!(seg.end[axis], 9.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_interior_segment_untouched() {
        let original = Segment::new(Vec3::new(2.0, 3.0, 4.0), Vec3::new(8.0, 7.0, 6.0));
        let mut seg = original;
        assert!(!clip_to_bounds(&mut seg, &BOUNDS));
        assert_eq!(seg, original);
    }

    #[test]
    fn test_segment_missing_box_collapses() {
        // Passes beside the volume: x stays at -5.
        let mut seg = Segment::new(Vec3::new(-5.0, 5.0, -5.0), Vec3::new(-5.0, 5.0, 15.0));
        assert!(clip_to_bounds(&mut seg, &BOUNDS));
        assert!(seg.is_degenerate());
    }

    #[test]
    fn test_margin_endpoint_kept() {
        // Start sits inside the one-voxel margin with no motion along z,
        // so it is neither moved nor rejected.
        let mut seg = Segment::new(Vec3::new(2.0, 5.0, 0.5), Vec3::new(8.0, 5.0, 0.5));
        assert!(!clip_to_bounds(&mut seg, &BOUNDS));
        assert_eq!(seg.start.z, 0.5);
    }
}
