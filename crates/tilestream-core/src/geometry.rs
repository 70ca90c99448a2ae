use crate::glam::{DMat4, DVec3, DVec4};

/// An axis-aligned box in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        assert!(
            min.cmple(max).all(),
            "Box minimum {:?} exceeds maximum {:?}",
            min,
            max
        );
        Self { min, max }
    }

    pub fn center(&self) -> DVec3 {
        0.5 * (self.min + self.max)
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Corner `i` takes `max.x` if bit 0 of `i` is set, `max.y` for bit 1 and `max.z` for bit 2.
    pub fn corners(&self) -> [DVec3; 8] {
        let mut corners = [DVec3::ZERO; 8];
        for (i, c) in corners.iter_mut().enumerate() {
            *c = DVec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
        }
        corners
    }

    pub fn contains_point(&self, p: DVec3) -> bool {
        self.min.cmple(p).all() && p.cmple(self.max).all()
    }

    pub fn closest_point(&self, p: DVec3) -> DVec3 {
        p.clamp(self.min, self.max)
    }

    /// Zero when `p` is inside the box.
    pub fn distance_to_point(&self, p: DVec3) -> f64 {
        self.closest_point(p).distance(p)
    }
}

/// A view frustum given by 6 inward-facing planes and its 8 corners.
///
/// Plane order is left, right, bottom, top, near, far. Corner `i` is on the right for bit 0 of `i`, the top for bit 1 and the
/// far plane for bit 2.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [DVec4; 6],
    pub corners: [DVec3; 8],
}

impl Frustum {
    /// Extracts the frustum of a view-projection matrix with clip-space depth in `[0, 1]` (the `glam` `*_rh` convention).
    pub fn from_view_projection(view_projection: DMat4) -> Self {
        // Rows of the matrix are the columns of its transpose.
        let rows = view_projection.transpose();
        let (r0, r1, r2, r3) = (rows.x_axis, rows.y_axis, rows.z_axis, rows.w_axis);

        let mut planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2];
        for plane in planes.iter_mut() {
            let normal_length = plane.truncate().length();
            if normal_length > 0.0 {
                *plane /= normal_length;
            }
        }

        let inverse = view_projection.inverse();
        let mut corners = [DVec3::ZERO; 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let ndc = DVec3::new(
                if i & 1 == 0 { -1.0 } else { 1.0 },
                if i & 2 == 0 { -1.0 } else { 1.0 },
                if i & 4 == 0 { 0.0 } else { 1.0 },
            );
            *corner = inverse.project_point3(ndc);
        }

        Self { planes, corners }
    }

    #[inline]
    fn signed_distance(plane: DVec4, p: DVec3) -> f64 {
        plane.truncate().dot(p) + plane.w
    }

    pub fn contains_point(&self, p: DVec3) -> bool {
        self.planes
            .iter()
            .all(|&plane| Self::signed_distance(plane, p) >= 0.0)
    }

    /// The 8 edge directions that can produce a separating axis when crossed with a box axis. Far edges are kept separately
    /// from near edges because an off-center frustum may not have them parallel.
    fn edge_directions(&self) -> [DVec3; 8] {
        let c = &self.corners;
        [
            c[1] - c[0],
            c[2] - c[0],
            c[5] - c[4],
            c[6] - c[4],
            c[4] - c[0],
            c[5] - c[1],
            c[6] - c[2],
            c[7] - c[3],
        ]
    }

    /// Exact frustum vs. box overlap using the separating axis theorem.
    ///
    /// Small boxes usually resolve on the first step (a corner inside the frustum). Boxes that enclose the whole frustum have
    /// no corner inside it and fail no plane test, so they are resolved by the full set of candidate axes: plane normals, box
    /// axes, and every box axis crossed with every frustum edge.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let box_corners = aabb.corners();

        if box_corners.iter().any(|&c| self.contains_point(c)) {
            return true;
        }

        // Frustum plane normals.
        for &plane in self.planes.iter() {
            if box_corners
                .iter()
                .all(|&c| Self::signed_distance(plane, c) < 0.0)
            {
                return false;
            }
        }

        // Box face normals.
        for axis in 0..3 {
            if self.corners.iter().all(|c| c[axis] < aabb.min[axis])
                || self.corners.iter().all(|c| c[axis] > aabb.max[axis])
            {
                return false;
            }
        }

        // Cross products of box edges and frustum edges.
        for box_axis in [DVec3::X, DVec3::Y, DVec3::Z] {
            for edge in self.edge_directions() {
                let axis = box_axis.cross(edge);
                if axis.length_squared() <= PARALLEL_EPSILON * edge.length_squared() {
                    // Parallel edges can't separate anything.
                    continue;
                }
                let (box_min, box_max) = project_onto_axis(&box_corners, axis);
                let (frustum_min, frustum_max) = project_onto_axis(&self.corners, axis);
                if box_max < frustum_min || frustum_max < box_min {
                    return false;
                }
            }
        }

        true
    }
}

const PARALLEL_EPSILON: f64 = 1e-12;

fn project_onto_axis(points: &[DVec3; 8], axis: DVec3) -> (f64, f64) {
    points.iter().fold((f64::MAX, f64::MIN), |(lo, hi), p| {
        let d = p.dot(axis);
        (lo.min(d), hi.max(d))
    })
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
