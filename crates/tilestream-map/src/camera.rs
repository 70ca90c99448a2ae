use crate::{PixelUnits, WorldUnits};

use tilestream_core::geometry::Frustum;
use tilestream_core::glam::{DMat4, DVec3};

/// Smallest distance used when projecting a length to the screen, so a camera inside a tile's box gets a finite answer.
const MIN_PROJECTION_DISTANCE: f64 = 1e-6;

/// Perspective projection parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    /// Vertical field of view in radians.
    pub fov_y: f64,
    pub aspect: f64,
    pub near: f64,
    pub far: f64,
    /// Height of the viewport in pixels.
    pub viewport_height: f64,
}

impl Projection {
    pub fn matrix(&self) -> DMat4 {
        DMat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Pixels covered by one world unit at unit distance from the eye.
    pub fn projection_scale(&self) -> f64 {
        self.viewport_height / (2.0 * (0.5 * self.fov_y).tan())
    }
}

/// The view of the map that drives tile selection.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    position: DVec3,
    view_projection: DMat4,
    frustum: Frustum,
    projection_scale: f64,
}

impl Camera {
    pub fn look_at(eye: DVec3, target: DVec3, up: DVec3, projection: Projection) -> Self {
        let view = DMat4::look_at_rh(eye, target, up);
        Self::from_view_projection(
            eye,
            projection.matrix() * view,
            projection.projection_scale(),
        )
    }

    /// `view_projection` must map depth into `[0, 1]`.
    pub fn from_view_projection(
        position: DVec3,
        view_projection: DMat4,
        projection_scale: f64,
    ) -> Self {
        Self {
            position,
            view_projection,
            frustum: Frustum::from_view_projection(view_projection),
            projection_scale,
        }
    }

    pub fn position(&self) -> DVec3 {
        self.position
    }

    pub fn view_projection(&self) -> &DMat4 {
        &self.view_projection
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn projection_scale(&self) -> f64 {
        self.projection_scale
    }

    /// On-screen size of a length `size` seen face-on at `distance` from the eye.
    pub fn screen_space_error(
        &self,
        size: WorldUnits<f64>,
        distance: WorldUnits<f64>,
    ) -> PixelUnits<f64> {
        PixelUnits(
            size.into_inner() * self.projection_scale
                / distance.into_inner().max(MIN_PROJECTION_DISTANCE),
        )
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
