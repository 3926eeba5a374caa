//! Perspective camera, page transforms and picking rays for the scene-graph engine.

use crate::render::Viewport;
use nalgebra::{Isometry3, Matrix4, Perspective3, Point3, Vector3};

/// Width of a page in world units.
pub const PAGE_WIDTH: f32 = 1.4;
/// Height of a page in world units.
pub const PAGE_HEIGHT: f32 = 2.0;
/// Depth offset between consecutive pages; later pages sit further back.
pub const PAGE_DEPTH_STEP: f32 = 0.01;

/// Vertical field of view (45 degrees).
pub const FIELD_OF_VIEW: f32 = std::f32::consts::FRAC_PI_4;
pub const NEAR_PLANE: f32 = 0.1;
pub const FAR_PLANE: f32 = 100.0;
pub const CAMERA_DISTANCE: f32 = 3.0;

fn sane_aspect(aspect: f32) -> f32 {
    if aspect.is_finite() && aspect > f32::EPSILON {
        aspect
    } else {
        1.0
    }
}

/// Model matrix of a page rotated `rotation` radians around the spine.
///
/// The page quad is centred on its local origin; the spine is its left edge, which sits at
/// `x = -PAGE_WIDTH / 2` in world space. A rotation of `-PI` lays the page flat on the left.
pub fn page_model(rotation: f32, depth: f32) -> Matrix4<f32> {
    let half = PAGE_WIDTH / 2.0;
    Matrix4::new_translation(&Vector3::new(-half, 0.0, depth))
        * Matrix4::from_axis_angle(&Vector3::y_axis(), rotation)
        * Matrix4::new_translation(&Vector3::new(half, 0.0, 0.0))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3<f32>,
    pub direction: Vector3<f32>,
}

impl Ray {
    pub fn transformed(&self, m: &Matrix4<f32>) -> Ray {
        Ray {
            origin: m.transform_point(&self.origin),
            direction: m.transform_vector(&self.direction),
        }
    }

    /// Where the ray crosses the `z = 0` plane, if it does in front of its origin.
    pub fn hit_plane_z0(&self) -> Option<Point3<f32>> {
        if self.direction.z.abs() < f32::EPSILON {
            return None;
        }
        let t = -self.origin.z / self.direction.z;
        if t < 0.0 {
            return None;
        }
        Some(self.origin + self.direction * t)
    }
}

/// Horizontal texture coordinate where `ray` (in world space) hits a page, if it does.
pub fn page_hit_u(ray: &Ray, model: &Matrix4<f32>) -> Option<f32> {
    let local = ray.transformed(&model.try_inverse()?);
    let hit = local.hit_plane_z0()?;
    if hit.x.abs() > PAGE_WIDTH / 2.0 || hit.y.abs() > PAGE_HEIGHT / 2.0 {
        return None;
    }
    Some((hit.x + PAGE_WIDTH / 2.0) / PAGE_WIDTH)
}

#[derive(Debug, Clone)]
pub struct Camera {
    projection: Perspective3<f32>,
    eye: Point3<f32>,
    target: Point3<f32>,
}

impl Camera {
    pub fn new(aspect: f32) -> Self {
        Self {
            projection: Perspective3::new(sane_aspect(aspect), FIELD_OF_VIEW, NEAR_PLANE, FAR_PLANE),
            eye: Point3::new(0.0, 0.0, CAMERA_DISTANCE),
            target: Point3::origin(),
        }
    }

    pub fn aspect(&self) -> f32 {
        self.projection.aspect()
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.projection.set_aspect(sane_aspect(aspect));
    }

    pub fn view(&self) -> Isometry3<f32> {
        Isometry3::look_at_rh(&self.eye, &self.target, &Vector3::y())
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        self.projection.as_matrix() * self.view().to_homogeneous()
    }

    /// World-space ray through pixel `(x, y)` of `viewport`.
    pub fn ray_through(&self, viewport: Viewport, x: f32, y: f32) -> Option<Ray> {
        if viewport.width == 0 || viewport.height == 0 {
            return None;
        }
        let ndc_x = (x / viewport.width as f32) * 2.0 - 1.0;
        let ndc_y = 1.0 - (y / viewport.height as f32) * 2.0;

        let inverse = self.view_projection().try_inverse()?;
        let near = inverse.transform_point(&Point3::new(ndc_x, ndc_y, -1.0));
        let far = inverse.transform_point(&Point3::new(ndc_x, ndc_y, 1.0));
        let direction = (far - near).try_normalize(f32::EPSILON)?;

        Some(Ray { origin: near, direction })
    }
}
