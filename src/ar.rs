//! Camera model for rendering virtual content over the color camera feed.

use crate::types::CameraIntrinsics;
use crate::{Result, TangoError};
use std::ops::Mul;

/// Engine near clip plane, in world units.
pub const DEFAULT_NEAR_CLIP: f64 = 10.0;
pub const DEFAULT_FAR_CLIP: f64 = 12_000.0;

// Horizontal inset applied to the near plane, as a fraction of image width.
const NEAR_PLANE_U_INSET: f64 = 0.05;

/// Size of the host viewport the camera image is shown in.
pub trait ViewportSource: Send + Sync {
    /// `(width, height)` in pixels, or `None` while no viewport exists.
    fn viewport_size(&self) -> Option<(u32, u32)>;
}

/// 4x4 matrix in the engine's row-vector convention (`m[row][col]`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4 {
    pub m: [[f64; 4]; 4],
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4 {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn scale(self, s: f64) -> Mat4 {
        let mut out = self;
        for row in out.m.iter_mut() {
            for v in row.iter_mut() {
                *v *= s;
            }
        }
        out
    }
}

impl Mul for Mat4 {
    type Output = Mat4;

    fn mul(self, rhs: Mat4) -> Mat4 {
        let mut out = [[0.0; 4]; 4];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (0..4).map(|k| self.m[i][k] * rhs.m[k][j]).sum();
            }
        }
        Mat4 { m: out }
    }
}

/// Off-axis perspective frustum with a reversed depth range.
pub fn frustum_matrix(left: f64, right: f64, bottom: f64, top: f64, near: f64, far: f64) -> Mat4 {
    let mut r = Mat4::IDENTITY;
    r.m[0][0] = 2.0 * near / (right - left);
    r.m[1][1] = 2.0 * near / (top - bottom);
    r.m[2][0] = -(right + left) / (right - left);
    r.m[2][1] = -(top + bottom) / (top - bottom);
    r.m[2][2] = far / (far - near);
    r.m[2][3] = 1.0;
    r.m[3][2] = -(far * near) / (far - near);
    r.m[3][3] = 0.0;
    r
}

/// Near clipping plane bounds in camera space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearPlane {
    pub lower_left: [f64; 2],
    pub upper_right: [f64; 2],
    /// `[near, far]` clip distances.
    pub near_far: [f64; 2],
}

/// Projection derived from the color camera intrinsics and the viewport it
/// is displayed in.
#[derive(Debug, Clone, PartialEq)]
pub struct ArCameraModel {
    intrinsics: CameraIntrinsics,
    uv_shift: [f64; 2],
    near_plane: NearPlane,
    projection: Mat4,
}

impl ArCameraModel {
    pub fn new(intrinsics: CameraIntrinsics, viewport: (u32, u32), near: f64, far: f64) -> Result<Self> {
        if intrinsics.width == 0 || intrinsics.height == 0 || intrinsics.fx <= 0.0 || intrinsics.fy <= 0.0 {
            return Err(TangoError::Configuration(format!(
                "unusable camera intrinsics {}x{} f=({}, {})",
                intrinsics.width, intrinsics.height, intrinsics.fx, intrinsics.fy
            )));
        }
        if viewport.0 == 0 || viewport.1 == 0 {
            return Err(TangoError::Configuration(format!(
                "empty viewport {}x{}",
                viewport.0, viewport.1
            )));
        }
        if !(near > 0.0 && far > near) {
            return Err(TangoError::Configuration(format!(
                "clip range [{}, {}] is empty",
                near, far
            )));
        }

        let uv_shift = uv_shift(&intrinsics, viewport);
        log::info!("AR camera UV shift: {:.4} {:.4}", uv_shift[0], uv_shift[1]);

        let near_plane = near_plane(&intrinsics, near, far);
        let projection = adjusted_projection(&near_plane);
        Ok(Self {
            intrinsics,
            uv_shift,
            near_plane,
            projection,
        })
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Fraction of the camera image cropped on each side to fill the viewport.
    pub fn uv_shift(&self) -> [f64; 2] {
        self.uv_shift
    }

    pub fn near_plane(&self) -> NearPlane {
        self.near_plane
    }

    /// Projection matrix ready for the host renderer.
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    pub fn unadjusted_projection_matrix(&self) -> Mat4 {
        let p = &self.near_plane;
        frustum_matrix(
            p.lower_left[0],
            p.upper_right[0],
            p.lower_left[1],
            p.upper_right[1],
            p.near_far[0],
            p.near_far[1],
        )
    }
}

fn uv_shift(intr: &CameraIntrinsics, viewport: (u32, u32)) -> [f64; 2] {
    let width_ratio = viewport.0 as f64 / intr.width as f64;
    let height_ratio = viewport.1 as f64 / intr.height as f64;
    if width_ratio >= height_ratio {
        [0.0, (1.0 - height_ratio / width_ratio) / 2.0]
    } else {
        [(1.0 - width_ratio / height_ratio) / 2.0, 0.0]
    }
}

fn near_plane(intr: &CameraIntrinsics, near: f64, far: f64) -> NearPlane {
    let (w, h) = (intr.width as f64, intr.height as f64);
    let x_scale = near / intr.fx;
    let y_scale = near / intr.fy;
    let u = NEAR_PLANE_U_INSET;
    // Image y points down; flip it for the plane bounds.
    NearPlane {
        lower_left: [(-intr.cx + u * w) * x_scale, (-h + intr.cy) * y_scale],
        upper_right: [(w - intr.cx - u * w) * x_scale, intr.cy * y_scale],
        near_far: [near, far],
    }
}

fn adjusted_projection(p: &NearPlane) -> Mat4 {
    let off_axis = frustum_matrix(
        p.lower_left[0],
        p.upper_right[0],
        p.lower_left[1],
        p.upper_right[1],
        p.near_far[0],
        p.near_far[1],
    );
    let mut flip_z = Mat4::IDENTITY;
    flip_z.m[2][2] = -1.0;
    flip_z.m[3][2] = 1.0;

    let mut r = off_axis * flip_z;
    r.m[2][2] = 0.0;
    r.m[3][0] = 0.0;
    r.m[3][1] = 0.0;
    let mut r = r.scale(1.0 / r.m[0][0]);
    r.m[3][2] = p.near_far[0];
    r
}
