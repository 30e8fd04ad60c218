use std::f32::consts::FRAC_PI_4;

use bevy::{
    math::Vec4Swizzles,
    prelude::*,
    render::camera::CameraProjection,
};

/// Camera projection which allows for an oblique near clipping plane, used for rendering portal virtual cameras.
#[derive(Debug, Component, Clone, Reflect)]
#[reflect(Component)]
pub struct PortalCameraProjection {
    pub fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
    /// View space plane replacing the near plane. Only what lies on its positive side is drawn.
    #[reflect(ignore)]
    pub clip_plane: Vec4,
}

impl Default for PortalCameraProjection {
    fn default() -> Self {
        PortalCameraProjection {
            fov: FRAC_PI_4,
            aspect_ratio: 16. / 9.,
            near: 0.1,
            far: 1000.,
            clip_plane: Vec4::from((Vec3::NEG_Z, -0.1)),
        }
    }
}

impl PortalCameraProjection {
    /// Follow the lens of the camera the game is viewed through.
    pub fn match_perspective(&mut self, perspective: &PerspectiveProjection) {
        self.fov = perspective.fov;
        self.aspect_ratio = perspective.aspect_ratio;
        self.near = perspective.near;
        self.far = perspective.far;
    }
}

/// Express a world space plane in the view space of a camera placed at `camera`, normalized.
pub fn view_space_plane(camera: &Transform, world_plane: Vec4) -> Vec4 {
    // Inverse transpose of the view matrix = inverse inverse transpose of camera matrix = transpose
    let plane = camera.compute_matrix().transpose() * world_plane;
    plane * plane.xyz().length_recip()
}

impl CameraProjection for PortalCameraProjection {
    fn get_projection_matrix(&self) -> Mat4 {
        // Math taken from https://www.terathon.com/lengyel/Lengyel-Oblique.pdf
        let proj_mat = Mat4::perspective_rh(self.fov, self.aspect_ratio, self.near, self.far);
        let proj_mat_inv = proj_mat.inverse();
        let mut oblique_proj_mat = proj_mat;

        let c = self.clip_plane;
        let m4 = proj_mat.row(3);
        let qp = Vec4::new(c.x.signum(), c.y.signum(), 1., 1.);
        let q = proj_mat_inv * qp;
        let a = m4.dot(q) / c.dot(q);
        let new_m3 = a * c;
        oblique_proj_mat.x_axis.z = new_m3.x;
        oblique_proj_mat.y_axis.z = new_m3.y;
        oblique_proj_mat.z_axis.z = new_m3.z;
        oblique_proj_mat.w_axis.z = new_m3.w;

        // The renderer expects reversed depth: the clip plane at 1, the far plane at 0.
        for column in [
            &mut oblique_proj_mat.x_axis,
            &mut oblique_proj_mat.y_axis,
            &mut oblique_proj_mat.z_axis,
            &mut oblique_proj_mat.w_axis,
        ] {
            column.z = column.w - column.z;
        }

        oblique_proj_mat
    }

    fn update(&mut self, width: f32, height: f32) {
        self.aspect_ratio = width / height;
    }

    fn far(&self) -> f32 {
        self.far
    }
}
