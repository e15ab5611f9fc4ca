//! Editor camera, projection and view frustum.
//!
//! The map editor orbits a target point: the eye sits `distance` units behind the
//! target along the view `direction`. The world is Z-up.

use cgmath::{InnerSpace, Matrix, Matrix4, Point3, Rad, Vector3, Vector4};

use crate::data_structures::model::Extent;

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub target: Point3<f32>,
    /// Unit view direction.
    pub direction: Vector3<f32>,
    pub distance: f32,
    pub up: Vector3<f32>,
}

impl Camera {
    pub fn new<P: Into<Point3<f32>>, V: Into<Vector3<f32>>>(
        target: P,
        direction: V,
        distance: f32,
    ) -> Self {
        Self {
            target: target.into(),
            direction: direction.into().normalize(),
            distance,
            up: Vector3::unit_z(),
        }
    }

    /// Position of the eye in world space.
    pub fn eye(&self) -> Point3<f32> {
        self.target - self.direction * self.distance
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_to_rh(self.eye(), self.direction, self.up)
    }

    /// Distance from the eye to a world-space point.
    pub fn distance_to(&self, point: Point3<f32>) -> f32 {
        (point - self.eye()).magnitude()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    aspect: f32,
    fovy: Rad<f32>,
    znear: f32,
    zfar: f32,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            aspect: width.max(1) as f32 / height.max(1) as f32,
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * cgmath::perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

/// The camera state captured for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameCamera {
    pub eye: Point3<f32>,
    pub view_proj: Matrix4<f32>,
    pub frustum: Frustum,
}

impl FrameCamera {
    pub fn new(camera: &Camera, projection: &Projection) -> Self {
        let view_proj = projection.calc_matrix() * camera.calc_matrix();
        Self {
            eye: camera.eye(),
            view_proj,
            frustum: Frustum::from_view_proj(&view_proj),
        }
    }
}

/// Six inward-facing planes `(a, b, c, d)` with `a*x + b*y + c*z + d >= 0` inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    planes: [Vector4<f32>; 6],
}

impl Frustum {
    /// Extracts the planes of a wgpu (0..1 depth) view-projection matrix.
    pub fn from_view_proj(m: &Matrix4<f32>) -> Self {
        let row = |i: usize| m.row(i);
        let planes = [
            row(3) + row(0),
            row(3) - row(0),
            row(3) + row(1),
            row(3) - row(1),
            row(2),
            row(3) - row(2),
        ]
        .map(|plane| {
            let length = plane.truncate().magnitude();
            if length > 0.0 { plane / length } else { plane }
        });
        Self { planes }
    }

    pub fn contains_point(&self, point: Point3<f32>) -> bool {
        let p = point.to_homogeneous();
        self.planes.iter().all(|plane| plane.dot(p) >= 0.0)
    }

    /// False only when the box, moved by `matrix`, lies completely outside one plane.
    pub fn intersects_extent(&self, matrix: &Matrix4<f32>, extent: &Extent) -> bool {
        let [x0, y0, z0] = extent.minimum;
        let [x1, y1, z1] = extent.maximum;
        let corners = [
            [x0, y0, z0],
            [x1, y0, z0],
            [x0, y1, z0],
            [x1, y1, z0],
            [x0, y0, z1],
            [x1, y0, z1],
            [x0, y1, z1],
            [x1, y1, z1],
        ]
        .map(|[x, y, z]| matrix * Vector4::new(x, y, z, 1.0));

        self.planes
            .iter()
            .all(|plane| corners.iter().any(|corner| plane.dot(*corner) >= 0.0))
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    view_position: [f32; 4],
    view_proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new() -> Self {
        use cgmath::SquareMatrix;
        Self {
            view_position: [0.0; 4],
            view_proj: Matrix4::identity().into(),
        }
    }

    pub fn update_view_proj(&mut self, camera: &FrameCamera) {
        self.view_position = camera.eye.to_homogeneous().into();
        self.view_proj = camera.view_proj.into();
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct CameraResources {
    pub camera: Camera,
    pub projection: Projection,
    pub uniform: CameraUniform,
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl CameraResources {
    pub fn frame(&self) -> FrameCamera {
        FrameCamera::new(&self.camera, &self.projection)
    }

    /// Writes the current camera into the uniform buffer.
    pub fn upload(&mut self, queue: &wgpu::Queue) {
        self.uniform.update_view_proj(&self.frame());
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[self.uniform]));
    }
}
