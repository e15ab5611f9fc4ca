#![allow(dead_code)]

pub mod mdx_builder;

use std::sync::Arc;

use mdx_ngin::{
    camera::{Camera, FrameCamera, Projection},
    data_structures::{
        mesh::SkinnedMesh,
        model::{BlendMode, Extent, Geoset, GeosetAnimation, Layer, Material, Model, Sequence},
    },
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Eye at (0, -10, 0) looking along +Y.
pub fn frame_camera() -> FrameCamera {
    let camera = Camera::new((0.0, 0.0, 0.0), (0.0, 1.0, 0.0), 10.0);
    let projection = Projection::new(800, 600, cgmath::Deg(70.0), 0.1, 2000.0);
    FrameCamera::new(&camera, &projection)
}

pub fn triangle_geoset(material_id: u32) -> Geoset {
    Geoset {
        vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        normals: vec![[0.0, 0.0, 1.0]; 3],
        uv_sets: vec![vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]],
        faces: vec![0, 1, 2],
        vertex_groups: vec![0; 3],
        matrix_groups: vec![1],
        matrix_indices: vec![0],
        material_id,
        ..Default::default()
    }
}

pub fn material(blend_modes: &[BlendMode]) -> Material {
    Material {
        layers: blend_modes
            .iter()
            .map(|&blend_mode| Layer {
                blend_mode,
                textures: vec![0],
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// One triangle geoset per material.
pub fn model(materials: Vec<Material>) -> Model {
    let geosets = (0..materials.len() as u32).map(triangle_geoset).collect();
    Model {
        version: 800,
        name: "Synthetic".to_string(),
        extent: Extent {
            bounds_radius: 1.0,
            minimum: [-1.0; 3],
            maximum: [1.0; 3],
        },
        materials,
        geosets,
        ..Default::default()
    }
}

pub fn sequence(name: &str, start: u32, end: u32) -> Sequence {
    Sequence {
        name: name.to_string(),
        start,
        end,
        extent: Extent {
            bounds_radius: 1.0,
            minimum: [-1.0; 3],
            maximum: [1.0; 3],
        },
        ..Default::default()
    }
}

pub fn geoset_animation(geoset_id: u32, alpha: f32, color: [f32; 3]) -> GeosetAnimation {
    GeosetAnimation {
        alpha,
        flags: 0,
        color,
        geoset_id,
        alpha_track: None,
        color_track: None,
    }
}

pub fn mesh(model: Model) -> SkinnedMesh {
    SkinnedMesh::from_model("Units/Synthetic.mdx", Arc::new(model), None).unwrap()
}
