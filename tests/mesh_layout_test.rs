mod common;

use common::mdx_builder::{GeosetSpec, LayerSpec, MaterialSpec, MdxBuilder};
use mdx_ngin::{
    ModelError,
    data_structures::model::{BlendMode, Geoset, Model},
    resources::mesh::{self, MeshLayout},
};

#[test]
fn should_rebase_indices_of_later_geosets() {
    let model = common::model(vec![
        common::material(&[BlendMode::None]),
        common::material(&[BlendMode::None]),
    ]);
    let layout = MeshLayout::build(&model).unwrap();

    assert_eq!(layout.entries.len(), 2);
    assert_eq!(layout.vertex_count(), 6);
    let second = &layout.entries[1];
    assert_eq!(second.base_vertex, 3);
    assert_eq!(second.base_index, 3);
    assert_eq!(layout.entry_indices(second), &[0, 1, 2]);
    assert_eq!(layout.resolved_indices(second), vec![3, 4, 5]);
}

#[test]
fn should_keep_streams_the_same_length() {
    let model = common::model(vec![common::material(&[BlendMode::None])]);
    let layout = MeshLayout::build(&model).unwrap();
    let n = layout.vertex_count();
    assert_eq!(layout.uvs.len(), n);
    assert_eq!(layout.normals.len(), n);
    assert_eq!(layout.tangents.len(), n);
    assert_eq!(layout.skins.len(), n);
}

#[test]
fn should_only_use_lod_zero() {
    let mut model = common::model(vec![
        common::material(&[BlendMode::None]),
        common::material(&[BlendMode::None]),
    ]);
    model.geosets[0].lod = 2;

    let layout = MeshLayout::build(&model).unwrap();
    assert_eq!(layout.entries.len(), 1);
    assert_eq!(layout.entries[0].geoset, 1);
    assert_eq!(layout.entries[0].base_vertex, 0);
}

#[test]
fn model_without_usable_geosets_should_be_empty() {
    common::init_logger();
    let mut model = common::model(vec![common::material(&[BlendMode::None])]);
    model.geosets[0].material_id = 7;

    let layout = MeshLayout::build(&model).unwrap();
    assert!(layout.is_empty());
    assert_eq!(layout.layers_per_instance, 0);

    let none = MeshLayout::build(&Model::default()).unwrap();
    assert!(none.is_empty());
}

#[test]
fn should_count_layers_per_instance() {
    let model = common::model(vec![
        common::material(&[BlendMode::None, BlendMode::Additive]),
        common::material(&[BlendMode::Blend]),
        common::material(&[BlendMode::None, BlendMode::Modulate, BlendMode::AddAlpha]),
    ]);
    let layout = MeshLayout::build(&model).unwrap();

    assert_eq!(layout.layers_per_instance, 6);
    let offsets: Vec<usize> = layout.entries.iter().map(|e| e.layer_offset).collect();
    assert_eq!(offsets, vec![0, 2, 3]);
}

#[test]
fn should_link_geoset_animations_by_geoset_index() {
    let mut model = common::model(vec![
        common::material(&[BlendMode::None]),
        common::material(&[BlendMode::None]),
    ]);
    model.animations = vec![
        common::geoset_animation(1, 1.0, [1.0; 3]),
        common::geoset_animation(5, 1.0, [1.0; 3]),
        common::geoset_animation(1, 0.5, [1.0; 3]),
    ];

    let layout = MeshLayout::build(&model).unwrap();
    assert_eq!(layout.entries[0].geoset_animation, None);
    assert_eq!(layout.entries[1].geoset_animation, Some(2));
}

#[test]
fn should_reject_faces_outside_of_geoset() {
    let mut model = common::model(vec![common::material(&[BlendMode::None])]);
    model.geosets[0].faces = vec![0, 1, 3];

    match MeshLayout::build(&model) {
        Err(ModelError::InvalidFace {
            geoset,
            index,
            vertices,
        }) => {
            assert_eq!(geoset, 0);
            assert_eq!(index, 3);
            assert_eq!(vertices, 3);
        }
        other => panic!("expected an invalid face error, got {other:?}"),
    }
}

#[test]
fn should_pad_missing_normals_and_uvs() {
    common::init_logger();
    let mut model = common::model(vec![common::material(&[BlendMode::None])]);
    model.geosets[0].normals.clear();
    model.geosets[0].uv_sets.clear();

    let layout = MeshLayout::build(&model).unwrap();
    assert_eq!(layout.normals, vec![[0.0; 3]; 3]);
    assert_eq!(layout.uvs, vec![[0.0; 2]; 3]);
}

#[test]
fn should_generate_unit_tangents_along_u() {
    let geoset: Geoset = common::triangle_geoset(0);
    let tangents = mesh::generate_tangents(
        &geoset.vertices,
        &geoset.uv_sets[0],
        &geoset.normals,
        &geoset.faces,
    );

    assert_eq!(tangents.len(), 3);
    for tangent in tangents {
        assert!((tangent[0] - 1.0).abs() < 1e-5, "{tangent:?}");
        assert!(tangent[1].abs() < 1e-5);
        assert!(tangent[2].abs() < 1e-5);
        assert_eq!(tangent[3], 1.0);
    }
}

#[test]
fn should_flip_handedness_for_mirrored_uvs() {
    let geoset = common::triangle_geoset(0);
    let mirrored = vec![[0.0, 0.0], [1.0, 0.0], [0.0, -1.0]];
    let tangents =
        mesh::generate_tangents(&geoset.vertices, &mirrored, &geoset.normals, &geoset.faces);
    assert!(tangents.iter().all(|tangent| tangent[3] == -1.0));
}

#[test]
fn should_keep_explicit_tangents() {
    let mut model = common::model(vec![common::material(&[BlendMode::None])]);
    model.geosets[0].tangents = vec![[0.0, 1.0, 0.0, -1.0]; 3];
    let layout = MeshLayout::build(&model).unwrap();
    assert_eq!(layout.tangents, vec![[0.0, 1.0, 0.0, -1.0]; 3]);
}

#[test]
fn should_normalize_skins_from_decoded_model() {
    let model = Model::from_bytes(&MdxBuilder::triangle().build()).unwrap();
    let layout = MeshLayout::build(&model).unwrap();

    assert_eq!(layout.skins.len(), 3);
    for skin in &layout.skins {
        assert_eq!(&skin[..4], &[0, 1, 0, 0]);
        assert_eq!(&skin[4..], &[128, 127, 0, 0]);
    }
}

#[test]
fn should_skip_geosets_whose_material_has_no_layers() {
    common::init_logger();
    let mut builder = MdxBuilder::triangle();
    builder.materials.push(MaterialSpec {
        shader: String::new(),
        layers: Vec::new(),
    });
    builder.materials.push(MaterialSpec {
        shader: String::new(),
        layers: vec![LayerSpec::default()],
    });
    builder.geosets.push(GeosetSpec::triangle(1, &[0]));
    builder.geosets.push(GeosetSpec::triangle(2, &[1]));

    let model = Model::from_bytes(&builder.build()).unwrap();
    let layout = MeshLayout::build(&model).unwrap();
    let geosets: Vec<usize> = layout.entries.iter().map(|entry| entry.geoset).collect();
    assert_eq!(geosets, vec![0, 2]);
    assert_eq!(layout.entries[1].base_vertex, 3);
}

#[test]
fn should_skip_geosets_without_faces_or_vertices() {
    common::init_logger();
    let mut model = common::model(vec![
        common::material(&[BlendMode::None]),
        common::material(&[BlendMode::None]),
        common::material(&[BlendMode::None]),
    ]);
    model.geosets[0].faces.clear();
    model.geosets[1] = Geoset {
        material_id: 1,
        ..Default::default()
    };

    let layout = MeshLayout::build(&model).unwrap();

    assert_eq!(layout.entries.len(), 1);
    let entry = &layout.entries[0];
    assert_eq!(entry.geoset, 2);
    assert_eq!(entry.base_vertex, 0);
    assert_eq!(entry.base_index, 0);
    assert_eq!(entry.layer_offset, 0);
    assert_eq!(layout.layers_per_instance, 1);
    assert_eq!(layout.resolved_indices(entry), vec![0, 1, 2]);
}

#[test]
fn model_of_only_empty_geosets_should_have_no_mesh() {
    let mut model = common::model(vec![common::material(&[BlendMode::None])]);
    model.geosets[0].faces.clear();
    assert!(MeshLayout::build(&model).unwrap().is_empty());

    model.geosets[0] = Geoset::default();
    let layout = MeshLayout::build(&model).unwrap();
    assert!(layout.is_empty());
    assert_eq!(layout.vertex_count(), 0);
    assert!(!common::mesh(model).has_mesh());
}
