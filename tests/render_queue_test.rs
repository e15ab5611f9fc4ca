mod common;

use std::{ops::Range, sync::Arc};

use cgmath::{Matrix4, SquareMatrix, Vector3};
use common::mdx_builder::MdxBuilder;
use mdx_ngin::{
    RenderConfig, TRANSPARENT_DISTANCE_CUTOFF,
    data_structures::{
        instance::SkeletalModelInstance,
        mesh::SkinnedMesh,
        model::{BlendMode, Model, ShadingFlags},
    },
    render::{Detail, FrameQueue, LayerState, NO_PICK_ID},
};

const WHITE: [f32; 3] = [1.0; 3];

fn skeleton(mesh: &SkinnedMesh, position: [f32; 3]) -> SkeletalModelInstance {
    SkeletalModelInstance::new(
        Arc::clone(&mesh.model),
        Matrix4::from_translation(Vector3::from(position)),
    )
}

fn queue<'frame>() -> FrameQueue<'frame> {
    FrameQueue::begin(common::frame_camera(), RenderConfig::default())
}

#[test]
fn end_to_end_triangle_should_produce_one_opaque_draw() {
    common::init_logger();
    let model = Model::from_bytes(&MdxBuilder::triangle().build()).unwrap();
    let mesh = SkinnedMesh::from_model("Units/Triangle.mdx", Arc::new(model), None).unwrap();
    assert!(mesh.has_mesh());
    for skin in &mesh.layout.skins {
        assert_eq!(&skin[4..], &[128, 127, 0, 0]);
    }

    let instance = skeleton(&mesh, [0.0; 3]);
    let mut queue = queue();
    assert!(queue.submit(&mesh, &instance, WHITE));
    let frame = queue.prepare();

    let opaque = frame.opaque_draws(Detail::Standard);
    assert_eq!(opaque.len(), 1);
    let draw = &opaque[0];
    assert_eq!(draw.indices, 0..3);
    assert_eq!(draw.base_vertex, 0);
    assert_eq!(draw.instances, 0..1);
    assert_eq!(draw.alpha_threshold, -1.0);
    assert_eq!(frame.transparent_draws(Detail::Standard).len(), 0);
    assert!(frame.opaque_draws(Detail::High).is_empty());

    let batch = &frame.batches()[0];
    assert_eq!(batch.bone_count, 2);
    assert_eq!(batch.bone_matrices.len(), 2);
    assert_eq!(batch.layer_colors, vec![[1.0; 4]]);
    frame.end();
}

#[test]
fn meshless_model_should_be_a_no_op() {
    let mesh = common::mesh(Model::default());
    assert!(!mesh.has_mesh());
    assert!(mesh.gpu().is_none());

    let instance = skeleton(&mesh, [0.0; 3]);
    let mut queue = queue();
    assert!(!queue.submit(&mesh, &instance, WHITE));
    assert!(queue.is_empty());

    let frame = queue.prepare();
    assert!(frame.batches().is_empty());
    assert!(frame.opaque_draws(Detail::Standard).is_empty());
    assert!(frame.transparent_draws(Detail::Standard).is_empty());
}

#[test]
fn transparent_distance_cutoff_should_be_inclusive() {
    assert_eq!(TRANSPARENT_DISTANCE_CUTOFF, 256.0);
    let mesh = common::mesh(common::model(vec![common::material(&[BlendMode::Blend])]));
    // the eye sits at y = -10
    let near = skeleton(&mesh, [0.0, 245.0, 0.0]);
    let far = skeleton(&mesh, [0.0, 247.0, 0.0]);

    let mut queue = queue();
    assert!(queue.submit(&mesh, &near, WHITE));
    assert!(queue.submit(&mesh, &far, WHITE));

    assert_eq!(queue.len(), 2);
    let transparent = queue.transparent_instances();
    assert_eq!(transparent.len(), 1);
    assert_eq!(transparent[0].instance, 0);
    assert!((transparent[0].distance - 255.0).abs() < 1e-3);
}

#[test]
fn cutoff_should_be_configurable() {
    let mesh = common::mesh(common::model(vec![common::material(&[BlendMode::Blend])]));
    let far = skeleton(&mesh, [0.0, 490.0, 0.0]);

    let mut queue = FrameQueue::begin(
        common::frame_camera(),
        RenderConfig::default().with_transparent_cutoff(1000.0),
    );
    queue.submit(&mesh, &far, WHITE);
    assert_eq!(queue.transparent_instances().len(), 1);
}

#[test]
fn should_record_at_most_one_transparent_entry_per_submission() {
    let mesh = common::mesh(common::model(vec![
        common::material(&[BlendMode::Blend]),
        common::material(&[BlendMode::Additive]),
        common::material(&[BlendMode::None]),
    ]));
    let instance = skeleton(&mesh, [0.0; 3]);

    let mut queue = queue();
    queue.submit(&mesh, &instance, WHITE);
    assert_eq!(queue.transparent_instances().len(), 1);

    let frame = queue.prepare();
    assert_eq!(frame.opaque_draws(Detail::Standard).len(), 1);
    assert_eq!(frame.transparent_draws(Detail::Standard).len(), 2);
}

#[test]
fn should_sort_transparent_instances_farthest_first() {
    let mesh = common::mesh(common::model(vec![common::material(&[BlendMode::Blend])]));
    let instances: Vec<SkeletalModelInstance> = [20.0, 90.0, 50.0]
        .iter()
        .map(|&y| skeleton(&mesh, [0.0, y, 0.0]))
        .collect();

    let mut queue = queue();
    for instance in &instances {
        queue.submit(&mesh, instance, WHITE);
    }
    let frame = queue.prepare();

    let order: Vec<usize> = frame
        .transparent_instances()
        .iter()
        .map(|record| record.instance)
        .collect();
    assert_eq!(order, vec![1, 2, 0]);

    let draws = frame.transparent_draws(Detail::Standard);
    let drawn: Vec<u32> = draws.iter().map(|draw| draw.instances.start).collect();
    assert_eq!(drawn, vec![1, 2, 0]);
    assert!(draws.iter().all(|draw| draw.instances.len() == 1));
}

#[test]
fn frames_should_not_share_state() {
    let mesh = common::mesh(common::model(vec![
        common::material(&[BlendMode::None]),
        common::material(&[BlendMode::Blend]),
    ]));
    let a = skeleton(&mesh, [0.0; 3]);
    let b = skeleton(&mesh, [1.0, 0.0, 0.0]);

    let mut first = queue();
    first.submit(&mesh, &a, WHITE);
    first.submit(&mesh, &b, WHITE);
    let first = first.prepare();
    assert_eq!(first.batches()[0].instance_count(), 2);
    assert_eq!(first.transparent_instances().len(), 2);
    first.end();

    let mut second = queue();
    second.submit(&mesh, &b, [0.5; 3]);
    let second = second.prepare();
    assert_eq!(second.batches().len(), 1);
    assert_eq!(second.batches()[0].instance_count(), 1);
    assert_eq!(second.transparent_instances().len(), 1);
    assert_eq!(second.opaque_draws(Detail::Standard)[0].instances, 0..1);
    assert_eq!(second.batches()[0].layer_color(0, 0), [0.5, 0.5, 0.5, 1.0]);
}

#[test]
fn should_batch_instances_per_mesh() {
    let opaque = common::mesh(common::model(vec![common::material(&[BlendMode::None])]));
    let other = common::mesh(common::model(vec![common::material(&[BlendMode::None])]));
    let instances = [
        skeleton(&opaque, [0.0; 3]),
        skeleton(&other, [0.0; 3]),
        skeleton(&opaque, [2.0, 0.0, 0.0]),
    ];

    let mut queue = queue();
    queue.submit(&opaque, &instances[0], WHITE);
    queue.submit(&other, &instances[1], WHITE);
    queue.submit(&opaque, &instances[2], WHITE);
    let frame = queue.prepare();

    assert_eq!(frame.batches().len(), 2);
    assert_eq!(frame.batches()[0].instance_count(), 2);
    assert_eq!(frame.batches()[1].instance_count(), 1);
    let moved: [[f32; 4]; 4] = Matrix4::from_translation(Vector3::new(2.0, 0.0, 0.0)).into();
    assert_eq!(frame.batches()[0].instances[1].model, moved);

    let draws = frame.opaque_draws(Detail::Standard);
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].instances, 0..2);
    assert_eq!(draws[1].instances, 0..1);
}

#[test]
fn should_cull_instances_outside_of_the_frustum() {
    let mut model = common::model(vec![common::material(&[BlendMode::None])]);
    model.sequences.push(common::sequence("Stand", 0, 1000));
    let mesh = common::mesh(model);

    let behind = skeleton(&mesh, [0.0, -50.0, 0.0]);
    let in_front = skeleton(&mesh, [0.0, 20.0, 0.0]);
    let far_left = skeleton(&mesh, [-500.0, 20.0, 0.0]);

    let mut queue = queue();
    assert!(!queue.submit(&mesh, &behind, WHITE));
    assert!(queue.submit(&mesh, &in_front, WHITE));
    assert!(!queue.submit(&mesh, &far_left, WHITE));
    assert_eq!(queue.len(), 1);
}

#[test]
fn models_without_sequences_should_never_be_culled() {
    let mesh = common::mesh(common::model(vec![common::material(&[BlendMode::None])]));
    let behind = skeleton(&mesh, [0.0, -50.0, 0.0]);

    let mut queue = queue();
    assert!(queue.submit(&mesh, &behind, WHITE));
}

#[test]
fn layer_colours_should_combine_tint_and_geoset_animation() {
    let mut model = common::model(vec![
        common::material(&[BlendMode::None, BlendMode::Additive]),
        common::material(&[BlendMode::Blend]),
    ]);
    model.sequences.push(common::sequence("Stand", 0, 1000));
    model.animations.push(common::geoset_animation(0, 0.5, [1.0, 0.5, 0.0]));
    model.materials[0].layers[1].alpha = 0.5;
    let mesh = common::mesh(model);

    let mut animated = skeleton(&mesh, [0.0; 3]);
    animated.set_sequence(Some(0));
    let still = skeleton(&mesh, [1.0, 0.0, 0.0]);

    let mut queue = queue();
    queue.submit(&mesh, &animated, [0.5, 1.0, 1.0]);
    queue.submit(&mesh, &still, [0.5, 1.0, 1.0]);
    let frame = queue.prepare();
    let batch = &frame.batches()[0];

    assert_eq!(batch.layer_colors.len(), 2 * 3);
    assert_eq!(batch.layer_color(0, 0), [0.5, 0.5, 0.0, 0.5]);
    assert_eq!(batch.layer_color(0, 1), [0.5, 0.5, 0.0, 0.25]);
    assert_eq!(batch.layer_color(0, 2), [0.5, 1.0, 1.0, 1.0]);
    // without an active sequence nothing is animated
    assert_eq!(batch.layer_color(1, 0), [0.5, 1.0, 1.0, 1.0]);
    assert_eq!(batch.layer_color(1, 1), [0.5, 1.0, 1.0, 1.0]);
}

#[test]
fn invisible_layers_should_be_skipped_in_transparent_pass() {
    let mut model = common::model(vec![common::material(&[
        BlendMode::Blend,
        BlendMode::Additive,
    ])]);
    model.sequences.push(common::sequence("Stand", 0, 1000));
    model.materials[0].layers[1].alpha = 0.0;
    let mesh = common::mesh(model);

    let mut instance = skeleton(&mesh, [0.0; 3]);
    instance.set_sequence(Some(0));
    let mut queue = queue();
    queue.submit(&mesh, &instance, WHITE);
    let frame = queue.prepare();

    let draws = frame.transparent_draws(Detail::Standard);
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].layer, 0);
}

#[test]
fn should_pad_missing_bone_matrices_with_identity() {
    let model = Model::from_bytes(&MdxBuilder::triangle().build()).unwrap();
    let mesh = SkinnedMesh::from_model("Units/Triangle.mdx", Arc::new(model), None).unwrap();
    let mut instance = skeleton(&mesh, [0.0; 3]);
    instance.world_matrices.truncate(1);

    let mut queue = queue();
    queue.submit(&mesh, &instance, WHITE);
    let frame = queue.prepare();
    let identity: [[f32; 4]; 4] = Matrix4::identity().into();
    assert_eq!(frame.batches()[0].bone_matrices.len(), 2);
    assert_eq!(frame.batches()[0].bone_matrices[1], identity);
}

#[test]
fn draw_state_should_follow_layer_flags() {
    let mut model = common::model(vec![common::material(&[
        BlendMode::Transparent,
        BlendMode::None,
    ])]);
    model.materials[0].layers[1].shading_flags =
        ShadingFlags::TWO_SIDED | ShadingFlags::NO_DEPTH_TEST | ShadingFlags::NO_DEPTH_SET;
    let mesh = common::mesh(model);
    let instance = skeleton(&mesh, [0.0; 3]);

    let mut queue = queue();
    queue.submit(&mesh, &instance, WHITE);
    let frame = queue.prepare();
    let draws = frame.opaque_draws(Detail::Standard);

    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].alpha_threshold, 0.75);
    assert_eq!(
        draws[0].state,
        LayerState {
            blend_mode: BlendMode::Transparent,
            two_sided: false,
            depth_test: true,
            depth_write: true,
        }
    );
    assert_eq!(draws[1].alpha_threshold, -1.0);
    assert_eq!(
        draws[1].state,
        LayerState {
            blend_mode: BlendMode::None,
            two_sided: true,
            depth_test: false,
            depth_write: false,
        }
    );
    assert_eq!(draws[1].layer_index, 1);
}

#[test]
fn passes_should_only_draw_layers_of_their_detail() {
    let mut model = common::model(vec![common::material(&[BlendMode::None, BlendMode::None])]);
    model.materials[0].layers[1].hd = true;
    let mesh = common::mesh(model);
    let instance = skeleton(&mesh, [0.0; 3]);

    let mut queue = queue();
    queue.submit(&mesh, &instance, WHITE);
    let frame = queue.prepare();

    let standard = frame.opaque_draws(Detail::Standard);
    let high = frame.opaque_draws(Detail::High);
    assert_eq!(standard.len(), 1);
    assert_eq!(standard[0].layer, 0);
    assert_eq!(high.len(), 1);
    assert_eq!(high[0].layer, 1);
}

#[test]
fn plain_submissions_should_not_be_pickable() {
    let mesh = common::mesh(common::model(vec![common::material(&[BlendMode::None])]));
    let instance = skeleton(&mesh, [0.0; 3]);
    let mut queue = queue();
    assert!(queue.submit(&mesh, &instance, WHITE));
    let frame = queue.prepare();

    assert_eq!(frame.batches()[0].pick_ids, vec![NO_PICK_ID]);
    assert!(frame.pick_draws().is_empty());
}

#[test]
fn pick_should_draw_first_opaque_layer_of_each_entry() {
    let mesh = common::mesh(common::model(vec![
        common::material(&[BlendMode::Additive, BlendMode::Transparent, BlendMode::None]),
        common::material(&[BlendMode::Blend]),
        common::material(&[BlendMode::None, BlendMode::Transparent]),
    ]));
    let instance = skeleton(&mesh, [0.0; 3]);
    let mut queue = queue();
    assert!(queue.submit_pickable(&mesh, &instance, WHITE, 42));
    let frame = queue.prepare();

    let picks = frame.pick_draws();
    let chosen: Vec<(usize, usize)> = picks
        .iter()
        .map(|pick| (pick.draw.entry, pick.draw.layer))
        .collect();
    assert_eq!(chosen, vec![(0, 1), (2, 0)]);
    assert!(picks.iter().all(|pick| pick.id == 42));

    assert_eq!(picks[0].draw.state.blend_mode, BlendMode::Transparent);
    assert_eq!(picks[0].draw.alpha_threshold, 0.75);
    assert_eq!(picks[1].draw.alpha_threshold, -1.0);
    // cumulative over the materials in front
    assert_eq!(picks[1].draw.layer_index, 4);
}

#[test]
fn pick_draws_should_not_be_instanced() {
    let mesh = common::mesh(common::model(vec![common::material(&[BlendMode::None])]));
    let first = skeleton(&mesh, [0.0; 3]);
    let hidden = skeleton(&mesh, [1.0, 0.0, 0.0]);
    let last = skeleton(&mesh, [2.0, 0.0, 0.0]);
    let mut queue = queue();
    assert!(queue.submit_pickable(&mesh, &first, WHITE, 1));
    assert!(queue.submit(&mesh, &hidden, WHITE));
    assert!(queue.submit_pickable(&mesh, &last, WHITE, 3));
    let frame = queue.prepare();

    // the colour pass still draws all three at once
    assert_eq!(frame.opaque_draws(Detail::Standard)[0].instances, 0..3);

    let picks: Vec<(Range<u32>, u32)> = frame
        .pick_draws()
        .into_iter()
        .map(|pick| (pick.draw.instances, pick.id))
        .collect();
    assert_eq!(picks, vec![(0..1, 1), (2..3, 3)]);
}

#[test]
fn pick_should_ignore_detail_level() {
    let mut model = common::model(vec![common::material(&[BlendMode::None])]);
    model.materials[0].layers[0].hd = true;
    let mesh = common::mesh(model);
    let instance = skeleton(&mesh, [0.0; 3]);
    let mut queue = queue();
    assert!(queue.submit_pickable(&mesh, &instance, WHITE, 5));
    let frame = queue.prepare();

    assert!(frame.opaque_draws(Detail::Standard).is_empty());
    assert_eq!(frame.pick_draws().len(), 1);
}
