//! Per-frame render queue, batching and draw planning for skinned meshes.
//!
//! A frame goes through three stages:
//!
//! - [`FrameQueue`] collects submissions. Each submission is frustum culled and
//!   appended to its mesh's batch; meshes with transparent geosets also record
//!   the instance in one frame-wide transparent list.
//! - [`FrameQueue::prepare`] turns the queue into a [`PreparedFrame`]: instance
//!   matrices, bone matrices and per-layer colours flattened per batch, and the
//!   transparent list sorted back to front.
//! - [`PreparedFrame::opaque_draws`] and [`PreparedFrame::transparent_draws`]
//!   plan the draw calls that [`crate::pipelines::skinned::SkinnedRenderer`]
//!   replays into a render pass.
//!
//! [`PreparedFrame::pick_draws`] plans the object-id pass used for picking.
//!
//! The queue borrows meshes and skeletons for exactly one frame, so nothing
//! submitted in one frame can leak into the next.

use std::{collections::HashMap, ops::Range};

use cgmath::{InnerSpace, Matrix4, Point3, SquareMatrix};

use crate::{
    camera::FrameCamera,
    config::RenderConfig,
    data_structures::{
        instance::{InstanceRaw, SkeletalModelInstance},
        mesh::{MeshId, SkinnedMesh},
        model::{BlendMode, Layer, ShadingFlags},
    },
};

/// Which of the two material representations a pass draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Detail {
    Standard,
    High,
}

impl Detail {
    pub fn matches(self, layer: &Layer) -> bool {
        layer.hd == (self == Detail::High)
    }
}

/// Written by the pick pass where no pickable object was hit.
pub const NO_PICK_ID: u32 = 0;

/// One queued draw request.
#[derive(Clone, Copy)]
pub struct RenderJob<'frame> {
    pub matrix: Matrix4<f32>,
    pub tint: [f32; 3],
    pub pick_id: u32,
    pub skeleton: &'frame SkeletalModelInstance,
}

/// An instance that has to be drawn in the sorted transparent pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransparentInstance {
    pub batch: usize,
    pub instance: usize,
    pub distance: f32,
}

struct Batch<'frame> {
    mesh: &'frame SkinnedMesh,
    jobs: Vec<RenderJob<'frame>>,
}

pub struct FrameQueue<'frame> {
    camera: FrameCamera,
    config: RenderConfig,
    batches: Vec<Batch<'frame>>,
    batch_by_mesh: HashMap<MeshId, usize>,
    transparent: Vec<TransparentInstance>,
}

impl<'frame> FrameQueue<'frame> {
    pub fn begin(camera: FrameCamera, config: RenderConfig) -> Self {
        Self {
            camera,
            config,
            batches: Vec::new(),
            batch_by_mesh: HashMap::new(),
            transparent: Vec::new(),
        }
    }

    /// Queues `skeleton` for drawing with `mesh`. Returns whether anything was queued.
    pub fn submit(
        &mut self,
        mesh: &'frame SkinnedMesh,
        skeleton: &'frame SkeletalModelInstance,
        tint: [f32; 3],
    ) -> bool {
        self.submit_pickable(mesh, skeleton, tint, NO_PICK_ID)
    }

    /// Like [`FrameQueue::submit`], and also writes `pick_id` in the pick pass.
    pub fn submit_pickable(
        &mut self,
        mesh: &'frame SkinnedMesh,
        skeleton: &'frame SkeletalModelInstance,
        tint: [f32; 3],
        pick_id: u32,
    ) -> bool {
        if !mesh.has_mesh() {
            return false;
        }

        let model = &mesh.model;
        if !model.sequences.is_empty() {
            let extent = skeleton
                .sequence()
                .and_then(|index| model.sequences.get(index))
                .map_or(&model.extent, |sequence| &sequence.extent);
            if !self.camera.frustum.intersects_extent(&skeleton.matrix, extent) {
                return false;
            }
        }

        let batch = *self.batch_by_mesh.entry(mesh.id()).or_insert_with(|| {
            self.batches.push(Batch {
                mesh,
                jobs: Vec::new(),
            });
            self.batches.len() - 1
        });
        let jobs = &mut self.batches[batch].jobs;
        jobs.push(RenderJob {
            matrix: skeleton.matrix,
            tint,
            pick_id,
            skeleton,
        });
        let instance = jobs.len() - 1;

        if mesh.entries().iter().any(|entry| mesh.is_transparent(entry)) {
            let origin = Point3::from_homogeneous(skeleton.matrix.w);
            let distance = (origin - self.camera.eye).magnitude();
            if distance <= self.config.transparent_cutoff_distance {
                self.transparent.push(TransparentInstance {
                    batch,
                    instance,
                    distance,
                });
            }
        }
        true
    }

    /// Number of queued instances over all meshes.
    pub fn len(&self) -> usize {
        self.batches.iter().map(|batch| batch.jobs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn transparent_instances(&self) -> &[TransparentInstance] {
        &self.transparent
    }

    /// Flattens all queued state. Consumes the queue; draw planning works on the result.
    pub fn prepare(self) -> PreparedFrame<'frame> {
        let batches = self.batches.into_iter().map(assemble).collect();
        let mut transparent = self.transparent;
        transparent.sort_by(|a, b| b.distance.total_cmp(&a.distance));
        PreparedFrame {
            camera: self.camera,
            config: self.config,
            batches,
            transparent,
        }
    }
}

/// The upload-ready state of one mesh for one frame.
pub struct PreparedBatch<'frame> {
    pub mesh: &'frame SkinnedMesh,
    pub instances: Vec<InstanceRaw>,
    /// `bone_count` matrices per instance, in instance order.
    pub bone_matrices: Vec<[[f32; 4]; 4]>,
    pub bone_count: usize,
    /// Indexed by `instance * layers_per_instance + layer_index`.
    pub layer_colors: Vec<[f32; 4]>,
    pub pick_ids: Vec<u32>,
}

impl PreparedBatch<'_> {
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn layer_color(&self, instance: usize, layer_index: usize) -> [f32; 4] {
        self.layer_colors[instance * self.mesh.layers_per_instance() + layer_index]
    }
}

fn assemble(batch: Batch<'_>) -> PreparedBatch<'_> {
    let mesh = batch.mesh;
    let model = &mesh.model;
    let bone_count = model.bones.len();
    let instance_count = batch.jobs.len();

    let mut instances = Vec::with_capacity(instance_count);
    let mut bone_matrices = Vec::with_capacity(instance_count * bone_count);
    let mut layer_colors = Vec::with_capacity(instance_count * mesh.layers_per_instance());
    let pick_ids = batch.jobs.iter().map(|job| job.pick_id).collect();

    for job in &batch.jobs {
        instances.push(InstanceRaw::from(job.matrix));

        let pose = job.skeleton.world_matrices.iter().take(bone_count);
        let padding = bone_count.saturating_sub(job.skeleton.world_matrices.len());
        bone_matrices.extend(
            pose.copied()
                .chain(std::iter::repeat_n(Matrix4::identity(), padding))
                .map(Into::<[[f32; 4]; 4]>::into),
        );

        let animated = job.skeleton.sequence().is_some();
        for entry in mesh.entries() {
            let mut color = job.tint;
            let mut visibility = 1.0;
            if let (true, Some(animation)) = (
                animated,
                entry
                    .geoset_animation
                    .and_then(|index| model.animations.get(index)),
            ) {
                let animation_color = job.skeleton.geoset_animation_color(animation);
                color = std::array::from_fn(|i| color[i] * animation_color[i]);
                visibility = job.skeleton.geoset_animation_visibility(animation);
            }

            for layer in mesh.layers(entry) {
                let layer_visibility = if animated {
                    job.skeleton.layer_visibility(layer)
                } else {
                    1.0
                };
                layer_colors.push([color[0], color[1], color[2], layer_visibility * visibility]);
            }
        }
    }

    PreparedBatch {
        mesh,
        instances,
        bone_matrices,
        bone_count,
        layer_colors,
        pick_ids,
    }
}

/// Fixed-function state a layer needs; one render pipeline exists per distinct state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerState {
    pub blend_mode: BlendMode,
    pub two_sided: bool,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl LayerState {
    pub fn from_layer(layer: &Layer) -> Self {
        let flags = layer.shading_flags;
        Self {
            blend_mode: layer.blend_mode,
            two_sided: flags.contains(ShadingFlags::TWO_SIDED),
            depth_test: !flags.contains(ShadingFlags::NO_DEPTH_TEST),
            depth_write: !flags.contains(ShadingFlags::NO_DEPTH_SET),
        }
    }
}

/// One planned draw: a layer of one mesh entry over a range of instances.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub batch: usize,
    pub entry: usize,
    pub material: usize,
    /// Position of the layer inside its material.
    pub layer: usize,
    /// Cumulative layer index inside the mesh, used to find the layer colour.
    pub layer_index: usize,
    pub state: LayerState,
    /// Fragments below this alpha are discarded; negative disables the test.
    pub alpha_threshold: f32,
    pub indices: Range<u32>,
    pub base_vertex: i32,
    pub instances: Range<u32>,
}

/// A draw of the pick pass and the id it writes.
#[derive(Clone, Debug, PartialEq)]
pub struct PickDraw {
    pub draw: DrawCall,
    pub id: u32,
}

pub struct PreparedFrame<'frame> {
    pub camera: FrameCamera,
    pub config: RenderConfig,
    batches: Vec<PreparedBatch<'frame>>,
    transparent: Vec<TransparentInstance>,
}

impl<'frame> PreparedFrame<'frame> {
    pub fn batches(&self) -> &[PreparedBatch<'frame>] {
        &self.batches
    }

    /// Farthest first.
    pub fn transparent_instances(&self) -> &[TransparentInstance] {
        &self.transparent
    }

    fn draw_call(
        &self,
        batch: usize,
        entry_index: usize,
        layer: usize,
        instances: Range<u32>,
    ) -> DrawCall {
        let mesh = self.batches[batch].mesh;
        let entry = &mesh.entries()[entry_index];
        let material = &mesh.model.materials[entry.material_id].layers[layer];
        DrawCall {
            batch,
            entry: entry_index,
            material: entry.material_id,
            layer,
            layer_index: entry.layer_offset + layer,
            state: LayerState::from_layer(material),
            alpha_threshold: if material.blend_mode == BlendMode::Transparent {
                self.config.alpha_test_threshold
            } else {
                -1.0
            },
            indices: entry.base_index..entry.base_index + entry.indices,
            base_vertex: entry.base_vertex as i32,
            instances,
        }
    }

    /// Instanced draws for every entry whose first layer is opaque.
    pub fn opaque_draws(&self, detail: Detail) -> Vec<DrawCall> {
        let mut draws = Vec::new();
        for (batch_index, batch) in self.batches.iter().enumerate() {
            let mesh = batch.mesh;
            let instances = 0..batch.instance_count() as u32;
            for (entry_index, entry) in mesh.entries().iter().enumerate() {
                if mesh.is_transparent(entry) {
                    continue;
                }
                for (layer_index, layer) in mesh.layers(entry).iter().enumerate() {
                    if detail.matches(layer) {
                        draws.push(self.draw_call(
                            batch_index,
                            entry_index,
                            layer_index,
                            instances.clone(),
                        ));
                    }
                }
            }
        }
        draws
    }

    /// One draw per visible layer per transparent instance, back to front.
    pub fn transparent_draws(&self, detail: Detail) -> Vec<DrawCall> {
        let mut draws = Vec::new();
        for record in &self.transparent {
            let batch = &self.batches[record.batch];
            let mesh = batch.mesh;
            let instance = record.instance as u32;
            for (entry_index, entry) in mesh.entries().iter().enumerate() {
                if !mesh.is_transparent(entry) {
                    continue;
                }
                for (layer_index, layer) in mesh.layers(entry).iter().enumerate() {
                    let alpha =
                        batch.layer_color(record.instance, entry.layer_offset + layer_index)[3];
                    if alpha <= self.config.min_visible_alpha || !detail.matches(layer) {
                        continue;
                    }
                    draws.push(self.draw_call(
                        record.batch,
                        entry_index,
                        layer_index,
                        instance..instance + 1,
                    ));
                }
            }
        }
        draws
    }

    /// Object-id draws, one per pickable instance and entry, never instanced.
    ///
    /// Each entry is drawn with its first opaque or alpha-tested layer; entries
    /// with only blended layers cannot be picked. Detail does not matter here.
    pub fn pick_draws(&self) -> Vec<PickDraw> {
        let mut draws = Vec::new();
        for (batch_index, batch) in self.batches.iter().enumerate() {
            let mesh = batch.mesh;
            for (instance, &id) in batch.pick_ids.iter().enumerate() {
                if id == NO_PICK_ID {
                    continue;
                }
                let instance = instance as u32;
                for (entry_index, entry) in mesh.entries().iter().enumerate() {
                    let Some(layer) = mesh
                        .layers(entry)
                        .iter()
                        .position(|layer| layer.blend_mode.is_opaque())
                    else {
                        continue;
                    };
                    draws.push(PickDraw {
                        draw: self.draw_call(batch_index, entry_index, layer, instance..instance + 1),
                        id,
                    });
                }
            }
        }
        draws
    }

    /// Ends the frame, releasing the borrowed meshes and skeletons.
    pub fn end(self) {}
}
