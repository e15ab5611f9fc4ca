//! Placed occurrences of a model and their animation state.
//!
//! [`Placement`] is where an object stands on the map. A
//! [`SkeletalModelInstance`] adds the pose of one animated model: the playing
//! sequence, the current frame and one world matrix per node. Placement and
//! playback are owned by the caller; the render queue only reads them.

use std::{collections::HashMap, sync::Arc};

use cgmath::{Rad, SquareMatrix, Vector3};
use instant::Duration;
use log::warn;

use crate::{
    data_structures::{
        mesh::Vertex,
        model::{GeosetAnimation, Layer, Model, Node},
    },
    resources::animation::{self, Timeline},
};

/// Where a unit or doodad stands on the map. Facing turns around the up axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub position: Vector3<f32>,
    pub facing: Rad<f32>,
    pub scale: Vector3<f32>,
}

impl Placement {
    pub fn new(position: Vector3<f32>, facing: impl Into<Rad<f32>>) -> Self {
        Self {
            position,
            facing: facing.into(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from_angle_z(self.facing)
            * cgmath::Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

impl From<Vector3<f32>> for Placement {
    fn from(position: Vector3<f32>) -> Self {
        Self::new(position, Rad(0.0))
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::from(Vector3::new(0.0, 0.0, 0.0))
    }
}

/**
 * The raw instance is the actual data stored on the GPU: the world matrix only,
 * everything else per instance comes from the storage buffers.
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
}

impl From<cgmath::Matrix4<f32>> for InstanceRaw {
    fn from(matrix: cgmath::Matrix4<f32>) -> Self {
        Self {
            model: matrix.into(),
        }
    }
}

/**
 * A mat4 takes up 4 vertex slots as it is technically 4 vec4s, stepped per instance.
 */
impl Vertex for InstanceRaw {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        const ATTRIBUTES: [wgpu::VertexAttribute; 4] =
            wgpu::vertex_attr_array![6 => Float32x4, 7 => Float32x4, 8 => Float32x4, 9 => Float32x4];
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<InstanceRaw>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &ATTRIBUTES,
        }
    }
}

pub struct SkeletalModelInstance {
    model: Arc<Model>,
    pub matrix: cgmath::Matrix4<f32>,
    /// One world matrix per node, bones first, then helpers.
    pub world_matrices: Vec<cgmath::Matrix4<f32>>,
    sequence: Option<usize>,
    current_frame: u32,
    global_frame: u32,
    /// Parent position per node, resolved once.
    parents: Vec<Option<usize>>,
    /// Nodes ordered so that parents come before their children.
    evaluation_order: Vec<usize>,
}

impl SkeletalModelInstance {
    pub fn new(model: Arc<Model>, matrix: cgmath::Matrix4<f32>) -> Self {
        let (parents, evaluation_order) = node_hierarchy(&model);
        let mut instance = Self {
            world_matrices: vec![cgmath::Matrix4::identity(); model.node_count()],
            model,
            matrix,
            sequence: None,
            current_frame: 0,
            global_frame: 0,
            parents,
            evaluation_order,
        };
        instance.update_nodes();
        instance
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn sequence(&self) -> Option<usize> {
        self.sequence
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    pub fn place(&mut self, placement: &Placement) {
        self.matrix = placement.to_matrix();
    }

    /// World position of the instance origin.
    pub fn position(&self) -> cgmath::Point3<f32> {
        cgmath::Point3::from_homogeneous(self.matrix.w)
    }

    /// Starts playing `sequence` from its first frame; `None` stops animation.
    pub fn set_sequence(&mut self, sequence: Option<usize>) {
        self.sequence = match sequence {
            Some(index) if index >= self.model.sequences.len() => {
                warn!(
                    "model {} has no sequence {index}, stopping animation",
                    self.model.name
                );
                None
            }
            other => other,
        };
        self.current_frame = self.active_sequence().map_or(0, |sequence| sequence.start);
        self.update_nodes();
    }

    /// Jumps to an absolute frame, kept inside the active sequence.
    pub fn set_frame(&mut self, frame: u32) {
        self.current_frame = match self.active_sequence() {
            Some(sequence) => frame.clamp(sequence.start, sequence.end),
            None => frame,
        };
        self.update_nodes();
    }

    /// Advances playback by `dt` (one frame per millisecond) and recomputes the pose.
    pub fn update(&mut self, dt: Duration) {
        let frames = dt.as_millis().min(u32::MAX as u128) as u32;
        self.global_frame = self.global_frame.wrapping_add(frames);

        if let Some(sequence) = self.active_sequence() {
            let (start, end) = (sequence.start, sequence.end);
            let looping = sequence.is_looping();
            let duration = sequence.duration();
            let advanced = self.current_frame.saturating_add(frames);
            self.current_frame = if advanced <= end {
                advanced
            } else if looping && duration > 0 {
                start + (advanced - start) % duration
            } else {
                end
            };
        }
        self.update_nodes();
    }

    fn active_sequence(&self) -> Option<&crate::data_structures::model::Sequence> {
        self.sequence.and_then(|index| self.model.sequences.get(index))
    }

    pub fn timeline(&self) -> Timeline<'_> {
        Timeline {
            model: &self.model,
            sequence: self.active_sequence(),
            frame: self.current_frame,
            global_frame: self.global_frame,
        }
    }

    fn update_nodes(&mut self) {
        let model = Arc::clone(&self.model);
        let nodes: Vec<&Node> = model.nodes().collect();
        let timeline = Timeline {
            model: &model,
            sequence: self.sequence.and_then(|index| model.sequences.get(index)),
            frame: self.current_frame,
            global_frame: self.global_frame,
        };

        for &index in &self.evaluation_order {
            let local = local_matrix(nodes[index], &timeline);
            self.world_matrices[index] = match self.parents[index] {
                Some(parent) => self.world_matrices[parent] * local,
                None => local,
            };
        }
    }

    /// Bone matrices only, in bone order.
    pub fn bone_matrices(&self) -> &[cgmath::Matrix4<f32>] {
        &self.world_matrices[..self.model.bones.len()]
    }

    pub fn geoset_animation_color(&self, animation: &GeosetAnimation) -> [f32; 3] {
        self.timeline()
            .sample(animation.color_track.as_ref(), animation.color)
    }

    pub fn geoset_animation_visibility(&self, animation: &GeosetAnimation) -> f32 {
        self.timeline()
            .sample(animation.alpha_track.as_ref(), animation.alpha)
            .clamp(0.0, 1.0)
    }

    pub fn layer_visibility(&self, layer: &Layer) -> f32 {
        self.timeline()
            .sample(layer.alpha_track.as_ref(), layer.alpha)
            .clamp(0.0, 1.0)
    }
}

/// `T(pivot) * T(translation) * R(rotation) * S(scale) * T(-pivot)`.
fn local_matrix(node: &Node, timeline: &Timeline) -> cgmath::Matrix4<f32> {
    let pivot = Vector3::from(node.pivot);
    let translation = timeline.sample(node.translation.as_ref(), [0.0; 3]);
    let rotation = timeline.sample(node.rotation.as_ref(), [0.0, 0.0, 0.0, 1.0]);
    let [sx, sy, sz] = timeline.sample(node.scale.as_ref(), [1.0; 3]);

    cgmath::Matrix4::from_translation(pivot)
        * cgmath::Matrix4::from_translation(translation.into())
        * cgmath::Matrix4::from(animation::quaternion(rotation))
        * cgmath::Matrix4::from_nonuniform_scale(sx, sy, sz)
        * cgmath::Matrix4::from_translation(-pivot)
}

/// Resolves parent links by object id and orders nodes parents-first.
/// Links that would form a cycle are cut.
fn node_hierarchy(model: &Model) -> (Vec<Option<usize>>, Vec<usize>) {
    let nodes: Vec<&Node> = model.nodes().collect();
    let by_object_id: HashMap<i32, usize> = nodes
        .iter()
        .enumerate()
        .map(|(index, node)| (node.object_id, index))
        .collect();
    let mut parents: Vec<Option<usize>> = nodes
        .iter()
        .enumerate()
        .map(|(index, node)| {
            by_object_id
                .get(&node.parent_id)
                .copied()
                .filter(|&parent| node.parent_id >= 0 && parent != index)
        })
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Visiting,
        Done,
    }
    let mut marks = vec![Mark::New; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    for start in 0..nodes.len() {
        let mut chain: Vec<usize> = Vec::new();
        let mut current = Some(start);
        while let Some(index) = current {
            match marks[index] {
                Mark::Done => break,
                Mark::Visiting => {
                    if let Some(&last) = chain.last() {
                        warn!("node {} is its own ancestor, detaching it", nodes[last].name);
                        parents[last] = None;
                    }
                    break;
                }
                Mark::New => {
                    marks[index] = Mark::Visiting;
                    chain.push(index);
                    current = parents[index];
                }
            }
        }
        for &index in chain.iter().rev() {
            marks[index] = Mark::Done;
            order.push(index);
        }
    }
    (parents, order)
}
