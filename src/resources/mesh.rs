use cgmath::{InnerSpace, Vector2, Vector3};
use log::{debug, warn};

use crate::{
    data_structures::model::{Extent, Geoset, Model},
    error::{ModelError, Result},
    resources::skin,
};

/// One drawable sub-range of the shared buffers.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshEntry {
    /// Index of the source geoset in [`Model::geosets`].
    pub geoset: usize,
    pub vertices: u32,
    pub base_vertex: u32,
    pub indices: u32,
    pub base_index: u32,
    pub material_id: usize,
    pub extent: Extent,
    /// Index into [`Model::animations`] of the geoset animation driving this entry.
    pub geoset_animation: Option<usize>,
    /// Cumulative layer index of this entry's first layer.
    pub layer_offset: usize,
}

/// The CPU side of a skinned mesh: every LOD 0 geoset packed into one set of
/// attribute streams, plus the bookkeeping to draw each one on its own.
///
/// Indices stay local to their geoset and are drawn with `base_vertex`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshLayout {
    pub entries: Vec<MeshEntry>,
    pub positions: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 4]>,
    pub skins: Vec<[u8; skin::SKIN_STRIDE]>,
    pub indices: Vec<u16>,
    /// Sum of the layer counts of all entries' materials.
    pub layers_per_instance: usize,
}

impl MeshLayout {
    pub fn build(model: &Model) -> Result<Self> {
        let usable: Vec<(usize, &Geoset)> = model
            .geosets
            .iter()
            .enumerate()
            .filter(|(_, geoset)| geoset.lod == 0)
            .filter(|(index, geoset)| {
                let drawable = !geoset.vertices.is_empty() && !geoset.faces.is_empty();
                if !drawable {
                    debug!(
                        "geoset {index} has {} vertices and {} faces, skipping it",
                        geoset.vertices.len(),
                        geoset.faces.len()
                    );
                }
                drawable
            })
            .filter(|(index, geoset)| {
                let has_layers = model
                    .materials
                    .get(geoset.material_id as usize)
                    .is_some_and(|material| !material.layers.is_empty());
                if !has_layers {
                    warn!(
                        "geoset {index} references material {} which has no layers, skipping it",
                        geoset.material_id
                    );
                }
                has_layers
            })
            .collect();

        let vertex_total: usize = usable.iter().map(|(_, g)| g.vertices.len()).sum();
        let index_total: usize = usable.iter().map(|(_, g)| g.faces.len()).sum();

        let mut layout = MeshLayout {
            positions: Vec::with_capacity(vertex_total),
            uvs: Vec::with_capacity(vertex_total),
            normals: Vec::with_capacity(vertex_total),
            tangents: Vec::with_capacity(vertex_total),
            skins: Vec::with_capacity(vertex_total),
            indices: Vec::with_capacity(index_total),
            ..Default::default()
        };

        for (index, geoset) in usable {
            layout.push_geoset(model, index, geoset)?;
        }

        for (animation_index, animation) in model.animations.iter().enumerate() {
            if let Some(entry) = layout
                .entries
                .iter_mut()
                .find(|entry| entry.geoset == animation.geoset_id as usize)
            {
                entry.geoset_animation = Some(animation_index);
            }
        }

        Ok(layout)
    }

    fn push_geoset(&mut self, model: &Model, index: usize, geoset: &Geoset) -> Result<()> {
        let vertex_count = geoset.vertices.len();
        if let Some(&bad) = geoset.faces.iter().find(|&&face| face as usize >= vertex_count) {
            return Err(ModelError::InvalidFace {
                geoset: index,
                index: bad,
                vertices: vertex_count,
            });
        }

        let skin = skin::normalize(index, geoset)?;
        let normals = fit_to(index, "normals", &geoset.normals, vertex_count);
        let uvs = match geoset.uv_sets.first() {
            Some(set) => fit_to(index, "uvs", set, vertex_count),
            None => {
                warn!("geoset {index} has no uv set, using zeroes");
                vec![[0.0; 2]; vertex_count]
            }
        };
        let tangents = if geoset.tangents.len() == vertex_count {
            geoset.tangents.clone()
        } else {
            generate_tangents(&geoset.vertices, &uvs, &normals, &geoset.faces)
        };

        let material_id = geoset.material_id as usize;
        let layer_count = model.materials[material_id].layers.len();
        self.entries.push(MeshEntry {
            geoset: index,
            vertices: vertex_count as u32,
            base_vertex: self.positions.len() as u32,
            indices: geoset.faces.len() as u32,
            base_index: self.indices.len() as u32,
            material_id,
            extent: geoset.extent,
            geoset_animation: None,
            layer_offset: self.layers_per_instance,
        });
        self.layers_per_instance += layer_count;

        self.positions.extend_from_slice(&geoset.vertices);
        self.uvs.extend(uvs);
        self.normals.extend(normals);
        self.tangents.extend(tangents);
        self.skins.extend(skin.chunks_exact(skin::SKIN_STRIDE).map(|chunk| {
            let mut bytes = [0u8; skin::SKIN_STRIDE];
            bytes.copy_from_slice(chunk);
            bytes
        }));
        self.indices.extend_from_slice(&geoset.faces);
        Ok(())
    }

    /// A model with no usable geosets has nothing to upload or draw.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Local indices of one entry, as stored in the index buffer.
    pub fn entry_indices(&self, entry: &MeshEntry) -> &[u16] {
        let start = entry.base_index as usize;
        &self.indices[start..start + entry.indices as usize]
    }

    /// Indices of one entry rebased into the shared vertex range, as the GPU
    /// resolves them with `base_vertex`.
    pub fn resolved_indices(&self, entry: &MeshEntry) -> Vec<u32> {
        self.entry_indices(entry)
            .iter()
            .map(|&index| entry.base_vertex + index as u32)
            .collect()
    }
}

fn fit_to<T: Copy + Default>(geoset: usize, what: &str, values: &[T], len: usize) -> Vec<T> {
    if values.len() != len {
        warn!(
            "geoset {geoset} has {} {what} for {len} vertices, padding with zeroes",
            values.len()
        );
    }
    let mut fitted: Vec<T> = values.iter().copied().take(len).collect();
    fitted.resize(len, T::default());
    fitted
}

/**
 * Per-triangle tangents, accumulated and averaged per vertex. `w` carries the
 * handedness of the tangent frame so the shader can rebuild the bitangent.
 */
pub fn generate_tangents(
    positions: &[[f32; 3]],
    uvs: &[[f32; 2]],
    normals: &[[f32; 3]],
    faces: &[u16],
) -> Vec<[f32; 4]> {
    let mut tangents = vec![Vector3::new(0.0f32, 0.0, 0.0); positions.len()];
    let mut bitangents = vec![Vector3::new(0.0f32, 0.0, 0.0); positions.len()];
    let mut triangles_included = vec![0u32; positions.len()];

    for c in faces.chunks_exact(3) {
        let [i0, i1, i2] = [c[0] as usize, c[1] as usize, c[2] as usize];

        let pos0: Vector3<f32> = positions[i0].into();
        let pos1: Vector3<f32> = positions[i1].into();
        let pos2: Vector3<f32> = positions[i2].into();

        let uv0: Vector2<f32> = uvs[i0].into();
        let uv1: Vector2<f32> = uvs[i1].into();
        let uv2: Vector2<f32> = uvs[i2].into();

        let delta_pos1 = pos1 - pos0;
        let delta_pos2 = pos2 - pos0;
        let delta_uv1 = uv1 - uv0;
        let delta_uv2 = uv2 - uv0;

        // delta_pos1 = delta_uv1.x * T + delta_uv1.y * B
        // delta_pos2 = delta_uv2.x * T + delta_uv2.y * B
        let det = delta_uv1.x * delta_uv2.y - delta_uv1.y * delta_uv2.x;
        if det.abs() <= f32::EPSILON {
            continue;
        }
        let r = 1.0 / det;
        let tangent = (delta_pos1 * delta_uv2.y - delta_pos2 * delta_uv1.y) * r;
        let bitangent = (delta_pos2 * delta_uv1.x - delta_pos1 * delta_uv2.x) * r;

        for i in [i0, i1, i2] {
            tangents[i] += tangent;
            bitangents[i] += bitangent;
            triangles_included[i] += 1;
        }
    }

    tangents
        .into_iter()
        .zip(bitangents)
        .zip(triangles_included)
        .zip(normals)
        .map(|(((tangent, bitangent), n), normal)| {
            if n == 0 {
                return [1.0, 0.0, 0.0, 1.0];
            }
            let denom = 1.0 / n as f32;
            let normal: Vector3<f32> = (*normal).into();
            let tangent = tangent * denom;
            let bitangent = bitangent * denom;

            // Gram-Schmidt against the vertex normal
            let orthogonal = tangent - normal * normal.dot(tangent);
            let tangent = if orthogonal.magnitude2() > f32::EPSILON {
                orthogonal.normalize()
            } else if tangent.magnitude2() > f32::EPSILON {
                tangent.normalize()
            } else {
                Vector3::new(1.0, 0.0, 0.0)
            };
            let handedness = if normal.cross(tangent).dot(bitangent) < 0.0 {
                -1.0
            } else {
                1.0
            };
            [tangent.x, tangent.y, tangent.z, handedness]
        })
        .collect()
}
