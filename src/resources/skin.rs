//! Conversion of legacy bone groups into the four-bone skin format.
//!
//! Standard-detail geosets bind each vertex to a "matrix group": a list of bones
//! that influence the vertex equally. High-detail geosets store an explicit skin
//! of 8 bytes per vertex (four bone indices, then four weights). Everything
//! downstream only sees the explicit layout.

use log::warn;

use crate::{
    data_structures::model::Geoset,
    error::{ModelError, Result},
};

pub const MAX_BONES_PER_VERTEX: usize = 4;
pub const SKIN_STRIDE: usize = 2 * MAX_BONES_PER_VERTEX;

/// Bone indices and weights of one vertex. Weights always sum to 255.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkinWeights {
    pub bones: [u8; 4],
    pub weights: [u8; 4],
}

impl SkinWeights {
    pub fn to_bytes(self) -> [u8; SKIN_STRIDE] {
        let mut bytes = [0u8; SKIN_STRIDE];
        bytes[..4].copy_from_slice(&self.bones);
        bytes[4..].copy_from_slice(&self.weights);
        bytes
    }
}

/// Equal weights for one bone group. Bones past the fourth are dropped in the
/// order they are listed.
pub fn group_weights(members: &[u32]) -> SkinWeights {
    let mut skin = SkinWeights::default();
    if members.is_empty() {
        skin.weights[0] = 255;
        return skin;
    }

    let bone_count = members.len().min(MAX_BONES_PER_VERTEX);
    let weight = 255 / bone_count as u32;
    for (slot, &bone) in members.iter().take(bone_count).enumerate() {
        skin.bones[slot] = u8::try_from(bone).unwrap_or_else(|_| {
            warn!("bone index {bone} does not fit the skin format, clamping to 255");
            u8::MAX
        });
        skin.weights[slot] = weight as u8;
    }
    skin.weights[0] += (255 - weight * bone_count as u32) as u8;
    skin
}

/// Per-vertex skin bytes for `geoset`, `SKIN_STRIDE` bytes per vertex.
///
/// An explicit skin of the right size is returned unchanged; otherwise the bone
/// groups are expanded through each vertex's group index.
pub fn normalize(geoset_index: usize, geoset: &Geoset) -> Result<Vec<u8>> {
    let vertex_count = geoset.vertices.len();
    if !geoset.skin.is_empty() {
        if geoset.skin.len() == vertex_count * SKIN_STRIDE {
            return Ok(geoset.skin.clone());
        }
        warn!(
            "geoset {geoset_index}: skin holds {} bytes for {vertex_count} vertices, rebuilding it from bone groups",
            geoset.skin.len()
        );
    }

    let groups = group_table(geoset_index, geoset)?;
    if geoset.vertex_groups.len() != vertex_count {
        return Err(ModelError::InvalidSkin {
            geoset: geoset_index,
            reason: format!(
                "{} vertex groups for {vertex_count} vertices",
                geoset.vertex_groups.len()
            ),
        });
    }

    let mut skin = Vec::with_capacity(vertex_count * SKIN_STRIDE);
    for &group in &geoset.vertex_groups {
        let weights = groups
            .get(group as usize)
            .ok_or_else(|| ModelError::InvalidSkin {
                geoset: geoset_index,
                reason: format!(
                    "vertex group {group} is outside of the {} matrix groups",
                    groups.len()
                ),
            })?;
        skin.extend_from_slice(&weights.to_bytes());
    }
    Ok(skin)
}

fn group_table(geoset_index: usize, geoset: &Geoset) -> Result<Vec<SkinWeights>> {
    let mut offset = 0usize;
    let mut groups = Vec::with_capacity(geoset.matrix_groups.len());
    for &size in &geoset.matrix_groups {
        let end = offset + size as usize;
        let members = geoset
            .matrix_indices
            .get(offset..end)
            .ok_or_else(|| ModelError::InvalidSkin {
                geoset: geoset_index,
                reason: format!(
                    "matrix group needs indices {offset}..{end} but only {} exist",
                    geoset.matrix_indices.len()
                ),
            })?;
        groups.push(group_weights(members));
        offset = end;
    }
    Ok(groups)
}

