//! MDX (`MDLX`) decoding.
//!
//! The container is a magic followed by `tag[4] + u32 size` chunks. Chunks this
//! crate does not render (lights, emitters, collision shapes, ...) are skipped by
//! their declared size. Inside the chunks that are read, every material, layer,
//! geoset, geoset animation and node record is prefixed with its inclusive size,
//! so an unknown animation track simply ends that record and the reader moves on
//! to the next one.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};

use crate::{
    data_structures::model::{
        BlendMode, Bone, Extent, Geoset, GeosetAnimation, Interpolation, Key, Layer, Material,
        Model, Node, Sequence, ShadingFlags, TextureReference, Track,
    },
    error::{ModelError, Result},
};

const KNOWN_VERSIONS: [u32; 4] = [800, 900, 1000, 1100];
const HD_SHADER: &str = "Shader_HD_DefaultUnit";

const EXTENT_SIZE: usize = 28;
const SEQUENCE_SIZE: usize = 80 + 6 * 4 + EXTENT_SIZE;
const TEXTURE_SIZE: usize = 4 + 260 + 4;

/// Little-endian cursor over a byte slice that reports absolute offsets on failure.
pub(crate) struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
    base: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            base: 0,
        }
    }

    fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    fn offset(&self) -> usize {
        self.base + self.position()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.len().saturating_sub(self.position())
    }

    fn ensure(&self, bytes: usize, what: &'static str) -> Result<()> {
        if bytes > self.remaining() {
            return Err(ModelError::eof(self.offset(), what));
        }
        Ok(())
    }

    fn u8(&mut self, what: &'static str) -> Result<u8> {
        let offset = self.offset();
        self.cursor.read_u8().map_err(|_| ModelError::eof(offset, what))
    }

    fn u16(&mut self, what: &'static str) -> Result<u16> {
        let offset = self.offset();
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| ModelError::eof(offset, what))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32> {
        let offset = self.offset();
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| ModelError::eof(offset, what))
    }

    fn i32(&mut self, what: &'static str) -> Result<i32> {
        let offset = self.offset();
        self.cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| ModelError::eof(offset, what))
    }

    fn f32(&mut self, what: &'static str) -> Result<f32> {
        let offset = self.offset();
        self.cursor
            .read_f32::<LittleEndian>()
            .map_err(|_| ModelError::eof(offset, what))
    }

    fn vec2(&mut self, what: &'static str) -> Result<[f32; 2]> {
        Ok([self.f32(what)?, self.f32(what)?])
    }

    fn vec3(&mut self, what: &'static str) -> Result<[f32; 3]> {
        Ok([self.f32(what)?, self.f32(what)?, self.f32(what)?])
    }

    fn vec4(&mut self, what: &'static str) -> Result<[f32; 4]> {
        Ok([
            self.f32(what)?,
            self.f32(what)?,
            self.f32(what)?,
            self.f32(what)?,
        ])
    }

    fn tag(&mut self, what: &'static str) -> Result<[u8; 4]> {
        let offset = self.offset();
        let mut tag = [0u8; 4];
        self.cursor
            .read_exact(&mut tag)
            .map_err(|_| ModelError::eof(offset, what))?;
        Ok(tag)
    }

    fn peek_tag(&self) -> Option<[u8; 4]> {
        let data = *self.cursor.get_ref();
        let position = self.position();
        data.get(position..position + 4)
            .map(|bytes| [bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn expect_tag(&mut self, expected: &'static str) -> Result<()> {
        let offset = self.offset();
        let tag = self.tag(expected)?;
        if tag != expected.as_bytes() {
            return Err(ModelError::UnexpectedTag {
                expected,
                found: tag_name(&tag),
                offset,
            });
        }
        Ok(())
    }

    /// Reads a fixed-size, NUL-terminated text field.
    fn fixed_string(&mut self, len: usize, what: &'static str) -> Result<String> {
        let bytes = self.bytes(len, what)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    fn bytes(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        self.ensure(len, what)?;
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.position();
        self.cursor.set_position((start + len) as u64);
        Ok(&data[start..start + len])
    }

    /// Splits off the next `len` bytes as an independent reader and advances past them.
    fn sub_reader(&mut self, len: usize, what: &'static str) -> Result<Reader<'a>> {
        let base = self.offset();
        let bytes = self.bytes(len, what)?;
        Ok(Reader {
            cursor: Cursor::new(bytes),
            base,
        })
    }

    /// Reads a `u32` element count and checks that `count * element_size` bytes follow.
    fn count(&mut self, element_size: usize, what: &'static str) -> Result<usize> {
        let count = self.u32(what)? as usize;
        self.ensure(count.saturating_mul(element_size), what)?;
        Ok(count)
    }

    /// Number of `record_size` records filling the rest of a chunk. A partial
    /// record at the end is an error.
    fn record_count(&self, record_size: usize, what: &'static str) -> Result<usize> {
        let remaining = self.remaining();
        let partial = remaining % record_size;
        if partial != 0 {
            return Err(ModelError::eof(self.offset() + remaining - partial, what));
        }
        Ok(remaining / record_size)
    }

    fn array<T>(
        &mut self,
        element_size: usize,
        what: &'static str,
        mut read: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let count = self.count(element_size, what)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }

    fn extent(&mut self) -> Result<Extent> {
        Ok(Extent {
            bounds_radius: self.f32("extent radius")?,
            minimum: self.vec3("extent minimum")?,
            maximum: self.vec3("extent maximum")?,
        })
    }

    /// Reads an inclusive-size record header and returns a reader over the record body.
    fn record(&mut self, what: &'static str) -> Result<Reader<'a>> {
        let size = self.u32(what)? as usize;
        self.sub_reader(size.saturating_sub(4), what)
    }
}

fn tag_name(tag: &[u8]) -> String {
    String::from_utf8_lossy(tag).into_owned()
}

/// Picks the layout used to parse a file of the given version.
fn layout_version(version: u32) -> u32 {
    if KNOWN_VERSIONS.contains(&version) {
        return version;
    }
    let newest = KNOWN_VERSIONS[KNOWN_VERSIONS.len() - 1];
    let oldest = KNOWN_VERSIONS[0];
    if version > newest {
        warn!("MDX version {version} is newer than {newest}, parsing with the {newest} layout");
        newest
    } else if version < oldest {
        warn!("MDX version {version} predates {oldest}, parsing with the reduced {oldest} layout");
        oldest
    } else {
        let fallback = KNOWN_VERSIONS
            .iter()
            .copied()
            .filter(|&known| known < version)
            .max()
            .unwrap_or(oldest);
        warn!("unknown MDX version {version}, parsing with the {fallback} layout");
        fallback
    }
}

pub fn decode(data: &[u8]) -> Result<Model> {
    let mut reader = Reader::new(data);
    let magic = reader.tag("magic")?;
    if &magic != b"MDLX" {
        return Err(ModelError::BadMagic(magic));
    }

    let mut model = Model {
        version: 800,
        ..Default::default()
    };
    let mut version = 800;

    while reader.remaining() > 0 {
        if reader.remaining() < 8 {
            warn!(
                "ignoring {} trailing bytes after the last MDX chunk",
                reader.remaining()
            );
            break;
        }
        let tag = reader.tag("chunk tag")?;
        let size = reader.u32("chunk size")? as usize;
        let mut chunk = reader.sub_reader(size, "chunk body")?;
        match &tag {
            b"VERS" => {
                model.version = chunk.u32("version")?;
                version = layout_version(model.version);
            }
            b"MODL" => read_model_info(&mut chunk, &mut model)?,
            b"SEQS" => model.sequences = read_sequences(&mut chunk)?,
            b"GLBS" => {
                let count = chunk.record_count(4, "global sequence")?;
                model.global_sequences = (0..count)
                    .map(|_| chunk.u32("global sequence"))
                    .collect::<Result<_>>()?;
            }
            b"TEXS" => model.textures = read_textures(&mut chunk)?,
            b"MTLS" => model.materials = read_materials(&mut chunk, version)?,
            b"GEOS" => model.geosets = read_geosets(&mut chunk, version)?,
            b"GEOA" => model.animations = read_geoset_animations(&mut chunk)?,
            b"BONE" => model.bones = read_bones(&mut chunk)?,
            b"HELP" => {
                while chunk.remaining() > 0 {
                    model.helpers.push(read_node(&mut chunk)?);
                }
            }
            b"PIVT" => {
                let count = chunk.record_count(12, "pivot")?;
                model.pivots = (0..count)
                    .map(|_| chunk.vec3("pivot"))
                    .collect::<Result<_>>()?;
            }
            _ => debug!("skipping MDX chunk {} ({} bytes)", tag_name(&tag), size),
        }
    }

    let pivots = model.pivots.clone();
    let nodes = model
        .bones
        .iter_mut()
        .map(|bone| &mut bone.node)
        .chain(model.helpers.iter_mut());
    for node in nodes {
        if let Some(pivot) = usize::try_from(node.object_id)
            .ok()
            .and_then(|id| pivots.get(id))
        {
            node.pivot = *pivot;
        }
    }

    Ok(model)
}

fn read_model_info(chunk: &mut Reader, model: &mut Model) -> Result<()> {
    model.name = chunk.fixed_string(80, "model name")?;
    model.animation_file = chunk.fixed_string(260, "animation file name")?;
    model.extent = chunk.extent()?;
    model.blend_time = chunk.u32("blend time")?;
    Ok(())
}

fn read_sequences(chunk: &mut Reader) -> Result<Vec<Sequence>> {
    let count = chunk.record_count(SEQUENCE_SIZE, "sequence")?;
    let mut sequences = Vec::with_capacity(count);
    for _ in 0..count {
        sequences.push(Sequence {
            name: chunk.fixed_string(80, "sequence name")?,
            start: chunk.u32("sequence start")?,
            end: chunk.u32("sequence end")?,
            move_speed: chunk.f32("sequence move speed")?,
            flags: chunk.u32("sequence flags")?,
            rarity: chunk.f32("sequence rarity")?,
            sync_point: chunk.u32("sequence sync point")?,
            extent: chunk.extent()?,
        });
    }
    Ok(sequences)
}

fn read_textures(chunk: &mut Reader) -> Result<Vec<TextureReference>> {
    let count = chunk.record_count(TEXTURE_SIZE, "texture")?;
    let mut textures = Vec::with_capacity(count);
    for _ in 0..count {
        textures.push(TextureReference {
            replaceable_id: chunk.u32("replaceable id")?,
            file_name: chunk.fixed_string(260, "texture file name")?,
            flags: chunk.u32("texture flags")?,
        });
    }
    Ok(textures)
}

fn read_track<T: Clone>(
    reader: &mut Reader,
    value_size: usize,
    read_value: impl Fn(&mut Reader) -> Result<T>,
) -> Result<Track<T>> {
    let count = reader.u32("track key count")? as usize;
    let interpolation = Interpolation::from_raw(reader.u32("track interpolation")?);
    let global_sequence_id = reader.i32("track global sequence")?;
    let key_size = 4 + value_size * if interpolation.has_tangents() { 3 } else { 1 };
    reader.ensure(count.saturating_mul(key_size), "track keys")?;

    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        let frame = reader.i32("key frame")?;
        let value = read_value(reader)?;
        let (in_tan, out_tan) = if interpolation.has_tangents() {
            (read_value(reader)?, read_value(reader)?)
        } else {
            (value.clone(), value.clone())
        };
        keys.push(Key {
            frame,
            value,
            in_tan,
            out_tan,
        });
    }
    Ok(Track {
        interpolation,
        global_sequence_id,
        keys,
    })
}

fn read_f32_value(reader: &mut Reader) -> Result<f32> {
    reader.f32("track value")
}

fn read_u32_value(reader: &mut Reader) -> Result<u32> {
    reader.u32("track value")
}

fn read_vec3_value(reader: &mut Reader) -> Result<[f32; 3]> {
    reader.vec3("track value")
}

fn read_vec4_value(reader: &mut Reader) -> Result<[f32; 4]> {
    reader.vec4("track value")
}

fn read_materials(chunk: &mut Reader, version: u32) -> Result<Vec<Material>> {
    let mut materials = Vec::new();
    while chunk.remaining() > 0 {
        let mut record = chunk.record("material")?;
        let mut material = Material {
            priority_plane: record.i32("priority plane")?,
            flags: record.u32("material flags")?,
            ..Default::default()
        };
        if version > 800 {
            material.shader = record.fixed_string(80, "material shader")?;
        }

        record.expect_tag("LAYS")?;
        let count = record.count(4, "layer count")?;
        let hd_shader = material.shader == HD_SHADER;
        for _ in 0..count {
            let mut layer_record = record.record("layer")?;
            material
                .layers
                .push(read_layer(&mut layer_record, version, hd_shader)?);
        }
        materials.push(material);
    }
    Ok(materials)
}

fn read_layer(record: &mut Reader, version: u32, hd_shader: bool) -> Result<Layer> {
    let raw_blend = record.u32("layer filter mode")?;
    let blend_mode = BlendMode::from_raw(raw_blend).unwrap_or_else(|| {
        warn!("unknown layer filter mode {raw_blend}, drawing the layer as opaque");
        BlendMode::None
    });
    let mut layer = Layer {
        blend_mode,
        shading_flags: ShadingFlags(record.u32("layer shading flags")?),
        ..Default::default()
    };
    let texture_id = record.u32("layer texture id")?;
    layer.texture_animation_id = record.i32("layer texture animation id")?;
    layer.coord_id = record.u32("layer coord id")?;
    layer.alpha = record.f32("layer alpha")?;

    if version > 800 {
        layer.emissive_gain = record.f32("layer emissive gain")?;
    }
    if version > 900 {
        record.vec3("layer fresnel color")?;
        record.f32("layer fresnel opacity")?;
        record.f32("layer fresnel team color")?;
    }

    if version > 1000 {
        layer.hd = record.u32("layer hd flag")? != 0;
        let count = record.count(4, "layer texture count")?;
        for _ in 0..count {
            layer.textures.push(record.u32("layer texture")?);
            if record.peek_tag().as_ref() == Some(b"KMTF") {
                record.tag("KMTF")?;
                read_track(record, 4, read_u32_value)?;
            }
        }
    } else {
        layer.hd = version > 800 && hd_shader;
        layer.textures.push(texture_id);
    }

    while record.remaining() >= 4 {
        let tag = record.tag("layer track tag")?;
        match &tag {
            b"KMTA" => layer.alpha_track = Some(read_track(record, 4, read_f32_value)?),
            b"KMTF" => {
                read_track(record, 4, read_u32_value)?;
            }
            b"KMTE" | b"KFCA" | b"KFTC" => {
                read_track(record, 4, read_f32_value)?;
            }
            b"KFC3" => {
                read_track(record, 12, read_vec3_value)?;
            }
            _ => {
                warn!(
                    "unknown layer track {}, skipping the rest of the layer",
                    tag_name(&tag)
                );
                break;
            }
        }
    }

    Ok(layer)
}

fn read_geosets(chunk: &mut Reader, version: u32) -> Result<Vec<Geoset>> {
    let mut geosets = Vec::new();
    while chunk.remaining() > 0 {
        let mut record = chunk.record("geoset")?;
        geosets.push(read_geoset(&mut record, version)?);
    }
    Ok(geosets)
}

fn read_geoset(record: &mut Reader, version: u32) -> Result<Geoset> {
    let mut geoset = Geoset::default();

    record.expect_tag("VRTX")?;
    geoset.vertices = record.array(12, "vertices", |r| r.vec3("vertex"))?;
    record.expect_tag("NRMS")?;
    geoset.normals = record.array(12, "normals", |r| r.vec3("normal"))?;
    record.expect_tag("PTYP")?;
    geoset.face_types = record.array(4, "face types", |r| r.u32("face type"))?;
    record.expect_tag("PCNT")?;
    geoset.face_groups = record.array(4, "face groups", |r| r.u32("face group"))?;
    record.expect_tag("PVTX")?;
    geoset.faces = record.array(2, "faces", |r| r.u16("face index"))?;
    record.expect_tag("GNDX")?;
    geoset.vertex_groups = record.array(1, "vertex groups", |r| r.u8("vertex group"))?;
    record.expect_tag("MTGC")?;
    geoset.matrix_groups = record.array(4, "matrix groups", |r| r.u32("matrix group"))?;
    record.expect_tag("MATS")?;
    geoset.matrix_indices = record.array(4, "matrix indices", |r| r.u32("matrix index"))?;

    if geoset.face_types.iter().any(|&kind| kind != 4) {
        warn!("geoset uses non-triangle primitives, they are drawn as triangle lists");
    }

    geoset.material_id = record.u32("geoset material id")?;
    geoset.selection_group = record.u32("geoset selection group")?;
    geoset.selection_flags = record.u32("geoset selection flags")?;
    if version > 800 {
        geoset.lod = record.u32("geoset lod")?;
        geoset.lod_name = record.fixed_string(80, "geoset lod name")?;
    }
    geoset.extent = record.extent()?;
    geoset.sequence_extents = record.array(EXTENT_SIZE, "geoset extents", |r| r.extent())?;

    if version > 800 {
        if record.peek_tag().as_ref() == Some(b"TANG") {
            record.tag("TANG")?;
            geoset.tangents = record.array(16, "tangents", |r| r.vec4("tangent"))?;
        }
        if record.peek_tag().as_ref() == Some(b"SKIN") {
            record.tag("SKIN")?;
            let count = record.count(1, "skin weights")?;
            geoset.skin = record.bytes(count, "skin weights")?.to_vec();
        }
    }

    record.expect_tag("UVAS")?;
    let sets = record.count(4, "uv sets")?;
    for _ in 0..sets {
        record.expect_tag("UVBS")?;
        geoset
            .uv_sets
            .push(record.array(8, "uvs", |r| r.vec2("uv"))?);
    }

    Ok(geoset)
}

fn bgr(value: [f32; 3]) -> [f32; 3] {
    [value[2], value[1], value[0]]
}

fn read_geoset_animations(chunk: &mut Reader) -> Result<Vec<GeosetAnimation>> {
    let mut animations = Vec::new();
    while chunk.remaining() > 0 {
        let mut record = chunk.record("geoset animation")?;
        let mut animation = GeosetAnimation {
            alpha: record.f32("geoset animation alpha")?,
            flags: record.u32("geoset animation flags")?,
            color: bgr(record.vec3("geoset animation color")?),
            geoset_id: record.u32("geoset animation geoset id")?,
            alpha_track: None,
            color_track: None,
        };
        while record.remaining() >= 4 {
            let tag = record.tag("geoset animation track tag")?;
            match &tag {
                b"KGAO" => animation.alpha_track = Some(read_track(&mut record, 4, read_f32_value)?),
                b"KGAC" => {
                    let mut track = read_track(&mut record, 12, read_vec3_value)?;
                    for key in &mut track.keys {
                        key.value = bgr(key.value);
                        key.in_tan = bgr(key.in_tan);
                        key.out_tan = bgr(key.out_tan);
                    }
                    animation.color_track = Some(track);
                }
                _ => {
                    warn!(
                        "unknown geoset animation track {}, skipping the rest of the record",
                        tag_name(&tag)
                    );
                    break;
                }
            }
        }
        animations.push(animation);
    }
    Ok(animations)
}

fn read_node(chunk: &mut Reader) -> Result<Node> {
    let mut record = chunk.record("node")?;
    let mut node = Node {
        name: record.fixed_string(80, "node name")?,
        object_id: record.i32("node object id")?,
        parent_id: record.i32("node parent id")?,
        flags: record.u32("node flags")?,
        ..Default::default()
    };
    while record.remaining() >= 4 {
        let tag = record.tag("node track tag")?;
        match &tag {
            b"KGTR" => node.translation = Some(read_track(&mut record, 12, read_vec3_value)?),
            b"KGRT" => node.rotation = Some(read_track(&mut record, 16, read_vec4_value)?),
            b"KGSC" => node.scale = Some(read_track(&mut record, 12, read_vec3_value)?),
            _ => {
                warn!(
                    "unknown track {} on node {}, skipping the rest of the node",
                    tag_name(&tag),
                    node.name
                );
                break;
            }
        }
    }
    Ok(node)
}

fn read_bones(chunk: &mut Reader) -> Result<Vec<Bone>> {
    let mut bones = Vec::new();
    while chunk.remaining() > 0 {
        let node = read_node(chunk)?;
        bones.push(Bone {
            node,
            geoset_id: chunk.i32("bone geoset id")?,
            geoset_animation_id: chunk.i32("bone geoset animation id")?,
        });
    }
    Ok(bones)
}
