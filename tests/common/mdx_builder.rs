use byteorder::{LittleEndian, WriteBytesExt};

/// Writes small but well-formed MDX files, chunk by chunk.
#[derive(Clone, Debug)]
pub struct MdxBuilder {
    pub version: u32,
    pub name: String,
    pub sequences: Vec<SequenceSpec>,
    pub global_sequences: Vec<u32>,
    pub textures: Vec<TextureSpec>,
    pub materials: Vec<MaterialSpec>,
    pub geosets: Vec<GeosetSpec>,
    pub animations: Vec<GeosetAnimationSpec>,
    pub bones: Vec<BoneSpec>,
    pub pivots: Vec<[f32; 3]>,
    /// Chunks written verbatim after the known ones.
    pub raw_chunks: Vec<([u8; 4], Vec<u8>)>,
}

#[derive(Clone, Debug)]
pub struct SequenceSpec {
    pub name: String,
    pub start: u32,
    pub end: u32,
    pub flags: u32,
    pub minimum: [f32; 3],
    pub maximum: [f32; 3],
}

#[derive(Clone, Debug)]
pub struct TextureSpec {
    pub replaceable_id: u32,
    pub file_name: String,
    pub flags: u32,
}

#[derive(Clone, Debug, Default)]
pub struct MaterialSpec {
    pub shader: String,
    pub layers: Vec<LayerSpec>,
}

#[derive(Clone, Debug)]
pub struct LayerSpec {
    pub blend_mode: u32,
    pub shading_flags: u32,
    pub textures: Vec<u32>,
    pub alpha: f32,
    pub hd: bool,
    /// Linear `KMTA` keys.
    pub alpha_keys: Vec<(i32, f32)>,
    /// Written after the known tracks; must be four bytes of tag plus its payload.
    pub trailing: Vec<u8>,
}

impl Default for LayerSpec {
    fn default() -> Self {
        Self {
            blend_mode: 0,
            shading_flags: 0,
            textures: vec![0],
            alpha: 1.0,
            hd: false,
            alpha_keys: Vec::new(),
            trailing: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GeosetSpec {
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub faces: Vec<u16>,
    pub vertex_groups: Vec<u8>,
    pub matrix_groups: Vec<u32>,
    pub matrix_indices: Vec<u32>,
    pub material_id: u32,
    pub lod: u32,
    pub uvs: Vec<[f32; 2]>,
    pub skin: Option<Vec<u8>>,
}

impl GeosetSpec {
    /// One triangle in the XY plane, every vertex in bone group 0.
    pub fn triangle(material_id: u32, group: &[u32]) -> Self {
        Self {
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            faces: vec![0, 1, 2],
            vertex_groups: vec![0; 3],
            matrix_groups: vec![group.len() as u32],
            matrix_indices: group.to_vec(),
            material_id,
            lod: 0,
            uvs: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            skin: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GeosetAnimationSpec {
    pub alpha: f32,
    /// RGB; written in the on-disk BGR order.
    pub color: [f32; 3],
    pub geoset_id: u32,
}

#[derive(Clone, Debug)]
pub struct BoneSpec {
    pub name: String,
    pub object_id: i32,
    pub parent_id: i32,
    /// Linear `KGTR` keys.
    pub translation_keys: Vec<(i32, [f32; 3])>,
}

impl BoneSpec {
    pub fn new(name: &str, object_id: i32, parent_id: i32) -> Self {
        Self {
            name: name.to_string(),
            object_id,
            parent_id,
            translation_keys: Vec::new(),
        }
    }
}

impl Default for MdxBuilder {
    fn default() -> Self {
        Self {
            version: 800,
            name: "Test".to_string(),
            sequences: Vec::new(),
            global_sequences: Vec::new(),
            textures: Vec::new(),
            materials: Vec::new(),
            geosets: Vec::new(),
            animations: Vec::new(),
            bones: Vec::new(),
            pivots: Vec::new(),
            raw_chunks: Vec::new(),
        }
    }
}

fn fixed(out: &mut Vec<u8>, text: &str, len: usize) {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(len, 0);
    out.extend_from_slice(&bytes);
}

fn f32s(out: &mut Vec<u8>, values: &[f32]) {
    for &value in values {
        out.write_f32::<LittleEndian>(value).unwrap();
    }
}

fn u32(out: &mut Vec<u8>, value: u32) {
    out.write_u32::<LittleEndian>(value).unwrap();
}

fn i32(out: &mut Vec<u8>, value: i32) {
    out.write_i32::<LittleEndian>(value).unwrap();
}

fn extent(out: &mut Vec<u8>, minimum: [f32; 3], maximum: [f32; 3]) {
    f32s(out, &[1.0]);
    f32s(out, &minimum);
    f32s(out, &maximum);
}

/// Prefixes `body` with its inclusive size.
fn record(out: &mut Vec<u8>, body: &[u8]) {
    u32(out, body.len() as u32 + 4);
    out.extend_from_slice(body);
}

fn chunk(out: &mut Vec<u8>, tag: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(tag);
    u32(out, body.len() as u32);
    out.extend_from_slice(body);
}

/// A linear track of `values` per key.
fn linear_track(out: &mut Vec<u8>, tag: &[u8; 4], keys: &[(i32, Vec<f32>)]) {
    out.extend_from_slice(tag);
    u32(out, keys.len() as u32);
    u32(out, 1);
    i32(out, -1);
    for (frame, values) in keys {
        i32(out, *frame);
        f32s(out, values);
    }
}

impl MdxBuilder {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    /// A single opaque triangle skinned to two bones, no sequences.
    pub fn triangle() -> Self {
        let mut builder = Self::new(800);
        builder.textures.push(TextureSpec {
            replaceable_id: 0,
            file_name: "Textures/Test.blp".to_string(),
            flags: 0,
        });
        builder.materials.push(MaterialSpec {
            shader: String::new(),
            layers: vec![LayerSpec::default()],
        });
        builder.geosets.push(GeosetSpec::triangle(0, &[0, 1]));
        builder.bones.push(BoneSpec::new("Root", 0, -1));
        builder.bones.push(BoneSpec::new("Child", 1, 0));
        builder.pivots = vec![[0.0; 3], [0.0, 0.0, 1.0]];
        builder
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = b"MDLX".to_vec();
        let version = self.version;

        let mut body = Vec::new();
        u32(&mut body, version);
        chunk(&mut out, b"VERS", &body);

        let mut body = Vec::new();
        fixed(&mut body, &self.name, 80);
        fixed(&mut body, "", 260);
        extent(&mut body, [-1.0; 3], [1.0; 3]);
        u32(&mut body, 150);
        chunk(&mut out, b"MODL", &body);

        if !self.sequences.is_empty() {
            let mut body = Vec::new();
            for sequence in &self.sequences {
                fixed(&mut body, &sequence.name, 80);
                u32(&mut body, sequence.start);
                u32(&mut body, sequence.end);
                f32s(&mut body, &[0.0]);
                u32(&mut body, sequence.flags);
                f32s(&mut body, &[0.0]);
                u32(&mut body, 0);
                extent(&mut body, sequence.minimum, sequence.maximum);
            }
            chunk(&mut out, b"SEQS", &body);
        }

        if !self.global_sequences.is_empty() {
            let mut body = Vec::new();
            for &duration in &self.global_sequences {
                u32(&mut body, duration);
            }
            chunk(&mut out, b"GLBS", &body);
        }

        if !self.textures.is_empty() {
            let mut body = Vec::new();
            for texture in &self.textures {
                u32(&mut body, texture.replaceable_id);
                fixed(&mut body, &texture.file_name, 260);
                u32(&mut body, texture.flags);
            }
            chunk(&mut out, b"TEXS", &body);
        }

        if !self.materials.is_empty() {
            let mut body = Vec::new();
            for material in &self.materials {
                record(&mut body, &self.material(material));
            }
            chunk(&mut out, b"MTLS", &body);
        }

        if !self.geosets.is_empty() {
            let mut body = Vec::new();
            for geoset in &self.geosets {
                record(&mut body, &self.geoset(geoset));
            }
            chunk(&mut out, b"GEOS", &body);
        }

        if !self.animations.is_empty() {
            let mut body = Vec::new();
            for animation in &self.animations {
                let mut inner = Vec::new();
                f32s(&mut inner, &[animation.alpha]);
                u32(&mut inner, 0);
                let [r, g, b] = animation.color;
                f32s(&mut inner, &[b, g, r]);
                u32(&mut inner, animation.geoset_id);
                record(&mut body, &inner);
            }
            chunk(&mut out, b"GEOA", &body);
        }

        if !self.bones.is_empty() {
            let mut body = Vec::new();
            for bone in &self.bones {
                let mut node = Vec::new();
                fixed(&mut node, &bone.name, 80);
                i32(&mut node, bone.object_id);
                i32(&mut node, bone.parent_id);
                u32(&mut node, 0x100);
                if !bone.translation_keys.is_empty() {
                    let keys: Vec<(i32, Vec<f32>)> = bone
                        .translation_keys
                        .iter()
                        .map(|(frame, value)| (*frame, value.to_vec()))
                        .collect();
                    linear_track(&mut node, b"KGTR", &keys);
                }
                record(&mut body, &node);
                i32(&mut body, -1);
                i32(&mut body, -1);
            }
            chunk(&mut out, b"BONE", &body);
        }

        if !self.pivots.is_empty() {
            let mut body = Vec::new();
            for pivot in &self.pivots {
                f32s(&mut body, pivot);
            }
            chunk(&mut out, b"PIVT", &body);
        }

        for (tag, body) in &self.raw_chunks {
            chunk(&mut out, tag, body);
        }
        out
    }

    fn material(&self, material: &MaterialSpec) -> Vec<u8> {
        let mut body = Vec::new();
        i32(&mut body, 0);
        u32(&mut body, 0);
        if self.version > 800 {
            fixed(&mut body, &material.shader, 80);
        }
        body.extend_from_slice(b"LAYS");
        u32(&mut body, material.layers.len() as u32);
        for layer in &material.layers {
            record(&mut body, &self.layer(layer));
        }
        body
    }

    fn layer(&self, layer: &LayerSpec) -> Vec<u8> {
        let mut body = Vec::new();
        u32(&mut body, layer.blend_mode);
        u32(&mut body, layer.shading_flags);
        u32(&mut body, layer.textures.first().copied().unwrap_or(0));
        i32(&mut body, -1);
        u32(&mut body, 0);
        f32s(&mut body, &[layer.alpha]);
        if self.version > 800 {
            f32s(&mut body, &[1.0]);
        }
        if self.version > 900 {
            f32s(&mut body, &[1.0, 1.0, 1.0, 0.0, 0.0]);
        }
        if self.version > 1000 {
            u32(&mut body, layer.hd as u32);
            u32(&mut body, layer.textures.len() as u32);
            for &texture in &layer.textures {
                u32(&mut body, texture);
            }
        }
        if !layer.alpha_keys.is_empty() {
            let keys: Vec<(i32, Vec<f32>)> = layer
                .alpha_keys
                .iter()
                .map(|(frame, alpha)| (*frame, vec![*alpha]))
                .collect();
            linear_track(&mut body, b"KMTA", &keys);
        }
        body.extend_from_slice(&layer.trailing);
        body
    }

    fn geoset(&self, geoset: &GeosetSpec) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"VRTX");
        u32(&mut body, geoset.vertices.len() as u32);
        for vertex in &geoset.vertices {
            f32s(&mut body, vertex);
        }
        body.extend_from_slice(b"NRMS");
        u32(&mut body, geoset.normals.len() as u32);
        for normal in &geoset.normals {
            f32s(&mut body, normal);
        }
        body.extend_from_slice(b"PTYP");
        u32(&mut body, 1);
        u32(&mut body, 4);
        body.extend_from_slice(b"PCNT");
        u32(&mut body, 1);
        u32(&mut body, geoset.faces.len() as u32);
        body.extend_from_slice(b"PVTX");
        u32(&mut body, geoset.faces.len() as u32);
        for &face in &geoset.faces {
            body.write_u16::<LittleEndian>(face).unwrap();
        }
        body.extend_from_slice(b"GNDX");
        u32(&mut body, geoset.vertex_groups.len() as u32);
        body.extend_from_slice(&geoset.vertex_groups);
        body.extend_from_slice(b"MTGC");
        u32(&mut body, geoset.matrix_groups.len() as u32);
        for &group in &geoset.matrix_groups {
            u32(&mut body, group);
        }
        body.extend_from_slice(b"MATS");
        u32(&mut body, geoset.matrix_indices.len() as u32);
        for &index in &geoset.matrix_indices {
            u32(&mut body, index);
        }

        u32(&mut body, geoset.material_id);
        u32(&mut body, 0);
        u32(&mut body, 0);
        if self.version > 800 {
            u32(&mut body, geoset.lod);
            fixed(&mut body, "", 80);
        }
        extent(&mut body, [0.0; 3], [1.0, 1.0, 0.0]);
        u32(&mut body, 0);

        if self.version > 800 {
            if let Some(skin) = &geoset.skin {
                body.extend_from_slice(b"SKIN");
                u32(&mut body, skin.len() as u32);
                body.extend_from_slice(skin);
            }
        }

        body.extend_from_slice(b"UVAS");
        u32(&mut body, 1);
        body.extend_from_slice(b"UVBS");
        u32(&mut body, geoset.uvs.len() as u32);
        for uv in &geoset.uvs {
            f32s(&mut body, uv);
        }
        body
    }
}
