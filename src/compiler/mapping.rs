//! Resource mapping: assigns texture units, vertex attribute arrays and texcoord registers.

use std::collections::BTreeSet;

use anyhow::Result;

use super::config::PlatformLimits;
use super::error::CompileError;
use super::material::{Material, TcGen};
use super::types::{GeometrySource, MaterialSource, Pass, SkinMode, TextureSource};
use super::usage::Usage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureSlot {
    pub source: TextureSource,
    pub index: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttributeSlot {
    pub source: GeometrySource,
    pub index: u8,
}

/// Hardware slot assignment for one pass.
///
/// Slots are stored densely; unused slots are absent here and only become the 255
/// sentinel at the wire boundary (see [`super::wire::WireInputMappings`]).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterialInputMappings {
    pub textures: Vec<TextureSlot>,
    pub attributes: Vec<AttributeSlot>,
    pub num_texture_sources: [u8; TextureSource::COUNT],
    pub num_geometry_sources: [u8; GeometrySource::COUNT],
    /// Canonical texture index per packed texcoord register.
    pub tc_mods: Vec<u8>,
}

impl MaterialInputMappings {
    pub fn texture(&self, unit: usize) -> Option<TextureSlot> {
        self.textures.get(unit).copied()
    }

    pub fn attribute(&self, slot: usize) -> Option<AttributeSlot> {
        self.attributes.get(slot).copied()
    }

    /// Texture unit bound to `(source, index)`.
    pub fn texture_unit(&self, source: TextureSource, index: u8) -> Option<usize> {
        self.textures
            .iter()
            .position(|t| t.source == source && t.index == index)
    }

    pub fn texture_source_count(&self, source: TextureSource) -> usize {
        self.num_texture_sources[source as usize] as usize
    }

    pub fn geometry_source_count(&self, source: GeometrySource) -> usize {
        self.num_geometry_sources[source as usize] as usize
    }

    fn push_texture(&mut self, source: TextureSource, index: u8) {
        self.textures.push(TextureSlot { source, index });
        self.num_texture_sources[source as usize] += 1;
    }

    fn push_attribute(&mut self, source: GeometrySource, index: u8) {
        self.attributes.push(AttributeSlot { source, index });
        self.num_geometry_sources[source as usize] += 1;
    }
}

/// Material-independent mapping for a pass.
pub fn build_input_mappings(
    usage: &Usage,
    pass: Pass,
    skin_mode: SkinMode,
    gen_reflect: bool,
    limits: &PlatformLimits,
) -> Result<MaterialInputMappings> {
    for source in MaterialSource::ALL.into_iter().filter(|s| s.is_light()) {
        if let Some(&index) = usage.indices(source).iter().next_back() {
            if index as usize >= limits.max_lights {
                return Err(CompileError::LightLimit {
                    index,
                    limit: limits.max_lights,
                }
                .into());
            }
        }
    }

    let textures = usage.count(MaterialSource::Texture) + usage.count(MaterialSource::Framebuffer);
    if textures > limits.max_textures {
        return Err(CompileError::TextureLimit {
            used: textures,
            limit: limits.max_textures,
        }
        .into());
    }

    // Forced entries go into copies so the reported usage stays what the graph referenced.
    let mut vertices = usage.indices(MaterialSource::Vertex).clone();
    vertices.insert(0);

    let mut normals = usage.indices(MaterialSource::Normal).clone();
    let mut tangents = usage.indices(MaterialSource::Tangent).clone();
    if usage.uses(MaterialSource::LightTanVec) || usage.uses(MaterialSource::LightTanHalfVec) {
        normals.insert(0);
        tangents.insert(0);
    }
    if gen_reflect {
        normals.insert(0);
    }

    let sprite_skin: BTreeSet<u8> = if pass != Pass::Preview && skin_mode == SkinMode::Sprite {
        let mut s = usage.indices(MaterialSource::SpriteSkin).clone();
        s.insert(0);
        s
    } else {
        BTreeSet::new()
    };

    let streams: [(GeometrySource, &BTreeSet<u8>); 5] = [
        (GeometrySource::Vertices, &vertices),
        (GeometrySource::Normals, &normals),
        (GeometrySource::Tangents, &tangents),
        (GeometrySource::VertexColor, usage.indices(MaterialSource::VertexColor)),
        (GeometrySource::SpriteSkin, &sprite_skin),
    ];
    let attributes: usize = streams.iter().map(|(_, s)| s.len()).sum();
    if attributes > limits.max_attrib_arrays {
        return Err(CompileError::AttributeLimit {
            used: attributes,
            limit: limits.max_attrib_arrays,
        }
        .into());
    }

    let mut mapping = MaterialInputMappings::default();
    for &index in usage.indices(MaterialSource::Texture) {
        mapping.push_texture(TextureSource::Texture, index);
    }
    for &index in usage.indices(MaterialSource::Framebuffer) {
        mapping.push_texture(TextureSource::Framebuffer, index);
    }
    for (source, set) in streams {
        for &index in set {
            mapping.push_attribute(source, index);
        }
    }

    log::debug!(
        "[mapping] {pass}: {} texture unit(s), {} attribute array(s)",
        mapping.textures.len(),
        mapping.attributes.len()
    );
    Ok(mapping)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TexCoordEntry {
    /// Texcoord index referenced by the graph.
    pub usage_index: u8,
    /// Packed register the vertex stage writes.
    pub register: u8,
    /// Texture index whose generator defines the register.
    pub canonical: u8,
}

/// Texcoord usage index to packed register, in ascending usage order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TexCoordMapping {
    pub entries: Vec<TexCoordEntry>,
}

impl TexCoordMapping {
    pub fn register_for(&self, usage_index: u8) -> Option<u8> {
        self.entries
            .iter()
            .find(|e| e.usage_index == usage_index)
            .map(|e| e.register)
    }

    pub fn register_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.register as usize + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Deduplicates texcoord generators: identity and envmap coordinates of the same UV
/// channel share one register (first seen wins); modified coordinates always get their own.
/// More registers than `limits.max_texcoords` fails with [`CompileError::TexCoordLimit`].
pub fn build_tex_coord_mapping(
    usage: &Usage,
    material: &Material,
    limits: &PlatformLimits,
) -> Result<TexCoordMapping> {
    let mut identity: Vec<(u8, Option<(usize, u8)>)> = Vec::new();
    let mut envmap: Vec<(u8, Option<(usize, u8)>)> = Vec::new();
    let mut next: usize = 0;
    let mut assigned: Vec<(u8, usize, u8)> = Vec::new();

    fn shared(table: &mut Vec<(u8, Option<(usize, u8)>)>, uv: u8) -> &mut Option<(usize, u8)> {
        let pos = match table.iter().position(|(k, _)| *k == uv) {
            Some(pos) => pos,
            None => {
                table.push((uv, None));
                table.len() - 1
            }
        };
        &mut table[pos].1
    }

    for &index in usage.indices(MaterialSource::TexCoord) {
        let stage = material.stage(index);
        let (register, canonical) = if stage.is_identity() {
            let table = match stage.tc_gen {
                TcGen::Vertex => &mut identity,
                TcGen::Envmap => &mut envmap,
            };
            let slot = shared(table, stage.uv);
            *slot.get_or_insert_with(|| {
                let r = next;
                next += 1;
                (r, index)
            })
        } else {
            let r = next;
            next += 1;
            (r, index)
        };
        assigned.push((index, register, canonical));
    }

    let limit = limits.max_texcoords.min(u8::MAX as usize);
    if next > limit {
        return Err(CompileError::TexCoordLimit { used: next, limit }.into());
    }
    let entries = assigned
        .into_iter()
        .map(|(usage_index, register, canonical)| TexCoordEntry {
            usage_index,
            register: register as u8,
            canonical,
        })
        .collect();
    Ok(TexCoordMapping { entries })
}

/// Extends a pass mapping with the material's texcoord registers and packs one
/// texcoord attribute array per referenced UV channel.
pub fn material_input_mappings(
    base: &MaterialInputMappings,
    usage: &Usage,
    material: &Material,
    limits: &PlatformLimits,
) -> Result<(MaterialInputMappings, TexCoordMapping)> {
    let tc_mapping = build_tex_coord_mapping(usage, material, limits)?;
    let mut mapping = base.clone();

    // One canonical usage index per register, in register order.
    mapping.tc_mods.clear();
    for e in &tc_mapping.entries {
        if !mapping.tc_mods.contains(&e.canonical) {
            mapping.tc_mods.push(e.canonical);
        }
    }

    let channels: BTreeSet<u8> = mapping
        .tc_mods
        .iter()
        .map(|&i| material.tc_uv_index(i))
        .collect();
    let used = mapping.attributes.len() + channels.len();
    if used > limits.max_attrib_arrays {
        return Err(CompileError::AttributeLimit {
            used,
            limit: limits.max_attrib_arrays,
        }
        .into());
    }
    for uv in channels {
        mapping.push_attribute(GeometrySource::TexCoords, uv);
    }
    Ok((mapping, tc_mapping))
}
