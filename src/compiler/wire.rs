//! Fixed-layout structures handed to the render backend.

use anyhow::{Result, bail, ensure};

use super::mapping::{AttributeSlot, MaterialInputMappings, TextureSlot};
use super::types::{GeometrySource, INVALID_MAPPING, OutputFlags, Pass, TextureSource};

pub const WIRE_MAX_TEXTURES: usize = 6;
pub const WIRE_MAX_ATTRIB_ARRAYS: usize = 8;
pub const WIRE_MAX_TC_INDICES: usize = 6;

/// Backend view of [`MaterialInputMappings`]: every array has its platform length and
/// unused entries hold [`INVALID_MAPPING`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct WireInputMappings {
    pub tc_mods: [u8; WIRE_MAX_TC_INDICES],
    pub num_texture_sources: [u8; TextureSource::COUNT],
    pub num_geometry_sources: [u8; GeometrySource::COUNT],
    pub textures: [[u8; 2]; WIRE_MAX_TEXTURES],
    pub attributes: [[u8; 2]; WIRE_MAX_ATTRIB_ARRAYS],
}

impl WireInputMappings {
    pub fn from_mappings(m: &MaterialInputMappings) -> Result<Self> {
        ensure!(
            m.textures.len() <= WIRE_MAX_TEXTURES
                && m.attributes.len() <= WIRE_MAX_ATTRIB_ARRAYS
                && m.tc_mods.len() <= WIRE_MAX_TC_INDICES,
            "mapping does not fit the wire layout ({} textures, {} attributes, {} tc registers)",
            m.textures.len(),
            m.attributes.len(),
            m.tc_mods.len()
        );
        let mut w = WireInputMappings {
            tc_mods: [INVALID_MAPPING; WIRE_MAX_TC_INDICES],
            num_texture_sources: m.num_texture_sources,
            num_geometry_sources: m.num_geometry_sources,
            textures: [[INVALID_MAPPING; 2]; WIRE_MAX_TEXTURES],
            attributes: [[INVALID_MAPPING; 2]; WIRE_MAX_ATTRIB_ARRAYS],
        };
        w.tc_mods[..m.tc_mods.len()].copy_from_slice(&m.tc_mods);
        for (dst, t) in w.textures.iter_mut().zip(&m.textures) {
            *dst = [t.source as u8, t.index];
        }
        for (dst, a) in w.attributes.iter_mut().zip(&m.attributes) {
            *dst = [a.source as u8, a.index];
        }
        Ok(w)
    }

    /// Reads back the dense form; entries stop at the first sentinel.
    pub fn to_mappings(&self) -> Result<MaterialInputMappings> {
        let mut m = MaterialInputMappings {
            num_texture_sources: self.num_texture_sources,
            num_geometry_sources: self.num_geometry_sources,
            ..Default::default()
        };
        m.tc_mods = self
            .tc_mods
            .iter()
            .copied()
            .take_while(|&v| v != INVALID_MAPPING)
            .collect();
        for [source, index] in self.textures.iter().copied() {
            let source = match source {
                INVALID_MAPPING => break,
                0 => TextureSource::Texture,
                1 => TextureSource::Framebuffer,
                other => bail!("invalid texture source tag {other}"),
            };
            m.textures.push(TextureSlot { source, index });
        }
        for [source, index] in self.attributes.iter().copied() {
            let source = match source {
                INVALID_MAPPING => break,
                0 => GeometrySource::Vertices,
                1 => GeometrySource::Normals,
                2 => GeometrySource::Tangents,
                3 => GeometrySource::TexCoords,
                4 => GeometrySource::VertexColor,
                5 => GeometrySource::SpriteSkin,
                other => bail!("invalid geometry source tag {other}"),
            };
            m.attributes.push(AttributeSlot { source, index });
        }
        Ok(m)
    }
}

/// One compiled pass in a cooked shader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookedPass {
    pub pass: Pass,
    pub outputs: OutputFlags,
    pub mappings: WireInputMappings,
    pub vertex: String,
    pub fragment: String,
}

/// Serializes `passes` as `backend, count, { pass, outputs, mappings, len(vs), len(fs), vs\0, fs\0 }*`.
/// Integers are little endian.
pub fn write_cooked(backend: u8, passes: &[CookedPass]) -> Result<Vec<u8>> {
    let count = u8::try_from(passes.len())?;
    let mut out = vec![backend, count];
    for p in passes {
        out.push(u8::try_from(p.pass.index())?);
        out.push(p.outputs.0);
        out.extend_from_slice(bytemuck::bytes_of(&p.mappings));
        let vs_len = u32::try_from(p.vertex.len() + 1)?;
        let fs_len = u32::try_from(p.fragment.len() + 1)?;
        out.extend_from_slice(&vs_len.to_le_bytes());
        out.extend_from_slice(&fs_len.to_le_bytes());
        out.extend_from_slice(p.vertex.as_bytes());
        out.push(0);
        out.extend_from_slice(p.fragment.as_bytes());
        out.push(0);
    }
    Ok(out)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let Some(s) = self.bytes.get(self.pos..self.pos + n) else {
            bail!("cooked shader truncated at byte {}", self.pos);
        };
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn text(&mut self, len: u32) -> Result<String> {
        let raw = self.take(len as usize)?;
        let Some((&0, body)) = raw.split_last() else {
            bail!("cooked shader text is not NUL terminated");
        };
        Ok(String::from_utf8(body.to_vec())?)
    }
}

/// Parses the output of [`write_cooked`].
pub fn read_cooked(bytes: &[u8]) -> Result<(u8, Vec<CookedPass>)> {
    let mut r = Reader { bytes, pos: 0 };
    let backend = r.u8()?;
    let count = r.u8()?;
    let mut passes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let index = r.u8()?;
        let Some(pass) = Pass::from_index(index as usize) else {
            bail!("invalid pass index {index}");
        };
        let outputs = OutputFlags(r.u8()?);
        let mappings: WireInputMappings =
            bytemuck::pod_read_unaligned(r.take(std::mem::size_of::<WireInputMappings>())?);
        let vs_len = r.u32()?;
        let fs_len = r.u32()?;
        let vertex = r.text(vs_len)?;
        let fragment = r.text(fs_len)?;
        passes.push(CookedPass {
            pass,
            outputs,
            mappings,
            vertex,
            fragment,
        });
    }
    if r.pos != bytes.len() {
        bail!("{} trailing byte(s) after cooked shader", bytes.len() - r.pos);
    }
    Ok((backend, passes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MaterialInputMappings {
        let mut m = MaterialInputMappings {
            textures: vec![TextureSlot {
                source: TextureSource::Texture,
                index: 2,
            }],
            attributes: vec![
                AttributeSlot {
                    source: GeometrySource::Vertices,
                    index: 0,
                },
                AttributeSlot {
                    source: GeometrySource::TexCoords,
                    index: 1,
                },
            ],
            tc_mods: vec![2],
            ..Default::default()
        };
        m.num_texture_sources[TextureSource::Texture as usize] = 1;
        m.num_geometry_sources[GeometrySource::Vertices as usize] = 1;
        m.num_geometry_sources[GeometrySource::TexCoords as usize] = 1;
        m
    }

    #[test]
    fn unused_slots_hold_sentinel() {
        let w = WireInputMappings::from_mappings(&sample()).unwrap();
        assert_eq!(std::mem::size_of::<WireInputMappings>(), 42);
        assert_eq!(w.textures[0], [0, 2]);
        assert_eq!(w.textures[1], [INVALID_MAPPING; 2]);
        assert_eq!(w.attributes[1], [GeometrySource::TexCoords as u8, 1]);
        assert_eq!(w.attributes[7], [INVALID_MAPPING; 2]);
        assert_eq!(w.tc_mods, [2, 255, 255, 255, 255, 255]);
        assert_eq!(w.to_mappings().unwrap(), sample());
    }

    #[test]
    fn oversized_mapping_is_rejected() {
        let mut m = sample();
        m.tc_mods = vec![0; 7];
        assert!(WireInputMappings::from_mappings(&m).is_err());
    }

    #[test]
    fn cooked_layout() {
        let pass = CookedPass {
            pass: Pass::Fullbright,
            outputs: OutputFlags::COLOR,
            mappings: WireInputMappings::from_mappings(&sample()).unwrap(),
            vertex: "vs".to_string(),
            fragment: "fs!".to_string(),
        };
        let bytes = write_cooked(1, std::slice::from_ref(&pass)).unwrap();
        assert_eq!(&bytes[..4], &[1, 1, 9, 1]);
        let off = 4 + 42;
        assert_eq!(&bytes[off..off + 8], &[3, 0, 0, 0, 4, 0, 0, 0]);
        assert_eq!(&bytes[off + 8..], b"vs\0fs!\0");

        let (backend, passes) = read_cooked(&bytes).unwrap();
        assert_eq!(backend, 1);
        assert_eq!(passes, vec![pass]);
        assert!(read_cooked(&bytes[..bytes.len() - 1]).is_err());
    }
}
