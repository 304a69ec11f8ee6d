use anyhow::{anyhow, Result};

use crate::engine::record::AssetKind;

/// `glTF` little-endian.
pub const GLB_MAGIC: u32 = 0x4654_6C67;
pub const GLB_CHUNK_JSON: u32 = 0x4E4F_534A;
pub const GLB_CHUNK_BIN: u32 = 0x004E_4942;

const GLB_HEADER_LEN: usize = 12;
const GLB_CHUNK_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFormat {
    Glb,
    GltfJson,
    Png,
    Jpeg,
    Ktx2,
    Unknown,
}

impl AssetFormat {
    /// Whether a file of this format can back an asset of `kind`.
    pub fn matches(self, kind: AssetKind) -> bool {
        match kind {
            AssetKind::Model => matches!(self, AssetFormat::Glb | AssetFormat::GltfJson),
            AssetKind::Texture => matches!(
                self,
                AssetFormat::Png | AssetFormat::Jpeg | AssetFormat::Ktx2
            ),
        }
    }
}

/// Detect asset format from the leading bytes of a file.
pub fn detect_format(header: &[u8]) -> AssetFormat {
    if header.len() >= 4 && read_u32(header, 0) == Some(GLB_MAGIC) {
        return AssetFormat::Glb;
    }

    if header.len() >= 8 && header[0..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return AssetFormat::Png;
    }

    if header.len() >= 3 && header[0..3] == [0xFF, 0xD8, 0xFF] {
        return AssetFormat::Jpeg;
    }

    // «KTX 20»\r\n\x1A\n
    if header.len() >= 12
        && header[0..12]
            == [0xAB, b'K', b'T', b'X', b' ', b'2', b'0', 0xBB, 0x0D, 0x0A, 0x1A, 0x0A]
    {
        return AssetFormat::Ktx2;
    }

    // JSON glTF: an object with an "asset" member near the start.
    let text_start = header
        .iter()
        .position(|b| !b.is_ascii_whitespace() && *b != 0xEF && *b != 0xBB && *b != 0xBF);
    if let Some(start) = text_start {
        if header[start] == b'{' {
            let window = &header[start..header.len().min(start + 4096)];
            if window.windows(7).any(|w| w == b"\"asset\"") {
                return AssetFormat::GltfJson;
            }
        }
    }

    AssetFormat::Unknown
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlbHeader {
    pub version: u32,
    pub length: u32,
}

/// Parse and check the 12-byte GLB header against the buffer size.
pub fn parse_glb_header(bytes: &[u8]) -> Result<GlbHeader> {
    if bytes.len() < GLB_HEADER_LEN {
        return Err(anyhow!("glb too short: {} bytes", bytes.len()));
    }
    let magic = read_u32(bytes, 0).unwrap_or(0);
    if magic != GLB_MAGIC {
        return Err(anyhow!("bad glb magic 0x{:08x}", magic));
    }
    let version = read_u32(bytes, 4).unwrap_or(0);
    if version != 2 {
        return Err(anyhow!("unsupported glb version {}", version));
    }
    let length = read_u32(bytes, 8).unwrap_or(0);
    if length as usize != bytes.len() {
        return Err(anyhow!(
            "glb length {} does not match buffer size {}",
            length,
            bytes.len()
        ));
    }
    Ok(GlbHeader { version, length })
}

/// Walk the GLB chunk table. Returns (offset, length) of the first chunk
/// payload of type `chunk_type`.
pub fn find_glb_chunk(bytes: &[u8], chunk_type: u32) -> Option<(usize, usize)> {
    let mut offset = GLB_HEADER_LEN;
    while offset + GLB_CHUNK_HEADER_LEN <= bytes.len() {
        let chunk_len = read_u32(bytes, offset)? as usize;
        let ty = read_u32(bytes, offset + 4)?;
        let payload = offset + GLB_CHUNK_HEADER_LEN;
        if payload + chunk_len > bytes.len() {
            return None;
        }
        if ty == chunk_type {
            return Some((payload, chunk_len));
        }
        // Chunks are 4-byte aligned.
        offset = payload + ((chunk_len + 3) & !3);
    }
    None
}

/// Check that `bytes` are a plausible file for `kind`.
pub fn validate_asset(bytes: &[u8], kind: AssetKind) -> Result<AssetFormat> {
    let format = detect_format(bytes);
    if !format.matches(kind) {
        return Err(anyhow!("unsupported format {:?} for {:?} asset", format, kind));
    }
    if format == AssetFormat::Glb {
        parse_glb_header(bytes)?;
        if find_glb_chunk(bytes, GLB_CHUNK_JSON).is_none() {
            return Err(anyhow!("glb has no JSON chunk"));
        }
    }
    Ok(format)
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
