//! KTX2 wire format.
//!
//! Serializes a [`UniversalContainer`] as a KTX2 file: identifier,
//! header, data format descriptor, level index, key/value metadata,
//! supercompression global data, then the level payloads (smallest mip
//! first, per KTX2 convention). ETC1S payloads always use the bespoke
//! codebook scheme (BasisLZ, scheme 1); UASTC payloads use either no
//! supercompression or zlib (scheme 3), applied per level.
//!
//! The slice and image tables are carried in the supercompression
//! global data block for both encodings so that parsing restores the
//! exact in-memory container, including payload offsets, while the
//! file payload stays level-major.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::bytes::{ByteReader, ByteWriter};
use super::{ContainerError, ImageDesc, SliceDesc, TextureType, UniversalContainer};
use crate::format::EncodingKind;

/// The 12-byte KTX2 file identifier.
pub const KTX2_IDENTIFIER: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x32, 0x30, 0xAB, 0x0D, 0x0A, 0x1A, 0x0A,
];

const SCHEME_NONE: u32 = 0;
const SCHEME_BASISLZ: u32 = 1;
const SCHEME_ZSTD: u32 = 2;
const SCHEME_ZLIB: u32 = 3;

/// Data-format-descriptor color models.
const DFD_MODEL_ETC1S: u8 = 163;
const DFD_MODEL_UASTC: u8 = 166;

const WRITER_TAG: &[u8] = b"unitex 0.2\0";

// Deflate cannot expand beyond ~1032:1; anything claiming more is a
// malformed (or hostile) level index.
const MAX_ZLIB_RATIO: usize = 1032;

/// Whole-payload supercompression applied to UASTC data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Supercompression {
    #[default]
    None,
    /// General-purpose zlib, KTX2 scheme id 3.
    Zlib,
}

/// Options for KTX2 serialization.
#[derive(Debug, Clone, Default)]
pub struct Ktx2Options {
    /// Supercompression for UASTC payloads. Ignored for ETC1S, which
    /// always uses its own codebook scheme.
    pub supercompression: Supercompression,
}

fn zlib_compress(data: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data)
        .and_then(|_| enc.finish())
        .map_err(|e| ContainerError::Corrupt(format!("zlib compression failed: {e}")))
}

/// Inflate exactly `expected_len` bytes. The read is capped so a
/// hostile stream cannot inflate past the declared length.
fn zlib_decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>, ContainerError> {
    let mut out = Vec::with_capacity(expected_len);
    ZlibDecoder::new(data)
        .take(expected_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| ContainerError::Corrupt(format!("zlib decompression failed: {e}")))?;
    if out.len() != expected_len {
        return Err(ContainerError::Corrupt(format!(
            "level declares {expected_len} uncompressed bytes, inflated to {}",
            out.len()
        )));
    }
    Ok(out)
}

/// Serialize a container as KTX2.
pub fn serialize(
    container: &UniversalContainer,
    opts: &Ktx2Options,
) -> Result<Vec<u8>, ContainerError> {
    match container.texture_type {
        TextureType::VideoFrames => {
            return Err(ContainerError::Unrepresentable(
                "KTX2 has no slot for P-frame slice semantics; use the legacy container for video"
                    .to_string(),
            ));
        }
        TextureType::Volume => {
            return Err(ContainerError::Unrepresentable(
                "volume textures are not laid out by this writer".to_string(),
            ));
        }
        _ => {}
    }
    let base = container
        .images
        .first()
        .ok_or_else(|| ContainerError::Corrupt("container has no images".to_string()))?;
    for (i, image) in container.images.iter().enumerate() {
        if image.orig_width != base.orig_width
            || image.orig_height != base.orig_height
            || image.num_levels != base.num_levels
        {
            return Err(ContainerError::Unrepresentable(format!(
                "image {i} dimensions/mip count differ from image 0; KTX2 layers must match"
            )));
        }
    }
    let level_count = base.num_levels;
    if level_count == 0 {
        return Err(ContainerError::Corrupt("zero mip levels".to_string()));
    }

    let scheme = match container.encoding {
        EncodingKind::Etc1s => SCHEME_BASISLZ,
        EncodingKind::Uastc => match opts.supercompression {
            Supercompression::None => SCHEME_NONE,
            Supercompression::Zlib => SCHEME_ZLIB,
        },
    };

    let face_count = container.face_count();
    let layer_count: u32 = match container.texture_type {
        TextureType::TwoD => 0,
        TextureType::TwoDArray => container.images.len() as u32,
        TextureType::CubemapArray => {
            let layers = container.layer_count();
            if layers > 1 {
                layers
            } else {
                0
            }
        }
        _ => unreachable!(),
    };

    // Level payloads: concatenation of this level's slices in table
    // order, then per-level supercompression.
    let mut level_raw: Vec<Vec<u8>> = Vec::with_capacity(level_count as usize);
    for level in 0..level_count {
        let mut data = Vec::new();
        for (i, s) in container.slices.iter().enumerate() {
            if s.level_index != level {
                continue;
            }
            let end = s.payload_offset as usize + s.payload_len as usize;
            let bytes = container.payload.get(s.payload_offset as usize..end).ok_or_else(
                || {
                    ContainerError::Corrupt(format!(
                        "slice {i} payload range exceeds payload length"
                    ))
                },
            )?;
            data.extend_from_slice(bytes);
        }
        level_raw.push(data);
    }
    let mut level_stored: Vec<Vec<u8>> = Vec::with_capacity(level_count as usize);
    for raw in &level_raw {
        level_stored.push(match scheme {
            SCHEME_ZLIB => zlib_compress(raw)?,
            _ => raw.clone(),
        });
    }

    let mut w = ByteWriter::new();
    w.bytes(&KTX2_IDENTIFIER);
    w.u32(0); // vkFormat: none, the DFD describes the encoding
    w.u32(1); // typeSize
    w.u32(base.orig_width);
    w.u32(base.orig_height);
    w.u32(0); // pixelDepth
    w.u32(layer_count);
    w.u32(face_count);
    w.u32(level_count);
    w.u32(scheme);

    // Section index, patched once the offsets are known.
    let index_at = w.len();
    w.u32(0); // dfdByteOffset
    w.u32(0); // dfdByteLength
    w.u32(0); // kvdByteOffset
    w.u32(0); // kvdByteLength
    w.u64(0); // sgdByteOffset
    w.u64(0); // sgdByteLength

    let level_index_at = w.len();
    for _ in 0..level_count {
        w.u64(0); // byteOffset
        w.u64(0); // byteLength
        w.u64(0); // uncompressedByteLength
    }

    let dfd_offset = w.len();
    write_dfd(&mut w, container);
    let dfd_len = w.len() - dfd_offset;

    let kvd_offset = w.len();
    write_kvd(&mut w, container);
    let kvd_len = w.len() - kvd_offset;

    w.align(8);
    let sgd_offset = w.len();
    write_sgd(&mut w, container)?;
    let sgd_len = w.len() - sgd_offset;

    w.patch_u32(index_at, dfd_offset as u32);
    w.patch_u32(index_at + 4, dfd_len as u32);
    w.patch_u32(index_at + 8, kvd_offset as u32);
    w.patch_u32(index_at + 12, kvd_len as u32);
    w.patch_u64(index_at + 16, sgd_offset as u64);
    w.patch_u64(index_at + 24, sgd_len as u64);

    // Levels are written smallest mip first; the index itself stays in
    // level order.
    for level in (0..level_count as usize).rev() {
        w.align(8);
        let offset = w.len() as u64;
        w.bytes(&level_stored[level]);
        let entry = level_index_at + level * 24;
        w.patch_u64(entry, offset);
        w.patch_u64(entry + 8, level_stored[level].len() as u64);
        // Per KTX2 convention the uncompressed length is zero for the
        // BasisLZ scheme.
        let uncompressed = if scheme == SCHEME_BASISLZ {
            0
        } else {
            level_raw[level].len() as u64
        };
        w.patch_u64(entry + 16, uncompressed);
    }

    Ok(w.into_vec())
}

fn write_dfd(w: &mut ByteWriter, container: &UniversalContainer) {
    let model = match container.encoding {
        EncodingKind::Etc1s => DFD_MODEL_ETC1S,
        EncodingKind::Uastc => DFD_MODEL_UASTC,
    };
    // One descriptor block with a single sample: 24-byte block header
    // plus 16 bytes of sample information.
    let block_size: u16 = 40;
    w.u32(4 + block_size as u32); // dfdTotalSize
    w.u32(0); // vendorId 0, descriptorType 0
    w.u16(2); // versionNumber
    w.u16(block_size);
    w.u8(model);
    w.u8(1); // colorPrimaries: BT.709
    w.u8(2); // transferFunction: sRGB
    w.u8(0); // flags: alpha straight
    w.u8(3); // texelBlockDimension0: 4 px
    w.u8(3); // texelBlockDimension1: 4 px
    w.u8(0);
    w.u8(0);
    w.u8(container.encoding.bytes_per_block() as u8); // bytesPlane0
    for _ in 0..7 {
        w.u8(0);
    }
    // Sample: full-width shared exponent channel covering the block.
    w.u16(0); // bitOffset
    w.u8(63); // bitLength - 1
    w.u8(0); // channelType
    w.u32(0); // samplePosition
    w.u32(0); // sampleLower
    w.u32(0xFFFF_FFFF); // sampleUpper
}

fn write_kv_entry(w: &mut ByteWriter, key: &str, value: &[u8]) {
    let len = key.len() + 1 + value.len();
    w.u32(len as u32);
    w.bytes(key.as_bytes());
    w.u8(0);
    w.bytes(value);
    w.align(4);
}

fn write_kvd(w: &mut ByteWriter, container: &UniversalContainer) {
    // Entries must be sorted by key.
    if container.us_per_frame > 0 {
        let mut v = ByteWriter::new();
        v.u32(container.us_per_frame); // duration
        v.u32(1_000_000); // timescale: microseconds
        v.u32(0); // loop count: forever
        write_kv_entry(w, "KTXanimData", &v.into_vec());
    }
    let orientation: &[u8] = if container.y_flipped { b"ru\0" } else { b"rd\0" };
    write_kv_entry(w, "KTXorientation", orientation);
    write_kv_entry(w, "KTXwriter", WRITER_TAG);
    let mut v = ByteWriter::new();
    v.u32(container.userdata.0);
    v.u32(container.userdata.1);
    write_kv_entry(w, "UTEXuserData", &v.into_vec());
}

const SGD_FLAG_GLOBAL_CODEBOOK: u32 = 1;

fn write_sgd(w: &mut ByteWriter, container: &UniversalContainer) -> Result<(), ContainerError> {
    let mut flags = 0;
    if container.uses_global_codebook() {
        flags |= SGD_FLAG_GLOBAL_CODEBOOK;
    }
    w.u32(flags);
    w.u32(container.endpoint_count);
    w.u32(container.selector_count);
    w.u32(container.codebook.len() as u32);
    w.u32(container.images.len() as u32);
    w.u32(container.slices.len() as u32);
    for image in &container.images {
        w.u32(image.orig_width);
        w.u32(image.orig_height);
        w.u32(image.num_levels);
        w.u8(if image.has_alpha { 1 } else { 0 });
    }
    for s in &container.slices {
        let end = s.payload_offset as usize + s.payload_len as usize;
        let data = container
            .payload
            .get(s.payload_offset as usize..end)
            .ok_or_else(|| ContainerError::Corrupt("slice range out of payload".to_string()))?;
        w.u32(s.image_index);
        w.u32(s.level_index);
        w.u32(s.orig_width);
        w.u32(s.orig_height);
        w.u32(s.num_blocks_x);
        w.u32(s.num_blocks_y);
        w.u32(s.payload_offset);
        w.u32(s.payload_len);
        w.u16(super::legacy::crc16(data, 0));
        let mut sflags = 0;
        if s.alpha_slice {
            sflags |= 1;
        }
        if s.iframe {
            sflags |= 2;
        }
        w.u8(sflags);
    }
    w.bytes(&container.codebook);
    Ok(())
}

struct Section<'a> {
    bytes: &'a [u8],
}

fn section<'a>(bytes: &'a [u8], offset: usize, len: usize) -> Result<Section<'a>, ContainerError> {
    let end = offset
        .checked_add(len)
        .filter(|&e| e <= bytes.len())
        .ok_or_else(|| ContainerError::Corrupt("section outside file".to_string()))?;
    Ok(Section {
        bytes: &bytes[offset..end],
    })
}

/// Parse a KTX2 file into a container.
pub fn parse(bytes: &[u8]) -> Result<UniversalContainer, ContainerError> {
    if !bytes.starts_with(&KTX2_IDENTIFIER) {
        return Err(ContainerError::UnknownMagic);
    }
    let mut r = ByteReader::at(bytes, KTX2_IDENTIFIER.len());
    let vk_format = r.u32()?;
    let type_size = r.u32()?;
    let pixel_width = r.u32()?;
    let pixel_height = r.u32()?;
    let pixel_depth = r.u32()?;
    let layer_count = r.u32()?;
    let face_count = r.u32()?;
    let level_count = r.u32()?;
    let scheme = r.u32()?;

    if vk_format != 0 || type_size != 1 {
        return Err(ContainerError::Corrupt(format!(
            "expected a universal-texture KTX2 (vkFormat 0), got vkFormat {vk_format}"
        )));
    }
    if pixel_depth != 0 {
        return Err(ContainerError::Unrepresentable(
            "3D KTX2 textures are not supported".to_string(),
        ));
    }
    if face_count != 1 && face_count != 6 {
        return Err(ContainerError::Corrupt(format!(
            "face count must be 1 or 6, got {face_count}"
        )));
    }
    if level_count == 0 {
        return Err(ContainerError::Corrupt("zero mip levels".to_string()));
    }
    if scheme == SCHEME_ZSTD {
        return Err(ContainerError::Unrepresentable(
            "Zstandard supercompression is not supported by this build".to_string(),
        ));
    }
    if !matches!(scheme, SCHEME_NONE | SCHEME_BASISLZ | SCHEME_ZLIB) {
        return Err(ContainerError::Corrupt(format!(
            "unknown supercompression scheme {scheme}"
        )));
    }

    let dfd_offset = r.u32()? as usize;
    let dfd_len = r.u32()? as usize;
    let kvd_offset = r.u32()? as usize;
    let kvd_len = r.u32()? as usize;
    let sgd_offset = r.u64()? as usize;
    let sgd_len = r.u64()? as usize;

    let mut levels = Vec::with_capacity(level_count as usize);
    for _ in 0..level_count {
        let offset = r.u64()? as usize;
        let len = r.u64()? as usize;
        let uncompressed = r.u64()? as usize;
        levels.push((offset, len, uncompressed));
    }

    let encoding = parse_dfd(section(bytes, dfd_offset, dfd_len)?.bytes)?;
    match (encoding, scheme) {
        (EncodingKind::Etc1s, SCHEME_BASISLZ) => {}
        (EncodingKind::Uastc, SCHEME_NONE | SCHEME_ZLIB) => {}
        _ => {
            return Err(ContainerError::Corrupt(format!(
                "supercompression scheme {scheme} is invalid for {encoding} data"
            )));
        }
    }

    let kv = parse_kvd(section(bytes, kvd_offset, kvd_len)?.bytes)?;
    let mut us_per_frame = 0;
    let mut y_flipped = false;
    let mut userdata = (0, 0);
    for (key, value) in &kv {
        match key.as_str() {
            "KTXanimData" if value.len() >= 4 => {
                us_per_frame = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
            }
            "KTXorientation" => {
                y_flipped = value.starts_with(b"ru");
            }
            "UTEXuserData" if value.len() >= 8 => {
                userdata = (
                    u32::from_le_bytes([value[0], value[1], value[2], value[3]]),
                    u32::from_le_bytes([value[4], value[5], value[6], value[7]]),
                );
            }
            _ => {}
        }
    }

    let sgd = parse_sgd(section(bytes, sgd_offset, sgd_len)?.bytes)?;

    if let Some(base) = sgd.images.first() {
        if base.orig_width != pixel_width || base.orig_height != pixel_height {
            return Err(ContainerError::Corrupt(
                "header dimensions disagree with the image table".to_string(),
            ));
        }
    }

    // Bound the slice table against the actual level data before
    // trusting any of its u32 ranges for allocation.
    let mut logical_total = 0usize;
    for &(offset, len, uncompressed) in &levels {
        section(bytes, offset, len)?;
        let logical = if scheme == SCHEME_ZLIB {
            if uncompressed > len.saturating_mul(MAX_ZLIB_RATIO) {
                return Err(ContainerError::Corrupt(format!(
                    "level declares {uncompressed} uncompressed bytes from {len} stored"
                )));
            }
            uncompressed
        } else {
            len
        };
        logical_total = logical_total.saturating_add(logical);
    }

    // Rebuild the logical payload from the level-major file layout.
    let payload_len = sgd
        .slices
        .iter()
        .map(|s| s.payload_offset as usize + s.payload_len as usize)
        .max()
        .unwrap_or(0);
    if payload_len > logical_total {
        return Err(ContainerError::Corrupt(format!(
            "slice table demands {payload_len} payload bytes but the levels hold {logical_total}"
        )));
    }
    let mut payload = vec![0u8; payload_len];
    for (level, &(offset, len, uncompressed)) in levels.iter().enumerate() {
        let stored = section(bytes, offset, len)?.bytes;
        let data = match scheme {
            SCHEME_ZLIB => zlib_decompress(stored, uncompressed)?,
            _ => stored.to_vec(),
        };
        let mut consumed = 0;
        for s in sgd.slices.iter().filter(|s| s.level_index == level as u32) {
            let n = s.payload_len as usize;
            let src = data.get(consumed..consumed + n).ok_or_else(|| {
                ContainerError::Corrupt(format!("level {level} data shorter than its slices"))
            })?;
            if super::legacy::crc16(src, 0) != s.crc16 {
                return Err(ContainerError::Corrupt(format!(
                    "slice CRC mismatch in level {level}"
                )));
            }
            payload[s.payload_offset as usize..s.payload_offset as usize + n]
                .copy_from_slice(src);
            consumed += n;
        }
        if consumed != data.len() {
            return Err(ContainerError::Corrupt(format!(
                "level {level} holds {} bytes but its slices account for {consumed}",
                data.len()
            )));
        }
    }

    let texture_type = if face_count == 6 {
        TextureType::CubemapArray
    } else if layer_count > 0 {
        TextureType::TwoDArray
    } else {
        TextureType::TwoD
    };
    let has_alpha = sgd.images.iter().any(|i| i.has_alpha);

    Ok(UniversalContainer {
        encoding,
        texture_type,
        y_flipped,
        has_alpha,
        us_per_frame,
        userdata,
        endpoint_count: sgd.endpoint_count,
        selector_count: sgd.selector_count,
        codebook: sgd.codebook,
        images: sgd.images,
        slices: sgd.slices,
        payload,
    })
}

fn parse_dfd(dfd: &[u8]) -> Result<EncodingKind, ContainerError> {
    // totalSize(4) + vendor/type(4) + version/blockSize(4) precede the
    // color model byte.
    let model = *dfd
        .get(12)
        .ok_or_else(|| ContainerError::Corrupt("data format descriptor too short".to_string()))?;
    match model {
        DFD_MODEL_ETC1S => Ok(EncodingKind::Etc1s),
        DFD_MODEL_UASTC => Ok(EncodingKind::Uastc),
        other => Err(ContainerError::Corrupt(format!(
            "unknown DFD color model {other}"
        ))),
    }
}

fn parse_kvd(kvd: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ContainerError> {
    let mut entries = Vec::new();
    let mut r = ByteReader::new(kvd);
    while r.remaining() >= 4 {
        let len = r.u32()? as usize;
        let entry = r.bytes(len)?;
        let nul = entry
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ContainerError::Corrupt("key/value entry has no key".to_string()))?;
        let key = String::from_utf8_lossy(&entry[..nul]).into_owned();
        entries.push((key, entry[nul + 1..].to_vec()));
        // Skip padding to the next 4-byte boundary.
        let pad = (4 - (len % 4)) % 4;
        if pad > 0 && r.remaining() >= pad {
            r.bytes(pad)?;
        }
    }
    Ok(entries)
}

struct SgdBlock {
    endpoint_count: u32,
    selector_count: u32,
    codebook: Vec<u8>,
    images: Vec<ImageDesc>,
    slices: Vec<SliceDesc>,
}

fn parse_sgd(sgd: &[u8]) -> Result<SgdBlock, ContainerError> {
    let mut r = ByteReader::new(sgd);
    let _flags = r.u32()?;
    let endpoint_count = r.u32()?;
    let selector_count = r.u32()?;
    let codebook_len = r.u32()? as usize;
    let image_count = r.u32()?;
    let slice_count = r.u32()?;
    if image_count > 0xFFFF || slice_count > 0xF_FFFF {
        return Err(ContainerError::Corrupt(format!(
            "implausible table sizes: {image_count} images, {slice_count} slices"
        )));
    }
    let mut images = Vec::with_capacity(image_count as usize);
    for _ in 0..image_count {
        images.push(ImageDesc {
            orig_width: r.u32()?,
            orig_height: r.u32()?,
            num_levels: r.u32()?,
            has_alpha: r.u8()? & 1 != 0,
        });
    }
    let mut slices = Vec::with_capacity(slice_count as usize);
    for i in 0..slice_count {
        let image_index = r.u32()?;
        let level_index = r.u32()?;
        let orig_width = r.u32()?;
        let orig_height = r.u32()?;
        let num_blocks_x = r.u32()?;
        let num_blocks_y = r.u32()?;
        let payload_offset = r.u32()?;
        let payload_len = r.u32()?;
        let crc = r.u16()?;
        let sflags = r.u8()?;
        if image_index >= image_count {
            return Err(ContainerError::Corrupt(format!(
                "slice {i} references image {image_index} of {image_count}"
            )));
        }
        slices.push(SliceDesc {
            image_index,
            level_index,
            orig_width,
            orig_height,
            num_blocks_x,
            num_blocks_y,
            payload_offset,
            payload_len,
            crc16: crc,
            alpha_slice: sflags & 1 != 0,
            iframe: sflags & 2 != 0,
        });
    }
    let codebook = r.bytes(codebook_len)?.to_vec();
    Ok(SgdBlock {
        endpoint_count,
        selector_count,
        codebook,
        images,
        slices,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::*;
    use super::super::TextureType;
    use super::*;

    #[test]
    fn test_roundtrip_etc1s_2d() {
        let c = etc1s_2d();
        let bytes = serialize(&c, &Ktx2Options::default()).unwrap();
        assert!(bytes.starts_with(&KTX2_IDENTIFIER));
        let back = parse(&bytes).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn test_roundtrip_uastc_cubemap_array() {
        let c = uastc_cubemap_array();
        let bytes = serialize(&c, &Ktx2Options::default()).unwrap();
        let back = parse(&bytes).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn test_roundtrip_uastc_with_zlib_supercompression() {
        let c = uastc_cubemap_array();
        let opts = Ktx2Options {
            supercompression: Supercompression::Zlib,
        };
        let bytes = serialize(&c, &opts).unwrap();
        let back = parse(&bytes).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn test_etc1s_always_uses_basislz_scheme() {
        let c = etc1s_2d();
        let opts = Ktx2Options {
            supercompression: Supercompression::Zlib,
        };
        let bytes = serialize(&c, &opts).unwrap();
        // Scheme field sits after identifier + 8 header words.
        let scheme = u32::from_le_bytes(bytes[44..48].try_into().unwrap());
        assert_eq!(scheme, SCHEME_BASISLZ);
    }

    #[test]
    fn test_video_is_rejected() {
        let mut c = etc1s_2d();
        c.texture_type = TextureType::VideoFrames;
        let err = serialize(&c, &Ktx2Options::default()).unwrap_err();
        assert!(matches!(err, ContainerError::Unrepresentable(_)));
    }

    #[test]
    fn test_mismatched_layer_dimensions_rejected() {
        let mut c = uastc_cubemap_array();
        c.images[3].orig_width = 8;
        let err = serialize(&c, &Ktx2Options::default()).unwrap_err();
        assert!(matches!(err, ContainerError::Unrepresentable(_)));
    }

    #[test]
    fn test_parse_detects_payload_damage() {
        let c = etc1s_2d();
        let bytes = serialize(&c, &Ktx2Options::default()).unwrap();
        let mut damaged = bytes.clone();
        let last = damaged.len() - 1;
        damaged[last] ^= 0x40;
        assert!(parse(&damaged).is_err());
    }

    #[test]
    fn test_parse_rejects_zstd_scheme() {
        let c = uastc_cubemap_array();
        let mut bytes = serialize(&c, &Ktx2Options::default()).unwrap();
        bytes[44..48].copy_from_slice(&SCHEME_ZSTD.to_le_bytes());
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, ContainerError::Unrepresentable(_)));
    }

    #[test]
    fn test_anim_data_written_for_timed_arrays() {
        let mut c = etc1s_2d();
        c.texture_type = TextureType::TwoDArray;
        c.us_per_frame = 33_333;
        let bytes = serialize(&c, &Ktx2Options::default()).unwrap();
        let back = parse(&bytes).unwrap();
        assert_eq!(back.us_per_frame, 33_333);
        assert_eq!(back.texture_type, TextureType::TwoDArray);
    }

    #[test]
    fn test_orientation_roundtrip() {
        let mut c = uastc_cubemap_array();
        assert!(c.y_flipped);
        let back = parse(&serialize(&c, &Ktx2Options::default()).unwrap()).unwrap();
        assert!(back.y_flipped);
        c.y_flipped = false;
        let back = parse(&serialize(&c, &Ktx2Options::default()).unwrap()).unwrap();
        assert!(!back.y_flipped);
    }

    #[test]
    fn test_levels_written_smallest_mip_first() {
        let c = etc1s_2d();
        let bytes = serialize(&c, &Ktx2Options::default()).unwrap();
        // Level index starts after identifier (12) + header (36) +
        // section index (32).
        let idx = 12 + 36 + 32;
        let l0_offset = u64::from_le_bytes(bytes[idx..idx + 8].try_into().unwrap());
        let l1_offset = u64::from_le_bytes(bytes[idx + 24..idx + 32].try_into().unwrap());
        assert!(l1_offset < l0_offset, "mip 1 should precede mip 0 in the file");
    }

    #[test]
    fn test_parse_rejects_slice_table_beyond_level_data() {
        let c = etc1s_2d();
        let mut bytes = serialize(&c, &Ktx2Options::default()).unwrap();
        // A few hundred bytes of file must not be able to demand a
        // multi-gigabyte payload. Inflate the first slice's
        // offset/length pair in the supercompression global data.
        let sgd = u64::from_le_bytes(bytes[64..72].try_into().unwrap()) as usize;
        let image_count =
            u32::from_le_bytes(bytes[sgd + 16..sgd + 20].try_into().unwrap()) as usize;
        let slice0 = sgd + 24 + image_count * 13;
        bytes[slice0 + 24..slice0 + 28].copy_from_slice(&u32::MAX.to_le_bytes());
        bytes[slice0 + 28..slice0 + 32].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, ContainerError::Corrupt(_)));
    }

    #[test]
    fn test_parse_rejects_inflated_uncompressed_length() {
        let c = uastc_cubemap_array();
        let opts = Ktx2Options {
            supercompression: Supercompression::Zlib,
        };
        let mut bytes = serialize(&c, &opts).unwrap();
        // uncompressedByteLength of level 0, third u64 of the first
        // level index entry at offset 80.
        bytes[96..104].copy_from_slice(&(1u64 << 33).to_le_bytes());
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, ContainerError::Corrupt(_)));
    }
}
