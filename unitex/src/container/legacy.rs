//! Legacy flat universal container.
//!
//! Layout, all little-endian:
//!
//! ```text
//! header (50 bytes)
//!   u16 magic            u16 version         u16 header_size
//!   u16 header_crc16     u16 data_crc16
//!   u8  texture_type     u8 encoding         u8 flags    u8 reserved
//!   u32 userdata0        u32 userdata1       u32 us_per_frame
//!   u32 total_images     u32 total_slices
//!   u32 endpoint_count   u32 selector_count
//!   u32 codebook_len     u32 payload_len
//! image table   (13 bytes per image)
//! slice table   (35 bytes per slice)
//! codebook bytes
//! payload bytes
//! ```
//!
//! `header_crc16` covers header bytes after the two CRC fields;
//! `data_crc16` covers everything after the header. Both are checked
//! before any offset in the tables is trusted.

use super::bytes::{ByteReader, ByteWriter};
use super::{ContainerError, ImageDesc, SliceDesc, TextureType, UniversalContainer};
use crate::format::EncodingKind;

pub const MAGIC: u16 = 0x5542;
pub const VERSION: u16 = 0x22;

const HEADER_SIZE: usize = 50;
const IMAGE_RECORD_SIZE: usize = 13;
const SLICE_RECORD_SIZE: usize = 35;

const FLAG_Y_FLIPPED: u8 = 1;
const FLAG_HAS_ALPHA: u8 = 2;

const SLICE_FLAG_ALPHA: u8 = 1;
const SLICE_FLAG_IFRAME: u8 = 2;

// Sanity limits applied before allocating table storage.
const MAX_IMAGES: u32 = 0xFFFF;
const MAX_SLICES: u32 = 0xF_FFFF;

/// CRC-16/XMODEM (poly 0x1021, MSB first).
pub fn crc16(data: &[u8], init: u16) -> u16 {
    let mut crc = init;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn encoding_to_wire(e: EncodingKind) -> u8 {
    match e {
        EncodingKind::Etc1s => 0,
        EncodingKind::Uastc => 1,
    }
}

fn encoding_from_wire(v: u8) -> Option<EncodingKind> {
    match v {
        0 => Some(EncodingKind::Etc1s),
        1 => Some(EncodingKind::Uastc),
        _ => None,
    }
}

/// Serialize a container into the legacy format, recomputing slice
/// CRCs and both structural checksums.
pub fn serialize(container: &UniversalContainer) -> Result<Vec<u8>, ContainerError> {
    for (i, s) in container.slices.iter().enumerate() {
        let end = s.payload_offset as usize + s.payload_len as usize;
        if end > container.payload.len() {
            return Err(ContainerError::Corrupt(format!(
                "slice {i} payload range {}..{end} exceeds payload length {}",
                s.payload_offset,
                container.payload.len()
            )));
        }
        if s.image_index as usize >= container.images.len() {
            return Err(ContainerError::Corrupt(format!(
                "slice {i} references image {} of {}",
                s.image_index,
                container.images.len()
            )));
        }
    }

    let mut body = ByteWriter::new();
    for image in &container.images {
        body.u32(image.orig_width);
        body.u32(image.orig_height);
        body.u32(image.num_levels);
        body.u8(if image.has_alpha { 1 } else { 0 });
    }
    for s in &container.slices {
        let data = &container.payload
            [s.payload_offset as usize..(s.payload_offset + s.payload_len) as usize];
        body.u32(s.image_index);
        body.u32(s.level_index);
        body.u32(s.orig_width);
        body.u32(s.orig_height);
        body.u32(s.num_blocks_x);
        body.u32(s.num_blocks_y);
        body.u32(s.payload_offset);
        body.u32(s.payload_len);
        body.u16(crc16(data, 0));
        let mut flags = 0;
        if s.alpha_slice {
            flags |= SLICE_FLAG_ALPHA;
        }
        if s.iframe {
            flags |= SLICE_FLAG_IFRAME;
        }
        body.u8(flags);
    }
    body.bytes(&container.codebook);
    body.bytes(&container.payload);
    let body = body.into_vec();

    let mut header = ByteWriter::new();
    header.u16(MAGIC);
    header.u16(VERSION);
    header.u16(HEADER_SIZE as u16);
    header.u16(0); // header_crc16, patched below
    header.u16(crc16(&body, 0));
    header.u8(container.texture_type.to_wire());
    header.u8(encoding_to_wire(container.encoding));
    let mut flags = 0;
    if container.y_flipped {
        flags |= FLAG_Y_FLIPPED;
    }
    if container.has_alpha {
        flags |= FLAG_HAS_ALPHA;
    }
    header.u8(flags);
    header.u8(0);
    header.u32(container.userdata.0);
    header.u32(container.userdata.1);
    header.u32(container.us_per_frame);
    header.u32(container.images.len() as u32);
    header.u32(container.slices.len() as u32);
    header.u32(container.endpoint_count);
    header.u32(container.selector_count);
    header.u32(container.codebook.len() as u32);
    header.u32(container.payload.len() as u32);

    debug_assert_eq!(header.len(), HEADER_SIZE);
    let hcrc = crc16(&header.as_slice()[10..HEADER_SIZE], 0);
    header.patch_u16(6, hcrc);
    let mut out = header.into_vec();
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parse a legacy container, validating both CRCs before trusting any
/// table offset.
pub fn parse(bytes: &[u8]) -> Result<UniversalContainer, ContainerError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ContainerError::Corrupt("file shorter than header".to_string()));
    }
    let mut r = ByteReader::new(bytes);
    let magic = r.u16()?;
    let version = r.u16()?;
    let header_size = r.u16()?;
    if magic != MAGIC {
        return Err(ContainerError::UnknownMagic);
    }
    if version != VERSION || header_size as usize != HEADER_SIZE {
        return Err(ContainerError::Corrupt(format!(
            "unsupported version {version:#06x} / header size {header_size}"
        )));
    }
    let header_crc = r.u16()?;
    let data_crc = r.u16()?;
    if crc16(&bytes[10..HEADER_SIZE], 0) != header_crc {
        return Err(ContainerError::Corrupt("header CRC mismatch".to_string()));
    }
    if crc16(&bytes[HEADER_SIZE..], 0) != data_crc {
        return Err(ContainerError::Corrupt("data CRC mismatch".to_string()));
    }

    let texture_type = TextureType::from_wire(r.u8()?)
        .ok_or_else(|| ContainerError::Corrupt("unknown texture type".to_string()))?;
    let encoding = encoding_from_wire(r.u8()?)
        .ok_or_else(|| ContainerError::Corrupt("unknown encoding".to_string()))?;
    let flags = r.u8()?;
    let _reserved = r.u8()?;
    let userdata0 = r.u32()?;
    let userdata1 = r.u32()?;
    let us_per_frame = r.u32()?;
    let total_images = r.u32()?;
    let total_slices = r.u32()?;
    let endpoint_count = r.u32()?;
    let selector_count = r.u32()?;
    let codebook_len = r.u32()?;
    let payload_len = r.u32()?;

    if total_images > MAX_IMAGES || total_slices > MAX_SLICES {
        return Err(ContainerError::Corrupt(format!(
            "implausible table sizes: {total_images} images, {total_slices} slices"
        )));
    }
    let tables_len = total_images as usize * IMAGE_RECORD_SIZE
        + total_slices as usize * SLICE_RECORD_SIZE;
    let expected_len = HEADER_SIZE + tables_len + codebook_len as usize + payload_len as usize;
    if bytes.len() != expected_len {
        return Err(ContainerError::Corrupt(format!(
            "file length {} does not match declared sections ({expected_len})",
            bytes.len()
        )));
    }

    let mut images = Vec::with_capacity(total_images as usize);
    for _ in 0..total_images {
        images.push(ImageDesc {
            orig_width: r.u32()?,
            orig_height: r.u32()?,
            num_levels: r.u32()?,
            has_alpha: r.u8()? & 1 != 0,
        });
    }

    let mut slices = Vec::with_capacity(total_slices as usize);
    for i in 0..total_slices {
        let image_index = r.u32()?;
        let level_index = r.u32()?;
        let orig_width = r.u32()?;
        let orig_height = r.u32()?;
        let num_blocks_x = r.u32()?;
        let num_blocks_y = r.u32()?;
        let payload_offset = r.u32()?;
        let payload_len = r.u32()?;
        let slice_crc = r.u16()?;
        let slice_flags = r.u8()?;
        let slice = SliceDesc {
            image_index,
            level_index,
            orig_width,
            orig_height,
            num_blocks_x,
            num_blocks_y,
            payload_offset,
            payload_len,
            crc16: slice_crc,
            alpha_slice: slice_flags & SLICE_FLAG_ALPHA != 0,
            iframe: slice_flags & SLICE_FLAG_IFRAME != 0,
        };
        if slice.image_index >= total_images {
            return Err(ContainerError::Corrupt(format!(
                "slice {i} references image {} of {total_images}",
                slice.image_index
            )));
        }
        if slice.level_index >= images[slice.image_index as usize].num_levels {
            return Err(ContainerError::Corrupt(format!(
                "slice {i} references level {} beyond the image mip chain",
                slice.level_index
            )));
        }
        let end = slice.payload_offset as u64 + slice.payload_len as u64;
        if end > payload_len as u64 {
            return Err(ContainerError::Corrupt(format!(
                "slice {i} payload range exceeds payload length {payload_len}"
            )));
        }
        slices.push(slice);
    }

    let codebook = r.bytes(codebook_len as usize)?.to_vec();
    let payload = r.bytes(payload_len as usize)?.to_vec();

    for (i, s) in slices.iter().enumerate() {
        let data = &payload[s.payload_offset as usize..(s.payload_offset + s.payload_len) as usize];
        if crc16(data, 0) != s.crc16 {
            return Err(ContainerError::Corrupt(format!("slice {i} CRC mismatch")));
        }
    }

    Ok(UniversalContainer {
        encoding,
        texture_type,
        y_flipped: flags & FLAG_Y_FLIPPED != 0,
        has_alpha: flags & FLAG_HAS_ALPHA != 0,
        us_per_frame,
        userdata: (userdata0, userdata1),
        endpoint_count,
        selector_count,
        codebook,
        images,
        slices,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::*;
    use super::*;

    #[test]
    fn test_crc16_reference_vector() {
        // CRC-16/XMODEM of "123456789".
        assert_eq!(crc16(b"123456789", 0), 0x31C3);
        assert_eq!(crc16(b"", 0), 0);
    }

    #[test]
    fn test_roundtrip_etc1s_2d() {
        let c = etc1s_2d();
        let bytes = serialize(&c).unwrap();
        let back = parse(&bytes).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn test_roundtrip_uastc_cubemap_array() {
        let c = uastc_cubemap_array();
        let bytes = serialize(&c).unwrap();
        let back = parse(&bytes).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn test_parse_detects_flipped_payload_bit() {
        let c = etc1s_2d();
        let mut bytes = serialize(&c).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, ContainerError::Corrupt(_)));
    }

    #[test]
    fn test_parse_detects_header_damage() {
        let c = etc1s_2d();
        let mut bytes = serialize(&c).unwrap();
        // Damage the userdata field inside the CRC-protected region.
        bytes[16] ^= 0xFF;
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, ContainerError::Corrupt(_)));
    }

    #[test]
    fn test_parse_rejects_truncated_file() {
        let c = etc1s_2d();
        let bytes = serialize(&c).unwrap();
        let err = parse(&bytes[..bytes.len() - 4]).unwrap_err();
        assert!(matches!(err, ContainerError::Corrupt(_)));
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        let c = etc1s_2d();
        let mut bytes = serialize(&c).unwrap();
        bytes[2] = 0x99;
        assert!(parse(&bytes).is_err());
    }

    #[test]
    fn test_serialize_rejects_out_of_range_slice() {
        let mut c = etc1s_2d();
        c.slices[0].payload_len = u32::MAX;
        assert!(serialize(&c).is_err());
    }

    #[test]
    fn test_video_slice_flags_survive_roundtrip() {
        let mut c = etc1s_2d();
        c.texture_type = TextureType::VideoFrames;
        c.slices[2].iframe = false;
        let bytes = serialize(&c).unwrap();
        let back = parse(&bytes).unwrap();
        assert!(back.slices[0].iframe);
        assert!(!back.slices[2].iframe);
    }
}
