//! PTP dataset decoding for `GetDeviceInfo`/`GetStorageInfo`/`GetObjectInfo`
//! payloads. Grounded on CUAir-rust-ptp's `DeviceInfo`/`StorageInfo`/
//! `ObjectInfo` decode methods
//! (`other_examples/11b3ec88_CUAir-rust-ptp__src-lib.rs.rs`), ported onto
//! `mtp_codec::endian` instead of a `byteorder::Cursor`.

use mtp_codec::endian::{decode_ptp_string, decode_u16_at, decode_u32_at, decode_u64};

#[derive(Debug, thiserror::Error)]
#[error("malformed PTP dataset: {0}")]
pub struct DatasetError(pub String);

fn need_u16(buf: &[u8], offset: &mut usize) -> Result<u16, DatasetError> {
    decode_u16_at(buf, offset).ok_or_else(|| DatasetError("truncated u16 field".into()))
}

fn need_u32(buf: &[u8], offset: &mut usize) -> Result<u32, DatasetError> {
    decode_u32_at(buf, offset).ok_or_else(|| DatasetError("truncated u32 field".into()))
}

fn need_u64(buf: &[u8], offset: &mut usize) -> Result<u64, DatasetError> {
    let v = decode_u64(buf, *offset).ok_or_else(|| DatasetError("truncated u64 field".into()))?;
    *offset += 8;
    Ok(v)
}

fn need_str(buf: &[u8], offset: &mut usize) -> Result<String, DatasetError> {
    let (s, consumed) = decode_ptp_string(buf, *offset).map_err(|e| DatasetError(e.to_string()))?;
    *offset += consumed;
    Ok(s)
}

fn need_u16_array(buf: &[u8], offset: &mut usize) -> Result<Vec<u16>, DatasetError> {
    let count = need_u32(buf, offset)? as usize;
    let mut out = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        out.push(need_u16(buf, offset)?);
    }
    Ok(out)
}

/// `GetDeviceInfo` response dataset (spec §4.7 `info()`).
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub standard_version: u16,
    pub vendor_extension_id: u32,
    pub vendor_extension_version: u16,
    pub vendor_extension_desc: String,
    pub functional_mode: u16,
    pub operations_supported: Vec<u16>,
    pub events_supported: Vec<u16>,
    pub device_properties_supported: Vec<u16>,
    pub capture_formats: Vec<u16>,
    pub image_formats: Vec<u16>,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn decode(buf: &[u8]) -> Result<Self, DatasetError> {
        let mut off = 0usize;
        Ok(DeviceInfo {
            standard_version: need_u16(buf, &mut off)?,
            vendor_extension_id: need_u32(buf, &mut off)?,
            vendor_extension_version: need_u16(buf, &mut off)?,
            vendor_extension_desc: need_str(buf, &mut off)?,
            functional_mode: need_u16(buf, &mut off)?,
            operations_supported: need_u16_array(buf, &mut off)?,
            events_supported: need_u16_array(buf, &mut off)?,
            device_properties_supported: need_u16_array(buf, &mut off)?,
            capture_formats: need_u16_array(buf, &mut off)?,
            image_formats: need_u16_array(buf, &mut off)?,
            manufacturer: need_str(buf, &mut off)?,
            model: need_str(buf, &mut off)?,
            device_version: need_str(buf, &mut off)?,
            serial_number: need_str(buf, &mut off)?,
        })
    }
}

/// `GetStorageInfo` response dataset.
#[derive(Debug, Clone)]
pub struct StorageInfo {
    pub storage_type: u16,
    pub filesystem_type: u16,
    pub access_capability: u16,
    pub max_capacity: u64,
    pub free_space_bytes: u64,
    pub free_space_in_images: u32,
    pub storage_description: String,
    pub volume_label: String,
}

impl StorageInfo {
    pub fn decode(buf: &[u8]) -> Result<Self, DatasetError> {
        let mut off = 0usize;
        Ok(StorageInfo {
            storage_type: need_u16(buf, &mut off)?,
            filesystem_type: need_u16(buf, &mut off)?,
            access_capability: need_u16(buf, &mut off)?,
            max_capacity: need_u64(buf, &mut off)?,
            free_space_bytes: need_u64(buf, &mut off)?,
            free_space_in_images: need_u32(buf, &mut off)?,
            storage_description: need_str(buf, &mut off)?,
            volume_label: need_str(buf, &mut off)?,
        })
    }
}

/// `GetObjectInfo` response dataset (spec §3.7 maps to `IndexedObject` one
/// layer up, in `mtp-store`).
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub storage_id: u32,
    pub object_format: u16,
    pub protection_status: u16,
    pub object_compressed_size: u32,
    pub parent_object: u32,
    pub association_type: u16,
    pub filename: String,
    pub capture_date: String,
    pub modification_date: String,
}

impl ObjectInfo {
    pub fn decode(buf: &[u8]) -> Result<Self, DatasetError> {
        let mut off = 0usize;
        let storage_id = need_u32(buf, &mut off)?;
        let object_format = need_u16(buf, &mut off)?;
        let protection_status = need_u16(buf, &mut off)?;
        let object_compressed_size = need_u32(buf, &mut off)?;
        let _thumb_format = need_u16(buf, &mut off)?;
        let _thumb_compressed_size = need_u32(buf, &mut off)?;
        let _thumb_pix_width = need_u32(buf, &mut off)?;
        let _thumb_pix_height = need_u32(buf, &mut off)?;
        let _image_pix_width = need_u32(buf, &mut off)?;
        let _image_pix_height = need_u32(buf, &mut off)?;
        let _image_bit_depth = need_u32(buf, &mut off)?;
        let parent_object = need_u32(buf, &mut off)?;
        let association_type = need_u16(buf, &mut off)?;
        let _association_desc = need_u32(buf, &mut off)?;
        let _sequence_number = need_u32(buf, &mut off)?;
        let filename = need_str(buf, &mut off)?;
        let capture_date = need_str(buf, &mut off)?;
        let modification_date = need_str(buf, &mut off)?;
        let _keywords = need_str(buf, &mut off)?;
        Ok(ObjectInfo {
            storage_id,
            object_format,
            protection_status,
            object_compressed_size,
            parent_object,
            association_type,
            filename,
            capture_date,
            modification_date,
        })
    }

    /// `0x3001` is `Association` (PTP's folder object format).
    pub fn is_directory(&self) -> bool {
        self.object_format == 0x3001
    }
}

/// `GetObjectHandles` response: a flat `u32` array.
pub fn decode_handle_array(buf: &[u8]) -> Result<Vec<u32>, DatasetError> {
    let mut off = 0usize;
    let count = need_u32(buf, &mut off)? as usize;
    let mut out = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        out.push(need_u32(buf, &mut off)?);
    }
    Ok(out)
}
