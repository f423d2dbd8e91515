use crate::ident::encode_uuid;
use crate::layout::{Decode, Encode, FieldSpec, StructDecoder, layout_is_contiguous};
use recon_types::{ByteCursor, ByteWriter, FieldError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `btrfs_dev_item`, 0x62 bytes.
pub const DEV_ITEM_LAYOUT: &[FieldSpec] = &[
    FieldSpec::new("devid", 0x00, 8),
    FieldSpec::new("total_bytes", 0x08, 8),
    FieldSpec::new("bytes_used", 0x10, 8),
    FieldSpec::new("io_align", 0x18, 4),
    FieldSpec::new("io_width", 0x1C, 4),
    FieldSpec::new("sector_size", 0x20, 4),
    FieldSpec::new("dev_type", 0x24, 8),
    FieldSpec::new("generation", 0x2C, 8),
    FieldSpec::new("start_offset", 0x34, 8),
    FieldSpec::new("dev_group", 0x3C, 4),
    FieldSpec::new("seek_speed", 0x40, 1),
    FieldSpec::new("bandwidth", 0x41, 1),
    FieldSpec::new("uuid", 0x42, 16),
    FieldSpec::new("fsid", 0x52, 16),
];

const _: () = assert!(layout_is_contiguous(DEV_ITEM_LAYOUT));

/// Identity and geometry of one member device, as embedded in the
/// superblock of that device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevItem {
    pub devid: u64,
    pub total_bytes: u64,
    pub bytes_used: u64,
    pub io_align: u32,
    pub io_width: u32,
    pub sector_size: u32,
    pub dev_type: u64,
    pub generation: u64,
    pub start_offset: u64,
    pub dev_group: u32,
    pub seek_speed: u8,
    pub bandwidth: u8,
    pub uuid: Uuid,
    /// Filesystem this device belongs to.
    pub fsid: Uuid,
}

impl Decode for DevItem {
    const NAME: &'static str = "dev_item";
    const LAYOUT: &'static [FieldSpec] = DEV_ITEM_LAYOUT;

    fn decode_from(cursor: &mut ByteCursor<'_>) -> Result<Self, FieldError> {
        let mut d = StructDecoder::new(Self::LAYOUT, cursor);
        let item = Self {
            devid: d.u64("devid")?,
            total_bytes: d.u64("total_bytes")?,
            bytes_used: d.u64("bytes_used")?,
            io_align: d.u32("io_align")?,
            io_width: d.u32("io_width")?,
            sector_size: d.u32("sector_size")?,
            dev_type: d.u64("dev_type")?,
            generation: d.u64("generation")?,
            start_offset: d.u64("start_offset")?,
            dev_group: d.u32("dev_group")?,
            seek_speed: d.u8("seek_speed")?,
            bandwidth: d.u8("bandwidth")?,
            uuid: d.uuid("uuid")?,
            fsid: d.uuid("fsid")?,
        };
        d.finish()?;
        Ok(item)
    }
}

impl Encode for DevItem {
    fn encode_into(&self, out: &mut ByteWriter) {
        out.put_u64(self.devid);
        out.put_u64(self.total_bytes);
        out.put_u64(self.bytes_used);
        out.put_u32(self.io_align);
        out.put_u32(self.io_width);
        out.put_u32(self.sector_size);
        out.put_u64(self.dev_type);
        out.put_u64(self.generation);
        out.put_u64(self.start_offset);
        out.put_u32(self.dev_group);
        out.put_u8(self.seek_speed);
        out.put_u8(self.bandwidth);
        encode_uuid(out, &self.uuid);
        encode_uuid(out, &self.fsid);
    }
}
