//! Wire-level constants for the LPC111x/LPC11Cxx in-system-programmer bootloader
//!
//! The bootloader is addressed like any other node, via SDO, but on the reserved node
//! id [`ISP_NODE_ID`]. Everything here is pure protocol vocabulary: object indices, the
//! abort code table, and the bundled part-id table. The behavior that drives this
//! protocol (unlock/prepare/erase/program/compare) lives in the flasher implementation.

use int_enum::IntEnum;

/// The reserved node id used by nodes running in bootloader mode
pub const ISP_NODE_ID: u8 = 125;

/// Size in bytes of one flash programming block
pub const BLOCK_SIZE: usize = 4096;
/// Number of flash-region sectors (0 - 28 KiB)
pub const FLASH_SECTOR_COUNT: u8 = 7;
/// Number of sectors in the config region (28 - 32 KiB)
pub const CONFIG_SECTOR_COUNT: u8 = 1;
/// Total sectors addressable on this part (flash + config)
pub const TOTAL_SECTOR_COUNT: u8 = FLASH_SECTOR_COUNT + CONFIG_SECTOR_COUNT;
/// The magic unlock code expected by the "Unlock" command
pub const UNLOCK_CODE: u16 = 23130;
/// RAM staging address used for block writes
pub const RAM_STAGING_ADDRESS: u32 = 0x1000_0500;

/// Object directory indices exposed by the bootloader
pub mod object_ids {
    /// Unlock command: sub 0, u16
    pub const UNLOCK: u16 = 0x5000;
    /// Set RAM write/read base address: sub 0, u32
    pub const RAM_ADDRESS: u16 = 0x5015;
    /// Prepare sectors for write: sub 0, u16 low=start high=end
    pub const PREPARE_SECTORS: u16 = 0x5020;
    /// Erase sectors: sub 0, u16 low=start high=end
    pub const ERASE_SECTORS: u16 = 0x5030;
    /// Program area -- the staged data block itself, sub 1, segmented domain transfer
    pub const PROGRAM_AREA: u16 = 0x1F50;
    /// Copy address/length triple: sub 1 = flash addr, sub 2 = ram addr, sub 3 = length
    pub const COPY: u16 = 0x5050;
    /// Compare address/length/mismatch: sub 1 = addr1, sub 2 = addr2, sub 3 = len, sub 4 = mismatch offset
    pub const COMPARE: u16 = 0x5060;
    /// Execution address: sub 1, u32
    pub const EXEC_ADDRESS: u16 = 0x5070;
    /// Program control: sub 1, write 1 to jump to [`EXEC_ADDRESS`]
    pub const PROGRAM_CONTROL: u16 = 0x1F51;
    /// Device identity: sub 2 = part id, sub 3 = bootloader version
    pub const IDENTITY: u16 = 0x1018;
    /// Serial number words: sub 1..4, u32 each
    pub const SERIAL_NUMBER: u16 = 0x5100;
    /// Device type / name: sub 0
    pub const DEVICE_TYPE: u16 = 0x1000;
}

/// Abort codes returned by the bootloader's ISP command interpreter
///
/// These occupy the vendor-specific `0x0F00xxxx` range and are distinct from the
/// standard CANopen SDO abort code table in [`crate::sdo::AbortCode`].
#[derive(Clone, Copy, Debug, PartialEq, IntEnum)]
#[repr(u32)]
pub enum IspAbortCode {
    InvalidCommand = 0x0F00_0001,
    SrcAddrError = 0x0F00_0002,
    DstAddrError = 0x0F00_0003,
    SrcAddrNotMapped = 0x0F00_0004,
    DstAddrNotMapped = 0x0F00_0005,
    CountError = 0x0F00_0006,
    InvalidSector = 0x0F00_0007,
    SectorNotBlank = 0x0F00_0008,
    SectorNotPreparedForWrite = 0x0F00_0009,
    CompareError = 0x0F00_000A,
    ParamError = 0x0F00_000C,
    AddrError = 0x0F00_000D,
    AddrNotMapped = 0x0F00_000E,
    CmdLocked = 0x0F00_000F,
    InvalidCode = 0x0F00_0010,
    CodeReadProtectionEnabled = 0x0F00_0013,
}

/// Raw 32-bit abort/error code from a bootloader response, decoded against the known
/// table when possible and preserved verbatim otherwise.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RawIspAbortCode {
    /// A code recognized in [`IspAbortCode`]
    Known(IspAbortCode),
    /// An abort code this implementation doesn't have a name for
    Unknown(u32),
}

impl From<u32> for RawIspAbortCode {
    fn from(value: u32) -> Self {
        match IspAbortCode::try_from(value) {
            Ok(code) => RawIspAbortCode::Known(code),
            Err(_) => RawIspAbortCode::Unknown(value),
        }
    }
}

/// One entry in the bundled NXP LPC111x/LPC11Cxx part-id table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartIdEntry {
    /// The raw part id returned by the "read part id" ISP command
    pub part_id: u32,
    /// The human readable part number
    pub name: &'static str,
}

/// The bundled part-id table, as read from the reference bootloader implementation
pub const PART_ID_TABLE: &[PartIdEntry] = &[
    PartIdEntry { part_id: 0x041E_502B, name: "LPC1111FHN33/101" },
    PartIdEntry { part_id: 0x2516_D02B, name: "LPC1111FHN33/102" },
    PartIdEntry { part_id: 0x0416_502B, name: "LPC1111FHN33/201" },
    PartIdEntry { part_id: 0x2516_902B, name: "LPC1111FHN33/202" },
    PartIdEntry { part_id: 0x0001_0013, name: "LPC1111FHN33/103" },
    PartIdEntry { part_id: 0x0001_0012, name: "LPC1111FHN33/203" },
    PartIdEntry { part_id: 0x042D_502B, name: "LPC1112FHN33/101" },
    PartIdEntry { part_id: 0x2524_D02B, name: "LPC1112FHN33/102" },
    PartIdEntry { part_id: 0x0425_502B, name: "LPC1112FHN33/201" },
    PartIdEntry { part_id: 0x2524_902B, name: "LPC1112FHI33/202" },
    PartIdEntry { part_id: 0x0002_0023, name: "LPC1112FHN33/103" },
    PartIdEntry { part_id: 0x0002_0022, name: "LPC1112FHI33/203" },
    PartIdEntry { part_id: 0x0434_502B, name: "LPC1113FHN33/201" },
    PartIdEntry { part_id: 0x2532_902B, name: "LPC1113FHN33/202" },
    PartIdEntry { part_id: 0x0434_102B, name: "LPC1113FBD48/301" },
    PartIdEntry { part_id: 0x2532_102B, name: "LPC1113FBD48/302" },
    PartIdEntry { part_id: 0x0003_0032, name: "LPC1113FHN33/203" },
    PartIdEntry { part_id: 0x0003_0030, name: "LPC1113FHN33/303" },
    PartIdEntry { part_id: 0x0444_502B, name: "LPC1114FHN33/201" },
    PartIdEntry { part_id: 0x2540_902B, name: "LPC1114FHN33/202" },
    PartIdEntry { part_id: 0x0444_102B, name: "LPC1114FBD48/301" },
    PartIdEntry { part_id: 0x0004_0042, name: "LPC1114FHN33/203" },
    PartIdEntry { part_id: 0x0004_0060, name: "LPC1114FBD48/323" },
    PartIdEntry { part_id: 0x0004_0070, name: "LPC1114FHN33/333" },
    PartIdEntry { part_id: 0x0004_0040, name: "LPC1114FHI33/303" },
    PartIdEntry { part_id: 0x2540_102B, name: "LPC11D14FBD100/302" },
    PartIdEntry { part_id: 0x0005_0080, name: "LPC1115FBD48/303" },
    PartIdEntry { part_id: 0x1421_102B, name: "LPC11C12FBD48/301" },
    PartIdEntry { part_id: 0x1440_102B, name: "LPC11C14FBD48/301" },
    PartIdEntry { part_id: 0x1431_102B, name: "LPC11C22FBD48/301" },
    PartIdEntry { part_id: 0x1430_102B, name: "LPC11C24FBD48/301" },
];

/// Look up a human-readable part name for a bootloader-reported part id
pub fn part_name(part_id: u32) -> Option<&'static str> {
    PART_ID_TABLE
        .iter()
        .find(|entry| entry.part_id == part_id)
        .map(|entry| entry.name)
}

/// Recompute the Cortex-M0 vector table checksum in place
///
/// The bootloader requires word 7 of the vector table to hold the two's-complement
/// sum of words 0-6, so that the sum of all 8 words is zero. Without this, the
/// bootloader will refuse to execute the user application.
pub fn fix_checksum(image: &mut [u8]) {
    assert!(image.len() >= 32, "image must contain a full vector table");
    let mut sum: i32 = 0;
    for i in 0..7 {
        let word = i32::from_le_bytes(image[i * 4..i * 4 + 4].try_into().unwrap());
        sum = sum.wrapping_add(word);
    }
    let checksum = 0i32.wrapping_sub(sum);
    image[28..32].copy_from_slice(&checksum.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_checksum_makes_vector_table_sum_to_zero() {
        let mut image = vec![0u8; 32];
        // Plausible reset/initial-SP vector table words
        let words: [i32; 7] = [
            0x1000_0400u32 as i32,
            0x0000_0101,
            0x0000_0105,
            0x0000_0109,
            0x0000_010d,
            0x0000_0111,
            0x0000_0115,
        ];
        for (i, w) in words.iter().enumerate() {
            image[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        fix_checksum(&mut image);

        let mut total: i32 = 0;
        for i in 0..8 {
            let word = i32::from_le_bytes(image[i * 4..i * 4 + 4].try_into().unwrap());
            total = total.wrapping_add(word);
        }
        assert_eq!(total, 0);
    }

    #[test]
    fn unknown_abort_code_preserved() {
        let raw = RawIspAbortCode::from(0x0F00_00FF);
        assert_eq!(raw, RawIspAbortCode::Unknown(0x0F00_00FF));
        let known = RawIspAbortCode::from(0x0F00_000A);
        assert_eq!(known, RawIspAbortCode::Known(IspAbortCode::CompareError));
    }

    #[test]
    fn part_name_lookup() {
        assert_eq!(part_name(0x1440_102B), Some("LPC11C14FBD48/301"));
        assert_eq!(part_name(0xffff_ffff), None);
    }
}
