//! Bootloader (ISP) flasher
//!
//! Talks SDO to the reserved node id [`iobus_common::isp::ISP_NODE_ID`], which a node
//! occupies while running its factory bootloader instead of application firmware.

use snafu::Snafu;

use iobus_common::isp::{
    self, fix_checksum, object_ids as isp_ids, IspAbortCode, RawIspAbortCode, BLOCK_SIZE,
    RAM_STAGING_ADDRESS, UNLOCK_CODE,
};
use iobus_common::traits::{AsyncCanReceiver, AsyncCanSender};

use crate::sdo_client::{RawAbortCode, SdoClient, SdoClientError};

/// Error returned by [`IspFlasher`] operations
#[derive(Debug, Snafu)]
pub enum IspError {
    /// The underlying SDO exchange failed
    #[snafu(display("SDO error talking to bootloader: {source}"))]
    Sdo {
        /// The underlying SDO client error
        source: SdoClientError,
    },
    /// The bootloader responded with an ISP-specific abort code
    #[snafu(display("Bootloader rejected command: {code:?}"))]
    Aborted {
        /// The decoded abort code
        code: RawIspAbortCode,
    },
    /// `compare` found a mismatch; offset is the first differing byte
    #[snafu(display("Compare mismatch at offset {offset}"))]
    CompareMismatch {
        /// The byte offset of the first mismatch
        offset: u32,
    },
    /// The caller supplied an image too large for the target region
    #[snafu(display("Image of {len} bytes exceeds the {max} byte region"))]
    ImageTooLarge {
        /// The size of the supplied image
        len: usize,
        /// The maximum permitted size
        max: usize,
    },
}

impl From<SdoClientError> for IspError {
    fn from(source: SdoClientError) -> Self {
        match source {
            SdoClientError::ServerAbort {
                abort_code: RawAbortCode::Unknown(code),
                ..
            } if code & 0xFFFF_0000 == 0x0F00_0000 => IspError::Aborted {
                code: RawIspAbortCode::from(code),
            },
            source => IspError::Sdo { source },
        }
    }
}

/// Which flash region an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// The 0-28 KiB application flash region (7 sectors)
    Flash,
    /// The 28-32 KiB configuration region (1 sector)
    Config,
}

impl Region {
    fn sector_range(&self, start_sector: u8, sector_count: u8) -> (u8, u8) {
        let base = match self {
            Region::Flash => 0,
            Region::Config => isp::FLASH_SECTOR_COUNT,
        };
        let start = base + start_sector;
        (start, start + sector_count - 1)
    }

    fn max_len(&self) -> usize {
        match self {
            Region::Flash => isp::FLASH_SECTOR_COUNT as usize * BLOCK_SIZE,
            Region::Config => isp::CONFIG_SECTOR_COUNT as usize * BLOCK_SIZE,
        }
    }
}

/// A client for the LPC111x/LPC11Cxx in-system-programmer bootloader
pub struct IspFlasher<S, R> {
    sdo: SdoClient<S, R>,
}

impl<S: AsyncCanSender, R: AsyncCanReceiver> IspFlasher<S, R> {
    /// Wrap an already-constructed SDO client bound to the bootloader's node id
    pub fn new(sdo: SdoClient<S, R>) -> Self {
        Self { sdo }
    }

    async fn unlock(&mut self) -> Result<(), IspError> {
        self.sdo
            .write_u16(isp_ids::UNLOCK, 0, UNLOCK_CODE)
            .await
            .map_err(IspError::from)
    }

    async fn prepare_sectors(&mut self, start: u8, end: u8) -> Result<(), IspError> {
        let value = start as u16 | ((end as u16) << 8);
        self.sdo
            .write_u16(isp_ids::PREPARE_SECTORS, 0, value)
            .await
            .map_err(IspError::from)
    }

    async fn erase_sectors(&mut self, start: u8, end: u8) -> Result<(), IspError> {
        let value = start as u16 | ((end as u16) << 8);
        self.sdo
            .write_u16(isp_ids::ERASE_SECTORS, 0, value)
            .await
            .map_err(IspError::from)
    }

    async fn stage_block_to_ram(&mut self, block: &[u8]) -> Result<(), IspError> {
        self.sdo
            .write_u32(isp_ids::RAM_ADDRESS, 0, RAM_STAGING_ADDRESS)
            .await?;
        self.sdo
            .download(isp_ids::PROGRAM_AREA, 1, block)
            .await
            .map_err(IspError::from)
    }

    async fn copy_ram_to_flash(&mut self, flash_addr: u32, len: u32) -> Result<(), IspError> {
        self.sdo.write_u32(isp_ids::COPY, 1, flash_addr).await?;
        self.sdo
            .write_u32(isp_ids::COPY, 2, RAM_STAGING_ADDRESS)
            .await?;
        self.sdo
            .write_u32(isp_ids::COPY, 3, len)
            .await
            .map_err(IspError::from)
    }

    /// Flash an image into the given region, starting at the given sector
    ///
    /// `image` is padded with `0xFF` to the next [`BLOCK_SIZE`] boundary. For the flash
    /// region, the vector-table checksum of the first block is corrected in place before
    /// writing (see [`fix_checksum`]).
    pub async fn flash_image(
        &mut self,
        region: Region,
        start_sector: u8,
        image: &[u8],
    ) -> Result<(), IspError> {
        if image.len() > region.max_len() {
            return Err(IspError::ImageTooLarge {
                len: image.len(),
                max: region.max_len(),
            });
        }

        let sector_count = image.len().div_ceil(BLOCK_SIZE) as u8;
        let padded_len = sector_count as usize * BLOCK_SIZE;
        let mut padded = image.to_vec();
        padded.resize(padded_len, 0xFF);

        if region == Region::Flash {
            fix_checksum(&mut padded[0..BLOCK_SIZE]);
        }

        self.unlock().await?;

        let (start, end) = region.sector_range(start_sector, sector_count);
        self.prepare_sectors(start, end).await?;
        self.erase_sectors(start, end).await?;

        for i in 0..sector_count {
            let block = &padded[i as usize * BLOCK_SIZE..(i as usize + 1) * BLOCK_SIZE];
            self.stage_block_to_ram(block).await?;

            let (sector, _) = region.sector_range(start_sector + i, 1);
            self.prepare_sectors(sector, sector).await?;

            let flash_addr = sector as u32 * BLOCK_SIZE as u32;
            self.copy_ram_to_flash(flash_addr, BLOCK_SIZE as u32)
                .await?;
        }

        Ok(())
    }

    /// Read `len` bytes starting at `addr` via the bootloader's RAM-staged read path
    pub async fn read_memory(&mut self, addr: u32, len: u32) -> Result<Vec<u8>, IspError> {
        self.sdo.write_u32(0x5010, 0, addr).await?;
        self.sdo.write_u32(0x5011, 0, len).await?;
        self.sdo
            .upload(isp_ids::PROGRAM_AREA, 1)
            .await
            .map_err(IspError::from)
    }

    /// Jump to `addr` and begin executing user code there
    pub async fn go(&mut self, addr: u32) -> Result<(), IspError> {
        self.sdo.write_u32(isp_ids::EXEC_ADDRESS, 1, addr).await?;
        self.sdo
            .write_u8(isp_ids::PROGRAM_CONTROL, 1, 1)
            .await
            .map_err(IspError::from)
    }

    /// Read the bootloader-reported part id and decode it against the bundled table
    pub async fn read_part_id(&mut self) -> Result<(u32, Option<&'static str>), IspError> {
        let part_id = self.sdo.upload_u32(isp_ids::IDENTITY, 2).await?;
        Ok((part_id, isp::part_name(part_id)))
    }

    /// Read the four u32 words of the chip's factory serial number
    pub async fn read_serial_number(&mut self) -> Result<[u32; 4], IspError> {
        let mut out = [0u32; 4];
        for (i, word) in out.iter_mut().enumerate() {
            *word = self
                .sdo
                .upload_u32(isp_ids::SERIAL_NUMBER, (i + 1) as u8)
                .await?;
        }
        Ok(out)
    }

    /// Read the bootloader version
    pub async fn read_bootloader_version(&mut self) -> Result<u32, IspError> {
        self.sdo
            .upload_u32(isp_ids::IDENTITY, 3)
            .await
            .map_err(IspError::from)
    }

    /// Read the raw device type word
    pub async fn read_device_type(&mut self) -> Result<u32, IspError> {
        self.sdo
            .upload_u32(isp_ids::DEVICE_TYPE, 0)
            .await
            .map_err(IspError::from)
    }

    /// Compare `len` bytes between two addresses
    ///
    /// On an `IspAbortCode::CompareError` abort, reads the mismatch offset sub-index and
    /// surfaces it as [`IspError::CompareMismatch`].
    pub async fn compare(&mut self, addr1: u32, addr2: u32, len: u32) -> Result<(), IspError> {
        self.sdo.write_u32(isp_ids::COMPARE, 1, addr1).await?;
        self.sdo.write_u32(isp_ids::COMPARE, 2, addr2).await?;
        match self.sdo.write_u32(isp_ids::COMPARE, 3, len).await {
            Ok(()) => Ok(()),
            Err(SdoClientError::ServerAbort {
                abort_code: RawAbortCode::Unknown(code),
                ..
            }) if code == IspAbortCode::CompareError as u32 => {
                let offset = self.sdo.upload_u32(isp_ids::COMPARE, 4).await?;
                Err(IspError::CompareMismatch { offset })
            }
            Err(e) => Err(IspError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_region_sector_range_follows_config_offset() {
        assert_eq!(Region::Flash.sector_range(0, 7), (0, 6));
        assert_eq!(Region::Config.sector_range(0, 1), (7, 7));
    }

    #[test]
    fn region_max_len_matches_sector_budget() {
        assert_eq!(Region::Flash.max_len(), 7 * BLOCK_SIZE);
        assert_eq!(Region::Config.max_len(), BLOCK_SIZE);
    }
}
