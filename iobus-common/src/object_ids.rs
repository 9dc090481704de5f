//! Standard and IOBus-specific object dictionary indices
//!
//! The 0x1000 range is the CANopen standard identity/naming block; 0x2000 and above
//! are this protocol's PDO groups, discovered at runtime via [`SUPPORTED_PROTOCOLS`].

/// The device name object index (VisibleString)
pub const DEVICE_NAME: u16 = 0x1008;
/// The hardware version object index (VisibleString)
pub const HARDWARE_VERSION: u16 = 0x1009;
/// The software version object index (VisibleString)
pub const SOFTWARE_VERSION: u16 = 0x100A;
/// The identity object index: sub 1 vendor, sub 2 product, sub 3 revision, sub 4 serial
pub const IDENTITY: u16 = 0x1018;

/// Supported protocols list: sub 0 = count, sub k = u32 protocol index
pub const SUPPORTED_PROTOCOLS: u16 = 0x2000;
/// Vendor version info block
pub const VENDOR_VERSION_INFO: u16 = 0x2001;
/// Digital outputs block
pub const OUTPUTS: u16 = 0x2100;
/// Digital inputs block
pub const INPUTS: u16 = 0x2101;
/// Timer/capture-compare block
pub const TIMERS: u16 = 0x2102;
/// Threshold trigger comparators
pub const TRIGGERS: u16 = 0x2103;
/// Locator LED
pub const LOCATOR: u16 = 0x210C;
/// ADC channels
pub const ADCS: u16 = 0x2ADC;
/// Bootloader-entry trigger (write-only)
pub const BOOTLOADER_TRIGGER: u16 = 0x2B07;
/// Chip unique id, 4 x u32
pub const CHIP_UID: u16 = 0x2C1D;
/// SDO server-timeout watchdog enable
pub const WATCHDOG: u16 = 0x2D06;

/// Magic value written to [`BOOTLOADER_TRIGGER`] to request a bootloader-mode reset
pub const BOOTLOADER_TRIGGER_MAGIC: u32 = 0x1234_5678;
