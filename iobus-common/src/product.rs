//! Static product descriptor table
//!
//! Maps the `(vendor, product, revision)` triple of an LSS factory address to a
//! human-readable name prefix, default pin names, and the bundled firmware for that
//! hardware family. Every product known to this implementation is listed in
//! [`KNOWN_PRODUCTS`]; anything else falls back to [`find_product`]'s generic
//! `Unknown-<address>` descriptor.

use crate::lss::LssIdentity;

/// Default pin name tables bundled with a product descriptor
#[derive(Clone, Copy, Debug)]
pub struct PinNames {
    /// ADC channel names, in channel order
    pub adc: &'static [&'static str],
    /// Digital input channel names, in channel order
    pub input: &'static [&'static str],
    /// Digital output channel names, in channel order
    pub output: &'static [&'static str],
}

/// Bundled firmware identified for a product
#[derive(Clone, Copy, Debug)]
pub struct BundledFirmware {
    /// Firmware version as (major, minor, patch)
    pub version: (u8, u8, u8),
    /// Filename of the bundled firmware image
    pub filename: &'static str,
}

/// A statically known hardware product
#[derive(Clone, Copy, Debug)]
pub struct ProductDescriptor {
    /// LSS vendor id
    pub vendor_id: u32,
    /// LSS product code
    pub product_code: u32,
    /// LSS revision number
    pub revision: u32,
    /// Name prefix; the zero-padded serial number is appended to form the full name
    pub name_prefix: &'static str,
    /// Default pin names for this product, if any are defined
    pub pins: Option<PinNames>,
    /// Bundled firmware for this product, if any
    pub firmware: Option<BundledFirmware>,
}

impl ProductDescriptor {
    /// Construct the full human-readable device name for a given serial number
    pub fn name(&self, serial: u32) -> String {
        format!("{}{:05}", self.name_prefix, serial)
    }
}

/// The bundled product table
pub const KNOWN_PRODUCTS: &[ProductDescriptor] = &[
    ProductDescriptor {
        vendor_id: 0x507,
        product_code: 2,
        revision: 3,
        name_prefix: "4DO-3DI-3AI-00005.",
        pins: Some(PinNames {
            adc: &["VIN", "AIN0", "AIN1", "AIN2"],
            input: &["IN0", "IN1", "IN2"],
            output: &["OUT0", "OUT1", "OUT2", "OUT3"],
        }),
        firmware: Some(BundledFirmware {
            version: (0, 6, 0),
            filename: "lxatac_can_io-t01.bin",
        }),
    },
    ProductDescriptor {
        vendor_id: 0,
        product_code: 4,
        revision: 1,
        name_prefix: "PTXIOMux-00004.",
        pins: Some(PinNames {
            adc: &["AIN0", "AIN1", "AIN2", "VIN"],
            input: &["IN4", "IN5", "IN6"],
            output: &["OUT0", "OUT1", "OUT2", "OUT3"],
        }),
        firmware: Some(BundledFirmware {
            version: (0, 3, 0),
            filename: "ptxtac-S03_CAN_GPIO.bin",
        }),
    },
    ProductDescriptor {
        vendor_id: 0x507,
        product_code: 1,
        revision: 4,
        name_prefix: "Ethernet-Mux-00012.",
        pins: Some(PinNames {
            adc: &["AIN0", "VIN"],
            input: &["SW_IN", "SW_EXT"],
            output: &["SW"],
        }),
        firmware: Some(BundledFirmware {
            version: (0, 6, 0),
            filename: "ethmux-S01.bin",
        }),
    },
    ProductDescriptor {
        vendor_id: 0x507,
        product_code: 3,
        revision: 1,
        name_prefix: "Optick-00043.",
        pins: Some(PinNames {
            adc: &["IN0_RAW", "IN1_RAW", "VIN"],
            input: &["IN0", "IN1"],
            output: &["OUT0", "OUT1"],
        }),
        firmware: Some(BundledFirmware {
            version: (0, 6, 0),
            filename: "optick-t01.bin",
        }),
    },
];

/// A resolved product: either a known descriptor, or an unknown fallback carrying just
/// the device's human name.
#[derive(Clone, Debug)]
pub enum ResolvedProduct {
    /// Matched a known product descriptor
    Known(&'static ProductDescriptor, u32),
    /// No known descriptor matched; the bus address is used to form the name
    Unknown(String),
}

impl ResolvedProduct {
    /// The human-readable name of this product
    pub fn name(&self) -> String {
        match self {
            ResolvedProduct::Known(desc, serial) => desc.name(*serial),
            ResolvedProduct::Unknown(name) => name.clone(),
        }
    }

    /// The default pin names for this product, if known
    pub fn pins(&self) -> Option<PinNames> {
        match self {
            ResolvedProduct::Known(desc, _) => desc.pins,
            ResolvedProduct::Unknown(_) => None,
        }
    }

    /// The bundled firmware for this product, if any
    pub fn firmware(&self) -> Option<BundledFirmware> {
        match self {
            ResolvedProduct::Known(desc, _) => desc.firmware,
            ResolvedProduct::Unknown(_) => None,
        }
    }
}

/// Resolve a factory address to a product descriptor, falling back to a generic
/// `Unknown-<address>` name when no known product matches.
pub fn find_product(identity: LssIdentity) -> ResolvedProduct {
    for desc in KNOWN_PRODUCTS {
        if desc.vendor_id == identity.vendor_id
            && desc.product_code == identity.product_code
            && desc.revision == identity.revision
        {
            return ResolvedProduct::Known(desc, identity.serial);
        }
    }
    ResolvedProduct::Unknown(format!(
        "Unknown-{:08x}.{:08x}.{:08x}.{:08x}",
        identity.vendor_id, identity.product_code, identity.revision, identity.serial
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_product() {
        let id = LssIdentity::new(0x507, 2, 3, 5);
        let resolved = find_product(id);
        assert_eq!(resolved.name(), "4DO-3DI-3AI-00005.00005");
        assert!(resolved.firmware().is_some());
    }

    #[test]
    fn falls_back_to_unknown() {
        let id = LssIdentity::new(0xdead, 0xbeef, 1, 42);
        let resolved = find_product(id);
        assert!(matches!(resolved, ResolvedProduct::Unknown(_)));
        assert!(resolved.name().starts_with("Unknown-"));
        assert!(resolved.pins().is_none());
    }
}
