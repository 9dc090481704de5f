//! Typed wrappers around a node's indexed object directory
//!
//! At node init, [`ObjectDirectory::discover`] reads index `0x2000` to learn which PDO
//! groups a node supports, then builds only the typed wrappers for those groups. A
//! wrapper failing to initialize is logged and skipped; it never aborts the others.

use iobus_common::object_ids;
use iobus_common::traits::{AsyncCanReceiver, AsyncCanSender};

use crate::sdo_client::{SdoClient, SdoClientError};

/// Error from reading the supported-protocols list itself
pub type DirectoryError = SdoClientError;

/// Digital outputs group (`0x2100`)
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    /// Per-channel pin counts
    pub channel_pin_counts: Vec<u8>,
    /// Per-channel speculative local state (low 16 bits of the last written word)
    state: Vec<u16>,
}

impl Outputs {
    async fn discover<S: AsyncCanSender, R: AsyncCanReceiver>(
        sdo: &mut SdoClient<S, R>,
    ) -> Result<Self, SdoClientError> {
        let count_x2 = sdo.upload_u32(object_ids::OUTPUTS, 0).await?;
        let n = (count_x2 / 2) as u8;
        let mut channel_pin_counts = Vec::with_capacity(n as usize);
        let mut state = Vec::with_capacity(n as usize);
        for c in 0..n {
            let pin_count = sdo.upload_u32(object_ids::OUTPUTS, 2 * c + 1).await? as u8;
            let word = sdo.upload_u32(object_ids::OUTPUTS, 2 * c + 2).await?;
            channel_pin_counts.push(pin_count);
            state.push(word as u16);
        }
        Ok(Self {
            channel_pin_counts,
            state,
        })
    }

    /// Set the masked bits of `channel` to `data`, leaving the rest unchanged
    ///
    /// Builds `((mask << 16) | (value & mask))` so unselected pins retain their state,
    /// then replays the resulting word into the local speculative copy.
    pub async fn set_masked<S: AsyncCanSender, R: AsyncCanReceiver>(
        &mut self,
        sdo: &mut SdoClient<S, R>,
        channel: u16,
        mask: u16,
        data: u16,
    ) -> Result<(), SdoClientError> {
        let word = ((mask as u32) << 16) | (data as u32 & mask as u32);
        sdo.write_u32(object_ids::OUTPUTS, 2 * channel as u8 + 2, word)
            .await?;
        if let Some(local) = self.state.get_mut(channel as usize) {
            *local = apply_mask(*local, mask, data);
        }
        Ok(())
    }

    /// Set a single pin high
    pub async fn set_high<S: AsyncCanSender, R: AsyncCanReceiver>(
        &mut self,
        sdo: &mut SdoClient<S, R>,
        channel: u16,
        bit: u16,
    ) -> Result<(), SdoClientError> {
        self.set_masked(sdo, channel, 1 << bit, 1 << bit).await
    }

    /// Set a single pin low
    pub async fn set_low<S: AsyncCanSender, R: AsyncCanReceiver>(
        &mut self,
        sdo: &mut SdoClient<S, R>,
        channel: u16,
        bit: u16,
    ) -> Result<(), SdoClientError> {
        self.set_masked(sdo, channel, 1 << bit, 0).await
    }

    /// Toggle a single pin based on the local speculative state
    pub async fn toggle<S: AsyncCanSender, R: AsyncCanReceiver>(
        &mut self,
        sdo: &mut SdoClient<S, R>,
        channel: u16,
        bit: u16,
    ) -> Result<(), SdoClientError> {
        let current = self.state.get(channel as usize).copied().unwrap_or(0);
        let new_bit = !(current & (1 << bit)) & (1 << bit);
        self.set_masked(sdo, channel, 1 << bit, new_bit).await
    }

    /// Re-send the local speculative state in full, e.g. after a node reset
    pub async fn restore_state<S: AsyncCanSender, R: AsyncCanReceiver>(
        &mut self,
        sdo: &mut SdoClient<S, R>,
    ) -> Result<(), SdoClientError> {
        for (channel, state) in self.state.clone().iter().enumerate() {
            self.set_masked(sdo, channel as u16, 0xFFFF, *state).await?;
        }
        Ok(())
    }
}

/// Apply the output-masking law: `new[i] = data[i] if mask[i] else old[i]`
fn apply_mask(old: u16, mask: u16, data: u16) -> u16 {
    (old & !mask) | (data & mask)
}

/// Digital inputs group (`0x2101`)
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    /// Per-channel pin counts
    pub channel_pin_counts: Vec<u8>,
}

impl Inputs {
    async fn discover<S: AsyncCanSender, R: AsyncCanReceiver>(
        sdo: &mut SdoClient<S, R>,
    ) -> Result<Self, SdoClientError> {
        let count_x2 = sdo.upload_u32(object_ids::INPUTS, 0).await?;
        let n = (count_x2 / 2) as u8;
        let mut channel_pin_counts = Vec::with_capacity(n as usize);
        for c in 0..n {
            channel_pin_counts.push(sdo.upload_u32(object_ids::INPUTS, 2 * c + 1).await? as u8);
        }
        Ok(Self { channel_pin_counts })
    }

    /// Read the current state word for a channel
    pub async fn read<S: AsyncCanSender, R: AsyncCanReceiver>(
        &self,
        sdo: &mut SdoClient<S, R>,
        channel: u16,
    ) -> Result<u32, SdoClientError> {
        sdo.upload_u32(object_ids::INPUTS, 2 * channel as u8 + 2)
            .await
    }
}

/// ADC channel group (`0x2ADC`)
#[derive(Debug, Clone, Default)]
pub struct Adcs {
    /// Number of ADC channels
    pub channel_count: u16,
}

impl Adcs {
    async fn discover<S: AsyncCanSender, R: AsyncCanReceiver>(
        sdo: &mut SdoClient<S, R>,
    ) -> Result<Self, SdoClientError> {
        let channel_count = sdo.upload_u32(object_ids::ADCS, 0).await? as u16;
        let _version = sdo.upload_u32(object_ids::ADCS, 1).await?;
        Ok(Self { channel_count })
    }

    /// Read a calibrated ADC value: `(raw + offset) * scale`
    pub async fn read<S: AsyncCanSender, R: AsyncCanReceiver>(
        &self,
        sdo: &mut SdoClient<S, R>,
        channel: u16,
    ) -> Result<f32, SdoClientError> {
        let base = 4 * (channel + 1) as u8;
        let raw = sdo.upload_u16(object_ids::ADCS, base).await?;
        let offset = sdo.upload_i32(object_ids::ADCS, base + 1).await?;
        let scale = sdo.upload_f32(object_ids::ADCS, base + 2).await?;
        Ok(calibrate(raw, offset, scale))
    }
}

/// Apply the ADC calibration law: `(raw + offset) * scale`
pub fn calibrate(raw: u16, offset: i32, scale: f32) -> f32 {
    ((raw as i32 + offset) as f32) * scale
}

/// Timer/capture group (`0x2102`)
#[derive(Debug, Clone, Default)]
pub struct Timers {
    /// Number of output (capture-generating) timer channels
    pub channel_count_out: u16,
    /// Number of input (capture-receiving) timer channels
    pub channel_count_in: u16,
    /// Counter frequency in Hz
    pub frequency_hz: u32,
}

impl Timers {
    async fn discover<S: AsyncCanSender, R: AsyncCanReceiver>(
        sdo: &mut SdoClient<S, R>,
    ) -> Result<Self, SdoClientError> {
        let channel_count_out = sdo.upload_u32(object_ids::TIMERS, 0).await? as u16;
        let channel_count_in = sdo.upload_u32(object_ids::TIMERS, 1).await? as u16;
        let _version = sdo.upload_u32(object_ids::TIMERS, 2).await?;
        let frequency_hz = sdo.upload_u32(object_ids::TIMERS, 4).await?;
        Ok(Self {
            channel_count_out,
            channel_count_in,
            frequency_hz,
        })
    }

    /// The free-running counter's current value, in ticks at `frequency_hz`
    pub async fn current_time<S: AsyncCanSender, R: AsyncCanReceiver>(
        &self,
        sdo: &mut SdoClient<S, R>,
    ) -> Result<u64, SdoClientError> {
        sdo.upload_u64(object_ids::TIMERS, 5).await
    }

    /// Raw flag bit-field: overflow/missed bits for each output channel, then overflow bits
    /// for each input channel
    pub async fn flags<S: AsyncCanSender, R: AsyncCanReceiver>(
        &self,
        sdo: &mut SdoClient<S, R>,
    ) -> Result<u32, SdoClientError> {
        sdo.upload_u32(object_ids::TIMERS, 3).await
    }

    /// Raw bytes of channel `c`'s output (capture-generating) queue
    pub async fn read_output_queue<S: AsyncCanSender, R: AsyncCanReceiver>(
        &self,
        sdo: &mut SdoClient<S, R>,
        channel: u16,
    ) -> Result<Vec<u8>, SdoClientError> {
        sdo.upload(object_ids::TIMERS, (8 + channel) as u8).await
    }

    /// Raw bytes of channel `c`'s input (capture-receiving) queue
    pub async fn read_input_queue<S: AsyncCanSender, R: AsyncCanReceiver>(
        &self,
        sdo: &mut SdoClient<S, R>,
        channel: u16,
    ) -> Result<Vec<u8>, SdoClientError> {
        sdo.upload(
            object_ids::TIMERS,
            (8 + self.channel_count_out + channel) as u8,
        )
        .await
    }
}

/// Threshold comparator group (`0x2103`)
#[derive(Debug, Clone, Default)]
pub struct Triggers {
    /// Number of trigger channels
    pub channel_count: u16,
}

impl Triggers {
    async fn discover<S: AsyncCanSender, R: AsyncCanReceiver>(
        sdo: &mut SdoClient<S, R>,
    ) -> Result<Self, SdoClientError> {
        let channel_count = sdo.upload_u32(object_ids::TRIGGERS, 0).await? as u16;
        let _version = sdo.upload_u32(object_ids::TRIGGERS, 1).await?;
        Ok(Self { channel_count })
    }

    /// The threshold for `channel`, scaled from its raw `u16` (`0..=0xFFFF`) onto `0.0..=1.0`
    pub async fn threshold<S: AsyncCanSender, R: AsyncCanReceiver>(
        &self,
        sdo: &mut SdoClient<S, R>,
        channel: u16,
    ) -> Result<f32, SdoClientError> {
        let raw = sdo.upload_u16(object_ids::TRIGGERS, 2 + channel as u8).await?;
        Ok(raw as f32 / u16::MAX as f32)
    }

    /// Set the threshold for `channel` from a `0.0..=1.0` fraction
    pub async fn set_threshold<S: AsyncCanSender, R: AsyncCanReceiver>(
        &self,
        sdo: &mut SdoClient<S, R>,
        channel: u16,
        fraction: f32,
    ) -> Result<(), SdoClientError> {
        let raw = (fraction.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16;
        sdo.write_u16(object_ids::TRIGGERS, 2 + channel as u8, raw)
            .await
    }
}

/// Vendor version info (`0x2001`): board revision, serial, and free-form notes
#[derive(Debug, Clone, Default)]
pub struct VendorVersionInfo {
    /// Protocol revision
    pub protocol: u32,
    /// Board revision
    pub board: u32,
    /// Board serial number
    pub serial: u32,
    /// Vendor name string
    pub vendor_name: String,
    /// Free-form notes, sometimes JSON-encoded by the vendor
    pub notes: String,
}

impl VendorVersionInfo {
    async fn discover<S: AsyncCanSender, R: AsyncCanReceiver>(
        sdo: &mut SdoClient<S, R>,
    ) -> Result<Self, SdoClientError> {
        Ok(Self {
            protocol: sdo.upload_u32(object_ids::VENDOR_VERSION_INFO, 1).await?,
            board: sdo.upload_u32(object_ids::VENDOR_VERSION_INFO, 2).await?,
            serial: sdo.upload_u32(object_ids::VENDOR_VERSION_INFO, 3).await?,
            vendor_name: sdo
                .read_visible_string(object_ids::VENDOR_VERSION_INFO, 4)
                .await?,
            notes: sdo
                .read_visible_string(object_ids::VENDOR_VERSION_INFO, 5)
                .await?,
        })
    }
}

/// Locator LED (`0x210C`)
#[derive(Debug, Clone, Copy, Default)]
pub struct Locator;

impl Locator {
    /// Set the locator LED on or off
    pub async fn set<S: AsyncCanSender, R: AsyncCanReceiver>(
        sdo: &mut SdoClient<S, R>,
        on: bool,
    ) -> Result<(), SdoClientError> {
        sdo.write_u32(object_ids::LOCATOR, 1, on as u32).await
    }

    /// Read the locator LED state
    pub async fn get<S: AsyncCanSender, R: AsyncCanReceiver>(
        sdo: &mut SdoClient<S, R>,
    ) -> Result<bool, SdoClientError> {
        Ok(sdo.upload_u32(object_ids::LOCATOR, 1).await? != 0)
    }
}

/// Chip unique id (`0x2C1D`)
pub async fn read_chip_uid<S: AsyncCanSender, R: AsyncCanReceiver>(
    sdo: &mut SdoClient<S, R>,
) -> Result<[u32; 4], SdoClientError> {
    let mut out = [0u32; 4];
    for (i, word) in out.iter_mut().enumerate() {
        *word = sdo.upload_u32(object_ids::CHIP_UID, i as u8).await?;
    }
    Ok(out)
}

/// Enable or disable the SDO server-timeout watchdog (`0x2D06`)
pub async fn set_watchdog<S: AsyncCanSender, R: AsyncCanReceiver>(
    sdo: &mut SdoClient<S, R>,
    enabled: bool,
) -> Result<(), SdoClientError> {
    sdo.write_u32(object_ids::WATCHDOG, 0, enabled as u32).await
}

/// Trigger a bootloader-mode reset by writing the magic value to `0x2B07`
///
/// No response is expected: the node resets into its bootloader before it can reply.
pub async fn trigger_bootloader<S: AsyncCanSender, R: AsyncCanReceiver>(
    sdo: &mut SdoClient<S, R>,
) {
    let _ = sdo
        .write_u32(
            object_ids::BOOTLOADER_TRIGGER,
            0,
            object_ids::BOOTLOADER_TRIGGER_MAGIC,
        )
        .await;
}

/// The set of typed groups discovered on a node, built from the `0x2000` supported-protocols list
#[derive(Debug, Clone, Default)]
pub struct ObjectDirectory {
    /// Outputs group, if supported
    pub outputs: Option<Outputs>,
    /// Inputs group, if supported
    pub inputs: Option<Inputs>,
    /// ADC group, if supported
    pub adcs: Option<Adcs>,
    /// Timer/capture group, if supported
    pub timers: Option<Timers>,
    /// Threshold comparator group, if supported
    pub triggers: Option<Triggers>,
    /// Vendor version info, if supported
    pub vendor_version_info: Option<VendorVersionInfo>,
    /// Locator LED, if supported
    pub locator: bool,
}

impl ObjectDirectory {
    /// Enumerate `0x2000` and build typed wrappers for every recognized supported index
    ///
    /// A wrapper that fails to initialize is logged and left absent; it does not abort
    /// enumeration of the others.
    pub async fn discover<S: AsyncCanSender, R: AsyncCanReceiver>(
        sdo: &mut SdoClient<S, R>,
    ) -> Result<Self, SdoClientError> {
        let count = sdo.upload_u32(object_ids::SUPPORTED_PROTOCOLS, 0).await?;
        let mut dir = ObjectDirectory::default();

        for k in 1..=count {
            let index = match sdo.upload_u32(object_ids::SUPPORTED_PROTOCOLS, k as u8).await {
                Ok(v) => v as u16,
                Err(e) => {
                    log::warn!("Failed reading supported protocol entry {k}: {e}");
                    continue;
                }
            };

            match index {
                object_ids::OUTPUTS => match Outputs::discover(sdo).await {
                    Ok(o) => dir.outputs = Some(o),
                    Err(e) => log::warn!("Failed to initialize outputs group: {e}"),
                },
                object_ids::INPUTS => match Inputs::discover(sdo).await {
                    Ok(i) => dir.inputs = Some(i),
                    Err(e) => log::warn!("Failed to initialize inputs group: {e}"),
                },
                object_ids::ADCS => match Adcs::discover(sdo).await {
                    Ok(a) => dir.adcs = Some(a),
                    Err(e) => log::warn!("Failed to initialize ADC group: {e}"),
                },
                object_ids::TIMERS => match Timers::discover(sdo).await {
                    Ok(t) => dir.timers = Some(t),
                    Err(e) => log::warn!("Failed to initialize timers group: {e}"),
                },
                object_ids::TRIGGERS => match Triggers::discover(sdo).await {
                    Ok(t) => dir.triggers = Some(t),
                    Err(e) => log::warn!("Failed to initialize triggers group: {e}"),
                },
                object_ids::VENDOR_VERSION_INFO => match VendorVersionInfo::discover(sdo).await {
                    Ok(v) => dir.vendor_version_info = Some(v),
                    Err(e) => log::warn!("Failed to read vendor version info: {e}"),
                },
                object_ids::LOCATOR => dir.locator = true,
                other => log::debug!("Unrecognized supported protocol index 0x{other:04X}"),
            }
        }

        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_law_applies_offset_then_scale() {
        assert_eq!(calibrate(100, -10, 2.0), 180.0);
        assert_eq!(calibrate(0, 0, 1.0), 0.0);
    }

    #[test]
    fn output_mask_law_leaves_unselected_bits_alone() {
        let old = 0b1010_1010_1010_1010;
        let mask = 0b0000_0000_1111_1111;
        let data = 0b1111_1111_0000_0000;
        // low byte takes data's low byte (all zero here), high byte keeps old's high byte
        assert_eq!(apply_mask(old, mask, data), 0b1010_1010_0000_0000);
    }
}
