//! Register backend (C1): the simulated camera's mutable state.
//!
//! Mirrors the source's `ArvGvcpProxyBackendVTable` as a Rust trait so the
//! engine can be written against `dyn RegisterBackend` the way the source
//! dispatches through a v-table. `destroy()` has no counterpart here —
//! `Drop` already does that job.

use std::net::Ipv4Addr;

use thiserror::Error;

/// Named register offsets recognised by the core. Values are this crate's
/// own consistent assignment except `CONTROL_CHANNEL_PRIVILEGE`, which is
/// pinned by the write/read-privilege scenario this simulator is tested
/// against.
pub mod regs {
    pub const DISCOVERY_DATA: u32 = 0x0000_0000;
    pub const DISCOVERY_DATA_SIZE: usize = 248;

    pub const HEARTBEAT_TIMEOUT: u32 = 0x0000_0938;
    pub const CONTROL_CHANNEL_PRIVILEGE: u32 = 0x0000_0A00;

    pub const STREAM_CHANNEL_0_IP_ADDRESS: u32 = 0x0000_0D00;
    pub const STREAM_CHANNEL_0_PORT: u32 = 0x0000_0D04;
    pub const STREAM_CHANNEL_0_PACKET_SIZE: u32 = 0x0000_0D08;

    pub const SENSOR_WIDTH: u32 = 0x0000_1000;
    pub const SENSOR_HEIGHT: u32 = 0x0000_1004;
    pub const WIDTH: u32 = 0x0000_1008;
    pub const HEIGHT: u32 = 0x0000_100C;
    pub const X_OFFSET: u32 = 0x0000_1010;
    pub const Y_OFFSET: u32 = 0x0000_1014;
    pub const BINNING_HORIZONTAL: u32 = 0x0000_1018;
    pub const BINNING_VERTICAL: u32 = 0x0000_101C;
    pub const PIXEL_FORMAT: u32 = 0x0000_1020;
    pub const ACQUISITION_STATUS: u32 = 0x0000_1024;
}

/// Default heartbeat timeout (milliseconds) before the register has ever
/// been written, per the GigE Vision keep-alive convention.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u32 = 3000;

/// Lowest byte memory backends must provide.
pub const MEMORY_SIZE: usize = 0x1_0000;

/// Errors a [`RegisterBackend`] implementation can report.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("address {address:#010x} out of range for a {len}-byte access")]
    OutOfRange { address: u32, len: usize },
    #[error("backend \"{0}\" is not supported")]
    Unsupported(String),
}

/// Capability trait the GVCP engine drives. Implementations need not be
/// thread-safe: the engine serialises all access behind one mutex.
pub trait RegisterBackend: Send {
    /// Read `size` bytes starting at `address`.
    fn read_memory(&self, address: u32, size: usize) -> Result<Vec<u8>, BackendError>;

    /// Write `data` starting at `address`.
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), BackendError>;

    /// Read the 32-bit big-endian value aliased at `address`.
    fn read_register(&self, address: u32) -> Result<u32, BackendError> {
        let bytes = self.read_memory(address, 4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Write a 32-bit big-endian value aliased at `address`.
    fn write_register(&mut self, address: u32, value: u32) -> Result<(), BackendError> {
        self.write_memory(address, &value.to_be_bytes())
    }

    /// Record the local interface IP address that discovery replies echo.
    fn set_inet_address(&mut self, ip: Ipv4Addr);

    /// Notify the backend that a stream channel 0 register changed.
    /// Default implementation is a no-op; only the sink form cares.
    fn stream_config_changed(&mut self, _ip: Ipv4Addr, _port: u16, _packet_size: u32) {}
}

/// In-process simulated camera: a flat byte memory plus register aliasing.
pub struct FakeCamera {
    memory: Vec<u8>,
    serial_number: String,
}

impl FakeCamera {
    /// Construct a camera with its discovery descriptor populated from
    /// `serial_number`. `genicam_filename` is accepted for API symmetry
    /// with the source's backend factory but otherwise unused: GenICam XML
    /// loading is an external collaborator.
    pub fn new(serial_number: impl Into<String>, _genicam_filename: Option<&str>) -> Self {
        let serial_number = serial_number.into();
        let mut memory = vec![0u8; MEMORY_SIZE];
        write_discovery_descriptor(&mut memory, &serial_number, Ipv4Addr::UNSPECIFIED);
        write_be_u32(&mut memory, regs::HEARTBEAT_TIMEOUT, DEFAULT_HEARTBEAT_TIMEOUT_MS);
        Self {
            memory,
            serial_number,
        }
    }

    /// Serial number baked into the discovery descriptor.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }
}

impl RegisterBackend for FakeCamera {
    fn read_memory(&self, address: u32, size: usize) -> Result<Vec<u8>, BackendError> {
        let start = address as usize;
        let end = start
            .checked_add(size)
            .ok_or(BackendError::OutOfRange { address, len: size })?;
        self.memory
            .get(start..end)
            .map(|s| s.to_vec())
            .ok_or(BackendError::OutOfRange { address, len: size })
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), BackendError> {
        let start = address as usize;
        let end = start
            .checked_add(data.len())
            .ok_or(BackendError::OutOfRange {
                address,
                len: data.len(),
            })?;
        let slice = self
            .memory
            .get_mut(start..end)
            .ok_or(BackendError::OutOfRange {
                address,
                len: data.len(),
            })?;
        slice.copy_from_slice(data);
        Ok(())
    }

    fn set_inet_address(&mut self, ip: Ipv4Addr) {
        write_discovery_descriptor(&mut self.memory, &self.serial_number, ip);
    }
}

/// Build the `"fake"`/`"memory"` backend, matching
/// `arv_gvcp_proxy_backend_new`'s name dispatch: both names yield the same
/// in-process simulated camera, anything else fails `Unsupported`.
pub fn new(
    name: &str,
    serial_number: &str,
    genicam_filename: Option<&str>,
) -> Result<Box<dyn RegisterBackend>, BackendError> {
    match name {
        "fake" | "memory" => Ok(Box::new(FakeCamera::new(serial_number, genicam_filename))),
        other => Err(BackendError::Unsupported(other.to_string())),
    }
}

fn write_be_u32(memory: &mut [u8], address: u32, value: u32) {
    let start = address as usize;
    memory[start..start + 4].copy_from_slice(&value.to_be_bytes());
}

fn write_padded(memory: &mut [u8], offset: usize, len: usize, value: &str) {
    let bytes = value.as_bytes();
    let copy_len = bytes.len().min(len);
    memory[offset..offset + copy_len].copy_from_slice(&bytes[..copy_len]);
    for b in &mut memory[offset + copy_len..offset + len] {
        *b = 0;
    }
}

/// Populate the 248-byte discovery descriptor at memory offset 0.
///
/// Field layout (all multi-byte fields big-endian):
/// ```text
/// 0..2    spec_version_major   u16
/// 2..4    spec_version_minor   u16
/// 4..8    device_mode          u32
/// 8..10   device_class         u16
/// 10..12  device_capability    u16
/// 12..18  mac                  [u8; 6]
/// 18..20  ip_config_options    u16
/// 20..22  ip_config_current    u16
/// 22..26  ip                   u32
/// 26..30  subnet               u32
/// 30..34  gateway              u32
/// 34..66  manufacturer         [u8; 32]
/// 66..98  model                [u8; 32]
/// 98..130 device_version       [u8; 32]
/// 130..178 manufacturer_info   [u8; 48]
/// 178..194 serial_number       [u8; 16]
/// 194..210 user_name           [u8; 16]
/// 210..248 reserved            zero
/// ```
fn write_discovery_descriptor(memory: &mut [u8], serial_number: &str, ip: Ipv4Addr) {
    let region = &mut memory[0..regs::DISCOVERY_DATA_SIZE];
    for b in region.iter_mut() {
        *b = 0;
    }
    region[0..2].copy_from_slice(&1u16.to_be_bytes()); // spec_version_major
    region[2..4].copy_from_slice(&2u16.to_be_bytes()); // spec_version_minor
                                                        // device_mode, device_class, device_capability, mac, ip_config left zeroed.
    region[22..26].copy_from_slice(&u32::from(ip).to_be_bytes());
    write_padded(region, 34, 32, "GenICam-rs");
    write_padded(region, 66, 32, "GVCP Simulator");
    write_padded(region, 98, 32, "1.0");
    write_padded(region, 178, 16, serial_number);
    write_padded(region, 194, 16, "ARV-SINK");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_descriptor_carries_serial_number() {
        let camera = FakeCamera::new("ARV-SINK", None);
        let data = camera
            .read_memory(regs::DISCOVERY_DATA, regs::DISCOVERY_DATA_SIZE)
            .unwrap();
        assert_eq!(data.len(), regs::DISCOVERY_DATA_SIZE);
        let serial = &data[178..178 + 8];
        assert_eq!(serial, b"ARV-SINK");
        assert!(data[178 + 8..194].iter().all(|&b| b == 0));
    }

    #[test]
    fn register_aliases_memory() {
        let mut camera = FakeCamera::new("ARV-SINK", None);
        camera
            .write_register(regs::CONTROL_CHANNEL_PRIVILEGE, 2)
            .unwrap();
        assert_eq!(
            camera.read_register(regs::CONTROL_CHANNEL_PRIVILEGE).unwrap(),
            2
        );
        let raw = camera
            .read_memory(regs::CONTROL_CHANNEL_PRIVILEGE, 4)
            .unwrap();
        assert_eq!(u32::from_be_bytes(raw.try_into().unwrap()), 2);
    }

    #[test]
    fn heartbeat_timeout_defaults_to_3000ms() {
        let camera = FakeCamera::new("ARV-SINK", None);
        assert_eq!(
            camera.read_register(regs::HEARTBEAT_TIMEOUT).unwrap(),
            DEFAULT_HEARTBEAT_TIMEOUT_MS
        );
    }

    #[test]
    fn out_of_range_access_fails() {
        let camera = FakeCamera::new("ARV-SINK", None);
        let err = camera.read_memory(MEMORY_SIZE as u32 - 2, 4).unwrap_err();
        assert_eq!(
            err,
            BackendError::OutOfRange {
                address: MEMORY_SIZE as u32 - 2,
                len: 4
            }
        );
    }

    #[test]
    fn factory_rejects_unknown_backend() {
        let err = new("nope", "s", None).unwrap_err();
        assert_eq!(err, BackendError::Unsupported("nope".to_string()));
    }

    #[test]
    fn factory_accepts_fake_and_memory() {
        assert!(new("fake", "s", None).is_ok());
        assert!(new("memory", "s", None).is_ok());
    }
}
