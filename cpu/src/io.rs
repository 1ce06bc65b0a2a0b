//! The port-extender interface: how transfer words reach the outside
//! world.
//!
//! A device-pointer word selects one of four ports; a device transfer
//! then addresses a device behind that port with the `D` field and
//! moves a low nibble, a high nibble, or a whole byte.  Whether
//! anything is actually wired up there is the port extender's
//! business: an unmapped access is reported with a sentinel value, and
//! the control unit turns it into a [`DeviceEvent`] for the caller
//! instead of halting (or worse, dialoging) — the step itself
//! completes and the target register is simply left alone.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use base::prelude::TransferWidth;

/// One of the four extender ports, selected by the device-pointer
/// register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Port(u8);

impl Port {
    pub fn new(select: u8) -> Port {
        Port(select & 0x3)
    }

    pub fn select(self) -> u8 {
        self.0
    }

    /// The wire encoding of a port access: port select in the high
    /// bits, transfer width in the low two.
    pub fn code(self, width: TransferWidth) -> u8 {
        (self.0 << 2)
            | match width {
                TransferWidth::LowNibble => 1,
                TransferWidth::HighNibble => 2,
                TransferWidth::FullByte => 3,
            }
    }
}

impl Display for Port {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "port {}", self.0)
    }
}

/// Returned by a write to (or signalled by a read from) a port with no
/// device mapped behind it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnknownDevice;

impl Display for UnknownDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str("no device is mapped at this port")
    }
}

impl Error for UnknownDevice {}

/// Which way a device transfer was headed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PortAccess {
    Read,
    Write,
}

/// A condition the caller may want to surface.  Drained from the
/// control unit with `take_events`; never fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DeviceEvent {
    /// A transfer addressed a port with nothing behind it (or ran
    /// before any device-pointer word selected a port).
    UnknownDevice {
        /// The device address from the word's `D` field.
        address: u8,
        /// The selected port, if a device-pointer word ever ran.
        port: Option<Port>,
        width: TransferWidth,
        access: PortAccess,
    },
}

impl Display for DeviceEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            DeviceEvent::UnknownDevice {
                address,
                port,
                access,
                ..
            } => {
                let verb = match access {
                    PortAccess::Read => "read from",
                    PortAccess::Write => "write to",
                };
                match port {
                    Some(port) => write!(f, "{verb} unmapped device {address} on {port}"),
                    None => write!(
                        f,
                        "{verb} device {address} before any port was selected"
                    ),
                }
            }
        }
    }
}

/// The external device backend.  Implementations return the
/// unknown-device sentinel instead of failing; the simulator keeps
/// stepping either way.
pub trait PortExtender {
    /// Read a byte from `address` behind `port`.  `None` means no
    /// device is mapped there.
    fn read(&mut self, address: u8, port: Port, width: TransferWidth) -> Option<u8>;

    /// Write a byte to `address` behind `port`.
    fn write(
        &mut self,
        address: u8,
        port: Port,
        width: TransferWidth,
        value: u8,
    ) -> Result<(), UnknownDevice>;
}

/// An extender with nothing attached: every access is unknown.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPorts;

impl PortExtender for NullPorts {
    fn read(&mut self, _address: u8, _port: Port, _width: TransferWidth) -> Option<u8> {
        None
    }

    fn write(
        &mut self,
        _address: u8,
        _port: Port,
        _width: TransferWidth,
        _value: u8,
    ) -> Result<(), UnknownDevice> {
        Err(UnknownDevice)
    }
}

/// A byte latch behind every port/address pair: writes are stored and
/// read back verbatim.  Good enough for exercising device microcode
/// without real hardware.
#[derive(Clone, Debug)]
pub struct LoopbackPorts {
    latches: [[u8; 16]; 4],
}

impl Default for LoopbackPorts {
    fn default() -> LoopbackPorts {
        LoopbackPorts {
            latches: [[0; 16]; 4],
        }
    }
}

impl PortExtender for LoopbackPorts {
    fn read(&mut self, address: u8, port: Port, _width: TransferWidth) -> Option<u8> {
        Some(self.latches[port.select() as usize][(address & 0xF) as usize])
    }

    fn write(
        &mut self,
        address: u8,
        port: Port,
        _width: TransferWidth,
        value: u8,
    ) -> Result<(), UnknownDevice> {
        self.latches[port.select() as usize][(address & 0xF) as usize] = value;
        Ok(())
    }
}
