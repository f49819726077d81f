//! Operation regions and the address-space handler registry.
//!
//! Field-unit accesses are turned into access-sized bursts and dispatched to
//! the handler registered for the region's address space. The interpreter
//! installs defaults for System Memory and System I/O; everything else is
//! supplied by the embedder.

use tracing::trace;

use crate::error::{AmlError, Result};
use crate::host::{AccessWidth, Host};

/// AML address-space identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum AddressSpace {
    SystemMemory,
    SystemIo,
    PciConfig,
    EmbeddedController,
    SmBus,
    SystemCmos,
    PciBarTarget,
    Ipmi,
    GeneralPurposeIo,
    GenericSerialBus,
    Pcc,
    FunctionalFixedHardware,
    /// Vendor-defined space (0x80..).
    Oem(u8),
}

impl AddressSpace {
    /// Decode the byte used by `OperationRegion`.
    pub fn from_raw(raw: u8) -> Result<Self> {
        Ok(match raw {
            0x00 => Self::SystemMemory,
            0x01 => Self::SystemIo,
            0x02 => Self::PciConfig,
            0x03 => Self::EmbeddedController,
            0x04 => Self::SmBus,
            0x05 => Self::SystemCmos,
            0x06 => Self::PciBarTarget,
            0x07 => Self::Ipmi,
            0x08 => Self::GeneralPurposeIo,
            0x09 => Self::GenericSerialBus,
            0x0A => Self::Pcc,
            0x7F => Self::FunctionalFixedHardware,
            raw if raw >= 0x80 => Self::Oem(raw),
            _ => return Err(AmlError::BadBytecode),
        })
    }
}

/// A named window into an address space.
#[derive(Debug, Clone)]
pub struct OpRegion {
    /// The address space accesses go to.
    pub space: AddressSpace,
    /// Window base within the space.
    pub offset: u64,
    /// Window length in bytes.
    pub length: u64,
    /// Whether the space handler has seen this region yet.
    pub attached: bool,
}

/// Operation requested from a region handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOp {
    /// First access to the region; prepare any mappings.
    Attach,
    /// Read `byte_width` bytes at `offset`.
    Read,
    /// Write `byte_width` bytes at `offset`.
    Write,
    /// The region is going away; drop mappings.
    Detach,
}

/// In/out payload of one region access.
#[derive(Debug, Clone)]
pub struct RegionRw {
    /// Absolute offset (region offset + field offset).
    pub offset: u64,
    /// Region length, for attach-time mapping.
    pub length: u64,
    /// Access width in bytes.
    pub byte_width: u8,
    /// Value read or to be written.
    pub value: u64,
}

/// One address-space handler.
///
/// `Attach` and `Detach` are invoked with `value` zero and `byte_width`
/// zero; attach is idempotent from the interpreter's point of view (it is
/// issued once per region).
pub trait RegionHandler {
    /// Service one operation.
    fn run(&self, host: &dyn Host, op: RegionOp, rw: &mut RegionRw) -> Result<()>;
}

fn width_of(byte_width: u8) -> Result<AccessWidth> {
    Ok(match byte_width {
        1 => AccessWidth::Byte,
        2 => AccessWidth::Word,
        4 => AccessWidth::Dword,
        8 => AccessWidth::Qword,
        _ => return Err(AmlError::InvalidArgument),
    })
}

/// Default handler for address space 0: raw physical memory through the
/// host.
pub struct SystemMemoryHandler;

impl RegionHandler for SystemMemoryHandler {
    fn run(&self, host: &dyn Host, op: RegionOp, rw: &mut RegionRw) -> Result<()> {
        match op {
            RegionOp::Attach | RegionOp::Detach => Ok(()),
            RegionOp::Read => {
                rw.value = host.mem_read(rw.offset, width_of(rw.byte_width)?)?;
                Ok(())
            }
            RegionOp::Write => host.mem_write(rw.offset, width_of(rw.byte_width)?, rw.value),
        }
    }
}

/// Default handler for address space 1: port I/O through the host.
pub struct SystemIoHandler;

impl RegionHandler for SystemIoHandler {
    fn run(&self, host: &dyn Host, op: RegionOp, rw: &mut RegionRw) -> Result<()> {
        match op {
            RegionOp::Attach | RegionOp::Detach => Ok(()),
            RegionOp::Read => {
                rw.value = host.io_read(rw.offset, width_of(rw.byte_width)?)?;
                Ok(())
            }
            RegionOp::Write => host.io_write(rw.offset, width_of(rw.byte_width)?, rw.value),
        }
    }
}

/// Registry of handlers keyed by address space.
pub struct RegionDispatch {
    handlers: Vec<(AddressSpace, Box<dyn RegionHandler>)>,
}

impl RegionDispatch {
    /// A registry with the default System Memory and System I/O handlers
    /// installed.
    pub fn with_defaults() -> Self {
        let mut dispatch = Self {
            handlers: Vec::new(),
        };
        dispatch.install(AddressSpace::SystemMemory, Box::new(SystemMemoryHandler));
        dispatch.install(AddressSpace::SystemIo, Box::new(SystemIoHandler));
        dispatch
    }

    /// Install (or replace) the handler for `space`.
    pub fn install(&mut self, space: AddressSpace, handler: Box<dyn RegionHandler>) {
        self.handlers.retain(|(s, _)| *s != space);
        self.handlers.push((space, handler));
    }

    fn handler(&self, space: AddressSpace) -> Result<&dyn RegionHandler> {
        self.handlers
            .iter()
            .find(|(s, _)| *s == space)
            .map(|(_, h)| h.as_ref())
            .ok_or(AmlError::NoHandler)
    }

    /// Run one access against the handler for `region.space`. The field
    /// offset is rebased onto the region window before dispatch.
    pub fn access(
        &self,
        host: &dyn Host,
        region: &OpRegion,
        op: RegionOp,
        field_offset: u64,
        byte_width: u8,
        value: &mut u64,
    ) -> Result<()> {
        let handler = self.handler(region.space)?;
        let mut rw = RegionRw {
            offset: region.offset + field_offset,
            length: region.length,
            byte_width,
            value: *value,
        };

        trace!(
            space = %region.space,
            offset = rw.offset,
            width = byte_width,
            ?op,
            value = rw.value,
            "region i/o"
        );

        handler.run(host, op, &mut rw)?;
        *value = rw.value;
        Ok(())
    }

    /// Issue `Attach` for a region that has not been attached yet.
    pub fn attach(&self, host: &dyn Host, region: &mut OpRegion) -> Result<()> {
        if region.attached {
            return Ok(());
        }
        let mut scratch = 0;
        self.access(host, region, RegionOp::Attach, 0, 0, &mut scratch)?;
        region.attached = true;
        Ok(())
    }

    /// Issue `Detach` for an attached region.
    pub fn detach(&self, host: &dyn Host, region: &mut OpRegion) -> Result<()> {
        if !region.attached {
            return Ok(());
        }
        let mut scratch = 0;
        self.access(host, region, RegionOp::Detach, 0, 0, &mut scratch)?;
        region.attached = false;
        Ok(())
    }
}
