//! `amlvm` is an embeddable ACPI subsystem library meant to be linked into an
//! operating-system kernel. It ingests the firmware-supplied DSDT/SSDT tables
//! and provides a runtime for the AML bytecode they contain, so the kernel can
//! discover devices and evaluate firmware-provided control methods.
//!
//! The embedder supplies a [`host::Host`] implementation for the physical-world
//! primitives (memory, port I/O, time, thread identity) and drives everything
//! through an [`interpreter::Interpreter`] instance:
//!
//! ```ignore
//! let mut vm = Interpreter::new(Box::new(MyHost), Params::default());
//! vm.load_table(dsdt_bytes)?;
//! let value = vm.eval("\\_SB.PCI0._STA", &[])?;
//! ```
//!
//! Diagnostics are emitted through [`tracing`]; install a subscriber that
//! routes to the kernel log to see them.

pub mod consts;
pub mod error;
pub mod field;
pub mod host;
pub mod interpreter;
pub mod namespace;
pub mod object;
pub mod opcode;
pub mod opregion;
pub mod stream;
pub mod sync;
pub mod table;

pub mod prelude {
    //! Common imports for embedders.

    pub use crate::error::{AmlError, TypeMask};
    pub use crate::host::{AccessWidth, FirmwareRequest, Host, WorkItem, WorkQueue};
    pub use crate::interpreter::{Interpreter, NotifyHandler, Params};
    pub use crate::namespace::{NameSeg, NodeHandle};
    pub use crate::object::{ObjectType, RefcountPolicy, Value};
    pub use crate::opregion::{AddressSpace, RegionHandler, RegionOp, RegionRw};
}
