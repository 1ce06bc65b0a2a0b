//! Emulation of the MT-1804 microcode trainer: the ALU slice and its
//! flag network, the sequencer with its macro-call dispatch, the
//! program store, and the binary image formats.

mod alu;
mod control;
mod image;
mod io;
mod library;
mod memory;
mod mt1804;
mod program;
mod status;

pub use alu::{AluOutput, Flags};
pub use control::{ControlUnit, ProcessorState, MAX_AUTO_STEPS};
pub use image::{ImageError, COMMENT_MAX_LEN, EXPORT_MAGIC, IMAGE_MAGIC};
pub use io::{DeviceEvent, LoopbackPorts, NullPorts, Port, PortAccess, PortExtender, UnknownDevice};
pub use library::LIBRARY_ORIGIN;
pub use memory::{DataMemory, RegisterFile, ReturnStack, MEM_SIZE, REG_COUNT, STACK_SIZE};
pub use mt1804::Mt1804;
pub use program::{Dispatch, DispatchEntry, Program, NAME_MAX_LEN, USER_PROGRAM_SIZE};
pub use status::{EditError, ExecResult};
