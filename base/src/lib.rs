//! The `base` crate defines the MT-1804-related things which are useful
//! in both the simulator and other associated tools.  The idea is that
//! if you want to write, say, a microcode cross-assembler, it would
//! depend on the base crate but would not need to depend on the
//! simulator library itself.

pub mod calls;
pub mod instruction;
pub mod nibble;
pub mod prelude;
