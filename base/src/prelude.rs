//! The prelude exports the types most code working with the MT-1804
//! needs.  Providing this prelude is the main purpose of the base
//! crate.
pub use crate::calls::{CallEntry, CODE_BITS};
pub use crate::instruction::{
    AluDest, AluOp, Field, FieldValue, JumpCondition, MemPtrMode, MicroWord, ModBit,
    OperandSource, ShiftMode, TransferOp, TransferWidth, WordEncodingError, WordFormatError,
    WordKind, ADDR_BITS, PROGRAM_SIZE, WORD_BYTES, WORD_SYMBOLS,
};
