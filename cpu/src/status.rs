//! Outcome and rejection codes for stepping and for program edits.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use base::prelude::WordEncodingError;

/// What a single step or a batch run came back with.  None of these
/// poison the engine: it remains steppable (and editable) after every
/// one of them.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExecResult {
    /// A word was executed (or the program counter was seeded).
    Ok,
    /// The program store holds no words at all.
    NoCommands,
    /// Execution has ended; reset to run again.
    End,
    /// The word at the program counter fails validation (or no word
    /// resolves to that address).  State is left untouched.
    IncorrectCommand,
    /// A batch run exceeded the iteration cap.  Resumable.
    Loop,
}

impl Display for ExecResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            ExecResult::Ok => "ok",
            ExecResult::NoCommands => "no microprogram loaded",
            ExecResult::End => "execution ended",
            ExecResult::IncorrectCommand => "current word is not executable",
            ExecResult::Loop => "iteration cap exceeded",
        })
    }
}

/// Why a program edit was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditError {
    /// The word fails [`MicroWord::validate`](base::prelude::MicroWord::validate).
    MalformedWord(WordEncodingError),
    /// The edit would push a word's slot past the user program area.
    ProgramOverflow,
    /// The index does not name an element of the sequence.
    OutOfRange,
    /// The target belongs to the built-in library region.
    ProtectedRegion,
    /// A call entry must reference a code present in the dispatch map.
    UnknownCallCode(u16),
    /// Dispatch codes below the reserved limit belong to the built-in
    /// library.
    ReservedCode(u16),
    /// Dispatch codes are microprogram addresses.
    CodeOutOfRange(u16),
    /// The dispatch map already has an entry with this code.
    DuplicateCode(u16),
    /// The dispatch map already has an entry with this name.
    DuplicateName(String),
    /// Dispatch names are limited to the image-format buffer size.
    NameTooLong,
    /// The dispatch map has no entry with this code.
    UnknownCode(u16),
    /// The code is still referenced by a call entry.
    CodeInUse(u16),
}

impl Display for EditError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            EditError::MalformedWord(e) => write!(f, "word is not executable: {e}"),
            EditError::ProgramOverflow => {
                f.write_str("edit would push a word past the user program area")
            }
            EditError::OutOfRange => f.write_str("no such sequence element"),
            EditError::ProtectedRegion => {
                f.write_str("the built-in library region cannot be edited")
            }
            EditError::UnknownCallCode(code) => {
                write!(f, "call code {code:#05x} is not in the dispatch map")
            }
            EditError::ReservedCode(code) => {
                write!(f, "dispatch code {code:#05x} is reserved for the library")
            }
            EditError::CodeOutOfRange(code) => {
                write!(f, "dispatch code {code:#x} does not fit the address space")
            }
            EditError::DuplicateCode(code) => {
                write!(f, "dispatch code {code:#05x} is already mapped")
            }
            EditError::DuplicateName(name) => {
                write!(f, "dispatch name {name:?} is already in use")
            }
            EditError::NameTooLong => f.write_str("dispatch name exceeds the name buffer"),
            EditError::UnknownCode(code) => {
                write!(f, "dispatch code {code:#05x} is not mapped")
            }
            EditError::CodeInUse(code) => {
                write!(f, "dispatch code {code:#05x} is referenced by a call entry")
            }
        }
    }
}

impl Error for EditError {}
