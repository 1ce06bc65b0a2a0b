//! The trainer's binary image formats.
//!
//! The full image carries everything an authoring session needs —
//! dispatch map, call sequence, command words — and round-trips
//! field-for-field.  The export image is for handing a finished
//! program around: it keeps only the call addresses with display
//! comments, plus the command words.
//!
//! All counts and addresses are big-endian 16-bit.  Layout of the full
//! image:
//!
//! | Section   | Contents                                              |
//! |-----------|-------------------------------------------------------|
//! | magic     | 8 bytes, `MT04img1`                                   |
//! | dispatch  | count; per entry: code, 32-byte name, address         |
//! | calls     | count; per entry: code, arg0, arg1 (2 bytes each),    |
//! |           | alt flag (1 byte), condition ordinal (1 byte)         |
//! | commands  | count; per command: offset flag (1 byte), 5 packed    |
//! |           | symbol-pair bytes                                     |
//!
//! The export image replaces the dispatch and call sections with one
//! section of (address, 64-byte comment) rows and starts with
//! `MT04exp1`, so a loader can tell the two apart.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use base::prelude::{CallEntry, JumpCondition, MicroWord, WORD_BYTES};

use crate::program::{Program, NAME_MAX_LEN};
use crate::status::EditError;

/// Magic prefix of a full image.
pub const IMAGE_MAGIC: &[u8; 8] = b"MT04img1";

/// Magic prefix of an export image.
pub const EXPORT_MAGIC: &[u8; 8] = b"MT04exp1";

/// Size of the comment buffer in the export format.
pub const COMMENT_MAX_LEN: usize = 64;

/// Why an image failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// The buffer does not start with the expected magic.  Nothing
    /// was touched.
    BadMagic,
    /// The buffer ends before the contents its counts declare.
    Truncated,
    /// A dispatch or call entry violates the store's integrity rules.
    BadEntry(EditError),
}

impl Display for ImageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ImageError::BadMagic => f.write_str("not a trainer image (header mismatch)"),
            ImageError::Truncated => f.write_str("image ends before its declared contents"),
            ImageError::BadEntry(e) => write!(f, "image carries an invalid entry: {e}"),
        }
    }
}

impl Error for ImageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ImageError::BadEntry(e) => Some(e),
            _ => None,
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ImageError> {
        let end = self.pos.checked_add(len).ok_or(ImageError::Truncated)?;
        if end > self.bytes.len() {
            return Err(ImageError::Truncated);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ImageError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ImageError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn push_padded(out: &mut Vec<u8>, text: &str, len: usize) {
    let bytes = text.as_bytes();
    for i in 0..len {
        out.push(bytes.get(i).copied().unwrap_or(0));
    }
}

fn read_padded(reader: &mut Reader<'_>, len: usize) -> Result<String, ImageError> {
    let raw = reader.take(len)?;
    let end = raw
        .iter()
        .rposition(|&b| b != 0)
        .map(|p| p + 1)
        .unwrap_or(0);
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

fn push_commands(out: &mut Vec<u8>, commands: &[MicroWord]) {
    push_u16(out, commands.len() as u16);
    for word in commands {
        out.push(word.is_offset() as u8);
        out.extend_from_slice(&word.pack());
    }
}

/// Serialize the full image.
pub fn save(program: &Program) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(IMAGE_MAGIC);

    push_u16(&mut out, program.dispatch().len() as u16);
    for (code, entry) in program.dispatch().iter() {
        push_u16(&mut out, code);
        push_padded(&mut out, &entry.name, NAME_MAX_LEN);
        push_u16(&mut out, entry.address);
    }

    push_u16(&mut out, program.calls().len() as u16);
    for call in program.calls() {
        push_u16(&mut out, call.code());
        push_u16(&mut out, call.arg0() as u16);
        push_u16(&mut out, call.arg1() as u16);
        out.push(call.alt_dispatch() as u8);
        out.push(call.condition().ordinal());
    }

    push_commands(&mut out, program.commands());
    out
}

/// Parse a full image into a fresh program store.  The caller swaps it
/// in only on success, so a failed load leaves the running program
/// alone.
pub fn load(bytes: &[u8]) -> Result<Program, ImageError> {
    if bytes.len() < IMAGE_MAGIC.len() || &bytes[..IMAGE_MAGIC.len()] != IMAGE_MAGIC {
        return Err(ImageError::BadMagic);
    }
    let mut reader = Reader::new(&bytes[IMAGE_MAGIC.len()..]);
    let mut program = Program::new();

    let dispatch_count = reader.u16()?;
    for _ in 0..dispatch_count {
        let code = reader.u16()?;
        let name = read_padded(&mut reader, NAME_MAX_LEN)?;
        let address = reader.u16()?;
        program
            .dispatch_insert_loaded(code, &name, address)
            .map_err(ImageError::BadEntry)?;
    }

    let call_count = reader.u16()?;
    for i in 0..call_count {
        let code = reader.u16()?;
        let arg0 = reader.u16()? as u8;
        let arg1 = reader.u16()? as u8;
        let alt_dispatch = reader.u8()? == 1;
        let condition = JumpCondition::from_ordinal(reader.u8()?);
        let entry = CallEntry::from_parts(code, arg0, arg1, alt_dispatch, condition);
        program
            .insert_call_entry(i as usize, entry)
            .map_err(ImageError::BadEntry)?;
    }

    let command_count = reader.u16()?;
    for _ in 0..command_count {
        let is_offset = reader.u8()? == 1;
        let packed = reader.take(WORD_BYTES)?;
        let mut bytes = [0_u8; WORD_BYTES];
        bytes.copy_from_slice(packed);
        // Unchecked on purpose: malformed words are storable state.
        program.push_loaded_command(MicroWord::from_packed(&bytes, is_offset));
    }
    program.recompute_numbers(0);
    Ok(program)
}

/// Serialize the export image: call addresses with display comments,
/// plus the command words.
pub fn export(program: &Program) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(EXPORT_MAGIC);

    push_u16(&mut out, program.calls().len() as u16);
    for call in program.calls() {
        let address = program.dispatch().address(call.code()).unwrap_or(0);
        let comment = program.dispatch().name(call.code()).unwrap_or("");
        push_u16(&mut out, address);
        push_padded(&mut out, comment, COMMENT_MAX_LEN);
    }

    push_commands(&mut out, program.commands());
    out
}
