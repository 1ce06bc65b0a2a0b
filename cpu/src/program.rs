//! The microprogram store: the command sequence, the call sequence,
//! and the code→routine dispatch map, together with the slot
//! bookkeeping that places every word in the program image.
//!
//! Words do not live at their list index: an *offset marker* resets
//! the running slot counter to its target, so the image can have gaps.
//! Every edit recomputes the slots from the edit point onward and is
//! rejected if it would push a word past the user program area (the
//! region above it belongs to the built-in library).

use std::collections::BTreeMap;

use base::nibble;
use base::prelude::{CallEntry, JumpCondition, MicroWord};

use crate::status::EditError;

/// First slot past the user-editable program area; the built-in
/// library lives from here up.
pub const USER_PROGRAM_SIZE: i32 = 0xF00;

/// Size of the dispatch-name buffer in the image format.
pub const NAME_MAX_LEN: usize = 32;

/// Dispatch codes below this belong to the built-in library.
const RESERVED_CODE_LIMIT: u16 = 0x40;

/// Largest code that still names a microprogram address.
const CODE_LIMIT: u16 = 0xFFF;

/// A dispatch-map row: the display name and entry address of one
/// callable routine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchEntry {
    pub name: String,
    pub address: u16,
}

/// The macro-call dispatch map, keyed by call code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dispatch {
    entries: BTreeMap<u16, DispatchEntry>,
}

impl Dispatch {
    pub fn contains(&self, code: u16) -> bool {
        self.entries.contains_key(&code)
    }

    pub fn address(&self, code: u16) -> Option<u16> {
        self.entries.get(&code).map(|e| e.address)
    }

    pub fn name(&self, code: u16) -> Option<&str> {
        self.entries.get(&code).map(|e| e.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &DispatchEntry)> {
        self.entries.iter().map(|(code, entry)| (*code, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insertion path shared by the library seed and the image loader:
    /// checks uniqueness and the name buffer, but not the reserved
    /// code range (saved library entries must round-trip).
    pub(crate) fn insert_loaded(
        &mut self,
        code: u16,
        name: &str,
        address: u16,
    ) -> Result<(), EditError> {
        if code > CODE_LIMIT {
            return Err(EditError::CodeOutOfRange(code));
        }
        if self.entries.contains_key(&code) {
            return Err(EditError::DuplicateCode(code));
        }
        if name.len() > NAME_MAX_LEN {
            return Err(EditError::NameTooLong);
        }
        if self.entries.values().any(|e| e.name == name) {
            return Err(EditError::DuplicateName(name.to_string()));
        }
        self.entries.insert(
            code,
            DispatchEntry {
                name: name.to_string(),
                address: nibble::mask(address, base::prelude::ADDR_BITS),
            },
        );
        Ok(())
    }
}

/// The complete editable microprogram.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    commands: Vec<MicroWord>,
    calls: Vec<CallEntry>,
    dispatch: Dispatch,
}

/// Recompute slot numbers from `first` onward.  An offset marker's
/// slot is its target minus one, so the word after it lands on the
/// target.
fn recompute_slice(commands: &mut [MicroWord], first: usize) {
    for i in first..commands.len() {
        let number = if commands[i].is_offset() {
            commands[i].jump_target() as i32 - 1
        } else if i == 0 {
            0
        } else {
            commands[i - 1].number() + 1
        };
        commands[i].set_number(number);
    }
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    pub fn commands(&self) -> &[MicroWord] {
        &self.commands
    }

    pub fn command(&self, index: usize) -> Option<&MicroWord> {
        self.commands.get(index)
    }

    pub fn calls(&self) -> &[CallEntry] {
        &self.calls
    }

    pub fn call(&self, index: usize) -> Option<&CallEntry> {
        self.calls.get(index)
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Index of the executable word resolved to image slot `address`.
    pub fn command_index_at(&self, address: u16) -> Option<usize> {
        self.commands
            .iter()
            .position(|word| !word.is_offset() && word.number() == address as i32)
    }

    /// Recompute every slot number from `first` onward.  Idempotent.
    pub fn recompute_numbers(&mut self, first: usize) {
        recompute_slice(&mut self.commands, first);
    }

    /// Index just past the run of executable words starting at
    /// `index` (the next offset marker, or the end).
    fn run_end_before_offset(&self, mut index: usize) -> usize {
        while index < self.commands.len() && !self.commands[index].is_offset() {
            index += 1;
        }
        index
    }

    fn assign_number(&self, index: usize, word: &mut MicroWord) {
        let number = if word.is_offset() {
            word.jump_target() as i32 - 1
        } else if index == 0 {
            0
        } else {
            self.commands[index - 1].number() + 1
        };
        word.set_number(number);
    }

    /// Would a word with slot `number`, followed by the current words
    /// from `followers_from` up to the next offset marker, push any
    /// slot past the user program area?
    fn overflows_user_area(&self, number: i32, followers_from: usize) -> bool {
        if number >= USER_PROGRAM_SIZE {
            return true;
        }
        let run_end = self.run_end_before_offset(followers_from) as i32;
        number + (run_end - followers_from as i32) >= USER_PROGRAM_SIZE
    }

    pub fn insert_command(&mut self, index: usize, mut word: MicroWord) -> Result<(), EditError> {
        if index > self.commands.len() {
            return Err(EditError::OutOfRange);
        }
        word.validate().map_err(EditError::MalformedWord)?;
        self.assign_number(index, &mut word);
        // The words currently at `index` and beyond shift behind the
        // new one.
        if self.overflows_user_area(word.number(), index) {
            return Err(EditError::ProgramOverflow);
        }
        self.commands.insert(index, word);
        self.recompute_numbers(index + 1);
        Ok(())
    }

    pub fn update_command(&mut self, index: usize, mut word: MicroWord) -> Result<(), EditError> {
        if index >= self.commands.len() {
            return Err(EditError::OutOfRange);
        }
        word.validate().map_err(EditError::MalformedWord)?;
        self.assign_number(index, &mut word);
        if self.overflows_user_area(word.number(), index + 1) {
            return Err(EditError::ProgramOverflow);
        }
        self.commands[index] = word;
        self.recompute_numbers(index + 1);
        Ok(())
    }

    pub fn remove_command(&mut self, index: usize) -> Result<(), EditError> {
        let Some(word) = self.commands.get(index) else {
            return Err(EditError::OutOfRange);
        };
        if word.number() >= USER_PROGRAM_SIZE
            || (word.is_offset() && word.number() >= USER_PROGRAM_SIZE - 1)
        {
            return Err(EditError::ProtectedRegion);
        }
        self.commands.remove(index);
        self.recompute_numbers(index);
        Ok(())
    }

    fn apply_checked_swap(&mut self, left: usize) -> Result<(), EditError> {
        let mut trial = self.commands.clone();
        trial.swap(left, left + 1);
        recompute_slice(&mut trial, left);
        for (before, after) in self.commands.iter().zip(&trial).skip(left) {
            if !after.is_offset()
                && after.number() != before.number()
                && after.number() >= USER_PROGRAM_SIZE
            {
                return Err(EditError::ProgramOverflow);
            }
        }
        self.commands = trial;
        Ok(())
    }

    pub fn move_command_up(&mut self, index: usize) -> Result<(), EditError> {
        if index >= self.commands.len() {
            return Err(EditError::OutOfRange);
        }
        if index == 0 {
            return Ok(());
        }
        self.apply_checked_swap(index - 1)
    }

    pub fn move_command_down(&mut self, index: usize) -> Result<(), EditError> {
        if index >= self.commands.len() {
            return Err(EditError::OutOfRange);
        }
        if index == self.commands.len() - 1 {
            return Ok(());
        }
        self.apply_checked_swap(index)
    }

    /// Append a library word at construction time.  Library words are
    /// allowed above the user program area.
    pub(crate) fn push_library_command(&mut self, mut word: MicroWord) {
        debug_assert!(word.validate().is_ok());
        let index = self.commands.len();
        self.assign_number(index, &mut word);
        self.commands.push(word);
    }

    /// Append a word read from an image, unchecked: malformed words
    /// are storable state.  The loader recomputes all slots at the
    /// end.
    pub(crate) fn push_loaded_command(&mut self, word: MicroWord) {
        self.commands.push(word);
    }

    /// The canonical entry for a call code: the built-in control codes
    /// carry their conditional-dispatch descriptors.
    fn derived_entry(code: u16, arg0: u8, arg1: u8) -> CallEntry {
        match code {
            0 => CallEntry::conditional(code, arg0, arg1, JumpCondition::Jmp),
            1 => CallEntry::conditional(code, arg0, arg1, JumpCondition::Jc4),
            2 => CallEntry::conditional(code, arg0, arg1, JumpCondition::Jz),
            3 => CallEntry::conditional(code, arg0, arg1, JumpCondition::Jsnc4),
            4 => CallEntry::conditional(code, arg0, arg1, JumpCondition::Jnz),
            _ => CallEntry::new(code, arg0, arg1),
        }
    }

    pub fn insert_call(
        &mut self,
        index: usize,
        code: u16,
        arg0: u8,
        arg1: u8,
    ) -> Result<(), EditError> {
        self.insert_call_entry(index, Program::derived_entry(code, arg0, arg1))
    }

    /// Insert a fully specified entry (the image loader and front ends
    /// use this form).
    pub fn insert_call_entry(&mut self, index: usize, entry: CallEntry) -> Result<(), EditError> {
        if index > self.calls.len() {
            return Err(EditError::OutOfRange);
        }
        if !self.dispatch.contains(entry.code()) {
            return Err(EditError::UnknownCallCode(entry.code()));
        }
        self.calls.insert(index, entry);
        Ok(())
    }

    pub fn update_call(
        &mut self,
        index: usize,
        code: u16,
        arg0: u8,
        arg1: u8,
    ) -> Result<(), EditError> {
        if index >= self.calls.len() {
            return Err(EditError::OutOfRange);
        }
        if !self.dispatch.contains(code) {
            return Err(EditError::UnknownCallCode(code));
        }
        self.calls[index] = Program::derived_entry(code, arg0, arg1);
        Ok(())
    }

    pub fn remove_call(&mut self, index: usize) -> Result<(), EditError> {
        if index >= self.calls.len() {
            return Err(EditError::OutOfRange);
        }
        self.calls.remove(index);
        Ok(())
    }

    pub fn move_call_up(&mut self, index: usize) -> Result<(), EditError> {
        if index >= self.calls.len() {
            return Err(EditError::OutOfRange);
        }
        if index > 0 {
            self.calls.swap(index - 1, index);
        }
        Ok(())
    }

    pub fn move_call_down(&mut self, index: usize) -> Result<(), EditError> {
        if index >= self.calls.len() {
            return Err(EditError::OutOfRange);
        }
        if index < self.calls.len() - 1 {
            self.calls.swap(index, index + 1);
        }
        Ok(())
    }

    /// Add a user dispatch entry.  Codes below the reserved limit
    /// belong to the built-in library.
    pub fn add_dispatch_entry(
        &mut self,
        code: u16,
        name: &str,
        address: u16,
    ) -> Result<(), EditError> {
        if code < RESERVED_CODE_LIMIT {
            return Err(EditError::ReservedCode(code));
        }
        self.dispatch.insert_loaded(code, name, address)
    }

    pub fn update_dispatch_entry(
        &mut self,
        code: u16,
        name: &str,
        address: u16,
    ) -> Result<(), EditError> {
        if name.len() > NAME_MAX_LEN {
            return Err(EditError::NameTooLong);
        }
        let Some(entry) = self.dispatch.entries.get_mut(&code) else {
            return Err(EditError::UnknownCode(code));
        };
        entry.name = name.to_string();
        entry.address = nibble::mask(address, base::prelude::ADDR_BITS);
        Ok(())
    }

    pub fn remove_dispatch_entry(&mut self, code: u16) -> Result<(), EditError> {
        if !self.dispatch.contains(code) {
            return Err(EditError::UnknownCode(code));
        }
        if self.calls.iter().any(|call| call.code() == code) {
            return Err(EditError::CodeInUse(code));
        }
        self.dispatch.entries.remove(&code);
        Ok(())
    }

    pub(crate) fn dispatch_insert_loaded(
        &mut self,
        code: u16,
        name: &str,
        address: u16,
    ) -> Result<(), EditError> {
        self.dispatch.insert_loaded(code, name, address)
    }
}
