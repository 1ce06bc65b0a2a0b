//! The assembled trainer: program store, control unit and port
//! extender behind one API.  This is the type front ends talk to.

use base::prelude::*;

use crate::control::{ControlUnit, ProcessorState};
use crate::image::{self, ImageError};
use crate::io::{DeviceEvent, PortExtender};
use crate::library;
use crate::program::Program;
use crate::status::{EditError, ExecResult};

/// One MT-1804 trainer.
pub struct Mt1804 {
    program: Program,
    control: ControlUnit,
    ports: Box<dyn PortExtender>,
}

impl Mt1804 {
    /// A fresh trainer with the built-in call library installed.
    pub fn new(ports: Box<dyn PortExtender>) -> Mt1804 {
        let mut program = Program::new();
        library::install(&mut program);
        Mt1804 {
            program,
            control: ControlUnit::new(),
            ports,
        }
    }

    /// Reset the processor state; the program is kept.
    pub fn reset(&mut self) {
        self.control.reset();
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn state(&self) -> &ProcessorState {
        self.control.state()
    }

    pub fn snapshot(&self) -> ProcessorState {
        self.control.snapshot()
    }

    pub fn restore(&mut self, state: ProcessorState) {
        self.control.restore(state);
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.control.set_pc(pc);
    }

    pub fn set_stack_pointer(&mut self, sp: usize) {
        self.control.set_stack_pointer(sp);
    }

    /// Drain pending device events.
    pub fn take_events(&mut self) -> Vec<DeviceEvent> {
        self.control.take_events()
    }

    pub fn exec_one(&mut self) -> ExecResult {
        self.control.exec_one(&self.program, self.ports.as_mut())
    }

    pub fn exec_one_call(&mut self) -> ExecResult {
        self.control
            .exec_one_call(&self.program, self.ports.as_mut())
    }

    pub fn exec_all(&mut self) -> ExecResult {
        self.control.exec_all(&self.program, self.ports.as_mut())
    }

    /// The word executed last, if any.
    pub fn executed_command(&self) -> Option<&MicroWord> {
        self.command_at(self.control.state().prev_pc)
    }

    /// The word the program counter rests on, if any.
    pub fn current_command(&self) -> Option<&MicroWord> {
        self.command_at(self.control.state().pc)
    }

    fn command_at(&self, address: Option<u16>) -> Option<&MicroWord> {
        address
            .and_then(|pc| self.program.command_index_at(pc))
            .and_then(|index| self.program.command(index))
    }

    /// Position in the call sequence, while one is active.
    pub fn call_index(&self) -> Option<usize> {
        self.control
            .state()
            .call_index
            .filter(|&index| index < self.program.calls().len())
    }

    // Program edits, forwarded to the store.

    pub fn insert_command(&mut self, index: usize, word: MicroWord) -> Result<(), EditError> {
        self.program.insert_command(index, word)
    }

    pub fn update_command(&mut self, index: usize, word: MicroWord) -> Result<(), EditError> {
        self.program.update_command(index, word)
    }

    pub fn remove_command(&mut self, index: usize) -> Result<(), EditError> {
        self.program.remove_command(index)
    }

    pub fn move_command_up(&mut self, index: usize) -> Result<(), EditError> {
        self.program.move_command_up(index)
    }

    pub fn move_command_down(&mut self, index: usize) -> Result<(), EditError> {
        self.program.move_command_down(index)
    }

    pub fn insert_call(
        &mut self,
        index: usize,
        code: u16,
        arg0: u8,
        arg1: u8,
    ) -> Result<(), EditError> {
        self.program.insert_call(index, code, arg0, arg1)
    }

    pub fn insert_call_entry(&mut self, index: usize, entry: CallEntry) -> Result<(), EditError> {
        self.program.insert_call_entry(index, entry)
    }

    pub fn update_call(
        &mut self,
        index: usize,
        code: u16,
        arg0: u8,
        arg1: u8,
    ) -> Result<(), EditError> {
        self.program.update_call(index, code, arg0, arg1)
    }

    pub fn remove_call(&mut self, index: usize) -> Result<(), EditError> {
        self.program.remove_call(index)
    }

    pub fn move_call_up(&mut self, index: usize) -> Result<(), EditError> {
        self.program.move_call_up(index)
    }

    pub fn move_call_down(&mut self, index: usize) -> Result<(), EditError> {
        self.program.move_call_down(index)
    }

    pub fn add_dispatch_entry(
        &mut self,
        code: u16,
        name: &str,
        address: u16,
    ) -> Result<(), EditError> {
        self.program.add_dispatch_entry(code, name, address)
    }

    pub fn update_dispatch_entry(
        &mut self,
        code: u16,
        name: &str,
        address: u16,
    ) -> Result<(), EditError> {
        self.program.update_dispatch_entry(code, name, address)
    }

    pub fn remove_dispatch_entry(&mut self, code: u16) -> Result<(), EditError> {
        self.program.remove_dispatch_entry(code)
    }

    // Persistence.

    /// Serialize the full image.
    pub fn save_image(&self) -> Vec<u8> {
        image::save(&self.program)
    }

    /// Replace the whole program from a full image and reset the
    /// processor.  On error the running program is untouched.
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<(), ImageError> {
        let program = image::load(bytes)?;
        self.program = program;
        self.control.reset();
        Ok(())
    }

    /// Serialize the export image.
    pub fn export_image(&self) -> Vec<u8> {
        image::export(&self.program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::NullPorts;
    use crate::library::LIBRARY_ORIGIN;

    fn machine() -> Mt1804 {
        Mt1804::new(Box::new(NullPorts))
    }

    fn end_word() -> MicroWord {
        MicroWord::new(&[10, 1, 7, 0, 0, 0, 0, 0, 0, 0]).expect("ten symbols")
    }

    #[test]
    fn fresh_machine_carries_the_library() {
        let machine = machine();
        assert_eq!(machine.program().dispatch().address(0), Some(LIBRARY_ORIGIN));
        assert!(machine.program().command_index_at(LIBRARY_ORIGIN).is_some());
    }

    #[test]
    fn runs_a_loaded_image() {
        let mut author = machine();
        author.insert_command(0, end_word()).expect("fits");
        author.add_dispatch_entry(0x40, "MAIN", 0).expect("fresh");
        author.insert_call(0, 0x40, 7, 9).expect("mapped");
        let bytes = author.save_image();

        let mut runner = machine();
        runner.load_image(&bytes).expect("valid image");
        assert_eq!(runner.exec_all(), ExecResult::Ok);
        assert_eq!(runner.state().memory.byte(0), 7);
        assert_eq!(runner.state().memory.byte(1), 9);
    }

    #[test]
    fn failed_load_keeps_the_current_program() {
        let mut machine = machine();
        machine.insert_command(0, end_word()).expect("fits");
        let commands_before = machine.program().commands().to_vec();
        assert_eq!(machine.load_image(b"garbage"), Err(ImageError::BadMagic));
        assert_eq!(machine.program().commands(), commands_before.as_slice());
    }

    #[test]
    fn executed_and_current_commands_track_the_counters() {
        let mut machine = machine();
        machine.insert_command(0, end_word()).expect("fits");
        assert!(machine.current_command().is_none());
        let _ = machine.exec_one(); // seed
        assert!(machine.executed_command().is_none());
        assert_eq!(
            machine.current_command().map(|w| w.jump_condition()),
            Some(JumpCondition::End)
        );
        let _ = machine.exec_one();
        assert_eq!(
            machine.executed_command().map(|w| w.jump_condition()),
            Some(JumpCondition::End)
        );
    }

    #[test]
    fn call_index_is_none_once_exhausted() {
        let mut machine = machine();
        machine.insert_command(0, end_word()).expect("fits");
        machine.add_dispatch_entry(0x40, "MAIN", 0).expect("fresh");
        machine.insert_call(0, 0x40, 0, 0).expect("mapped");
        let _ = machine.exec_one(); // seed: index 1, past the sequence
        assert_eq!(machine.call_index(), None);
    }
}
