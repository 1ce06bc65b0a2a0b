//! The control unit: owns the processor state and performs the
//! per-word transition — operand selection, the ALU step, destination
//! routing, the pointer and transfer words, and the sequencer that
//! resolves the next address (including the macro-call dispatch that
//! the `END` condition triggers).
//!
//! ## Flag shadowing
//!
//! Every executed ALU word latches fresh flags, but a conditional jump
//! must test the flags *as they stood when the word started*, i.e. the
//! outcome of the computation before it.  The unit therefore snapshots
//! the flags at the top of each step; conditional forms test the
//! snapshot and then write it back, so a conditional jump word leaves
//! the flag register exactly as the previous computation left it.
//! Unconditional forms keep whatever their own ALU half produced.

use serde::Serialize;
use tracing::{event, Level};

use base::nibble;
use base::prelude::*;

use crate::alu::{self, Flags};
use crate::io::{DeviceEvent, Port, PortAccess, PortExtender};
use crate::memory::{DataMemory, RegisterFile, ReturnStack};
use crate::program::Program;
use crate::status::ExecResult;

/// Iteration cap for the batch runners.  Exceeding it yields
/// [`ExecResult::Loop`]; the run can simply be resumed.
pub const MAX_AUTO_STEPS: usize = 4096;

/// The complete processor state, as one value.  Cloning it gives a
/// snapshot suitable for deterministic replay; the control unit can be
/// restored from such a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorState {
    /// Current microprogram address; `None` until seeded.
    pub pc: Option<u16>,
    /// Address of the word executed last.
    pub prev_pc: Option<u16>,
    /// Position in the call sequence; `None` until a macro-call
    /// program establishes one.
    pub call_index: Option<usize>,
    /// Terminal state; reset to run again.
    pub ended: bool,
    pub stack: ReturnStack,
    pub regs: RegisterFile,
    pub memory: DataMemory,
    /// Port selected by the last device-pointer word.
    pub dev_ptr: Option<u8>,
    /// ALU operand latches from the last ALU word.
    pub r: u8,
    pub s: u8,
    /// ALU result and output latches.
    pub f: u8,
    pub y: u8,
    /// Pre-step values of the registers the last ALU word touched.
    pub prev_a: u8,
    pub prev_b: u8,
    pub prev_q: u8,
    pub flags: Flags,
    /// Pre-step flag snapshot; conditional jumps test this.
    pub prev_flags: Flags,
}

/// Executes microprogram words against a [`Program`].
#[derive(Debug, Default)]
pub struct ControlUnit {
    state: ProcessorState,
    events: Vec<DeviceEvent>,
}

impl ControlUnit {
    pub fn new() -> ControlUnit {
        ControlUnit::default()
    }

    pub fn state(&self) -> &ProcessorState {
        &self.state
    }

    /// Snapshot the whole processor state.
    pub fn snapshot(&self) -> ProcessorState {
        self.state.clone()
    }

    /// Restore a snapshot taken earlier.
    pub fn restore(&mut self, state: ProcessorState) {
        self.state = state;
    }

    pub fn reset(&mut self) {
        self.state = ProcessorState::default();
        self.events.clear();
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.state.pc = Some(nibble::mask(pc, ADDR_BITS));
    }

    pub fn set_stack_pointer(&mut self, sp: usize) {
        self.state.stack.set_pointer(sp);
    }

    /// Drain the device events accumulated since the last call.
    pub fn take_events(&mut self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Execute one word (or seed the program counter on the first
    /// step).  The state is untouched when anything other than
    /// [`ExecResult::Ok`] comes back.
    pub fn exec_one(&mut self, program: &Program, ports: &mut dyn PortExtender) -> ExecResult {
        if program.commands().is_empty() {
            return ExecResult::NoCommands;
        }
        if self.state.ended {
            return ExecResult::End;
        }
        let Some(pc) = self.state.pc else {
            self.seed(program);
            return ExecResult::Ok;
        };
        let word = match program.command_index_at(pc).and_then(|i| program.command(i)) {
            Some(word) => word,
            None => return ExecResult::IncorrectCommand,
        };
        if word.validate().is_err() {
            return ExecResult::IncorrectCommand;
        }

        self.state.prev_flags = self.state.flags;

        match word.kind() {
            WordKind::Alu => self.exec_alu_word(word),
            WordKind::MemoryPointer => self.set_memory_pointer(word),
            WordKind::DevicePointer => self.set_device_pointer(word),
            WordKind::TransferLow | WordKind::TransferHigh | WordKind::TransferByte => {
                self.exec_transfer(word, ports)
            }
            WordKind::Offset | WordKind::Unknown => (),
        }

        self.resolve_jump(program, word, pc);
        if let Some(pc) = self.state.pc {
            self.state.pc = Some(pc % PROGRAM_SIZE);
        }
        ExecResult::Ok
    }

    /// Run until the current macro call returns (its routine executes
    /// `END`), the call index moves, or the program counter stalls.
    pub fn exec_one_call(&mut self, program: &Program, ports: &mut dyn PortExtender) -> ExecResult {
        let start_index = self.state.call_index;
        for _ in 0..MAX_AUTO_STEPS {
            let result = self.exec_one(program, ports);
            if result != ExecResult::Ok {
                return result;
            }
            let prev_was_end = self
                .state
                .prev_pc
                .and_then(|pc| program.command_index_at(pc))
                .and_then(|i| program.command(i))
                .map(|word| word.jump_condition() == JumpCondition::End)
                .unwrap_or(false);
            if prev_was_end
                || self.state.call_index != start_index
                || self.state.prev_pc == self.state.pc
            {
                return ExecResult::Ok;
            }
        }
        ExecResult::Loop
    }

    /// Run until the call sequence is exhausted or the program counter
    /// stalls.
    pub fn exec_all(&mut self, program: &Program, ports: &mut dyn PortExtender) -> ExecResult {
        for _ in 0..MAX_AUTO_STEPS {
            let result = self.exec_one(program, ports);
            if result != ExecResult::Ok {
                return result;
            }
            let exhausted = match self.state.call_index {
                Some(index) => index >= program.calls().len(),
                None => false,
            };
            if exhausted || self.state.prev_pc == self.state.pc {
                return ExecResult::Ok;
            }
        }
        ExecResult::Loop
    }

    /// First step of a run: establish the program counter.  With a
    /// macro-call program present, call 0's arguments land in memory
    /// bytes 0/1, its conditional descriptor (if any) picks the next
    /// call index, and its code picks the entry address.
    fn seed(&mut self, program: &Program) {
        if let Some(first) = program.calls().first() {
            self.state.memory.set_byte(0, first.arg0());
            self.state.memory.set_byte(1, first.arg1());
            let flags = self.state.flags;
            self.state.call_index = Some(Self::next_call_index(first, 0, &flags));
            self.state.pc = program.dispatch().address(first.code());
            event!(
                Level::DEBUG,
                code = first.code(),
                pc = ?self.state.pc,
                "seeded program counter from call 0"
            );
        } else {
            self.state.pc = Some(0);
        }
    }

    /// Where the call index goes when `entry` is dispatched at
    /// `current`: conditional descriptors branch in index space, plain
    /// entries advance.  A descriptor with an unlisted condition pins
    /// the index where it is.
    fn next_call_index(entry: &CallEntry, current: usize, flags: &Flags) -> usize {
        if !entry.alt_dispatch() {
            return current + 1;
        }
        let taken = match entry.condition() {
            JumpCondition::Jmp => true,
            JumpCondition::Jz => flags.z,
            JumpCondition::Jc4 => flags.c4,
            JumpCondition::Jnz => !flags.z,
            JumpCondition::Jsnc4 => !flags.c4,
            _ => return current,
        };
        if taken {
            entry.arg0() as usize
        } else {
            current + 1
        }
    }

    fn restore_flags(&mut self) {
        self.state.flags = self.state.prev_flags;
    }

    /// One ALU word: operand selection, the function, destination
    /// routing with the shift network, and the Y output.
    fn exec_alu_word(&mut self, word: &MicroWord) {
        let a = word.field(Field::A).value().unwrap_or(0) as usize;
        let b = word.field(Field::B).value().unwrap_or(0) as usize;
        let d = word.field(Field::D).value().unwrap_or(0);

        let state = &mut self.state;
        state.prev_q = state.regs.q();
        state.prev_a = state.regs.get(a);
        state.prev_b = state.regs.get(b);

        let (r, s) = match word.source() {
            OperandSource::AQ => (state.regs.get(a), state.regs.q()),
            OperandSource::AB => (state.regs.get(a), state.regs.get(b)),
            OperandSource::ZQ => (0, state.regs.q()),
            OperandSource::ZB => (0, state.regs.get(b)),
            OperandSource::ZA => (0, state.regs.get(a)),
            OperandSource::DA => (d, state.regs.get(a)),
            OperandSource::DQ => (d, state.regs.q()),
            OperandSource::DZ => (d, 0),
        };
        state.r = r;
        state.s = s;

        let Some(op) = word.alu_op() else {
            return;
        };
        let out = alu::evaluate(op, r, s);
        state.f = out.f;
        state.flags = out.flags;

        let q = state.regs.q();
        let f = state.f;
        let q_low = q & 1;
        let q_high = (q >> 3) & 1;
        let f_low = f & 1;
        let f_high = (f >> 3) & 1;

        match word.dest() {
            AluDest::Qreg => state.regs.set_q(f),
            AluDest::Nop => (),
            AluDest::Rama | AluDest::Ramf => state.regs.set(b, f),
            AluDest::Ramqd => {
                let mut new_q = q >> 1;
                let mut new_b = f >> 1;
                match word.shift_mode() {
                    ShiftMode::Cyclic => {
                        new_b |= f_low << 3;
                        new_q |= q_low << 3;
                    }
                    ShiftMode::CyclicDouble => {
                        new_b |= q_low << 3;
                        new_q |= f_low << 3;
                    }
                    ShiftMode::ArithmeticDouble => {
                        new_b |= f_high << 3;
                        new_q |= f_low << 3;
                    }
                    ShiftMode::Logical => (),
                }
                state.regs.set_q(new_q);
                state.regs.set(b, new_b);
            }
            AluDest::Ramd => {
                let mut new_b = f >> 1;
                if word.shift_mode() == ShiftMode::Cyclic {
                    new_b |= f_low << 3;
                }
                state.regs.set(b, new_b);
            }
            AluDest::Ramqu => {
                let mut new_q = (q << 1) & 0xF;
                let mut new_b = (f << 1) & 0xF;
                match word.shift_mode() {
                    ShiftMode::Cyclic => {
                        new_b |= f_high;
                        new_q |= q_high;
                    }
                    ShiftMode::CyclicDouble => {
                        new_b |= q_high;
                        new_q |= f_high;
                    }
                    ShiftMode::ArithmeticDouble => {
                        new_b |= q_high;
                    }
                    ShiftMode::Logical => (),
                }
                state.regs.set_q(new_q);
                state.regs.set(b, new_b);
            }
            AluDest::Ramu => {
                let mut new_b = (f << 1) & 0xF;
                if word.shift_mode() == ShiftMode::Cyclic {
                    new_b |= f_high;
                }
                state.regs.set(b, new_b);
            }
        }

        state.y = if word.dest() == AluDest::Rama {
            state.regs.get(a)
        } else {
            f
        };
    }

    fn set_memory_pointer(&mut self, word: &MicroWord) {
        let a = word.field(Field::A).value().unwrap_or(0);
        let b = word.field(Field::B).value().unwrap_or(0);
        self.state
            .memory
            .set_pointer(nibble::join_byte(a, b), word.mem_ptr_mode());
    }

    fn set_device_pointer(&mut self, word: &MicroWord) {
        self.state.dev_ptr = word.field(Field::Device).value();
    }

    fn port(&self) -> Option<Port> {
        self.state.dev_ptr.map(Port::new)
    }

    fn note_unknown_device(&mut self, address: u8, width: TransferWidth, access: PortAccess) {
        let port = self.port();
        event!(
            Level::WARN,
            address,
            ?port,
            "device transfer hit an unmapped port"
        );
        self.events.push(DeviceEvent::UnknownDevice {
            address,
            port,
            width,
            access,
        });
    }

    /// A transfer word: register file against data memory or a device
    /// port, in the width the word selects.
    fn exec_transfer(&mut self, word: &MicroWord, ports: &mut dyn PortExtender) {
        let (Some(op), Some(width)) = (word.transfer_op(), word.transfer_width()) else {
            return;
        };
        let a = word.field(Field::A).value().unwrap_or(0) as usize;
        let b = word.field(Field::B).value().unwrap_or(0) as usize;
        let d = word.field(Field::D).value().unwrap_or(0);

        match op {
            TransferOp::StoreMemory => {
                let pointer = self.state.memory.pointer();
                let current = self.state.memory.byte(pointer);
                let stored = match width {
                    TransferWidth::LowNibble => {
                        nibble::join_byte(nibble::high_nibble(current), self.state.regs.get(b))
                    }
                    TransferWidth::HighNibble => {
                        nibble::join_byte(self.state.regs.get(a), nibble::low_nibble(current))
                    }
                    TransferWidth::FullByte => {
                        nibble::join_byte(self.state.regs.get(a), self.state.regs.get(b))
                    }
                };
                self.state.memory.set_byte(pointer, stored);
            }
            TransferOp::LoadMemory => {
                let loaded = self.state.memory.byte(self.state.memory.pointer());
                match width {
                    TransferWidth::LowNibble => {
                        self.state.regs.set(b, nibble::low_nibble(loaded))
                    }
                    TransferWidth::HighNibble => {
                        self.state.regs.set(a, nibble::high_nibble(loaded))
                    }
                    TransferWidth::FullByte => {
                        self.state.regs.set(a, nibble::high_nibble(loaded));
                        self.state.regs.set(b, nibble::low_nibble(loaded));
                    }
                }
            }
            TransferOp::StoreDevice => match self.port() {
                Some(port) => {
                    let value = match width {
                        TransferWidth::LowNibble => self.state.regs.get(b),
                        TransferWidth::HighNibble => self.state.regs.get(a) << 4,
                        TransferWidth::FullByte => {
                            nibble::join_byte(self.state.regs.get(a), self.state.regs.get(b))
                        }
                    };
                    if ports.write(d, port, width, value).is_err() {
                        self.note_unknown_device(d, width, PortAccess::Write);
                    }
                }
                None => self.note_unknown_device(d, width, PortAccess::Write),
            },
            TransferOp::LoadDevice => match self.port() {
                Some(port) => match ports.read(d, port, width) {
                    Some(value) => match width {
                        TransferWidth::LowNibble => {
                            self.state.regs.set(b, nibble::low_nibble(value))
                        }
                        TransferWidth::HighNibble => {
                            self.state.regs.set(a, nibble::high_nibble(value))
                        }
                        TransferWidth::FullByte => {
                            self.state.regs.set(a, nibble::high_nibble(value));
                            self.state.regs.set(b, nibble::low_nibble(value));
                        }
                    },
                    None => self.note_unknown_device(d, width, PortAccess::Read),
                },
                None => self.note_unknown_device(d, width, PortAccess::Read),
            },
        }

        if matches!(op, TransferOp::StoreMemory | TransferOp::LoadMemory) {
            self.state.memory.advance();
        }
    }

    /// Resolve the next program-counter value from the word's
    /// sequencer half.
    fn resolve_jump(&mut self, program: &Program, word: &MicroWord, pc: u16) {
        self.state.prev_pc = Some(pc);
        let target = word.jump_target();
        let prev = self.state.prev_flags;

        use JumpCondition::*;
        match word.jump_condition() {
            End => self.dispatch_next_call(program),
            Jmp => self.state.pc = Some(target),
            Jnxt => self.state.pc = Some(pc + 1),
            Jnz => self.branch_on(!prev.z, target, pc),
            Jz => self.branch_on(prev.z, target, pc),
            Jf3 => self.branch_on(prev.f3, target, pc),
            Jovr => self.branch_on(prev.ovr, target, pc),
            Jc4 => self.branch_on(prev.c4, target, pc),
            Call => {
                self.state.stack.push(pc + 1);
                self.state.pc = Some(target);
            }
            Ret => {
                let addr = self.state.stack.pop();
                self.state.pc = Some(addr);
            }
            Jsp => self.state.pc = Some(self.state.stack.peek()),
            Push => {
                self.state.stack.push(pc + 1);
                self.state.pc = Some(pc + 1);
            }
            Pop => {
                self.state.stack.drop_top();
                self.state.pc = Some(pc + 1);
            }
            Clnz => {
                if !prev.z {
                    self.state.stack.push(pc + 1);
                    self.state.pc = Some(target);
                } else {
                    self.state.pc = Some(pc + 1);
                }
                self.restore_flags();
            }
            Jsnz => {
                if !prev.z {
                    self.state.pc = Some(self.state.stack.peek());
                } else {
                    self.state.stack.drop_top();
                    self.state.pc = Some(pc + 1);
                }
                self.restore_flags();
            }
            Jsnc4 => {
                if !prev.c4 {
                    self.state.pc = Some(self.state.stack.peek());
                } else {
                    self.state.stack.drop_top();
                    self.state.pc = Some(pc + 1);
                }
                self.restore_flags();
            }
            Unknown => self.restore_flags(),
        }
    }

    fn branch_on(&mut self, condition: bool, target: u16, pc: u16) {
        self.state.pc = Some(if condition { target } else { pc + 1 });
        self.restore_flags();
    }

    /// `END`: the routine returned; consult the dispatch table for
    /// where to go next.
    fn dispatch_next_call(&mut self, program: &Program) {
        let calls = program.calls();
        if calls.is_empty() {
            event!(Level::INFO, "execution ended: no macro-call program");
            self.state.ended = true;
            return;
        }
        let Some(index) = self.state.call_index else {
            // Reachable only when the PC was set by hand; there is no
            // call context to return into.
            event!(Level::INFO, "execution ended: no active call");
            self.state.ended = true;
            return;
        };
        if index >= calls.len() {
            self.state.ended = true;
            return;
        }
        let entry = &calls[index];
        if entry.alt_dispatch() {
            self.restore_flags();
        }
        let next = Self::next_call_index(entry, index, &self.state.prev_flags);
        self.state.call_index = Some(next);
        if next <= calls.len() {
            match program.dispatch().address(entry.code()) {
                Some(addr) => {
                    event!(
                        Level::DEBUG,
                        code = entry.code(),
                        addr,
                        next_index = next,
                        "macro-call dispatch"
                    );
                    self.state.pc = Some(addr);
                }
                None => {
                    event!(
                        Level::WARN,
                        code = entry.code(),
                        "call code has no dispatch entry; ending"
                    );
                    self.state.ended = true;
                }
            }
        } else {
            event!(Level::INFO, "execution ended: call sequence exhausted");
            self.state.ended = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::NullPorts;
    use crate::library;

    fn word(symbols: [u8; WORD_SYMBOLS]) -> MicroWord {
        MicroWord::new(&symbols).expect("ten symbols")
    }

    /// An ALU word computing F = D + 0 (source DZ), no register load.
    fn alu_nop(ca: JumpCondition, d: u8, ar: u16) -> MicroWord {
        word([
            ca.ordinal(),
            1, // no destination load
            7, // operands D and zero
            0, // R+S
            0,
            0,
            d,
            (ar >> 8) as u8 & 0xF,
            (ar >> 4) as u8 & 0xF,
            ar as u8 & 0xF,
        ])
    }

    /// A program whose routine at address 0 is the given words, with a
    /// single dispatch entry and one plain call to it.
    fn routine(words: Vec<MicroWord>) -> Program {
        let mut program = Program::new();
        for (i, w) in words.into_iter().enumerate() {
            program.insert_command(i, w).expect("word fits");
        }
        program
            .add_dispatch_entry(0x40, "MAIN", 0)
            .expect("fresh code");
        program.insert_call(0, 0x40, 0x12, 0x34).expect("mapped");
        program
    }

    #[test]
    fn empty_store_reports_no_commands() {
        let mut unit = ControlUnit::new();
        assert_eq!(
            unit.exec_one(&Program::new(), &mut NullPorts),
            ExecResult::NoCommands
        );
    }

    #[test]
    fn seeding_without_calls_starts_at_zero() {
        let mut program = Program::new();
        program
            .insert_command(0, alu_nop(JumpCondition::Jnxt, 0, 0))
            .expect("fits");
        let mut unit = ControlUnit::new();
        assert_eq!(unit.exec_one(&program, &mut NullPorts), ExecResult::Ok);
        assert_eq!(unit.state().pc, Some(0));
        assert_eq!(unit.state().call_index, None);
    }

    #[test]
    fn seeding_loads_call_arguments_into_memory() {
        let program = routine(vec![alu_nop(JumpCondition::End, 0, 0)]);
        let mut unit = ControlUnit::new();
        assert_eq!(unit.exec_one(&program, &mut NullPorts), ExecResult::Ok);
        assert_eq!(unit.state().memory.byte(0), 0x12);
        assert_eq!(unit.state().memory.byte(1), 0x34);
        assert_eq!(unit.state().pc, Some(0));
        assert_eq!(unit.state().call_index, Some(1));
    }

    #[test]
    fn call_and_ret_round_trip() {
        // 0: CALL 2; 1: END; 2: RET
        let program = routine(vec![
            alu_nop(JumpCondition::Call, 0, 2),
            alu_nop(JumpCondition::End, 0, 0),
            alu_nop(JumpCondition::Ret, 0, 0),
        ]);
        let mut unit = ControlUnit::new();
        assert_eq!(unit.exec_one(&program, &mut NullPorts), ExecResult::Ok); // seed
        assert_eq!(unit.exec_one(&program, &mut NullPorts), ExecResult::Ok); // CALL
        assert_eq!(unit.state().pc, Some(2));
        assert_eq!(unit.exec_one(&program, &mut NullPorts), ExecResult::Ok); // RET
        // Back at the word after the CALL.
        assert_eq!(unit.state().pc, Some(1));
    }

    #[test]
    fn conditional_jump_tests_the_previous_word() {
        let mut program = Program::new();
        // 0: F = 0 (Z set), fall through.  1: F = 5, JZ 3.
        program
            .insert_command(0, alu_nop(JumpCondition::Jnxt, 0, 0))
            .expect("fits");
        program
            .insert_command(1, alu_nop(JumpCondition::Jz, 5, 3))
            .expect("fits");
        let mut unit = ControlUnit::new();
        for _ in 0..3 {
            assert_eq!(unit.exec_one(&program, &mut NullPorts), ExecResult::Ok);
        }
        // The jump saw Z from word 0, not from its own ALU half...
        assert_eq!(unit.state().pc, Some(3));
        // ...its own result still went through the ALU latches...
        assert_eq!(unit.state().f, 5);
        // ...and the flag register was restored to word 0's outcome.
        assert!(unit.state().flags.z);
    }

    #[test]
    fn unconditional_words_keep_their_own_flags() {
        let mut program = Program::new();
        program
            .insert_command(0, alu_nop(JumpCondition::Jnxt, 5, 0))
            .expect("fits");
        let mut unit = ControlUnit::new();
        let _ = unit.exec_one(&program, &mut NullPorts);
        assert_eq!(unit.exec_one(&program, &mut NullPorts), ExecResult::Ok);
        assert!(!unit.state().flags.z);
        assert_eq!(unit.state().f, 5);
    }

    #[test]
    fn push_and_jsp_use_the_stack_top() {
        let program = routine(vec![
            alu_nop(JumpCondition::Push, 0, 0),
            alu_nop(JumpCondition::Jnxt, 0, 0),
            alu_nop(JumpCondition::Jsp, 0, 0),
        ]);
        let mut unit = ControlUnit::new();
        let _ = unit.exec_one(&program, &mut NullPorts); // seed
        let _ = unit.exec_one(&program, &mut NullPorts); // PUSH
        assert_eq!(unit.state().stack.peek(), 1);
        assert_eq!(unit.state().pc, Some(1));
        let _ = unit.exec_one(&program, &mut NullPorts); // JNXT
        assert_eq!(unit.exec_one(&program, &mut NullPorts), ExecResult::Ok); // JSP
        assert_eq!(unit.state().pc, Some(1));
        // JSP does not pop.
        assert_eq!(unit.state().stack.peek(), 1);
    }

    #[test]
    fn incorrect_word_leaves_state_untouched() {
        let mut program = Program::new();
        // Device-pointer word with an out-of-range device select; only
        // loadable through the unchecked image path.
        let bad = word([2, 0, 0, 11, 4, 0, 8, 0, 0, 0]);
        assert!(bad.validate().is_err());
        program.push_loaded_command(bad);
        program.recompute_numbers(0);

        let mut unit = ControlUnit::new();
        let _ = unit.exec_one(&program, &mut NullPorts); // seed to 0
        let before = unit.snapshot();
        assert_eq!(
            unit.exec_one(&program, &mut NullPorts),
            ExecResult::IncorrectCommand
        );
        assert_eq!(unit.snapshot(), before);
    }

    #[test]
    fn gap_addresses_report_incorrect_command() {
        let mut program = Program::new();
        program
            .insert_command(0, alu_nop(JumpCondition::Jnxt, 0, 0))
            .expect("fits");
        let mut unit = ControlUnit::new();
        unit.set_pc(0x200);
        assert_eq!(
            unit.exec_one(&program, &mut NullPorts),
            ExecResult::IncorrectCommand
        );
    }

    #[test]
    fn alt_dispatch_at_index_zero_branches_in_one_batch() {
        let mut program = Program::new();
        library::install(&mut program);
        program
            .add_dispatch_entry(0x40, "MAIN", 0)
            .expect("fresh code");
        program
            .insert_command(0, alu_nop(JumpCondition::End, 0, 0))
            .expect("fits");
        // Index 0: unconditional index-goto to 2; then two plain calls.
        program.insert_call(0, 0, 2, 0).expect("library code");
        program.insert_call(1, 0x40, 0, 0).expect("mapped");
        program.insert_call(2, 0x40, 0, 0).expect("mapped");

        let mut unit = ControlUnit::new();
        // Make the prior flag state visibly "wrong" for a conditional.
        unit.state.flags.z = true;
        unit.state.flags.c4 = true;
        assert_eq!(unit.exec_one_call(&program, &mut NullPorts), ExecResult::Ok);
        assert_eq!(unit.state().call_index, Some(2));
        // Dispatched into the library return stub.
        assert_eq!(unit.state().pc, Some(library::LIBRARY_ORIGIN));
    }

    #[test]
    fn end_exhausts_the_call_sequence() {
        let program = routine(vec![alu_nop(JumpCondition::End, 0, 0)]);
        let mut unit = ControlUnit::new();
        // Seeding already places the index past the one-call sequence.
        assert_eq!(unit.exec_all(&program, &mut NullPorts), ExecResult::Ok);
        assert_eq!(unit.state().call_index, Some(1));
        // The next run executes the routine's END, which ends things.
        assert_eq!(unit.exec_all(&program, &mut NullPorts), ExecResult::Ok);
        assert!(unit.state().ended);
        assert_eq!(unit.exec_all(&program, &mut NullPorts), ExecResult::End);
    }

    #[test]
    fn exec_one_call_stops_at_the_routine_end() {
        let program = routine(vec![
            alu_nop(JumpCondition::Jnxt, 1, 0),
            alu_nop(JumpCondition::End, 0, 0),
        ]);
        let mut unit = ControlUnit::new();
        // Seed step counts as one batch invocation.
        assert_eq!(unit.exec_one_call(&program, &mut NullPorts), ExecResult::Ok);
        // The second invocation runs the routine through its END.
        assert_eq!(unit.exec_one_call(&program, &mut NullPorts), ExecResult::Ok);
        let at_end = unit
            .state()
            .prev_pc
            .and_then(|pc| program.command_index_at(pc))
            .and_then(|i| program.command(i))
            .map(|w| w.jump_condition());
        assert_eq!(at_end, Some(JumpCondition::End));
    }

    #[test]
    fn jump_to_self_stalls_instead_of_spinning() {
        let mut program = Program::new();
        program
            .insert_command(0, alu_nop(JumpCondition::Jmp, 0, 0))
            .expect("fits");
        let mut unit = ControlUnit::new();
        assert_eq!(unit.exec_all(&program, &mut NullPorts), ExecResult::Ok);
        assert_eq!(unit.state().pc, unit.state().prev_pc);
    }

    #[test]
    fn pinned_alt_condition_loops_out_at_the_cap() {
        let mut program = Program::new();
        library::install(&mut program);
        program
            .add_dispatch_entry(0x40, "MAIN", 0)
            .expect("fresh code");
        program
            .insert_command(0, alu_nop(JumpCondition::Jnxt, 0, 0))
            .expect("fits");
        program
            .insert_command(1, alu_nop(JumpCondition::End, 0, 0))
            .expect("fits");
        // A descriptor whose condition the dispatcher does not list
        // pins the call index; the batch runner must trip the cap.
        program
            .insert_call_entry(
                0,
                CallEntry::conditional(0x40, 0, 0, JumpCondition::Ret),
            )
            .expect("mapped");
        program.insert_call(1, 0x40, 0, 0).expect("mapped");

        let mut unit = ControlUnit::new();
        let _ = unit.exec_one(&program, &mut NullPorts); // seed
        assert_eq!(unit.exec_all(&program, &mut NullPorts), ExecResult::Loop);
    }

    #[test]
    fn memory_pointer_and_transfer_words() {
        let mut program = Program::new();
        // 0: MP = 0x20, auto-increment.  1: MEM[MP] = R4:R5.
        program
            .insert_command(0, word([2, 0, 0, 11, 0x2, 0x0, 1, 0, 0, 0]))
            .expect("fits");
        program
            .insert_command(1, word([2, 2, 0, 12, 4, 5, 0, 0, 0, 0]))
            .expect("fits");
        let mut unit = ControlUnit::new();
        unit.state.regs.set(4, 0xA);
        unit.state.regs.set(5, 0x5);
        let _ = unit.exec_one(&program, &mut NullPorts); // seed
        let _ = unit.exec_one(&program, &mut NullPorts); // pointer
        assert_eq!(unit.state().memory.pointer(), 0x20);
        assert_eq!(unit.state().memory.mode(), MemPtrMode::AutoIncrement);
        let _ = unit.exec_one(&program, &mut NullPorts); // store
        assert_eq!(unit.state().memory.byte(0x20), 0xA5);
        assert_eq!(unit.state().memory.pointer(), 0x21);
    }

    #[test]
    fn nibble_transfers_merge_into_memory() {
        let mut program = Program::new();
        // 0: MP = 0x10.  1: MEM[MP].L = R5.  2: R6 = MEM[MP].L
        program
            .insert_command(0, word([2, 0, 0, 11, 0x1, 0x0, 0, 0, 0, 0]))
            .expect("fits");
        program
            .insert_command(1, word([2, 0, 0, 12, 0, 5, 0, 0, 0, 0]))
            .expect("fits");
        program
            .insert_command(2, word([2, 0, 0, 13, 0, 6, 0, 0, 0, 0]))
            .expect("fits");
        let mut unit = ControlUnit::new();
        unit.state.regs.set(5, 0x7);
        unit.state.memory.set_byte(0x10, 0xA0);
        let _ = unit.exec_one(&program, &mut NullPorts);
        let _ = unit.exec_one(&program, &mut NullPorts);
        let _ = unit.exec_one(&program, &mut NullPorts);
        // High nibble preserved, low nibble replaced.
        assert_eq!(unit.state().memory.byte(0x10), 0xA7);
        let _ = unit.exec_one(&program, &mut NullPorts);
        assert_eq!(unit.state().regs.get(6), 0x7);
    }

    #[test]
    fn device_transfer_without_a_port_raises_an_event() {
        let mut program = Program::new();
        // R3 = IO[2].L without any device-pointer word first.
        program
            .insert_command(0, word([2, 0, 0, 15, 0, 3, 2, 0, 0, 0]))
            .expect("fits");
        let mut unit = ControlUnit::new();
        let _ = unit.exec_one(&program, &mut NullPorts); // seed
        assert_eq!(unit.exec_one(&program, &mut NullPorts), ExecResult::Ok);
        assert_eq!(unit.state().regs.get(3), 0);
        let events = unit.take_events();
        assert_eq!(
            events,
            vec![DeviceEvent::UnknownDevice {
                address: 2,
                port: None,
                width: TransferWidth::LowNibble,
                access: PortAccess::Read,
            }]
        );
        assert!(unit.take_events().is_empty());
    }

    #[test]
    fn device_round_trip_through_loopback() {
        use crate::io::LoopbackPorts;
        let mut program = Program::new();
        // 0: select port 1.  1: IO[3] = R4:R5.  2: R6:R7 = IO[3].
        program
            .insert_command(0, word([2, 0, 0, 11, 1, 0, 8, 0, 0, 0]))
            .expect("fits");
        program
            .insert_command(1, word([2, 2, 0, 14, 4, 5, 3, 0, 0, 0]))
            .expect("fits");
        program
            .insert_command(2, word([2, 2, 0, 15, 6, 7, 3, 0, 0, 0]))
            .expect("fits");
        let mut unit = ControlUnit::new();
        let mut ports = LoopbackPorts::default();
        unit.state.regs.set(4, 0xB);
        unit.state.regs.set(5, 0xE);
        for _ in 0..4 {
            assert_eq!(unit.exec_one(&program, &mut ports), ExecResult::Ok);
        }
        assert_eq!(unit.state().dev_ptr, Some(1));
        assert_eq!(unit.state().regs.get(6), 0xB);
        assert_eq!(unit.state().regs.get(7), 0xE);
        assert!(unit.take_events().is_empty());
    }

    #[test]
    fn snapshots_replay_deterministically() {
        let program = routine(vec![
            alu_nop(JumpCondition::Jnxt, 3, 0),
            alu_nop(JumpCondition::End, 0, 0),
        ]);
        let mut unit = ControlUnit::new();
        let _ = unit.exec_one(&program, &mut NullPorts);
        let snapshot = unit.snapshot();
        let _ = unit.exec_one(&program, &mut NullPorts);
        let after_first = unit.snapshot();
        unit.restore(snapshot);
        let _ = unit.exec_one(&program, &mut NullPorts);
        assert_eq!(unit.snapshot(), after_first);
    }
}
