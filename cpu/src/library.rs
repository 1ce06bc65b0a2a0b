//! The factory-programmed call library.
//!
//! The trainer ships with five control codes, 0-4.  Each dispatches to
//! the same one-word routine — an `END` at the library origin — so
//! their entire effect is the index arithmetic their conditional
//! descriptors perform in the call sequence (see
//! [`Program::insert_call`]).  Being an ALU word, the return stub
//! latches Z=1/F=0 as a side effect, just like the hardware's stub.

use base::prelude::{JumpCondition, MicroWord, WORD_SYMBOLS};

use crate::program::Program;

/// Entry address of the library region.
pub const LIBRARY_ORIGIN: u16 = 0xF00;

const CONTROL_ENTRIES: [(u16, &str); 5] = [
    (0, "JUMP"),
    (1, "IFC4"),
    (2, "IFZ"),
    (3, "IFNC4"),
    (4, "IFNZ"),
];

/// The library return stub: `END` with a do-nothing ALU half
/// (F = D + 0 with D = 0, no register load).
fn return_stub() -> MicroWord {
    let mut symbols = [0_u8; WORD_SYMBOLS];
    symbols[0] = JumpCondition::End.ordinal();
    symbols[1] = 1; // no destination load
    symbols[2] = 7; // operands D and zero
    MicroWord::new(&symbols).expect("fixed symbol count")
}

/// Seed a fresh program store with the built-in library.
pub(crate) fn install(program: &mut Program) {
    for (code, name) in CONTROL_ENTRIES {
        program
            .dispatch_insert_loaded(code, name, LIBRARY_ORIGIN)
            .expect("library dispatch entries are disjoint");
    }
    program.push_library_command(MicroWord::offset_to(LIBRARY_ORIGIN));
    program.push_library_command(return_stub());
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::prelude::WordKind;

    #[test]
    fn library_lands_at_its_origin() {
        let mut program = Program::new();
        install(&mut program);
        let stub_index = program
            .command_index_at(LIBRARY_ORIGIN)
            .expect("stub resolved");
        let stub = program.command(stub_index).expect("stub present");
        assert_eq!(stub.kind(), WordKind::Alu);
        assert_eq!(stub.jump_condition(), JumpCondition::End);
        for (code, _) in CONTROL_ENTRIES {
            assert_eq!(program.dispatch().address(code), Some(LIBRARY_ORIGIN));
        }
    }
}
