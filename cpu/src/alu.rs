//! The 4-bit ALU slice and its carry-lookahead flag network.
//!
//! The function result is simple masked arithmetic; the flags are not.
//! The slice reports carry-out (C4), overflow (OVR), group generate
//! (G) and group propagate (P) from the lookahead network, and each
//! function family reduces the per-bit generate/propagate terms with
//! its own closed form.  Those reductions are reproduced here
//! bit-for-bit; the tests check every operand pair.

use serde::Serialize;

use base::prelude::AluOp;

/// The six condition outputs of one ALU step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Flags {
    /// All result bits zero.
    pub z: bool,
    /// Top bit of the result.
    pub f3: bool,
    /// Carry out of the lookahead network.
    pub c4: bool,
    /// Two's-complement overflow.
    pub ovr: bool,
    /// Group generate (active low for the arithmetic family).
    pub g: bool,
    /// Group propagate (active low for the arithmetic family).
    pub p: bool,
}

/// Result of one ALU step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AluOutput {
    pub f: u8,
    pub flags: Flags,
}

fn bit(value: u8, n: u32) -> bool {
    (value >> n) & 1 != 0
}

fn not4(value: u8) -> u8 {
    !value & 0xF
}

/// Run one ALU function over 4-bit operands.
pub fn evaluate(op: AluOp, r: u8, s: u8) -> AluOutput {
    let r = r & 0xF;
    let s = s & 0xF;
    let f = function_result(op, r, s);
    AluOutput {
        f,
        flags: lookahead_flags(op, r, s, f),
    }
}

fn function_result(op: AluOp, r: u8, s: u8) -> u8 {
    use AluOp::*;
    let wide = match op {
        RPlusS => r as u16 + s as u16,
        RPlusSPlus1 => r as u16 + s as u16 + 1,
        SMinusRMinus1 => s as u16 + not4(r) as u16,
        SMinusR => s as u16 + not4(r) as u16 + 1,
        RMinusSMinus1 => r as u16 + not4(s) as u16,
        RMinusS => r as u16 + not4(s) as u16 + 1,
        ROrS => (r | s) as u16,
        RAndS => (r & s) as u16,
        NotRAndS => (not4(r) & s) as u16,
        RXorS => (r ^ s) as u16,
        RXnorS => not4(r ^ s) as u16,
    };
    (wide & 0xF) as u8
}

fn lookahead_flags(op: AluOp, r: u8, s: u8, f: u8) -> Flags {
    use AluOp::*;
    let c0 = op.carry_in();

    // The network sees the operands the adder sees: the subtraction
    // variants feed one operand in complemented, and the XOR function
    // shares the complemented-R network with them.
    let (r, s) = match op {
        SMinusRMinus1 | SMinusR | NotRAndS | RXorS => (not4(r), s),
        RMinusSMinus1 | RMinusS => (r, not4(s)),
        _ => (r, s),
    };

    let p = r | s;
    let g = r & s;
    let all_propagate = p == 0xF;
    let any_generate = g != 0;

    let (c4, ovr, g_out, p_out) = match op {
        RPlusS | RPlusSPlus1 | SMinusRMinus1 | SMinusR | RMinusSMinus1 | RMinusS => {
            let g3 = bit(g, 3)
                || (bit(p, 3)
                    && (bit(g, 2) || (bit(p, 2) && (bit(g, 1) || (bit(p, 1) && bit(g, 0))))));
            let c1 = bit(g, 0) || (bit(p, 0) && c0);
            let c2 = bit(g, 1) || (bit(p, 1) && c1);
            let c3 = bit(g, 2) || (bit(p, 2) && c2);
            let c4 = bit(g, 3) || (bit(p, 3) && c3);
            (c4, c3 != c4, !g3, !all_propagate)
        }
        ROrS => {
            let c4 = !all_propagate || c0;
            (c4, c4, all_propagate, false)
        }
        RAndS | NotRAndS => {
            let c4 = any_generate || c0;
            (c4, c4, !any_generate, false)
        }
        RXorS | RXnorS => {
            let g1 = bit(g, 1) || (bit(p, 1) && bit(p, 0));
            let g2 = bit(g, 2) || (bit(p, 2) && g1);
            let g3 = bit(g, 3) || (bit(p, 3) && g2);

            let x1 = bit(g, 1) || (bit(p, 1) && bit(p, 0) && (bit(g, 0) || !c0));
            let x2 = bit(g, 2) || (bit(p, 2) && x1);
            let x3 = bit(g, 3) || (bit(p, 3) && x2);

            let pn = not4(p);
            let gn = not4(g);
            let o0 = bit(pn, 0) || (bit(gn, 0) && c0);
            let o1 = bit(pn, 1) || (bit(gn, 1) && o0);
            let o2 = bit(pn, 2) || (bit(gn, 2) && o1);
            let o3 = bit(pn, 3) || (bit(gn, 3) && o2);

            (!x3, o2 != o3, g3, any_generate)
        }
    };

    Flags {
        z: f == 0,
        f3: bit(f, 3),
        c4,
        ovr,
        g: g_out,
        p: p_out,
    }
}
