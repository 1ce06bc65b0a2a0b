use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use base::prelude::JumpCondition;
use cpu::{ExecResult, LoopbackPorts, Mt1804};

#[derive(Parser, Debug)]
#[command(name = "mt1804", about = "Simulate the MT-1804 microcode trainer")]
struct Args {
    /// Trainer image to load (full format).
    image: Option<PathBuf>,

    /// Print the program listing instead of running it.
    #[arg(long)]
    list: bool,

    /// Single-step with a state line after every executed word.
    #[arg(long)]
    trace: bool,

    /// Stop after this many single steps in --trace mode.
    #[arg(long, default_value_t = 4096)]
    steps: usize,
}

fn init_tracing() -> Result<(), Box<dyn Error>> {
    // Select trace output with the usual environment filter; default
    // to "info" when none is set.
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
    Ok(())
}

fn print_listing(machine: &Mt1804) {
    println!("-- dispatch map --");
    for (code, entry) in machine.program().dispatch().iter() {
        println!("{code:#05x}  {:<32} -> 0x{:03X}", entry.name, entry.address);
    }
    println!("-- calls --");
    for (index, call) in machine.program().calls().iter().enumerate() {
        let name = machine
            .program()
            .dispatch()
            .name(call.code())
            .unwrap_or("?");
        if call.alt_dispatch() {
            println!(
                "{index:3}  {name:<32} {} -> index {}",
                call.condition(),
                call.arg0()
            );
        } else {
            println!(
                "{index:3}  {name:<32} args {:#04x} {:#04x}",
                call.arg0(),
                call.arg1()
            );
        }
    }
    println!("-- words --");
    for word in machine.program().commands() {
        println!(
            "0x{:03X}  {:<40} {}",
            word.number(),
            word.mnemonic(),
            word.jump_mnemonic()
        );
    }
}

fn state_line(machine: &Mt1804) -> String {
    let state = machine.state();
    let pc = state
        .pc
        .map(|pc| format!("{pc:03X}"))
        .unwrap_or_else(|| "---".to_string());
    format!(
        "pc={pc} f={:X} y={:X} z={} f3={} c4={} ovr={} g={} p={} q={:X} mp={:02X} sp={}",
        state.f,
        state.y,
        state.flags.z as u8,
        state.flags.f3 as u8,
        state.flags.c4 as u8,
        state.flags.ovr as u8,
        state.flags.g as u8,
        state.flags.p as u8,
        state.regs.q(),
        state.memory.pointer(),
        state.stack.pointer(),
    )
}

fn dump_state(machine: &Mt1804) {
    let state = machine.state();
    println!("registers:");
    for (index, value) in state.regs.file().iter().enumerate() {
        print!("  R{index}={value:X}");
        if index % 8 == 7 {
            println!();
        }
    }
    println!("q={:X} r={:X} s={:X} f={:X} y={:X}", state.regs.q(), state.r, state.s, state.f, state.y);
    println!(
        "flags: z={} f3={} c4={} ovr={} g={} p={}",
        state.flags.z as u8,
        state.flags.f3 as u8,
        state.flags.c4 as u8,
        state.flags.ovr as u8,
        state.flags.g as u8,
        state.flags.p as u8
    );
    println!("stack (sp={}): {:03X?}", state.stack.pointer(), state.stack.slots());
    println!("memory pointer: {:02X} ({:?})", state.memory.pointer(), state.memory.mode());
    print!("memory[00..10]:");
    for value in &state.memory.bytes()[..16] {
        print!(" {value:02X}");
    }
    println!();
}

fn run_traced(machine: &mut Mt1804, steps: usize) -> ExecResult {
    for _ in 0..steps {
        let result = machine.exec_one();
        if result != ExecResult::Ok {
            return result;
        }
        let jump = machine
            .executed_command()
            .map(|word| word.jump_mnemonic())
            .unwrap_or_else(|| "seed".to_string());
        println!("{}  [{jump}]", state_line(machine));
        let done = machine
            .executed_command()
            .map(|word| word.jump_condition() == JumpCondition::End)
            .unwrap_or(false);
        if done && machine.call_index().is_none() {
            return ExecResult::End;
        }
    }
    ExecResult::Loop
}

fn run_simulator() -> Result<(), Box<dyn Error>> {
    init_tracing()?;
    let args = Args::parse();

    let mut machine = Mt1804::new(Box::new(LoopbackPorts::default()));
    if let Some(path) = &args.image {
        let bytes = std::fs::read(path)?;
        machine.load_image(&bytes)?;
        event!(Level::INFO, image = %path.display(), "image loaded");
    }

    if args.list {
        print_listing(&machine);
        return Ok(());
    }

    let result = if args.trace {
        run_traced(&mut machine, args.steps)
    } else {
        machine.exec_all()
    };
    println!("result: {result}");
    dump_state(&machine);
    for device_event in machine.take_events() {
        println!("device event: {device_event}");
    }
    Ok(())
}

fn main() {
    match run_simulator() {
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Ok(()) => std::process::exit(0),
    }
}
