use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use psc32_core::{asm, Config, DebugMode, Host, Processor, State, DEBUG_ADDR};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "psc32-cli")]
#[command(about = "Assemble and run a PSC-32 program", long_about = None)]
struct Args {
    /// Path to the assembly source
    source: PathBuf,

    /// Number of clock ticks to run
    #[arg(long, default_value_t = 256)]
    ticks: u64,

    /// Sub-steps per tick
    #[arg(long, default_value_t = 8)]
    multiplier: u8,

    /// Debug mode
    #[arg(long, value_enum, default_value = "none")]
    debug: DebugMode,

    /// Seed an input channel before the run, as index:value (repeatable)
    #[arg(long = "input")]
    inputs: Vec<String>,

    /// Dump the final processor state as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    dump_state: bool,
}

/// Host backed by a hash-map memory. Reads are recorded and answered
/// between ticks, matching the one-tick latency of a real memory peer.
#[derive(Default)]
struct MapHost {
    memory: HashMap<u32, String>,
    pending: Option<u32>,
}

impl Host for MapHost {
    fn memory_read(&mut self, addr: u32) {
        self.pending = Some(addr);
    }

    fn memory_write(&mut self, addr: u32, value: &str) {
        if addr == DEBUG_ADDR {
            eprintln!("[debug] {value}");
        } else {
            self.memory.insert(addr, value.to_string());
        }
    }

    fn channel_write(&mut self, index: u32, value: &str) {
        println!("ou{index} -> {value}");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let text = fs::read_to_string(&args.source)
        .with_context(|| format!("reading {}", args.source.display()))?;
    let lines: Vec<&str> = text.lines().collect();
    let program = asm::compile(&lines).map_err(|e| anyhow::anyhow!("{e}"))?;

    let mut cpu = Processor::new(Config {
        multiplier: args.multiplier,
        debug: args.debug,
    });
    cpu.load(program);

    for spec in &args.inputs {
        let (index, value) = spec
            .split_once(':')
            .with_context(|| format!("input '{spec}' is not index:value"))?;
        let index: u32 = index.parse().with_context(|| format!("input '{spec}'"))?;
        cpu.channel(index, value)?;
    }

    cpu.start();
    let mut host = MapHost::default();
    for _ in 0..args.ticks {
        cpu.cycle(&mut host);
        // Answer the memory request the tick suspended on.
        if let Some(addr) = host.pending.take() {
            let value = host.memory.get(&addr).cloned().unwrap_or_default();
            cpu.memory(&value);
        }
        if cpu.state() == State::Stopped {
            break;
        }
    }

    if args.dump_state {
        println!("{}", cpu.snapshot().to_json()?);
    }

    Ok(())
}
