//! Shared plumbing for the PSC-32 property suites: assemble-and-run
//! helpers and a host that records every observable event.

use psc32_core::{asm, Host, Processor};

/// Host that appends every callback to an event log.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub reads: Vec<u32>,
    pub writes: Vec<(u32, String)>,
    pub channels: Vec<(u32, String)>,
}

impl Host for RecordingHost {
    fn memory_read(&mut self, addr: u32) {
        self.reads.push(addr);
    }
    fn memory_write(&mut self, addr: u32, value: &str) {
        self.writes.push((addr, value.to_string()));
    }
    fn channel_write(&mut self, index: u32, value: &str) {
        self.channels.push((index, value.to_string()));
    }
}

/// Assemble `lines`, run `ticks` cycles, and return the processor plus the
/// recorded events.
///
/// # Panics
///
/// Panics when the program fails to assemble; the suites only feed it
/// well-formed sources.
pub fn run(lines: &[&str], ticks: u32) -> (Processor, RecordingHost) {
    let program = asm::compile(lines).expect("harness program assembles");
    let mut cpu = Processor::default();
    cpu.load(program);
    cpu.start();
    let mut host = RecordingHost::default();
    for _ in 0..ticks {
        cpu.cycle(&mut host);
    }
    (cpu, host)
}
