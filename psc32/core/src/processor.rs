//! Processor core.
//!
//! Owns the program image, register files, latches and flags, and drives
//! the fetch/execute/writeback pipeline. A host ticks the processor with
//! [`Processor::cycle`] and observes the outside world through the
//! [`Host`] callbacks; memory reads, unset input latches and undelivered
//! output latches suspend the tick until the host supplies the missing
//! signal.

use crate::exec::{execute, Scratch};
use crate::opcodes::{mask, Arg, MemAddr, Op, Opcode, Program};
use crate::state::{
    Flags, InputLatch, MemRequest, OutputLatch, Reg, Registers, CHANNELS,
};
use crate::value::{Kind, Value};
use crate::{Config, CoreError, DebugMode, Result, DEBUG_ADDR};

/// Observer interface for the processor's external effects. All methods
/// default to no-ops so tests can implement only what they assert on.
pub trait Host {
    /// An external memory read was issued; answer via [`Processor::memory`].
    fn memory_read(&mut self, _addr: u32) {}
    /// An external memory cell was written.
    fn memory_write(&mut self, _addr: u32, _value: &str) {}
    /// An output channel delivered its latched value at end of tick.
    fn channel_write(&mut self, _index: u32, _value: &str) {}
}

/// Host that ignores every event.
#[derive(Debug, Default)]
pub struct NullHost;

impl Host for NullHost {}

/// Processor run state, as surfaced to the hosting shell.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Working,
    Stopped,
}

/// How much of the tick's sub-step budget a `cycle` call consumed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Load {
    FullyConsumed,
    Underloaded,
}

pub struct Processor {
    config: Config,
    program: Program,
    ip: u32,
    regs: Registers,
    inputs: [InputLatch; CHANNELS],
    outputs: [OutputLatch; CHANNELS],
    flags: Flags,
    mem: MemRequest,
    working: bool,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Processor {
    pub fn new(config: Config) -> Self {
        let config = Config {
            multiplier: config.multiplier.clamp(1, 16),
            ..config
        };
        Processor {
            config,
            program: Program::default(),
            ip: 0,
            regs: Registers::default(),
            inputs: Default::default(),
            outputs: Default::default(),
            flags: Flags::default(),
            mem: MemRequest::default(),
            working: false,
        }
    }

    /// Replace the program image and clear all state.
    pub fn load(&mut self, program: Program) {
        self.program = program;
        self.reset();
    }

    /// Clear registers, flags, latches and the instruction pointer. The
    /// program and the Working bit are kept.
    pub fn reset(&mut self) {
        self.ip = 0;
        self.regs.reset();
        self.inputs = Default::default();
        self.outputs = Default::default();
        self.flags = Flags::default();
        self.mem = MemRequest::default();
    }

    pub fn start(&mut self) {
        self.working = true;
    }

    pub fn stop(&mut self) {
        self.working = false;
    }

    pub fn state(&self) -> State {
        if self.working {
            State::Working
        } else {
            State::Stopped
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ip(&self) -> u32 {
        self.ip
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn input(&self, index: usize) -> Option<&InputLatch> {
        self.inputs.get(index)
    }

    pub fn output(&self, index: usize) -> Option<&OutputLatch> {
        self.outputs.get(index)
    }

    pub(crate) fn pending_memory(&self) -> &MemRequest {
        &self.mem
    }

    /// Deliver a raw signal into an input channel latch.
    pub fn channel(&mut self, index: u32, raw: &str) -> Result<()> {
        let latch = self
            .inputs
            .get_mut(index as usize)
            .ok_or(CoreError::ChannelOutOfRange(index))?;
        latch.store(raw);
        Ok(())
    }

    /// Satisfy the outstanding memory read. Pairing requests with answers
    /// is the caller's responsibility; an unsolicited value simply
    /// replaces the cached one.
    pub fn memory(&mut self, raw: &str) {
        self.mem.value = raw.to_string();
        self.mem.ready = true;
    }

    /// Advance by at most `multiplier` sub-steps, then flush output
    /// latches. A stopped processor ticks as a no-op.
    pub fn cycle(&mut self, host: &mut dyn Host) -> Load {
        if !self.working {
            return Load::Underloaded;
        }

        let mut consumed = 0u32;
        for _ in 0..self.config.multiplier {
            // Past the end of the program every fetch is a nop.
            if self.ip as usize >= self.program.len() {
                break;
            }
            let opcode = self.program.opcodes[self.ip as usize].clone();
            self.ip += 1;
            if opcode.op == Op::Nop {
                consumed += 1;
                break;
            }

            let mut sc = Scratch::default();
            if !self.fetch(&opcode, &mut sc, host) {
                // Rewind so the next tick retries the suspended opcode.
                self.ip -= 1;
                break;
            }

            let in_mask = self.input_mask();
            execute(opcode.op, &mut sc, self.flags, in_mask);
            consumed += 1;

            if let Some(target) = sc.jump {
                self.ip = target.min(self.program.len() as u32);
            }

            if self.config.debug == DebugMode::Verbose {
                let line = format!("{:04} {}", opcode.line, opcode);
                host.memory_write(DEBUG_ADDR, &line);
            }
            if sc.halt {
                self.working = false;
                host.memory_write(DEBUG_ADDR, &format!("brk at {:04}", opcode.line));
            }

            let wrote_memory = self.writeback(&opcode, &mut sc, host);
            if wrote_memory || sc.halt {
                break;
            }
            if self.config.debug == DebugMode::StepByStep {
                self.working = false;
                break;
            }
        }

        self.flush_outputs(host);

        if consumed == self.config.multiplier as u32 {
            Load::FullyConsumed
        } else {
            Load::Underloaded
        }
    }

    fn input_mask(&self) -> u8 {
        self.inputs
            .iter()
            .enumerate()
            .fold(0u8, |bits, (i, latch)| bits | ((latch.set as u8) << i))
    }

    /// Fetch stage. Returns false when the operation suspends: a memory
    /// cell not yet supplied, an unset input latch, or an undelivered
    /// output latch behind a write-only arg1.
    fn fetch(&mut self, opcode: &Opcode, sc: &mut Scratch, host: &mut dyn Host) -> bool {
        for (i, spec) in opcode.op.entry().operands.iter().enumerate() {
            let write_only = spec & mask::READ == 0;
            if i == 0 && write_only {
                // No read, but an unsent output still blocks the write.
                if let Arg::Reg(Reg::Ou(ch)) = opcode.args[0] {
                    if self.outputs[ch as usize].set {
                        return false;
                    }
                }
                continue;
            }

            match &opcode.args[i] {
                Arg::None => {}
                Arg::Mem(addr) => {
                    let addr = self.resolve_addr(*addr);
                    if self.mem.ready && self.mem.addr == addr {
                        sc.vals[i] = Value::memory(&self.mem.value);
                    } else {
                        self.mem.addr = addr;
                        self.mem.ready = false;
                        host.memory_read(addr);
                        return false;
                    }
                }
                Arg::Lit(literal) => sc.vals[i] = literal.to_value(),
                Arg::Reg(reg) => match *reg {
                    Reg::Ir(n) => sc.vals[i] = Value::int(self.regs.ir[n as usize]),
                    Reg::Fr(n) => sc.vals[i] = Value::float(self.regs.fr[n as usize]),
                    Reg::Sr(n) => {
                        sc.vals[i] =
                            Value::text(self.regs.sr[n as usize].clone().unwrap_or_default())
                    }
                    Reg::In(n) => {
                        let latch = &mut self.inputs[n as usize];
                        if !latch.set {
                            return false;
                        }
                        sc.vals[i] = latch.take();
                    }
                    // Output latches are never readable; the table keeps
                    // them out of readable operands.
                    Reg::Ou(_) => return false,
                },
            }
        }
        true
    }

    fn resolve_addr(&self, addr: MemAddr) -> u32 {
        match addr {
            MemAddr::Abs(a) => a,
            MemAddr::Ir(n) => self.regs.ir[n as usize] as u32,
        }
    }

    /// Writeback stage. Returns true when the result went to external
    /// memory, which ends the tick.
    fn writeback(&mut self, opcode: &Opcode, sc: &mut Scratch, host: &mut dyn Host) -> bool {
        let writable = opcode
            .op
            .entry()
            .operands
            .first()
            .is_some_and(|s| s & mask::WRITE != 0);

        let mut wrote_memory = false;
        if writable {
            if let Some(out) = sc.out.take() {
                match &opcode.args[0] {
                    Arg::Mem(addr) => {
                        let addr = self.resolve_addr(*addr);
                        host.memory_write(addr, &out.stringify());
                        wrote_memory = true;
                    }
                    Arg::Reg(Reg::Ir(n)) => self.regs.ir[*n as usize] = out.int,
                    Arg::Reg(Reg::Fr(n)) => self.regs.fr[*n as usize] = out.float,
                    Arg::Reg(Reg::Sr(n)) => {
                        self.regs.sr[*n as usize] = Some(out.text.clone())
                    }
                    Arg::Reg(Reg::Ou(ch)) => self.outputs[*ch as usize].store(out),
                    _ => {}
                }
            }
        }

        if let Some(flags) = sc.flags_override.take() {
            self.flags = flags;
        } else if let Some(flag_value) = sc.flag_value.take() {
            match flag_value.selected() {
                Some(Kind::Int) => self.flags.update_int(sc.acc),
                Some(Kind::Float) => self.flags.update_float(flag_value.float),
                Some(Kind::Str) => self.flags.update_str(&flag_value.text),
                None => {}
            }
        }

        wrote_memory
    }

    /// Deliver every set output latch in ascending channel order.
    fn flush_outputs(&mut self, host: &mut dyn Host) {
        for (i, latch) in self.outputs.iter_mut().enumerate() {
            if latch.set {
                host.channel_write(i as u32, &latch.value.stringify());
                latch.set = false;
            }
        }
    }
}
