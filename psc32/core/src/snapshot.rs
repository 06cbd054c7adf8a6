//! Serializable dump of every readable state surface, for debug UIs and
//! the CLI. Nothing is persisted by the VM itself; the dump is a plain
//! serde struct the host renders or discards.

use serde::{Deserialize, Serialize};

use crate::processor::{Processor, State};
use crate::state::{Flags, InputLatch, CHANNELS, FLOAT_REGS, INT_REGS, STRING_REGS};
use crate::DebugMode;

/// One output latch as seen from outside: the wire text it would deliver,
/// the kind that text was selected from, and whether it is still pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSlot {
    pub value: String,
    pub kind: Option<String>,
    pub set: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSnapshot {
    pub state: State,
    pub ip: u32,
    pub multiplier: u8,
    pub debug: DebugMode,
    pub flags: Flags,
    pub ir: [i32; INT_REGS],
    pub fr: [f32; FLOAT_REGS],
    pub sr: [Option<String>; STRING_REGS],
    pub inputs: [InputLatch; CHANNELS],
    pub outputs: Vec<OutputSlot>,
    pub pending_addr: u32,
    pub pending_ready: bool,
}

impl ProcessorSnapshot {
    pub fn capture(cpu: &Processor) -> Self {
        let regs = cpu.registers();
        let outputs = (0..CHANNELS)
            .filter_map(|i| cpu.output(i))
            .map(|latch| OutputSlot {
                value: latch.value.stringify(),
                kind: latch.value.selected().map(|k| k.to_string()),
                set: latch.set,
            })
            .collect();
        let inputs: [InputLatch; CHANNELS] =
            std::array::from_fn(|i| cpu.input(i).cloned().unwrap_or_default());
        ProcessorSnapshot {
            state: cpu.state(),
            ip: cpu.ip(),
            multiplier: cpu.config().multiplier,
            debug: cpu.config().debug,
            flags: cpu.flags(),
            ir: regs.ir,
            fr: regs.fr,
            sr: regs.sr.clone(),
            inputs,
            outputs,
            pending_addr: cpu.pending_memory().addr,
            pending_ready: cpu.pending_memory().ready,
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Processor {
    pub fn snapshot(&self) -> ProcessorSnapshot {
        ProcessorSnapshot::capture(self)
    }
}
