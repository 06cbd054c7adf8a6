//! Processor state: register files, I/O latches, status flags and the
//! pending memory request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value::{Kinds, Value};

pub const INT_REGS: usize = 8;
pub const FLOAT_REGS: usize = 8;
pub const STRING_REGS: usize = 8;
pub const CHANNELS: usize = 4;

/// Architectural registers and channel latches addressable from source.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Reg {
    /// Signed 32-bit integer register `ir0..ir7`.
    Ir(u8),
    /// IEEE-754 binary32 register `fr0..fr7`.
    Fr(u8),
    /// Nullable string register `sr0..sr7`.
    Sr(u8),
    /// Input channel latch `in0..in3`.
    In(u8),
    /// Output channel latch `ou0..ou3`.
    Ou(u8),
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Ir(n) => write!(f, "ir{n}"),
            Reg::Fr(n) => write!(f, "fr{n}"),
            Reg::Sr(n) => write!(f, "sr{n}"),
            Reg::In(n) => write!(f, "in{n}"),
            Reg::Ou(n) => write!(f, "ou{n}"),
        }
    }
}

/// Errors surfaced while parsing register names.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegisterError {
    #[error("unknown register '{0}'")]
    UnknownRegister(String),
    #[error("register index {1} is out of range for '{0}'")]
    IndexOutOfRange(String, u8),
}

impl FromStr for Reg {
    type Err = RegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() {
            return Err(RegisterError::UnknownRegister(s.into()));
        }
        let lower = s.to_ascii_lowercase();
        let (prefix, rest) = lower.split_at(lower.len().min(2));
        let index: u8 = rest
            .parse()
            .map_err(|_| RegisterError::UnknownRegister(s.into()))?;
        let (reg, limit) = match prefix {
            "ir" => (Reg::Ir(index), INT_REGS),
            "fr" => (Reg::Fr(index), FLOAT_REGS),
            "sr" => (Reg::Sr(index), STRING_REGS),
            "in" => (Reg::In(index), CHANNELS),
            "ou" => (Reg::Ou(index), CHANNELS),
            _ => return Err(RegisterError::UnknownRegister(s.into())),
        };
        if (index as usize) < limit {
            Ok(reg)
        } else {
            Err(RegisterError::IndexOutOfRange(prefix.into(), index))
        }
    }
}

impl Reg {
    /// True when `name` is claimed by the register grammar, whatever the
    /// index. Labels must not shadow these.
    pub fn is_register_name(name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        let Some(rest) = lower
            .strip_prefix("ir")
            .or_else(|| lower.strip_prefix("fr"))
            .or_else(|| lower.strip_prefix("sr"))
            .or_else(|| lower.strip_prefix("in"))
            .or_else(|| lower.strip_prefix("ou"))
        else {
            return false;
        };
        !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())
    }
}

/// The general-purpose register files.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Registers {
    pub ir: [i32; INT_REGS],
    pub fr: [f32; FLOAT_REGS],
    pub sr: [Option<String>; STRING_REGS],
}

impl Registers {
    pub fn reset(&mut self) {
        *self = Registers::default();
    }
}

/// Single-slot input buffer for one channel. A consuming read returns all
/// three interpretations at once and clears the slot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InputLatch {
    pub int: i32,
    pub float: f32,
    pub text: Option<String>,
    pub set: bool,
}

impl InputLatch {
    pub fn store(&mut self, raw: &str) {
        let v = Value::signal(raw);
        self.int = v.int;
        self.float = v.float;
        self.text = Some(v.text);
        self.set = true;
    }

    /// Consume the latch, materializing every kind simultaneously.
    pub fn take(&mut self) -> Value {
        let value = Value {
            kinds: Kinds::ALL,
            int: self.int,
            float: self.float,
            text: self.text.take().unwrap_or_default(),
        };
        *self = InputLatch::default();
        value
    }
}

/// Single-slot output buffer for one channel. Stays blocked for further
/// writes until the end-of-tick flush delivers it.
#[derive(Clone, Debug, Default)]
pub struct OutputLatch {
    pub value: Value,
    pub set: bool,
}

impl OutputLatch {
    pub fn store(&mut self, value: Value) {
        self.value = value;
        self.set = true;
    }
}

/// The four status flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub cf: bool,
    pub zf: bool,
    pub sf: bool,
    pub of: bool,
}

impl Flags {
    /// Pack as `OF<<3 | SF<<2 | ZF<<1 | CF` (the `flr` layout).
    pub fn pack(self) -> u8 {
        (self.of as u8) << 3 | (self.sf as u8) << 2 | (self.zf as u8) << 1 | self.cf as u8
    }

    /// Inverse of [`Flags::pack`] (the `fls` layout).
    pub fn unpack(bits: u8) -> Self {
        Flags {
            cf: bits & 0b0001 != 0,
            zf: bits & 0b0010 != 0,
            sf: bits & 0b0100 != 0,
            of: bits & 0b1000 != 0,
        }
    }

    /// Flag rule for an integer result carried in a 64-bit accumulator:
    /// SF mirrors bit 31, ZF the low word, CF any carry into the upper
    /// word, and OF their disagreement.
    pub fn update_int(&mut self, acc: u64) {
        let low = acc as u32;
        self.sf = low & 0x8000_0000 != 0;
        self.zf = low == 0;
        self.cf = acc >> 32 != 0;
        self.of = self.cf != self.sf;
    }

    /// Flag rule for a float result; CF and OF are untouched.
    pub fn update_float(&mut self, out: f32) {
        self.sf = out < 0.0;
        self.zf = out == 0.0;
    }

    /// Flag rule for a string result; only ZF is touched.
    pub fn update_str(&mut self, out: &str) {
        self.zf = out.is_empty();
    }
}

/// The single outstanding external memory request, plus the last value the
/// host supplied for it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemRequest {
    pub addr: u32,
    pub ready: bool,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_name_parsing() {
        assert_eq!(Reg::from_str("ir0").unwrap(), Reg::Ir(0));
        assert_eq!(Reg::from_str("FR7").unwrap(), Reg::Fr(7));
        assert_eq!(Reg::from_str("in3").unwrap(), Reg::In(3));
        assert!(Reg::from_str("ir8").is_err());
        assert!(Reg::from_str("in4").is_err());
        assert!(Reg::from_str("zr0").is_err());
        assert!(Reg::from_str("ir").is_err());
    }

    #[test]
    fn register_names_are_reserved_for_any_index() {
        assert!(Reg::is_register_name("ir0"));
        assert!(Reg::is_register_name("ou9"));
        assert!(Reg::is_register_name("IN12"));
        assert!(!Reg::is_register_name("irq"));
        assert!(!Reg::is_register_name("loop"));
    }

    #[test]
    fn input_latch_take_clears_the_slot() {
        let mut latch = InputLatch::default();
        latch.store("9");
        assert!(latch.set);

        let v = latch.take();
        assert_eq!(v.int, 9);
        assert_eq!(v.float, 9.0);
        assert_eq!(v.text, "9");
        assert!(!latch.set);
        assert_eq!(latch.int, 0);
        assert_eq!(latch.text, None);
    }

    #[test]
    fn flags_pack_round_trips() {
        for bits in 0..16u8 {
            assert_eq!(Flags::unpack(bits).pack(), bits);
        }
    }

    #[test]
    fn int_flag_rule_observes_carry_and_sign() {
        let mut flags = Flags::default();
        flags.update_int(0x8000_0000);
        assert!(flags.sf && !flags.zf && !flags.cf && flags.of);

        flags.update_int(0x1_0000_0000);
        assert!(!flags.sf && flags.zf && flags.cf && flags.of);

        flags.update_int(4);
        assert!(!flags.sf && !flags.zf && !flags.cf && !flags.of);
    }
}
