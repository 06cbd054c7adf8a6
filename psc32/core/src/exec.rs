//! Execute stage.
//!
//! Dispatches on the operation and fills the scratch record with the
//! output value, the wide accumulator backing its integer payload, and
//! any jump target or halt request. Flag application happens in the
//! writeback stage from the scratch's flag source.

use crate::opcodes::Op;
use crate::state::Flags;
use crate::value::{Kinds, Value};

/// Per-instruction scratch record flowing fetch -> execute -> writeback.
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    /// Operand values materialized by the fetch stage.
    pub vals: [Value; 3],
    /// Value stored by the writeback stage, when the op produces one.
    pub out: Option<Value>,
    /// Value the flag rules are applied to. Usually mirrors `out`; `cmp`
    /// and `test` set it while discarding the result.
    pub flag_value: Option<Value>,
    /// 64-bit unsigned accumulator backing the integer path of
    /// `flag_value`; the upper word carries the carry information.
    pub acc: u64,
    /// Direct flag overwrite (`fls`).
    pub flags_override: Option<Flags>,
    /// Taken jump target (`jmp` family).
    pub jump: Option<u32>,
    /// Processor halt request (`brk`).
    pub halt: bool,
}

impl Scratch {
    fn produce(&mut self, value: Value, acc: u64) {
        self.flag_value = Some(value.clone());
        self.acc = acc;
        self.out = Some(value);
    }

    fn flags_only(&mut self, value: Value, acc: u64) {
        self.flag_value = Some(value);
        self.acc = acc;
    }
}

fn wide(v: i32) -> u64 {
    v as u32 as u64
}

/// Execute one operation over the fetched operands.
///
/// `in_mask` carries the input-latch `set` bits for `inr`.
pub(crate) fn execute(op: Op, sc: &mut Scratch, flags: Flags, in_mask: u8) {
    match op {
        Op::Nop => {}
        Op::Mov => {
            let v = sc.vals[1].clone();
            let acc = wide(v.int);
            sc.produce(v, acc);
        }
        Op::Add => add(sc, 0),
        Op::Adc => add(sc, flags.cf as u64),
        Op::Sub => {
            let (v, acc) = subtract(&sc.vals[0], &sc.vals[1]);
            sc.produce(v, acc);
        }
        Op::Cmp => {
            let (v, acc) = subtract(&sc.vals[0], &sc.vals[1]);
            sc.flags_only(v, acc);
        }
        Op::Inc => step_by_one(sc, 1),
        Op::Dec => step_by_one(sc, -1),
        Op::Mul => {
            let (a, b) = (&sc.vals[0], &sc.vals[1]);
            let kinds = numeric_kinds(a, b);
            let acc = wide(a.int).wrapping_mul(wide(b.int));
            let v = Value {
                kinds,
                int: acc as u32 as i32,
                float: a.float * b.float,
                text: String::new(),
            };
            sc.produce(v, acc);
        }
        Op::Div => {
            let (a, b) = (&sc.vals[0], &sc.vals[1]);
            let kinds = numeric_kinds(a, b);
            // Integer division by zero yields 0; float follows the spec's
            // explicit NaN rule.
            let int = if b.int == 0 { 0 } else { a.int.wrapping_div(b.int) };
            let float = if b.float == 0.0 { f32::NAN } else { a.float / b.float };
            let v = Value {
                kinds,
                int,
                float,
                text: String::new(),
            };
            let acc = wide(int);
            sc.produce(v, acc);
        }
        Op::Shl => shift(sc, ShiftDir::Left),
        Op::Shr => shift(sc, ShiftDir::Right),
        Op::Rol => rotate(sc, RotateDir::Left),
        Op::Ror => rotate(sc, RotateDir::Right),
        Op::And => bitwise(sc, |a, b| a & b),
        Op::Or => bitwise(sc, |a, b| a | b),
        Op::Xor => bitwise(sc, |a, b| a ^ b),
        Op::Not => {
            let int = !(sc.vals[0].int as u32) as i32;
            sc.produce(Value::int(int), wide(int));
        }
        Op::Test => {
            let int = ((sc.vals[0].int as u32) & (sc.vals[1].int as u32)) as i32;
            sc.flags_only(Value::int(int), wide(int));
        }
        Op::Inr => {
            let int = in_mask as i32;
            sc.produce(Value::int(int), wide(int));
        }
        Op::Flr => {
            let int = flags.pack() as i32;
            sc.produce(Value::int(int), wide(int));
        }
        Op::Fls => {
            sc.flags_override = Some(Flags::unpack(sc.vals[0].int as u8));
        }
        Op::Jmp => jump(sc, true),
        Op::Je => jump(sc, flags.zf),
        Op::Jne | Op::Jnz => jump(sc, !flags.zf),
        Op::Jg => jump(sc, !flags.zf && flags.sf == flags.of),
        Op::Jge => jump(sc, flags.sf == flags.of),
        Op::Jl => jump(sc, flags.sf != flags.of),
        Op::Jle => jump(sc, flags.zf || flags.sf != flags.of),
        Op::Mvi2f => {
            let v = Value::float(sc.vals[1].int as f32);
            sc.produce(v, 0);
        }
        Op::Mvi2s => {
            let v = Value::text(sc.vals[1].int.to_string());
            sc.produce(v, 0);
        }
        Op::Mvf2i => {
            let int = sc.vals[1].float as i32;
            sc.produce(Value::int(int), wide(int));
        }
        Op::Mvf2s => {
            let v = Value::text(sc.vals[1].float.to_string());
            sc.produce(v, 0);
        }
        Op::Mvs2i => {
            // Parse failure reads as -1.
            let int = sc.vals[1].text.trim().parse::<i32>().unwrap_or(-1);
            sc.produce(Value::int(int), wide(int));
        }
        Op::Mvs2f => {
            let float = sc.vals[1].text.trim().parse::<f32>().unwrap_or(f32::NAN);
            sc.produce(Value::float(float), 0);
        }
        Op::Ldi2f => {
            let v = Value::float(f32::from_bits(sc.vals[1].int as u32));
            sc.produce(v, 0);
        }
        Op::Ldf2i => {
            let int = sc.vals[1].float.to_bits() as i32;
            sc.produce(Value::int(int), wide(int));
        }
        Op::Find => {
            let hay = &sc.vals[1].text;
            let needle = &sc.vals[2].text;
            let int = match hay.find(needle.as_str()) {
                Some(byte) => hay[..byte].chars().count() as i32,
                None => -1,
            };
            sc.produce(Value::int(int), wide(int));
        }
        Op::Rmv => {
            let v = Value::text(remove_all(&sc.vals[1].text, &sc.vals[2].text));
            sc.produce(v, 0);
        }
        Op::Sbs => {
            let v = Value::text(substring(
                &sc.vals[0].text,
                sc.vals[1].int,
                sc.vals[2].int,
            ));
            sc.produce(v, 0);
        }
        Op::Rpl => {
            let needle = &sc.vals[1].text;
            let text = if needle.is_empty() {
                sc.vals[0].text.clone()
            } else {
                sc.vals[0].text.replace(needle.as_str(), &sc.vals[2].text)
            };
            sc.produce(Value::text(text), 0);
        }
        Op::Chr => {
            let index = sc.vals[2].int;
            let int = if index < 0 {
                -1
            } else {
                sc.vals[1]
                    .text
                    .chars()
                    .nth(index as usize)
                    .map(|c| c as i32)
                    .unwrap_or(-1)
            };
            sc.produce(Value::int(int), wide(int));
        }
        Op::Brk => sc.halt = true,
    }
}

fn numeric_kinds(a: &Value, b: &Value) -> Kinds {
    a.kinds
        .union(b.kinds)
        .intersect(Kinds::INT.union(Kinds::FLOAT))
}

fn add(sc: &mut Scratch, carry: u64) {
    let (a, b) = (&sc.vals[0], &sc.vals[1]);
    let kinds = a.kinds.union(b.kinds);
    let acc = wide(a.int).wrapping_add(wide(b.int)).wrapping_add(carry);
    let v = Value {
        kinds,
        int: acc as u32 as i32,
        float: a.float + b.float,
        text: format!("{}{}", a.text, b.text),
    };
    sc.produce(v, acc);
}

fn subtract(a: &Value, b: &Value) -> (Value, u64) {
    let kinds = a.kinds.union(b.kinds);
    // A borrow wraps into the upper word, which the flag rule reads as CF.
    let acc = wide(a.int).wrapping_sub(wide(b.int));
    let v = Value {
        kinds,
        int: acc as u32 as i32,
        float: a.float - b.float,
        text: remove_all(&a.text, &b.text),
    };
    (v, acc)
}

fn step_by_one(sc: &mut Scratch, delta: i32) {
    let a = &sc.vals[0];
    let kinds = a.kinds.intersect(Kinds::INT.union(Kinds::FLOAT));
    let acc = if delta >= 0 {
        wide(a.int).wrapping_add(delta as u64)
    } else {
        wide(a.int).wrapping_sub(delta.unsigned_abs() as u64)
    };
    let v = Value {
        kinds,
        int: acc as u32 as i32,
        float: a.float + delta as f32,
        text: String::new(),
    };
    sc.produce(v, acc);
}

fn bitwise(sc: &mut Scratch, f: impl Fn(u32, u32) -> u32) {
    let int = f(sc.vals[0].int as u32, sc.vals[1].int as u32) as i32;
    sc.produce(Value::int(int), wide(int));
}

enum ShiftDir {
    Left,
    Right,
}

fn shift(sc: &mut Scratch, dir: ShiftDir) {
    let (a, b) = (&sc.vals[0], &sc.vals[1]);
    let kinds = a
        .kinds
        .union(b.kinds)
        .intersect(Kinds::INT.union(Kinds::STRING));
    let count = b.int;
    let (acc, text) = match dir {
        ShiftDir::Left => {
            // Shifted-out bits land in the accumulator's upper word.
            let acc = match u32::try_from(count).ok().filter(|c| *c < 64) {
                Some(c) => wide(a.int) << c,
                None => 0,
            };
            (acc, drop_left(&a.text, count))
        }
        ShiftDir::Right => {
            let acc = match u32::try_from(count).ok().filter(|c| *c < 32) {
                Some(c) => (wide(a.int) >> c) & 0xFFFF_FFFF,
                None => 0,
            };
            (acc, pad_left(&a.text, count))
        }
    };
    let v = Value {
        kinds,
        int: acc as u32 as i32,
        float: 0.0,
        text,
    };
    sc.produce(v, acc);
}

enum RotateDir {
    Left,
    Right,
}

fn rotate(sc: &mut Scratch, dir: RotateDir) {
    let (a, b) = (&sc.vals[0], &sc.vals[1]);
    let kinds = a
        .kinds
        .union(b.kinds)
        .intersect(Kinds::INT.union(Kinds::STRING));
    let count = b.int;
    let bits = a.int as u32;
    let int = match dir {
        RotateDir::Left => bits.rotate_left(count as u32),
        RotateDir::Right => bits.rotate_right(count as u32),
    } as i32;
    let text = match dir {
        RotateDir::Left => rotate_chars(&a.text, count),
        RotateDir::Right => rotate_chars(&a.text, -count),
    };
    let v = Value {
        kinds,
        int,
        float: 0.0,
        text,
    };
    sc.produce(v, wide(int));
}

fn jump(sc: &mut Scratch, taken: bool) {
    if taken {
        sc.jump = Some(sc.vals[0].int as u32);
    }
}

fn remove_all(hay: &str, needle: &str) -> String {
    if needle.is_empty() {
        hay.to_string()
    } else {
        hay.replace(needle, "")
    }
}

/// `shl` on strings: drop `count` characters from the left.
fn drop_left(text: &str, count: i32) -> String {
    if count <= 0 {
        return text.to_string();
    }
    text.chars().skip(count as usize).collect()
}

/// `shr` on strings: pad `count` spaces on the left, moving content right.
fn pad_left(text: &str, count: i32) -> String {
    if count <= 0 {
        return text.to_string();
    }
    let mut padded = " ".repeat(count as usize);
    padded.push_str(text);
    padded
}

/// Rotate characters left by `count` (right for negative), modulo length.
fn rotate_chars(text: &str, count: i32) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    let len = chars.len() as i64;
    let split = (count as i64).rem_euclid(len) as usize;
    chars[split..].iter().chain(chars[..split].iter()).collect()
}

/// Substring starting at `start` with `len` characters, saturating at the
/// string's bounds.
fn substring(text: &str, start: i32, len: i32) -> String {
    if len <= 0 {
        return String::new();
    }
    let start = start.max(0) as usize;
    text.chars().skip(start).take(len as usize).collect()
}
