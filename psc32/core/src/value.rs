//! Tri-typed value model.
//!
//! A `Value` carries every interpretation it is known to inhabit at once:
//! a signal fetched from an input channel materializes as int, float and
//! string simultaneously, and arithmetic propagates the union of its
//! operands' kinds. Sinks that need one concrete kind pick by the fixed
//! precedence Int > Float > String.

use std::fmt;

/// Bitmask over the three value kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Kinds(u8);

impl Kinds {
    pub const NONE: Kinds = Kinds(0);
    pub const INT: Kinds = Kinds(1 << 0);
    pub const FLOAT: Kinds = Kinds(1 << 1);
    pub const STRING: Kinds = Kinds(1 << 2);
    pub const ALL: Kinds = Kinds(0b111);

    pub fn contains(self, other: Kinds) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Kinds) -> Kinds {
        Kinds(self.0 | other.0)
    }

    pub fn intersect(self, other: Kinds) -> Kinds {
        Kinds(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// One concrete kind, produced by selection over a `Kinds` mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Int,
    Float,
    Str,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Int => write!(f, "int"),
            Kind::Float => write!(f, "float"),
            Kind::Str => write!(f, "string"),
        }
    }
}

/// A value with a kind mask and one payload slot per kind.
///
/// Payload slots outside the mask hold their zero value and take part in
/// arithmetic exactly like real zeros, matching the latch semantics of the
/// register file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Value {
    pub kinds: Kinds,
    pub int: i32,
    pub float: f32,
    pub text: String,
}

impl Value {
    pub fn int(v: i32) -> Self {
        Value {
            kinds: Kinds::INT,
            int: v,
            ..Value::default()
        }
    }

    pub fn float(v: f32) -> Self {
        Value {
            kinds: Kinds::FLOAT,
            float: v,
            ..Value::default()
        }
    }

    pub fn text(v: impl Into<String>) -> Self {
        Value {
            kinds: Kinds::STRING,
            text: v.into(),
            ..Value::default()
        }
    }

    /// Materialize an input-channel signal: the raw text is parsed as int
    /// and float (each falling back to 0) and kept verbatim as a string.
    pub fn signal(raw: &str) -> Self {
        Value {
            kinds: Kinds::ALL,
            int: raw.trim().parse::<i32>().unwrap_or(0),
            float: raw.trim().parse::<f32>().unwrap_or(0.0),
            text: raw.to_string(),
        }
    }

    /// Materialize a memory cell: int when the text parses as one, string
    /// always.
    pub fn memory(raw: &str) -> Self {
        match raw.trim().parse::<i32>() {
            Ok(v) => Value {
                kinds: Kinds::INT.union(Kinds::STRING),
                int: v,
                float: 0.0,
                text: raw.to_string(),
            },
            Err(_) => Value {
                kinds: Kinds::STRING,
                text: raw.to_string(),
                ..Value::default()
            },
        }
    }

    /// Pick the most meaningful kind: Int > Float > String.
    pub fn selected(&self) -> Option<Kind> {
        if self.kinds.contains(Kinds::INT) {
            Some(Kind::Int)
        } else if self.kinds.contains(Kinds::FLOAT) {
            Some(Kind::Float)
        } else if self.kinds.contains(Kinds::STRING) {
            Some(Kind::Str)
        } else {
            None
        }
    }

    /// Render the payload of one kind as wire text.
    pub fn stringify_as(&self, kind: Kind) -> String {
        match kind {
            Kind::Int => self.int.to_string(),
            Kind::Float => self.float.to_string(),
            Kind::Str => self.text.clone(),
        }
    }

    /// Render under the selected kind; an empty mask renders as "".
    pub fn stringify(&self) -> String {
        match self.selected() {
            Some(kind) => self.stringify_as(kind),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_prefers_int_then_float_then_string() {
        let all = Value::signal("3");
        assert_eq!(all.selected(), Some(Kind::Int));

        let mut fs = Value::float(1.5);
        fs.kinds = Kinds::FLOAT.union(Kinds::STRING);
        assert_eq!(fs.selected(), Some(Kind::Float));

        assert_eq!(Value::text("x").selected(), Some(Kind::Str));
        assert_eq!(Value::default().selected(), None);
    }

    #[test]
    fn signal_parses_every_interpretation() {
        let v = Value::signal("42");
        assert_eq!(v.kinds, Kinds::ALL);
        assert_eq!(v.int, 42);
        assert_eq!(v.float, 42.0);
        assert_eq!(v.text, "42");

        let v = Value::signal("hello");
        assert_eq!(v.int, 0);
        assert_eq!(v.float, 0.0);
        assert_eq!(v.text, "hello");
    }

    #[test]
    fn memory_text_is_int_only_when_parseable() {
        let v = Value::memory("17");
        assert!(v.kinds.contains(Kinds::INT));
        assert!(v.kinds.contains(Kinds::STRING));
        assert!(!v.kinds.contains(Kinds::FLOAT));
        assert_eq!(v.int, 17);

        let v = Value::memory("3.5");
        assert_eq!(v.kinds, Kinds::STRING);
        assert_eq!(v.text, "3.5");
    }

    #[test]
    fn stringify_follows_selection() {
        assert_eq!(Value::signal("9").stringify(), "9");
        assert_eq!(Value::float(2.5).stringify(), "2.5");
        assert_eq!(Value::text("hi").stringify(), "hi");
    }
}
