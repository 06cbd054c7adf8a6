//! Single-pass assembler.
//!
//! Translates source lines into typed [`Opcode`]s: classify each line,
//! lex the arguments, validate their apparent kinds against the opcode
//! table, then resolve label references to instruction indices. The first
//! failing line aborts the compile and is reported with its 0-based index.

use std::collections::HashMap;
use std::str::FromStr;

use crate::opcodes::{self, mask, Arg, Literal, MemAddr, Opcode, OpcodeEntry, Program};
use crate::state::Reg;

/// An assembly failure: the offending line index plus a diagnostic.
#[derive(thiserror::Error, Debug, PartialEq)]
#[error("line {line}: {kind}")]
pub struct AsmError {
    pub line: u32,
    pub kind: AsmErrorKind,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AsmErrorKind {
    #[error("Unknown instruction: {0}")]
    UnknownMnemonic(String),
    #[error("Invalid label name: {0}")]
    BadLabel(String),
    #[error("Label cannot reuse a register name: {0}")]
    LabelIsRegister(String),
    #[error("Label with same name already defined: {0}")]
    DuplicateLabel(String),
    #[error("Malformed literal: {0}")]
    MalformedLiteral(String),
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Memory reference must wrap an integer literal or an ir register")]
    BadMemRef,
    #[error("Output channels cannot be used inside a memory reference")]
    OutChannelInMemRef,
    #[error("{mnemonic} expects {expected} operand(s), found {found}")]
    WrongOperandCount {
        mnemonic: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Operand {index} of {mnemonic} has an incompatible kind")]
    OperandKind {
        mnemonic: &'static str,
        index: usize,
    },
    #[error("Only one memory read is allowed per instruction")]
    TwoMemoryReads,
    #[error("The third operand cannot be a memory reference")]
    MemRefArg3,
    #[error("Unresolved label: {0}")]
    UnresolvedLabel(String),
}

fn err(line: usize, kind: AsmErrorKind) -> AsmError {
    AsmError {
        line: line as u32,
        kind,
    }
}

/// Compile source lines into a program, or report the first failure.
pub fn compile(lines: &[&str]) -> Result<Program, AsmError> {
    let mut opcodes: Vec<Opcode> = Vec::new();
    let mut labels: HashMap<String, u32> = HashMap::new();

    for (index, raw) in lines.iter().enumerate() {
        let mut tokens = tokenize(raw).map_err(|kind| err(index, kind))?;

        // Leading `ident:` tokens define labels for the next instruction.
        while let Some(first) = tokens.first() {
            let Token::Word(word) = first else { break };
            let Some(name) = word.strip_suffix(':') else { break };
            let name = name.to_string();
            define_label(&name, opcodes.len() as u32, &mut labels)
                .map_err(|kind| err(index, kind))?;
            tokens.remove(0);
        }

        if tokens.is_empty() {
            continue;
        }

        let opcode = parse_instruction(index, tokens)?;
        opcodes.push(opcode);
    }

    resolve_labels(&mut opcodes, &labels)?;

    Ok(Program { opcodes, labels })
}

fn define_label(
    name: &str,
    target: u32,
    labels: &mut HashMap<String, u32>,
) -> Result<(), AsmErrorKind> {
    if !is_valid_label(name) {
        return Err(AsmErrorKind::BadLabel(name.to_string()));
    }
    if Reg::is_register_name(name) {
        return Err(AsmErrorKind::LabelIsRegister(name.to_string()));
    }
    if labels.contains_key(name) {
        return Err(AsmErrorKind::DuplicateLabel(name.to_string()));
    }
    labels.insert(name.to_string(), target);
    Ok(())
}

fn is_valid_label(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse_instruction(line: usize, tokens: Vec<Token>) -> Result<Opcode, AsmError> {
    let mut tokens = tokens.into_iter();
    let mnemonic = match tokens.next() {
        Some(Token::Word(word)) => word,
        Some(other) => {
            return Err(err(line, AsmErrorKind::MalformedLiteral(other.describe())))
        }
        None => unreachable!("caller skips blank lines"),
    };

    let entry = opcodes::lookup(&mnemonic)
        .ok_or_else(|| err(line, AsmErrorKind::UnknownMnemonic(mnemonic.clone())))?;

    let rest: Vec<Token> = tokens.collect();
    let expected = entry.operands.len();
    let found = rest.len();
    if found != expected {
        return Err(err(
            line,
            AsmErrorKind::WrongOperandCount {
                mnemonic: entry.mnemonic,
                expected,
                found,
            },
        ));
    }

    let mut args: [Arg; 3] = [Arg::None, Arg::None, Arg::None];
    for (i, token) in rest.into_iter().enumerate() {
        args[i] = parse_argument(token).map_err(|kind| err(line, kind))?;
    }

    validate_operands(line, entry, &args)?;

    Ok(Opcode {
        line: line as u32,
        op: entry.op,
        args,
    })
}

fn parse_argument(token: Token) -> Result<Arg, AsmErrorKind> {
    match token {
        Token::Str(text) => Ok(Arg::Lit(Literal::Str(text))),
        Token::MemRef(inner) => parse_mem_ref(&inner),
        Token::Word(word) => parse_word_argument(&word),
    }
}

fn parse_mem_ref(inner: &str) -> Result<Arg, AsmErrorKind> {
    let inner = inner.trim();
    if let Ok(reg) = Reg::from_str(inner) {
        return match reg {
            Reg::Ir(n) => Ok(Arg::Mem(MemAddr::Ir(n))),
            Reg::Ou(_) => Err(AsmErrorKind::OutChannelInMemRef),
            _ => Err(AsmErrorKind::BadMemRef),
        };
    }
    match parse_int(inner) {
        Some(v) => Ok(Arg::Mem(MemAddr::Abs(v as u32))),
        None => Err(AsmErrorKind::BadMemRef),
    }
}

fn parse_word_argument(word: &str) -> Result<Arg, AsmErrorKind> {
    if let Ok(reg) = Reg::from_str(word) {
        return Ok(Arg::Reg(reg));
    }

    let starts_numeric = word
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '.');
    if starts_numeric {
        if let Some(v) = parse_int(word) {
            return Ok(Arg::Lit(Literal::Int(v)));
        }
        if let Some(v) = parse_float(word) {
            return Ok(Arg::Lit(Literal::Float(v)));
        }
        return Err(AsmErrorKind::MalformedLiteral(word.to_string()));
    }

    if is_valid_label(word) {
        return Ok(Arg::Lit(Literal::Label(word.to_string())));
    }
    Err(AsmErrorKind::MalformedLiteral(word.to_string()))
}

fn parse_int(text: &str) -> Option<i64> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        body.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

fn parse_float(text: &str) -> Option<f32> {
    let body = text.strip_prefix('-').unwrap_or(text);
    let (head, tail) = body.split_once('.')?;
    if !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<f32>().ok()
}

/// Compare each argument's apparent kind against the declared mask, and
/// enforce the memory-reference placement rules.
fn validate_operands(line: usize, entry: &OpcodeEntry, args: &[Arg; 3]) -> Result<(), AsmError> {
    if matches!(args[2], Arg::Mem(_)) {
        return Err(err(line, AsmErrorKind::MemRefArg3));
    }

    for (i, spec) in entry.operands.iter().enumerate() {
        let apparent = match &args[i] {
            Arg::None => continue,
            Arg::Reg(Reg::Ir(_)) => mask::IR,
            Arg::Reg(Reg::Fr(_)) => mask::FR,
            Arg::Reg(Reg::Sr(_)) => mask::SR,
            Arg::Reg(Reg::In(_)) => mask::IN,
            Arg::Reg(Reg::Ou(_)) => mask::OU,
            Arg::Lit(Literal::Int(_)) | Arg::Lit(Literal::Label(_)) => mask::LIT_I,
            Arg::Lit(Literal::Float(_)) => mask::LIT_F,
            Arg::Lit(Literal::Str(_)) => mask::LIT_S,
            // A memory cell materializes as int or string.
            Arg::Mem(_) => mask::MEM_I | mask::MEM_S,
        };
        if spec & apparent == 0 {
            return Err(err(
                line,
                AsmErrorKind::OperandKind {
                    mnemonic: entry.mnemonic,
                    index: i + 1,
                },
            ));
        }
    }

    let arg1_readable = entry.operands.first().is_some_and(|s| s & mask::READ != 0);
    if matches!(args[0], Arg::Mem(_)) && matches!(args[1], Arg::Mem(_)) && arg1_readable {
        return Err(err(line, AsmErrorKind::TwoMemoryReads));
    }

    Ok(())
}

fn resolve_labels(opcodes: &mut [Opcode], labels: &HashMap<String, u32>) -> Result<(), AsmError> {
    for opcode in opcodes.iter_mut() {
        for arg in opcode.args.iter_mut() {
            let Arg::Lit(Literal::Label(name)) = arg else {
                continue;
            };
            match labels.get(name.as_str()) {
                Some(target) => *arg = Arg::Lit(Literal::Int(*target as i64)),
                None => {
                    return Err(err(
                        opcode.line as usize,
                        AsmErrorKind::UnresolvedLabel(name.clone()),
                    ))
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Bare word: mnemonic, register, number or label reference.
    Word(String),
    /// Double-quoted string with escapes already processed.
    Str(String),
    /// The inside of a `[...]` wrapper.
    MemRef(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => w.clone(),
            Token::Str(s) => format!("{s:?}"),
            Token::MemRef(m) => format!("[{m}]"),
        }
    }
}

/// Split one line into tokens, honoring quotes and brackets. A `;` outside
/// a string starts a comment; `,` separates like whitespace.
fn tokenize(line: &str) -> Result<Vec<Token>, AsmErrorKind> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ';' => break,
            c if c.is_whitespace() || c == ',' => {
                chars.next();
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('"') => text.push('"'),
                            Some('\\') => text.push('\\'),
                            Some(other) => {
                                return Err(AsmErrorKind::MalformedLiteral(format!(
                                    "\\{other}"
                                )))
                            }
                            None => return Err(AsmErrorKind::UnterminatedString),
                        },
                        Some(other) => text.push(other),
                        None => return Err(AsmErrorKind::UnterminatedString),
                    }
                }
                tokens.push(Token::Str(text));
            }
            '[' => {
                chars.next();
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(other) => inner.push(other),
                        None => return Err(AsmErrorKind::BadMemRef),
                    }
                }
                tokens.push(Token::MemRef(inner));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == ',' || c == ';' || c == '"' || c == '[' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::Op;

    fn compile_lines(lines: &[&str]) -> Result<Program, AsmError> {
        compile(lines)
    }

    #[test]
    fn assembles_a_minimal_program() {
        let program = compile_lines(&["mov ou0 \"hi\""]).unwrap();
        assert_eq!(program.len(), 1);
        assert_eq!(program.opcodes[0].op, Op::Mov);
        assert_eq!(program.opcodes[0].args[0], Arg::Reg(Reg::Ou(0)));
        assert_eq!(
            program.opcodes[0].args[1],
            Arg::Lit(Literal::Str("hi".into()))
        );
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let program = compile_lines(&["", "   ; only a comment", "nop ; trailing"]).unwrap();
        assert_eq!(program.len(), 1);
        assert_eq!(program.opcodes[0].line, 2);
    }

    #[test]
    fn labels_resolve_to_instruction_indices() {
        let program = compile_lines(&[
            "mov ir0 0",
            "loop: inc ir0",
            "jmp loop",
        ])
        .unwrap();
        assert_eq!(program.labels.get("loop"), Some(&1));
        assert_eq!(program.opcodes[2].args[0], Arg::Lit(Literal::Int(1)));
    }

    #[test]
    fn label_prefix_shares_a_line_with_an_instruction() {
        let program = compile_lines(&["done: mov ou0 \"yes\""]).unwrap();
        assert_eq!(program.labels.get("done"), Some(&0));
        assert_eq!(program.len(), 1);
    }

    #[test]
    fn duplicate_label_reports_the_second_line() {
        let error = compile_lines(&["x:", "x:"]).unwrap_err();
        assert_eq!(error.line, 1);
        assert_eq!(
            error.kind.to_string(),
            "Label with same name already defined: x"
        );
    }

    #[test]
    fn label_may_not_shadow_a_register() {
        let error = compile_lines(&["ir0:"]).unwrap_err();
        assert_eq!(error.kind, AsmErrorKind::LabelIsRegister("ir0".into()));
    }

    #[test]
    fn label_may_not_start_with_digit_or_dash() {
        assert_eq!(
            compile_lines(&["1st:"]).unwrap_err().kind,
            AsmErrorKind::BadLabel("1st".into())
        );
        assert_eq!(
            compile_lines(&["-x:"]).unwrap_err().kind,
            AsmErrorKind::BadLabel("-x".into())
        );
    }

    #[test]
    fn unknown_mnemonic_is_rejected() {
        let error = compile_lines(&["frob ir0"]).unwrap_err();
        assert_eq!(error.line, 0);
        assert_eq!(error.kind, AsmErrorKind::UnknownMnemonic("frob".into()));
    }

    #[test]
    fn operand_count_is_enforced() {
        assert!(matches!(
            compile_lines(&["mov ir0"]).unwrap_err().kind,
            AsmErrorKind::WrongOperandCount { expected: 2, found: 1, .. }
        ));
        assert!(matches!(
            compile_lines(&["nop ir0"]).unwrap_err().kind,
            AsmErrorKind::WrongOperandCount { expected: 0, found: 1, .. }
        ));
    }

    #[test]
    fn operand_kinds_are_checked_against_the_table() {
        // `and` is integer-only.
        assert!(matches!(
            compile_lines(&["and fr0 1"]).unwrap_err().kind,
            AsmErrorKind::OperandKind { index: 1, .. }
        ));
        // Output latches cannot be read.
        assert!(matches!(
            compile_lines(&["mov ir0 ou0"]).unwrap_err().kind,
            AsmErrorKind::OperandKind { index: 2, .. }
        ));
    }

    #[test]
    fn memory_reference_rules() {
        // Inner value must be an int literal or an ir register.
        assert_eq!(
            compile_lines(&["mov [fr0] 1"]).unwrap_err().kind,
            AsmErrorKind::BadMemRef
        );
        assert_eq!(
            compile_lines(&["mov [ou0] 1"]).unwrap_err().kind,
            AsmErrorKind::OutChannelInMemRef
        );
        // arg3 may never be a reference.
        assert_eq!(
            compile_lines(&["find ir0 sr0 [0]"]).unwrap_err().kind,
            AsmErrorKind::MemRefArg3
        );
        // Two references are rejected when the first is readable.
        assert_eq!(
            compile_lines(&["add [0] [1]"]).unwrap_err().kind,
            AsmErrorKind::TwoMemoryReads
        );
        // ...but fine when the first is write-only.
        assert!(compile_lines(&["mov [0] [1]"]).is_ok());
    }

    #[test]
    fn literal_grammar() {
        let program = compile_lines(&[
            "mov ir0 -5",
            "mov ir1 0x7FFFFFFF",
            "mov fr0 3.25",
            "mov fr1 .5",
            "mov sr0 \"a\\\"b\\\\c\"",
        ])
        .unwrap();
        assert_eq!(program.opcodes[0].args[1], Arg::Lit(Literal::Int(-5)));
        assert_eq!(
            program.opcodes[1].args[1],
            Arg::Lit(Literal::Int(0x7FFF_FFFF))
        );
        assert_eq!(program.opcodes[2].args[1], Arg::Lit(Literal::Float(3.25)));
        assert_eq!(program.opcodes[3].args[1], Arg::Lit(Literal::Float(0.5)));
        assert_eq!(
            program.opcodes[4].args[1],
            Arg::Lit(Literal::Str("a\"b\\c".into()))
        );
    }

    #[test]
    fn malformed_literals_are_rejected() {
        assert_eq!(
            compile_lines(&["mov ir0 5abc"]).unwrap_err().kind,
            AsmErrorKind::MalformedLiteral("5abc".into())
        );
        assert_eq!(
            compile_lines(&["mov sr0 \"oops"]).unwrap_err().kind,
            AsmErrorKind::UnterminatedString
        );
    }

    #[test]
    fn unresolved_label_names_its_line() {
        let error = compile_lines(&["nop", "jmp nowhere"]).unwrap_err();
        assert_eq!(error.line, 1);
        assert_eq!(error.kind, AsmErrorKind::UnresolvedLabel("nowhere".into()));
    }

    #[test]
    fn first_error_wins() {
        let error = compile_lines(&["frob", "also bad"]).unwrap_err();
        assert_eq!(error.line, 0);
    }
}
