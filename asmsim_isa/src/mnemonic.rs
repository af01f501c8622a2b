use crate::flags::{Flag, FlagSet};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A condition code as used by `jcc`, `setcc` and `cmovcc`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    O,
    NO,
    B,
    AE,
    E,
    NE,
    BE,
    A,
    S,
    NS,
    P,
    NP,
    L,
    GE,
    LE,
    G,
}

impl Condition {
    /// Parses the condition suffix of a mnemonic, accepting all the usual aliases
    /// (`z`/`e`, `c`/`b`/`nae`, ...)
    pub fn parse(suffix: &str) -> Option<Self> {
        let cond = match suffix {
            "o" => Condition::O,
            "no" => Condition::NO,
            "b" | "c" | "nae" => Condition::B,
            "ae" | "nb" | "nc" => Condition::AE,
            "e" | "z" => Condition::E,
            "ne" | "nz" => Condition::NE,
            "be" | "na" => Condition::BE,
            "a" | "nbe" => Condition::A,
            "s" => Condition::S,
            "ns" => Condition::NS,
            "p" | "pe" => Condition::P,
            "np" | "po" => Condition::NP,
            "l" | "nge" => Condition::L,
            "ge" | "nl" => Condition::GE,
            "le" | "ng" => Condition::LE,
            "g" | "nle" => Condition::G,
            _ => return None,
        };
        Some(cond)
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Condition::O => "o",
            Condition::NO => "no",
            Condition::B => "b",
            Condition::AE => "ae",
            Condition::E => "e",
            Condition::NE => "ne",
            Condition::BE => "be",
            Condition::A => "a",
            Condition::S => "s",
            Condition::NS => "ns",
            Condition::P => "p",
            Condition::NP => "np",
            Condition::L => "l",
            Condition::GE => "ge",
            Condition::LE => "le",
            Condition::G => "g",
        }
    }

    /// The flags this condition inspects
    pub fn flags_read(&self) -> FlagSet {
        match self {
            Condition::O | Condition::NO => FlagSet::of(&[Flag::OF]),
            Condition::B | Condition::AE => FlagSet::of(&[Flag::CF]),
            Condition::E | Condition::NE => FlagSet::of(&[Flag::ZF]),
            Condition::BE | Condition::A => FlagSet::of(&[Flag::CF, Flag::ZF]),
            Condition::S | Condition::NS => FlagSet::of(&[Flag::SF]),
            Condition::P | Condition::NP => FlagSet::of(&[Flag::PF]),
            Condition::L | Condition::GE => FlagSet::of(&[Flag::SF, Flag::OF]),
            Condition::LE | Condition::G => FlagSet::of(&[Flag::ZF, Flag::SF, Flag::OF]),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mnemonic {
    /// Not an instruction: blank line, label, comment, or something unrecognized
    #[default]
    None,
    Mov,
    Movzx,
    Movsx,
    Lea,
    Xchg,
    Add,
    Adc,
    Sub,
    Sbb,
    Cmp,
    And,
    Or,
    Xor,
    Test,
    Inc,
    Dec,
    Neg,
    Not,
    Shl,
    Shr,
    Sar,
    Push,
    Pop,
    Jmp,
    Jcc(Condition),
    Setcc(Condition),
    Cmovcc(Condition),
    Clc,
    Stc,
    Cmc,
    Nop,
    Rdrand,
    // recognized, but not modeled
    Mul,
    Imul,
    Div,
    Idiv,
    Rol,
    Ror,
    Rcl,
    Rcr,
    Bt,
    Bts,
    Btr,
    Bsf,
    Bsr,
    Call,
    Ret,
    Leave,
    Cdq,
    Cqo,
    Cwde,
    Cpuid,
    Rdtsc,
    Int,
    Syscall,
    Hlt,
    Movsb,
    Movsd,
    Stosb,
    Lodsb,
}

impl Mnemonic {
    pub fn parse(text: &str) -> Mnemonic {
        let text = text.trim().to_ascii_lowercase();
        match text.as_str() {
            "mov" => Mnemonic::Mov,
            "movzx" => Mnemonic::Movzx,
            "movsx" => Mnemonic::Movsx,
            "lea" => Mnemonic::Lea,
            "xchg" => Mnemonic::Xchg,
            "add" => Mnemonic::Add,
            "adc" => Mnemonic::Adc,
            "sub" => Mnemonic::Sub,
            "sbb" => Mnemonic::Sbb,
            "cmp" => Mnemonic::Cmp,
            "and" => Mnemonic::And,
            "or" => Mnemonic::Or,
            "xor" => Mnemonic::Xor,
            "test" => Mnemonic::Test,
            "inc" => Mnemonic::Inc,
            "dec" => Mnemonic::Dec,
            "neg" => Mnemonic::Neg,
            "not" => Mnemonic::Not,
            "shl" | "sal" => Mnemonic::Shl,
            "shr" => Mnemonic::Shr,
            "sar" => Mnemonic::Sar,
            "push" => Mnemonic::Push,
            "pop" => Mnemonic::Pop,
            "jmp" => Mnemonic::Jmp,
            "clc" => Mnemonic::Clc,
            "stc" => Mnemonic::Stc,
            "cmc" => Mnemonic::Cmc,
            "nop" => Mnemonic::Nop,
            "rdrand" => Mnemonic::Rdrand,
            "mul" => Mnemonic::Mul,
            "imul" => Mnemonic::Imul,
            "div" => Mnemonic::Div,
            "idiv" => Mnemonic::Idiv,
            "rol" => Mnemonic::Rol,
            "ror" => Mnemonic::Ror,
            "rcl" => Mnemonic::Rcl,
            "rcr" => Mnemonic::Rcr,
            "bt" => Mnemonic::Bt,
            "bts" => Mnemonic::Bts,
            "btr" => Mnemonic::Btr,
            "bsf" => Mnemonic::Bsf,
            "bsr" => Mnemonic::Bsr,
            "call" => Mnemonic::Call,
            "ret" => Mnemonic::Ret,
            "leave" => Mnemonic::Leave,
            "cdq" => Mnemonic::Cdq,
            "cqo" => Mnemonic::Cqo,
            "cwde" => Mnemonic::Cwde,
            "cpuid" => Mnemonic::Cpuid,
            "rdtsc" => Mnemonic::Rdtsc,
            "int" => Mnemonic::Int,
            "syscall" => Mnemonic::Syscall,
            "hlt" => Mnemonic::Hlt,
            "movsb" => Mnemonic::Movsb,
            "movsd" => Mnemonic::Movsd,
            "stosb" => Mnemonic::Stosb,
            "lodsb" => Mnemonic::Lodsb,
            other => Self::parse_conditional(other).unwrap_or(Mnemonic::None),
        }
    }

    fn parse_conditional(text: &str) -> Option<Mnemonic> {
        if let Some(suffix) = text.strip_prefix("cmov") {
            return Condition::parse(suffix).map(Mnemonic::Cmovcc);
        }
        if let Some(suffix) = text.strip_prefix("set") {
            return Condition::parse(suffix).map(Mnemonic::Setcc);
        }
        if let Some(suffix) = text.strip_prefix('j') {
            return Condition::parse(suffix).map(Mnemonic::Jcc);
        }
        None
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Mnemonic::None)
    }

    /// Whether the simulator has semantics for this mnemonic
    pub fn is_modeled(&self) -> bool {
        matches!(
            self,
            Mnemonic::Mov
                | Mnemonic::Movzx
                | Mnemonic::Movsx
                | Mnemonic::Lea
                | Mnemonic::Xchg
                | Mnemonic::Add
                | Mnemonic::Adc
                | Mnemonic::Sub
                | Mnemonic::Sbb
                | Mnemonic::Cmp
                | Mnemonic::And
                | Mnemonic::Or
                | Mnemonic::Xor
                | Mnemonic::Test
                | Mnemonic::Inc
                | Mnemonic::Dec
                | Mnemonic::Neg
                | Mnemonic::Not
                | Mnemonic::Shl
                | Mnemonic::Shr
                | Mnemonic::Sar
                | Mnemonic::Push
                | Mnemonic::Pop
                | Mnemonic::Jmp
                | Mnemonic::Jcc(_)
                | Mnemonic::Setcc(_)
                | Mnemonic::Cmovcc(_)
                | Mnemonic::Clc
                | Mnemonic::Stc
                | Mnemonic::Cmc
                | Mnemonic::Nop
                | Mnemonic::Rdrand
        )
    }

    /// Control never falls through to the next line
    pub fn ends_flow(&self) -> bool {
        matches!(self, Mnemonic::Jmp | Mnemonic::Ret | Mnemonic::Hlt)
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Mnemonic::Jmp | Mnemonic::Jcc(_))
    }
}

impl Display for Mnemonic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Mnemonic::None => write!(f, "NONE"),
            Mnemonic::Jcc(c) => write!(f, "J{}", c.suffix().to_ascii_uppercase()),
            Mnemonic::Setcc(c) => write!(f, "SET{}", c.suffix().to_ascii_uppercase()),
            Mnemonic::Cmovcc(c) => write!(f, "CMOV{}", c.suffix().to_ascii_uppercase()),
            other => write!(f, "{}", format!("{other:?}").to_ascii_uppercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_mnemonics() {
        assert_eq!(Mnemonic::parse("MOV"), Mnemonic::Mov);
        assert_eq!(Mnemonic::parse("sal"), Mnemonic::Shl);
        assert_eq!(Mnemonic::parse("imul"), Mnemonic::Imul);
        assert_eq!(Mnemonic::parse("frobnicate"), Mnemonic::None);
    }

    #[test]
    fn parses_conditional_families() {
        assert_eq!(Mnemonic::parse("jz"), Mnemonic::Jcc(Condition::E));
        assert_eq!(Mnemonic::parse("jnae"), Mnemonic::Jcc(Condition::B));
        assert_eq!(Mnemonic::parse("setg"), Mnemonic::Setcc(Condition::G));
        assert_eq!(Mnemonic::parse("cmovnc"), Mnemonic::Cmovcc(Condition::AE));
        assert_eq!(Mnemonic::parse("jq"), Mnemonic::None);
        assert_eq!(Mnemonic::parse("jmp"), Mnemonic::Jmp);
    }

    #[test]
    fn modeled_and_display() {
        assert!(Mnemonic::Add.is_modeled());
        assert!(!Mnemonic::Mul.is_modeled());
        assert!(Mnemonic::Ret.ends_flow());
        assert_eq!(Mnemonic::Jcc(Condition::NE).to_string(), "JNE");
        assert_eq!(Mnemonic::Movzx.to_string(), "MOVZX");
    }
}
