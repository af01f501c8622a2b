use crate::Mode;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// One of the sixteen 64-bit general purpose registers. Every narrower register name is a view
/// onto one of these.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Gpr {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Gpr {
    pub const ALL: [Gpr; 16] = [
        Gpr::Rax,
        Gpr::Rbx,
        Gpr::Rcx,
        Gpr::Rdx,
        Gpr::Rsi,
        Gpr::Rdi,
        Gpr::Rbp,
        Gpr::Rsp,
        Gpr::R8,
        Gpr::R9,
        Gpr::R10,
        Gpr::R11,
        Gpr::R12,
        Gpr::R13,
        Gpr::R14,
        Gpr::R15,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// r8 through r15 only exist in 64-bit mode
    pub fn is_extended(self) -> bool {
        self.index() >= Gpr::R8.index()
    }

    fn legacy_stem(self) -> Option<&'static str> {
        match self {
            Gpr::Rax => Some("ax"),
            Gpr::Rbx => Some("bx"),
            Gpr::Rcx => Some("cx"),
            Gpr::Rdx => Some("dx"),
            Gpr::Rsi => Some("si"),
            Gpr::Rdi => Some("di"),
            Gpr::Rbp => Some("bp"),
            Gpr::Rsp => Some("sp"),
            _ => None,
        }
    }

    /// The full-width view of this register in the given mode.
    pub fn widest(self, mode: Mode) -> Register {
        match mode {
            Mode::Bits64 => Register::new(self, RegSlice::Qword),
            Mode::Bits32 => Register::new(self, RegSlice::Dword),
        }
    }
}

impl Display for Gpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Register::new(*self, RegSlice::Qword))
    }
}

/// Which bits of the parent [`Gpr`] a register name refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegSlice {
    Low8,
    High8,
    Word,
    Dword,
    Qword,
}

impl RegSlice {
    pub fn width(self) -> u32 {
        match self {
            RegSlice::Low8 | RegSlice::High8 => 8,
            RegSlice::Word => 16,
            RegSlice::Dword => 32,
            RegSlice::Qword => 64,
        }
    }

    /// Index of the least significant bit of this slice within the parent register
    pub fn low_bit(self) -> u32 {
        match self {
            RegSlice::High8 => 8,
            _ => 0,
        }
    }

    /// Inclusive bit range `(high, low)` within the parent register
    pub fn bit_range(self) -> (u32, u32) {
        let low = self.low_bit();
        (low + self.width() - 1, low)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Register {
    pub gpr: Gpr,
    pub slice: RegSlice,
}

impl Register {
    pub const fn new(gpr: Gpr, slice: RegSlice) -> Self {
        Self { gpr, slice }
    }

    pub fn width(&self) -> u32 {
        self.slice.width()
    }

    /// The 64-bit register this name is a view of. Liveness is always tracked at this
    /// granularity: a partial write leaves the remaining bits defined by whatever wrote them
    /// before.
    pub fn full(&self) -> Gpr {
        self.gpr
    }

    pub fn is_available(&self, mode: Mode) -> bool {
        match mode {
            Mode::Bits64 => true,
            Mode::Bits32 => !self.gpr.is_extended() && self.slice != RegSlice::Qword,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if let Some(reg) = Self::parse_extended(&name) {
            return Some(reg);
        }
        Gpr::ALL.iter().copied().find_map(|gpr| {
            let stem = gpr.legacy_stem()?;
            let slice = match name.as_str() {
                n if n.len() == 3 && n.starts_with('r') && &n[1..] == stem => RegSlice::Qword,
                n if n.len() == 3 && n.starts_with('e') && &n[1..] == stem => RegSlice::Dword,
                n if n == stem => RegSlice::Word,
                n => Self::parse_byte(stem, n)?,
            };
            Some(Register::new(gpr, slice))
        })
    }

    fn parse_byte(stem: &str, name: &str) -> Option<RegSlice> {
        let x_register = stem.ends_with('x');
        let prefix = &stem[..1];
        match name {
            // al, bl, cl, dl / ah, bh, ch, dh
            n if x_register && n == format!("{prefix}l") => Some(RegSlice::Low8),
            n if x_register && n == format!("{prefix}h") => Some(RegSlice::High8),
            // sil, dil, bpl, spl
            n if !x_register && n == format!("{stem}l") => Some(RegSlice::Low8),
            _ => None,
        }
    }

    fn parse_extended(name: &str) -> Option<Self> {
        let rest = name.strip_prefix('r')?;
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let number: usize = rest[..digits_end].parse().ok()?;
        if !(8..=15).contains(&number) {
            return None;
        }
        let slice = match &rest[digits_end..] {
            "" => RegSlice::Qword,
            "d" => RegSlice::Dword,
            "w" => RegSlice::Word,
            "b" | "l" => RegSlice::Low8,
            _ => return None,
        };
        Some(Register::new(Gpr::ALL[number], slice))
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Register::parse(s).ok_or(())
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.gpr.legacy_stem() {
            Some(stem) => match self.slice {
                RegSlice::Qword => write!(f, "r{stem}"),
                RegSlice::Dword => write!(f, "e{stem}"),
                RegSlice::Word => write!(f, "{stem}"),
                RegSlice::Low8 if stem.ends_with('x') => write!(f, "{}l", &stem[..1]),
                RegSlice::Low8 => write!(f, "{stem}l"),
                RegSlice::High8 => write!(f, "{}h", &stem[..1]),
            },
            None => {
                let n = self.gpr.index();
                match self.slice {
                    RegSlice::Qword => write!(f, "r{n}"),
                    RegSlice::Dword => write!(f, "r{n}d"),
                    RegSlice::Word => write!(f, "r{n}w"),
                    RegSlice::Low8 | RegSlice::High8 => write!(f, "r{n}b"),
                }
            }
        }
    }
}

/// A set of [`Gpr`]s stored as a bitmask.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GprSet(u16);

impl GprSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(u16::MAX)
    }

    pub fn insert(&mut self, gpr: Gpr) {
        self.0 |= 1 << gpr.index();
    }

    pub fn contains(&self, gpr: Gpr) -> bool {
        self.0 & (1 << gpr.index()) != 0
    }

    pub fn union_with(&mut self, other: &Self) {
        self.0 |= other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Gpr> + '_ {
        Gpr::ALL.into_iter().filter(|g| self.contains(*g))
    }
}

impl FromIterator<Gpr> for GprSet {
    fn from_iter<T: IntoIterator<Item = Gpr>>(iter: T) -> Self {
        let mut set = GprSet::empty();
        for gpr in iter {
            set.insert(gpr);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_names() {
        assert_eq!(
            Register::parse("EAX"),
            Some(Register::new(Gpr::Rax, RegSlice::Dword))
        );
        assert_eq!(
            Register::parse("rsp"),
            Some(Register::new(Gpr::Rsp, RegSlice::Qword))
        );
        assert_eq!(
            Register::parse("ah"),
            Some(Register::new(Gpr::Rax, RegSlice::High8))
        );
        assert_eq!(
            Register::parse("cl"),
            Some(Register::new(Gpr::Rcx, RegSlice::Low8))
        );
        assert_eq!(
            Register::parse("sil"),
            Some(Register::new(Gpr::Rsi, RegSlice::Low8))
        );
        assert_eq!(
            Register::parse("bp"),
            Some(Register::new(Gpr::Rbp, RegSlice::Word))
        );
        assert_eq!(Register::parse("sih"), None);
        assert_eq!(Register::parse("eip"), None);
    }

    #[test]
    fn parses_extended_names() {
        assert_eq!(
            Register::parse("r8"),
            Some(Register::new(Gpr::R8, RegSlice::Qword))
        );
        assert_eq!(
            Register::parse("r15d"),
            Some(Register::new(Gpr::R15, RegSlice::Dword))
        );
        assert_eq!(
            Register::parse("r10b"),
            Some(Register::new(Gpr::R10, RegSlice::Low8))
        );
        assert_eq!(Register::parse("r16"), None);
        assert_eq!(Register::parse("r7"), None);
    }

    #[test]
    fn display_round_trips_names() {
        for name in ["rax", "eax", "ax", "al", "ah", "spl", "r9", "r9d", "r9w", "r9b"] {
            assert_eq!(Register::parse(name).unwrap().to_string(), name);
        }
    }

    #[test]
    fn availability_depends_on_mode() {
        let rax = Register::parse("rax").unwrap();
        let eax = Register::parse("eax").unwrap();
        let r8d = Register::parse("r8d").unwrap();
        assert!(rax.is_available(Mode::Bits64));
        assert!(!rax.is_available(Mode::Bits32));
        assert!(eax.is_available(Mode::Bits32));
        assert!(!r8d.is_available(Mode::Bits32));
    }

    #[test]
    fn gpr_set_tracks_membership() {
        let set: GprSet = [Gpr::Rax, Gpr::R12].into_iter().collect();
        assert!(set.contains(Gpr::Rax));
        assert!(set.contains(Gpr::R12));
        assert!(!set.contains(Gpr::Rbx));
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Gpr::Rax, Gpr::R12]);
    }
}
