use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The arithmetic status flags modeled by the simulator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Flag {
    CF,
    PF,
    AF,
    ZF,
    SF,
    OF,
}

impl Flag {
    pub const ALL: [Flag; 6] = [Flag::CF, Flag::PF, Flag::AF, Flag::ZF, Flag::SF, Flag::OF];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Flag::CF => "CF",
            Flag::PF => "PF",
            Flag::AF => "AF",
            Flag::ZF => "ZF",
            Flag::SF => "SF",
            Flag::OF => "OF",
        }
    }
}

impl Display for Flag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of [`Flag`]s stored as a bitmask.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagSet(u8);

impl FlagSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b11_1111)
    }

    /// CF, PF, AF, ZF, SF and OF: everything an add or sub writes
    pub const fn arithmetic() -> Self {
        Self::all()
    }

    pub fn of(flags: &[Flag]) -> Self {
        flags.iter().copied().collect()
    }

    pub fn insert(&mut self, flag: Flag) {
        self.0 |= 1 << flag.index();
    }

    pub fn remove(&mut self, flag: Flag) {
        self.0 &= !(1 << flag.index());
    }

    pub fn contains(&self, flag: Flag) -> bool {
        self.0 & (1 << flag.index()) != 0
    }

    pub fn union_with(&mut self, other: &Self) {
        self.0 |= other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Flag> + '_ {
        Flag::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl FromIterator<Flag> for FlagSet {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        let mut set = FlagSet::empty();
        for flag in iter {
            set.insert(flag);
        }
        set
    }
}

impl Display for FlagSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.iter().map(Flag::name).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_set_membership() {
        let mut set = FlagSet::of(&[Flag::CF, Flag::ZF]);
        assert!(set.contains(Flag::CF));
        assert!(!set.contains(Flag::OF));
        set.remove(Flag::CF);
        assert!(!set.contains(Flag::CF));
        assert_eq!(set.to_string(), "{ZF}");
        assert_eq!(FlagSet::all().iter().count(), 6);
    }
}
