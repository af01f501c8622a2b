use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

pub trait JoinSemiLattice: Eq + PartialOrd {
    fn join(&mut self, other: &Self);
}

impl<T: JoinSemiLattice> JoinSemiLattice for Vec<T> {
    /// Pointwise join; both sides are expected to have the same length
    fn join(&mut self, other: &Self) {
        for (a, b) in self.iter_mut().zip(other.iter()) {
            a.join(b);
        }
    }
}

/// What is known about a single bit of a register or flag.
///
/// The values form a join semi-lattice used to merge the results of several paths:
///
/// ```text
///          Undefined
///              |
///           Unknown
///           /     \
///        Zero     One
///           \     /
///        Inconsistent
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitValue {
    Zero,
    One,
    /// No defining write reaches this bit within the lookback window
    Undefined,
    /// The bit is defined, but its value depends on something outside the window
    Unknown,
    /// The paths leading here contradict each other
    Inconsistent,
}

impl BitValue {
    pub fn from_bool(b: bool) -> Self {
        if b { BitValue::One } else { BitValue::Zero }
    }

    /// The concrete value of this bit, if it has one. [`BitValue::Inconsistent`] is never
    /// treated as concrete.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BitValue::Zero => Some(false),
            BitValue::One => Some(true),
            _ => None,
        }
    }

    pub fn is_concrete(&self) -> bool {
        self.as_bool().is_some()
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, BitValue::Undefined)
    }

    pub fn as_char(&self) -> char {
        match self {
            BitValue::Zero => '0',
            BitValue::One => '1',
            BitValue::Undefined => 'U',
            BitValue::Unknown => '?',
            BitValue::Inconsistent => 'X',
        }
    }

    fn rank(&self) -> u8 {
        match self {
            BitValue::Inconsistent => 0,
            BitValue::Zero | BitValue::One => 1,
            BitValue::Unknown => 2,
            BitValue::Undefined => 3,
        }
    }
}

impl Display for BitValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl PartialOrd for BitValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        match self.rank().cmp(&other.rank()) {
            // zero and one are incomparable
            Ordering::Equal => None,
            ord => Some(ord),
        }
    }
}

impl JoinSemiLattice for BitValue {
    fn join(&mut self, other: &Self) {
        match self.partial_cmp(&other) {
            Some(Ordering::Less) => *self = *other,
            Some(_) => {}
            None => *self = BitValue::Unknown,
        }
    }
}

/// Joins a whole sequence of bits, returning `None` for an empty sequence
pub fn join_all<'a, I: IntoIterator<Item = &'a BitValue>>(bits: I) -> Option<BitValue> {
    bits.into_iter().copied().reduce(|mut acc, b| {
        acc.join(&b);
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(a: BitValue, b: BitValue) -> BitValue {
        let mut a = a;
        a.join(&b);
        a
    }

    #[test]
    fn join_follows_the_lattice() {
        use BitValue::*;
        assert_eq!(joined(Zero, Zero), Zero);
        assert_eq!(joined(Zero, One), Unknown);
        assert_eq!(joined(Inconsistent, One), One);
        assert_eq!(joined(Unknown, Zero), Unknown);
        assert_eq!(joined(Unknown, Undefined), Undefined);
        assert_eq!(joined(Inconsistent, Inconsistent), Inconsistent);
    }

    #[test]
    fn join_is_commutative() {
        use BitValue::*;
        let all = [Zero, One, Undefined, Unknown, Inconsistent];
        for a in all {
            for b in all {
                assert_eq!(joined(a, b), joined(b, a), "{a} join {b}");
            }
        }
    }

    #[test]
    fn inconsistent_is_not_concrete() {
        assert_eq!(BitValue::Inconsistent.as_bool(), None);
        assert_eq!(BitValue::One.as_bool(), Some(true));
        assert!(!BitValue::Unknown.is_concrete());
        assert_eq!(BitValue::Undefined.to_string(), "U");
    }

    #[test]
    fn joins_vectors_pointwise() {
        let mut a = vec![BitValue::Zero, BitValue::One];
        a.join(&vec![BitValue::Zero, BitValue::Zero]);
        assert_eq!(a, vec![BitValue::Zero, BitValue::Unknown]);
        assert_eq!(join_all(&a), Some(BitValue::Unknown));
        assert_eq!(join_all(&[]), None);
    }
}
