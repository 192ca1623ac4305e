//! Permission bits carried by every contract frame.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// Set of call permissions.
///
/// A syscall requires a set of flags; it may run only if that set is a subset of the flags
/// granted to the current frame.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct CallFlags(u8);

impl CallFlags {
    pub const NONE: CallFlags = CallFlags(0);
    pub const READ_STATES: CallFlags = CallFlags(0b0000_0001);
    pub const WRITE_STATES: CallFlags = CallFlags(0b0000_0010);
    pub const ALLOW_CALL: CallFlags = CallFlags(0b0000_0100);
    pub const ALLOW_NOTIFY: CallFlags = CallFlags(0b0000_1000);
    pub const STATES: CallFlags = CallFlags(0b0000_0011);
    pub const READ_ONLY: CallFlags = CallFlags(0b0000_0101);
    pub const ALL: CallFlags = CallFlags(0b0000_1111);

    /// Returns `None` when `bits` has anything outside [`CallFlags::ALL`].
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL.0 != 0 {
            return None;
        }
        Some(CallFlags(bits))
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: CallFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitAnd for CallFlags {
    type Output = CallFlags;

    fn bitand(self, rhs: CallFlags) -> CallFlags {
        CallFlags(self.0 & rhs.0)
    }
}

impl BitOr for CallFlags {
    type Output = CallFlags;

    fn bitor(self, rhs: CallFlags) -> CallFlags {
        CallFlags(self.0 | rhs.0)
    }
}

impl Not for CallFlags {
    type Output = CallFlags;

    fn not(self) -> CallFlags {
        CallFlags(!self.0 & Self::ALL.0)
    }
}

impl fmt::Display for CallFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_flags() {
        assert_eq!(CallFlags::READ_STATES | CallFlags::WRITE_STATES, CallFlags::STATES);
        assert_eq!(CallFlags::READ_STATES | CallFlags::ALLOW_CALL, CallFlags::READ_ONLY);
        assert!(CallFlags::ALL.contains(CallFlags::READ_ONLY));
        assert!(!CallFlags::READ_ONLY.contains(CallFlags::WRITE_STATES));
        assert!(CallFlags::NONE.contains(CallFlags::NONE));
    }

    #[test]
    fn from_bits_rejects_unknown_bits() {
        assert_eq!(CallFlags::from_bits(0x0F), Some(CallFlags::ALL));
        assert_eq!(CallFlags::from_bits(0x10), None);
    }

    #[test]
    fn not_stays_within_all() {
        let safe = CallFlags::ALL & !(CallFlags::WRITE_STATES | CallFlags::ALLOW_NOTIFY);
        assert_eq!(safe, CallFlags::READ_ONLY);
    }
}
