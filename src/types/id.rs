//! Identifier types for kernel entities.

use core::fmt;

/// A unique identifier for a strand.
///
/// Ids are assigned by the kernel at strand creation, strictly increasing,
/// and never reused for the lifetime of the kernel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StrandId(u64);

impl StrandId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for StrandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrandId({})", self.0)
    }
}

impl fmt::Display for StrandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_ordering() {
        let a = StrandId::new(1);
        let b = StrandId::new(2);
        assert!(a < b);
        assert_eq!(a.to_string(), "S1");
        assert_eq!(format!("{b:?}"), "StrandId(2)");
    }
}
