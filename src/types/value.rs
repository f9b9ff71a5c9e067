//! The dynamic payload delivered into and out of strand computations.

use crate::io::Readiness;
use crate::kernel::StrandHandle;
use core::fmt;
use std::any::Any;
use std::rc::Rc;

/// A value moved between the kernel and a strand's computation.
///
/// Scheduling primitives resume the waiting strand with a `Value`: `Unit` for
/// a satisfied sleep, `Readiness` for a satisfied IO wait, `Strand` for a
/// spawn, and whatever the joined strand completed with for a join.
/// Computations complete with a `Value` of their own choosing; `Payload`
/// carries arbitrary caller data.
#[derive(Clone, Default)]
pub enum Value {
    /// No meaningful payload (sleeps complete with this).
    #[default]
    Unit,
    /// Readiness reported for a watched resource.
    Readiness(Readiness),
    /// A handle to a freshly spawned strand.
    Strand(StrandHandle),
    /// Arbitrary caller-supplied data.
    Payload(Rc<dyn Any>),
}

impl Value {
    /// Wraps arbitrary data as a payload value.
    #[must_use]
    pub fn payload<T: 'static>(value: T) -> Self {
        Self::Payload(Rc::new(value))
    }

    /// Returns true for the unit value.
    #[must_use]
    pub fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }

    /// Returns the readiness flags, if this is a readiness value.
    #[must_use]
    pub fn as_readiness(&self) -> Option<Readiness> {
        match self {
            Self::Readiness(ready) => Some(*ready),
            _ => None,
        }
    }

    /// Returns the strand handle, if this is a spawn result.
    #[must_use]
    pub fn as_strand(&self) -> Option<&StrandHandle> {
        match self {
            Self::Strand(handle) => Some(handle),
            _ => None,
        }
    }

    /// Downcasts a payload value to a concrete type.
    #[must_use]
    pub fn downcast<T: 'static>(&self) -> Option<Rc<T>> {
        match self {
            Self::Payload(payload) => Rc::clone(payload).downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("Unit"),
            Self::Readiness(ready) => f.debug_tuple("Readiness").field(ready).finish(),
            Self::Strand(handle) => f.debug_tuple("Strand").field(&handle.id()).finish(),
            Self::Payload(_) => f.write_str("Payload(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_downcast() {
        let value = Value::payload(42_u32);
        assert_eq!(value.downcast::<u32>().as_deref(), Some(&42));
        assert!(value.downcast::<String>().is_none());
        assert!(!value.is_unit());
    }

    #[test]
    fn default_is_unit() {
        assert!(Value::default().is_unit());
        assert!(Value::Unit.as_readiness().is_none());
    }
}
