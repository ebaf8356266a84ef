use core::{cmp::Ordering, fmt};

use crate::ids::RoutineId;

// CLOCK RELATION
// ================================================================================================

/// Relation between two vector clocks under the happens-before partial order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClockRelation {
    /// The left clock happens before the right clock.
    Before,
    /// The left clock happens after the right clock.
    After,
    /// Neither clock is ordered with respect to the other.
    Concurrent,
}

impl ClockRelation {
    /// Returns the relation with the operands swapped.
    pub fn inverse(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
            Self::Concurrent => Self::Concurrent,
        }
    }
}

impl fmt::Display for ClockRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => f.write_str("before"),
            Self::After => f.write_str("after"),
            Self::Concurrent => f.write_str("concurrent"),
        }
    }
}

// VECTOR CLOCK
// ================================================================================================

/// An integer vector clock over the routines of a trace.
///
/// Component `r` holds the index of the latest event of routine `r` known to happen before the
/// clock's owner. Components are 1-based to match [RoutineId]; component 0 is unused and always
/// zero.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct VectorClock {
    components: Vec<u64>,
}

impl VectorClock {
    // CONSTRUCTORS
    // --------------------------------------------------------------------------------------------

    /// Returns a zero clock for a trace with the specified number of routines.
    pub fn new(num_routines: usize) -> Self {
        Self { components: vec![0; num_routines + 1] }
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// Returns the number of routines this clock covers.
    pub fn num_routines(&self) -> usize {
        self.components.len().saturating_sub(1)
    }

    /// Returns the component for the specified routine.
    pub fn get(&self, routine: RoutineId) -> u64 {
        self.components.get(routine.as_usize()).copied().unwrap_or(0)
    }

    /// Returns the components of this clock, starting with the (always zero) component 0.
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    // STATE MUTATORS
    // --------------------------------------------------------------------------------------------

    /// Adds 1 to the component of the specified routine.
    pub fn inc(&mut self, routine: RoutineId) {
        let idx = routine.as_usize();
        debug_assert!(idx < self.components.len(), "routine {routine} out of clock range");
        self.components[idx] += 1;
    }

    /// Merges the other clock into this one, taking the pointwise maximum.
    pub fn merge(&mut self, other: &Self) {
        debug_assert_eq!(
            self.components.len(),
            other.components.len(),
            "clocks cover different routine counts"
        );
        for (own, other) in self.components.iter_mut().zip(other.components.iter()) {
            *own = (*own).max(*other);
        }
    }

    // CLOCK ALGEBRA
    // --------------------------------------------------------------------------------------------

    /// Returns a fresh clock holding the pointwise maximum of this clock and the other.
    pub fn sync(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    /// Compares two clocks under the happens-before order.
    ///
    /// Returns [ClockRelation::Before] iff `self <= other` pointwise and the clocks differ,
    /// [ClockRelation::After] for the symmetric case, and [ClockRelation::Concurrent] otherwise.
    /// Two equal clocks are reported as concurrent.
    pub fn relation(&self, other: &Self) -> ClockRelation {
        let mut any_less = false;
        let mut any_greater = false;
        for (own, other) in self.components.iter().zip(other.components.iter()) {
            match own.cmp(other) {
                Ordering::Less => any_less = true,
                Ordering::Greater => any_greater = true,
                Ordering::Equal => (),
            }
        }
        match (any_less, any_greater) {
            (true, false) => ClockRelation::Before,
            (false, true) => ClockRelation::After,
            _ => ClockRelation::Concurrent,
        }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, value) in self.components.iter().enumerate().skip(1) {
            if i > 1 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("]")
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn clock(components: &[u64]) -> VectorClock {
        let mut vc = VectorClock::new(components.len());
        for (i, &value) in components.iter().enumerate() {
            vc.components[i + 1] = value;
        }
        vc
    }

    #[test]
    fn inc_bumps_single_component() {
        let mut vc = VectorClock::new(3);
        vc.inc(RoutineId::new(2));
        vc.inc(RoutineId::new(2));
        vc.inc(RoutineId::new(3));
        assert_eq!(vc, clock(&[0, 2, 1]));
    }

    #[test]
    fn sync_is_pointwise_max() {
        let a = clock(&[1, 4, 0]);
        let b = clock(&[2, 1, 3]);
        assert_eq!(a.sync(&b), clock(&[2, 4, 3]));
    }

    #[test]
    fn relation_basic_cases() {
        let lo = clock(&[1, 2, 3]);
        let hi = clock(&[2, 2, 3]);
        let side = clock(&[0, 5, 3]);
        assert_eq!(lo.relation(&hi), ClockRelation::Before);
        assert_eq!(hi.relation(&lo), ClockRelation::After);
        assert_eq!(lo.relation(&side), ClockRelation::Concurrent);
        // equal clocks are not ordered
        assert_eq!(lo.relation(&lo.clone()), ClockRelation::Concurrent);
    }

    proptest! {
        #[test]
        fn sync_commutes(a in proptest::collection::vec(0u64..64, 4), b in proptest::collection::vec(0u64..64, 4)) {
            let a = clock(&a);
            let b = clock(&b);
            prop_assert_eq!(a.sync(&b), b.sync(&a));
        }

        #[test]
        fn sync_upper_bounds_both(a in proptest::collection::vec(0u64..64, 4), b in proptest::collection::vec(0u64..64, 4)) {
            let a = clock(&a);
            let b = clock(&b);
            let s = a.sync(&b);
            prop_assert!(a.relation(&s) != ClockRelation::After);
            prop_assert!(b.relation(&s) != ClockRelation::After);
        }

        #[test]
        fn relation_antisymmetric(a in proptest::collection::vec(0u64..8, 3), b in proptest::collection::vec(0u64..8, 3)) {
            let a = clock(&a);
            let b = clock(&b);
            prop_assert_eq!(a.relation(&b), b.relation(&a).inverse());
        }
    }
}
