//! The `Slot` and `Epoch` types are defined as new types over u64 to enforce type-safety between
//! the two types.
//!
//! `Slot` and `Epoch` have implementations which permit conversion, comparison and math operations
//! between each and `u64`, however specifically not between each other.
//!
//! All math operations on `Slot` and `Epoch` are saturating, they never wrap.
//!
//! It would be easy to define `PartialOrd` and other traits generically across all types which
//! implement `Into<u64>`, however this would allow operations between `Slots` and `Epochs` which
//! may lead to programming errors which are not detected by the compiler.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(u64);

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(u64);

impl_common!(Slot);
impl_common!(Epoch);

impl Slot {
    pub const fn new(slot: u64) -> Slot {
        Slot(slot)
    }

    pub fn epoch(self, slots_per_epoch: u64) -> Epoch {
        Epoch::new(
            self.0
                .checked_div(slots_per_epoch)
                .expect("slots_per_epoch is not 0"),
        )
    }

    pub fn max_value() -> Slot {
        Slot(u64::MAX)
    }
}

impl Epoch {
    pub const fn new(epoch: u64) -> Epoch {
        Epoch(epoch)
    }

    pub fn max_value() -> Epoch {
        Epoch(u64::MAX)
    }

    /// The first slot in the epoch.
    pub fn start_slot(self, slots_per_epoch: u64) -> Slot {
        Slot::from(self.0.saturating_mul(slots_per_epoch))
    }

    /// The last slot in the epoch.
    pub fn end_slot(self, slots_per_epoch: u64) -> Slot {
        Slot::from(
            self.0
                .saturating_mul(slots_per_epoch)
                .saturating_add(slots_per_epoch.saturating_sub(1)),
        )
    }
}

#[cfg(test)]
mod slot_epoch_tests {
    use super::*;

    #[test]
    fn slot_to_epoch() {
        assert_eq!(Slot::new(0).epoch(32), Epoch::new(0));
        assert_eq!(Slot::new(31).epoch(32), Epoch::new(0));
        assert_eq!(Slot::new(32).epoch(32), Epoch::new(1));
        assert_eq!(Slot::new(127).epoch(32), Epoch::new(3));
    }

    #[test]
    fn epoch_start_and_end_slots() {
        assert_eq!(Epoch::new(0).start_slot(32), Slot::new(0));
        assert_eq!(Epoch::new(0).end_slot(32), Slot::new(31));
        assert_eq!(Epoch::new(3).start_slot(32), Slot::new(96));
        assert_eq!(Epoch::new(3).end_slot(32), Slot::new(127));
    }

    #[test]
    fn saturating_math() {
        assert_eq!(Slot::new(1) - 5u64, Slot::new(0));
        assert_eq!(Slot::max_value() + 1u64, Slot::max_value());
        assert_eq!(Epoch::new(7) - Epoch::new(9), Epoch::new(0));
    }

    #[test]
    fn u64_comparisons() {
        assert!(Slot::new(3) > 2);
        assert!(Slot::new(3) == 3);
        assert!(Epoch::new(3) < 4);
    }
}
