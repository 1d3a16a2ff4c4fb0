//! Header flag bits stored in the shared record

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Flag word of the shared frame record.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct HeaderFlags(pub u32);

impl HeaderFlags {
    /// Set while a writer owns the record and has published at least one frame.
    pub const FEEDER_ATTACHED: u32 = 1 << 0;

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Check if a specific flag is set using a bitmask.
    pub fn has_flag(&self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }

    pub fn feeder_attached(&self) -> bool {
        self.has_flag(Self::FEEDER_ATTACHED)
    }

    pub fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u32) {
        self.0 &= !flag;
    }

    /// Get the raw u32 value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn set_and_clear_only_touch_their_bit(value in any::<u32>(), bit in 0..32u32) {
            let flag = 1u32 << bit;
            let mut flags = HeaderFlags::new(value);
            flags.set(flag);
            prop_assert!(flags.has_flag(flag));
            prop_assert_eq!(flags.value() & !flag, value & !flag);
            flags.clear(flag);
            prop_assert!(!flags.has_flag(flag));
            prop_assert_eq!(flags.value() & !flag, value & !flag);
        }
    }

    #[test]
    fn feeder_attached_is_bit_zero() {
        assert!(HeaderFlags::new(1).feeder_attached());
        assert!(!HeaderFlags::new(0b10).feeder_attached());
    }
}
