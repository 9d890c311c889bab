//! Interpreter slot kinds and machine value locations.

use crate::ir::operators::ValueType;

// =============================================================================
// Slot kinds
// =============================================================================

/// The kind an interpreter slot holds.
///
/// `Long` and `Double` occupy two slots; the second slot of such a pair is
/// never rendered on its own (see the frame builder's two-slot rule).
/// `Illegal` marks a slot whose value is dead at the recorded bci.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Int,
    Long,
    Float,
    Double,
    Object,
    Illegal,
}

impl SlotKind {
    /// Payload width in bits. `Illegal` carries nothing.
    #[inline]
    pub const fn bit_count(self) -> u32 {
        match self {
            SlotKind::Int | SlotKind::Float => 32,
            SlotKind::Long | SlotKind::Double | SlotKind::Object => 64,
            SlotKind::Illegal => 0,
        }
    }

    /// Whether values of this kind span two interpreter slots.
    #[inline]
    pub const fn needs_two_slots(self) -> bool {
        matches!(self, SlotKind::Long | SlotKind::Double)
    }
}

impl From<ValueType> for SlotKind {
    fn from(ty: ValueType) -> SlotKind {
        match ty {
            ValueType::Int32 => SlotKind::Int,
            ValueType::Int64 => SlotKind::Long,
            ValueType::Float32 => SlotKind::Float,
            ValueType::Float64 => SlotKind::Double,
            ValueType::Object => SlotKind::Object,
            ValueType::Control | ValueType::Guard | ValueType::State | ValueType::Void => {
                SlotKind::Illegal
            }
        }
    }
}

// =============================================================================
// Machine locations
// =============================================================================

/// Where the register allocator placed a live value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueLocation {
    /// A physical register, by allocator index.
    Register(u8),
    /// A compiled-frame stack slot, as a byte offset from the frame base.
    Stack(i32),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_type() {
        assert_eq!(SlotKind::from(ValueType::Int32), SlotKind::Int);
        assert_eq!(SlotKind::from(ValueType::Int64), SlotKind::Long);
        assert_eq!(SlotKind::from(ValueType::Float32), SlotKind::Float);
        assert_eq!(SlotKind::from(ValueType::Float64), SlotKind::Double);
        assert_eq!(SlotKind::from(ValueType::Object), SlotKind::Object);
        assert_eq!(SlotKind::from(ValueType::State), SlotKind::Illegal);
    }

    #[test]
    fn test_two_slot_kinds() {
        assert!(SlotKind::Long.needs_two_slots());
        assert!(SlotKind::Double.needs_two_slots());
        assert!(!SlotKind::Int.needs_two_slots());
        assert!(!SlotKind::Object.needs_two_slots());
        assert_eq!(SlotKind::Illegal.bit_count(), 0);
        assert_eq!(SlotKind::Double.bit_count(), 64);
    }
}
