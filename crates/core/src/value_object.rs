//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. To
/// "modify" one, build a new value. A publication window is the canonical
/// example in this workspace: two windows with the same bounds are the same
/// window, whichever product they are attached to.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
