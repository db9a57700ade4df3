//! Field shapes and the visitor through which objects expose their state.
//!
//! A single [`StateVisitor`] walk over an object serves every purpose the
//! engine has for it: collecting the layout, serializing, deserializing,
//! discovering references and dumping values for counterexamples. Objects
//! therefore describe their fields exactly once, in [`crate::Stateful::visit`].

use crate::graph::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens when an integer field leaves its declared range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverflowBehavior {
    /// Serialization fails with a range violation.
    #[default]
    Error,
    /// The value is clamped to the nearest bound.
    Clamp,
    /// The value jumps to the opposite bound.
    WrapClamp,
}

/// Inclusive integer range of a field, which determines its encoded width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRange {
    pub min: i64,
    pub max: i64,
    pub overflow: OverflowBehavior,
}

impl IntRange {
    pub const fn new(min: i64, max: i64) -> Self {
        Self {
            min,
            max,
            overflow: OverflowBehavior::Error,
        }
    }

    pub const fn clamped(min: i64, max: i64) -> Self {
        Self {
            min,
            max,
            overflow: OverflowBehavior::Clamp,
        }
    }

    pub const fn wrapping(min: i64, max: i64) -> Self {
        Self {
            min,
            max,
            overflow: OverflowBehavior::WrapClamp,
        }
    }

    /// Number of distinct values, or `None` for an empty range.
    pub fn cardinality(&self) -> Option<u128> {
        if self.max < self.min {
            None
        } else {
            Some((self.max as i128 - self.min as i128) as u128 + 1)
        }
    }

    /// Apply the overflow behaviour. `None` means the value is a violation.
    pub fn normalize(&self, value: i64) -> Option<i64> {
        if (self.min..=self.max).contains(&value) {
            return Some(value);
        }
        match self.overflow {
            OverflowBehavior::Error => None,
            OverflowBehavior::Clamp => Some(value.clamp(self.min, self.max)),
            OverflowBehavior::WrapClamp => Some(if value < self.min {
                self.max
            } else {
                self.min
            }),
        }
    }
}

impl fmt::Display for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}

/// Serialization flags of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FieldFlags(u8);

impl FieldFlags {
    pub const NONE: FieldFlags = FieldFlags(0);
    /// Excluded from optimized state vectors, kept in full dumps.
    pub const HIDDEN: FieldFlags = FieldFlags(1);
    /// Set at construction and never changed; treated like `HIDDEN`.
    pub const READ_ONLY: FieldFlags = FieldFlags(2);
    /// Never serialized; references through it are not followed.
    pub const UNSERIALIZABLE: FieldFlags = FieldFlags(4);

    #[inline]
    pub const fn contains(self, other: FieldFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: FieldFlags) -> FieldFlags {
        FieldFlags(self.0 | other.0)
    }

    /// Whether a field with these flags is part of a vector in `mode`.
    #[inline]
    pub fn is_serialized(self, mode: SerializationMode) -> bool {
        if self.contains(Self::UNSERIALIZABLE) {
            return false;
        }
        match mode {
            SerializationMode::Full => true,
            SerializationMode::Optimized => {
                !self.contains(Self::HIDDEN) && !self.contains(Self::READ_ONLY)
            }
        }
    }
}

impl std::ops::BitOr for FieldFlags {
    type Output = FieldFlags;

    fn bitor(self, rhs: FieldFlags) -> FieldFlags {
        self.union(rhs)
    }
}

/// Which fields a state vector contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerializationMode {
    /// Mutable, visible fields only. Used during exploration.
    #[default]
    Optimized,
    /// Every field including hidden and read-only ones. Used for counterexamples.
    Full,
}

/// Value domain of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int(IntRange),
    Variant { count: u32 },
    Ref,
}

/// Number of bits needed to distinguish `count` values.
#[inline]
pub fn bits_for(count: u128) -> u32 {
    if count <= 1 {
        0
    } else {
        128 - (count - 1).leading_zeros()
    }
}

impl FieldKind {
    /// Width in slots (bits) of one element. References need the object count
    /// of the table because 0 encodes `None`.
    pub fn slot_count(&self, object_count: usize) -> u32 {
        match self {
            FieldKind::Bool => 1,
            FieldKind::Int(range) => range.cardinality().map(bits_for).unwrap_or(0),
            FieldKind::Variant { count } => bits_for(*count as u128),
            FieldKind::Ref => bits_for(object_count as u128 + 1),
        }
    }

    fn same_domain(&self, other: &FieldKind) -> bool {
        match (self, other) {
            (FieldKind::Int(a), FieldKind::Int(b)) => a.min == b.min && a.max == b.max,
            (a, b) => a == b,
        }
    }
}

/// Declared shape of one field: scalar when `len == 1`, fixed array otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldShape {
    pub name: &'static str,
    pub kind: FieldKind,
    pub len: usize,
    pub flags: FieldFlags,
}

impl FieldShape {
    /// Total slots of the field for a table with `object_count` objects.
    pub fn slot_count(&self, object_count: usize) -> usize {
        self.kind.slot_count(object_count) as usize * self.len
    }

    /// Whether a visited field matches this declared shape.
    pub fn matches(&self, name: &'static str, kind: &FieldKind, len: usize) -> bool {
        self.name == name && self.len == len && self.kind.same_domain(kind)
    }
}

/// Receives the fields of one object, in declaration order.
///
/// Values are passed by mutable reference so that the same walk can read
/// (serialization) or overwrite (deserialization) them.
pub trait StateVisitor {
    fn visit_bool(&mut self, name: &'static str, value: &mut bool, flags: FieldFlags);

    fn visit_int(&mut self, name: &'static str, value: &mut i64, range: IntRange, flags: FieldFlags);

    fn visit_variant(&mut self, name: &'static str, value: &mut u32, count: u32, flags: FieldFlags);

    fn visit_ref(&mut self, name: &'static str, value: &mut Option<ObjectId>, flags: FieldFlags);

    fn visit_bool_array(&mut self, name: &'static str, values: &mut [bool], flags: FieldFlags);

    fn visit_int_array(
        &mut self,
        name: &'static str,
        values: &mut [i64],
        range: IntRange,
        flags: FieldFlags,
    );

    fn visit_variant_array(
        &mut self,
        name: &'static str,
        values: &mut [u32],
        count: u32,
        flags: FieldFlags,
    );

    fn visit_ref_array(
        &mut self,
        name: &'static str,
        values: &mut [Option<ObjectId>],
        flags: FieldFlags,
    );
}

/// An enum stored as a variant index.
pub trait Variant: Copy {
    const COUNT: u32;

    fn index(self) -> u32;

    /// Only called with indices below `COUNT`.
    fn from_index(index: u32) -> Self;
}

impl dyn StateVisitor + '_ {
    /// Visit an enum field through its variant index.
    pub fn variant<V: Variant>(&mut self, name: &'static str, value: &mut V, flags: FieldFlags) {
        let mut index = value.index();
        self.visit_variant(name, &mut index, V::COUNT, flags);
        if index < V::COUNT {
            *value = V::from_index(index);
        }
    }

    /// Visit a fixed-length array of enums through their variant indices.
    pub fn variants<V: Variant>(&mut self, name: &'static str, values: &mut [V], flags: FieldFlags) {
        let mut indices: Vec<u32> = values.iter().map(|v| v.index()).collect();
        self.visit_variant_array(name, &mut indices, V::COUNT, flags);
        for (value, index) in values.iter_mut().zip(indices) {
            if index < V::COUNT {
                *value = V::from_index(index);
            }
        }
    }

    /// Visit a plain mutable integer field.
    pub fn int(&mut self, name: &'static str, value: &mut i64, range: IntRange) {
        self.visit_int(name, value, range, FieldFlags::NONE);
    }

    /// Visit a plain mutable boolean field.
    pub fn bool(&mut self, name: &'static str, value: &mut bool) {
        self.visit_bool(name, value, FieldFlags::NONE);
    }
}

/// Collects the shapes of an object's fields.
#[derive(Debug, Default)]
pub struct ShapeCollector {
    pub(crate) fields: Vec<FieldShape>,
    pub(crate) references: Vec<(&'static str, ObjectId, FieldFlags)>,
}

impl ShapeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[FieldShape] {
        &self.fields
    }

    fn push(&mut self, name: &'static str, kind: FieldKind, len: usize, flags: FieldFlags) {
        self.fields.push(FieldShape {
            name,
            kind,
            len,
            flags,
        });
    }
}

impl StateVisitor for ShapeCollector {
    fn visit_bool(&mut self, name: &'static str, _value: &mut bool, flags: FieldFlags) {
        self.push(name, FieldKind::Bool, 1, flags);
    }

    fn visit_int(&mut self, name: &'static str, _value: &mut i64, range: IntRange, flags: FieldFlags) {
        self.push(name, FieldKind::Int(range), 1, flags);
    }

    fn visit_variant(&mut self, name: &'static str, _value: &mut u32, count: u32, flags: FieldFlags) {
        self.push(name, FieldKind::Variant { count }, 1, flags);
    }

    fn visit_ref(&mut self, name: &'static str, value: &mut Option<ObjectId>, flags: FieldFlags) {
        self.push(name, FieldKind::Ref, 1, flags);
        if let Some(target) = *value {
            self.references.push((name, target, flags));
        }
    }

    fn visit_bool_array(&mut self, name: &'static str, values: &mut [bool], flags: FieldFlags) {
        self.push(name, FieldKind::Bool, values.len(), flags);
    }

    fn visit_int_array(
        &mut self,
        name: &'static str,
        values: &mut [i64],
        range: IntRange,
        flags: FieldFlags,
    ) {
        self.push(name, FieldKind::Int(range), values.len(), flags);
    }

    fn visit_variant_array(
        &mut self,
        name: &'static str,
        values: &mut [u32],
        count: u32,
        flags: FieldFlags,
    ) {
        self.push(name, FieldKind::Variant { count }, values.len(), flags);
    }

    fn visit_ref_array(
        &mut self,
        name: &'static str,
        values: &mut [Option<ObjectId>],
        flags: FieldFlags,
    ) {
        self.push(name, FieldKind::Ref, values.len(), flags);
        for target in values.iter().flatten() {
            self.references.push((name, *target, flags));
        }
    }
}
