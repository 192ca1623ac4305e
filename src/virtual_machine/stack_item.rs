//! Stack item model.
//!
//! [`StackItem`] is a closed enum over every value kind the engine manipulates. Primitive
//! kinds carry their data inline and are copied by content. Buffers and compound kinds
//! (Array, Struct, Map) live in the arena owned by the
//! [`ReferenceCounter`](crate::virtual_machine::engine::reference_counter::ReferenceCounter)
//! and are addressed by [`ObjectId`], so two items holding the same id alias the same object.

use crate::types::bytes::Bytes;
use crate::virtual_machine::engine::limits::ExecutionEngineLimits;
use crate::virtual_machine::engine::reference_counter::ReferenceCounter;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::script::Script;
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{One, Zero};
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Largest integer, in two's-complement bytes.
pub const MAX_INTEGER_SIZE: usize = 32;
/// Largest map key, in bytes.
pub const MAX_KEY_SIZE: usize = 64;

/// Type tag of a stack item, as used by `ISTYPE`, `CONVERT` and `NEWARRAY_T`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum StackItemType {
    Any = 0x00,
    Pointer = 0x10,
    Boolean = 0x20,
    Integer = 0x21,
    ByteString = 0x28,
    Buffer = 0x30,
    Array = 0x40,
    Struct = 0x41,
    Map = 0x48,
    InteropInterface = 0x60,
}

impl StackItemType {
    pub fn name(&self) -> &'static str {
        match self {
            StackItemType::Any => "Any",
            StackItemType::Pointer => "Pointer",
            StackItemType::Boolean => "Boolean",
            StackItemType::Integer => "Integer",
            StackItemType::ByteString => "ByteString",
            StackItemType::Buffer => "Buffer",
            StackItemType::Array => "Array",
            StackItemType::Struct => "Struct",
            StackItemType::Map => "Map",
            StackItemType::InteropInterface => "InteropInterface",
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            StackItemType::Boolean | StackItemType::Integer | StackItemType::ByteString
        )
    }
}

impl TryFrom<u8> for StackItemType {
    type Error = VMError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => StackItemType::Any,
            0x10 => StackItemType::Pointer,
            0x20 => StackItemType::Boolean,
            0x21 => StackItemType::Integer,
            0x28 => StackItemType::ByteString,
            0x30 => StackItemType::Buffer,
            0x40 => StackItemType::Array,
            0x41 => StackItemType::Struct,
            0x48 => StackItemType::Map,
            0x60 => StackItemType::InteropInterface,
            other => return Err(VMError::InvalidStackItemType(other)),
        })
    }
}

/// Stable handle to an object in the reference counter's arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectId(pub(crate) usize);

/// A value on the evaluation stack, in a slot, or inside a compound object.
#[derive(Clone)]
pub enum StackItem {
    Null,
    Boolean(bool),
    /// Arbitrary precision integer, at most [`MAX_INTEGER_SIZE`] bytes wide.
    Integer(BigInt),
    /// Immutable byte string.
    ByteString(Bytes),
    /// Mutable byte buffer stored in the arena.
    Buffer(ObjectId),
    Array(ObjectId),
    /// Array with value-like equality and copy-on-assignment semantics.
    Struct(ObjectId),
    /// Insertion-ordered map with primitive keys.
    Map(ObjectId),
    /// Code position inside a specific script.
    Pointer { script: Rc<Script>, position: usize },
    /// Opaque host object, compared by identity.
    InteropInterface(Rc<dyn Any>),
}

/// Arena object backing a reference-typed stack item.
#[derive(Clone, Debug)]
pub enum HeapObject {
    Buffer(Vec<u8>),
    Array(Vec<StackItem>),
    Struct(Vec<StackItem>),
    Map(IndexMap<MapKey, StackItem>),
}

impl HeapObject {
    /// Items this object directly references, with their multiplicity (map keys count once each).
    pub fn sub_items(&self) -> Box<dyn Iterator<Item = &StackItem> + '_> {
        match self {
            HeapObject::Buffer(_) => Box::new(std::iter::empty()),
            HeapObject::Array(items) | HeapObject::Struct(items) => Box::new(items.iter()),
            HeapObject::Map(map) => Box::new(map.values()),
        }
    }

    /// Number of references this object contributes to the global count.
    pub fn sub_items_count(&self) -> usize {
        match self {
            HeapObject::Buffer(_) => 0,
            HeapObject::Array(items) | HeapObject::Struct(items) => items.len(),
            HeapObject::Map(map) => map.len() * 2,
        }
    }
}

/// Map key: a primitive stack item, hashable and bounded by [`MAX_KEY_SIZE`].
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum MapKey {
    Boolean(bool),
    Integer(BigInt),
    ByteString(Bytes),
}

impl MapKey {
    /// Converts a stack item into a map key.
    ///
    /// Returns [`VMError::InvalidCast`] for non-primitive items and
    /// [`VMError::ItemTooLarge`] for keys over [`MAX_KEY_SIZE`].
    pub fn from_item(item: &StackItem) -> Result<Self, VMError> {
        let key = match item {
            StackItem::Boolean(b) => MapKey::Boolean(*b),
            StackItem::Integer(i) => MapKey::Integer(i.clone()),
            StackItem::ByteString(b) => MapKey::ByteString(b.clone()),
            other => {
                return Err(VMError::InvalidCast {
                    from: other.type_name(),
                    to: "PrimitiveType",
                });
            }
        };
        let size = key.size();
        if size > MAX_KEY_SIZE {
            return Err(VMError::ItemTooLarge {
                size,
                max: MAX_KEY_SIZE,
            });
        }
        Ok(key)
    }

    pub fn to_item(&self) -> StackItem {
        match self {
            MapKey::Boolean(b) => StackItem::Boolean(*b),
            MapKey::Integer(i) => StackItem::Integer(i.clone()),
            MapKey::ByteString(b) => StackItem::ByteString(b.clone()),
        }
    }

    fn size(&self) -> usize {
        match self {
            MapKey::Boolean(_) => 1,
            MapKey::Integer(i) => integer_to_bytes(i).len(),
            MapKey::ByteString(b) => b.len(),
        }
    }
}

/// Encodes an integer as minimal little-endian two's complement. Zero encodes as no bytes.
pub fn integer_to_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        Vec::new()
    } else {
        value.to_signed_bytes_le()
    }
}

/// Decodes little-endian two's complement. No bytes decode as zero.
pub fn bytes_to_integer(bytes: &[u8]) -> BigInt {
    if bytes.is_empty() {
        BigInt::zero()
    } else {
        BigInt::from_signed_bytes_le(bytes)
    }
}

/// Fails with [`VMError::IntegerOverflow`] when `value` is wider than [`MAX_INTEGER_SIZE`].
pub fn check_integer(value: BigInt) -> Result<BigInt, VMError> {
    let size = integer_to_bytes(&value).len();
    if size > MAX_INTEGER_SIZE {
        return Err(VMError::IntegerOverflow { size });
    }
    Ok(value)
}

impl StackItem {
    pub fn item_type(&self) -> StackItemType {
        match self {
            StackItem::Null => StackItemType::Any,
            StackItem::Boolean(_) => StackItemType::Boolean,
            StackItem::Integer(_) => StackItemType::Integer,
            StackItem::ByteString(_) => StackItemType::ByteString,
            StackItem::Buffer(_) => StackItemType::Buffer,
            StackItem::Array(_) => StackItemType::Array,
            StackItem::Struct(_) => StackItemType::Struct,
            StackItem::Map(_) => StackItemType::Map,
            StackItem::Pointer { .. } => StackItemType::Pointer,
            StackItem::InteropInterface(_) => StackItemType::InteropInterface,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            StackItem::Null => "Null",
            other => other.item_type().name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StackItem::Null)
    }

    /// Arena id for items tracked by the reference counter.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            StackItem::Buffer(id)
            | StackItem::Array(id)
            | StackItem::Struct(id)
            | StackItem::Map(id) => Some(*id),
            _ => None,
        }
    }

    /// Id of an Array or Struct.
    pub fn array_id(&self) -> Option<ObjectId> {
        match self {
            StackItem::Array(id) | StackItem::Struct(id) => Some(*id),
            _ => None,
        }
    }

    pub fn from_int(value: impl Into<BigInt>) -> Self {
        StackItem::Integer(value.into())
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        StackItem::ByteString(bytes.into())
    }

    pub fn invalid_cast(&self, to: &'static str) -> VMError {
        VMError::InvalidCast {
            from: self.type_name(),
            to,
        }
    }

    /// Truthiness of the item.
    ///
    /// ByteStrings longer than [`MAX_INTEGER_SIZE`] cannot be converted.
    pub fn get_boolean(&self) -> Result<bool, VMError> {
        match self {
            StackItem::Null => Ok(false),
            StackItem::Boolean(b) => Ok(*b),
            StackItem::Integer(i) => Ok(!i.is_zero()),
            StackItem::ByteString(b) => {
                if b.len() > MAX_INTEGER_SIZE {
                    return Err(self.invalid_cast("Boolean"));
                }
                Ok(b.iter().any(|x| *x != 0))
            }
            _ => Ok(true),
        }
    }

    /// Integer value of a primitive item.
    ///
    /// Returns [`VMError::InvalidCast`] for Null, reference kinds and ByteStrings longer
    /// than [`MAX_INTEGER_SIZE`].
    pub fn get_integer(&self) -> Result<BigInt, VMError> {
        match self {
            StackItem::Boolean(b) => Ok(if *b { BigInt::one() } else { BigInt::zero() }),
            StackItem::Integer(i) => Ok(i.clone()),
            StackItem::ByteString(b) => {
                if b.len() > MAX_INTEGER_SIZE {
                    return Err(self.invalid_cast("Integer"));
                }
                Ok(bytes_to_integer(b))
            }
            _ => Err(self.invalid_cast("Integer")),
        }
    }

    /// Byte content of a primitive item or buffer.
    pub fn get_bytes(&self, heap: &ReferenceCounter) -> Result<Bytes, VMError> {
        match self {
            StackItem::Boolean(b) => Ok(Bytes::new(vec![*b as u8])),
            StackItem::Integer(i) => Ok(Bytes::new(integer_to_bytes(i))),
            StackItem::ByteString(b) => Ok(b.clone()),
            StackItem::Buffer(id) => Ok(Bytes::new(heap.buffer(*id)?.clone())),
            _ => Err(self.invalid_cast("ByteString")),
        }
    }

    /// Strict UTF-8 view of the item's bytes.
    pub fn get_string(&self, heap: &ReferenceCounter) -> Result<String, VMError> {
        let bytes = self.get_bytes(heap)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.invalid_cast("String"))
    }

    /// Size in bytes of a primitive item or buffer.
    pub fn size(&self, heap: &ReferenceCounter) -> Result<usize, VMError> {
        match self {
            StackItem::Boolean(_) => Ok(1),
            StackItem::Integer(i) => Ok(integer_to_bytes(i).len()),
            StackItem::ByteString(b) => Ok(b.len()),
            StackItem::Buffer(id) => Ok(heap.buffer(*id)?.len()),
            _ => Err(self.invalid_cast("PrimitiveType")),
        }
    }

    /// Equality as observed by `EQUAL`.
    ///
    /// Primitives compare by content, ByteStrings within `max_comparable_size`, Structs
    /// structurally within the stack size and comparable size limits, and every other
    /// reference kind by identity.
    pub fn equals(
        &self,
        other: &StackItem,
        heap: &ReferenceCounter,
        limits: &ExecutionEngineLimits,
    ) -> Result<bool, VMError> {
        let mut budget = limits.max_comparable_size;
        match (self, other) {
            (StackItem::ByteString(a), _) => byte_string_equals(a, other, &mut budget),
            (StackItem::Struct(_), _) => struct_equals(self, other, heap, limits),
            _ => Ok(self.shallow_equals(other)),
        }
    }

    /// Identity or content equality without any recursion.
    fn shallow_equals(&self, other: &StackItem) -> bool {
        match (self, other) {
            (StackItem::Null, StackItem::Null) => true,
            (StackItem::Boolean(a), StackItem::Boolean(b)) => a == b,
            (StackItem::Integer(a), StackItem::Integer(b)) => a == b,
            (StackItem::ByteString(a), StackItem::ByteString(b)) => a == b,
            (StackItem::Buffer(a), StackItem::Buffer(b))
            | (StackItem::Array(a), StackItem::Array(b))
            | (StackItem::Struct(a), StackItem::Struct(b))
            | (StackItem::Map(a), StackItem::Map(b)) => a == b,
            (
                StackItem::Pointer {
                    script: sa,
                    position: pa,
                },
                StackItem::Pointer {
                    script: sb,
                    position: pb,
                },
            ) => Rc::ptr_eq(sa, sb) && pa == pb,
            (StackItem::InteropInterface(a), StackItem::InteropInterface(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn byte_string_equals(a: &Bytes, other: &StackItem, budget: &mut usize) -> Result<bool, VMError> {
    let StackItem::ByteString(b) = other else {
        *budget = budget.saturating_sub(1);
        return Ok(false);
    };
    if a.len() > *budget || b.len() > *budget {
        return Err(VMError::ComparisonLimit(
            "the operand exceeds the maximum comparable size",
        ));
    }
    let compared = a.len().max(b.len()).max(1);
    *budget = budget.saturating_sub(compared);
    Ok(a == b)
}

fn struct_equals(
    a: &StackItem,
    b: &StackItem,
    heap: &ReferenceCounter,
    limits: &ExecutionEngineLimits,
) -> Result<bool, VMError> {
    if !matches!(b, StackItem::Struct(_)) {
        return Ok(false);
    }
    let mut left = vec![a.clone()];
    let mut right = vec![b.clone()];
    let mut count = limits.max_stack_size;
    let mut budget = limits.max_comparable_size;

    while let (Some(x), Some(y)) = (left.pop(), right.pop()) {
        if count == 0 {
            return Err(VMError::ComparisonLimit("too many struct items to compare"));
        }
        count -= 1;

        if let StackItem::ByteString(bytes) = &x {
            if !byte_string_equals(bytes, &y, &mut budget)? {
                return Ok(false);
            }
            continue;
        }

        if budget == 0 {
            return Err(VMError::ComparisonLimit(
                "the operand exceeds the maximum comparable size",
            ));
        }
        budget -= 1;

        match (&x, &y) {
            (StackItem::Struct(ia), StackItem::Struct(ib)) => {
                if ia == ib {
                    continue;
                }
                let xs = heap.array(*ia)?;
                let ys = heap.array(*ib)?;
                if xs.len() != ys.len() {
                    return Ok(false);
                }
                left.extend(xs.iter().cloned());
                right.extend(ys.iter().cloned());
            }
            (StackItem::Struct(_), _) => return Ok(false),
            _ => {
                if !x.shallow_equals(&y) {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

impl fmt::Debug for StackItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackItem::Null => write!(f, "Null"),
            StackItem::Boolean(b) => write!(f, "Boolean({b})"),
            StackItem::Integer(i) => write!(f, "Integer({i})"),
            StackItem::ByteString(b) => write!(f, "ByteString(0x{})", hex::encode(b.as_slice())),
            StackItem::Buffer(id) => write!(f, "Buffer(#{})", id.0),
            StackItem::Array(id) => write!(f, "Array(#{})", id.0),
            StackItem::Struct(id) => write!(f, "Struct(#{})", id.0),
            StackItem::Map(id) => write!(f, "Map(#{})", id.0),
            StackItem::Pointer { position, .. } => write!(f, "Pointer({position})"),
            StackItem::InteropInterface(_) => write!(f, "InteropInterface"),
        }
    }
}

/// Identity for reference kinds, content for primitives. Never looks inside the heap.
impl PartialEq for StackItem {
    fn eq(&self, other: &Self) -> bool {
        self.shallow_equals(other)
    }
}

impl From<bool> for StackItem {
    fn from(value: bool) -> Self {
        StackItem::Boolean(value)
    }
}

impl From<BigInt> for StackItem {
    fn from(value: BigInt) -> Self {
        StackItem::Integer(value)
    }
}

impl From<i64> for StackItem {
    fn from(value: i64) -> Self {
        StackItem::Integer(value.into())
    }
}

impl From<Bytes> for StackItem {
    fn from(value: Bytes) -> Self {
        StackItem::ByteString(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_bytes_use_empty_zero() {
        assert!(integer_to_bytes(&BigInt::zero()).is_empty());
        assert_eq!(integer_to_bytes(&BigInt::from(-1)), vec![0xFF]);
        assert_eq!(integer_to_bytes(&BigInt::from(128)), vec![0x80, 0x00]);
        assert_eq!(bytes_to_integer(&[]), BigInt::zero());
        assert_eq!(bytes_to_integer(&[0xFF]), BigInt::from(-1));
    }

    #[test]
    fn check_integer_rejects_wide_values() {
        let max: BigInt = (BigInt::one() << 255) - 1;
        assert!(check_integer(max.clone()).is_ok());
        assert_eq!(
            check_integer(max + 1),
            Err(VMError::IntegerOverflow { size: 33 })
        );
    }

    #[test]
    fn boolean_conversion() {
        assert!(!StackItem::Null.get_boolean().unwrap());
        assert!(StackItem::from_int(5).get_boolean().unwrap());
        assert!(!StackItem::from_bytes(vec![0u8, 0]).get_boolean().unwrap());
        assert!(StackItem::from_bytes(vec![0u8, 1]).get_boolean().unwrap());
        assert!(StackItem::from_bytes(vec![1u8; 33]).get_boolean().is_err());
    }

    #[test]
    fn integer_conversion() {
        assert_eq!(StackItem::Boolean(true).get_integer().unwrap(), BigInt::one());
        assert_eq!(
            StackItem::from_bytes(vec![0x01, 0x01]).get_integer().unwrap(),
            BigInt::from(257)
        );
        assert!(StackItem::Null.get_integer().is_err());
    }

    #[test]
    fn map_keys_are_primitive_and_bounded() {
        assert!(MapKey::from_item(&StackItem::Null).is_err());
        assert!(MapKey::from_item(&StackItem::from_bytes(vec![0u8; 64])).is_ok());
        assert!(matches!(
            MapKey::from_item(&StackItem::from_bytes(vec![0u8; 65])),
            Err(VMError::ItemTooLarge { size: 65, .. })
        ));
        assert_ne!(
            MapKey::from_item(&StackItem::Boolean(true)).unwrap(),
            MapKey::from_item(&StackItem::from_int(1)).unwrap()
        );
    }

    #[test]
    fn primitive_equality() {
        let heap = ReferenceCounter::new();
        let limits = ExecutionEngineLimits::default();
        let a = StackItem::from_bytes("abc");
        assert!(a.equals(&StackItem::from_bytes("abc"), &heap, &limits).unwrap());
        assert!(!a.equals(&StackItem::from_int(1), &heap, &limits).unwrap());
        assert!(!StackItem::from_int(1)
            .equals(&StackItem::Boolean(true), &heap, &limits)
            .unwrap());
        assert!(StackItem::Null.equals(&StackItem::Null, &heap, &limits).unwrap());
    }

    #[test]
    fn byte_string_comparison_is_bounded() {
        let heap = ReferenceCounter::new();
        let limits = ExecutionEngineLimits {
            max_comparable_size: 4,
            ..Default::default()
        };
        let long = StackItem::from_bytes(vec![1u8; 5]);
        assert!(matches!(
            long.equals(&long.clone(), &heap, &limits),
            Err(VMError::ComparisonLimit(_))
        ));
    }
}
