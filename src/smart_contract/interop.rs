//! Interop services reachable through `SYSCALL`.
//!
//! Each service is described by an [`InteropDescriptor`]: a name, the 32-bit selector scripts
//! embed, its base price, the call flags it needs and the parameters it pops. The engine pops
//! and converts the parameters before the handler runs, so handlers read typed values from
//! [`InteropArgs`] instead of touching the stack.

use crate::smart_contract::application_engine::ApplicationEngine;
use crate::smart_contract::call_flags::CallFlags;
use crate::smart_contract::{contracts, crypto, runtime, storage};
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::virtual_machine::engine::reference_counter::ReferenceCounter;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::script_builder::interop_selector;
use crate::virtual_machine::stack_item::StackItem;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::any::Any;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Signature shared by every interop service.
///
/// A returned item is pushed onto the caller's evaluation stack.
pub type InteropHandler =
    for<'a> fn(&mut ApplicationEngine<'a>, &mut InteropArgs) -> Result<Option<StackItem>, VMError>;

/// How a popped stack item is converted before reaching the handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InteropParameterType {
    Integer,
    Boolean,
    /// Bytes of a primitive or buffer.
    ByteArray,
    /// UTF-8 text.
    String,
    /// Exactly 20 bytes.
    Hash160,
    InteropInterface,
    /// Passed through unconverted.
    StackItem,
    /// An Array or Struct, passed as its elements.
    Array,
    /// Like `Array`, but an integer instead counts the items popped right after it.
    ///
    /// Redeem scripts push `n` keys and then `n`, so list parameters of signature services
    /// take this form.
    CountedArray,
}

#[derive(Clone, Copy)]
pub struct InteropDescriptor {
    pub name: &'static str,
    pub hash: u32,
    pub handler: InteropHandler,
    /// Base price before the execution fee factor. 0 means the handler charges itself.
    pub price: i64,
    pub required_call_flags: CallFlags,
    pub parameters: &'static [InteropParameterType],
}

impl InteropDescriptor {
    pub fn new(
        name: &'static str,
        handler: InteropHandler,
        price: i64,
        required_call_flags: CallFlags,
        parameters: &'static [InteropParameterType],
    ) -> Self {
        Self {
            name,
            hash: interop_selector(name),
            handler,
            price,
            required_call_flags,
            parameters,
        }
    }
}

impl fmt::Debug for InteropDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteropDescriptor")
            .field("name", &self.name)
            .field("hash", &format_args!("{:#010x}", self.hash))
            .field("price", &self.price)
            .field("required_call_flags", &self.required_call_flags)
            .finish()
    }
}

/// Selector to descriptor lookup.
#[derive(Clone, Debug, Default)]
pub struct InteropRegistry {
    services: HashMap<u32, InteropDescriptor>,
}

impl InteropRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `System.*` service the runtime provides.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for descriptor in runtime::descriptors()
            .into_iter()
            .chain(storage::descriptors())
            .chain(crypto::descriptors())
            .chain(contracts::descriptors())
        {
            registry.register(descriptor);
        }
        registry
    }

    /// Adds a service, replacing any previous one with the same selector.
    pub fn register(&mut self, descriptor: InteropDescriptor) {
        self.services.insert(descriptor.hash, descriptor);
    }

    pub fn get(&self, hash: u32) -> Option<&InteropDescriptor> {
        self.services.get(&hash)
    }

    pub fn by_name(&self, name: &str) -> Option<&InteropDescriptor> {
        self.get(interop_selector(name))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// A converted interop argument.
#[derive(Clone)]
pub enum InteropValue {
    Integer(BigInt),
    Boolean(bool),
    Bytes(Bytes),
    String(String),
    Hash160(Address),
    Interface(Rc<dyn Any>),
    Item(StackItem),
    Array { item: StackItem, items: Vec<StackItem> },
}

impl InteropValue {
    fn kind(&self) -> &'static str {
        match self {
            InteropValue::Integer(_) => "Integer",
            InteropValue::Boolean(_) => "Boolean",
            InteropValue::Bytes(_) => "ByteArray",
            InteropValue::String(_) => "String",
            InteropValue::Hash160(_) => "Hash160",
            InteropValue::Interface(_) => "InteropInterface",
            InteropValue::Item(_) => "StackItem",
            InteropValue::Array { .. } => "Array",
        }
    }

    /// Converts `item` as `kind` requires. Failures are catchable argument errors.
    pub fn convert(
        item: StackItem,
        kind: InteropParameterType,
        heap: &ReferenceCounter,
    ) -> Result<Self, VMError> {
        let invalid = |err: VMError| VMError::ArgumentError(err.to_string());
        let value = match kind {
            InteropParameterType::Integer => InteropValue::Integer(item.get_integer().map_err(invalid)?),
            InteropParameterType::Boolean => InteropValue::Boolean(item.get_boolean().map_err(invalid)?),
            InteropParameterType::ByteArray => InteropValue::Bytes(item.get_bytes(heap).map_err(invalid)?),
            InteropParameterType::String => InteropValue::String(item.get_string(heap).map_err(invalid)?),
            InteropParameterType::Hash160 => {
                let bytes = item.get_bytes(heap).map_err(invalid)?;
                let hash = Address::from_slice(&bytes).ok_or_else(|| {
                    VMError::ArgumentError(format!("expected a 20 byte hash, got {} bytes", bytes.len()))
                })?;
                InteropValue::Hash160(hash)
            }
            InteropParameterType::InteropInterface => match item {
                StackItem::InteropInterface(object) => InteropValue::Interface(object),
                other => {
                    return Err(VMError::ArgumentError(format!(
                        "expected InteropInterface, got {}",
                        other.type_name()
                    )));
                }
            },
            InteropParameterType::StackItem => InteropValue::Item(item),
            InteropParameterType::Array | InteropParameterType::CountedArray => match item {
                StackItem::Array(id) | StackItem::Struct(id) => {
                    let items = heap.array(id)?.clone();
                    InteropValue::Array { item, items }
                }
                other => {
                    return Err(VMError::ArgumentError(format!(
                        "expected Array, got {}",
                        other.type_name()
                    )));
                }
            },
        };
        Ok(value)
    }
}

/// Reads a `CountedArray` count, which must lie in `0..=max`.
pub(crate) fn item_count(item: &StackItem, max: usize) -> Result<usize, VMError> {
    let count = item
        .get_integer()
        .map_err(|err| VMError::ArgumentError(err.to_string()))?;
    count
        .to_usize()
        .filter(|count| *count <= max)
        .ok_or_else(|| VMError::ArgumentOutOfRange(format!("item count {count} is outside 0..={max}")))
}

/// Converted arguments of one interop call, consumed front to back in declaration order.
#[derive(Default)]
pub struct InteropArgs {
    values: VecDeque<InteropValue>,
}

impl InteropArgs {
    pub fn new(values: Vec<InteropValue>) -> Self {
        Self {
            values: values.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn next(&mut self, expected: &'static str) -> Result<InteropValue, VMError> {
        self.values
            .pop_front()
            .ok_or_else(|| VMError::InvalidOperation(format!("missing {expected} argument")))
    }

    fn mismatch(expected: &'static str, found: &InteropValue) -> VMError {
        VMError::InvalidOperation(format!(
            "interop argument is {}, handler expected {expected}",
            found.kind()
        ))
    }

    pub fn integer(&mut self) -> Result<BigInt, VMError> {
        match self.next("Integer")? {
            InteropValue::Integer(value) => Ok(value),
            other => Err(Self::mismatch("Integer", &other)),
        }
    }

    pub fn boolean(&mut self) -> Result<bool, VMError> {
        match self.next("Boolean")? {
            InteropValue::Boolean(value) => Ok(value),
            other => Err(Self::mismatch("Boolean", &other)),
        }
    }

    pub fn bytes(&mut self) -> Result<Bytes, VMError> {
        match self.next("ByteArray")? {
            InteropValue::Bytes(value) => Ok(value),
            other => Err(Self::mismatch("ByteArray", &other)),
        }
    }

    pub fn string(&mut self) -> Result<String, VMError> {
        match self.next("String")? {
            InteropValue::String(value) => Ok(value),
            other => Err(Self::mismatch("String", &other)),
        }
    }

    pub fn hash160(&mut self) -> Result<Address, VMError> {
        match self.next("Hash160")? {
            InteropValue::Hash160(value) => Ok(value),
            other => Err(Self::mismatch("Hash160", &other)),
        }
    }

    /// The host object behind an InteropInterface, which must be a `T`.
    pub fn interface<T: Any>(&mut self) -> Result<Rc<T>, VMError> {
        match self.next("InteropInterface")? {
            InteropValue::Interface(object) => object.downcast::<T>().map_err(|_| {
                VMError::ArgumentError(format!(
                    "interop interface is not a {}",
                    std::any::type_name::<T>()
                ))
            }),
            other => Err(Self::mismatch("InteropInterface", &other)),
        }
    }

    pub fn item(&mut self) -> Result<StackItem, VMError> {
        match self.next("StackItem")? {
            InteropValue::Item(value) => Ok(value),
            other => Err(Self::mismatch("StackItem", &other)),
        }
    }

    /// Elements of an Array argument.
    pub fn array(&mut self) -> Result<Vec<StackItem>, VMError> {
        self.array_with_item().map(|(_, items)| items)
    }

    /// An Array argument together with the compound it was read from.
    pub fn array_with_item(&mut self) -> Result<(StackItem, Vec<StackItem>), VMError> {
        match self.next("Array")? {
            InteropValue::Array { item, items } => Ok((item, items)),
            other => Err(Self::mismatch("Array", &other)),
        }
    }
}
