//! Notifications and logs emitted by scripts.
//!
//! Events outlive the engine that produced them, so their payloads are captured as owned
//! [`EventValue`] trees rather than arena handles.

use crate::types::address::Address;
use crate::virtual_machine::engine::reference_counter::ReferenceCounter;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::stack_item::{ObjectId, StackItem};
use num_bigint::BigInt;
use std::collections::HashSet;

/// Longest event name accepted by `System.Runtime.Notify`.
pub const MAX_EVENT_NAME: usize = 32;
/// Largest serialized notification state.
pub const MAX_NOTIFICATION_SIZE: usize = 1024;
/// Longest message accepted by `System.Runtime.Log`.
pub const MAX_LOG_MESSAGE: usize = 1024;

/// Owned copy of a stack item.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EventValue {
    Null,
    Boolean(bool),
    Integer(BigInt),
    ByteString(Vec<u8>),
    Buffer(Vec<u8>),
    Array(Vec<EventValue>),
    Struct(Vec<EventValue>),
    Map(Vec<(EventValue, EventValue)>),
}

impl EventValue {
    /// Copies `item` and everything it reaches out of the arena.
    ///
    /// Pointers, interop interfaces and cyclic compounds cannot be captured.
    pub fn capture(item: &StackItem, heap: &ReferenceCounter) -> Result<Self, VMError> {
        let mut visiting = HashSet::new();
        Self::capture_inner(item, heap, &mut visiting)
    }

    fn capture_inner(
        item: &StackItem,
        heap: &ReferenceCounter,
        visiting: &mut HashSet<ObjectId>,
    ) -> Result<Self, VMError> {
        let value = match item {
            StackItem::Null => EventValue::Null,
            StackItem::Boolean(b) => EventValue::Boolean(*b),
            StackItem::Integer(i) => EventValue::Integer(i.clone()),
            StackItem::ByteString(b) => EventValue::ByteString(b.to_vec()),
            StackItem::Buffer(id) => EventValue::Buffer(heap.buffer(*id)?.clone()),
            StackItem::Array(id) | StackItem::Struct(id) | StackItem::Map(id) => {
                if !visiting.insert(*id) {
                    return Err(VMError::NotSupported("capturing a cyclic compound"));
                }
                let value = match item {
                    StackItem::Map(_) => EventValue::Map(
                        heap.map(*id)?
                            .iter()
                            .map(|(k, v)| {
                                Ok((
                                    Self::capture_inner(&k.to_item(), heap, visiting)?,
                                    Self::capture_inner(v, heap, visiting)?,
                                ))
                            })
                            .collect::<Result<_, VMError>>()?,
                    ),
                    _ => {
                        let items = heap
                            .array(*id)?
                            .iter()
                            .map(|child| Self::capture_inner(child, heap, visiting))
                            .collect::<Result<_, VMError>>()?;
                        if matches!(item, StackItem::Struct(_)) {
                            EventValue::Struct(items)
                        } else {
                            EventValue::Array(items)
                        }
                    }
                };
                visiting.remove(id);
                value
            }
            StackItem::Pointer { .. } | StackItem::InteropInterface(_) => {
                return Err(VMError::NotSupported("capturing pointers or interop interfaces"));
            }
        };
        Ok(value)
    }
}

/// `System.Runtime.Notify` event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    pub script_hash: Address,
    pub event_name: String,
    /// Always an [`EventValue::Array`].
    pub state: EventValue,
}

/// `System.Runtime.Log` event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEvent {
    pub script_hash: Address,
    pub message: String,
}
