//! Fixed-size variable slots for arguments, locals and static fields.

use crate::virtual_machine::engine::evaluation_stack::SharedReferenceCounter;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::stack_item::StackItem;

/// A pre-sized array of variables. Every position counts as a stack reference.
pub struct Slot {
    items: Vec<StackItem>,
    reference_counter: SharedReferenceCounter,
}

impl Slot {
    /// Creates a slot of `count` variables, all `Null`.
    pub fn new(count: usize, reference_counter: SharedReferenceCounter) -> Self {
        reference_counter
            .borrow_mut()
            .add_stack_reference(&StackItem::Null, count);
        Self {
            items: vec![StackItem::Null; count],
            reference_counter,
        }
    }

    /// Creates a slot holding `items`, used for arguments popped off the caller's stack.
    pub fn from_items(items: Vec<StackItem>, reference_counter: SharedReferenceCounter) -> Self {
        {
            let mut counter = reference_counter.borrow_mut();
            for item in &items {
                counter.add_stack_reference(item, 1);
            }
        }
        Self {
            items,
            reference_counter,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<StackItem, VMError> {
        self.items
            .get(index)
            .cloned()
            .ok_or(VMError::OutOfRange {
                index: index as i64,
                count: self.items.len(),
            })
    }

    pub fn set(&mut self, index: usize, item: StackItem) -> Result<(), VMError> {
        let count = self.items.len();
        let slot = self.items.get_mut(index).ok_or(VMError::OutOfRange {
            index: index as i64,
            count,
        })?;
        let old = std::mem::replace(slot, item.clone());
        let mut counter = self.reference_counter.borrow_mut();
        counter.add_stack_reference(&item, 1);
        counter.remove_stack_reference(&old);
        Ok(())
    }

    /// Releases the stack references of every variable. The slot is empty afterwards.
    pub fn clear_references(&mut self) {
        let mut counter = self.reference_counter.borrow_mut();
        for item in self.items.drain(..) {
            counter.remove_stack_reference(&item);
        }
    }
}
