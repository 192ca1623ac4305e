//! Per-frame operand stack.

use crate::virtual_machine::engine::reference_counter::ReferenceCounter;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::stack_item::StackItem;
use std::cell::RefCell;
use std::rc::Rc;

/// Reference counter shared by every stack and slot of one engine.
pub type SharedReferenceCounter = Rc<RefCell<ReferenceCounter>>;

/// Index-addressable stack of [`StackItem`]s. Depths count from the top, starting at 0.
///
/// Every push and pop is mirrored in the shared reference counter.
pub struct EvaluationStack {
    items: Vec<StackItem>,
    reference_counter: SharedReferenceCounter,
}

impl EvaluationStack {
    pub fn new(reference_counter: SharedReferenceCounter) -> Self {
        Self {
            items: Vec::new(),
            reference_counter,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items from bottom to top.
    pub fn items(&self) -> &[StackItem] {
        &self.items
    }

    pub fn push(&mut self, item: StackItem) {
        self.reference_counter
            .borrow_mut()
            .add_stack_reference(&item, 1);
        self.items.push(item);
    }

    pub fn pop(&mut self) -> Result<StackItem, VMError> {
        let item = self.items.pop().ok_or(VMError::OutOfRange { index: 0, count: 0 })?;
        self.reference_counter
            .borrow_mut()
            .remove_stack_reference(&item);
        Ok(item)
    }

    /// Returns the item `n` positions below the top.
    pub fn peek(&self, n: usize) -> Result<&StackItem, VMError> {
        let index = self.index_of(n)?;
        Ok(&self.items[index])
    }

    /// Inserts `item` so that it ends up `n` positions below the top.
    pub fn insert(&mut self, n: usize, item: StackItem) -> Result<(), VMError> {
        if n > self.items.len() {
            return Err(self.out_of_range(n));
        }
        self.reference_counter
            .borrow_mut()
            .add_stack_reference(&item, 1);
        let index = self.items.len() - n;
        self.items.insert(index, item);
        Ok(())
    }

    /// Removes and returns the item `n` positions below the top.
    pub fn remove(&mut self, n: usize) -> Result<StackItem, VMError> {
        let index = self.index_of(n)?;
        let item = self.items.remove(index);
        self.reference_counter
            .borrow_mut()
            .remove_stack_reference(&item);
        Ok(item)
    }

    /// Reverses the order of the top `n` items.
    pub fn reverse(&mut self, n: usize) -> Result<(), VMError> {
        if n > self.items.len() {
            return Err(self.out_of_range(n));
        }
        let start = self.items.len() - n;
        self.items[start..].reverse();
        Ok(())
    }

    /// Moves the top `n` items, keeping their order, onto `target`.
    ///
    /// Both stacks share one reference counter, so the stack references move with the items.
    pub fn move_to(&mut self, target: &mut EvaluationStack, n: usize) -> Result<(), VMError> {
        if n > self.items.len() {
            return Err(self.out_of_range(n));
        }
        let start = self.items.len() - n;
        target.items.extend(self.items.drain(start..));
        Ok(())
    }

    /// Pops every item, releasing their stack references.
    pub fn clear(&mut self) {
        let mut counter = self.reference_counter.borrow_mut();
        for item in self.items.drain(..) {
            counter.remove_stack_reference(&item);
        }
    }

    fn index_of(&self, n: usize) -> Result<usize, VMError> {
        if n >= self.items.len() {
            return Err(self.out_of_range(n));
        }
        Ok(self.items.len() - 1 - n)
    }

    fn out_of_range(&self, n: usize) -> VMError {
        VMError::OutOfRange {
            index: n as i64,
            count: self.items.len(),
        }
    }
}
