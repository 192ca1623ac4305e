//! Result of a contract call a host handler is waiting on.
//!
//! A handler that needs the outcome of a script cannot block: it loads the callee with
//! [`ApplicationEngine::call_contract_awaiting`](crate::smart_contract::application_engine::ApplicationEngine)
//! and returns. When the callee frame unloads, the engine completes the [`Continuation`] and
//! runs the resume closure registered with it.

use crate::virtual_machine::stack_item::StackItem;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Default)]
enum Outcome {
    #[default]
    Pending,
    Completed(StackItem),
    Failed(String),
}

/// Shared handle to a pending call result. Clones observe the same outcome.
#[derive(Clone, Default)]
pub struct Continuation {
    outcome: Rc<RefCell<Outcome>>,
}

impl Continuation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes with a return value. Later completions are ignored.
    pub fn set_result(&self, item: StackItem) {
        let mut outcome = self.outcome.borrow_mut();
        if matches!(*outcome, Outcome::Pending) {
            *outcome = Outcome::Completed(item);
        }
    }

    /// Completes with the message of the exception that unwound the callee.
    pub fn set_exception(&self, message: impl Into<String>) {
        let mut outcome = self.outcome.borrow_mut();
        if matches!(*outcome, Outcome::Pending) {
            *outcome = Outcome::Failed(message.into());
        }
    }

    pub fn is_complete(&self) -> bool {
        !matches!(*self.outcome.borrow(), Outcome::Pending)
    }

    /// `None` while pending, otherwise the return value or the exception message.
    ///
    /// A compound result is only kept alive by the stack it is pushed to; read it from the
    /// resume closure, not after later instructions ran.
    pub fn result(&self) -> Option<Result<StackItem, String>> {
        match &*self.outcome.borrow() {
            Outcome::Pending => None,
            Outcome::Completed(item) => Some(Ok(item.clone())),
            Outcome::Failed(message) => Some(Err(message.clone())),
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.outcome.borrow() {
            Outcome::Pending => "pending",
            Outcome::Completed(_) => "completed",
            Outcome::Failed(_) => "failed",
        };
        f.debug_tuple("Continuation").field(&state).finish()
    }
}
