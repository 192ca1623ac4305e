use crate::virtual_machine::errors::VMError;

/// Structural limits enforced by the execution engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionEngineLimits {
    /// Largest shift accepted by `SHL` and `SHR`.
    pub max_shift: usize,
    /// Ceiling on tracked references across all stacks and compound items.
    pub max_stack_size: usize,
    /// Largest primitive or buffer, in bytes.
    pub max_item_size: usize,
    /// Byte budget for a single equality comparison.
    pub max_comparable_size: usize,
    pub max_invocation_stack_size: usize,
    pub max_try_nesting_depth: usize,
    /// Whether catchable engine errors become script exceptions.
    pub catch_engine_exceptions: bool,
}

impl Default for ExecutionEngineLimits {
    fn default() -> Self {
        Self {
            max_shift: 256,
            max_stack_size: 2 * 1024,
            max_item_size: 65535 * 2,
            max_comparable_size: 65536,
            max_invocation_stack_size: 1024,
            max_try_nesting_depth: 16,
            catch_engine_exceptions: true,
        }
    }
}

impl ExecutionEngineLimits {
    /// Returns [`VMError::ItemTooLarge`] when `size` exceeds `max_item_size`.
    pub fn check_item_size(&self, size: usize) -> Result<(), VMError> {
        if size > self.max_item_size {
            return Err(VMError::ItemTooLarge {
                size,
                max: self.max_item_size,
            });
        }
        Ok(())
    }
}
