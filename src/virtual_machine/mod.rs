//! Stack-based bytecode virtual machine for smart contract execution.
//!
//! # Architecture
//!
//! - **Evaluation stack**: per-frame stack of [`stack_item::StackItem`]s; frames spawned by
//!   `CALL` share their caller's stack
//! - **Heap**: Buffers, Arrays, Structs and Maps live in an arena owned by the
//!   [`engine::reference_counter::ReferenceCounter`], which also enforces the global item limit
//!   and collects unreachable cycles
//! - **Instruction format**: one opcode byte followed by a fixed or length-prefixed operand
//! - **Exceptions**: `TRY`/`CATCH`/`FINALLY` blocks unwind across frames
//! - **Host hooks**: the engine calls into a [`engine::Host`] around every instruction and
//!   for `SYSCALL`, which is where the contract runtime adds gas and interop services
//!
//! # Modules
//!
//! - [`debugger`]: Breakpoints and stepping
//! - [`engine`]: Execution loop, frames, slots and reference counting
//! - [`errors`]: Execution error types
//! - [`instruction`]: Instruction decoding
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`jump_table`]: Opcode semantics
//! - [`script`]: Loaded bytecode and strict-mode validation
//! - [`script_builder`]: Bytecode emission helpers
//! - [`stack_item`]: Stack item model and conversions

pub mod debugger;
pub mod engine;
pub mod errors;
pub mod instruction;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod jump_table;
pub mod script;
pub mod script_builder;
pub mod stack_item;
