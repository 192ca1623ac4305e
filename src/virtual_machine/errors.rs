use crate::types::encoding::DecodeError;
use contract_runtime_derive::Error;

/// Errors raised while loading or executing bytecode.
///
/// Most variants fault the engine. The few listed in [`VMError::is_catchable`] are turned
/// into script-level exceptions instead, so a TRY block in the contract can handle them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VMError {
    /// Unknown opcode byte in the script.
    #[error("invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },
    /// Strict-mode validation rejected the script at load time.
    #[error("bad script at offset {offset}: {reason}")]
    BadScript { offset: usize, reason: &'static str },
    /// Instruction pointer past the end of the script.
    #[error("instruction pointer {ip} out of range (script length {len})")]
    InstructionOutOfRange { ip: usize, len: usize },
    /// Operand bytes run past the end of the script.
    #[error("instruction at offset {offset} is truncated")]
    TruncatedInstruction { offset: usize },
    /// Jump or call target outside the current script.
    #[error("jump target {target} out of range")]
    InvalidJumpTarget { target: i64 },
    /// A stack item could not be used as the requested kind.
    #[error("cannot convert {from} to {to}")]
    InvalidCast { from: &'static str, to: &'static str },
    /// Stack depth or slot index out of range.
    #[error("index {index} out of range (count {count})")]
    OutOfRange { index: i64, count: usize },
    /// Tracked references exceed the stack size limit.
    #[error("stack size {size} exceeds the limit {max}")]
    StackOverflow { size: usize, max: usize },
    #[error("item size {size} exceeds the limit {max}")]
    ItemTooLarge { size: usize, max: usize },
    #[error("invocation stack exceeds the limit {max}")]
    InvocationStackOverflow { max: usize },
    #[error("try nesting depth exceeds the limit {max}")]
    TryNestingTooDeep { max: usize },
    /// Integer result wider than 32 bytes.
    #[error("integer of {size} bytes exceeds the 32 byte limit")]
    IntegerOverflow { size: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("shift {shift} is out of range")]
    InvalidShift { shift: i64 },
    /// Comparison exceeded the comparable size or item count limits.
    #[error("comparison limit exceeded: {0}")]
    ComparisonLimit(&'static str),
    #[error("not supported: {0}")]
    NotSupported(&'static str),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("ABORT is executed")]
    Abort,
    #[error("ABORTMSG is executed: {0}")]
    AbortMsg(String),
    #[error("ASSERT is executed with false result")]
    AssertFailed,
    #[error("ASSERTMSG is executed with false result: {0}")]
    AssertMsg(String),
    /// A script exception reached the bottom of the invocation stack.
    #[error("unhandled exception: {0}")]
    UnhandledException(String),
    #[error("no execution context is loaded")]
    NoCurrentContext,
    #[error("{0} slot is not initialized")]
    SlotNotInitialized(&'static str),
    /// SYSCALL selector with no registered interop.
    #[error("interop service {0:#010x} not found")]
    InteropNotFound(u32),
    /// Interop requires flags the current frame was not granted.
    #[error("cannot call {syscall} with call flags {granted:#04x} (requires {required:#04x})")]
    PermissionDenied {
        syscall: &'static str,
        required: u8,
        granted: u8,
    },
    #[error("insufficient gas: consumed {consumed}, limit {limit}")]
    InsufficientGas { consumed: i64, limit: i64 },
    /// Interop argument failed validation. Catchable.
    #[error("argument error: {0}")]
    ArgumentError(String),
    /// Interop argument outside its allowed range. Catchable.
    #[error("argument out of range: {0}")]
    ArgumentOutOfRange(String),
    /// Map lookup miss in PICKITEM. Catchable.
    #[error("key not found in map")]
    KeyNotFound,
    /// Array or byte index miss in PICKITEM or SETITEM. Catchable.
    #[error("index {index} out of range (count {count})")]
    IndexOutOfRange { index: i64, count: usize },
    #[error("contract {0} not found")]
    ContractNotFound(String),
    #[error("method {method} with {parameters} parameters not found in contract {contract}")]
    MethodNotFound {
        contract: String,
        method: String,
        parameters: usize,
    },
    #[error("invalid stack item type {0:#04x}")]
    InvalidStackItemType(u8),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl VMError {
    /// Whether the error becomes a script exception rather than a fault.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            VMError::ArgumentError(_)
                | VMError::ArgumentOutOfRange(_)
                | VMError::KeyNotFound
                | VMError::IndexOutOfRange { .. }
        )
    }
}
