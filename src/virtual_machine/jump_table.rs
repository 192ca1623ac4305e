//! Opcode semantics.
//!
//! [`execute`] dispatches a decoded instruction to its handler. Handlers are grouped by
//! opcode family in the submodules and operate on the engine through its stack, slot and
//! control-flow helpers.

mod bitwise;
mod compound;
mod control;
mod numeric;
mod push;
mod slot;
mod splice;
mod stack;
mod types;

pub use types::convert;

use crate::virtual_machine::engine::{ExecutionEngine, Host};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::isa::OpCode;

/// Executes one instruction against the current frame.
pub(crate) fn execute<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    use OpCode::*;

    match instruction.opcode {
        // Constants
        PushInt8 | PushInt16 | PushInt32 | PushInt64 | PushInt128 | PushInt256 => {
            push::push_int(engine, instruction)
        }
        PushT => push::push_bool(engine, true),
        PushF => push::push_bool(engine, false),
        PushA => push::push_a(engine, instruction),
        PushNull => push::push_null(engine),
        PushData1 | PushData2 | PushData4 => push::push_data(engine, instruction),
        PushM1 | Push0 | Push1 | Push2 | Push3 | Push4 | Push5 | Push6 | Push7 | Push8
        | Push9 | Push10 | Push11 | Push12 | Push13 | Push14 | Push15 | Push16 => {
            push::push_small(engine, instruction)
        }

        // Flow control
        Nop => Ok(()),
        Jmp | JmpL => control::jmp(engine, instruction),
        JmpIf | JmpIfL => control::jmp_if(engine, instruction, true),
        JmpIfNot | JmpIfNotL => control::jmp_if(engine, instruction, false),
        JmpEq | JmpEqL | JmpNe | JmpNeL | JmpGt | JmpGtL | JmpGe | JmpGeL | JmpLt | JmpLtL
        | JmpLe | JmpLeL => control::jmp_compare(engine, instruction),
        Call | CallL => control::call(engine, instruction),
        CallA => control::call_a(engine),
        CallT => H::on_call_token(engine, instruction.token_u16()),
        Abort => Err(VMError::Abort),
        AbortMsg => control::abort_msg(engine),
        Assert => control::assert(engine),
        AssertMsg => control::assert_msg(engine),
        Throw => control::throw(engine),
        Try | TryL => control::try_block(engine, instruction),
        EndTry | EndTryL => engine.execute_end_try(instruction.jump_offset()),
        EndFinally => engine.execute_end_finally(),
        Ret => engine.execute_ret(),
        Syscall => H::on_syscall(engine, instruction.token_u32()),

        // Stack
        Depth => stack::depth(engine),
        Drop => stack::drop(engine),
        Nip => stack::nip(engine),
        XDrop => stack::xdrop(engine),
        Clear => stack::clear(engine),
        Dup => stack::dup(engine),
        Over => stack::over(engine),
        Pick => stack::pick(engine),
        Tuck => stack::tuck(engine),
        Swap => stack::swap(engine),
        Rot => stack::rot(engine),
        Roll => stack::roll(engine),
        Reverse3 => stack::reverse(engine, 3),
        Reverse4 => stack::reverse(engine, 4),
        ReverseN => stack::reverse_n(engine),

        // Slots
        InitSSlot => slot::init_static_slot(engine, instruction),
        InitSlot => slot::init_slot(engine, instruction),
        LdSFld0 | LdSFld1 | LdSFld2 | LdSFld3 | LdSFld4 | LdSFld5 | LdSFld6 => {
            slot::load_static(engine, (instruction.opcode as u8 - LdSFld0 as u8) as usize)
        }
        LdSFld => slot::load_static(engine, instruction.token_u8() as usize),
        StSFld0 | StSFld1 | StSFld2 | StSFld3 | StSFld4 | StSFld5 | StSFld6 => {
            slot::store_static(engine, (instruction.opcode as u8 - StSFld0 as u8) as usize)
        }
        StSFld => slot::store_static(engine, instruction.token_u8() as usize),
        LdLoc0 | LdLoc1 | LdLoc2 | LdLoc3 | LdLoc4 | LdLoc5 | LdLoc6 => {
            slot::load_local(engine, (instruction.opcode as u8 - LdLoc0 as u8) as usize)
        }
        LdLoc => slot::load_local(engine, instruction.token_u8() as usize),
        StLoc0 | StLoc1 | StLoc2 | StLoc3 | StLoc4 | StLoc5 | StLoc6 => {
            slot::store_local(engine, (instruction.opcode as u8 - StLoc0 as u8) as usize)
        }
        StLoc => slot::store_local(engine, instruction.token_u8() as usize),
        LdArg0 | LdArg1 | LdArg2 | LdArg3 | LdArg4 | LdArg5 | LdArg6 => {
            slot::load_argument(engine, (instruction.opcode as u8 - LdArg0 as u8) as usize)
        }
        LdArg => slot::load_argument(engine, instruction.token_u8() as usize),
        StArg0 | StArg1 | StArg2 | StArg3 | StArg4 | StArg5 | StArg6 => {
            slot::store_argument(engine, (instruction.opcode as u8 - StArg0 as u8) as usize)
        }
        StArg => slot::store_argument(engine, instruction.token_u8() as usize),

        // Splice
        NewBuffer => splice::new_buffer(engine),
        MemCpy => splice::memcpy(engine),
        Cat => splice::cat(engine),
        Substr => splice::substr(engine),
        Left => splice::left(engine),
        Right => splice::right(engine),

        // Bitwise logic
        Invert => bitwise::invert(engine),
        And | Or | Xor => bitwise::binary(engine, instruction.opcode),
        Equal => bitwise::equal(engine, true),
        NotEqual => bitwise::equal(engine, false),

        // Arithmetic
        Sign | Abs | Negate | Inc | Dec => numeric::unary(engine, instruction.opcode),
        Add | Sub | Mul | Div | Mod | Min | Max => numeric::binary(engine, instruction.opcode),
        Pow => numeric::pow(engine),
        Sqrt => numeric::sqrt(engine),
        ModMul => numeric::modmul(engine),
        ModPow => numeric::modpow(engine),
        Shl | Shr => numeric::shift(engine, instruction.opcode),
        Not => numeric::not(engine),
        BoolAnd | BoolOr => numeric::bool_binary(engine, instruction.opcode),
        Nz => numeric::nz(engine),
        NumEqual | NumNotEqual => numeric::num_equal(engine, instruction.opcode),
        Lt | Le | Gt | Ge => numeric::compare(engine, instruction.opcode),
        Within => numeric::within(engine),

        // Compound types
        PackMap => compound::pack_map(engine),
        PackStruct => compound::pack(engine, true),
        Pack => compound::pack(engine, false),
        Unpack => compound::unpack(engine),
        NewArray0 => compound::new_array0(engine, false),
        NewStruct0 => compound::new_array0(engine, true),
        NewArray => compound::new_array(engine, false),
        NewStruct => compound::new_array(engine, true),
        NewArrayT => compound::new_array_t(engine, instruction),
        NewMap => compound::new_map(engine),
        Size => compound::size(engine),
        HasKey => compound::has_key(engine),
        Keys => compound::keys(engine),
        Values => compound::values(engine),
        PickItem => compound::pick_item(engine),
        Append => compound::append(engine),
        SetItem => compound::set_item(engine),
        ReverseItems => compound::reverse_items(engine),
        Remove => compound::remove(engine),
        ClearItems => compound::clear_items(engine),
        PopItem => compound::pop_item(engine),

        // Types
        IsNull => types::is_null(engine),
        IsType => types::is_type(engine, instruction),
        Convert => types::convert_op(engine, instruction),
    }
}
