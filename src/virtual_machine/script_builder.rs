//! Programmatic bytecode emission.

use crate::types::address::Address;
use crate::types::hash::Hash;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::OpCode;
use crate::virtual_machine::stack_item::MAX_INTEGER_SIZE;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

/// Interop selector for `name`: the first 4 bytes, little-endian, of SHA3-256(name).
pub fn interop_selector(name: &str) -> u32 {
    Hash::digest(name.as_bytes()).prefix_u32()
}

/// Appends instructions to a growing script.
#[derive(Clone, Debug, Default)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.script.clone()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.script
    }

    pub fn emit(&mut self, opcode: OpCode) -> &mut Self {
        self.script.push(opcode as u8);
        self
    }

    /// Emits `opcode` followed by raw operand bytes.
    pub fn emit_with(&mut self, opcode: OpCode, operand: &[u8]) -> &mut Self {
        self.script.push(opcode as u8);
        self.script.extend_from_slice(operand);
        self
    }

    /// Pushes an integer with the shortest encoding.
    pub fn emit_push_int(&mut self, value: i64) -> &mut Self {
        if let Some(opcode) = OpCode::push_small_int(value) {
            return self.emit(opcode);
        }
        if let Ok(v) = i8::try_from(value) {
            self.emit_with(OpCode::PushInt8, &v.to_le_bytes())
        } else if let Ok(v) = i16::try_from(value) {
            self.emit_with(OpCode::PushInt16, &v.to_le_bytes())
        } else if let Ok(v) = i32::try_from(value) {
            self.emit_with(OpCode::PushInt32, &v.to_le_bytes())
        } else {
            self.emit_with(OpCode::PushInt64, &value.to_le_bytes())
        }
    }

    /// Pushes an arbitrary integer.
    ///
    /// Returns [`VMError::IntegerOverflow`] for values wider than 32 bytes.
    pub fn emit_push_bigint(&mut self, value: &BigInt) -> Result<&mut Self, VMError> {
        if let Some(small) = value.to_i64() {
            return Ok(self.emit_push_int(small));
        }

        let mut bytes = value.to_signed_bytes_le();
        let (opcode, width) = match bytes.len() {
            1 => (OpCode::PushInt8, 1),
            2 => (OpCode::PushInt16, 2),
            3..=4 => (OpCode::PushInt32, 4),
            5..=8 => (OpCode::PushInt64, 8),
            9..=16 => (OpCode::PushInt128, 16),
            n if n <= MAX_INTEGER_SIZE => (OpCode::PushInt256, 32),
            n => return Err(VMError::IntegerOverflow { size: n }),
        };
        let pad = if value.is_negative() { 0xFF } else { 0x00 };
        bytes.resize(width, pad);
        Ok(self.emit_with(opcode, &bytes))
    }

    pub fn emit_push_bool(&mut self, value: bool) -> &mut Self {
        self.emit(if value { OpCode::PushT } else { OpCode::PushF })
    }

    pub fn emit_push_null(&mut self) -> &mut Self {
        self.emit(OpCode::PushNull)
    }

    /// Pushes a byte string with the smallest `PUSHDATA` form.
    pub fn emit_push_bytes(&mut self, data: &[u8]) -> &mut Self {
        let len = data.len();
        if len < 0x100 {
            self.emit_with(OpCode::PushData1, &[len as u8]);
        } else if len < 0x10000 {
            self.emit_with(OpCode::PushData2, &(len as u16).to_le_bytes());
        } else {
            self.emit_with(OpCode::PushData4, &(len as u32).to_le_bytes());
        }
        self.script.extend_from_slice(data);
        self
    }

    pub fn emit_push_string(&mut self, value: &str) -> &mut Self {
        self.emit_push_bytes(value.as_bytes())
    }

    /// Emits a jump, widening a short form to its `_L` variant when the offset needs it.
    pub fn emit_jump(&mut self, opcode: OpCode, offset: i32) -> &mut Self {
        let is_short = matches!(
            opcode,
            OpCode::Jmp
                | OpCode::JmpIf
                | OpCode::JmpIfNot
                | OpCode::JmpEq
                | OpCode::JmpNe
                | OpCode::JmpGt
                | OpCode::JmpGe
                | OpCode::JmpLt
                | OpCode::JmpLe
                | OpCode::Call
                | OpCode::EndTry
        );
        match i8::try_from(offset) {
            Ok(short) if is_short => self.emit_with(opcode, &[short as u8]),
            _ => {
                let long = if is_short { long_form(opcode) } else { opcode };
                self.emit_with(long, &offset.to_le_bytes())
            }
        }
    }

    pub fn emit_call(&mut self, offset: i32) -> &mut Self {
        self.emit_jump(OpCode::Call, offset)
    }

    /// Emits `TRY_L` with 4-byte catch and finally offsets.
    pub fn emit_try(&mut self, catch_offset: i32, finally_offset: i32) -> &mut Self {
        let mut operand = catch_offset.to_le_bytes().to_vec();
        operand.extend_from_slice(&finally_offset.to_le_bytes());
        self.emit_with(OpCode::TryL, &operand)
    }

    pub fn emit_syscall(&mut self, name: &str) -> &mut Self {
        self.emit_syscall_selector(interop_selector(name))
    }

    pub fn emit_syscall_selector(&mut self, selector: u32) -> &mut Self {
        self.emit_with(OpCode::Syscall, &selector.to_le_bytes())
    }

    /// Emits a `System.Contract.Call` to `method` of `script_hash`.
    ///
    /// The caller pushes the `arg_count` arguments beforehand, last argument first.
    pub fn emit_dynamic_call(
        &mut self,
        script_hash: &Address,
        method: &str,
        call_flags: u8,
        arg_count: usize,
    ) -> &mut Self {
        if arg_count == 0 {
            self.emit(OpCode::NewArray0);
        } else {
            self.emit_push_int(arg_count as i64).emit(OpCode::Pack);
        }
        self.emit_push_int(call_flags as i64)
            .emit_push_string(method)
            .emit_push_bytes(script_hash.as_slice())
            .emit_syscall("System.Contract.Call")
    }
}

fn long_form(opcode: OpCode) -> OpCode {
    OpCode::try_from(opcode as u8 + 1).unwrap_or(opcode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_ints_use_single_opcodes() {
        let mut sb = ScriptBuilder::new();
        sb.emit_push_int(-1).emit_push_int(0).emit_push_int(16);
        assert_eq!(sb.to_bytes(), vec![0x0F, 0x10, 0x20]);
    }

    #[test]
    fn wider_ints_are_sign_padded() {
        let mut sb = ScriptBuilder::new();
        sb.emit_push_int(17).emit_push_int(-200).emit_push_int(70000);
        assert_eq!(
            sb.to_bytes(),
            vec![
                OpCode::PushInt8 as u8,
                17,
                OpCode::PushInt16 as u8,
                0x38,
                0xFF,
                OpCode::PushInt32 as u8,
                0x70,
                0x11,
                0x01,
                0x00,
            ]
        );
    }

    #[test]
    fn oversized_int_is_rejected() {
        let huge = BigInt::from(1) << 300;
        assert!(ScriptBuilder::new().emit_push_bigint(&huge).is_err());
    }

    #[test]
    fn push_data_selects_prefix_width() {
        let mut sb = ScriptBuilder::new();
        sb.emit_push_bytes(&[7u8; 300]);
        let bytes = sb.to_bytes();
        assert_eq!(bytes[0], OpCode::PushData2 as u8);
        assert_eq!(u16::from_le_bytes([bytes[1], bytes[2]]), 300);
        assert_eq!(bytes.len(), 303);
    }

    #[test]
    fn jumps_widen_when_needed() {
        let mut sb = ScriptBuilder::new();
        sb.emit_jump(OpCode::Jmp, 10).emit_jump(OpCode::JmpIf, 1000);
        let bytes = sb.to_bytes();
        assert_eq!(&bytes[..2], &[OpCode::Jmp as u8, 10]);
        assert_eq!(bytes[2], OpCode::JmpIfL as u8);
        assert_eq!(i32::from_le_bytes(bytes[3..7].try_into().unwrap()), 1000);
    }

    #[test]
    fn syscall_uses_name_selector() {
        let mut sb = ScriptBuilder::new();
        sb.emit_syscall("System.Runtime.GetTrigger");
        let bytes = sb.to_bytes();
        assert_eq!(bytes[0], OpCode::Syscall as u8);
        assert_eq!(
            u32::from_le_bytes(bytes[1..5].try_into().unwrap()),
            interop_selector("System.Runtime.GetTrigger")
        );
    }
}
