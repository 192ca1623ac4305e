//! Decoded instruction: opcode plus raw operand bytes.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{OpCode, OperandSize};

/// A single decoded instruction.
///
/// For length-prefixed opcodes (`PUSHDATA*`) the operand holds the data without its prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Vec<u8>,
    size: usize,
}

impl Instruction {
    /// Decodes the instruction starting at `ip`.
    ///
    /// Returns [`VMError::InvalidOpcode`] for an unknown opcode byte and
    /// [`VMError::TruncatedInstruction`] when the operand runs past the end of the script.
    pub fn decode(script: &[u8], ip: usize) -> Result<Self, VMError> {
        let byte = *script
            .get(ip)
            .ok_or(VMError::InstructionOutOfRange { ip, len: script.len() })?;
        let opcode = OpCode::try_from(byte).map_err(|_| VMError::InvalidOpcode {
            opcode: byte,
            offset: ip,
        })?;

        let truncated = VMError::TruncatedInstruction { offset: ip };
        let (prefix, operand_len) = match opcode.operand_size() {
            OperandSize::Fixed(n) => (0, n),
            OperandSize::Prefix(n) => {
                let raw = script.get(ip + 1..ip + 1 + n).ok_or(truncated.clone())?;
                let mut len = 0usize;
                for (i, b) in raw.iter().enumerate() {
                    len |= (*b as usize) << (8 * i);
                }
                (n, len)
            }
        };

        let start = ip + 1 + prefix;
        let end = start.checked_add(operand_len).ok_or(truncated.clone())?;
        let operand = script.get(start..end).ok_or(truncated)?.to_vec();

        Ok(Self {
            opcode,
            operand,
            size: 1 + prefix + operand_len,
        })
    }

    /// A bare instruction with no operand, used for the implicit `RET` at the end of a script.
    pub fn ret() -> Self {
        Self {
            opcode: OpCode::Ret,
            operand: Vec::new(),
            size: 1,
        }
    }

    /// Total encoded size in bytes, including opcode and length prefix.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn token_u8(&self) -> u8 {
        self.operand.first().copied().unwrap_or_default()
    }

    pub fn token_u8_1(&self) -> u8 {
        self.operand.get(1).copied().unwrap_or_default()
    }

    pub fn token_i8(&self) -> i8 {
        self.token_u8() as i8
    }

    pub fn token_i8_1(&self) -> i8 {
        self.token_u8_1() as i8
    }

    pub fn token_u16(&self) -> u16 {
        u16::from_le_bytes(self.le_array(0))
    }

    pub fn token_u32(&self) -> u32 {
        u32::from_le_bytes(self.le_array(0))
    }

    pub fn token_i32(&self) -> i32 {
        i32::from_le_bytes(self.le_array(0))
    }

    /// Second 4-byte operand, the finally offset of `TRY_L`.
    pub fn token_i32_1(&self) -> i32 {
        i32::from_le_bytes(self.le_array(4))
    }

    /// Signed jump offset for both the short and the long jump forms.
    pub fn jump_offset(&self) -> i64 {
        match self.operand.len() {
            1 => self.token_i8() as i64,
            _ => self.token_i32() as i64,
        }
    }

    /// Catch and finally offsets of `TRY` or `TRY_L`.
    pub fn try_offsets(&self) -> (i64, i64) {
        match self.opcode {
            OpCode::Try => (self.token_i8() as i64, self.token_i8_1() as i64),
            _ => (self.token_i32() as i64, self.token_i32_1() as i64),
        }
    }

    fn le_array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(src) = self.operand.get(offset..offset + N) {
            out.copy_from_slice(src);
        }
        out
    }
}
