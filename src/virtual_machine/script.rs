//! Loaded script: raw bytecode plus a lazily filled instruction cache.

use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::isa::OpCode;
use crate::virtual_machine::stack_item::StackItemType;
use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Bytecode addressable by instruction offset.
///
/// In strict mode the constructor decodes the whole script and checks every operand and
/// every branch target up front. Otherwise instructions are decoded on first use.
pub struct Script {
    bytes: Bytes,
    cache: RefCell<HashMap<usize, Rc<Instruction>>>,
    hash: OnceCell<Address>,
}

impl Script {
    /// Wraps `bytes` as a script.
    ///
    /// With `strict`, returns [`VMError::BadScript`] if any instruction is malformed, any
    /// jump, call, `PUSHA`, `TRY` or `ENDTRY` target is not an instruction boundary, or any
    /// type operand is invalid.
    pub fn new(bytes: impl Into<Bytes>, strict: bool) -> Result<Self, VMError> {
        let script = Self {
            bytes: bytes.into(),
            cache: RefCell::new(HashMap::new()),
            hash: OnceCell::new(),
        };
        if strict {
            script.validate()?;
        }
        Ok(script)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Script hash, the address contracts and witnesses are identified by.
    pub fn hash(&self) -> Address {
        *self.hash.get_or_init(|| Address::from_script(&self.bytes))
    }

    /// Decodes the instruction at `ip`.
    ///
    /// Returns `Ok(None)` at the end of the script, which executes as `RET`, and
    /// [`VMError::InstructionOutOfRange`] past it.
    pub fn get_instruction(&self, ip: usize) -> Result<Option<Rc<Instruction>>, VMError> {
        if ip == self.len() {
            return Ok(None);
        }
        if ip > self.len() {
            return Err(VMError::InstructionOutOfRange { ip, len: self.len() });
        }
        if let Some(cached) = self.cache.borrow().get(&ip) {
            return Ok(Some(cached.clone()));
        }
        let instruction = Rc::new(Instruction::decode(&self.bytes, ip)?);
        self.cache.borrow_mut().insert(ip, instruction.clone());
        Ok(Some(instruction))
    }

    fn validate(&self) -> Result<(), VMError> {
        let mut ip = 0;
        while ip < self.len() {
            let instruction = self.get_instruction(ip).map_err(|_| VMError::BadScript {
                offset: ip,
                reason: "malformed instruction",
            })?;
            match instruction {
                Some(instruction) => ip += instruction.size(),
                None => break,
            }
        }

        let instructions: Vec<(usize, Rc<Instruction>)> = self
            .cache
            .borrow()
            .iter()
            .map(|(ip, ins)| (*ip, ins.clone()))
            .collect();
        for (ip, instruction) in instructions {
            self.validate_instruction(ip, &instruction)?;
        }
        Ok(())
    }

    fn validate_instruction(&self, ip: usize, instruction: &Instruction) -> Result<(), VMError> {
        let bad = |reason| VMError::BadScript { offset: ip, reason };
        let check_target = |offset: i64| -> Result<(), VMError> {
            let target = ip as i64 + offset;
            let is_boundary =
                target >= 0 && self.cache.borrow().contains_key(&(target as usize));
            if is_boundary {
                Ok(())
            } else {
                Err(bad("branch target is not an instruction boundary"))
            }
        };

        match instruction.opcode {
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
            | OpCode::JmpL
            | OpCode::JmpIfL
            | OpCode::JmpIfNotL
            | OpCode::JmpEqL
            | OpCode::JmpNeL
            | OpCode::JmpGtL
            | OpCode::JmpGeL
            | OpCode::JmpLtL
            | OpCode::JmpLeL
            | OpCode::CallL
            | OpCode::EndTryL
            | OpCode::PushA => check_target(instruction.jump_offset())?,
            OpCode::Try | OpCode::TryL => {
                let (catch, finally) = instruction.try_offsets();
                check_target(catch)?;
                check_target(finally)?;
            }
            OpCode::NewArrayT | OpCode::IsType | OpCode::Convert => {
                let ty = StackItemType::try_from(instruction.token_u8())
                    .map_err(|_| bad("invalid stack item type"))?;
                if instruction.opcode != OpCode::NewArrayT && ty == StackItemType::Any {
                    return Err(bad("ISTYPE and CONVERT cannot take type Any"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("len", &self.len())
            .field("hash", &self.hash().to_string())
            .finish()
    }
}
