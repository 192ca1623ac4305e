//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical opcode list
//! and invokes a callback macro for code generation, so the decoder, the price table and
//! the static ISA check all read the same definitions.
//!
//! Each entry carries:
//! - the opcode byte and mnemonic
//! - the operand layout: `Fixed(n)` bytes, or `Prefix(n)` for an n-byte little-endian
//!   length followed by that many data bytes
//! - the base price, multiplied by the execution fee factor at run time
//!
//! # Bytecode Format
//!
//! - Opcode: 1 byte
//! - Operand: fixed width or length-prefixed, as listed per opcode
//! - Jump offsets are signed and relative to the start of the instruction

use crate::virtual_machine::errors::VMError;

/// Operand layout of an opcode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperandSize {
    /// Exactly `n` operand bytes follow the opcode.
    Fixed(usize),
    /// An `n`-byte length prefix, then that many data bytes.
    Prefix(usize),
}

/// Invokes a callback macro with the complete opcode definition list.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Constants
            // =========================
            /// Pushes a 1-byte signed integer.
            PushInt8 = 0x00, "PUSHINT8" => Fixed(1), 1,
            /// Pushes a 2-byte signed integer.
            PushInt16 = 0x01, "PUSHINT16" => Fixed(2), 1,
            /// Pushes a 4-byte signed integer.
            PushInt32 = 0x02, "PUSHINT32" => Fixed(4), 1,
            /// Pushes an 8-byte signed integer.
            PushInt64 = 0x03, "PUSHINT64" => Fixed(8), 1,
            /// Pushes a 16-byte signed integer.
            PushInt128 = 0x04, "PUSHINT128" => Fixed(16), 4,
            /// Pushes a 32-byte signed integer.
            PushInt256 = 0x05, "PUSHINT256" => Fixed(32), 4,
            /// Pushes boolean true.
            PushT = 0x08, "PUSHT" => Fixed(0), 1,
            /// Pushes boolean false.
            PushF = 0x09, "PUSHF" => Fixed(0), 1,
            /// Pushes a pointer to `ip + offset`.
            PushA = 0x0A, "PUSHA" => Fixed(4), 4,
            /// Pushes null.
            PushNull = 0x0B, "PUSHNULL" => Fixed(0), 1,
            /// Pushes up to 255 bytes.
            PushData1 = 0x0C, "PUSHDATA1" => Prefix(1), 8,
            /// Pushes up to 65535 bytes.
            PushData2 = 0x0D, "PUSHDATA2" => Prefix(2), 512,
            /// Pushes a 4-byte length-prefixed byte string.
            PushData4 = 0x0E, "PUSHDATA4" => Prefix(4), 4096,
            /// Pushes -1.
            PushM1 = 0x0F, "PUSHM1" => Fixed(0), 1,
            Push0 = 0x10, "PUSH0" => Fixed(0), 1,
            Push1 = 0x11, "PUSH1" => Fixed(0), 1,
            Push2 = 0x12, "PUSH2" => Fixed(0), 1,
            Push3 = 0x13, "PUSH3" => Fixed(0), 1,
            Push4 = 0x14, "PUSH4" => Fixed(0), 1,
            Push5 = 0x15, "PUSH5" => Fixed(0), 1,
            Push6 = 0x16, "PUSH6" => Fixed(0), 1,
            Push7 = 0x17, "PUSH7" => Fixed(0), 1,
            Push8 = 0x18, "PUSH8" => Fixed(0), 1,
            Push9 = 0x19, "PUSH9" => Fixed(0), 1,
            Push10 = 0x1A, "PUSH10" => Fixed(0), 1,
            Push11 = 0x1B, "PUSH11" => Fixed(0), 1,
            Push12 = 0x1C, "PUSH12" => Fixed(0), 1,
            Push13 = 0x1D, "PUSH13" => Fixed(0), 1,
            Push14 = 0x1E, "PUSH14" => Fixed(0), 1,
            Push15 = 0x1F, "PUSH15" => Fixed(0), 1,
            Push16 = 0x20, "PUSH16" => Fixed(0), 1,
            // =========================
            // Flow control
            // =========================
            Nop = 0x21, "NOP" => Fixed(0), 1,
            /// Unconditional jump, 1-byte offset.
            Jmp = 0x22, "JMP" => Fixed(1), 2,
            /// Unconditional jump, 4-byte offset.
            JmpL = 0x23, "JMP_L" => Fixed(4), 2,
            /// Jumps if the popped value is true.
            JmpIf = 0x24, "JMPIF" => Fixed(1), 2,
            JmpIfL = 0x25, "JMPIF_L" => Fixed(4), 2,
            /// Jumps if the popped value is false.
            JmpIfNot = 0x26, "JMPIFNOT" => Fixed(1), 2,
            JmpIfNotL = 0x27, "JMPIFNOT_L" => Fixed(4), 2,
            /// Jumps if the two popped integers are equal.
            JmpEq = 0x28, "JMPEQ" => Fixed(1), 2,
            JmpEqL = 0x29, "JMPEQ_L" => Fixed(4), 2,
            JmpNe = 0x2A, "JMPNE" => Fixed(1), 2,
            JmpNeL = 0x2B, "JMPNE_L" => Fixed(4), 2,
            JmpGt = 0x2C, "JMPGT" => Fixed(1), 2,
            JmpGtL = 0x2D, "JMPGT_L" => Fixed(4), 2,
            JmpGe = 0x2E, "JMPGE" => Fixed(1), 2,
            JmpGeL = 0x2F, "JMPGE_L" => Fixed(4), 2,
            JmpLt = 0x30, "JMPLT" => Fixed(1), 2,
            JmpLtL = 0x31, "JMPLT_L" => Fixed(4), 2,
            JmpLe = 0x32, "JMPLE" => Fixed(1), 2,
            JmpLeL = 0x33, "JMPLE_L" => Fixed(4), 2,
            /// Calls the function at `ip + offset` in the same script.
            Call = 0x34, "CALL" => Fixed(1), 512,
            CallL = 0x35, "CALL_L" => Fixed(4), 512,
            /// Calls the function a popped pointer refers to.
            CallA = 0x36, "CALLA" => Fixed(0), 512,
            /// Calls the method token with the given index.
            CallT = 0x37, "CALLT" => Fixed(2), 32768,
            Abort = 0x38, "ABORT" => Fixed(0), 0,
            Assert = 0x39, "ASSERT" => Fixed(0), 1,
            /// Throws the popped item as an exception.
            Throw = 0x3A, "THROW" => Fixed(0), 512,
            /// Opens a try block: catch offset, finally offset (1 byte each).
            Try = 0x3B, "TRY" => Fixed(2), 4,
            /// Opens a try block: catch offset, finally offset (4 bytes each).
            TryL = 0x3C, "TRY_L" => Fixed(8), 4,
            EndTry = 0x3D, "ENDTRY" => Fixed(1), 4,
            EndTryL = 0x3E, "ENDTRY_L" => Fixed(4), 4,
            EndFinally = 0x3F, "ENDFINALLY" => Fixed(0), 4,
            Ret = 0x40, "RET" => Fixed(0), 0,
            /// Calls the interop service with the given 4-byte selector.
            Syscall = 0x41, "SYSCALL" => Fixed(4), 0,
            // =========================
            // Stack
            // =========================
            Depth = 0x43, "DEPTH" => Fixed(0), 2,
            Drop = 0x45, "DROP" => Fixed(0), 2,
            Nip = 0x46, "NIP" => Fixed(0), 2,
            XDrop = 0x48, "XDROP" => Fixed(0), 16,
            Clear = 0x49, "CLEAR" => Fixed(0), 16,
            Dup = 0x4A, "DUP" => Fixed(0), 2,
            Over = 0x4B, "OVER" => Fixed(0), 2,
            Pick = 0x4D, "PICK" => Fixed(0), 2,
            Tuck = 0x4E, "TUCK" => Fixed(0), 2,
            Swap = 0x50, "SWAP" => Fixed(0), 2,
            Rot = 0x51, "ROT" => Fixed(0), 2,
            Roll = 0x52, "ROLL" => Fixed(0), 16,
            Reverse3 = 0x53, "REVERSE3" => Fixed(0), 2,
            Reverse4 = 0x54, "REVERSE4" => Fixed(0), 2,
            ReverseN = 0x55, "REVERSEN" => Fixed(0), 16,
            // =========================
            // Slots
            // =========================
            /// Initializes the static field slot.
            InitSSlot = 0x56, "INITSSLOT" => Fixed(1), 16,
            /// Initializes local and argument slots.
            InitSlot = 0x57, "INITSLOT" => Fixed(2), 64,
            LdSFld0 = 0x58, "LDSFLD0" => Fixed(0), 2,
            LdSFld1 = 0x59, "LDSFLD1" => Fixed(0), 2,
            LdSFld2 = 0x5A, "LDSFLD2" => Fixed(0), 2,
            LdSFld3 = 0x5B, "LDSFLD3" => Fixed(0), 2,
            LdSFld4 = 0x5C, "LDSFLD4" => Fixed(0), 2,
            LdSFld5 = 0x5D, "LDSFLD5" => Fixed(0), 2,
            LdSFld6 = 0x5E, "LDSFLD6" => Fixed(0), 2,
            LdSFld = 0x5F, "LDSFLD" => Fixed(1), 2,
            StSFld0 = 0x60, "STSFLD0" => Fixed(0), 2,
            StSFld1 = 0x61, "STSFLD1" => Fixed(0), 2,
            StSFld2 = 0x62, "STSFLD2" => Fixed(0), 2,
            StSFld3 = 0x63, "STSFLD3" => Fixed(0), 2,
            StSFld4 = 0x64, "STSFLD4" => Fixed(0), 2,
            StSFld5 = 0x65, "STSFLD5" => Fixed(0), 2,
            StSFld6 = 0x66, "STSFLD6" => Fixed(0), 2,
            StSFld = 0x67, "STSFLD" => Fixed(1), 2,
            LdLoc0 = 0x68, "LDLOC0" => Fixed(0), 2,
            LdLoc1 = 0x69, "LDLOC1" => Fixed(0), 2,
            LdLoc2 = 0x6A, "LDLOC2" => Fixed(0), 2,
            LdLoc3 = 0x6B, "LDLOC3" => Fixed(0), 2,
            LdLoc4 = 0x6C, "LDLOC4" => Fixed(0), 2,
            LdLoc5 = 0x6D, "LDLOC5" => Fixed(0), 2,
            LdLoc6 = 0x6E, "LDLOC6" => Fixed(0), 2,
            LdLoc = 0x6F, "LDLOC" => Fixed(1), 2,
            StLoc0 = 0x70, "STLOC0" => Fixed(0), 2,
            StLoc1 = 0x71, "STLOC1" => Fixed(0), 2,
            StLoc2 = 0x72, "STLOC2" => Fixed(0), 2,
            StLoc3 = 0x73, "STLOC3" => Fixed(0), 2,
            StLoc4 = 0x74, "STLOC4" => Fixed(0), 2,
            StLoc5 = 0x75, "STLOC5" => Fixed(0), 2,
            StLoc6 = 0x76, "STLOC6" => Fixed(0), 2,
            StLoc = 0x77, "STLOC" => Fixed(1), 2,
            LdArg0 = 0x78, "LDARG0" => Fixed(0), 2,
            LdArg1 = 0x79, "LDARG1" => Fixed(0), 2,
            LdArg2 = 0x7A, "LDARG2" => Fixed(0), 2,
            LdArg3 = 0x7B, "LDARG3" => Fixed(0), 2,
            LdArg4 = 0x7C, "LDARG4" => Fixed(0), 2,
            LdArg5 = 0x7D, "LDARG5" => Fixed(0), 2,
            LdArg6 = 0x7E, "LDARG6" => Fixed(0), 2,
            LdArg = 0x7F, "LDARG" => Fixed(1), 2,
            StArg0 = 0x80, "STARG0" => Fixed(0), 2,
            StArg1 = 0x81, "STARG1" => Fixed(0), 2,
            StArg2 = 0x82, "STARG2" => Fixed(0), 2,
            StArg3 = 0x83, "STARG3" => Fixed(0), 2,
            StArg4 = 0x84, "STARG4" => Fixed(0), 2,
            StArg5 = 0x85, "STARG5" => Fixed(0), 2,
            StArg6 = 0x86, "STARG6" => Fixed(0), 2,
            StArg = 0x87, "STARG" => Fixed(1), 2,
            // =========================
            // Splice
            // =========================
            NewBuffer = 0x88, "NEWBUFFER" => Fixed(0), 256,
            MemCpy = 0x89, "MEMCPY" => Fixed(0), 2048,
            Cat = 0x8B, "CAT" => Fixed(0), 2048,
            Substr = 0x8C, "SUBSTR" => Fixed(0), 2048,
            Left = 0x8D, "LEFT" => Fixed(0), 2048,
            Right = 0x8E, "RIGHT" => Fixed(0), 2048,
            // =========================
            // Bitwise logic
            // =========================
            Invert = 0x90, "INVERT" => Fixed(0), 4,
            And = 0x91, "AND" => Fixed(0), 8,
            Or = 0x92, "OR" => Fixed(0), 8,
            Xor = 0x93, "XOR" => Fixed(0), 8,
            Equal = 0x97, "EQUAL" => Fixed(0), 32,
            NotEqual = 0x98, "NOTEQUAL" => Fixed(0), 32,
            // =========================
            // Arithmetic
            // =========================
            Sign = 0x99, "SIGN" => Fixed(0), 4,
            Abs = 0x9A, "ABS" => Fixed(0), 4,
            Negate = 0x9B, "NEGATE" => Fixed(0), 4,
            Inc = 0x9C, "INC" => Fixed(0), 4,
            Dec = 0x9D, "DEC" => Fixed(0), 4,
            Add = 0x9E, "ADD" => Fixed(0), 8,
            Sub = 0x9F, "SUB" => Fixed(0), 8,
            Mul = 0xA0, "MUL" => Fixed(0), 8,
            Div = 0xA1, "DIV" => Fixed(0), 8,
            Mod = 0xA2, "MOD" => Fixed(0), 8,
            Pow = 0xA3, "POW" => Fixed(0), 64,
            Sqrt = 0xA4, "SQRT" => Fixed(0), 64,
            ModMul = 0xA5, "MODMUL" => Fixed(0), 32,
            ModPow = 0xA6, "MODPOW" => Fixed(0), 2048,
            Shl = 0xA8, "SHL" => Fixed(0), 8,
            Shr = 0xA9, "SHR" => Fixed(0), 8,
            Not = 0xAA, "NOT" => Fixed(0), 4,
            BoolAnd = 0xAB, "BOOLAND" => Fixed(0), 8,
            BoolOr = 0xAC, "BOOLOR" => Fixed(0), 8,
            Nz = 0xB1, "NZ" => Fixed(0), 4,
            NumEqual = 0xB3, "NUMEQUAL" => Fixed(0), 8,
            NumNotEqual = 0xB4, "NUMNOTEQUAL" => Fixed(0), 8,
            Lt = 0xB5, "LT" => Fixed(0), 8,
            Le = 0xB6, "LE" => Fixed(0), 8,
            Gt = 0xB7, "GT" => Fixed(0), 8,
            Ge = 0xB8, "GE" => Fixed(0), 8,
            Min = 0xB9, "MIN" => Fixed(0), 8,
            Max = 0xBA, "MAX" => Fixed(0), 8,
            Within = 0xBB, "WITHIN" => Fixed(0), 8,
            // =========================
            // Compound types
            // =========================
            PackMap = 0xBE, "PACKMAP" => Fixed(0), 2048,
            PackStruct = 0xBF, "PACKSTRUCT" => Fixed(0), 2048,
            Pack = 0xC0, "PACK" => Fixed(0), 2048,
            Unpack = 0xC1, "UNPACK" => Fixed(0), 2048,
            NewArray0 = 0xC2, "NEWARRAY0" => Fixed(0), 16,
            NewArray = 0xC3, "NEWARRAY" => Fixed(0), 512,
            /// Creates an array of `n` default values of the operand type.
            NewArrayT = 0xC4, "NEWARRAY_T" => Fixed(1), 512,
            NewStruct0 = 0xC5, "NEWSTRUCT0" => Fixed(0), 16,
            NewStruct = 0xC6, "NEWSTRUCT" => Fixed(0), 512,
            NewMap = 0xC8, "NEWMAP" => Fixed(0), 8,
            Size = 0xCA, "SIZE" => Fixed(0), 4,
            HasKey = 0xCB, "HASKEY" => Fixed(0), 64,
            Keys = 0xCC, "KEYS" => Fixed(0), 16,
            Values = 0xCD, "VALUES" => Fixed(0), 8192,
            PickItem = 0xCE, "PICKITEM" => Fixed(0), 64,
            Append = 0xCF, "APPEND" => Fixed(0), 8192,
            SetItem = 0xD0, "SETITEM" => Fixed(0), 8192,
            ReverseItems = 0xD1, "REVERSEITEMS" => Fixed(0), 8192,
            Remove = 0xD2, "REMOVE" => Fixed(0), 16,
            ClearItems = 0xD3, "CLEARITEMS" => Fixed(0), 16,
            PopItem = 0xD4, "POPITEM" => Fixed(0), 16,
            // =========================
            // Types
            // =========================
            IsNull = 0xD8, "ISNULL" => Fixed(0), 2,
            IsType = 0xD9, "ISTYPE" => Fixed(1), 2,
            Convert = 0xDB, "CONVERT" => Fixed(1), 8192,
            // =========================
            // Extensions
            // =========================
            /// Faults with the popped message.
            AbortMsg = 0xE0, "ABORTMSG" => Fixed(0), 0,
            /// Faults with the popped message when the condition below it is false.
            AssertMsg = 0xE1, "ASSERTMSG" => Fixed(0), 1,
        }
    };
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $byte:literal, $mnemonic:literal => $kind:ident($size:literal), $price:expr
        ),* $(,)?
    ) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $(
                $(#[$doc])*
                $name = $byte,
            )*
        }

        impl TryFrom<u8> for OpCode {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $byte => Ok(OpCode::$name), )*
                    _ => Err(VMError::InvalidOpcode {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }

        impl OpCode {
            /// Every defined opcode in table order.
            pub const ALL: &'static [OpCode] = &[ $( OpCode::$name, )* ];

            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( OpCode::$name => $mnemonic, )*
                }
            }

            /// Returns the operand layout for this opcode.
            pub const fn operand_size(&self) -> OperandSize {
                match self {
                    $( OpCode::$name => OperandSize::$kind($size), )*
                }
            }

            /// Returns the base price, before the execution fee factor.
            pub const fn base_price(&self) -> i64 {
                match self {
                    $( OpCode::$name => $price, )*
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);

impl OpCode {
    /// Returns the opcode that pushes the small integer `value`, for `-1..=16`.
    pub fn push_small_int(value: i64) -> Option<OpCode> {
        match value {
            -1 => Some(OpCode::PushM1),
            0..=16 => OpCode::try_from(OpCode::Push0 as u8 + value as u8).ok(),
            _ => None,
        }
    }
}
