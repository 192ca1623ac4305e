use crate::virtual_machine::engine::{ExecutionEngine, Host};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::OpCode;
use crate::virtual_machine::stack_item::{StackItem, check_integer};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

fn push_integer<H: Host>(engine: &mut ExecutionEngine<H>, value: BigInt) -> Result<(), VMError> {
    engine.push(StackItem::Integer(check_integer(value)?))
}

/// Pops a shift or exponent, which must be in `0..=max_shift`.
fn pop_shift<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<u32, VMError> {
    let shift = engine.pop_integer()?;
    let max = engine.limits().max_shift;
    match shift.to_u32() {
        Some(value) if value as usize <= max => Ok(value),
        _ => Err(VMError::InvalidShift {
            shift: shift.to_i64().unwrap_or(i64::MAX),
        }),
    }
}

/// `SIGN`, `ABS`, `NEGATE`, `INC` and `DEC`.
pub(super) fn unary<H: Host>(engine: &mut ExecutionEngine<H>, opcode: OpCode) -> Result<(), VMError> {
    let x = engine.pop_integer()?;
    let result = match opcode {
        OpCode::Sign => x.signum(),
        OpCode::Abs => x.abs(),
        OpCode::Negate => -x,
        OpCode::Inc => x + 1,
        _ => x - 1,
    };
    push_integer(engine, result)
}

/// `ADD`, `SUB`, `MUL`, `DIV`, `MOD`, `MIN` and `MAX`.
///
/// Division truncates toward zero and the remainder takes the sign of the dividend.
pub(super) fn binary<H: Host>(engine: &mut ExecutionEngine<H>, opcode: OpCode) -> Result<(), VMError> {
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    let result = match opcode {
        OpCode::Add => x1 + x2,
        OpCode::Sub => x1 - x2,
        OpCode::Mul => x1 * x2,
        OpCode::Div | OpCode::Mod if x2.is_zero() => return Err(VMError::DivisionByZero),
        OpCode::Div => x1 / x2,
        OpCode::Mod => x1 % x2,
        OpCode::Min => x1.min(x2),
        _ => x1.max(x2),
    };
    push_integer(engine, result)
}

pub(super) fn pow<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let exponent = pop_shift(engine)?;
    let value = engine.pop_integer()?;
    push_integer(engine, num_traits::pow(value, exponent as usize))
}

pub(super) fn sqrt<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let value = engine.pop_integer()?;
    if value.is_negative() {
        return Err(VMError::InvalidOperation(
            "square root of a negative value".into(),
        ));
    }
    push_integer(engine, value.sqrt())
}

pub(super) fn modmul<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let modulus = engine.pop_integer()?;
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    if modulus.is_zero() {
        return Err(VMError::DivisionByZero);
    }
    push_integer(engine, (x1 * x2) % modulus)
}

/// `MODPOW`. An exponent of -1 computes the modular inverse.
pub(super) fn modpow<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let modulus = engine.pop_integer()?;
    let exponent = engine.pop_integer()?;
    let value = engine.pop_integer()?;

    let result = if exponent == -BigInt::one() {
        mod_inverse(&value, &modulus)?
    } else {
        if exponent.is_negative() {
            return Err(VMError::InvalidOperation(
                "MODPOW exponent cannot be negative".into(),
            ));
        }
        if modulus.is_zero() {
            return Err(VMError::DivisionByZero);
        }
        let magnitude = value.abs().modpow(&exponent, &modulus.abs());
        if value.is_negative() && exponent.is_odd() {
            -magnitude
        } else {
            magnitude
        }
    };
    push_integer(engine, result)
}

fn mod_inverse(value: &BigInt, modulus: &BigInt) -> Result<BigInt, VMError> {
    if !value.is_positive() {
        return Err(VMError::InvalidOperation(
            "modular inverse requires a positive value".into(),
        ));
    }
    if *modulus < BigInt::from(2) {
        return Err(VMError::InvalidOperation(
            "modular inverse requires a modulus of at least 2".into(),
        ));
    }
    let gcd = value.extended_gcd(modulus);
    if !gcd.gcd.is_one() {
        return Err(VMError::InvalidOperation(
            "no modular inverse exists".into(),
        ));
    }
    Ok(gcd.x.mod_floor(modulus))
}

/// `SHL` and `SHR`. A zero shift leaves the value on the stack untouched. `SHR` rounds
/// toward negative infinity.
pub(super) fn shift<H: Host>(engine: &mut ExecutionEngine<H>, opcode: OpCode) -> Result<(), VMError> {
    let shift = pop_shift(engine)?;
    if shift == 0 {
        return Ok(());
    }
    let x = engine.pop_integer()?;
    let result = match opcode {
        OpCode::Shl => x << shift,
        _ => x >> shift,
    };
    push_integer(engine, result)
}

pub(super) fn not<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let x = engine.pop_bool()?;
    engine.push(StackItem::Boolean(!x))
}

pub(super) fn bool_binary<H: Host>(engine: &mut ExecutionEngine<H>, opcode: OpCode) -> Result<(), VMError> {
    let x2 = engine.pop_bool()?;
    let x1 = engine.pop_bool()?;
    let result = match opcode {
        OpCode::BoolAnd => x1 && x2,
        _ => x1 || x2,
    };
    engine.push(StackItem::Boolean(result))
}

pub(super) fn nz<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let x = engine.pop_integer()?;
    engine.push(StackItem::Boolean(!x.is_zero()))
}

pub(super) fn num_equal<H: Host>(engine: &mut ExecutionEngine<H>, opcode: OpCode) -> Result<(), VMError> {
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    let equal = x1 == x2;
    engine.push(StackItem::Boolean(match opcode {
        OpCode::NumEqual => equal,
        _ => !equal,
    }))
}

/// `LT`, `LE`, `GT` and `GE`. Comparing with Null yields false.
pub(super) fn compare<H: Host>(engine: &mut ExecutionEngine<H>, opcode: OpCode) -> Result<(), VMError> {
    let x2 = engine.pop()?;
    let x1 = engine.pop()?;
    if x1.is_null() || x2.is_null() {
        return engine.push(StackItem::Boolean(false));
    }
    let (x1, x2) = (x1.get_integer()?, x2.get_integer()?);
    let result = match opcode {
        OpCode::Lt => x1 < x2,
        OpCode::Le => x1 <= x2,
        OpCode::Gt => x1 > x2,
        _ => x1 >= x2,
    };
    engine.push(StackItem::Boolean(result))
}

/// `WITHIN`: whether `a <= x < b`.
pub(super) fn within<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let b = engine.pop_integer()?;
    let a = engine.pop_integer()?;
    let x = engine.pop_integer()?;
    engine.push(StackItem::Boolean(a <= x && x < b))
}
