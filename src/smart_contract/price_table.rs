//! Opcode prices, resolved once into a dense table.

use crate::virtual_machine::isa::OpCode;

/// Base price of every opcode, indexed by opcode byte.
///
/// Bytes that are not opcodes price at 0; they never reach the metering hook because
/// decoding rejects them first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PriceTable {
    prices: [i64; 256],
}

impl PriceTable {
    pub fn new() -> Self {
        let mut prices = [0i64; 256];
        for opcode in OpCode::ALL {
            prices[*opcode as usize] = opcode.base_price();
        }
        Self { prices }
    }

    /// Overrides one price, e.g. to model a repricing hardfork.
    pub fn with_price(mut self, opcode: OpCode, price: i64) -> Self {
        self.prices[opcode as usize] = price;
        self
    }

    pub fn price(&self, opcode: OpCode) -> i64 {
        self.prices[opcode as usize]
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::new()
    }
}
