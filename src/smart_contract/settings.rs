//! Network-wide parameters consulted by the runtime.

use std::collections::BTreeMap;

/// Protocol upgrades gated by block height.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Hardfork {
    Aspidochelone,
    Basilisk,
    Cockatrice,
    Domovoi,
}

/// Protocol parameters.
///
/// A hardfork missing from `hardforks` is never enabled; one mapped to height 0 is enabled
/// from genesis.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProtocolSettings {
    /// Network magic, mixed into every signed payload.
    pub network: u32,
    pub validators_count: usize,
    pub hardforks: BTreeMap<Hardfork, u32>,
    /// Multiplier applied to opcode and syscall base prices.
    pub exec_fee_factor: i64,
    /// Price per byte of storage, in datoshi.
    pub storage_price: i64,
    pub max_traceable_blocks: u32,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            network: 0x334F_454E,
            validators_count: 7,
            hardforks: [
                Hardfork::Aspidochelone,
                Hardfork::Basilisk,
                Hardfork::Cockatrice,
                Hardfork::Domovoi,
            ]
            .into_iter()
            .map(|hardfork| (hardfork, 0))
            .collect(),
            exec_fee_factor: DEFAULT_EXEC_FEE_FACTOR,
            storage_price: DEFAULT_STORAGE_PRICE,
            max_traceable_blocks: 2_102_400,
        }
    }
}

pub const DEFAULT_EXEC_FEE_FACTOR: i64 = 30;
pub const DEFAULT_STORAGE_PRICE: i64 = 100_000;

impl ProtocolSettings {
    /// Whether `hardfork` is active at block `index`.
    pub fn is_hardfork_enabled(&self, hardfork: Hardfork, index: u32) -> bool {
        self.hardforks
            .get(&hardfork)
            .is_some_and(|height| index >= *height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_all_hardforks_from_genesis() {
        let settings = ProtocolSettings::default();
        assert!(settings.is_hardfork_enabled(Hardfork::Basilisk, 0));
        assert_eq!(settings.exec_fee_factor, 30);
        assert_eq!(settings.storage_price, 100_000);
    }

    #[test]
    fn hardfork_gated_by_height() {
        let mut settings = ProtocolSettings::default();
        settings.hardforks.insert(Hardfork::Basilisk, 100);
        settings.hardforks.remove(&Hardfork::Domovoi);
        assert!(!settings.is_hardfork_enabled(Hardfork::Basilisk, 99));
        assert!(settings.is_hardfork_enabled(Hardfork::Basilisk, 100));
        assert!(!settings.is_hardfork_enabled(Hardfork::Domovoi, u32::MAX));
    }
}
