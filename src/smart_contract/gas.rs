/// Number of gas categories tracked by [`GasProfile`].
const GAS_CATEGORY_COUNT: usize = 5;

/// Categories of gas consumption for profiling and debugging.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum GasCategory {
    /// Base cost of executed opcodes.
    Opcode = 0,
    /// Fixed price of interop services.
    Syscall = 1,
    /// Storage writes, priced per byte.
    Storage = 2,
    /// Signature checks.
    Crypto = 3,
    /// Contract calls and `BurnGas`.
    Call = 4,
}

impl GasCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            GasCategory::Opcode => "Opcode",
            GasCategory::Syscall => "Syscall",
            GasCategory::Storage => "Storage",
            GasCategory::Crypto => "Crypto",
            GasCategory::Call => "Call",
        }
    }

    /// All categories in discriminant order.
    const ALL: [GasCategory; GAS_CATEGORY_COUNT] = [
        GasCategory::Opcode,
        GasCategory::Syscall,
        GasCategory::Storage,
        GasCategory::Crypto,
        GasCategory::Call,
    ];
}

/// Gas consumption profile for debugging and optimization.
///
/// Tracks how gas is distributed across execution categories. Backed by a flat array
/// indexed by [`GasCategory`] discriminant for branch-free accumulation on the hot path.
#[derive(Clone, Debug, Default)]
pub struct GasProfile {
    counts: [i64; GAS_CATEGORY_COUNT],
}

impl GasProfile {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn add(&mut self, category: GasCategory, amount: i64) {
        let slot = &mut self.counts[category as usize];
        *slot = slot.saturating_add(amount);
    }

    pub fn get(&self, category: GasCategory) -> i64 {
        self.counts[category as usize]
    }

    /// Returns the total gas across all categories.
    pub fn total(&self) -> i64 {
        self.counts.iter().fold(0i64, |acc, &v| acc.saturating_add(v))
    }

    /// Returns an iterator over all categories and their gas costs.
    pub fn iter(&self) -> impl Iterator<Item = (GasCategory, i64)> {
        GasCategory::ALL.into_iter().zip(self.counts)
    }
}
