//! Advisory cost estimate for aggregated validation. Display only; nothing in
//! the validation path reads it.

use serde::{Deserialize, Serialize};

/// Cost of validating one operation's own signature
pub const NAIVE_VALIDATION_GAS: u64 = 30_000;
/// Fixed cost of validating one aggregated signature
pub const AGGREGATED_BASE_GAS: u64 = 30_000;
/// Marginal cost per operation inside an aggregated batch
pub const AGGREGATED_PER_OP_GAS: u64 = 5_000;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasEstimate {
    pub operation_count: u64,
    pub naive_gas: u64,
    pub aggregated_gas: u64,
    pub savings: u64,
    /// Savings as basis points of the naive cost
    pub savings_bps: u64,
}

pub fn calculate_gas_savings(operation_count: u64) -> GasEstimate {
    let naive_gas = NAIVE_VALIDATION_GAS.saturating_mul(operation_count);
    let aggregated_gas = if operation_count == 0 {
        0
    } else {
        AGGREGATED_BASE_GAS.saturating_add(AGGREGATED_PER_OP_GAS.saturating_mul(operation_count))
    };
    let savings = naive_gas.saturating_sub(aggregated_gas);
    let savings_bps = if naive_gas == 0 {
        0
    } else {
        ((savings as u128 * 10_000) / naive_gas as u128) as u64
    };

    GasEstimate {
        operation_count,
        naive_gas,
        aggregated_gas,
        savings,
        savings_bps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_operation_saves_nothing() {
        let est = calculate_gas_savings(1);
        assert_eq!(est.savings, 0);
        assert_eq!(est.savings_bps, 0);
        assert_eq!(calculate_gas_savings(0).savings, 0);
    }

    #[test]
    fn test_savings_strictly_increase() {
        let mut previous = calculate_gas_savings(1).savings;
        for n in 2..200 {
            let current = calculate_gas_savings(n).savings;
            assert!(current > previous, "n = {}", n);
            previous = current;
        }
    }

    #[test]
    fn test_known_values() {
        let est = calculate_gas_savings(10);
        assert_eq!(est.naive_gas, 300_000);
        assert_eq!(est.aggregated_gas, 80_000);
        assert_eq!(est.savings, 220_000);
        assert_eq!(est.savings_bps, 7_333);
    }
}
