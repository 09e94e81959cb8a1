use crate::expr::EvalError;

/// Instruction-level charges applied while evaluating an expression.
pub mod costs {
    /// Every expression node visited.
    pub const NODE: u64 = 1;
    /// Resolving a reference, plus one per path segment walked.
    pub const REF: u64 = 2;
    /// Applying an operator, plus one per argument.
    pub const OP: u64 = 2;
    /// Text-producing operators pay one extra unit per this many bytes of output.
    pub const TEXT_BYTES_PER_UNIT: u64 = 64;
}

/// Fuel counter for a single evaluation. Evaluations never share a meter.
#[derive(Debug, Clone)]
pub struct GasMeter {
    limit: u64,
    used: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Consumes `amount`. Running past the limit exhausts the meter.
    pub fn charge(&mut self, amount: u64) -> Result<(), EvalError> {
        let next = self.used.saturating_add(amount);
        if next > self.limit {
            self.used = self.limit;
            return Err(EvalError::OutOfGas { limit: self.limit });
        }
        self.used = next;
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_pins_usage_to_limit() {
        let mut meter = GasMeter::new(10);
        meter.charge(7).unwrap();
        assert_eq!(meter.remaining(), 3);
        assert_eq!(meter.charge(4), Err(EvalError::OutOfGas { limit: 10 }));
        assert_eq!(meter.used(), 10);
        assert_eq!(meter.remaining(), 0);
    }
}
