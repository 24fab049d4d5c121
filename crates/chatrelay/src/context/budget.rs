//! Token budget for the composed context.
//!
//! The budget is the model profile's history limit minus the tokens reserved
//! for the completion itself, so the model always has room to answer.

/// Default history limit in tokens for a model profile.
pub const DEFAULT_HISTORY_TOKENS: usize = 2048;

/// Budget `B = limit − reserve` used by the context builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    /// Maximum tokens the composed request may occupy.
    limit: usize,
    /// Tokens reserved for the model's reply (`max_tokens`).
    reserve: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TOKENS, 0)
    }
}

impl TokenBudget {
    pub fn new(limit: usize, reserve: usize) -> Self {
        Self { limit, reserve }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn reserve(&self) -> usize {
        self.reserve
    }

    /// Tokens available to prompts and history.
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.reserve)
    }

    /// Whether `tokens` fits in the available budget.
    pub fn fits(&self, tokens: usize) -> bool {
        tokens <= self.available()
    }

    /// Compact summary for logging, e.g. `"1532/1748 tokens (87.6%)"`.
    pub fn usage_string(&self, tokens: usize) -> String {
        let available = self.available();
        let pct = if available == 0 {
            100.0
        } else {
            tokens as f64 / available as f64 * 100.0
        };
        format!("{tokens}/{available} tokens ({pct:.1}%)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_subtracts_reserve() {
        let budget = TokenBudget::new(2048, 300);
        assert_eq!(budget.available(), 1748);
        assert!(budget.fits(1748));
        assert!(!budget.fits(1749));
    }

    #[test]
    fn reserve_larger_than_limit_saturates() {
        let budget = TokenBudget::new(100, 300);
        assert_eq!(budget.available(), 0);
        assert!(budget.fits(0));
        assert!(!budget.fits(1));
    }

    #[test]
    fn usage_string_format() {
        let budget = TokenBudget::new(1000, 0);
        assert_eq!(budget.usage_string(500), "500/1000 tokens (50.0%)");
        assert_eq!(TokenBudget::new(0, 0).usage_string(3), "3/0 tokens (100.0%)");
    }
}
