//! Context window construction: tokenization, budgets and trimming.
//!
//! 1. **[`tokenizer`]**: the [`Tokenizer`] collaborator seam and an offline
//!    [`EstimatingTokenizer`] (3.5 chars per token plus per-message template
//!    overhead).
//!
//! 2. **[`token_cache`]**: [`TokenCache`] memoizes per-message token
//!    sequences keyed by `(model, role + sender + content)`.
//!
//! 3. **[`budget`]**: [`TokenBudget`] is the profile's history limit minus the
//!    tokens reserved for the reply.
//!
//! 4. **[`builder`]**: [`ContextBuilder`] turns system prompts and history
//!    into a chronological, budget-bounded message list using either the
//!    additive or the subtractive [`TrimStrategy`].

pub mod budget;
pub mod builder;
pub mod token_cache;
pub mod tokenizer;

pub use budget::{DEFAULT_HISTORY_TOKENS, TokenBudget};
pub use builder::{BuiltContext, ContextBuilder, TrimStrategy};
pub use token_cache::{TokenCache, Tokens};
pub use tokenizer::{
    DEFAULT_CHARS_PER_TOKEN, EstimatingTokenizer, TokenizeFuture, Tokenizer,
};
