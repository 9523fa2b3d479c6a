pub mod anthropic;
pub mod cache;
pub mod openai;
mod prompt;
mod schema;
mod utils;

pub use anthropic::{ClaudeConfig, ClaudeLlmProvider};
pub use cache::{LlmCachePool, LlmPlanCache};
pub use openai::{OpenAiConfig, OpenAiLlmProvider};
