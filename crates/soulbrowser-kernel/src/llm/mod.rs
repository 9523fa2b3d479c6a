pub mod agent_loop_prompt;
pub mod anthropic;
pub mod cache;
pub mod openai;
pub mod prompt;
pub mod schema;
pub mod utils;
pub mod zhipu;

pub use cache::{LlmCachePool, LlmPlanCache};
