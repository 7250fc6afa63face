mod manager;
pub mod prompt;

pub use manager::{
    ChatAnswer, ChatError, ChatManager, FixedHealthSummary, HealthSummarySource, Result,
    GENERATION_FAILED_MESSAGE,
};
