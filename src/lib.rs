//! KEA: a concurrent multi-provider LLM ensemble pipeline.
//!
//! Fans a question out across independently configured LLM providers
//! through four stages — initial answers, mixture-of-agents refinement,
//! peer evaluation, and Surprisingly-Popular-elected synthesis — streaming
//! progress as Server-Sent Events the whole way through.

pub mod config;
pub mod error;
pub mod messages;
pub mod parser;
pub mod pipeline;
pub mod providers;
