//! Wire types and pure converters between the Claude, `OpenAI`, Gemini and
//! Responses dialects.
//!
//! Nothing in here does I/O. Every function is safe to call from any number
//! of concurrent streams.

pub mod anthropic_types;
pub mod canonical;
pub mod gemini;
pub mod gemini_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod responses;
pub mod responses_types;
pub mod schema;
pub mod streaming;
pub mod usage;
