//! Volcengine Ark chat models: the OpenAI style chat endpoint and the
//! Responses API.

mod chat;
pub mod extra;
mod responses;
mod types;

pub use chat::*;
pub use responses::{ArkResponsesChatModel, CacheInfo, ResponsesConfig};
pub use types::*;
