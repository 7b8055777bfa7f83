pub mod ark;
pub mod claude;
mod client;
pub mod deepseek;
mod error;
mod event;
pub mod gemini;
pub mod openai;
pub mod qianfan;
pub mod qwen;
pub mod retry;
mod tool_choice;

pub use client::*;
pub use error::*;
pub use event::*;
pub use tool_choice::*;
