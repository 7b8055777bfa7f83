mod client;
mod error;
mod indexer;
mod request;
mod retriever;
pub mod search_mode;

pub use client::*;
pub use error::*;
pub use indexer::*;
pub use request::*;
pub use retriever::*;
