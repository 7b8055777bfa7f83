mod client;
mod entity;
mod error;
mod index_builder;
mod indexer;
#[cfg(test)]
mod mock;
mod rest;
mod retriever;
pub mod search_mode;
mod types;

pub use client::*;
pub use entity::*;
pub use error::*;
pub use index_builder::*;
pub use indexer::*;
pub use rest::*;
pub use retriever::*;
pub use types::*;
