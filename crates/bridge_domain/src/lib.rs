mod component;
mod document;
mod error;
mod http_config;
mod http_infra;
mod message;
mod retry;
mod retry_config;
mod tool;
mod transformer;

pub use component::*;
pub use document::*;
pub use error::*;
pub use http_config::*;
pub use http_infra::*;
pub use message::*;
pub use retry::*;
pub use retry_config::*;
pub use tool::*;
pub use transformer::*;
