mod http;
mod logging;

pub use http::*;
pub use logging::*;
