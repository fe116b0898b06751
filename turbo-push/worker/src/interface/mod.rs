pub mod http;
pub mod runtime;
