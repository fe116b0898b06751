pub mod config;
pub mod messaging;
pub mod validator;
