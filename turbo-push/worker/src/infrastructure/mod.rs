pub mod apns;
pub mod config;
pub mod retry;
