pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use handler::AppState;
pub use router::build_router;
pub use server::serve;
