pub mod errors;
pub mod model;
pub mod repositories;
pub mod service;

pub use errors::SubmissionError;
pub use model::{PushRequestItem, Submission, TubeDirectory};
