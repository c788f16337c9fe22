pub mod chat;
pub mod error;
pub mod events;
pub mod model;
pub mod prompts;
pub mod schema;

pub use error::{RemedyError, ServiceResult};
pub use model::{ClarificationStep, Remedy, RemedyQuery, RemedyResult, SelectionSet, Theme};
