// Public API
pub use errors::AiCodeError;
pub use models::AiCode;
pub use repository::{AiCodeRepository, InMemoryAiCodeRepository, PostgresAiCodeRepository};
pub use service::{AiCodeService, OwnershipVerifier};

// Internal modules
mod errors;
pub mod handlers;
pub mod models;
pub mod repository;
mod service;
