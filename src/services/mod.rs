//! External collaborator clients and process-level services.
//!
//! Everything the orchestration core consumes but does not own: the
//! reasoning model, the vision service, OS input injection, audio
//! feedback, and log setup.

pub mod audio;
pub mod input;
pub mod logger;
pub mod perception;
pub mod reasoning;
