//! Healer Common - shared types for the application healer.
//!
//! Holds everything the engine needs that does not touch the network or disk:
//! the domain model, the remote command validator, the pattern learning
//! arithmetic and the error taxonomy.

pub mod command_validator;
pub mod error;
pub mod pattern;
pub mod types;

pub use command_validator::{
    validate, validate_all, validate_command, CommandValidation, ValidatedCommand,
};
pub use error::{HealerError, HealerResult};
pub use pattern::{ApprovalPolicy, HealingPattern, PatternSignature};
pub use types::*;
