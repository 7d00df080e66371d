//! healerd - application healer engine
//!
//! Diagnoses managed applications with a catalog of remote checks, classifies
//! failures into a diagnosis, and drives risk-graded remediation with backup,
//! verification and rollback. Outcomes feed a pattern store that promotes
//! reliable remediations to unattended healing.

pub mod checks;
pub mod config;
pub mod db;
pub mod diagnosis;
pub mod engine;
pub mod healing;
pub mod patterns;
pub mod remote;
pub mod shell;

pub use engine::Healer;
