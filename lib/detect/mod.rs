//! Project auto-detection.
//!
//! A scored classifier over a shallow directory listing. Each language
//! detector contributes an additive score from the signals it recognizes;
//! the highest-scoring detector wins, ties broken by detector order. The
//! caller treats a winner below the confidence threshold as no detection.
//!
//! Scoring is pure; the listing provider in [`listing`] does all I/O.

mod listing;
mod scoring;

use serde::Serialize;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use listing::*;
pub use scoring::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The outcome of classifying a project tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetection {
    /// The detected language.
    pub language: String,

    /// The detected framework, when a signal identified one.
    pub framework: Option<String>,

    /// The detected package manager, when a signal identified one.
    pub package_manager: Option<String>,

    /// The template the detection maps to.
    pub template: String,

    /// The detector's total score, clamped to `[0, 1]`.
    pub confidence: f64,
}
