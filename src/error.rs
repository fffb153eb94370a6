//! Error types
//!
//! The harness only ever sees [`GameError`], which reports an ill-formed ruleset. The other error types describe
//! problems that are caught before or around a search and never escape a move decision.

use thiserror::Error;

/// Failures of a state machine query. These signal an ill-formed ruleset upstream and are not recoverable at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// Zero or more than one goal proposition of the role is true.
    #[error("goal of role `{role}` is ill-defined: {count} goal propositions are true")]
    GoalDefinition { role: String, count: usize },

    /// A move term has no corresponding input proposition.
    #[error("move `{term}` of role `{role}` has no input proposition")]
    MoveDefinition { role: String, term: String },

    /// A successor could not be computed.
    #[error("transition is undefined: {0}")]
    TransitionDefinition(String),

    /// A move was requested for a role that has no legal move in the state.
    #[error("role `{0}` has no legal move")]
    NoLegalMove(String),
}

/// A malformed circuit. Indicates a defect in the compiled ruleset, reported once at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CircuitError {
    #[error("component {0} does not exist")]
    UnknownComponent(usize),

    #[error("role `{0}` is declared more than once")]
    DuplicateRole(String),

    #[error("role `{0}` is not declared")]
    UnknownRole(String),

    #[error("the circuit has no {0} proposition")]
    Missing(&'static str),

    #[error("the circuit has more than one {0} proposition")]
    Duplicate(&'static str),

    #[error("base proposition `{0}` has no transition")]
    BaseWithoutTransition(String),

    #[error("no evaluation order exists; {remaining} components are on a cycle or depend on one")]
    Cyclic { remaining: usize },

    #[error("invalid circuit description: {0}")]
    Description(String),
}

/// A structural analysis that could not be completed. Callers degrade to "no hint available".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("proposition depends on {count} determinants, more than the limit of {limit}")]
    TooManyDeterminants { count: usize, limit: usize },
}

/// A configuration that could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid search configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
