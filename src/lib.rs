//! Circuit Game Player
//!
//! This crate provides a player for general games whose rules have been compiled into a boolean circuit (a
//! proposition network). It answers the queries a match harness makes (initial state, legal moves, successor state,
//! termination and goal values) and chooses moves within a deadline.
//!
//! # Overview
//!
//! 1. **Describe the circuit**: build a [`CircuitGraph`] with [`CircuitBuilder`], or load one with
//!    [`CircuitGraph::from_json`].
//! 2. **Create a [`StateMachine`]**: evaluates states by propagating truth values through the circuit in topological
//!    order. It is immutable, so it can be shared between threads.
//! 3. **Create a [`SearchEngine`]**: runs iterative-deepening alpha-beta search with a [`TranspositionCache`], an
//!    optional [`Heuristic`] at the depth limit, and optional help from the [`StructuralAnalyzer`] (dead-state pruning
//!    and factoring into independent sub-games). [`SearchConfig`] selects the variant.
//! 4. **Ask for a move**: [`SearchEngine::get_best_move`] always returns a legal move before the deadline.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//! use circuit_game_player::{CircuitBuilder, MonteCarlo, SearchConfig, SearchEngine, StateMachine};
//!
//! // Race to the third step. Stepping twice wins; waiting loses once the clock runs out.
//! let mut b = CircuitBuilder::new();
//! let runner = b.role("runner");
//! let init = b.init();
//! let at1 = b.base("(at 1)");
//! let at2 = b.base("(at 2)");
//! let at3 = b.base("(at 3)");
//! let late = b.base("(late)");
//! let step = b.input(runner, "step");
//! let wait = b.input(runner, "wait");
//!
//! // (at 1) holds initially; a step advances, a wait stays put.
//! let stay1 = b.and(&[at1, wait]);
//! let next1 = b.or(&[init, stay1]);
//! b.next(at1, next1);
//! let moved1 = b.and(&[at1, step]);
//! let stay2 = b.and(&[at2, wait]);
//! let next2 = b.or(&[moved1, stay2]);
//! b.next(at2, next2);
//! let moved2 = b.and(&[at2, step]);
//! let next3 = b.or(&[at3, moved2]);
//! b.next(at3, next3);
//! // Waiting even once is too late.
//! let next_late = b.or(&[late, wait]);
//! b.next(late, next_late);
//!
//! let always = b.constant(true);
//! b.legal(runner, "step", always);
//! b.legal(runner, "wait", always);
//! let on_time = b.not(late);
//! let won = b.and(&[at3, on_time]);
//! let win = b.view("win", won);
//! let lost = b.not(win);
//! let over = b.or(&[at3, late]);
//! b.terminal(over);
//! b.goal(runner, 100, win);
//! b.goal(runner, 0, lost);
//!
//! let machine = Arc::new(StateMachine::new(b.build().unwrap()).unwrap());
//! let role = machine.role("runner").unwrap();
//! let state = machine.initial_state();
//!
//! let config = SearchConfig { seed: Some(1), ..SearchConfig::default() };
//! let mut engine = SearchEngine::new(Arc::clone(&machine), config)
//!     .with_heuristic(MonteCarlo::seeded(Default::default(), 1));
//! let deadline = Instant::now() + Duration::from_secs(5);
//! let chosen = engine.get_best_move(&state, role, deadline).unwrap();
//! assert_eq!(chosen.term(), "step");
//!
//! let state = machine.next_state(&state, &[chosen]).unwrap();
//! let chosen = engine.get_best_move(&state, role, deadline).unwrap();
//! let state = machine.next_state(&state, &[chosen]).unwrap();
//! assert!(machine.is_terminal(&state));
//! assert_eq!(machine.goal(&state, role).unwrap(), 100);
//! ```

pub mod analyzer;
pub mod cancel;
pub mod circuit;
pub mod config;
pub mod engine;
pub mod error;
pub mod heuristic;
pub mod minimax;
pub mod rollout;
pub mod state;
pub mod state_machine;
pub mod transposition_table;

#[cfg(test)]
mod fixtures;

pub use analyzer::{Factor, StructuralAnalyzer, MAX_DETERMINANTS};
pub use cancel::CancelToken;
pub use circuit::{
    CircuitBuilder, CircuitDescription, CircuitGraph, Component, ComponentId, ComponentKind, ComponentSpec, PropKind,
    SpecKind,
};
pub use config::{HeuristicKind, MonteCarloConfig, SearchConfig};
pub use engine::{Decision, DeepeningOutcome, SearchEngine, SearchStats};
pub use error::{AnalysisError, CircuitError, ConfigError, GameError};
pub use heuristic::{Focus, Heuristic, HybridMobility, Mobility, OpponentMobility, Weighted};
pub use minimax::SearchResult;
pub use rollout::{FocusedMonteCarlo, MonteCarlo};
pub use state::{JointMove, MachineState, Move, Role};
pub use state_machine::{Evaluation, StateMachine};
pub use transposition_table::{CacheStats, Canonicalizer, TranspositionCache, TranspositionKey};
