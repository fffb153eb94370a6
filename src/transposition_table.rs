//! Transposition Cache
//!
//! Memoizes the values of search nodes. A state is canonicalized as its lexically sorted fact names, so two states with
//! the same facts share entries however they were built.
//!
//! Keys include the alpha-beta window the value was computed under. A value found under one window is not always the
//! exact minimax value, so reusing it is an approximation; including the window limits reuse to identical windows.
//!
//! Only exact values are stored. Values that depend on a heuristic estimate, or that were cut short by cancellation,
//! must never be written.
//!
//! A cache can also be seeded with the true values of max nodes, keyed by state alone. These come from a search with no
//! window (see [`SearchEngine::head_start`](crate::SearchEngine::head_start)) and answer a max-node lookup under any
//! window.

use std::collections::HashMap;

use crate::state::{MachineState, Move};
use crate::state_machine::StateMachine;

/// Canonical identity of a search node: the state's sorted fact names and the alpha-beta window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranspositionKey {
    facts: String,
    alpha: i32,
    beta: i32,
}

impl TranspositionKey {
    pub fn facts(&self) -> &str {
        &self.facts
    }
}

/// Builds canonical keys for the states of one state machine.
#[derive(Debug, Clone, Copy)]
pub struct Canonicalizer<'a> {
    machine: &'a StateMachine,
}

impl<'a> Canonicalizer<'a> {
    pub fn new(machine: &'a StateMachine) -> Self {
        Self { machine }
    }

    /// Returns the state's fact names, sorted and joined by single spaces.
    pub fn state_key(&self, state: &MachineState) -> String {
        self.machine.fact_names(state).join(" ")
    }

    pub fn key(&self, state: &MachineState, alpha: i32, beta: i32) -> TranspositionKey {
        TranspositionKey {
            facts: self.state_key(state),
            alpha,
            beta,
        }
    }
}

/// Lookup counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub max_lookups: u64,
    pub max_hits: u64,
    pub min_lookups: u64,
    pub min_hits: u64,
}

/// Two memo tables: the best value of a max node, and the worst value of each of our moves at a min node.
#[derive(Debug, Default)]
pub struct TranspositionCache {
    seeded: HashMap<String, u8>,
    max: HashMap<TranspositionKey, u8>,
    min: HashMap<TranspositionKey, HashMap<Move, u8>>,
    stats: CacheStats,
}

impl TranspositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value of a max node.
    pub fn max_value(&mut self, key: &TranspositionKey) -> Option<u8> {
        self.stats.max_lookups += 1;
        let value = self.seeded.get(key.facts()).or_else(|| self.max.get(key)).copied();
        if value.is_some() {
            self.stats.max_hits += 1;
        }
        value
    }

    /// Records the exact value of a max node.
    pub fn store_max(&mut self, key: TranspositionKey, value: u8) {
        self.max.insert(key, value);
    }

    /// Records the true value of the max node of a state, given by its canonical state key.
    pub fn seed(&mut self, facts: String, value: u8) {
        self.seeded.insert(facts, value);
    }

    /// Number of seeded entries.
    pub fn seeded_len(&self) -> usize {
        self.seeded.len()
    }

    /// Returns the cached value of playing `m` at a min node.
    pub fn min_value(&mut self, key: &TranspositionKey, m: &Move) -> Option<u8> {
        self.stats.min_lookups += 1;
        let value = self.min.get(key).and_then(|moves| moves.get(m)).copied();
        if value.is_some() {
            self.stats.min_hits += 1;
        }
        value
    }

    /// Records the exact value of playing `m` at a min node.
    pub fn store_min(&mut self, key: TranspositionKey, m: Move, value: u8) {
        self.min.entry(key).or_default().insert(m, value);
    }

    /// Number of max-node entries.
    pub fn max_len(&self) -> usize {
        self.max.len()
    }

    /// Number of min-node entries, counting each move separately.
    pub fn min_len(&self) -> usize {
        self.min.values().map(HashMap::len).sum()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Drops every entry and resets the counters.
    pub fn clear(&mut self) {
        self.seeded.clear();
        self.max.clear();
        self.min.clear();
        self.stats = CacheStats::default();
    }
}
