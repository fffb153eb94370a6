//! Depth-Limited Alpha-Beta Search
//!
//! This module implements one pass of the iterative-deepening search: a minimax search with alpha-beta pruning over
//! the joint moves of a [`StateMachine`], bounded to a depth limit and memoized in a [`TranspositionCache`].
//!
//! The searching role maximizes. Every other role is treated as one adversary that minimizes, so a turn is split into
//! a max node (the role picks its move) and a min node (the other roles pick theirs, with the role's move fixed). The
//! root is a list of min nodes, one per candidate move, at depth 0; max nodes below them are at depth 1, 2 and so on.
//! A max node deeper than the depth limit is scored by the heuristic instead of being expanded.
//!
//! # Notes
//! - Every node value is tagged with how it was obtained (see [`SearchResult`]). Only exact values are cached.
//! - The search polls its [`CancelToken`] at every node and in every joint-move loop. A cancelled branch is
//!   [`SearchResult::Unknown`].
//! - Cache keys include the alpha-beta window, so a value is only reused under the window it was computed in.
//!
//! [`Solver`] is the unbounded counterpart: plain minimax with no depth limit and no window, whose values can seed a
//! cache before the match starts.

use std::collections::HashMap;

use log::warn;

use crate::analyzer::{Factor, StructuralAnalyzer};
use crate::cancel::CancelToken;
use crate::error::GameError;
use crate::heuristic::Heuristic;
use crate::state::{JointMove, MachineState, Move, Role};
use crate::state_machine::{cross_product, Evaluation, StateMachine};
use crate::transposition_table::{Canonicalizer, TranspositionCache};

/// The value of a search node, tagged with how much it can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// Proven by search down to terminal states (or cached from such a search).
    Exact(u8),
    /// Depends on a heuristic estimate at the search frontier.
    Heuristic(u8),
    /// Could not be resolved before cancellation.
    Unknown,
}

impl SearchResult {
    pub fn value(self) -> Option<u8> {
        match self {
            SearchResult::Exact(v) | SearchResult::Heuristic(v) => Some(v),
            SearchResult::Unknown => None,
        }
    }

    pub fn is_exact(self) -> bool {
        matches!(self, SearchResult::Exact(_))
    }

    // Orders numeric results by value, and an exact value ahead of an estimate of the same value.
    fn rank(self) -> Option<(u8, bool)> {
        self.value().map(|v| (v, self.is_exact()))
    }
}

// Holds static information pertaining to one pass.
pub(crate) struct Context<'a> {
    pub machine: &'a StateMachine,
    pub role: Role,
    pub depth_limit: u32,
    pub caching: bool,
    // Restricts the moves considered to those of one factor.
    pub factor: Option<&'a Factor>,
    // Set when dead states are pruned.
    pub analyzer: Option<&'a StructuralAnalyzer>,
    pub cancel: &'a CancelToken,
}

/// The outcome of one pass over the root moves.
#[derive(Debug, Clone)]
pub(crate) struct PassReport {
    /// The move to play and its value, if any root move was searched.
    pub best: Option<(Move, SearchResult)>,
    /// The value of every root move searched, in search order.
    pub results: Vec<(Move, SearchResult)>,
    /// True if every root move was resolved exactly without cancellation.
    pub complete: bool,
}

// Running best (or worst) value of a node's children.
#[derive(Default)]
struct Tally {
    value: Option<u8>,
    exact: bool,
    inexact: bool,
    unknown: bool,
}

/// One depth-limited pass. Owns nothing; the cache and heuristic outlive it and are reused by the next pass.
pub(crate) struct Search<'a> {
    context: Context<'a>,
    canonicalizer: Canonicalizer<'a>,
    cache: &'a mut TranspositionCache,
    heuristic: Option<&'a mut (dyn Heuristic + 'static)>,
    nodes: u64,
}

impl<'a> Search<'a> {
    pub fn new(
        context: Context<'a>,
        cache: &'a mut TranspositionCache,
        heuristic: Option<&'a mut (dyn Heuristic + 'static)>,
    ) -> Self {
        let canonicalizer = Canonicalizer::new(context.machine);
        Self {
            context,
            canonicalizer,
            cache,
            heuristic,
            nodes: 0,
        }
    }

    /// Number of nodes expanded so far.
    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    /// Searches each root move in order and picks the best.
    ///
    /// The best move is the one with the highest value. A move whose value is unknown is preferred over a move proven
    /// to lose, since it might not.
    pub fn root(&mut self, state: &MachineState, moves: &[Move]) -> Result<PassReport, GameError> {
        let mut alpha = i32::MIN;
        let beta = i32::MAX;
        let mut results = Vec::with_capacity(moves.len());
        let mut won = false;
        for m in moves {
            if self.context.cancel.is_cancelled() {
                break;
            }
            let result = self.min_node(state, m, alpha, beta, 0)?;
            if let Some(v) = result.value() {
                alpha = alpha.max(i32::from(v));
            }
            results.push((m.clone(), result));
            if result == SearchResult::Exact(100) {
                won = true;
                break;
            }
        }

        let cancelled = self.context.cancel.is_cancelled();
        let resolved = won || (results.len() == moves.len() && results.iter().all(|(_, r)| r.is_exact()));
        Ok(PassReport {
            best: choose(&results),
            complete: resolved && !cancelled,
            results,
        })
    }

    // The role picks its move. Returns the best value among the role's moves.
    fn max_node(&mut self, state: &MachineState, alpha: i32, beta: i32, depth: u32) -> Result<SearchResult, GameError> {
        if self.context.cancel.is_cancelled() {
            return Ok(SearchResult::Unknown);
        }
        self.nodes += 1;

        let machine = self.context.machine;
        let evaluation = machine.evaluate(state);
        if evaluation.is_terminal() {
            return Ok(self.terminal_value(&evaluation));
        }

        let key = self.context.caching.then(|| self.canonicalizer.key(state, alpha, beta));
        if let Some(v) = key.as_ref().and_then(|k| self.cache.max_value(k)) {
            return Ok(SearchResult::Exact(v));
        }

        if let Some(analyzer) = self.context.analyzer {
            match analyzer.is_dead_state(state, self.context.role) {
                Ok(true) => return Ok(SearchResult::Exact(0)),
                Ok(false) => {}
                Err(e) => warn!("dead-state check failed: {}", e),
            }
        }

        if depth > self.context.depth_limit {
            return self.estimate(state);
        }

        let moves = self.moves_for(&evaluation, self.context.role)?;
        let mut alpha = alpha;
        let mut best = Tally::default();
        for m in &moves {
            let result = self.min_node(state, m, alpha, beta, depth)?;
            if let Some(v) = best.observe(result, |v, b| v > b) {
                // Beta cutoff: the adversary already has a reply that holds us to less than this. Only a proven win
                // ends the loop on its own; an estimate of 100 may still be matched by one.
                if i32::from(v) >= beta || result == SearchResult::Exact(100) {
                    break;
                }
                alpha = alpha.max(i32::from(v));
            }
        }

        let result = match best {
            Tally { value: Some(100), exact: true, .. } => SearchResult::Exact(100),
            Tally { value: None, .. } | Tally { value: Some(0), unknown: true, .. } => SearchResult::Unknown,
            Tally { value: Some(v), unknown: true, .. } | Tally { value: Some(v), inexact: true, .. } => {
                SearchResult::Heuristic(v)
            }
            Tally { value: Some(v), .. } => SearchResult::Exact(v),
        };
        if let (Some(key), SearchResult::Exact(v)) = (key, result) {
            if !self.context.cancel.is_cancelled() {
                self.cache.store_max(key, v);
            }
        }
        Ok(result)
    }

    // The other roles answer the role's move `m`. Returns the worst value for the role among the joint moves.
    fn min_node(
        &mut self,
        state: &MachineState,
        m: &Move,
        alpha: i32,
        beta: i32,
        depth: u32,
    ) -> Result<SearchResult, GameError> {
        if self.context.cancel.is_cancelled() {
            return Ok(SearchResult::Unknown);
        }

        let key = self.context.caching.then(|| self.canonicalizer.key(state, alpha, beta));
        if let Some(v) = key.as_ref().and_then(|k| self.cache.min_value(k, m)) {
            return Ok(SearchResult::Exact(v));
        }

        let joints = self.joint_moves_with(state, m)?;
        let mut beta = beta;
        let mut worst = Tally::default();
        for joint in &joints {
            if self.context.cancel.is_cancelled() {
                worst.unknown = true;
                break;
            }
            let next = self.context.machine.next_state(state, joint)?;
            let result = self.max_node(&next, alpha, beta, depth + 1)?;
            if let Some(v) = worst.observe(result, |v, w| v < w) {
                // Alpha cutoff: the role already has a move that guarantees more than this.
                if i32::from(v) <= alpha || result == SearchResult::Exact(0) {
                    break;
                }
                beta = beta.min(i32::from(v));
            }
        }

        let result = match worst {
            Tally { value: Some(0), exact: true, .. } => SearchResult::Exact(0),
            Tally { value: None, .. } | Tally { value: Some(100), unknown: true, .. } => SearchResult::Unknown,
            Tally { value: Some(v), unknown: true, .. } | Tally { value: Some(v), inexact: true, .. } => {
                SearchResult::Heuristic(v)
            }
            Tally { value: Some(v), .. } => SearchResult::Exact(v),
        };
        if let (Some(key), SearchResult::Exact(v)) = (key, result) {
            if !self.context.cancel.is_cancelled() {
                self.cache.store_min(key, m.clone(), v);
            }
        }
        Ok(result)
    }

    fn terminal_value(&self, evaluation: &Evaluation<'_>) -> SearchResult {
        match evaluation.goal(self.context.role) {
            Ok(v) => SearchResult::Exact(v),
            Err(e) => {
                warn!("terminal state is not scored: {}", e);
                SearchResult::Unknown
            }
        }
    }

    fn estimate(&mut self, state: &MachineState) -> Result<SearchResult, GameError> {
        let Some(heuristic) = self.heuristic.as_deref_mut() else {
            return Ok(SearchResult::Unknown);
        };
        let value = heuristic.score(self.context.machine, state, self.context.role, self.context.cancel)?;
        Ok(value.map_or(SearchResult::Unknown, SearchResult::Heuristic))
    }

    // The moves of `role` within the factor, or all of its legal moves if the factor offers none.
    fn moves_for(&self, evaluation: &Evaluation<'_>, role: Role) -> Result<Vec<Move>, GameError> {
        if let Some(factor) = self.context.factor {
            let moves = factor.legal_moves(evaluation, role)?;
            if !moves.is_empty() {
                return Ok(moves);
            }
        }
        evaluation.legal_moves(role)
    }

    fn joint_moves_with(&self, state: &MachineState, m: &Move) -> Result<Vec<JointMove>, GameError> {
        let evaluation = self.context.machine.evaluate(state);
        let mut lists = Vec::new();
        for role in self.context.machine.roles() {
            if role == self.context.role {
                lists.push(vec![m.clone()]);
            } else {
                lists.push(self.moves_for(&evaluation, role)?);
            }
        }
        Ok(cross_product(&lists))
    }
}

impl Tally {
    // Folds a child result in. Returns the child's value if it became the new extreme.
    fn observe(&mut self, result: SearchResult, better: impl Fn(u8, u8) -> bool) -> Option<u8> {
        let v = match result {
            SearchResult::Unknown => {
                self.unknown = true;
                return None;
            }
            SearchResult::Heuristic(v) => {
                self.inexact = true;
                v
            }
            SearchResult::Exact(v) => v,
        };
        let replace = match self.value {
            None => true,
            Some(current) => better(v, current) || (v == current && result.is_exact() && !self.exact),
        };
        if replace {
            self.value = Some(v);
            self.exact = result.is_exact();
            Some(v)
        } else {
            None
        }
    }
}

// Picks the best root move: highest value first, then an unknown move over a proven loss. An estimate of 0 is not a
// proven loss.
pub(crate) fn choose(results: &[(Move, SearchResult)]) -> Option<(Move, SearchResult)> {
    let mut best: Option<&(Move, SearchResult)> = None;
    for entry in results {
        if let Some(rank) = entry.1.rank() {
            if best.map_or(true, |b| b.1.rank().map_or(true, |r| rank > r)) {
                best = Some(entry);
            }
        }
    }
    let losing = best.map_or(true, |b| b.1 == SearchResult::Exact(0));
    if losing {
        if let Some(unknown) = results.iter().find(|(_, r)| *r == SearchResult::Unknown) {
            return Some(unknown.clone());
        }
    }
    best.cloned()
}

/// Exact minimax values of max nodes, found with no depth limit, no window and no heuristic.
///
/// Values are keyed by canonical state. A node whose subtree could not be resolved, because the search was cancelled or
/// reached a terminal state with an ill-defined goal, gets no value unless a proven win (or loss) decides it anyway.
pub(crate) struct Solver<'a> {
    machine: &'a StateMachine,
    role: Role,
    cancel: &'a CancelToken,
    canonicalizer: Canonicalizer<'a>,
    values: HashMap<String, u8>,
    nodes: u64,
}

impl<'a> Solver<'a> {
    pub fn new(machine: &'a StateMachine, role: Role, cancel: &'a CancelToken) -> Self {
        Self {
            machine,
            role,
            cancel,
            canonicalizer: Canonicalizer::new(machine),
            values: HashMap::new(),
            nodes: 0,
        }
    }

    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    /// The values found so far, by canonical state key.
    pub fn into_values(self) -> HashMap<String, u8> {
        self.values
    }

    /// Returns the value of `state` for the role, or `None` if it could not be resolved.
    pub fn solve(&mut self, state: &MachineState) -> Result<Option<u8>, GameError> {
        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        self.nodes += 1;

        let evaluation = self.machine.evaluate(state);
        if evaluation.is_terminal() {
            return Ok(self.terminal_value(&evaluation).value());
        }
        let key = self.canonicalizer.state_key(state);
        if let Some(&v) = self.values.get(&key) {
            return Ok(Some(v));
        }

        let mut best: Option<u8> = None;
        let mut resolved = true;
        for m in evaluation.legal_moves(self.role)? {
            match self.worst_reply(state, &m)? {
                Some(v) => best = Some(best.map_or(v, |b| b.max(v))),
                None => resolved = false,
            }
            if best == Some(100) {
                break;
            }
        }
        let value = match best {
            Some(100) => Some(100),
            Some(v) if resolved => Some(v),
            _ => None,
        };
        if let Some(v) = value {
            self.values.insert(key, v);
        }
        Ok(value)
    }

    // The value of playing `m` against the worst joint reply, or `None` if a reply could not be resolved.
    fn worst_reply(&mut self, state: &MachineState, m: &Move) -> Result<Option<u8>, GameError> {
        let mut worst: Option<u8> = None;
        for joint in self.machine.legal_joint_moves_with(state, self.role, m)? {
            let next = self.machine.next_state(state, &joint)?;
            match self.solve(&next)? {
                Some(0) => return Ok(Some(0)),
                Some(v) => worst = Some(worst.map_or(v, |w| w.min(v))),
                None => return Ok(None),
            }
        }
        Ok(worst)
    }

    fn terminal_value(&self, evaluation: &Evaluation<'_>) -> SearchResult {
        match evaluation.goal(self.role) {
            Ok(v) => SearchResult::Exact(v),
            Err(e) => {
                warn!("terminal state is not scored: {}", e);
                SearchResult::Unknown
            }
        }
    }
}
