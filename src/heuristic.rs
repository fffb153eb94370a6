//! Depth-Cutoff Heuristics
//!
//! This module defines the [`Heuristic`] trait, which scores a state when the search reaches its depth limit, and a
//! few simple implementations. The sampling heuristics are [`MonteCarlo`](crate::rollout::MonteCarlo) and
//! [`FocusedMonteCarlo`](crate::rollout::FocusedMonteCarlo).
//!
//! A heuristic score is an estimate. The search tags it as such, never caches it, and never lets it override a proven
//! win or loss.

use std::fmt;

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cancel::CancelToken;
use crate::error::GameError;
use crate::state::{MachineState, Role};
use crate::state_machine::StateMachine;

/// An interface for scoring states at the search frontier.
///
/// A heuristic may keep state between calls (a random number generator, a cache of estimates), so scoring takes
/// `&mut self`. A search owns its heuristic; searches that run in parallel each get their own [`fork`](Self::fork).
///
/// # Examples
///
/// ```
/// use circuit_game_player::{CancelToken, GameError, Heuristic, MachineState, Role, StateMachine};
///
/// // Prefers states in which the role has exactly one legal move.
/// struct Forced;
///
/// impl Heuristic for Forced {
///     fn score(
///         &mut self,
///         machine: &StateMachine,
///         state: &MachineState,
///         role: Role,
///         _cancel: &CancelToken,
///     ) -> Result<Option<u8>, GameError> {
///         let moves = machine.legal_moves(state, role)?;
///         Ok(Some(if moves.len() == 1 { 75 } else { 25 }))
///     }
///
///     fn fork(&mut self) -> Box<dyn Heuristic> {
///         Box::new(Forced)
///     }
///
///     fn name(&self) -> &str {
///         "forced"
///     }
/// }
/// ```
pub trait Heuristic: Send {
    /// Estimates the value of a state for a role.
    ///
    /// # Arguments
    /// * `machine` - The state machine of the game
    /// * `state` - The state to score
    /// * `role` - The role whose prospects are estimated
    /// * `cancel` - Polled by long-running estimates
    ///
    /// # Returns
    /// A value in [0, 100], or `None` if no estimate could be made (for example, because the search was cancelled
    /// first).
    ///
    /// # Errors
    /// Only errors that indicate a malformed ruleset are returned.
    fn score(
        &mut self,
        machine: &StateMachine,
        state: &MachineState,
        role: Role,
        cancel: &CancelToken,
    ) -> Result<Option<u8>, GameError>;

    /// Clears anything remembered from a previous decision.
    fn reset(&mut self) {}

    /// Called when the search is cancelled.
    fn on_cancel(&mut self) {}

    /// Returns an independent heuristic of the same kind, for use by a parallel search.
    fn fork(&mut self) -> Box<dyn Heuristic>;

    /// Returns the name used in log messages.
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn Heuristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Heuristic({})", self.name())
    }
}

/// The number of legal moves of the role, capped at 100.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mobility;

impl Heuristic for Mobility {
    fn score(
        &mut self,
        machine: &StateMachine,
        state: &MachineState,
        role: Role,
        _cancel: &CancelToken,
    ) -> Result<Option<u8>, GameError> {
        let count = machine.legal_moves(state, role)?.len();
        Ok(Some(count.min(100) as u8))
    }

    fn fork(&mut self) -> Box<dyn Heuristic> {
        Box::new(*self)
    }

    fn name(&self) -> &str {
        "mobility"
    }
}

/// 100 minus the number of legal moves of the role: prefers states with few options.
#[derive(Debug, Clone, Copy, Default)]
pub struct Focus;

impl Heuristic for Focus {
    fn score(
        &mut self,
        machine: &StateMachine,
        state: &MachineState,
        role: Role,
        _cancel: &CancelToken,
    ) -> Result<Option<u8>, GameError> {
        let count = machine.legal_moves(state, role)?.len();
        Ok(Some(100 - count.min(100) as u8))
    }

    fn fork(&mut self) -> Box<dyn Heuristic> {
        Box::new(*self)
    }

    fn name(&self) -> &str {
        "focus"
    }
}

/// 100 minus the average number of joint moves that answer each of the role's moves: restricts the opponents.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpponentMobility;

impl Heuristic for OpponentMobility {
    fn score(
        &mut self,
        machine: &StateMachine,
        state: &MachineState,
        role: Role,
        cancel: &CancelToken,
    ) -> Result<Option<u8>, GameError> {
        let moves = machine.legal_moves(state, role)?;
        if moves.is_empty() {
            return Ok(None);
        }
        let mut replies = 0;
        for m in &moves {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            replies += machine.legal_joint_moves_with(state, role, m)?.len();
        }
        let average = replies / moves.len();
        Ok(Some(100 - average.min(100) as u8))
    }

    fn fork(&mut self) -> Box<dyn Heuristic> {
        Box::new(*self)
    }

    fn name(&self) -> &str {
        "opponent mobility"
    }
}

/// Compares the mobility of the role with the average mobility of the other roles, on a scale of [1, 99].
///
/// A role with a single legal move has no real choice, so before counting, the state is played forward at random
/// (with that move fixed) until the role has more than one. Reaching a terminal state that way gives its goal value.
#[derive(Debug)]
pub struct HybridMobility {
    rng: StdRng,
}

impl HybridMobility {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    // Counts the legal moves of `role` in `current`, first stepping forward while it has only one. Returns `None` if
    // stepping reached a terminal state or the search was cancelled.
    fn options(
        &mut self,
        machine: &StateMachine,
        current: &mut MachineState,
        role: Role,
        cancel: &CancelToken,
    ) -> Result<Option<usize>, GameError> {
        let mut moves = machine.legal_moves(current, role)?;
        while moves.len() == 1 && !machine.is_terminal(current) {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let Some(joint) = machine.random_joint_move_with(current, role, &moves[0], &mut self.rng)? else {
                break;
            };
            *current = machine.next_state(current, &joint)?;
            if machine.is_terminal(current) {
                return Ok(None);
            }
            moves = machine.legal_moves(current, role)?;
        }
        Ok(Some(moves.len()))
    }
}

impl Default for HybridMobility {
    fn default() -> Self {
        Self::new()
    }
}

impl Heuristic for HybridMobility {
    fn score(
        &mut self,
        machine: &StateMachine,
        state: &MachineState,
        role: Role,
        cancel: &CancelToken,
    ) -> Result<Option<u8>, GameError> {
        let mut current = state.clone();
        let ended = |current: &MachineState| {
            if cancel.is_cancelled() || !machine.is_terminal(current) {
                None
            } else {
                terminal_estimate(machine, current, role)
            }
        };
        if machine.is_terminal(&current) {
            return Ok(ended(&current));
        }
        let Some(ours) = self.options(machine, &mut current, role, cancel)? else {
            return Ok(ended(&current));
        };

        let others: Vec<Role> = machine.roles().into_iter().filter(|&r| r != role).collect();
        let mut theirs = 0.0;
        for &other in &others {
            match self.options(machine, &mut current, other, cancel)? {
                Some(count) => theirs += count as f64,
                None => return Ok(ended(&current)),
            }
        }
        if !others.is_empty() {
            theirs /= others.len() as f64;
        }

        let ours = ours as f64;
        if ours + theirs == 0.0 {
            return Ok(Some(50));
        }
        // -1 when the others are more mobile, 1 when the role is.
        let ratio = (ours - theirs) / (ours + theirs);
        Ok(Some((98.0 * (ratio + 1.0) / 2.0).round() as u8 + 1))
    }

    fn fork(&mut self) -> Box<dyn Heuristic> {
        Box::new(Self::seeded(self.rng.gen()))
    }

    fn name(&self) -> &str {
        "hybrid mobility"
    }
}

// The goal value of a terminal state, clamped to [1, 99], or `None` if it is ill-defined.
pub(crate) fn terminal_estimate(machine: &StateMachine, state: &MachineState, role: Role) -> Option<u8> {
    match machine.goal(state, role) {
        Ok(value) => Some(value.clamp(1, 99)),
        Err(e) => {
            warn!("terminal state is not scored: {}", e);
            None
        }
    }
}

/// A weighted sum of other heuristics, clamped to [1, 99].
///
/// If any member has no estimate, neither does the sum.
#[derive(Debug, Default)]
pub struct Weighted {
    members: Vec<(Box<dyn Heuristic>, f64)>,
}

impl Weighted {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member with the given weight.
    pub fn with(mut self, heuristic: impl Heuristic + 'static, weight: f64) -> Self {
        self.members.push((Box::new(heuristic), weight));
        self
    }

    pub fn push(&mut self, heuristic: Box<dyn Heuristic>, weight: f64) {
        self.members.push((heuristic, weight));
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Heuristic for Weighted {
    fn score(
        &mut self,
        machine: &StateMachine,
        state: &MachineState,
        role: Role,
        cancel: &CancelToken,
    ) -> Result<Option<u8>, GameError> {
        if self.members.is_empty() {
            return Ok(None);
        }
        let mut sum = 0.0;
        for (heuristic, weight) in &mut self.members {
            match heuristic.score(machine, state, role, cancel)? {
                Some(value) => sum += *weight * f64::from(value),
                None => {
                    debug!("{} has no estimate", heuristic.name());
                    return Ok(None);
                }
            }
        }
        Ok(Some(sum.round().clamp(1.0, 99.0) as u8))
    }

    fn reset(&mut self) {
        for (heuristic, _) in &mut self.members {
            heuristic.reset();
        }
    }

    fn on_cancel(&mut self) {
        for (heuristic, _) in &mut self.members {
            heuristic.on_cancel();
        }
    }

    fn fork(&mut self) -> Box<dyn Heuristic> {
        let members = self.members.iter_mut().map(|(h, w)| (h.fork(), *w)).collect();
        Box::new(Weighted { members })
    }

    fn name(&self) -> &str {
        "weighted"
    }
}
