//! Monte Carlo rollouts
//!
//! [`MonteCarlo`] estimates a state by playing random joint moves until the game ends and averaging the goal values
//! reached. Estimates are clamped to [1, 99] so that a sampled value is never mistaken for a proven win or loss.
//!
//! With [`memory`](MonteCarloConfig::memory) set, the heuristic remembers which joint move it played in which state and
//! prefers joint moves it has not tried yet, so repeated samples spread over the tree. [`FocusedMonteCarlo`] samples
//! from the successor in which the role has the fewest options instead of from the state itself.

use std::collections::HashSet;

use log::{trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cancel::CancelToken;
use crate::config::MonteCarloConfig;
use crate::error::GameError;
use crate::heuristic::{terminal_estimate, Heuristic};
use crate::state::{JointMove, MachineState, Role};
use crate::state_machine::StateMachine;

/// Sampling heuristic: the average goal value of random playouts.
#[derive(Debug)]
pub struct MonteCarlo {
    config: MonteCarloConfig,
    rng: StdRng,
    cancelled: bool,
    // State fingerprints paired with the joint moves played there. Only filled with `memory` set.
    visited: HashSet<(u64, JointMove)>,
}

impl MonteCarlo {
    pub fn new(config: MonteCarloConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Creates a heuristic whose playouts are reproducible.
    pub fn seeded(config: MonteCarloConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: MonteCarloConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng,
            cancelled: false,
            visited: HashSet::new(),
        }
    }

    pub fn config(&self) -> &MonteCarloConfig {
        &self.config
    }

    /// Number of state and joint move pairs remembered since the last reset.
    pub fn remembered(&self) -> usize {
        self.visited.len()
    }

    // An independent heuristic with the same settings and a seed drawn from this one.
    fn split(&mut self) -> Self {
        let seed = self.rng.gen();
        Self::seeded(self.config.clone(), seed)
    }

    // Plays random joint moves from `state`. Returns the terminal state, or `None` if the depth limit was reached, a
    // role had no legal move, or the search was cancelled.
    fn playout(
        &mut self,
        machine: &StateMachine,
        state: &MachineState,
        cancel: &CancelToken,
    ) -> Result<Option<MachineState>, GameError> {
        let mut current = state.clone();
        let mut steps = 0;
        while !machine.is_terminal(&current) {
            if cancel.is_cancelled() {
                self.cancelled = true;
                return Ok(None);
            }
            if self.config.max_depth.is_some_and(|limit| steps >= limit) {
                return Ok(None);
            }
            let joint = if self.config.memory {
                self.untried_joint_move(machine, &current)?
            } else {
                machine.random_joint_move(&current, &mut self.rng)?
            };
            let Some(joint) = joint else {
                return Ok(None);
            };
            current = machine.next_state(&current, &joint)?;
            steps += 1;
        }
        Ok(Some(current))
    }

    // Draws random joint moves, at most as many as there are, and keeps the first one not yet played in `state`. If
    // every draw was played before, the last draw is used anyway.
    fn untried_joint_move(
        &mut self,
        machine: &StateMachine,
        state: &MachineState,
    ) -> Result<Option<JointMove>, GameError> {
        let joints = machine.legal_joint_moves(state)?;
        let fingerprint = state.fingerprint();
        let mut chosen = None;
        for _ in 0..joints.len() {
            let joint = &joints[self.rng.gen_range(0..joints.len())];
            chosen = Some(joint);
            if self.visited.insert((fingerprint, joint.clone())) {
                break;
            }
        }
        Ok(chosen.cloned())
    }
}

impl Default for MonteCarlo {
    fn default() -> Self {
        Self::new(MonteCarloConfig::default())
    }
}

impl Heuristic for MonteCarlo {
    fn score(
        &mut self,
        machine: &StateMachine,
        state: &MachineState,
        role: Role,
        cancel: &CancelToken,
    ) -> Result<Option<u8>, GameError> {
        let mut total = 0u32;
        let mut useful = 0u32;
        for _ in 0..self.config.samples {
            let end = match self.playout(machine, state, cancel) {
                Ok(Some(end)) => end,
                Ok(None) if self.cancelled || cancel.is_cancelled() => break,
                Ok(None) => continue,
                Err(e) => {
                    warn!("discarding a playout: {}", e);
                    continue;
                }
            };
            match machine.goal(&end, role) {
                Ok(value) => {
                    total += u32::from(value);
                    useful += 1;
                }
                Err(e) => warn!("discarding a playout: {}", e),
            }
        }
        if useful == 0 {
            trace!("no playout reached a scored terminal state");
            return Ok(None);
        }
        Ok(Some((total / useful).clamp(1, 99) as u8))
    }

    fn reset(&mut self) {
        self.cancelled = false;
        self.visited.clear();
    }

    fn on_cancel(&mut self) {
        self.cancelled = true;
    }

    fn fork(&mut self) -> Box<dyn Heuristic> {
        Box::new(self.split())
    }

    fn name(&self) -> &str {
        "monte carlo"
    }
}

/// Monte Carlo sampling from the successor in which the role has the fewest legal moves.
///
/// A state with few options is closer to a forced line, so its samples say more about the outcome.
#[derive(Debug)]
pub struct FocusedMonteCarlo {
    inner: MonteCarlo,
}

impl FocusedMonteCarlo {
    pub fn new(inner: MonteCarlo) -> Self {
        Self { inner }
    }
}

impl Heuristic for FocusedMonteCarlo {
    fn score(
        &mut self,
        machine: &StateMachine,
        state: &MachineState,
        role: Role,
        cancel: &CancelToken,
    ) -> Result<Option<u8>, GameError> {
        if machine.is_terminal(state) {
            return Ok(terminal_estimate(machine, state, role));
        }
        let mut focus: Option<(usize, MachineState)> = None;
        for joint in machine.legal_joint_moves(state)? {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let next = machine.next_state(state, &joint)?;
            let mobility = machine.legal_moves(&next, role)?.len();
            if focus.as_ref().map_or(true, |(fewest, _)| mobility < *fewest) {
                focus = Some((mobility, next));
            }
        }
        let Some((_, focus)) = focus else {
            return Ok(None);
        };
        if machine.is_terminal(&focus) {
            return Ok(terminal_estimate(machine, &focus, role));
        }
        self.inner.score(machine, &focus, role, cancel)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn on_cancel(&mut self) {
        self.inner.on_cancel();
    }

    fn fork(&mut self) -> Box<dyn Heuristic> {
        Box::new(Self::new(self.inner.split()))
    }

    fn name(&self) -> &str {
        "focused monte carlo"
    }
}
