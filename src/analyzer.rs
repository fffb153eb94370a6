//! Structural Analysis
//!
//! Proves facts about a circuit that hold in every reachable state, so that the search can skip work:
//!
//! - **Latches**: propositions that, once true, stay true in every successor state.
//! - **Inhibition**: "p true implies q false". A true latch that inhibits a role's winning goal makes the state
//!   unwinnable for that role (a *dead state*).
//! - **Factors**: independent sub-games found by decomposing a disjunctive winning condition.
//!
//! The proofs enumerate every truth assignment of the base and input propositions a proposition depends on (its
//! *determinants*) and propagate each one. This is exponential, so the number of determinants is capped at
//! [`MAX_DETERMINANTS`]. Larger sets are reported as [`AnalysisError::TooManyDeterminants`] and callers treat the
//! proposition as "no hint available".

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::circuit::{ComponentId, ComponentKind, PropKind};
use crate::error::{AnalysisError, GameError};
use crate::state::{MachineState, Move, Role};
use crate::state_machine::{Evaluation, StateMachine};

/// The largest number of determinants an analysis will enumerate.
pub const MAX_DETERMINANTS: usize = 16;

/// A restricted view of the game: the moves of an independent sub-game.
///
/// A factor shares the base propositions, goals and evaluation order with the whole game. It only narrows which legal
/// moves are considered. "Universal" moves, which touch nothing in the circuit, are available in every factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factor {
    inputs: BTreeSet<ComponentId>,
    universal: BTreeSet<ComponentId>,
    legals: BTreeSet<ComponentId>,
    whole: bool,
}

impl Factor {
    /// The unfactored game: every legal move is allowed.
    pub fn whole(machine: &StateMachine) -> Self {
        let circuit = machine.circuit();
        Self {
            inputs: circuit.inputs().iter().copied().collect(),
            universal: BTreeSet::new(),
            legals: BTreeSet::new(),
            whole: true,
        }
    }

    /// Returns true if this is the unfactored game.
    pub fn is_whole(&self) -> bool {
        self.whole
    }

    /// The input propositions that belong to this factor, excluding universal ones.
    pub fn inputs(&self) -> &BTreeSet<ComponentId> {
        &self.inputs
    }

    /// The input propositions shared by every factor.
    pub fn universal(&self) -> &BTreeSet<ComponentId> {
        &self.universal
    }

    /// Returns true if moves guarded by the legal proposition are part of this factor.
    pub fn allows(&self, legal: ComponentId) -> bool {
        self.whole || self.legals.contains(&legal)
    }

    /// Returns the legal moves of `role` that belong to this factor.
    pub fn legal_moves(&self, evaluation: &Evaluation<'_>, role: Role) -> Result<Vec<Move>, GameError> {
        evaluation.legal_moves_where(role, |legal| self.allows(legal))
    }
}

/// Proves latches, inhibitions and factorings over one state machine.
///
/// Latches must be found with [`detect_latches`](Self::detect_latches) before [`is_dead_state`](Self::is_dead_state)
/// can report anything. Inhibition proofs are cached, so repeated dead-state checks are cheap.
#[derive(Debug)]
pub struct StructuralAnalyzer {
    machine: Arc<StateMachine>,
    latches: Vec<ComponentId>,
    inhibitions: Mutex<HashMap<(ComponentId, ComponentId), bool>>,
}

impl StructuralAnalyzer {
    pub fn new(machine: Arc<StateMachine>) -> Self {
        Self {
            machine,
            latches: Vec::new(),
            inhibitions: Mutex::new(HashMap::new()),
        }
    }

    pub fn machine(&self) -> &Arc<StateMachine> {
        &self.machine
    }

    /// The latches found by the last call to [`detect_latches`](Self::detect_latches).
    pub fn latches(&self) -> &[ComponentId] {
        &self.latches
    }

    /// Returns the base and input propositions that `p` depends on in the current step.
    ///
    /// The traversal walks backwards from `p`'s inputs and stops at the first base or input proposition on each path.
    /// When `p` is a base proposition that feeds its own transition, `p` is one of its determinants.
    pub fn determinants(&self, p: ComponentId) -> BTreeSet<ComponentId> {
        let circuit = self.machine.circuit();
        let mut found = BTreeSet::new();
        let mut seen = vec![false; circuit.len()];
        let mut stack: Vec<ComponentId> = circuit.component(p).inputs().to_vec();
        while let Some(c) = stack.pop() {
            if std::mem::replace(&mut seen[c.0], true) {
                continue;
            }
            match circuit.prop_kind(c) {
                Some(PropKind::Base | PropKind::Input { .. }) => {
                    found.insert(c);
                }
                Some(PropKind::Init) => {}
                _ => stack.extend_from_slice(circuit.component(c).inputs()),
            }
        }
        found
    }

    /// Returns true if `p`, once true, is true in every successor state.
    ///
    /// Init and input propositions are never latches, and neither is a proposition with no determinants.
    ///
    /// # Errors
    /// [`AnalysisError::TooManyDeterminants`] if the proof would enumerate more than [`MAX_DETERMINANTS`] propositions.
    pub fn is_latch(&self, p: ComponentId) -> Result<bool, AnalysisError> {
        let circuit = self.machine.circuit();
        let is_base = match circuit.prop_kind(p) {
            None | Some(PropKind::Init | PropKind::Input { .. }) => return Ok(false),
            Some(kind) => matches!(kind, PropKind::Base),
        };

        let direct = self.determinants(p);
        if direct.is_empty() {
            return Ok(false);
        }

        // A derived proposition is re-evaluated in the successor, so the successor's bases must be fully determined.
        let mut scope = direct.clone();
        if is_base {
            scope.insert(p);
        } else {
            for &b in direct.iter().filter(|&&d| circuit.is_base(d)) {
                scope.extend(self.determinants(b));
            }
        }
        let next_inputs: Vec<ComponentId> = direct.iter().copied().filter(|&d| circuit.is_input(d)).collect();
        check_limit(next_inputs.len())?;

        self.holds_for_all(&scope, |values| {
            if !values[p.0] {
                return true;
            }
            let next = self.machine.successor(values);
            if is_base {
                return next.contains(p);
            }
            for mask in 0..(1usize << next_inputs.len()) {
                let inputs = select(&next_inputs, mask);
                if !self.machine.values_for(&next, &inputs)[p.0] {
                    return false;
                }
            }
            true
        })
    }

    /// Returns true if `p` true implies `q` false, for every assignment of their determinants.
    pub fn is_inhibiting(&self, p: ComponentId, q: ComponentId) -> Result<bool, AnalysisError> {
        let scope = self.joint_determinants(p, q);
        self.holds_for_all(&scope, |values| !(values[p.0] && values[q.0]))
    }

    /// Returns true if `q` true implies `p` true.
    pub fn is_requirement(&self, p: ComponentId, q: ComponentId) -> Result<bool, AnalysisError> {
        let scope = self.joint_determinants(p, q);
        self.holds_for_all(&scope, |values| !values[q.0] || values[p.0])
    }

    /// Returns true if `q` true implies `p` false.
    pub fn is_anti_requirement(&self, p: ComponentId, q: ComponentId) -> Result<bool, AnalysisError> {
        let scope = self.joint_determinants(p, q);
        self.holds_for_all(&scope, |values| !(values[q.0] && values[p.0]))
    }

    /// Scans every proposition for latches and remembers them. Propositions that cannot be analyzed are skipped.
    pub fn detect_latches(&mut self) -> &[ComponentId] {
        let mut latches = Vec::new();
        for &p in self.machine.circuit().propositions() {
            match self.is_latch(p) {
                Ok(true) => latches.push(p),
                Ok(false) => {}
                Err(e) => debug!("skipping latch check of {}: {}", self.machine.circuit().name(p), e),
            }
        }
        info!("found {} latches", latches.len());
        self.latches = latches;
        &self.latches
    }

    /// Returns true if a latch that is true in `state` rules out the winning goal of `role`.
    ///
    /// # Errors
    /// [`GameError::GoalDefinition`] if the role has no goal proposition worth 100.
    pub fn is_dead_state(&self, state: &MachineState, role: Role) -> Result<bool, GameError> {
        let goal = self.machine.winning_goal(role).ok_or_else(|| GameError::GoalDefinition {
            role: self.machine.role_name(role).to_string(),
            count: 0,
        })?;
        let evaluation = self.machine.evaluate(state);
        Ok(self
            .latches
            .iter()
            .any(|&latch| evaluation.is_true(latch) && self.cached_inhibition(latch, goal)))
    }

    /// Decomposes the game into independent factors.
    ///
    /// Each role's winning goal is followed back to the nearest OR gate. Every disjunct, or the negated terms of a
    /// disjunct that is an AND of negations, seeds a candidate factor made of all the input propositions it depends on.
    /// A candidate contained in another is merged into it. If two candidates overlap partially, the game is not
    /// factorable.
    ///
    /// Always returns at least one factor. A single factor is the whole game.
    pub fn propnet_factors(&self) -> Vec<Factor> {
        let machine = &self.machine;
        let circuit = machine.circuit();
        let roles = machine.roles();
        if roles.len() > 1 {
            warn!("factoring a game with {} roles; combining factor results is approximate", roles.len());
        }

        // Inputs that affect nothing but can be played are available in every factor.
        let universal: BTreeSet<ComponentId> = circuit
            .inputs()
            .iter()
            .copied()
            .filter(|&i| circuit.component(i).outputs().is_empty() && circuit.legal_of_input(i).is_some())
            .collect();

        let mut seeds = Vec::new();
        for role in roles {
            if let Some(or) = machine.winning_goal(role).and_then(|g| self.find_disjunction(g)) {
                seeds.extend(self.disjuncts(or));
            }
        }

        let mut candidates: Vec<BTreeSet<ComponentId>> = Vec::new();
        for seed in seeds {
            let inputs: BTreeSet<ComponentId> = self
                .backward_closure(seed)
                .into_iter()
                .filter(|&c| circuit.is_input(c) && circuit.legal_of_input(c).is_some())
                .collect();
            if inputs.is_empty() {
                debug!("disjunct {} depends on no move", seed);
            } else {
                candidates.push(inputs);
            }
        }

        let mut kept: Vec<BTreeSet<ComponentId>> = Vec::new();
        'candidates: for candidate in candidates {
            let mut i = 0;
            while i < kept.len() {
                if kept[i].is_disjoint(&candidate) {
                    i += 1;
                } else if kept[i].is_superset(&candidate) {
                    continue 'candidates;
                } else if candidate.is_superset(&kept[i]) {
                    kept.remove(i);
                } else {
                    info!("factors overlap partially; the game is not factorable");
                    return vec![Factor::whole(machine)];
                }
            }
            kept.push(candidate);
        }

        if kept.len() < 2 {
            return vec![Factor::whole(machine)];
        }

        let factors: Vec<Factor> = kept
            .into_iter()
            .map(|inputs| {
                let legals = inputs
                    .iter()
                    .chain(universal.iter())
                    .filter_map(|&i| circuit.legal_of_input(i))
                    .collect();
                Factor {
                    inputs,
                    universal: universal.clone(),
                    legals,
                    whole: false,
                }
            })
            .collect();
        for factor in &factors {
            info!(
                "found a factor: {} of {} inputs (+{} universal)",
                factor.inputs.len(),
                circuit.inputs().len(),
                factor.universal.len()
            );
        }
        factors
    }

    /// Projects a single-role game onto the moves behind the first disjunct of the winning goal's nearest OR gate, or
    /// behind the whole goal if it has no disjunction. Games with more roles, or no winning goal, are returned whole.
    pub fn factor_for_role(&self, role: Role) -> Factor {
        let machine = &self.machine;
        let circuit = machine.circuit();
        let Some(goal) = machine.winning_goal(role) else {
            return Factor::whole(machine);
        };
        if machine.roles().len() > 1 {
            return Factor::whole(machine);
        }

        let start = self
            .find_disjunction(goal)
            .and_then(|or| circuit.component(or).inputs().first().copied())
            .unwrap_or(goal);
        let inputs: BTreeSet<ComponentId> = self
            .backward_closure(start)
            .into_iter()
            .filter(|&c| circuit.is_input(c))
            .collect();
        let legals = inputs.iter().filter_map(|&i| circuit.legal_of_input(i)).collect();
        info!(
            "projected role {} onto {} of {} inputs",
            machine.role_name(role),
            inputs.len(),
            circuit.inputs().len()
        );
        Factor {
            inputs,
            universal: BTreeSet::new(),
            legals,
            whole: false,
        }
    }

    // Follows single-input links back from `id` until an OR gate is found.
    fn find_disjunction(&self, id: ComponentId) -> Option<ComponentId> {
        let circuit = self.machine.circuit();
        let mut current = id;
        let mut steps = 0;
        loop {
            let component = circuit.component(current);
            match (component.kind(), component.inputs()) {
                (ComponentKind::Or, _) => return Some(current),
                (ComponentKind::Proposition { .. } | ComponentKind::Transition, [single]) => current = *single,
                _ => return None,
            }
            steps += 1;
            if steps > circuit.len() {
                return None;
            }
        }
    }

    // The seeds of an OR gate: its propositional inputs, and the negations feeding an AND made only of negations.
    fn disjuncts(&self, or: ComponentId) -> Vec<ComponentId> {
        let circuit = self.machine.circuit();
        let mut seeds = Vec::new();
        for &input in circuit.component(or).inputs() {
            let component = circuit.component(input);
            match component.kind() {
                ComponentKind::Proposition { .. } => seeds.push(input),
                ComponentKind::And => {
                    let all_nots = component
                        .inputs()
                        .iter()
                        .all(|&i| matches!(circuit.component(i).kind(), ComponentKind::Not));
                    if all_nots {
                        seeds.extend_from_slice(component.inputs());
                    }
                }
                _ => {}
            }
        }
        seeds
    }

    // Every component reachable backwards from `start`.
    fn backward_closure(&self, start: ComponentId) -> Vec<ComponentId> {
        let circuit = self.machine.circuit();
        let mut seen = vec![false; circuit.len()];
        let mut found = Vec::new();
        let mut stack = vec![start];
        while let Some(c) = stack.pop() {
            if std::mem::replace(&mut seen[c.0], true) {
                continue;
            }
            found.push(c);
            stack.extend_from_slice(circuit.component(c).inputs());
        }
        found
    }

    fn joint_determinants(&self, p: ComponentId, q: ComponentId) -> BTreeSet<ComponentId> {
        let mut scope = self.determinants(p);
        scope.extend(self.determinants(q));
        let circuit = self.machine.circuit();
        for id in [p, q] {
            if circuit.is_base(id) || circuit.is_input(id) {
                scope.insert(id);
            }
        }
        scope
    }

    fn cached_inhibition(&self, latch: ComponentId, goal: ComponentId) -> bool {
        if let Ok(cache) = self.inhibitions.lock() {
            if let Some(&known) = cache.get(&(latch, goal)) {
                return known;
            }
        }
        let inhibits = self.is_inhibiting(latch, goal).unwrap_or_else(|e| {
            debug!("no inhibition proof for {}: {}", self.machine.circuit().name(latch), e);
            false
        });
        if let Ok(mut cache) = self.inhibitions.lock() {
            cache.insert((latch, goal), inhibits);
        }
        inhibits
    }

    // Propagates every assignment of `scope` and returns false at the first one that fails `check`.
    fn holds_for_all(
        &self,
        scope: &BTreeSet<ComponentId>,
        mut check: impl FnMut(&[bool]) -> bool,
    ) -> Result<bool, AnalysisError> {
        check_limit(scope.len())?;
        let scope: Vec<ComponentId> = scope.iter().copied().collect();
        for mask in 0..(1usize << scope.len()) {
            let mut values = self.machine.blank_values();
            for &c in &select(&scope, mask) {
                values[c.0] = true;
            }
            self.machine.propagate(&mut values);
            if !check(&values) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn check_limit(count: usize) -> Result<(), AnalysisError> {
    if count > MAX_DETERMINANTS {
        Err(AnalysisError::TooManyDeterminants {
            count,
            limit: MAX_DETERMINANTS,
        })
    } else {
        Ok(())
    }
}

// The members of `items` whose bit is set in `mask`.
fn select(items: &[ComponentId], mask: usize) -> Vec<ComponentId> {
    items
        .iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, &c)| c)
        .collect()
}
