//! Circuit State Machine
//!
//! Answers the game queries (initial state, legality, termination, goals, successors) by propagating truth values
//! through a [`CircuitGraph`].
//!
//! Truth values are never stored in the circuit. Every query builds its own value vector, indexed by component id,
//! sets the base and input propositions, and evaluates the remaining propositions in a topological order computed once
//! at construction. The machine is therefore immutable after construction and can be shared between threads.

use std::collections::{HashMap, VecDeque};

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::circuit::{CircuitGraph, ComponentId, ComponentKind, PropKind};
use crate::error::{CircuitError, GameError};
use crate::state::{JointMove, MachineState, Move, Role};

/// Game state machine backed by a compiled circuit.
#[derive(Debug, Clone)]
pub struct StateMachine {
    circuit: CircuitGraph,
    // Every proposition other than base, input and init, ordered so that each one follows all of its propositional
    // predecessors.
    ordering: Vec<ComponentId>,
}

impl StateMachine {
    /// Wraps a circuit and computes its evaluation order.
    ///
    /// # Errors
    /// Returns [`CircuitError::Cyclic`] if no evaluation order exists, which means the circuit is malformed.
    pub fn new(circuit: CircuitGraph) -> Result<Self, CircuitError> {
        let ordering = topological_order(&circuit)?;
        debug!(
            "state machine ready: {} components, {} propositions ordered",
            circuit.len(),
            ordering.len()
        );
        Ok(Self { circuit, ordering })
    }

    pub fn circuit(&self) -> &CircuitGraph {
        &self.circuit
    }

    pub fn ordering(&self) -> &[ComponentId] {
        &self.ordering
    }

    pub fn roles(&self) -> Vec<Role> {
        (0..self.circuit.roles().len()).map(Role).collect()
    }

    /// Looks up a role by name.
    pub fn role(&self, name: &str) -> Option<Role> {
        self.circuit.roles().iter().position(|r| r == name).map(Role)
    }

    pub fn role_name(&self, role: Role) -> &str {
        &self.circuit.roles()[role.0]
    }

    /// Returns the state that holds when init is true and no move has been played.
    pub fn initial_state(&self) -> MachineState {
        let mut values = self.blank_values();
        values[self.circuit.init().0] = true;
        self.propagate(&mut values);
        self.successor(&values)
    }

    /// Evaluates a state with no moves played. Use the result to answer several queries about the same state.
    pub fn evaluate(&self, state: &MachineState) -> Evaluation<'_> {
        Evaluation {
            machine: self,
            values: self.values_for(state, &[]),
        }
    }

    pub fn is_terminal(&self, state: &MachineState) -> bool {
        self.evaluate(state).is_terminal()
    }

    /// Returns the legal moves of `role` in `state`.
    ///
    /// # Errors
    /// [`GameError::MoveDefinition`] if a true legal proposition has no corresponding input proposition.
    pub fn legal_moves(&self, state: &MachineState, role: Role) -> Result<Vec<Move>, GameError> {
        self.evaluate(state).legal_moves(role)
    }

    /// Returns the goal value of `role` in `state`.
    ///
    /// # Errors
    /// [`GameError::GoalDefinition`] unless exactly one goal proposition of the role is true.
    pub fn goal(&self, state: &MachineState, role: Role) -> Result<u8, GameError> {
        self.evaluate(state).goal(role)
    }

    /// Computes the state that follows `state` when every role plays its move in `joint`.
    ///
    /// # Errors
    /// [`GameError::TransitionDefinition`] if the joint move does not have one move per role or a move has no input
    /// proposition.
    pub fn next_state(&self, state: &MachineState, joint: &[Move]) -> Result<MachineState, GameError> {
        let inputs = self.inputs_for(joint)?;
        let values = self.values_for(state, &inputs);
        Ok(self.successor(&values))
    }

    /// Returns every combination of legal moves, in role order.
    pub fn legal_joint_moves(&self, state: &MachineState) -> Result<Vec<JointMove>, GameError> {
        let evaluation = self.evaluate(state);
        let mut legals = Vec::with_capacity(self.circuit.roles().len());
        for role in self.roles() {
            legals.push(evaluation.legal_moves(role)?);
        }
        Ok(cross_product(&legals))
    }

    /// Returns every combination of legal moves in which `role` plays `fixed`.
    pub fn legal_joint_moves_with(
        &self,
        state: &MachineState,
        role: Role,
        fixed: &Move,
    ) -> Result<Vec<JointMove>, GameError> {
        let evaluation = self.evaluate(state);
        let mut legals = Vec::with_capacity(self.circuit.roles().len());
        for r in self.roles() {
            if r == role {
                legals.push(vec![fixed.clone()]);
            } else {
                legals.push(evaluation.legal_moves(r)?);
            }
        }
        Ok(cross_product(&legals))
    }

    /// Picks a uniformly random legal move for `role`, or `None` if it has none.
    pub fn random_move<R: Rng + ?Sized>(
        &self,
        state: &MachineState,
        role: Role,
        rng: &mut R,
    ) -> Result<Option<Move>, GameError> {
        Ok(self.legal_moves(state, role)?.choose(rng).cloned())
    }

    /// Picks a random legal move for every role, or `None` if some role has no legal move.
    pub fn random_joint_move<R: Rng + ?Sized>(
        &self,
        state: &MachineState,
        rng: &mut R,
    ) -> Result<Option<JointMove>, GameError> {
        let evaluation = self.evaluate(state);
        let mut joint = Vec::with_capacity(self.circuit.roles().len());
        for role in self.roles() {
            match evaluation.legal_moves(role)?.choose(rng) {
                Some(m) => joint.push(m.clone()),
                None => return Ok(None),
            }
        }
        Ok(Some(joint))
    }

    /// Like [`random_joint_move`](Self::random_joint_move), with `role` playing `fixed`.
    pub fn random_joint_move_with<R: Rng + ?Sized>(
        &self,
        state: &MachineState,
        role: Role,
        fixed: &Move,
        rng: &mut R,
    ) -> Result<Option<JointMove>, GameError> {
        let evaluation = self.evaluate(state);
        let mut joint = Vec::with_capacity(self.circuit.roles().len());
        for r in self.roles() {
            if r == role {
                joint.push(fixed.clone());
                continue;
            }
            match evaluation.legal_moves(r)?.choose(rng) {
                Some(m) => joint.push(m.clone()),
                None => return Ok(None),
            }
        }
        Ok(Some(joint))
    }

    /// Returns the goal proposition of `role` worth 100.
    pub fn winning_goal(&self, role: Role) -> Option<ComponentId> {
        self.circuit
            .goals(role)
            .iter()
            .copied()
            .find(|&g| self.circuit.goal_value(g) == Some(100))
    }

    /// Returns the names of the true base propositions, sorted lexically.
    pub fn fact_names(&self, state: &MachineState) -> Vec<&str> {
        let mut names: Vec<&str> = state.facts().iter().map(|&f| self.circuit.name(f)).collect();
        names.sort_unstable();
        names
    }

    // A value vector with every component false.
    pub(crate) fn blank_values(&self) -> Vec<bool> {
        vec![false; self.circuit.len()]
    }

    // Sets the base propositions from `state`, the given input propositions, and propagates.
    pub(crate) fn values_for(&self, state: &MachineState, inputs: &[ComponentId]) -> Vec<bool> {
        let mut values = self.blank_values();
        for &fact in state.facts() {
            values[fact.0] = true;
        }
        for &input in inputs {
            values[input.0] = true;
        }
        self.propagate(&mut values);
        values
    }

    // Evaluates every ordered proposition from the values of the base, input and init propositions.
    pub(crate) fn propagate(&self, values: &mut [bool]) {
        for &p in &self.ordering {
            let value = match self.circuit.component(p).inputs() {
                [single] => self.eval(*single, values),
                _ => false,
            };
            values[p.0] = value;
        }
    }

    // Computes the value of a component, reading proposition values from `values` and evaluating gates on demand.
    pub(crate) fn eval(&self, id: ComponentId, values: &[bool]) -> bool {
        let component = self.circuit.component(id);
        match component.kind() {
            ComponentKind::Proposition { .. } => values[id.0],
            ComponentKind::And => component.inputs().iter().all(|&i| self.eval(i, values)),
            ComponentKind::Or => component.inputs().iter().any(|&i| self.eval(i, values)),
            ComponentKind::Not => !self.eval(component.inputs()[0], values),
            ComponentKind::Transition => self.eval(component.inputs()[0], values),
            ComponentKind::Constant(value) => *value,
        }
    }

    // Reads the next state: the base propositions whose transitions are true.
    pub(crate) fn successor(&self, values: &[bool]) -> MachineState {
        MachineState::new(
            self.circuit
                .bases()
                .iter()
                .copied()
                .filter(|&b| self.eval(self.circuit.component(b).inputs()[0], values)),
        )
    }

    fn inputs_for(&self, joint: &[Move]) -> Result<Vec<ComponentId>, GameError> {
        let roles = self.circuit.roles();
        if joint.len() != roles.len() {
            return Err(GameError::TransitionDefinition(format!(
                "joint move has {} moves for {} roles",
                joint.len(),
                roles.len()
            )));
        }
        joint
            .iter()
            .enumerate()
            .map(|(r, m)| {
                self.circuit.input_for(Role(r), m).ok_or_else(|| {
                    GameError::TransitionDefinition(format!("(does {} {}) has no input proposition", roles[r], m))
                })
            })
            .collect()
    }
}

/// The propositional values of one state with no moves played.
pub struct Evaluation<'a> {
    machine: &'a StateMachine,
    values: Vec<bool>,
}

impl Evaluation<'_> {
    pub fn is_true(&self, proposition: ComponentId) -> bool {
        self.values[proposition.0]
    }

    pub fn is_terminal(&self) -> bool {
        self.values[self.machine.circuit.terminal().0]
    }

    pub fn legal_moves(&self, role: Role) -> Result<Vec<Move>, GameError> {
        self.legal_moves_where(role, |_| true)
    }

    /// Returns the legal moves of `role` whose legal proposition passes `filter`.
    pub fn legal_moves_where(
        &self,
        role: Role,
        filter: impl Fn(ComponentId) -> bool,
    ) -> Result<Vec<Move>, GameError> {
        let circuit = &self.machine.circuit;
        let mut moves = Vec::new();
        for &legal in circuit.legals(role) {
            if !self.values[legal.0] || !filter(legal) {
                continue;
            }
            let Some(PropKind::Legal { action, .. }) = circuit.prop_kind(legal) else {
                continue;
            };
            if circuit.input_of_legal(legal).is_none() {
                return Err(GameError::MoveDefinition {
                    role: self.machine.role_name(role).to_string(),
                    term: action.to_string(),
                });
            }
            moves.push(action.clone());
        }
        Ok(moves)
    }

    pub fn goal(&self, role: Role) -> Result<u8, GameError> {
        let circuit = &self.machine.circuit;
        let true_goals: Vec<ComponentId> =
            circuit.goals(role).iter().copied().filter(|&g| self.values[g.0]).collect();
        match true_goals.as_slice() {
            [goal] => circuit.goal_value(*goal).ok_or_else(|| GameError::GoalDefinition {
                role: self.machine.role_name(role).to_string(),
                count: 1,
            }),
            _ => Err(GameError::GoalDefinition {
                role: self.machine.role_name(role).to_string(),
                count: true_goals.len(),
            }),
        }
    }
}

/// Returns every sequence that takes one element from each list, in list order.
pub fn cross_product(lists: &[Vec<Move>]) -> Vec<JointMove> {
    let mut product: Vec<JointMove> = vec![Vec::with_capacity(lists.len())];
    for list in lists {
        let mut extended = Vec::with_capacity(product.len() * list.len());
        for partial in &product {
            for m in list {
                let mut joint = partial.clone();
                joint.push(m.clone());
                extended.push(joint);
            }
        }
        product = extended;
    }
    product
}

// Orders the derived propositions so that each follows its propositional predecessors. Base, input and init
// propositions are seeded as already visited.
fn topological_order(circuit: &CircuitGraph) -> Result<Vec<ComponentId>, CircuitError> {
    let is_seed = |p: ComponentId| {
        matches!(
            circuit.prop_kind(p),
            Some(PropKind::Base | PropKind::Input { .. } | PropKind::Init)
        )
    };
    let unvisited: Vec<ComponentId> = circuit.propositions().iter().copied().filter(|&p| !is_seed(p)).collect();

    // Count the unresolved propositional predecessors of each proposition and index who waits on whom.
    let mut pending: HashMap<ComponentId, usize> = HashMap::with_capacity(unvisited.len());
    let mut waiting: HashMap<ComponentId, Vec<ComponentId>> = HashMap::new();
    for &p in &unvisited {
        let predecessors = propositional_predecessors(circuit, p);
        let unresolved: Vec<ComponentId> = predecessors.into_iter().filter(|&q| !is_seed(q)).collect();
        pending.insert(p, unresolved.len());
        for q in unresolved {
            waiting.entry(q).or_default().push(p);
        }
    }

    let mut ready: VecDeque<ComponentId> = unvisited.iter().copied().filter(|p| pending[p] == 0).collect();
    let mut order = Vec::with_capacity(unvisited.len());
    while let Some(p) = ready.pop_front() {
        order.push(p);
        for &next in waiting.get(&p).into_iter().flatten() {
            if let Some(count) = pending.get_mut(&next) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(next);
                }
            }
        }
    }

    if order.len() < unvisited.len() {
        return Err(CircuitError::Cyclic {
            remaining: unvisited.len() - order.len(),
        });
    }
    Ok(order)
}

// Collects the propositions that feed `p`, looking through gates.
fn propositional_predecessors(circuit: &CircuitGraph, p: ComponentId) -> Vec<ComponentId> {
    let mut found = Vec::new();
    let mut seen = vec![false; circuit.len()];
    let mut stack: Vec<ComponentId> = circuit.component(p).inputs().to_vec();
    while let Some(c) = stack.pop() {
        if std::mem::replace(&mut seen[c.0], true) {
            continue;
        }
        if circuit.component(c).is_proposition() {
            found.push(c);
        } else {
            stack.extend_from_slice(circuit.component(c).inputs());
        }
    }
    found.sort_unstable();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;
    use crate::fixtures::{self, TicTacToe};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mark(ttt: &TicTacToe, m: usize, n: usize) -> Move {
        ttt.mark(m, n)
    }

    #[test]
    fn test_initial_state_is_empty_board() {
        let ttt = fixtures::tic_tac_toe();
        let machine = &ttt.machine;
        let s0 = machine.initial_state();

        // Nine blank cells and x in control.
        assert_eq!(s0.len(), 10);
        let names = machine.fact_names(&s0);
        assert!(names.contains(&"(control xplayer)"));
        assert_eq!(names.iter().filter(|n| n.ends_with(" b)")).count(), 9);
        assert!(!machine.is_terminal(&s0));
    }

    #[test]
    fn test_legal_moves_follow_control() {
        let ttt = fixtures::tic_tac_toe();
        let machine = &ttt.machine;
        let s0 = machine.initial_state();

        assert_eq!(machine.legal_moves(&s0, ttt.x).unwrap().len(), 9);
        assert_eq!(machine.legal_moves(&s0, ttt.o).unwrap(), vec![Move::new("noop")]);
    }

    #[test]
    fn test_queries_are_idempotent() {
        let ttt = fixtures::tic_tac_toe();
        let machine = &ttt.machine;
        let s1 = machine
            .next_state(&machine.initial_state(), &[mark(&ttt, 1, 1), ttt.noop()])
            .unwrap();

        let first = (
            machine.is_terminal(&s1),
            machine.legal_moves(&s1, ttt.o).unwrap(),
            machine.legal_moves(&s1, ttt.x).unwrap(),
        );
        for _ in 0..3 {
            assert_eq!(machine.is_terminal(&s1), first.0);
            assert_eq!(machine.legal_moves(&s1, ttt.o).unwrap(), first.1);
            assert_eq!(machine.legal_moves(&s1, ttt.x).unwrap(), first.2);
        }
        // Undecided boards score as a draw.
        assert_eq!(machine.goal(&s1, ttt.x).unwrap(), 50);
        assert_eq!(machine.goal(&s1, ttt.x).unwrap(), 50);
    }

    #[test]
    fn test_scripted_game_reaches_draw() {
        let ttt = fixtures::tic_tac_toe();
        let machine = &ttt.machine;
        // x: 1 1, 1 3, 2 1, 3 2, 2 3 / o: 2 2, 1 2, 3 1, 3 3  ->  a full board with no line.
        let script = [(1, 1), (2, 2), (1, 3), (1, 2), (2, 1), (3, 1), (3, 2), (3, 3), (2, 3)];
        let mut state = machine.initial_state();
        for (i, &(m, n)) in script.iter().enumerate() {
            assert!(!machine.is_terminal(&state), "terminal too early at ply {}", i);
            let joint = if i % 2 == 0 {
                vec![mark(&ttt, m, n), ttt.noop()]
            } else {
                vec![ttt.noop(), mark(&ttt, m, n)]
            };
            state = machine.next_state(&state, &joint).unwrap();
        }
        assert!(machine.is_terminal(&state));
        assert_eq!(machine.goal(&state, ttt.x).unwrap(), 50);
        assert_eq!(machine.goal(&state, ttt.o).unwrap(), 50);
    }

    #[test]
    fn test_scripted_game_reaches_win() {
        let ttt = fixtures::tic_tac_toe();
        let machine = &ttt.machine;
        // x takes the top row.
        let script = [(1, 1), (2, 1), (1, 2), (2, 2), (1, 3)];
        let mut state = machine.initial_state();
        for (i, &(m, n)) in script.iter().enumerate() {
            let joint = if i % 2 == 0 {
                vec![mark(&ttt, m, n), ttt.noop()]
            } else {
                vec![ttt.noop(), mark(&ttt, m, n)]
            };
            state = machine.next_state(&state, &joint).unwrap();
        }
        assert!(machine.is_terminal(&state));
        assert_eq!(machine.goal(&state, ttt.x).unwrap(), 100);
        assert_eq!(machine.goal(&state, ttt.o).unwrap(), 0);
    }

    #[test]
    fn test_next_state_rejects_unmapped_move() {
        let ttt = fixtures::tic_tac_toe();
        let machine = &ttt.machine;
        let s0 = machine.initial_state();
        let err = machine.next_state(&s0, &[Move::new("(mark 9 9)"), ttt.noop()]).unwrap_err();
        assert!(matches!(err, GameError::TransitionDefinition(_)));

        let err = machine.next_state(&s0, &[ttt.noop()]).unwrap_err();
        assert!(matches!(err, GameError::TransitionDefinition(_)));
    }

    #[test]
    fn test_goal_requires_exactly_one_true_goal() {
        let mut b = CircuitBuilder::new();
        let solo = b.role("solo");
        b.init();
        let on = b.base("(on)");
        let stay = b.or(&[on]);
        b.next(on, stay);
        let t = b.constant(true);
        b.terminal(t);
        b.goal(solo, 100, t);
        b.goal(solo, 50, t);
        let machine = StateMachine::new(b.build().unwrap()).unwrap();
        let err = machine.goal(&machine.initial_state(), solo).unwrap_err();
        assert_eq!(err, GameError::GoalDefinition { role: "solo".into(), count: 2 });
    }

    #[test]
    fn test_legal_without_input_is_a_move_definition_error() {
        let mut b = CircuitBuilder::new();
        let solo = b.role("solo");
        b.init();
        let on = b.base("(on)");
        b.next(on, on);
        let t = b.constant(true);
        b.legal(solo, "jump", t);
        b.terminal(on);
        let machine = StateMachine::new(b.build().unwrap()).unwrap();
        let err = machine.legal_moves(&machine.initial_state(), solo).unwrap_err();
        assert_eq!(err, GameError::MoveDefinition { role: "solo".into(), term: "jump".into() });
    }

    #[test]
    fn test_cyclic_circuit_is_rejected() {
        // v1 <- v2 and v2 <- v1, with no base proposition breaking the loop.
        let json = r#"{
            "roles": ["solo"],
            "components": [
                { "type": "init" },
                { "type": "view", "name": "v1", "inputs": [2] },
                { "type": "view", "name": "v2", "inputs": [1] },
                { "type": "terminal", "inputs": [2] }
            ]
        }"#;
        let err = StateMachine::new(CircuitGraph::from_json(json).unwrap()).unwrap_err();
        assert_eq!(err, CircuitError::Cyclic { remaining: 3 });
    }

    #[test]
    fn test_ordering_respects_predecessors() {
        let ttt = fixtures::tic_tac_toe();
        let machine = &ttt.machine;
        let position: HashMap<ComponentId, usize> =
            machine.ordering().iter().enumerate().map(|(i, &p)| (p, i)).collect();
        for &p in machine.ordering() {
            for q in propositional_predecessors(machine.circuit(), p) {
                if let Some(&qi) = position.get(&q) {
                    assert!(qi < position[&p]);
                }
            }
        }
    }

    #[test]
    fn test_joint_moves() {
        let ttt = fixtures::tic_tac_toe();
        let machine = &ttt.machine;
        let s0 = machine.initial_state();

        let all = machine.legal_joint_moves(&s0).unwrap();
        assert_eq!(all.len(), 9);
        assert!(all.iter().all(|j| j[1] == ttt.noop()));

        let fixed = machine.legal_joint_moves_with(&s0, ttt.x, &mark(&ttt, 2, 2)).unwrap();
        assert_eq!(fixed, vec![vec![mark(&ttt, 2, 2), ttt.noop()]]);

        let mut rng = StdRng::seed_from_u64(7);
        let joint = machine.random_joint_move(&s0, &mut rng).unwrap().unwrap();
        assert!(all.contains(&joint));
        let m = machine.random_move(&s0, ttt.o, &mut rng).unwrap();
        assert_eq!(m, Some(ttt.noop()));
    }

    #[test]
    fn test_cross_product() {
        let lists = vec![
            vec![Move::new("a"), Move::new("b")],
            vec![Move::new("c")],
            vec![Move::new("d"), Move::new("e")],
        ];
        let product = cross_product(&lists);
        assert_eq!(product.len(), 4);
        assert_eq!(product[0], vec![Move::new("a"), Move::new("c"), Move::new("d")]);
        assert_eq!(product[3], vec![Move::new("b"), Move::new("c"), Move::new("e")]);
        assert!(cross_product(&[vec![Move::new("a")], vec![]]).is_empty());
    }

    #[test]
    fn test_roles_by_name() {
        let ttt = fixtures::tic_tac_toe();
        assert_eq!(ttt.machine.role("xplayer"), Some(ttt.x));
        assert_eq!(ttt.machine.role("oplayer"), Some(ttt.o));
        assert_eq!(ttt.machine.role("nobody"), None);
        assert_eq!(ttt.machine.role_name(ttt.o), "oplayer");
    }
}
