//! Compiled Game Circuits
//!
//! A game ruleset arrives compiled into a boolean circuit: an arena of propositions, gates and transitions connected by
//! input/output edges. Some propositions have a distinguished role (base facts, "does" inputs, the init and terminal
//! propositions, per-role legal and goal propositions).
//!
//! Circuits are assembled with a [`CircuitBuilder`] or loaded from a serialized [`CircuitDescription`].
//!
//! # Example
//!
//! ```rust
//! use circuit_game_player::circuit::CircuitBuilder;
//!
//! // A one-role game: pressing the button ends the game with a win.
//! let mut b = CircuitBuilder::new();
//! let robot = b.role("robot");
//! let init = b.init();
//! let pressed = b.base("(pressed)");
//! let press = b.input(robot, "press");
//! let next_pressed = b.or(&[pressed, press]);
//! b.next(pressed, next_pressed);
//! let not_pressed = b.not(pressed);
//! b.legal(robot, "press", not_pressed);
//! b.terminal(pressed);
//! b.goal(robot, 100, pressed);
//! b.goal(robot, 0, not_pressed);
//! let _ = init;
//!
//! let circuit = b.build().unwrap();
//! assert_eq!(circuit.roles().len(), 1);
//! assert_eq!(circuit.bases().len(), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CircuitError;
use crate::state::{Move, Role};

/// Index of a component in the circuit arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub usize);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The role a proposition plays in the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropKind {
    /// A fact persisted between turns. Its single input is a transition.
    Base,
    /// "does": `role` plays `action` this turn.
    Input { role: Role, action: Move },
    /// True only while the initial state is computed.
    Init,
    Terminal,
    /// `role` may play `action`.
    Legal { role: Role, action: Move },
    /// `role` scores `value` if this is true in a terminal state.
    Goal { role: Role, value: u8 },
    /// Any other derived proposition.
    View,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentKind {
    Proposition { name: String, kind: PropKind },
    And,
    Or,
    Not,
    /// Carries its input's value into the next state.
    Transition,
    Constant(bool),
}

#[derive(Debug, Clone)]
pub struct Component {
    kind: ComponentKind,
    inputs: Vec<ComponentId>,
    outputs: Vec<ComponentId>,
}

impl Component {
    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[ComponentId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ComponentId] {
        &self.outputs
    }

    pub fn is_proposition(&self) -> bool {
        matches!(self.kind, ComponentKind::Proposition { .. })
    }

    pub fn prop_kind(&self) -> Option<&PropKind> {
        match &self.kind {
            ComponentKind::Proposition { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// A validated game circuit.
#[derive(Debug, Clone)]
pub struct CircuitGraph {
    components: Vec<Component>,
    roles: Vec<String>,
    propositions: Vec<ComponentId>,
    bases: Vec<ComponentId>,
    inputs: Vec<ComponentId>,
    init: ComponentId,
    terminal: ComponentId,
    legals: Vec<Vec<ComponentId>>,
    goals: Vec<Vec<ComponentId>>,
    input_map: HashMap<(Role, Move), ComponentId>,
    legal_to_input: HashMap<ComponentId, ComponentId>,
    input_to_legal: HashMap<ComponentId, ComponentId>,
}

impl CircuitGraph {
    /// Loads a circuit from its JSON description.
    pub fn from_json(json: &str) -> Result<Self, CircuitError> {
        let description: CircuitDescription =
            serde_json::from_str(json).map_err(|e| CircuitError::Description(e.to_string()))?;
        Self::from_description(&description)
    }

    /// Builds a circuit from a deserialized description.
    pub fn from_description(description: &CircuitDescription) -> Result<Self, CircuitError> {
        let mut role_index = HashMap::new();
        for (i, name) in description.roles.iter().enumerate() {
            if role_index.insert(name.as_str(), Role(i)).is_some() {
                return Err(CircuitError::DuplicateRole(name.clone()));
            }
        }
        let lookup = |name: &str| {
            role_index
                .get(name)
                .copied()
                .ok_or_else(|| CircuitError::UnknownRole(name.to_string()))
        };

        let mut components = Vec::with_capacity(description.components.len());
        for spec in &description.components {
            let kind = match &spec.kind {
                SpecKind::Base { name } => proposition(name.clone(), PropKind::Base),
                SpecKind::Input { role, action } => {
                    input_proposition(lookup(role)?, role, Move::new(action))
                }
                SpecKind::Legal { role, action } => {
                    legal_proposition(lookup(role)?, role, Move::new(action))
                }
                SpecKind::Goal { role, value } => goal_proposition(lookup(role)?, role, *value),
                SpecKind::Init => proposition("init".into(), PropKind::Init),
                SpecKind::Terminal => proposition("terminal".into(), PropKind::Terminal),
                SpecKind::View { name } => proposition(name.clone(), PropKind::View),
                SpecKind::And => ComponentKind::And,
                SpecKind::Or => ComponentKind::Or,
                SpecKind::Not => ComponentKind::Not,
                SpecKind::Transition => ComponentKind::Transition,
                SpecKind::Constant { value } => ComponentKind::Constant(*value),
            };
            let inputs = spec.inputs.iter().copied().map(ComponentId).collect();
            components.push((kind, inputs));
        }
        assemble(description.roles.clone(), components)
    }

    pub fn component(&self, id: ComponentId) -> &Component {
        &self.components[id.0]
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Every proposition, in id order.
    pub fn propositions(&self) -> &[ComponentId] {
        &self.propositions
    }

    pub fn bases(&self) -> &[ComponentId] {
        &self.bases
    }

    pub fn inputs(&self) -> &[ComponentId] {
        &self.inputs
    }

    pub fn init(&self) -> ComponentId {
        self.init
    }

    pub fn terminal(&self) -> ComponentId {
        self.terminal
    }

    pub fn legals(&self, role: Role) -> &[ComponentId] {
        &self.legals[role.0]
    }

    pub fn goals(&self, role: Role) -> &[ComponentId] {
        &self.goals[role.0]
    }

    /// Returns the proposition's name, or an empty string for gates.
    pub fn name(&self, id: ComponentId) -> &str {
        match &self.components[id.0].kind {
            ComponentKind::Proposition { name, .. } => name,
            _ => "",
        }
    }

    pub fn prop_kind(&self, id: ComponentId) -> Option<&PropKind> {
        self.components[id.0].prop_kind()
    }

    pub fn is_base(&self, id: ComponentId) -> bool {
        matches!(self.prop_kind(id), Some(PropKind::Base))
    }

    pub fn is_input(&self, id: ComponentId) -> bool {
        matches!(self.prop_kind(id), Some(PropKind::Input { .. }))
    }

    /// Returns the input proposition for `role` playing `action`.
    pub fn input_for(&self, role: Role, action: &Move) -> Option<ComponentId> {
        self.input_map.get(&(role, action.clone())).copied()
    }

    /// Returns the input proposition paired with a legal proposition.
    pub fn input_of_legal(&self, legal: ComponentId) -> Option<ComponentId> {
        self.legal_to_input.get(&legal).copied()
    }

    /// Returns the legal proposition paired with an input proposition.
    pub fn legal_of_input(&self, input: ComponentId) -> Option<ComponentId> {
        self.input_to_legal.get(&input).copied()
    }

    /// Returns the value of a goal proposition.
    pub fn goal_value(&self, id: ComponentId) -> Option<u8> {
        match self.prop_kind(id) {
            Some(PropKind::Goal { value, .. }) => Some(*value),
            _ => None,
        }
    }
}

/// Serialized form of a circuit, as produced by a ruleset compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitDescription {
    pub roles: Vec<String>,
    pub components: Vec<ComponentSpec>,
}

/// One component of a [`CircuitDescription`]. Inputs refer to positions in the component list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(flatten)]
    pub kind: SpecKind,
    #[serde(default)]
    pub inputs: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpecKind {
    Base { name: String },
    Input { role: String, action: String },
    Legal { role: String, action: String },
    Goal { role: String, value: u8 },
    Init,
    Terminal,
    View { name: String },
    And,
    Or,
    Not,
    Transition,
    Constant { value: bool },
}

/// Assembles a circuit component by component.
///
/// Component ids are handed out in creation order. Conditions may reference any component created earlier; a base
/// proposition is wired to its successor condition with [`next`](CircuitBuilder::next) once that condition exists.
#[derive(Debug, Default)]
pub struct CircuitBuilder {
    roles: Vec<String>,
    components: Vec<(ComponentKind, Vec<ComponentId>)>,
}

impl CircuitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(&mut self, name: &str) -> Role {
        self.roles.push(name.to_string());
        Role(self.roles.len() - 1)
    }

    pub fn base(&mut self, name: &str) -> ComponentId {
        self.push(proposition(name.to_string(), PropKind::Base), Vec::new())
    }

    pub fn input(&mut self, role: Role, action: &str) -> ComponentId {
        let kind = input_proposition(role, self.role_name(role), Move::new(action));
        self.push(kind, Vec::new())
    }

    pub fn legal(&mut self, role: Role, action: &str, condition: ComponentId) -> ComponentId {
        let kind = legal_proposition(role, self.role_name(role), Move::new(action));
        self.push(kind, vec![condition])
    }

    pub fn goal(&mut self, role: Role, value: u8, condition: ComponentId) -> ComponentId {
        let kind = goal_proposition(role, self.role_name(role), value);
        self.push(kind, vec![condition])
    }

    pub fn init(&mut self) -> ComponentId {
        self.push(proposition("init".into(), PropKind::Init), Vec::new())
    }

    pub fn terminal(&mut self, condition: ComponentId) -> ComponentId {
        self.push(proposition("terminal".into(), PropKind::Terminal), vec![condition])
    }

    pub fn view(&mut self, name: &str, condition: ComponentId) -> ComponentId {
        self.push(proposition(name.to_string(), PropKind::View), vec![condition])
    }

    pub fn and(&mut self, inputs: &[ComponentId]) -> ComponentId {
        self.push(ComponentKind::And, inputs.to_vec())
    }

    pub fn or(&mut self, inputs: &[ComponentId]) -> ComponentId {
        self.push(ComponentKind::Or, inputs.to_vec())
    }

    pub fn not(&mut self, input: ComponentId) -> ComponentId {
        self.push(ComponentKind::Not, vec![input])
    }

    pub fn constant(&mut self, value: bool) -> ComponentId {
        self.push(ComponentKind::Constant(value), Vec::new())
    }

    /// Makes `condition` the value of `base` in the next state. Returns the transition.
    pub fn next(&mut self, base: ComponentId, condition: ComponentId) -> ComponentId {
        let transition = self.push(ComponentKind::Transition, vec![condition]);
        if let Some((_, inputs)) = self.components.get_mut(base.0) {
            inputs.push(transition);
        }
        transition
    }

    pub fn build(self) -> Result<CircuitGraph, CircuitError> {
        assemble(self.roles, self.components)
    }

    fn push(&mut self, kind: ComponentKind, inputs: Vec<ComponentId>) -> ComponentId {
        self.components.push((kind, inputs));
        ComponentId(self.components.len() - 1)
    }

    fn role_name(&self, role: Role) -> &str {
        self.roles.get(role.0).map(String::as_str).unwrap_or("?")
    }
}

fn proposition(name: String, kind: PropKind) -> ComponentKind {
    ComponentKind::Proposition { name, kind }
}

fn input_proposition(role: Role, role_name: &str, action: Move) -> ComponentKind {
    let name = format!("(does {} {})", role_name, action);
    proposition(name, PropKind::Input { role, action })
}

fn legal_proposition(role: Role, role_name: &str, action: Move) -> ComponentKind {
    let name = format!("(legal {} {})", role_name, action);
    proposition(name, PropKind::Legal { role, action })
}

fn goal_proposition(role: Role, role_name: &str, value: u8) -> ComponentKind {
    let name = format!("(goal {} {})", role_name, value);
    proposition(name, PropKind::Goal { role, value })
}

// Validates the components, wires output edges and indexes the distinguished propositions.
fn assemble(
    roles: Vec<String>,
    raw: Vec<(ComponentKind, Vec<ComponentId>)>,
) -> Result<CircuitGraph, CircuitError> {
    let mut seen_roles = HashSet::new();
    for name in &roles {
        if !seen_roles.insert(name.as_str()) {
            return Err(CircuitError::DuplicateRole(name.clone()));
        }
    }

    let count = raw.len();
    let mut components: Vec<Component> = raw
        .into_iter()
        .map(|(kind, inputs)| Component {
            kind,
            inputs,
            outputs: Vec::new(),
        })
        .collect();

    for i in 0..count {
        for k in 0..components[i].inputs.len() {
            let input = components[i].inputs[k];
            if input.0 >= count {
                return Err(CircuitError::UnknownComponent(input.0));
            }
            components[input.0].outputs.push(ComponentId(i));
        }
    }

    if let Some(length) = gate_cycle(&components) {
        return Err(CircuitError::Cyclic { remaining: length });
    }

    let mut propositions = Vec::new();
    let mut bases = Vec::new();
    let mut inputs = Vec::new();
    let mut init = None;
    let mut terminal = None;
    let mut legals = vec![Vec::new(); roles.len()];
    let mut goals = vec![Vec::new(); roles.len()];
    let mut input_map = HashMap::new();

    for (i, component) in components.iter().enumerate() {
        let id = ComponentId(i);
        match &component.kind {
            ComponentKind::Proposition { name, kind } => {
                propositions.push(id);
                match kind {
                    PropKind::Base => {
                        let has_transition = component.inputs.len() == 1
                            && matches!(components[component.inputs[0].0].kind, ComponentKind::Transition);
                        if !has_transition {
                            return Err(CircuitError::BaseWithoutTransition(name.clone()));
                        }
                        bases.push(id);
                    }
                    PropKind::Input { role, action } => {
                        check_role(&roles, *role)?;
                        input_map.insert((*role, action.clone()), id);
                        inputs.push(id);
                    }
                    PropKind::Init => {
                        if init.replace(id).is_some() {
                            return Err(CircuitError::Duplicate("init"));
                        }
                    }
                    PropKind::Terminal => {
                        if terminal.replace(id).is_some() {
                            return Err(CircuitError::Duplicate("terminal"));
                        }
                    }
                    PropKind::Legal { role, .. } => {
                        check_role(&roles, *role)?;
                        legals[role.0].push(id);
                    }
                    PropKind::Goal { role, .. } => {
                        check_role(&roles, *role)?;
                        goals[role.0].push(id);
                    }
                    PropKind::View => {}
                }
                let derived = !matches!(kind, PropKind::Base | PropKind::Input { .. } | PropKind::Init);
                if derived && component.inputs.len() > 1 {
                    return Err(CircuitError::Description(format!(
                        "proposition `{}` has {} inputs",
                        name,
                        component.inputs.len()
                    )));
                }
            }
            ComponentKind::Not | ComponentKind::Transition if component.inputs.len() != 1 => {
                return Err(CircuitError::Description(format!(
                    "component {} must have exactly one input",
                    id
                )));
            }
            _ => {}
        }
    }

    let mut legal_to_input = HashMap::new();
    let mut input_to_legal = HashMap::new();
    for (r, role_legals) in legals.iter().enumerate() {
        for &legal in role_legals {
            if let Some(PropKind::Legal { action, .. }) = components[legal.0].prop_kind() {
                if let Some(&input) = input_map.get(&(Role(r), action.clone())) {
                    legal_to_input.insert(legal, input);
                    input_to_legal.insert(input, legal);
                }
            }
        }
    }

    Ok(CircuitGraph {
        components,
        roles,
        propositions,
        bases,
        inputs,
        init: init.ok_or(CircuitError::Missing("init"))?,
        terminal: terminal.ok_or(CircuitError::Missing("terminal"))?,
        legals,
        goals,
        input_map,
        legal_to_input,
        input_to_legal,
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

// Looks for a loop made only of gates and returns its length. A proposition ends a path because evaluation reads its
// stored value instead of recursing into its input.
fn gate_cycle(components: &[Component]) -> Option<usize> {
    let is_gate = |i: usize| !components[i].is_proposition();
    let mut colour = vec![Colour::White; components.len()];
    for start in 0..components.len() {
        if !is_gate(start) || colour[start] != Colour::White {
            continue;
        }
        colour[start] = Colour::Grey;
        // Each entry is a gate on the current path and the index of its next input to visit.
        let mut path: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some((node, k)) = path.pop() {
            let Some(&ComponentId(input)) = components[node].inputs.get(k) else {
                colour[node] = Colour::Black;
                continue;
            };
            path.push((node, k + 1));
            if !is_gate(input) {
                continue;
            }
            match colour[input] {
                Colour::White => {
                    colour[input] = Colour::Grey;
                    path.push((input, 0));
                }
                Colour::Grey => {
                    let entry = path.iter().position(|&(n, _)| n == input).unwrap_or(0);
                    return Some(path.len() - entry);
                }
                Colour::Black => {}
            }
        }
    }
    None
}

fn check_role(roles: &[String], role: Role) -> Result<(), CircuitError> {
    if role.0 < roles.len() {
        Ok(())
    } else {
        Err(CircuitError::UnknownRole(format!("#{}", role.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button_builder() -> CircuitBuilder {
        let mut b = CircuitBuilder::new();
        let robot = b.role("robot");
        b.init();
        let pressed = b.base("(pressed)");
        let press = b.input(robot, "press");
        let next_pressed = b.or(&[pressed, press]);
        b.next(pressed, next_pressed);
        let not_pressed = b.not(pressed);
        b.legal(robot, "press", not_pressed);
        b.terminal(pressed);
        b.goal(robot, 100, pressed);
        b.goal(robot, 0, not_pressed);
        b
    }

    #[test]
    fn test_build_indexes_distinguished_propositions() {
        let circuit = button_builder().build().unwrap();
        let robot = Role(0);

        assert_eq!(circuit.roles(), &["robot".to_string()]);
        assert_eq!(circuit.bases().len(), 1);
        assert_eq!(circuit.inputs().len(), 1);
        assert_eq!(circuit.legals(robot).len(), 1);
        assert_eq!(circuit.goals(robot).len(), 2);
        assert_eq!(circuit.name(circuit.init()), "init");
        assert_eq!(circuit.name(circuit.terminal()), "terminal");

        let input = circuit.input_for(robot, &Move::new("press")).unwrap();
        assert_eq!(circuit.name(input), "(does robot press)");
        let legal = circuit.legals(robot)[0];
        assert_eq!(circuit.input_of_legal(legal), Some(input));
        assert_eq!(circuit.legal_of_input(input), Some(legal));
    }

    #[test]
    fn test_outputs_are_wired() {
        let circuit = button_builder().build().unwrap();
        let pressed = circuit.bases()[0];
        // The OR gate, the NOT gate, terminal and the winning goal all read `pressed`.
        assert_eq!(circuit.component(pressed).outputs().len(), 4);
    }

    #[test]
    fn test_missing_terminal_is_rejected() {
        let mut b = CircuitBuilder::new();
        b.role("robot");
        b.init();
        assert_eq!(b.build().unwrap_err(), CircuitError::Missing("terminal"));
    }

    #[test]
    fn test_base_without_transition_is_rejected() {
        let mut b = CircuitBuilder::new();
        b.role("robot");
        b.init();
        let stuck = b.base("(stuck)");
        b.terminal(stuck);
        assert_eq!(b.build().unwrap_err(), CircuitError::BaseWithoutTransition("(stuck)".into()));
    }

    #[test]
    fn test_duplicate_role_is_rejected() {
        let mut b = button_builder();
        b.role("robot");
        assert_eq!(b.build().unwrap_err(), CircuitError::DuplicateRole("robot".into()));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "roles": ["robot"],
            "components": [
                { "type": "init" },
                { "type": "base", "name": "(pressed)", "inputs": [4] },
                { "type": "input", "role": "robot", "action": "press" },
                { "type": "or", "inputs": [1, 2] },
                { "type": "transition", "inputs": [3] },
                { "type": "not", "inputs": [1] },
                { "type": "legal", "role": "robot", "action": "press", "inputs": [5] },
                { "type": "terminal", "inputs": [1] },
                { "type": "goal", "role": "robot", "value": 100, "inputs": [1] },
                { "type": "goal", "role": "robot", "value": 0, "inputs": [5] }
            ]
        }"#;
        let circuit = CircuitGraph::from_json(json).unwrap();
        assert_eq!(circuit.len(), 10);
        assert_eq!(circuit.bases(), &[ComponentId(1)]);
        assert_eq!(circuit.goal_value(ComponentId(8)), Some(100));
        assert!(circuit.is_input(ComponentId(2)));
    }

    #[test]
    fn test_from_json_unknown_role() {
        let json = r#"{
            "roles": ["robot"],
            "components": [
                { "type": "init" },
                { "type": "input", "role": "ghost", "action": "boo" }
            ]
        }"#;
        assert_eq!(
            CircuitGraph::from_json(json).unwrap_err(),
            CircuitError::UnknownRole("ghost".into())
        );
    }

    #[test]
    fn test_dangling_input_is_rejected() {
        let json = r#"{
            "roles": [],
            "components": [ { "type": "not", "inputs": [7] } ]
        }"#;
        assert_eq!(CircuitGraph::from_json(json).unwrap_err(), CircuitError::UnknownComponent(7));
    }

    #[test]
    fn test_gate_cycle_is_rejected() {
        // or#1 <- and#2 <- or#1, with no proposition on the loop.
        let json = r#"{
            "roles": ["solo"],
            "components": [
                { "type": "init" },
                { "type": "or", "inputs": [2] },
                { "type": "and", "inputs": [1] },
                { "type": "terminal", "inputs": [1] }
            ]
        }"#;
        assert_eq!(CircuitGraph::from_json(json).unwrap_err(), CircuitError::Cyclic { remaining: 2 });
    }

    #[test]
    fn test_gate_self_loop_is_rejected() {
        let json = r#"{
            "roles": ["solo"],
            "components": [
                { "type": "init" },
                { "type": "or", "inputs": [0, 1] },
                { "type": "terminal", "inputs": [1] }
            ]
        }"#;
        assert_eq!(CircuitGraph::from_json(json).unwrap_err(), CircuitError::Cyclic { remaining: 1 });
    }

    #[test]
    fn test_gates_sharing_an_input_are_not_a_cycle() {
        let mut b = button_builder();
        let pressed = ComponentId(1);
        let left = b.not(pressed);
        let right = b.and(&[pressed, left]);
        b.or(&[left, right]);
        assert!(b.build().is_ok());
    }
}
