// Small circuits shared by the unit tests.

use std::collections::HashMap;

use crate::cancel::CancelToken;
use crate::circuit::{CircuitBuilder, CircuitGraph, ComponentId};
use crate::error::GameError;
use crate::heuristic::Heuristic;
use crate::state::{MachineState, Move, Role};
use crate::state_machine::StateMachine;

/// A heuristic that always returns the same value.
pub(crate) struct Fixed(pub Option<u8>);

impl Heuristic for Fixed {
    fn score(
        &mut self,
        _machine: &StateMachine,
        _state: &MachineState,
        _role: Role,
        _cancel: &CancelToken,
    ) -> Result<Option<u8>, GameError> {
        Ok(self.0)
    }

    fn fork(&mut self) -> Box<dyn Heuristic> {
        Box::new(Fixed(self.0))
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

pub(crate) struct TicTacToe {
    pub machine: StateMachine,
    pub x: Role,
    pub o: Role,
}

impl TicTacToe {
    pub fn mark(&self, m: usize, n: usize) -> Move {
        Move::new(format!("(mark {} {})", m, n))
    }

    pub fn noop(&self) -> Move {
        Move::new("noop")
    }

    /// Plays the marks in order, x first, and returns the resulting state.
    pub fn play(&self, marks: &[(usize, usize)]) -> MachineState {
        let mut state = self.machine.initial_state();
        for (i, &(m, n)) in marks.iter().enumerate() {
            let joint = if i % 2 == 0 {
                vec![self.mark(m, n), self.noop()]
            } else {
                vec![self.noop(), self.mark(m, n)]
            };
            state = self.machine.next_state(&state, &joint).unwrap();
        }
        state
    }
}

pub(crate) fn tic_tac_toe() -> TicTacToe {
    let machine = StateMachine::new(tic_tac_toe_circuit()).unwrap();
    TicTacToe {
        machine,
        x: Role(0),
        o: Role(1),
    }
}

pub(crate) fn tic_tac_toe_circuit() -> CircuitGraph {
    let mut b = CircuitBuilder::new();
    let x = b.role("xplayer");
    let o = b.role("oplayer");
    let init = b.init();

    let mut cell: HashMap<(usize, usize, char), ComponentId> = HashMap::new();
    for m in 1..=3 {
        for n in 1..=3 {
            for k in ['x', 'o', 'b'] {
                cell.insert((m, n, k), b.base(&format!("(cell {} {} {})", m, n, k)));
            }
        }
    }
    let control_x = b.base("(control xplayer)");
    let control_o = b.base("(control oplayer)");

    let mut does = HashMap::new();
    for m in 1..=3 {
        for n in 1..=3 {
            let action = format!("(mark {} {})", m, n);
            does.insert((x, m, n), b.input(x, &action));
            does.insert((o, m, n), b.input(o, &action));
        }
    }
    b.input(x, "noop");
    b.input(o, "noop");

    for m in 1..=3 {
        for n in 1..=3 {
            let (dx, d_o) = (does[&(x, m, n)], does[&(o, m, n)]);
            let keep_x = b.or(&[cell[&(m, n, 'x')], dx]);
            b.next(cell[&(m, n, 'x')], keep_x);
            let keep_o = b.or(&[cell[&(m, n, 'o')], d_o]);
            b.next(cell[&(m, n, 'o')], keep_o);
            let not_dx = b.not(dx);
            let not_do = b.not(d_o);
            let untouched = b.and(&[cell[&(m, n, 'b')], not_dx, not_do]);
            let keep_b = b.or(&[untouched, init]);
            b.next(cell[&(m, n, 'b')], keep_b);

            let action = format!("(mark {} {})", m, n);
            let x_may = b.and(&[cell[&(m, n, 'b')], control_x]);
            b.legal(x, &action, x_may);
            let o_may = b.and(&[cell[&(m, n, 'b')], control_o]);
            b.legal(o, &action, o_may);
        }
    }
    let next_x = b.or(&[control_o, init]);
    b.next(control_x, next_x);
    let next_o = b.or(&[control_x]);
    b.next(control_o, next_o);
    b.legal(x, "noop", control_o);
    b.legal(o, "noop", control_x);

    let mut lines = Vec::new();
    for i in 1..=3 {
        lines.push([(i, 1), (i, 2), (i, 3)]);
        lines.push([(1, i), (2, i), (3, i)]);
    }
    lines.push([(1, 1), (2, 2), (3, 3)]);
    lines.push([(1, 3), (2, 2), (3, 1)]);

    let line_of = |b: &mut CircuitBuilder, k: char| {
        let rows: Vec<ComponentId> = lines
            .iter()
            .map(|line| {
                let cells: Vec<ComponentId> = line.iter().map(|&(m, n)| cell[&(m, n, k)]).collect();
                b.and(&cells)
            })
            .collect();
        let any = b.or(&rows);
        b.view(&format!("(line {})", k), any)
    };
    let line_x = line_of(&mut b, 'x');
    let line_o = line_of(&mut b, 'o');

    let blanks: Vec<ComponentId> = (1..=3)
        .flat_map(|m| (1..=3).map(move |n| (m, n)))
        .map(|(m, n)| cell[&(m, n, 'b')])
        .collect();
    let any_blank = b.or(&blanks);
    let open = b.view("open", any_blank);
    let closed = b.not(open);
    let over = b.or(&[line_x, line_o, closed]);
    b.terminal(over);

    let no_x = b.not(line_x);
    let no_o = b.not(line_o);
    let draw = b.and(&[no_x, no_o]);
    b.goal(x, 100, line_x);
    b.goal(x, 50, draw);
    b.goal(x, 0, line_o);
    b.goal(o, 100, line_o);
    b.goal(o, 50, draw);
    b.goal(o, 0, line_x);

    b.build().unwrap()
}

/// A one-role circuit with `L <- L or X`, or `L <- (L or X) and not Y` when `resettable`. Returns the machine and L.
pub(crate) fn latch(resettable: bool) -> (StateMachine, ComponentId) {
    let mut b = CircuitBuilder::new();
    let solo = b.role("solo");
    b.init();
    let l = b.base("(lit)");
    let set = b.input(solo, "set");
    let reset = b.input(solo, "reset");
    let held = b.or(&[l, set]);
    let next = if resettable {
        let not_reset = b.not(reset);
        b.and(&[held, not_reset])
    } else {
        held
    };
    b.next(l, next);

    let always = b.constant(true);
    b.legal(solo, "set", always);
    b.legal(solo, "reset", always);
    let not_lit = b.not(l);
    b.terminal(l);
    b.goal(solo, 100, l);
    b.goal(solo, 0, not_lit);

    (StateMachine::new(b.build().unwrap()).unwrap(), l)
}

/// A one-role puzzle won by lighting either of two lamps, each with its own switch. With `shared`, a third switch
/// lights both lamps, so the two halves are no longer independent. A `noop` move touches nothing.
pub(crate) fn two_lamps(shared: bool) -> StateMachine {
    let mut b = CircuitBuilder::new();
    let solo = b.role("solo");
    b.init();
    let a = b.base("(lamp a)");
    let c = b.base("(lamp b)");
    let press_a = b.input(solo, "(press a)");
    let press_b = b.input(solo, "(press b)");
    b.input(solo, "noop");
    let (next_a, next_b) = if shared {
        let press_both = b.input(solo, "(press both)");
        let always = b.constant(true);
        b.legal(solo, "(press both)", always);
        (b.or(&[a, press_a, press_both]), b.or(&[c, press_b, press_both]))
    } else {
        (b.or(&[a, press_a]), b.or(&[c, press_b]))
    };
    b.next(a, next_a);
    b.next(c, next_b);

    let dark_a = b.not(a);
    let dark_b = b.not(c);
    b.legal(solo, "(press a)", dark_a);
    b.legal(solo, "(press b)", dark_b);
    let always = b.constant(true);
    b.legal(solo, "noop", always);

    let either = b.or(&[a, c]);
    let win = b.view("win", either);
    let lose = b.not(win);
    b.terminal(win);
    b.goal(solo, 100, win);
    b.goal(solo, 0, lose);

    StateMachine::new(b.build().unwrap()).unwrap()
}

/// A one-role game that ends after two moves. Playing `good` twice wins; `bad` lights a fuse that can never be put
/// out, and a lit fuse rules out the win. Returns the machine and the fuse.
pub(crate) fn fuse() -> (StateMachine, ComponentId) {
    let mut b = CircuitBuilder::new();
    let solo = b.role("solo");
    let init = b.init();
    let step1 = b.base("(step 1)");
    let step2 = b.base("(step 2)");
    let step3 = b.base("(step 3)");
    let fuse = b.base("(fuse)");
    b.input(solo, "good");
    let bad = b.input(solo, "bad");
    let first = b.or(&[init]);
    b.next(step1, first);
    let second = b.or(&[step1]);
    b.next(step2, second);
    let third = b.or(&[step2]);
    b.next(step3, third);
    let burning = b.or(&[fuse, bad]);
    b.next(fuse, burning);

    let always = b.constant(true);
    b.legal(solo, "good", always);
    b.legal(solo, "bad", always);

    let no_fuse = b.not(fuse);
    let won = b.and(&[step3, no_fuse]);
    let win = b.view("win", won);
    let lose = b.not(win);
    b.terminal(step3);
    b.goal(solo, 100, win);
    b.goal(solo, 0, lose);

    (StateMachine::new(b.build().unwrap()).unwrap(), fuse)
}

/// A one-role game: `go`, then either `win` at once or `slow` followed by `win`. Every playout is won, and `slow` is
/// the first legal move in the state after `go`.
pub(crate) fn shortcut() -> StateMachine {
    let mut b = CircuitBuilder::new();
    let solo = b.role("solo");
    let init = b.init();
    let start = b.base("(start)");
    let ready = b.base("(ready)");
    let waited = b.base("(waited)");
    let won = b.base("(won)");
    let go = b.input(solo, "go");
    let slow = b.input(solo, "slow");
    let win = b.input(solo, "win");
    let begin = b.or(&[init]);
    b.next(start, begin);
    let went = b.or(&[go]);
    b.next(ready, went);
    let slowed = b.or(&[slow]);
    b.next(waited, slowed);
    let finished = b.or(&[win]);
    b.next(won, finished);

    b.legal(solo, "go", start);
    b.legal(solo, "slow", ready);
    let may_win = b.or(&[ready, waited]);
    b.legal(solo, "win", may_win);

    let lost = b.not(won);
    b.terminal(won);
    b.goal(solo, 100, won);
    b.goal(solo, 0, lost);

    StateMachine::new(b.build().unwrap()).unwrap()
}

/// A one-role game. Move `a` ends the game worth 50. Move `b` leads through two `c` moves to a terminal state in which
/// two goal propositions are true.
pub(crate) fn detour() -> StateMachine {
    let mut b = CircuitBuilder::new();
    let solo = b.role("solo");
    let init = b.init();
    let start = b.base("(start)");
    let done = b.base("(done)");
    let mid1 = b.base("(mid 1)");
    let mid2 = b.base("(mid 2)");
    let bad = b.base("(bad)");
    let a = b.input(solo, "a");
    let take_b = b.input(solo, "b");
    let c = b.input(solo, "c");
    let begin = b.or(&[init]);
    b.next(start, begin);
    let took_a = b.or(&[a]);
    b.next(done, took_a);
    let took_b = b.or(&[take_b]);
    b.next(mid1, took_b);
    let second = b.and(&[mid1, c]);
    b.next(mid2, second);
    let third = b.and(&[mid2, c]);
    b.next(bad, third);

    b.legal(solo, "a", start);
    b.legal(solo, "b", start);
    let walking = b.or(&[mid1, mid2]);
    b.legal(solo, "c", walking);

    let over = b.or(&[done, bad]);
    b.terminal(over);
    b.goal(solo, 50, done);
    b.goal(solo, 0, bad);
    b.goal(solo, 100, bad);

    StateMachine::new(b.build().unwrap()).unwrap()
}

/// A one-role puzzle won by lighting either of two lamps. Lamp b lights with one press of its switch, lamp a only
/// after four presses of its own. Pulling the trap jams the switch of lamp a and ends the game lost.
pub(crate) fn trapdoor() -> StateMachine {
    let mut b = CircuitBuilder::new();
    let solo = b.role("solo");
    b.init();
    let charge: Vec<ComponentId> = (1..=3).map(|k| b.base(&format!("(charge {})", k))).collect();
    let lamp_a = b.base("(lamp a)");
    let lamp_b = b.base("(lamp b)");
    let fallen = b.base("(fallen)");
    let press_a = b.input(solo, "(press a)");
    let press_b = b.input(solo, "(press b)");
    let trap = b.input(solo, "trap");

    let first = b.or(&[charge[0], press_a]);
    b.next(charge[0], first);
    for k in 1..3 {
        let advanced = b.and(&[charge[k - 1], press_a]);
        let held = b.or(&[charge[k], advanced]);
        b.next(charge[k], held);
    }
    let free = b.not(trap);
    let lit_a = b.and(&[charge[2], press_a, free]);
    let next_a = b.or(&[lamp_a, lit_a]);
    b.next(lamp_a, next_a);
    let next_b = b.or(&[lamp_b, press_b]);
    b.next(lamp_b, next_b);
    let falling = b.or(&[fallen, trap]);
    b.next(fallen, falling);

    let always = b.constant(true);
    b.legal(solo, "(press a)", always);
    b.legal(solo, "trap", always);
    let dark_b = b.not(lamp_b);
    b.legal(solo, "(press b)", dark_b);

    let either = b.or(&[lamp_a, lamp_b]);
    let win = b.view("win", either);
    let lose = b.not(win);
    let over = b.or(&[win, fallen]);
    b.terminal(over);
    b.goal(solo, 100, win);
    b.goal(solo, 0, lose);

    StateMachine::new(b.build().unwrap()).unwrap()
}

/// Plain minimax over every joint move, without pruning, caching or a depth limit.
pub(crate) fn minimax_value(machine: &StateMachine, role: Role, state: &MachineState) -> u8 {
    if machine.is_terminal(state) {
        return machine.goal(state, role).unwrap();
    }
    machine
        .legal_moves(state, role)
        .unwrap()
        .iter()
        .map(|m| {
            machine
                .legal_joint_moves_with(state, role, m)
                .unwrap()
                .iter()
                .map(|joint| minimax_value(machine, role, &machine.next_state(state, joint).unwrap()))
                .min()
                .unwrap()
        })
        .max()
        .unwrap()
}
