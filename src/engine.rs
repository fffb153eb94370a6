//! Iterative-Deepening Move Selection
//!
//! [`SearchEngine`] picks a move for one role within a deadline. It runs depth-limited alpha-beta passes (see
//! [`minimax`](crate::minimax)) with an increasing depth limit and commits the best move of each pass, until the game
//! tree is solved, a win is proven, the depth ceiling is reached, or time runs out.
//!
//! # Concurrency
//!
//! The passes run on a scoped worker thread. The calling thread is a watchdog: it logs the progress reports of the
//! worker and trips the [`CancelToken`] at `deadline - safety_margin`. The token also carries that instant itself, so
//! a pass stops on time even between reports. [`get_best_move`](SearchEngine::get_best_move) always returns a legal
//! move, falling back to a random one if nothing was committed in time.
//!
//! # Factored search
//!
//! With `factor_aware` set, a game whose winning condition decomposes into independent [`Factor`]s is searched factor
//! by factor, optionally in parallel with one cache and one forked heuristic per factor. Before that, each factor is
//! searched briefly for a move that loses by force; if one is found, only that factor is searched. The move played is
//! the best move of the factor with the best value. This is exact for one-role puzzles whose factors are truly
//! independent and approximate otherwise.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::analyzer::{Factor, StructuralAnalyzer};
use crate::cancel::CancelToken;
use crate::config::{HeuristicKind, SearchConfig};
use crate::error::GameError;
use crate::heuristic::{Focus, Heuristic, HybridMobility, Mobility, OpponentMobility};
use crate::minimax::{choose, Context, Search, SearchResult, Solver};
use crate::rollout::{FocusedMonteCarlo, MonteCarlo};
use crate::state::{MachineState, Move, Role};
use crate::state_machine::StateMachine;
use crate::transposition_table::{CacheStats, TranspositionCache};

/// Why the engine stopped deepening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepeningOutcome {
    /// The last pass resolved every root move exactly; deeper passes would find nothing new.
    Exhausted,
    /// The search was cancelled, or a pass failed after a move had been committed.
    Cutoff,
    /// The depth limit reached `max_depth`.
    DepthCeiling,
    /// A move proven to win was committed.
    Won,
}

/// Counters of one decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Passes run, summed over factors.
    pub passes: u32,
    /// Max nodes expanded, summed over factors.
    pub nodes: u64,
    /// Factors searched, or zero if the game was searched whole.
    pub factors: usize,
    /// Cache lookups since the caches were last cleared.
    pub cache: CacheStats,
    pub max_entries: usize,
    pub min_entries: usize,
}

/// The move chosen by [`SearchEngine::best_move_with_value`] and how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub chosen: Move,
    /// Value of the chosen move, or `None` if it is a random fallback.
    pub value: Option<SearchResult>,
    /// Depth limit of the last pass.
    pub depth: u32,
    pub outcome: DeepeningOutcome,
    pub stats: SearchStats,
}

/// Picks moves for one game by iterative-deepening alpha-beta search.
///
/// The transposition caches and the heuristic persist between decisions of the same match. Call
/// [`clear`](Self::clear) between matches.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::{Duration, Instant};
/// use circuit_game_player::{CircuitBuilder, SearchConfig, SearchEngine, StateMachine};
///
/// // One move: light the lamp and win.
/// let mut b = CircuitBuilder::new();
/// let solo = b.role("solo");
/// b.init();
/// let lamp = b.base("(lamp)");
/// let press = b.input(solo, "press");
/// let lit = b.or(&[lamp, press]);
/// b.next(lamp, lit);
/// let dark = b.not(lamp);
/// b.legal(solo, "press", dark);
/// b.terminal(lamp);
/// b.goal(solo, 100, lamp);
/// b.goal(solo, 0, dark);
/// let machine = Arc::new(StateMachine::new(b.build().unwrap()).unwrap());
///
/// let state = machine.initial_state();
/// let role = machine.role("solo").unwrap();
/// let mut engine = SearchEngine::new(Arc::clone(&machine), SearchConfig::default());
/// let chosen = engine.get_best_move(&state, role, Instant::now() + Duration::from_secs(5)).unwrap();
/// assert_eq!(chosen.term(), "press");
/// ```
pub struct SearchEngine {
    machine: Arc<StateMachine>,
    config: SearchConfig,
    heuristic: Option<Box<dyn Heuristic>>,
    analyzer: Option<StructuralAnalyzer>,
    factors: Vec<Factor>,
    cache: TranspositionCache,
    factor_caches: Vec<TranspositionCache>,
    rng: StdRng,
}

impl SearchEngine {
    /// Creates an engine with the heuristic named by `config.heuristic`. With none, passes cut off at the depth limit
    /// leave those branches unknown.
    ///
    /// Structural analysis runs here, once per game, if the configuration asks for dead-state pruning or factoring.
    pub fn new(machine: Arc<StateMachine>, config: SearchConfig) -> Self {
        let mut analyzer = None;
        let mut factors = Vec::new();
        if config.dead_state_pruning || config.factor_aware {
            let mut a = StructuralAnalyzer::new(Arc::clone(&machine));
            if config.dead_state_pruning {
                a.detect_latches();
            }
            if config.factor_aware {
                factors = a.propnet_factors();
                if factors.len() < 2 {
                    factors.clear();
                }
            }
            analyzer = Some(a);
        }
        let factor_caches = factors.iter().map(|_| TranspositionCache::new()).collect();
        let rng = config.seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let heuristic = configured_heuristic(&config);
        if let Some(h) = heuristic.as_ref() {
            debug!("scoring the search frontier with {}", h.name());
        }
        Self {
            machine,
            config,
            heuristic,
            analyzer,
            factors,
            cache: TranspositionCache::new(),
            factor_caches,
            rng,
        }
    }

    /// Scores states beyond the depth limit with `heuristic`, replacing the configured one.
    pub fn with_heuristic(mut self, heuristic: impl Heuristic + 'static) -> Self {
        self.heuristic = Some(Box::new(heuristic));
        self
    }

    pub fn machine(&self) -> &Arc<StateMachine> {
        &self.machine
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// The independent factors found at construction. Empty unless `factor_aware` is set and the game decomposes.
    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    /// Seeds the cache with the true values of max nodes, by canonical state key. Seeded values answer lookups of the
    /// whole-game search under any window; a factored search keeps its own caches.
    pub fn seed_cache(&mut self, values: impl IntoIterator<Item = (String, u8)>) {
        for (facts, value) in values {
            self.cache.seed(facts, value);
        }
    }

    /// Solves the game from `state` with unbounded minimax until `deadline`, and seeds the cache with every value
    /// found. Meant for the time before the first move. Returns the number of values seeded.
    ///
    /// # Errors
    /// A [`GameError`] if the ruleset is malformed. Nothing is seeded in that case.
    pub fn head_start(&mut self, state: &MachineState, role: Role, deadline: Instant) -> Result<usize, GameError> {
        let cutoff = deadline.checked_sub(self.config.safety_margin()).unwrap_or(deadline);
        let cancel = CancelToken::with_deadline(cutoff);
        let mut solver = Solver::new(&self.machine, role, &cancel);
        let value = solver.solve(state)?;
        let nodes = solver.nodes();
        let values = solver.into_values();
        let count = values.len();
        info!(
            "head start for {}: value {:?} after {} nodes, {} states solved",
            self.machine.role_name(role),
            value,
            nodes,
            count
        );
        self.seed_cache(values);
        Ok(count)
    }

    /// Drops every cached value and resets the heuristic.
    pub fn clear(&mut self) {
        self.cache.clear();
        for cache in &mut self.factor_caches {
            cache.clear();
        }
        if let Some(heuristic) = self.heuristic.as_mut() {
            heuristic.reset();
        }
    }

    /// Returns the best move for `role` found before `deadline`.
    ///
    /// # Errors
    /// A [`GameError`] if the ruleset is malformed and no move could be committed before the failure, or if the role
    /// has no legal move. Running out of time is not an error.
    pub fn get_best_move(&mut self, state: &MachineState, role: Role, deadline: Instant) -> Result<Move, GameError> {
        self.best_move_with_value(state, role, deadline).map(|decision| decision.chosen)
    }

    /// Like [`get_best_move`](Self::get_best_move), but also reports the value of the move and how it was found.
    pub fn best_move_with_value(
        &mut self,
        state: &MachineState,
        role: Role,
        deadline: Instant,
    ) -> Result<Decision, GameError> {
        let moves = self.machine.legal_moves(state, role)?;
        if moves.is_empty() {
            return Err(GameError::NoLegalMove(self.machine.role_name(role).to_string()));
        }

        let cutoff = deadline.checked_sub(self.config.safety_margin()).unwrap_or(deadline);
        let cancel = CancelToken::with_deadline(cutoff);
        if let Some(heuristic) = self.heuristic.as_mut() {
            heuristic.reset();
        }

        let (sender, receiver) = mpsc::channel();
        let engine = &mut *self;
        let joined = thread::scope(|scope| {
            let worker = scope.spawn(|| engine.search(state, role, &moves, &cancel, sender));
            watch(&receiver, &cancel, cutoff);
            worker.join()
        });
        let searched = match joined {
            Ok(result) => result?,
            Err(panic) => std::panic::resume_unwind(panic),
        };

        if cancel.is_cancelled() {
            if let Some(heuristic) = self.heuristic.as_mut() {
                heuristic.on_cancel();
            }
        }

        let (chosen, value) = match searched.committed {
            Some((m, value)) => (m, Some(value)),
            None => {
                warn!("no move was committed in time; playing a random legal move");
                let m = moves
                    .choose(&mut self.rng)
                    .cloned()
                    .ok_or_else(|| GameError::NoLegalMove(self.machine.role_name(role).to_string()))?;
                (m, None)
            }
        };
        let stats = self.stats(searched.passes, searched.nodes, searched.factors);
        info!(
            "{} plays {} ({:?}) after {} passes to depth {}, {:?}: {} nodes, {} + {} cache entries",
            self.machine.role_name(role),
            chosen,
            value,
            stats.passes,
            searched.depth,
            searched.outcome,
            stats.nodes,
            stats.max_entries,
            stats.min_entries
        );
        Ok(Decision {
            chosen,
            value,
            depth: searched.depth,
            outcome: searched.outcome,
            stats,
        })
    }

    // Runs on the worker thread.
    fn search(
        &mut self,
        state: &MachineState,
        role: Role,
        moves: &[Move],
        cancel: &CancelToken,
        progress: Sender<Progress>,
    ) -> Result<Deepened, GameError> {
        if !self.factors.is_empty() {
            if let Some(deepened) = self.search_factors(state, role, cancel, &progress)? {
                return Ok(deepened);
            }
            debug!("no factor offers a move; searching the whole game");
        }
        let deepening = Deepening {
            machine: &self.machine,
            role,
            config: &self.config,
            factor: None,
            analyzer: pruning_analyzer(&self.config, &self.machine, self.analyzer.as_ref(), role),
            cancel,
            progress: Some(progress),
            label: None,
        };
        deepening.run(
            state,
            moves,
            self.config.initial_depth,
            self.config.max_depth,
            &mut self.cache,
            self.heuristic.as_deref_mut(),
            &mut self.rng,
        )
    }

    // Searches each factor separately. Returns `None` if no factor has a legal move for the role.
    fn search_factors(
        &mut self,
        state: &MachineState,
        role: Role,
        cancel: &CancelToken,
        progress: &Sender<Progress>,
    ) -> Result<Option<Deepened>, GameError> {
        let analyzer = pruning_analyzer(&self.config, &self.machine, self.analyzer.as_ref(), role);
        let evaluation = self.machine.evaluate(state);
        let mut factor_moves = Vec::with_capacity(self.factors.len());
        for factor in &self.factors {
            factor_moves.push(factor.legal_moves(&evaluation, role)?);
        }

        // A factor in which some move loses by force gets the whole budget.
        let mut focus = None;
        for (index, factor) in self.factors.iter().enumerate() {
            if factor_moves[index].is_empty() || cancel.is_cancelled() {
                continue;
            }
            let scout = Deepening {
                machine: &self.machine,
                role,
                config: &self.config,
                factor: Some(factor),
                analyzer,
                cancel,
                progress: None,
                label: Some(index),
            };
            let depth = self.config.forced_loss_depth;
            let mut scratch = TranspositionCache::new();
            let scouted = scout.run(state, &factor_moves[index], depth, depth, &mut scratch, None, &mut self.rng)?;
            if scouted.results.iter().any(|(_, r)| *r == SearchResult::Exact(0)) {
                info!("factor {} can be lost by force; searching it alone", index);
                focus = Some(index);
                break;
            }
        }

        let mut jobs = Vec::new();
        for (index, (factor, cache)) in self.factors.iter().zip(self.factor_caches.iter_mut()).enumerate() {
            if focus.is_some_and(|f| f != index) || factor_moves[index].is_empty() {
                continue;
            }
            jobs.push(FactorJob {
                index,
                factor,
                moves: std::mem::take(&mut factor_moves[index]),
                cache,
                heuristic: self.heuristic.as_mut().map(|h| h.fork()),
                rng: StdRng::seed_from_u64(self.rng.gen()),
            });
        }
        if jobs.is_empty() {
            return Ok(None);
        }

        let machine: &StateMachine = &self.machine;
        let config = &self.config;
        let run = |job: &mut FactorJob<'_>| {
            let deepening = Deepening {
                machine,
                role,
                config,
                factor: Some(job.factor),
                analyzer,
                cancel,
                progress: Some(progress.clone()),
                label: Some(job.index),
            };
            deepening.run(
                state,
                &job.moves,
                config.initial_depth,
                config.max_depth,
                job.cache,
                job.heuristic.as_deref_mut(),
                &mut job.rng,
            )
        };
        let results: Vec<Result<Deepened, GameError>> = if config.parallel_factors {
            jobs.par_iter_mut().map(run).collect()
        } else {
            jobs.iter_mut().map(run).collect()
        };

        let mut combined = Deepened::new(config.initial_depth);
        combined.factors = jobs.len();
        let mut candidates = Vec::new();
        let mut exhausted = true;
        let mut failure = None;
        for (job, result) in jobs.iter().zip(results) {
            match result {
                Ok(deepened) => {
                    combined.passes += deepened.passes;
                    combined.nodes += deepened.nodes;
                    combined.depth = combined.depth.max(deepened.depth);
                    exhausted &= deepened.outcome == DeepeningOutcome::Exhausted;
                    if let Some(best) = deepened.committed {
                        debug!("factor {} offers {} ({:?})", job.index, best.0, best.1);
                        candidates.push(best);
                    }
                }
                Err(e) => {
                    warn!("search of factor {} failed: {}", job.index, e);
                    exhausted = false;
                    failure.get_or_insert(e);
                }
            }
        }

        combined.committed = choose(&candidates);
        if combined.committed.is_none() {
            if let Some(e) = failure.take() {
                return Err(e);
            }
        }
        combined.outcome = if combined.committed.as_ref().is_some_and(|(_, v)| *v == SearchResult::Exact(100)) {
            DeepeningOutcome::Won
        } else if cancel.is_cancelled() || failure.is_some() {
            DeepeningOutcome::Cutoff
        } else if exhausted {
            DeepeningOutcome::Exhausted
        } else {
            DeepeningOutcome::DepthCeiling
        };
        Ok(Some(combined))
    }

    fn stats(&self, passes: u32, nodes: u64, factors: usize) -> SearchStats {
        let caches = if self.factors.is_empty() {
            std::slice::from_ref(&self.cache)
        } else {
            &self.factor_caches[..]
        };
        let mut stats = SearchStats {
            passes,
            nodes,
            factors,
            ..SearchStats::default()
        };
        for cache in caches {
            let counts = cache.stats();
            stats.cache.max_lookups += counts.max_lookups;
            stats.cache.max_hits += counts.max_hits;
            stats.cache.min_lookups += counts.min_lookups;
            stats.cache.min_hits += counts.min_hits;
            stats.max_entries += cache.max_len();
            stats.min_entries += cache.min_len();
        }
        stats
    }
}

// The heuristic named by the configuration. Sampling heuristics are seeded from `config.seed` when it is set.
fn configured_heuristic(config: &SearchConfig) -> Option<Box<dyn Heuristic>> {
    let monte_carlo = || match config.seed {
        Some(seed) => MonteCarlo::seeded(config.monte_carlo.clone(), seed),
        None => MonteCarlo::new(config.monte_carlo.clone()),
    };
    let heuristic: Box<dyn Heuristic> = match config.heuristic {
        HeuristicKind::None => return None,
        HeuristicKind::MonteCarlo => Box::new(monte_carlo()),
        HeuristicKind::FocusedMonteCarlo => Box::new(FocusedMonteCarlo::new(monte_carlo())),
        HeuristicKind::Mobility => Box::new(Mobility),
        HeuristicKind::HybridMobility => Box::new(config.seed.map_or_else(HybridMobility::new, HybridMobility::seeded)),
        HeuristicKind::Focus => Box::new(Focus),
        HeuristicKind::OpponentMobility => Box::new(OpponentMobility),
    };
    Some(heuristic)
}

// The analyzer, if dead states are to be pruned for `role`. Pruning needs a winning goal to rule out.
fn pruning_analyzer<'a>(
    config: &SearchConfig,
    machine: &StateMachine,
    analyzer: Option<&'a StructuralAnalyzer>,
    role: Role,
) -> Option<&'a StructuralAnalyzer> {
    analyzer.filter(|_| config.dead_state_pruning && machine.winning_goal(role).is_some())
}

// Report sent to the watchdog after each pass.
#[derive(Debug)]
struct Progress {
    factor: Option<usize>,
    depth: u32,
    best: Option<(Move, SearchResult)>,
}

// Logs progress until the worker finishes or the cutoff passes, then cancels the search.
fn watch(receiver: &Receiver<Progress>, cancel: &CancelToken, cutoff: Instant) {
    loop {
        let remaining = cutoff.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(remaining) {
            Ok(progress) => match progress.factor {
                Some(factor) => debug!("factor {}, depth {}: {:?}", factor, progress.depth, progress.best),
                None => debug!("depth {}: {:?}", progress.depth, progress.best),
            },
            Err(RecvTimeoutError::Timeout) => {
                debug!("deadline reached; cancelling the search");
                cancel.cancel();
                return;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

// One factor's share of a factored decision.
struct FactorJob<'a> {
    index: usize,
    factor: &'a Factor,
    moves: Vec<Move>,
    cache: &'a mut TranspositionCache,
    heuristic: Option<Box<dyn Heuristic>>,
    rng: StdRng,
}

// The result of a sequence of passes.
#[derive(Debug)]
struct Deepened {
    committed: Option<(Move, SearchResult)>,
    // Root results of the last pass.
    results: Vec<(Move, SearchResult)>,
    depth: u32,
    outcome: DeepeningOutcome,
    passes: u32,
    nodes: u64,
    // Factors searched; zero for the whole game.
    factors: usize,
}

impl Deepened {
    fn new(depth: u32) -> Self {
        Self {
            committed: None,
            results: Vec::new(),
            depth,
            outcome: DeepeningOutcome::Cutoff,
            passes: 0,
            nodes: 0,
            factors: 0,
        }
    }
}

// Settings shared by the passes of one deepening sequence.
struct Deepening<'a> {
    machine: &'a StateMachine,
    role: Role,
    config: &'a SearchConfig,
    factor: Option<&'a Factor>,
    analyzer: Option<&'a StructuralAnalyzer>,
    cancel: &'a CancelToken,
    progress: Option<Sender<Progress>>,
    label: Option<usize>,
}

impl Deepening<'_> {
    // Runs passes with depth limits `first..=last`, shuffling the root moves before each.
    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        state: &MachineState,
        moves: &[Move],
        first: u32,
        last: u32,
        cache: &mut TranspositionCache,
        mut heuristic: Option<&mut (dyn Heuristic + 'static)>,
        rng: &mut StdRng,
    ) -> Result<Deepened, GameError> {
        let mut deepened = Deepened::new(first);
        let mut order = moves.to_vec();
        for depth in first..=last.max(first) {
            order.shuffle(rng);
            let context = Context {
                machine: self.machine,
                role: self.role,
                depth_limit: depth,
                caching: self.config.caching,
                factor: self.factor,
                analyzer: self.analyzer,
                cancel: self.cancel,
            };
            let mut search = Search::new(context, cache, heuristic.as_deref_mut());
            let report = search.root(state, &order);
            deepened.passes += 1;
            deepened.nodes += search.nodes();
            let report = match report {
                Ok(report) => report,
                Err(e) if deepened.committed.is_some() => {
                    warn!("pass at depth {} failed, keeping the committed move: {}", depth, e);
                    deepened.outcome = DeepeningOutcome::Cutoff;
                    return Ok(deepened);
                }
                Err(e) => return Err(e),
            };

            deepened.depth = depth;
            let cut = self.cancel.is_cancelled();
            if let Some(best) = report.best {
                if should_commit(deepened.committed.as_ref(), &best, cut) {
                    debug!("depth {}: committing {} ({:?})", depth, best.0, best.1);
                    deepened.committed = Some(best);
                }
            }
            if let Some(progress) = &self.progress {
                // The watchdog may already have stopped listening.
                let _ = progress.send(Progress {
                    factor: self.label,
                    depth,
                    best: deepened.committed.clone(),
                });
            }
            deepened.results = report.results;

            if cut {
                deepened.outcome = DeepeningOutcome::Cutoff;
                break;
            }
            if deepened.committed.as_ref().is_some_and(|(_, v)| *v == SearchResult::Exact(100)) {
                deepened.outcome = DeepeningOutcome::Won;
                break;
            }
            if report.complete {
                deepened.outcome = DeepeningOutcome::Exhausted;
                break;
            }
            deepened.outcome = DeepeningOutcome::DepthCeiling;
        }
        Ok(deepened)
    }
}

// A pass replaces the committed move only if it found a different value. A proven win always replaces; otherwise a
// cancelled pass never does, and an unknown value only replaces a proven loss.
fn should_commit(committed: Option<&(Move, SearchResult)>, candidate: &(Move, SearchResult), cut: bool) -> bool {
    let Some((_, current)) = committed else {
        return true;
    };
    let value = candidate.1;
    if value == SearchResult::Exact(100) {
        return *current != value;
    }
    if cut {
        return false;
    }
    match (current.value(), value.value()) {
        (_, None) => *current == SearchResult::Exact(0),
        (None, Some(_)) => true,
        (Some(old), Some(new)) => old != new || (value.is_exact() && !current.is_exact()),
    }
}
