//! Execution orchestration: owning engines and driving training runs.
//!
//! Three executors cover the deployment shapes:
//!
//! - [`SingleThreadExecutor`]: one engine, sequential iterations.
//! - [`MultiThreadExecutor`]: K engines over sharing instances of one game,
//!   dispatched across a fixed-size thread pool, reporting to one shared
//!   utility manager.
//! - [`CyclicStepsExecutor`]: S step games × K threads; every iteration a
//!   worker picks one step uniformly at random, so mutually-referential
//!   stages (whose terminal payoffs read each other's running utility)
//!   converge jointly instead of in a fixed order.
//!
//! All executors can resume from and save to an [`ExecutionLoader`].
//!
//! # Worker failure
//!
//! A worker whose iteration errors leaves node locks held along its
//! in-flight path; any healthy worker that reaches one of those nodes would
//! block forever. The failing worker therefore sets the shared failure
//! flag, then force-releases every player-node lock so the survivors can
//! drain their loops and observe the flag. The force-release is unsound
//! against a healthy holder — it exists only on this abandonment path, and
//! the executor is permanently disabled (no further `run` or `save`)
//! afterwards, leaving the node graph unlocked and inspectable but
//! possibly inconsistent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::cfr::config::{ConfigError, EngineConfig};
use crate::cfr::engine::Engine;
use crate::cfr::game::{Game, GameError, SharingGame};
use crate::cfr::loader::{ExecutionLoader, LoaderError};
use crate::cfr::node::NodeRef;
use crate::cfr::terminal::{CyclicUtilReader, TerminalUtilReader, UtilLink};
use crate::cfr::utility::SharedUtilityManager;

/// Errors surfaced by executors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Invalid construction parameters.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A training iteration failed with a malformed-game condition.
    #[error("training failed: {0}")]
    Game(#[from] GameError),

    /// Persistence failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// The worker thread pool could not be built.
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// No persistence loader was configured, so there is nothing to save
    /// to or load from.
    #[error("no persistence loader configured")]
    NoLoader,

    /// A previous worker failure permanently disabled this executor.
    #[error("executor disabled after a worker failure")]
    Disabled,
}

/// Resolve a requested thread count, `0` meaning available parallelism.
fn resolve_threads(threads: usize) -> usize {
    if threads > 0 {
        return threads;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Force-release every player-node lock in `nodes`.
///
/// Failure-recovery path only; see the module docs.
fn emergency_unlock(nodes: &[NodeRef]) {
    let mut released = 0usize;
    for node in nodes {
        if let Some(player) = node.as_player() {
            if player.force_release() {
                released += 1;
            }
        }
    }
    if released > 0 {
        log::warn!("emergency unlock released {} abandoned node locks", released);
    }
}

/// Validate that a loader's visit tracking agrees with the engine config.
fn check_loader_flags(
    config: &EngineConfig,
    loader: &Option<Box<dyn ExecutionLoader>>,
) -> Result<(), ConfigError> {
    if let Some(loader) = loader {
        if loader.tracks_visits() != config.update_visits_and_weight {
            return Err(ConfigError::VisitTrackingMismatch {
                engine: config.update_visits_and_weight,
                loader: loader.tracks_visits(),
            });
        }
    }
    Ok(())
}

/// One engine, one game, sequential training.
pub struct SingleThreadExecutor<G: Game> {
    engine: Engine<G>,
    loader: Option<Box<dyn ExecutionLoader>>,
}

impl<G: Game> SingleThreadExecutor<G> {
    /// Build an executor around `game`. If a loader is given and reports a
    /// saved state, node weights and training progress are restored before
    /// the first iteration.
    pub fn new(
        game: G,
        config: EngineConfig,
        loader: Option<Box<dyn ExecutionLoader>>,
    ) -> Result<Self, ExecutorError> {
        check_loader_flags(&config, &loader)?;
        let mut engine = Engine::new(game)?;
        engine.set_config(config);

        let mut executor = Self { engine, loader };
        if let Some(loader) = executor.loader.as_mut() {
            if loader.can_load() {
                loader.load_player_nodes(executor.engine.game().player_nodes())?;
                let state = loader.load_state()?;
                executor.engine.utility_manager().set_state(state);
                log::info!("resumed training from saved state");
            }
        }
        Ok(executor)
    }

    /// Train for `iterations` iterations.
    pub fn run(&mut self, iterations: u64) -> Result<(), ExecutorError> {
        self.engine.train(iterations)?;
        Ok(())
    }

    /// Persist node weights and training progress through the loader.
    pub fn save(&mut self) -> Result<(), ExecutorError> {
        let state = self.engine.utility_manager().state();
        let loader = self.loader.as_mut().ok_or(ExecutorError::NoLoader)?;
        loader.save(self.engine.game().player_nodes(), &state)?;
        Ok(())
    }

    /// The owned engine, for strategy inspection.
    pub fn engine(&self) -> &Engine<G> {
        &self.engine
    }
}

/// K engines over sharing instances of one game, one shared utility
/// manager, a fixed-size worker pool.
pub struct MultiThreadExecutor<G: SharingGame> {
    pool: rayon::ThreadPool,
    engines: Vec<Engine<G>>,
    utility: Arc<SharedUtilityManager>,
    loader: Option<Box<dyn ExecutionLoader>>,
    disabled: bool,
}

impl<G: SharingGame> MultiThreadExecutor<G> {
    /// Build an executor with `threads` workers (0 = available
    /// parallelism), each driving its own sharing instance of `base`.
    ///
    /// Node locking must stay enabled whenever more than one thread is
    /// requested; the shared tree makes lock-free training unsound.
    pub fn new(
        base: G,
        config: EngineConfig,
        threads: usize,
        loader: Option<Box<dyn ExecutionLoader>>,
    ) -> Result<Self, ExecutorError> {
        let threads = resolve_threads(threads);
        if threads > 1 && !config.lock_player_nodes {
            return Err(ConfigError::LockingRequired { threads }.into());
        }
        check_loader_flags(&config, &loader)?;

        let utility = Arc::new(SharedUtilityManager::new(base.num_players()));

        let mut executor = Self {
            pool: rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()?,
            engines: Vec::with_capacity(threads),
            utility,
            loader,
            disabled: false,
        };

        // Weights live on the shared nodes, so restoring once through the
        // base instance restores them for every worker.
        if let Some(loader) = executor.loader.as_mut() {
            if loader.can_load() {
                loader.load_player_nodes(base.player_nodes())?;
                executor.utility.set_state(loader.load_state()?);
                log::info!("resumed training from saved state");
            }
        }

        let mut games: Vec<G> = (1..threads).map(|_| base.share()).collect();
        games.insert(0, base);
        for game in games {
            let mut engine = Engine::new(game)?;
            engine.set_config(config);
            engine.set_utility_manager(Arc::clone(&executor.utility));
            executor.engines.push(engine);
        }
        Ok(executor)
    }

    /// Train for `iterations` iterations split across the workers
    /// (remainder goes to worker 0), blocking until every worker is done.
    ///
    /// On a worker failure the executor is permanently disabled and the
    /// first error is returned.
    pub fn run(&mut self, iterations: u64) -> Result<(), ExecutorError> {
        if self.disabled {
            return Err(ExecutorError::Disabled);
        }
        let workers = self.engines.len() as u64;
        let per_worker = iterations / workers;
        let remainder = iterations % workers;
        log::info!(
            "training {} iterations across {} workers",
            iterations,
            workers
        );

        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<GameError>> = Mutex::new(None);
        let nodes: Vec<NodeRef> = self.engines[0].game().player_nodes().to_vec();

        let pool = &self.pool;
        let engines = &mut self.engines;
        pool.scope(|scope| {
            for (worker, engine) in engines.iter_mut().enumerate() {
                let quota = per_worker + if worker == 0 { remainder } else { 0 };
                let failed = &failed;
                let first_error = &first_error;
                let nodes = &nodes;
                scope.spawn(move |_| {
                    run_worker(engine, quota, failed, first_error, nodes, || {
                        format!("worker {}", worker)
                    });
                });
            }
        });

        if failed.load(Ordering::SeqCst) {
            self.disabled = true;
            // The survivors have drained by now; sweep once more in case a
            // worker failed after the in-flight sweep ran.
            emergency_unlock(&nodes);
            let error = first_error
                .into_inner()
                .unwrap_or(GameError::InconsistentNode { depth: 0 });
            return Err(error.into());
        }
        Ok(())
    }

    /// Persist node weights and training progress through the loader.
    ///
    /// Refused permanently once a worker has failed.
    pub fn save(&mut self) -> Result<(), ExecutorError> {
        if self.disabled {
            return Err(ExecutorError::Disabled);
        }
        let state = self.utility.state();
        let nodes: Vec<NodeRef> = self.engines[0].game().player_nodes().to_vec();
        let loader = self.loader.as_mut().ok_or(ExecutorError::NoLoader)?;
        loader.save(&nodes, &state)?;
        Ok(())
    }

    /// The shared utility manager all workers report to.
    pub fn utility_manager(&self) -> &Arc<SharedUtilityManager> {
        &self.utility
    }

    /// The worker engines, for strategy inspection.
    pub fn engines(&self) -> &[Engine<G>] {
        &self.engines
    }
}

/// One step of a [`CyclicStepsExecutor`].
pub struct CyclicStep<G> {
    /// The step's base game; workers train sharing instances of it.
    pub game: G,
    /// Terminal-utility links, in utility-id order: id `i` in this step's
    /// game resolves through `links[i]`.
    pub links: Vec<StepLink>,
    /// Optional persistence for this step's nodes and utility state.
    pub loader: Option<Box<dyn ExecutionLoader>>,
}

/// A terminal-utility link from one step's game into another step.
#[derive(Debug, Clone)]
pub struct StepLink {
    /// Index of the target step.
    pub step: usize,
    /// Seat permutation into the target step: seat `i` of the referring
    /// game reads seat `seat_map[i]` of the target.
    pub seat_map: Vec<usize>,
}

/// S step games × K worker threads, trained jointly.
///
/// Each worker owns one engine per step; every iteration it picks a step
/// uniformly at random. The random interleaving matters because steps feed
/// each other's terminal payoffs through their utility managers — training
/// them in a fixed order would starve the cross-references.
pub struct CyclicStepsExecutor<G: SharingGame> {
    pool: rayon::ThreadPool,
    /// Engine grid, indexed `[worker][step]`.
    engines: Vec<Vec<Engine<G>>>,
    utilities: Vec<Arc<SharedUtilityManager>>,
    loaders: Vec<Option<Box<dyn ExecutionLoader>>>,
    seed: Option<u64>,
    disabled: bool,
}

impl<G: SharingGame> CyclicStepsExecutor<G> {
    /// Build an executor over `steps` with `threads` workers (0 =
    /// available parallelism). `seed`, when given, makes the workers' step
    /// selection reproducible.
    pub fn new(
        steps: Vec<CyclicStep<G>>,
        config: EngineConfig,
        threads: usize,
        seed: Option<u64>,
    ) -> Result<Self, ExecutorError> {
        if steps.is_empty() {
            return Err(ConfigError::NoSteps.into());
        }
        let threads = resolve_threads(threads);
        if threads > 1 && !config.lock_player_nodes {
            return Err(ConfigError::LockingRequired { threads }.into());
        }

        let utilities: Vec<Arc<SharedUtilityManager>> = steps
            .iter()
            .map(|step| Arc::new(SharedUtilityManager::new(step.game.num_players())))
            .collect();

        // Wire each step's terminal ids to the target steps' accumulators.
        let mut readers: Vec<Arc<CyclicUtilReader>> = Vec::with_capacity(steps.len());
        for step in &steps {
            let mut links = Vec::with_capacity(step.links.len());
            for link in &step.links {
                let utility = utilities
                    .get(link.step)
                    .ok_or(ConfigError::UnknownStep(link.step))?;
                links.push(UtilLink::new(Arc::clone(utility), link.seat_map.clone()));
            }
            readers.push(Arc::new(CyclicUtilReader::new(links)));
        }

        let mut loaders = Vec::with_capacity(steps.len());
        let mut base_games = Vec::with_capacity(steps.len());
        for (index, step) in steps.into_iter().enumerate() {
            check_loader_flags(&config, &step.loader)?;
            let mut loader = step.loader;
            if let Some(loader) = loader.as_mut() {
                if loader.can_load() {
                    loader.load_player_nodes(step.game.player_nodes())?;
                    utilities[index].set_state(loader.load_state()?);
                    log::info!("step {}: resumed training from saved state", index);
                }
            }
            loaders.push(loader);
            base_games.push(step.game);
        }

        // One engine per (worker, step); worker 0 drives the base games.
        let mut engines: Vec<Vec<Engine<G>>> = Vec::with_capacity(threads);
        let make_column = |games: Vec<G>| -> Result<Vec<Engine<G>>, ExecutorError> {
            let mut column = Vec::with_capacity(games.len());
            for (index, game) in games.into_iter().enumerate() {
                let mut engine = Engine::new(game)?;
                engine.set_config(config);
                engine.set_utility_manager(Arc::clone(&utilities[index]));
                engine.set_terminal_util_reader(
                    Arc::clone(&readers[index]) as Arc<dyn TerminalUtilReader>
                );
                column.push(engine);
            }
            Ok(column)
        };
        for _ in 1..threads {
            let shares: Vec<G> = base_games.iter().map(|game| game.share()).collect();
            engines.push(make_column(shares)?);
        }
        engines.insert(0, make_column(base_games)?);

        Ok(Self {
            pool: rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()?,
            engines,
            utilities,
            loaders,
            seed,
            disabled: false,
        })
    }

    /// Train for `iterations` iterations in total, split across workers
    /// (remainder to worker 0); each iteration trains one uniformly
    /// random step.
    pub fn run(&mut self, iterations: u64) -> Result<(), ExecutorError> {
        if self.disabled {
            return Err(ExecutorError::Disabled);
        }
        let workers = self.engines.len() as u64;
        let steps = self.utilities.len();
        let per_worker = iterations / workers;
        let remainder = iterations % workers;
        log::info!(
            "training {} iterations across {} workers and {} steps",
            iterations,
            workers,
            steps
        );

        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<GameError>> = Mutex::new(None);
        let nodes = self.all_nodes();
        let seed = self.seed;

        let pool = &self.pool;
        let engines = &mut self.engines;
        pool.scope(|scope| {
            for (worker, column) in engines.iter_mut().enumerate() {
                let quota = per_worker + if worker == 0 { remainder } else { 0 };
                let failed = &failed;
                let first_error = &first_error;
                let nodes = &nodes;
                scope.spawn(move |_| {
                    let mut rng = match seed {
                        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker as u64)),
                        None => StdRng::from_entropy(),
                    };
                    for _ in 0..quota {
                        if failed.load(Ordering::Relaxed) {
                            return;
                        }
                        let step = rng.gen_range(0..steps);
                        let engine = &mut column[step];
                        if let Err(error) = engine.run_iteration() {
                            log::error!(
                                "worker {} failed while training step {}: {}",
                                worker,
                                step,
                                error
                            );
                            failed.store(true, Ordering::SeqCst);
                            let mut slot = first_error.lock();
                            if slot.is_none() {
                                *slot = Some(error);
                            }
                            drop(slot);
                            emergency_unlock(nodes);
                            return;
                        }
                    }
                });
            }
        });

        if failed.load(Ordering::SeqCst) {
            self.disabled = true;
            emergency_unlock(&nodes);
            let error = first_error
                .into_inner()
                .unwrap_or(GameError::InconsistentNode { depth: 0 });
            return Err(error.into());
        }
        Ok(())
    }

    /// Persist every step's node weights and utility state through its
    /// loader. Steps without a loader are skipped.
    ///
    /// Refused permanently once a worker has failed.
    pub fn save(&mut self) -> Result<(), ExecutorError> {
        if self.disabled {
            return Err(ExecutorError::Disabled);
        }
        for (index, loader) in self.loaders.iter_mut().enumerate() {
            let Some(loader) = loader.as_mut() else {
                continue;
            };
            let nodes: Vec<NodeRef> = self.engines[0][index].game().player_nodes().to_vec();
            loader.save(&nodes, &self.utilities[index].state())?;
        }
        Ok(())
    }

    /// The per-step shared utility managers.
    pub fn utility_managers(&self) -> &[Arc<SharedUtilityManager>] {
        &self.utilities
    }

    /// Worker 0's engine for `step`, for strategy inspection.
    pub fn step_engine(&self, step: usize) -> &Engine<G> {
        &self.engines[0][step]
    }

    /// Every player node across all steps, for the failure sweep.
    fn all_nodes(&self) -> Vec<NodeRef> {
        self.engines[0]
            .iter()
            .flat_map(|engine| engine.game().player_nodes().iter().cloned())
            .collect()
    }
}

/// Shared worker loop body for the pooled executors.
fn run_worker<G: Game>(
    engine: &mut Engine<G>,
    quota: u64,
    failed: &AtomicBool,
    first_error: &Mutex<Option<GameError>>,
    nodes: &[NodeRef],
    context: impl Fn() -> String,
) {
    for _ in 0..quota {
        if failed.load(Ordering::Relaxed) {
            return;
        }
        if let Err(error) = engine.run_iteration() {
            log::error!("{} failed: {}", context(), error);
            failed.store(true, Ordering::SeqCst);
            let mut slot = first_error.lock();
            if slot.is_none() {
                *slot = Some(error);
            }
            drop(slot);
            // Release this worker's abandoned locks so the survivors can
            // drain and observe the failure flag.
            emergency_unlock(nodes);
            return;
        }
    }
}
