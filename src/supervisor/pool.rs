//! Pool supervisor: the process-lifecycle state machine.
//!
//! Owns every [`WorkerHandle`] and runs the reconcile loop. All pool state
//! is mutated from that single loop; signal handlers never touch it.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::PollTimeout;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{self, Pid};
use tracing::{debug, error, info, warn};

use super::signals::{ControlEvent, Intent, SignalBridge};
use super::spawn::{ForkSpawner, Spawn, SpawnedWorker};
use crate::error::{ForkdError, Result};
use crate::worker::{STOP_BYTE, WorkerContext, WorkerFactory, analyze_exit};

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long a draining worker may run before SIGKILL escalation.
    pub grace_period: Duration,
    /// Fork attempts before giving up on one spawn.
    pub fork_retry_attempts: u32,
    /// Initial backoff between fork attempts (doubles per retry).
    pub fork_retry_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            fork_retry_attempts: 3,
            fork_retry_delay: Duration::from_millis(200),
        }
    }
}

/// Desired state of one worker as tracked by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    /// Worker should keep running.
    Running,
    /// Worker has been asked to stop and will be removed when it exits.
    Draining,
}

/// Identity and desired state of one spawned worker process.
///
/// Exclusively owned and mutated by the supervisor.
pub struct WorkerHandle {
    pid: Pid,
    state: DesiredState,
    generation: u32,
    stop_tx: OwnedFd,
    replace_on_exit: bool,
    drain_deadline: Option<Instant>,
}

impl WorkerHandle {
    fn new(spawned: SpawnedWorker, generation: u32) -> Self {
        Self {
            pid: spawned.pid,
            state: DesiredState::Running,
            generation,
            stop_tx: spawned.stop_tx,
            replace_on_exit: false,
            drain_deadline: None,
        }
    }

    /// Child process id.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Current desired state.
    pub fn state(&self) -> DesiredState {
        self.state
    }

    /// Spawn generation: 0 at initialization, previous + 1 on replacement.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Process-level worker-pool supervisor.
///
/// Construct with [`Supervisor::new`], then call [`Supervisor::run`], which
/// blocks until a shutdown intent has drained the pool.
pub struct Supervisor<S: Spawn = ForkSpawner> {
    spawner: S,
    config: SupervisorConfig,
    target_count: usize,
    workers: HashMap<Pid, WorkerHandle>,
    shutting_down: bool,
}

impl Supervisor<ForkSpawner> {
    /// Create a supervisor that forks workers from the given factory.
    pub fn new(factory: WorkerFactory, context: WorkerContext, config: SupervisorConfig) -> Self {
        Self::with_spawner(ForkSpawner::new(factory, context), config)
    }
}

impl<S: Spawn> Supervisor<S> {
    /// Create a supervisor over an arbitrary spawning seam.
    pub(crate) fn with_spawner(spawner: S, config: SupervisorConfig) -> Self {
        Self {
            spawner,
            config,
            target_count: 0,
            workers: HashMap::new(),
            shutting_down: false,
        }
    }

    /// Desired pool size.
    pub fn target_count(&self) -> usize {
        self.target_count
    }

    /// Number of live (not yet reaped) workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Whether a shutdown intent has been applied.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Iterate over the live worker handles.
    pub fn workers(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.workers.values()
    }

    /// Run the pool: install the signal bridge, fork the initial workers,
    /// and loop until shutdown completes.
    ///
    /// Blocks the calling thread. Returns once the last worker is reaped
    /// after a shutdown intent.
    pub fn run(&mut self, initial_count: usize) -> Result<()> {
        let bridge = SignalBridge::install()?;
        self.initialize(initial_count);
        info!(
            pid = %unistd::getpid(),
            workers = self.workers.len(),
            target = self.target_count,
            "supervisor running"
        );

        while !(self.shutting_down && self.workers.is_empty()) {
            let events = bridge.wait(self.poll_timeout())?;
            let mut reap_needed = false;
            for event in events {
                match event {
                    ControlEvent::Intent(intent) => self.apply_intent(intent),
                    ControlEvent::ChildExited => reap_needed = true,
                }
            }
            if reap_needed {
                self.reap_exited()?;
            }
            self.enforce_deadlines(Instant::now());
            self.reconcile();
        }

        info!("supervisor stopped");
        Ok(())
    }

    /// Fork the initial workers and set the target size.
    pub fn initialize(&mut self, count: usize) {
        self.target_count = count;
        for _ in 0..count {
            self.spawn_worker(0);
        }
    }

    fn apply_intent(&mut self, intent: Intent) {
        match intent {
            Intent::ScaleUp => self.scale_up(),
            Intent::ScaleDown => self.scale_down(),
            Intent::RestartAll => self.restart_all(),
            Intent::Shutdown => self.shutdown(),
        }
    }

    /// Grow the pool by one worker, forked immediately.
    pub fn scale_up(&mut self) {
        if self.shutting_down {
            debug!("ignoring scale-up while shutting down");
            return;
        }
        self.target_count += 1;
        info!(target = self.target_count, "adding worker");
        self.spawn_worker(0);
    }

    /// Shrink the pool by one: mark one running worker draining.
    ///
    /// The worker is not killed; it exits at its next voluntary yield point
    /// (or at the grace deadline) and is not replaced.
    pub fn scale_down(&mut self) {
        if self.target_count == 0 {
            return;
        }
        self.target_count -= 1;
        info!(target = self.target_count, "removing worker");

        let victim = self
            .workers
            .values()
            .find(|h| h.state == DesiredState::Running)
            .map(|h| h.pid);
        if let Some(pid) = victim {
            self.mark_draining(pid, false);
        }
    }

    /// Drain every running worker for replacement; target size unchanged.
    ///
    /// Each reaped draining worker is immediately replaced by one of the
    /// next generation.
    pub fn restart_all(&mut self) {
        info!(workers = self.workers.len(), "restarting all workers");
        let running: Vec<Pid> = self
            .workers
            .values()
            .filter(|h| h.state == DesiredState::Running)
            .map(|h| h.pid)
            .collect();
        for pid in running {
            self.mark_draining(pid, true);
        }
    }

    /// Begin graceful shutdown: target drops to 0, every worker drains with
    /// no replacement. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        info!(workers = self.workers.len(), "shutting down");
        self.shutting_down = true;
        self.target_count = 0;

        let running: Vec<Pid> = self
            .workers
            .values()
            .filter(|h| h.state == DesiredState::Running)
            .map(|h| h.pid)
            .collect();
        for pid in running {
            self.mark_draining(pid, false);
        }
    }

    /// Ask one worker to stop at its next yield point and arm its grace
    /// deadline. A worker already draining is left as it was.
    fn mark_draining(&mut self, pid: Pid, replace_on_exit: bool) {
        let Some(handle) = self.workers.get_mut(&pid) else {
            return;
        };
        if handle.state == DesiredState::Draining {
            return;
        }

        if let Err(e) = unistd::write(&handle.stop_tx, &[STOP_BYTE]) {
            // Worker may already be exiting with the pipe unread.
            debug!(%pid, error = %e, "stop byte not delivered");
        }
        handle.state = DesiredState::Draining;
        handle.replace_on_exit = replace_on_exit;
        handle.drain_deadline = Some(Instant::now() + self.config.grace_period);
        debug!(%pid, replace_on_exit, "draining worker");
    }

    /// Reap every exited child without blocking.
    fn reap_exited(&mut self) -> Result<()> {
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => match status.pid() {
                    Some(pid) => self.handle_exit(pid, status),
                    None => break,
                },
                Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Remove a reaped worker and decide on a replacement.
    ///
    /// A replacement of generation + 1 is forked unless the pool is
    /// shutting down or the worker was draining due to a scale-down.
    pub fn handle_exit(&mut self, pid: Pid, status: WaitStatus) {
        let Some(handle) = self.workers.remove(&pid) else {
            debug!(%pid, "reaped unknown child");
            return;
        };

        let kind = analyze_exit(status);
        if kind.is_clean() {
            info!(%pid, generation = handle.generation, "worker ended: {}", kind);
        } else {
            warn!(%pid, generation = handle.generation, "worker ended: {}", kind);
        }

        if self.shutting_down {
            return;
        }

        let replace = match handle.state {
            DesiredState::Running => true, // unexpected exit
            DesiredState::Draining => handle.replace_on_exit,
        };
        // The count guard keeps a restart racing a scale-down from
        // overshooting the target.
        if replace && self.workers.len() < self.target_count {
            self.spawn_worker(handle.generation + 1);
        }
    }

    /// SIGKILL draining workers whose grace deadline has passed.
    fn enforce_deadlines(&mut self, now: Instant) {
        let overdue: Vec<Pid> = self
            .workers
            .values()
            .filter(|h| {
                h.state == DesiredState::Draining
                    && h.drain_deadline.is_some_and(|deadline| deadline <= now)
            })
            .map(|h| h.pid)
            .collect();

        for pid in overdue {
            warn!(%pid, "grace period expired, killing worker");
            if let Err(e) = self.spawner.force_kill(pid) {
                warn!(%pid, error = %e, "failed to kill worker");
            }
            if let Some(handle) = self.workers.get_mut(&pid) {
                // One escalation per worker; the exit is reaped normally.
                handle.drain_deadline = None;
            }
        }
    }

    /// Top up the pool after fork failures or missed spawns.
    fn reconcile(&mut self) {
        while !self.shutting_down && self.workers.len() < self.target_count {
            let before = self.workers.len();
            self.spawn_worker(0);
            if self.workers.len() == before {
                // Persistent fork failure; retry on the next loop pass.
                break;
            }
        }
    }

    /// Fork one worker with bounded retry and backoff.
    fn spawn_worker(&mut self, generation: u32) {
        debug_assert!(!self.shutting_down, "spawn attempted during shutdown");

        let mut delay = self.config.fork_retry_delay;
        let mut last_error = None;
        for attempt in 1..=self.config.fork_retry_attempts {
            match self.spawner.spawn(generation) {
                Ok(spawned) => {
                    info!(pid = %spawned.pid, generation, "started worker");
                    self.workers
                        .insert(spawned.pid, WorkerHandle::new(spawned, generation));
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "fork failed, backing off");
                    last_error = Some(e);
                    if attempt < self.config.fork_retry_attempts {
                        thread::sleep(delay);
                        delay *= 2;
                    }
                }
            }
        }

        let error = match last_error {
            Some(ForkdError::Sys(source)) => ForkdError::ForkExhausted {
                attempts: self.config.fork_retry_attempts,
                source,
            },
            Some(e) => e,
            None => return,
        };
        // Pool stays below target; reconcile retries on the next loop pass.
        error!(error = %error, "unable to fork worker");
    }

    /// Timeout for the next control-loop wait: the nearest drain deadline,
    /// or infinite when nothing is draining.
    fn poll_timeout(&self) -> PollTimeout {
        let next = self
            .workers
            .values()
            .filter_map(|h| h.drain_deadline)
            .min();
        match next {
            None => PollTimeout::NONE,
            Some(deadline) => {
                let ms = deadline
                    .saturating_duration_since(Instant::now())
                    .as_millis()
                    .min(u128::from(u16::MAX)) as u16;
                PollTimeout::from(ms)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForkdError;
    use nix::fcntl::OFlag;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Spawner double: hands out fake pids and real stop pipes, records
    /// every spawn and kill.
    #[derive(Default)]
    struct FakeState {
        next_pid: i32,
        spawned: Vec<(Pid, u32)>,
        killed: Vec<Pid>,
        stop_rx: HashMap<Pid, OwnedFd>,
        fail: bool,
    }

    #[derive(Clone)]
    struct FakeSpawner {
        state: Rc<RefCell<FakeState>>,
    }

    impl FakeSpawner {
        fn new() -> Self {
            Self {
                state: Rc::new(RefCell::new(FakeState {
                    next_pid: 100,
                    ..Default::default()
                })),
            }
        }

        fn spawn_count(&self) -> usize {
            self.state.borrow().spawned.len()
        }

        fn spawned(&self) -> Vec<(Pid, u32)> {
            self.state.borrow().spawned.clone()
        }

        fn killed(&self) -> Vec<Pid> {
            self.state.borrow().killed.clone()
        }

        fn set_fail(&self, fail: bool) {
            self.state.borrow_mut().fail = fail;
        }

        /// Read one byte from a worker's stop pipe, if any.
        fn stop_byte(&self, pid: Pid) -> Option<u8> {
            let state = self.state.borrow();
            let rx = state.stop_rx.get(&pid)?;
            let mut buf = [0u8; 1];
            match unistd::read(rx, &mut buf) {
                Ok(1) => Some(buf[0]),
                _ => None,
            }
        }
    }

    impl Spawn for FakeSpawner {
        fn spawn(&mut self, generation: u32) -> Result<SpawnedWorker> {
            let mut state = self.state.borrow_mut();
            if state.fail {
                return Err(ForkdError::Sys(nix::Error::EAGAIN));
            }
            let pid = Pid::from_raw(state.next_pid);
            state.next_pid += 1;
            let (rx, tx) = unistd::pipe2(OFlag::O_NONBLOCK)?;
            state.stop_rx.insert(pid, rx);
            state.spawned.push((pid, generation));
            Ok(SpawnedWorker { pid, stop_tx: tx })
        }

        fn force_kill(&mut self, pid: Pid) -> Result<()> {
            self.state.borrow_mut().killed.push(pid);
            Ok(())
        }
    }

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            grace_period: Duration::from_secs(10),
            fork_retry_attempts: 1,
            fork_retry_delay: Duration::from_millis(1),
        }
    }

    fn supervisor_with(count: usize) -> (Supervisor<FakeSpawner>, FakeSpawner) {
        let spawner = FakeSpawner::new();
        let mut sup = Supervisor::with_spawner(spawner.clone(), test_config());
        sup.initialize(count);
        (sup, spawner)
    }

    fn clean_exit(pid: Pid) -> WaitStatus {
        WaitStatus::Exited(pid, 0)
    }

    fn draining_pids<S: Spawn>(sup: &Supervisor<S>) -> Vec<Pid> {
        sup.workers()
            .filter(|h| h.state() == DesiredState::Draining)
            .map(|h| h.pid())
            .collect()
    }

    #[test]
    fn test_initialize_spawns_generation_zero() {
        let (sup, spawner) = supervisor_with(2);
        assert_eq!(sup.target_count(), 2);
        assert_eq!(sup.worker_count(), 2);
        assert!(sup.workers().all(|h| h.generation() == 0));
        assert!(sup.workers().all(|h| h.state() == DesiredState::Running));
        assert_eq!(spawner.spawn_count(), 2);
    }

    #[test]
    fn test_scale_up_adds_exactly_one() {
        let (mut sup, spawner) = supervisor_with(2);
        sup.scale_up();
        assert_eq!(sup.target_count(), 3);
        assert_eq!(sup.worker_count(), 3);
        assert_eq!(spawner.spawn_count(), 3);
    }

    #[test]
    fn test_scale_down_drains_without_killing() {
        let (mut sup, spawner) = supervisor_with(3);
        sup.scale_down();

        assert_eq!(sup.target_count(), 2);
        // Worker still alive until it yields.
        assert_eq!(sup.worker_count(), 3);
        assert!(spawner.killed().is_empty());

        let draining = draining_pids(&sup);
        assert_eq!(draining.len(), 1);
        // Cooperative stop requested through the pipe.
        assert_eq!(spawner.stop_byte(draining[0]), Some(b'Q'));

        // Worker yields and exits: pool settles at target, no replacement.
        sup.handle_exit(draining[0], clean_exit(draining[0]));
        assert_eq!(sup.worker_count(), 2);
        assert_eq!(spawner.spawn_count(), 3);
    }

    #[test]
    fn test_scale_down_at_zero_is_noop() {
        let (mut sup, _spawner) = supervisor_with(0);
        sup.scale_down();
        assert_eq!(sup.target_count(), 0);
    }

    #[test]
    fn test_restart_all_replaces_with_next_generation() {
        let (mut sup, spawner) = supervisor_with(2);
        let original: Vec<Pid> = sup.workers().map(|h| h.pid()).collect();

        sup.restart_all();
        assert_eq!(sup.target_count(), 2);
        assert_eq!(draining_pids(&sup).len(), 2);

        for pid in original {
            sup.handle_exit(pid, clean_exit(pid));
            // Replacement is immediate: count never dips below target - 1
            // within one reap and returns to target right away.
            assert_eq!(sup.worker_count(), 2);
        }

        assert!(sup.workers().all(|h| h.generation() == 1));
        assert_eq!(sup.target_count(), 2);
        assert_eq!(spawner.spawn_count(), 4);
    }

    #[test]
    fn test_unexpected_exit_respawns() {
        let (mut sup, spawner) = supervisor_with(2);
        let victim = sup.workers().next().map(|h| h.pid()).unwrap();

        sup.handle_exit(victim, WaitStatus::Exited(victim, 1));

        assert_eq!(sup.worker_count(), 2);
        assert_eq!(sup.target_count(), 2);
        // Replacement carries generation + 1.
        let (_, generation) = *spawner.spawned().last().unwrap();
        assert_eq!(generation, 1);
    }

    #[test]
    fn test_shutdown_drains_all_and_is_idempotent() {
        let (mut sup, spawner) = supervisor_with(2);
        let pids: Vec<Pid> = sup.workers().map(|h| h.pid()).collect();

        sup.shutdown();
        assert!(sup.is_shutting_down());
        assert_eq!(sup.target_count(), 0);
        assert_eq!(draining_pids(&sup).len(), 2);

        // Second call is a no-op.
        sup.shutdown();
        assert_eq!(sup.target_count(), 0);

        for pid in pids {
            sup.handle_exit(pid, clean_exit(pid));
        }
        assert_eq!(sup.worker_count(), 0);
        // Nothing spawned after shutdown.
        assert_eq!(spawner.spawn_count(), 2);
    }

    #[test]
    fn test_scale_intents_ignored_while_shutting_down() {
        let (mut sup, spawner) = supervisor_with(1);
        sup.shutdown();

        sup.scale_up();
        assert_eq!(sup.target_count(), 0);
        assert_eq!(spawner.spawn_count(), 1);

        sup.reconcile();
        assert_eq!(spawner.spawn_count(), 1);
    }

    #[test]
    fn test_deliberate_removal_never_races_into_respawn() {
        // Scale-down intent applied first, then the removed worker's exit:
        // the exit must not trigger a respawn.
        let (mut sup, spawner) = supervisor_with(2);
        sup.scale_down();
        let removed = draining_pids(&sup)[0];

        sup.handle_exit(removed, clean_exit(removed));
        assert_eq!(sup.worker_count(), 1);
        assert_eq!(sup.target_count(), 1);
        assert_eq!(spawner.spawn_count(), 2);
    }

    #[test]
    fn test_grace_deadline_escalates_once() {
        let (mut sup, spawner) = supervisor_with(1);
        sup.scale_down();
        let pid = draining_pids(&sup)[0];

        // Before the deadline: no kill.
        sup.enforce_deadlines(Instant::now());
        assert!(spawner.killed().is_empty());

        // Past the deadline: exactly one SIGKILL.
        let late = Instant::now() + Duration::from_secs(11);
        sup.enforce_deadlines(late);
        assert_eq!(spawner.killed(), vec![pid]);

        sup.enforce_deadlines(late);
        assert_eq!(spawner.killed().len(), 1);
    }

    #[test]
    fn test_reconcile_tops_up_after_fork_failure() {
        let spawner = FakeSpawner::new();
        spawner.set_fail(true);
        let mut sup = Supervisor::with_spawner(spawner.clone(), test_config());
        sup.initialize(2);
        assert_eq!(sup.worker_count(), 0);
        assert_eq!(sup.target_count(), 2);

        spawner.set_fail(false);
        sup.reconcile();
        assert_eq!(sup.worker_count(), 2);
    }

    #[test]
    fn test_restart_all_skips_already_draining_worker() {
        let (mut sup, _spawner) = supervisor_with(2);
        sup.scale_down();
        let removed = draining_pids(&sup)[0];

        sup.restart_all();

        // The scale-down victim keeps its no-replace fate.
        sup.handle_exit(removed, clean_exit(removed));
        assert_eq!(sup.worker_count(), 1);
        assert_eq!(sup.target_count(), 1);
    }
}
