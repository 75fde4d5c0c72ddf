//! Command executor
//!
//! A fixed pool of worker threads draining the dirty subset of a build graph
//! in dependency order: a command becomes ready once every input is either
//! clean or produced by a completed command (Kahn's algorithm, run
//! concurrently). Failures are isolated per command: siblings keep running,
//! transitive dependents are never scheduled, and the caller inspects the
//! accumulated failure list after [`Executor::join`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::dirty::DirtySet;
use crate::graph::{BuildGraph, NodeId};

/// Executor tuning.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub num_threads: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get().max(1),
        }
    }
}

/// One failed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub command: NodeId,
    pub tag: String,
    pub error: String,
}

/// What a phase run produced, available after [`Executor::join`].
#[derive(Debug, Default)]
pub struct ExecReport {
    /// Commands that ran and failed, in completion order.
    pub failures: Vec<CommandFailure>,
    /// Tags of dirty commands that never became ready while no work was in
    /// flight: a dependency cycle, distinct from both success and command
    /// failure.
    pub deadlock: Option<Vec<String>>,
}

impl ExecReport {
    pub fn ok(&self) -> bool {
        self.failures.is_empty() && self.deadlock.is_none()
    }
}

struct SchedState {
    ready: VecDeque<NodeId>,
    /// Dirty commands not yet ready, with their count of unsatisfied input
    /// edges (inputs produced by a dirty command that hasn't completed).
    waiting: HashMap<NodeId, usize>,
    /// Dirty commands not yet completed or abandoned.
    remaining: usize,
    in_flight: usize,
}

struct Shared {
    graph: Arc<BuildGraph>,
    state: Mutex<SchedState>,
    cond: Condvar,
    shutdown: AtomicBool,
    errors: Mutex<Vec<CommandFailure>>,
    stuck: Mutex<Option<Vec<NodeId>>>,
}

/// A single graph run. Construct, [`run`](Executor::run) (non-blocking),
/// then [`join`](Executor::join).
pub struct Executor {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    num_threads: usize,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("num_threads", &self.num_threads)
            .field("workers", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(graph: Arc<BuildGraph>, dirty: &DirtySet, config: ExecutorConfig) -> Self {
        let mut ready = VecDeque::new();
        let mut waiting = HashMap::new();

        let mut dirty_commands: Vec<NodeId> = dirty.commands().collect();
        dirty_commands.sort(); // deterministic initial queue order

        for &id in &dirty_commands {
            let unsatisfied = graph
                .command(id)
                .inputs
                .iter()
                .filter(|&&input| {
                    graph
                        .file(input)
                        .producer
                        .is_some_and(|producer| dirty.is_command_dirty(producer))
                })
                .count();
            if unsatisfied == 0 {
                ready.push_back(id);
            } else {
                waiting.insert(id, unsatisfied);
            }
        }

        let remaining = dirty_commands.len();
        Self {
            shared: Arc::new(Shared {
                graph,
                state: Mutex::new(SchedState {
                    ready,
                    waiting,
                    remaining,
                    in_flight: 0,
                }),
                cond: Condvar::new(),
                shutdown: AtomicBool::new(false),
                errors: Mutex::new(Vec::new()),
                stuck: Mutex::new(None),
            }),
            handles: Vec::new(),
            num_threads: config.num_threads.max(1),
        }
    }

    /// Start the worker pool. Returns immediately.
    pub fn run(&mut self) {
        if !self.handles.is_empty() {
            return;
        }
        for i in 0..self.num_threads {
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name(format!("lode-worker-{i}"))
                .spawn(move || worker(&shared))
                .expect("failed to spawn worker thread");
            self.handles.push(handle);
        }
    }

    /// True once the ready queue has drained with nothing in flight (or a
    /// cancellation/deadlock stopped the run).
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Cooperative cancellation: no new commands are dequeued; in-flight
    /// commands run to completion.
    pub fn cancel(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.cond.notify_all();
    }

    /// Wait for every worker to exit and collect the run's outcome.
    pub fn join(mut self) -> ExecReport {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }

        let failures = std::mem::take(
            &mut *self
                .shared
                .errors
                .lock()
                .expect("executor error list mutex poisoned"),
        );
        let deadlock = self
            .shared
            .stuck
            .lock()
            .expect("executor deadlock mutex poisoned")
            .take()
            .map(|ids| {
                ids.iter()
                    .map(|&id| self.shared.graph.command(id).tag.clone())
                    .collect()
            });

        ExecReport { failures, deadlock }
    }
}

fn worker(shared: &Shared) {
    loop {
        let command = {
            let mut state = shared
                .state
                .lock()
                .expect("executor scheduler mutex poisoned");
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if let Some(command) = state.ready.pop_front() {
                    state.in_flight += 1;
                    break command;
                }
                if state.remaining == 0 {
                    shared.shutdown.store(true, Ordering::Release);
                    shared.cond.notify_all();
                    return;
                }
                if state.in_flight == 0 {
                    // dirty commands remain but none can ever become ready:
                    // a cycle through file dependencies
                    let mut stuck: Vec<NodeId> = state.waiting.keys().copied().collect();
                    stuck.sort();
                    *shared
                        .stuck
                        .lock()
                        .expect("executor deadlock mutex poisoned") = Some(stuck);
                    state.remaining = 0;
                    shared.shutdown.store(true, Ordering::Release);
                    shared.cond.notify_all();
                    return;
                }
                state = shared
                    .cond
                    .wait(state)
                    .expect("executor scheduler mutex poisoned");
            }
        };

        tracing::trace!("running command '{}'", shared.graph.command(command).tag);
        let result = shared.graph.run_command(command);

        let mut state = shared
            .state
            .lock()
            .expect("executor scheduler mutex poisoned");
        state.in_flight -= 1;
        state.remaining -= 1;

        match result {
            Ok(()) => {
                // outputs are now satisfied; release consumers
                for &output in &shared.graph.command(command).outputs {
                    for &consumer in &shared.graph.file(output).consumers {
                        if let Some(count) = state.waiting.get_mut(&consumer) {
                            *count -= 1;
                            if *count == 0 {
                                state.waiting.remove(&consumer);
                                state.ready.push_back(consumer);
                            }
                        }
                    }
                }
            }
            Err(error) => {
                shared
                    .errors
                    .lock()
                    .expect("executor error list mutex poisoned")
                    .push(CommandFailure {
                        command,
                        tag: shared.graph.command(command).tag.clone(),
                        error: format!("{error:#}"),
                    });

                // abandon every transitive dependent: never scheduled, not
                // separately reported
                let mut queue = vec![command];
                let mut seen = HashSet::new();
                while let Some(failed) = queue.pop() {
                    if !seen.insert(failed) {
                        continue;
                    }
                    for &output in &shared.graph.command(failed).outputs {
                        for &consumer in &shared.graph.file(output).consumers {
                            if state.waiting.remove(&consumer).is_some() {
                                state.remaining -= 1;
                                queue.push(consumer);
                            }
                        }
                    }
                }
            }
        }

        if state.remaining == 0 && state.in_flight == 0 {
            shared.shutdown.store(true, Ordering::Release);
        }
        shared.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirty::compute_forced_dirty;
    use std::sync::atomic::AtomicUsize;

    /// Build `count` commands chained through stamp files:
    /// cmd[0] -> stamp0 -> cmd[1] -> stamp1 -> ...
    fn chain(count: usize, log: &Arc<Mutex<Vec<usize>>>) -> BuildGraph {
        let mut graph = BuildGraph::new();
        let mut prev_stamp = None;
        for i in 0..count {
            let log = Arc::clone(log);
            let cmd = graph.add_command(Box::new(move || {
                log.lock().unwrap().push(i);
                Ok(())
            }));
            graph.set_tag(cmd, format!("step-{i}"));
            if let Some(stamp) = prev_stamp {
                graph.add_input(cmd, stamp);
            }
            let stamp = graph.add_file(format!("stamp-{i}"));
            graph.add_output(cmd, stamp);
            prev_stamp = Some(stamp);
        }
        graph
    }

    fn run_to_completion(graph: BuildGraph, threads: usize) -> ExecReport {
        let graph = Arc::new(graph);
        let dirty = compute_forced_dirty(&graph);
        let mut executor = Executor::new(graph, &dirty, ExecutorConfig {
            num_threads: threads,
        });
        executor.run();
        executor.join()
    }

    #[test]
    fn test_chain_runs_in_dependency_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = chain(5, &log);

        let report = run_to_completion(graph, 4);
        assert!(report.ok());
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_independent_commands_all_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut graph = BuildGraph::new();
        for i in 0..16 {
            let counter = Arc::clone(&counter);
            let cmd = graph.add_command(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
            graph.set_tag(cmd, format!("job-{i}"));
        }

        let report = run_to_completion(graph, 4);
        assert!(report.ok());
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_failure_isolation() {
        // f1 -> f2 chain, plus an independent g1
        let ran_f2 = Arc::new(AtomicBool::new(false));
        let ran_g1 = Arc::new(AtomicBool::new(false));

        let mut graph = BuildGraph::new();
        let f1 = graph.add_command(Box::new(|| anyhow::bail!("f1 exploded")));
        graph.set_tag(f1, "f1");
        let f1_out = graph.add_file("f1.out");
        graph.add_output(f1, f1_out);

        let flag = Arc::clone(&ran_f2);
        let f2 = graph.add_command(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }));
        graph.set_tag(f2, "f2");
        graph.add_input(f2, f1_out);

        let flag = Arc::clone(&ran_g1);
        let g1 = graph.add_command(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }));
        graph.set_tag(g1, "g1");

        let report = run_to_completion(graph, 2);

        assert!(!ran_f2.load(Ordering::SeqCst), "f2 must never run");
        assert!(ran_g1.load(Ordering::SeqCst), "g1 must still complete");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].tag, "f1");
        assert!(report.deadlock.is_none());
    }

    #[test]
    fn test_cycle_reported_as_deadlock() {
        // a needs b's output, b needs a's output
        let mut graph = BuildGraph::new();
        let a_out = graph.add_file("a.out");
        let b_out = graph.add_file("b.out");

        let a = graph.add_command(Box::new(|| Ok(())));
        graph.set_tag(a, "a");
        graph.add_input(a, b_out);
        graph.add_output(a, a_out);

        let b = graph.add_command(Box::new(|| Ok(())));
        graph.set_tag(b, "b");
        graph.add_input(b, a_out);
        graph.add_output(b, b_out);

        let report = run_to_completion(graph, 2);
        let stuck = report.deadlock.expect("cycle must be reported, not hung");
        assert_eq!(stuck, vec!["a".to_string(), "b".to_string()]);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_clean_commands_are_skipped() {
        // dirty set contains only the second command; the first must not run
        let ran_first = Arc::new(AtomicBool::new(false));

        let mut graph = BuildGraph::new();
        let flag = Arc::clone(&ran_first);
        let first = graph.add_command(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }));
        graph.set_tag(first, "first");
        let stamp = graph.add_file("stamp");
        graph.add_output(first, stamp);

        let second = graph.add_command(Box::new(|| Ok(())));
        graph.set_tag(second, "second");
        graph.add_input(second, stamp);

        // a dirty set containing only `second`: `first` is treated as
        // already satisfied
        let mut dirty = DirtySet::default();
        dirty.insert_command(second);

        let graph = Arc::new(graph);
        let mut executor = Executor::new(Arc::clone(&graph), &dirty, ExecutorConfig {
            num_threads: 2,
        });
        executor.run();
        let report = executor.join();

        assert!(report.ok());
        assert!(!ran_first.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_flag_set_after_completion() {
        let mut graph = BuildGraph::new();
        let cmd = graph.add_command(Box::new(|| Ok(())));
        graph.set_tag(cmd, "only");

        let graph = Arc::new(graph);
        let dirty = compute_forced_dirty(&graph);
        let mut executor = Executor::new(Arc::clone(&graph), &dirty, ExecutorConfig {
            num_threads: 1,
        });
        executor.run();

        // the flag flips once the queue drains with nothing in flight
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !executor.is_shutdown() {
            assert!(std::time::Instant::now() < deadline, "executor never shut down");
            std::thread::yield_now();
        }

        let report = executor.join();
        assert!(report.ok());
    }

    #[test]
    fn test_cancel_prevents_new_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut graph = BuildGraph::new();
        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            graph.add_command(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(1));
                Ok(())
            }));
        }

        let graph = Arc::new(graph);
        let dirty = compute_forced_dirty(&graph);
        let mut executor = Executor::new(graph, &dirty, ExecutorConfig { num_threads: 2 });
        executor.run();
        executor.cancel();
        let report = executor.join();

        // cancellation is cooperative: some commands may have run, but far
        // from all of them, and none count as failures
        assert!(report.failures.is_empty());
        assert!(counter.load(Ordering::SeqCst) < 64);
    }
}
