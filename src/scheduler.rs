//! C10 — DAG Scheduler. A bounded pool of worker threads pulls ready nodes
//! from the dependency graph (C5) and hands each to an executor callback
//! supplied by `engine.rs`; the scheduler itself owns no knowledge of units,
//! configs, or the engine subprocess — only graph state. Built on
//! `thread::scope` + `spawn_scoped` worker threads, an `mpsc`/condvar
//! hand-off for ready work, and an atomic cancellation flag.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Condvar, Mutex};
use std::thread;

use atomic_enum::atomic_enum;

use crate::graph::Graph;

/// Why a run stopped handing out new work, raised internally when a node
/// fails under `--fail-fast`. Read lock-free from every worker thread.
#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum CancelReason {
    None = 0,
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Excluded,
    EarlyExited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Succeeded,
    Failed,
    Excluded,
}

pub struct SchedulerOptions {
    pub parallelism: usize,
    pub fail_fast: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        SchedulerOptions { parallelism: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).max(1), fail_fast: false }
    }
}

struct Shared {
    states: Vec<NodeState>,
    remaining_predecessors: Vec<usize>,
    queue: VecDeque<usize>,
    in_flight: usize,
    max_running_seen: usize,
}

/// Runs every node in `graph` to completion via `executor`, honouring
/// `options.parallelism` and `--fail-fast`. `cancelled` may also be set
/// externally (SIGINT) before or during the run; the scheduler checks it
/// before starting each node and stops handing out new work once set.
/// Returns the final state of every node, indexed like `graph`.
pub struct RunReport {
    pub states: Vec<NodeState>,
    /// Highest number of simultaneously-`Running` nodes observed, for
    /// verifying that a run never exceeded its configured parallelism.
    pub max_concurrent: usize,
}

pub fn run<E>(graph: &Graph, options: &SchedulerOptions, cancelled: &AtomicCancelReason, executor: E) -> RunReport
where
    E: Fn(usize) -> NodeOutcome + Sync,
{
    let n = graph.node_count();
    let remaining_predecessors: Vec<usize> = (0..n).map(|i| graph.dependencies_of(i).len()).collect();
    let mut initial_queue = VecDeque::new();
    for (i, &rem) in remaining_predecessors.iter().enumerate() {
        if rem == 0 {
            initial_queue.push_back(i);
        }
    }

    let shared = Mutex::new(Shared {
        states: vec![NodeState::Pending; n],
        remaining_predecessors,
        queue: initial_queue,
        in_flight: 0,
        max_running_seen: 0,
    });
    let cv = Condvar::new();
    let finished = n;

    thread::scope(|scope| {
        for worker_id in 0..options.parallelism.max(1) {
            let shared = &shared;
            let cv = &cv;
            let executor = &executor;
            scope.spawn(move || {
                worker_loop(worker_id, graph, shared, cv, cancelled, executor, options.fail_fast, finished);
            });
        }
    });

    let guard = shared.lock().unwrap();
    RunReport { states: guard.states.clone(), max_concurrent: guard.max_running_seen }
}

fn worker_loop<E>(
    _worker_id: usize,
    graph: &Graph,
    shared: &Mutex<Shared>,
    cv: &Condvar,
    cancelled: &AtomicCancelReason,
    executor: &E,
    fail_fast: bool,
    total_nodes: usize,
) where
    E: Fn(usize) -> NodeOutcome + Sync,
{
    loop {
        let idx = {
            let mut guard = shared.lock().unwrap();
            loop {
                if let Some(idx) = guard.queue.pop_front() {
                    guard.states[idx] = NodeState::Running;
                    guard.in_flight += 1;
                    guard.max_running_seen = guard.max_running_seen.max(guard.in_flight);
                    break Some(idx);
                }
                let finished_count = guard.states.iter().filter(|s| {
                    matches!(s, NodeState::Succeeded | NodeState::Failed | NodeState::Excluded | NodeState::EarlyExited)
                }).count();
                if guard.in_flight == 0 && finished_count == total_nodes {
                    break None;
                }
                if guard.in_flight == 0 && guard.queue.is_empty() && finished_count < total_nodes {
                    // Every remaining node is blocked on a predecessor that will
                    // never complete (shouldn't happen on a validated DAG); avoid
                    // a busy spin by treating this worker as idle-exit too.
                    break None;
                }
                guard = cv.wait(guard).unwrap();
            }
        };

        let Some(idx) = idx else { return };

        if cancelled.load(Ordering::Acquire) != CancelReason::None {
            finish_node(graph, shared, cv, idx, NodeState::EarlyExited);
            continue;
        }

        let outcome = executor(idx);
        let state = match outcome {
            NodeOutcome::Succeeded => NodeState::Succeeded,
            NodeOutcome::Failed => {
                if fail_fast {
                    cancelled.store(CancelReason::FailFast, Ordering::Release);
                }
                NodeState::Failed
            }
            NodeOutcome::Excluded => NodeState::Excluded,
        };
        finish_node(graph, shared, cv, idx, state);
    }
}

fn finish_node(graph: &Graph, shared: &Mutex<Shared>, cv: &Condvar, idx: usize, state: NodeState) {
    let mut guard = shared.lock().unwrap();
    guard.states[idx] = state;
    guard.in_flight -= 1;

    let propagate_early_exit = matches!(state, NodeState::Failed | NodeState::EarlyExited);
    let mut to_visit: VecDeque<usize> = graph.dependents_of(idx).into();
    while let Some(dep_idx) = to_visit.pop_front() {
        if guard.states[dep_idx] != NodeState::Pending {
            continue;
        }
        if propagate_early_exit {
            guard.states[dep_idx] = NodeState::EarlyExited;
            to_visit.extend(graph.dependents_of(dep_idx));
            continue;
        }
        guard.remaining_predecessors[dep_idx] -= 1;
        if guard.remaining_predecessors[dep_idx] == 0 {
            guard.queue.push_back(dep_idx);
        }
    }

    cv.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BuildOptions, Graph};
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;

    fn chain_graph() -> Graph {
        use crate::config::{Config, TerraformBlock, Value};
        let a = PathBuf::from("/tree/a");
        let b = PathBuf::from("/tree/b");
        let mk = |path: &PathBuf, deps: Vec<PathBuf>| Config {
            unit_path: path.clone(),
            terraform: TerraformBlock::default(),
            remote_state: None,
            dependencies: deps
                .into_iter()
                .map(|p| crate::config::Dependency {
                    name: "d".to_string(),
                    config_path: p,
                    mock_outputs: Value::Null,
                    mock_outputs_allowed_commands: vec![],
                    enabled: true,
                    skip: false,
                    extra_inputs: Value::Null,
                })
                .collect(),
            dependencies_paths: vec![],
            generate: vec![],
            inputs: Value::Null,
            locals: Default::default(),
            download_dir: ".cache".to_string(),
            iam_role: None,
            terraform_binary: "tofu".to_string(),
            terraform_version_constraint: None,
            prevent_destroy: false,
            skip: false,
            disabled: false,
            reads: vec![],
        };
        let scheduled = vec![(a.clone(), mk(&a, vec![b.clone()])), (b.clone(), mk(&b, vec![]))];
        crate::graph::build_graph(&scheduled, &[], &BuildOptions { include_external_dependencies: false, non_interactive: true, strict_include: false }).unwrap()
    }

    #[test]
    fn runs_dependency_before_dependent() {
        let graph = chain_graph();
        let order: StdMutex<Vec<usize>> = StdMutex::new(Vec::new());
        let cancelled = AtomicCancelReason::new(CancelReason::None);
        let report = run(&graph, &SchedulerOptions { parallelism: 2, fail_fast: false }, &cancelled, |idx| {
            order.lock().unwrap().push(idx);
            NodeOutcome::Succeeded
        });
        assert!(report.states.iter().all(|s| *s == NodeState::Succeeded));
        let a_idx = graph.index_of(std::path::Path::new("/tree/a")).unwrap();
        let b_idx = graph.index_of(std::path::Path::new("/tree/b")).unwrap();
        let order = order.into_inner().unwrap();
        let pos_a = order.iter().position(|&i| i == a_idx).unwrap();
        let pos_b = order.iter().position(|&i| i == b_idx).unwrap();
        assert!(pos_b < pos_a);
    }

    #[test]
    fn failure_marks_dependents_early_exited() {
        let graph = chain_graph();
        let cancelled = AtomicCancelReason::new(CancelReason::None);
        let b_idx = graph.index_of(std::path::Path::new("/tree/b")).unwrap();
        let report = run(&graph, &SchedulerOptions { parallelism: 2, fail_fast: false }, &cancelled, move |idx| {
            if idx == b_idx {
                NodeOutcome::Failed
            } else {
                NodeOutcome::Succeeded
            }
        });
        let a_idx = graph.index_of(std::path::Path::new("/tree/a")).unwrap();
        assert_eq!(report.states[b_idx], NodeState::Failed);
        assert_eq!(report.states[a_idx], NodeState::EarlyExited);
    }
}
