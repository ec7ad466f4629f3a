//! Execution plans: which steps a trigger runs, and in what order.
//!
//! A plan is compiled lazily from the group's structure and cached against
//! the structure's generation counter, so edits cost nothing until the next
//! fire.

use crate::graph::connection::Connection;
use crate::graph::id::StepId;
use crate::graph::step::StepCell;
use crate::types::StepMode;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Compiled execution plan for one trigger (or for the whole group).
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Steps in dependency order
    pub steps: Vec<Arc<StepCell>>,

    /// Structure generation the plan was compiled against
    pub generation: u64,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about a compiled plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Steps attached to the trigger directly
    pub seed_steps: usize,

    /// Triggered-mode steps pulled in because they consume seed output
    pub reactive_steps: usize,

    /// Feedback edges among planned steps (ignored for ordering)
    pub feedback_edges: usize,

    /// Steps left in an unbroken cycle and appended by registration order
    pub cyclic_steps: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id()).collect()
    }

    pub fn contains(&self, id: StepId) -> bool {
        self.steps.iter().any(|s| s.id() == id)
    }
}

/// Compiles the step/connection arenas into execution plans.
pub struct PlanCompiler;

impl PlanCompiler {
    /// Compile a plan.
    ///
    /// `seeds` are the trigger's listeners; `None` plans every step in the
    /// group. The plan contains the seeds plus every `Triggered`-mode step
    /// reachable from them along connections, except steps in `claimed`:
    /// those listen to other triggers and only run there, so a step never
    /// computes on two worker threads. Order respects every non-feedback
    /// connection; unrelated steps run in registration order.
    pub fn compile(
        steps: &[Option<Arc<StepCell>>],
        connections: &[Option<Connection>],
        seeds: Option<&[StepId]>,
        claimed: &[StepId],
        generation: u64,
    ) -> ExecutionPlan {
        let start_time = std::time::Instant::now();
        let n = steps.len();
        let live = |id: StepId| steps.get(id.index()).is_some_and(|s| s.is_some());

        let (fwd_adj, all_adj) = Self::build_adjacency(steps, connections);

        // Planned set: seeds, then reactive reachability
        let mut planned = vec![false; n];
        let mut seed_steps = 0;
        match seeds {
            Some(seeds) => {
                for &id in seeds {
                    if live(id) && !planned[id.index()] {
                        planned[id.index()] = true;
                        seed_steps += 1;
                    }
                }
            }
            None => {
                for (idx, slot) in steps.iter().enumerate() {
                    if slot.is_some() {
                        planned[idx] = true;
                        seed_steps += 1;
                    }
                }
            }
        }
        let mut blocked = vec![false; n];
        for id in claimed {
            if let Some(flag) = blocked.get_mut(id.index()) {
                *flag = true;
            }
        }
        let reactive_steps = Self::reactive_reachability(steps, &all_adj, &blocked, &mut planned);

        // steps reading a feedback edge go first when nothing orders them,
        // so they see the producer's previous-tick value
        let mut reads_feedback = vec![false; n];
        for conn in connections.iter().flatten().filter(|c| c.feedback) {
            if let Some(flag) = reads_feedback.get_mut(conn.target_step().index()) {
                *flag = true;
            }
        }

        let (order, cyclic_steps) = Self::topological_sort(&planned, &fwd_adj, &reads_feedback);
        if cyclic_steps > 0 {
            tracing::warn!(
                "Plan has an unbroken cycle: {} step(s) appended in registration order (gen {})",
                cyclic_steps,
                generation
            );
        }

        let feedback_edges = connections
            .iter()
            .flatten()
            .filter(|c| {
                c.feedback && planned[c.source_step().index()] && planned[c.target_step().index()]
            })
            .count();

        let plan_steps: Vec<Arc<StepCell>> = order
            .into_iter()
            .filter_map(|idx| steps[idx].clone())
            .collect();

        ExecutionPlan {
            steps: plan_steps,
            generation,
            stats: PlanStats {
                seed_steps,
                reactive_steps,
                feedback_edges,
                cyclic_steps,
                compile_time_us: start_time.elapsed().as_micros() as u64,
            },
        }
    }

    /// Forward adjacency without feedback edges (for ordering) and with
    /// them (for reachability).
    fn build_adjacency(
        steps: &[Option<Arc<StepCell>>],
        connections: &[Option<Connection>],
    ) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let n = steps.len();
        let mut fwd_adj = vec![Vec::new(); n];
        let mut all_adj = vec![Vec::new(); n];

        for conn in connections.iter().flatten() {
            let from = conn.source_step().index();
            let to = conn.target_step().index();

            // Skip edges involving removed steps
            if from >= n || to >= n || steps[from].is_none() || steps[to].is_none() {
                continue;
            }

            all_adj[from].push(to);
            if !conn.feedback {
                fwd_adj[from].push(to);
            }
        }

        (fwd_adj, all_adj)
    }

    /// Mark every unclaimed triggered-mode step downstream of the planned
    /// set. Returns how many were added.
    fn reactive_reachability(
        steps: &[Option<Arc<StepCell>>],
        all_adj: &[Vec<usize>],
        blocked: &[bool],
        planned: &mut [bool],
    ) -> usize {
        let mut stack: Vec<usize> = (0..planned.len()).filter(|&i| planned[i]).collect();
        let mut added = 0;
        while let Some(idx) = stack.pop() {
            for &next in &all_adj[idx] {
                if planned[next] || blocked[next] {
                    continue;
                }
                let triggered = steps[next]
                    .as_ref()
                    .is_some_and(|s| s.mode() == StepMode::Triggered);
                if triggered {
                    planned[next] = true;
                    added += 1;
                    stack.push(next);
                }
            }
        }
        added
    }

    /// Kahn's algorithm over the planned subgraph. The ready set is a
    /// min-heap on (feedback rank, step index), which makes the order
    /// deterministic. Steps stuck in a cycle are appended by index.
    fn topological_sort(
        planned: &[bool],
        fwd_adj: &[Vec<usize>],
        reads_feedback: &[bool],
    ) -> (Vec<usize>, usize) {
        let n = planned.len();
        let mut in_degree = vec![0u32; n];
        for from in 0..n {
            if !planned[from] {
                continue;
            }
            for &to in &fwd_adj[from] {
                if planned[to] {
                    in_degree[to] += 1;
                }
            }
        }

        let key = |i: usize| Reverse((!reads_feedback[i], i));
        let mut ready: BinaryHeap<Reverse<(bool, usize)>> = (0..n)
            .filter(|&i| planned[i] && in_degree[i] == 0)
            .map(key)
            .collect();
        let mut order = Vec::with_capacity(n);
        let mut placed = vec![false; n];

        while let Some(Reverse((_, idx))) = ready.pop() {
            order.push(idx);
            placed[idx] = true;
            for &next in &fwd_adj[idx] {
                if !planned[next] {
                    continue;
                }
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(key(next));
                }
            }
        }

        let mut cyclic = 0;
        for idx in 0..n {
            if planned[idx] && !placed[idx] {
                order.push(idx);
                cyclic += 1;
            }
        }
        (order, cyclic)
    }
}
