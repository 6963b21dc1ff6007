//! Wave scheduler for one execution.
//!
//! Each call to [`Scheduler::next_wave`] walks the forward (non-loop) graph
//! in topological order and decides every waiting node:
//!
//! - **run**: all inbound edges are settled and at least one was traversed
//!   (OR-join), or the node was re-admitted by a loop edge;
//! - **skip**: all inbound edges are settled and none was traversed, or an
//!   inbound source failed without an `error` route;
//! - **wait**: some inbound source has not reached a terminal state.
//!
//! Because the walk is topological, a skip propagates to every downstream
//! node with no other live inbound path within the same call.
//!
//! Loop edges never take part in readiness. When a loop edge's source
//! completes, the loop body (target plus every node on a forward path from
//! target to source) starts a new iteration, until the edge's
//! `max_iterations` visits are used up.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;
use tracing::{debug, warn};

use crate::dag::topological_order;
use crate::models::{Edge, NodeExecution, NodeStatus, Workflow, HANDLE_KEY};
use crate::registry::ExecutorRegistry;
use crate::template::TemplateResolver;
use crate::EngineError;

/// Aggregate result of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
}

/// `NotStarted → Scheduling ⇄ Dispatched → Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    NotStarted,
    Scheduling,
    Dispatched,
    Finished(RunOutcome),
}

/// A node visit admitted for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub node_id: String,
    pub iteration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Every inbound edge was settled without being traversed.
    NoTraversedInput,
    /// An inbound source failed and had no `error` route.
    UpstreamFailed(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTraversedInput => write!(f, "no inbound edge was traversed"),
            Self::UpstreamFailed(node) => write!(f, "upstream node '{node}' failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    pub node_id: String,
    pub iteration: u32,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// The loop edge sent control back; `iteration` is the target's new one.
    Fired {
        edge_id: String,
        target: String,
        iteration: u32,
    },
    /// The loop edge used up its visits and is now a dead path.
    Exhausted { edge_id: String, visits: u32 },
}

/// Output of one scheduling step.
#[derive(Debug, Default)]
pub struct Wave {
    pub ready: Vec<Admission>,
    pub skipped: Vec<Skip>,
    pub loop_events: Vec<LoopEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Waiting,
    Dispatched,
    Completed,
    Failed { routed: bool },
    Skipped,
}

#[derive(Debug)]
struct NodeState {
    slot: Slot,
    iteration: u32,
    loop_admitted: bool,
    ui_only: bool,
    handles: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
    Pending,
    Live,
    Dead,
    Blocked,
}

enum Decision {
    Wait,
    Run,
    Skip(SkipReason),
}

#[derive(Debug, Default)]
struct LoopCounter {
    fired: u32,
    exhausted: bool,
}

/// Per-execution scheduling state. Holds no executor handles and performs no
/// I/O; the execution manager drives it.
pub struct Scheduler {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    incoming: Vec<Vec<usize>>,
    outgoing: Vec<Vec<usize>>,
    loops_out: Vec<Vec<usize>>,
    order: Vec<usize>,
    nodes: Vec<NodeState>,
    loops: HashMap<usize, LoopCounter>,
    /// edge → (source iteration it was evaluated for, result)
    conditions: HashMap<usize, (u32, bool)>,
    just_completed: Vec<usize>,
    failures: Vec<(String, String)>,
    state: SchedulerState,
}

impl Scheduler {
    /// Build the scheduler for a workflow that already passed `validate_dag`.
    pub fn new(workflow: &Workflow, registry: &ExecutorRegistry) -> Self {
        let ids: Vec<String> = workflow.nodes.iter().map(|n| n.id.clone()).collect();
        let index: HashMap<String, usize> = ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();

        let mut incoming = vec![Vec::new(); ids.len()];
        let mut outgoing = vec![Vec::new(); ids.len()];
        let mut loops_out = vec![Vec::new(); ids.len()];
        for (e, edge) in workflow.edges.iter().enumerate() {
            let (Some(&from), Some(&to)) = (index.get(&edge.from), index.get(&edge.to)) else {
                continue;
            };
            if edge.is_loop() {
                loops_out[from].push(e);
            } else {
                outgoing[from].push(e);
                incoming[to].push(e);
            }
        }

        let order = topological_order(workflow)
            .iter()
            .filter_map(|id| index.get(id).copied())
            .collect();

        let nodes = workflow
            .nodes
            .iter()
            .map(|n| {
                let ui_only = registry.is_ui_only(&n.node_type);
                NodeState {
                    slot: if ui_only { Slot::Skipped } else { Slot::Waiting },
                    iteration: 1,
                    loop_admitted: false,
                    ui_only,
                    handles: None,
                }
            })
            .collect();

        Self {
            ids,
            index,
            edges: workflow.edges.clone(),
            incoming,
            outgoing,
            loops_out,
            order,
            nodes,
            loops: HashMap::new(),
            conditions: HashMap::new(),
            just_completed: Vec::new(),
            failures: Vec::new(),
            state: SchedulerState::NotStarted,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SchedulerState::Finished(_))
    }

    /// Unrouted failures so far as `(node_id, error)`, in the order recorded.
    pub fn failures(&self) -> &[(String, String)] {
        &self.failures
    }

    pub fn iteration(&self, node_id: &str) -> Option<u32> {
        self.index.get(node_id).map(|&i| self.nodes[i].iteration)
    }

    /// Compute the next wave against the current data context snapshot.
    ///
    /// Applies pending loop re-admissions first, then decides every waiting
    /// node. An empty `ready` set with nothing in flight finishes the run.
    ///
    /// # Errors
    /// [`EngineError::TemplateResolution`] when an edge condition cannot be
    /// evaluated; the error is attributed to the edge's target node.
    pub fn next_wave(&mut self, resolver: &TemplateResolver, data: &Value) -> Result<Wave, EngineError> {
        let mut wave = Wave::default();
        if self.is_finished() {
            return Ok(wave);
        }
        self.state = SchedulerState::Scheduling;
        wave.loop_events = self.advance_loops();

        for pos in 0..self.order.len() {
            let n = self.order[pos];
            if self.nodes[n].slot != Slot::Waiting {
                continue;
            }
            match self.decide(n, resolver, data)? {
                Decision::Wait => {}
                Decision::Run => {
                    self.nodes[n].slot = Slot::Dispatched;
                    wave.ready.push(Admission {
                        node_id: self.ids[n].clone(),
                        iteration: self.nodes[n].iteration,
                    });
                }
                Decision::Skip(reason) => {
                    debug!(node_id = %self.ids[n], %reason, "node skipped");
                    self.nodes[n].slot = Slot::Skipped;
                    wave.skipped.push(Skip {
                        node_id: self.ids[n].clone(),
                        iteration: self.nodes[n].iteration,
                        reason,
                    });
                }
            }
        }

        if !wave.ready.is_empty() {
            self.state = SchedulerState::Dispatched;
        } else if !self.nodes.iter().any(|n| n.slot == Slot::Dispatched) {
            self.finish();
        }
        Ok(wave)
    }

    /// Feed back the terminal record of a dispatched node.
    pub fn record(&mut self, record: &NodeExecution) {
        let Some(&n) = self.index.get(&record.node_id) else {
            return;
        };
        if self.nodes[n].iteration != record.iteration || self.nodes[n].slot != Slot::Dispatched {
            warn!(node_id = %record.node_id, iteration = record.iteration, "ignoring stale node result");
            return;
        }
        match record.status {
            NodeStatus::Completed => {
                self.nodes[n].slot = Slot::Completed;
                self.nodes[n].handles = record.output.as_ref().and_then(selected_handles);
                self.just_completed.push(n);
            }
            NodeStatus::Failed => {
                let routed = self.outgoing[n].iter().any(|&e| self.edges[e].is_error_route());
                self.nodes[n].slot = Slot::Failed { routed };
                if !routed {
                    self.failures.push((
                        record.node_id.clone(),
                        record.error.clone().unwrap_or_else(|| "unknown error".to_owned()),
                    ));
                }
            }
            NodeStatus::Skipped => self.nodes[n].slot = Slot::Skipped,
            NodeStatus::Pending | NodeStatus::Running => {}
        }
    }

    /// Stop scheduling; the run ends `failed` regardless of node results.
    pub fn abort(&mut self) {
        self.state = SchedulerState::Finished(RunOutcome::Failed);
    }

    fn finish(&mut self) {
        let outcome = if self.failures.is_empty() {
            RunOutcome::Completed
        } else {
            RunOutcome::Failed
        };
        self.state = SchedulerState::Finished(outcome);
    }

    fn decide(&mut self, n: usize, resolver: &TemplateResolver, data: &Value) -> Result<Decision, EngineError> {
        if self.nodes[n].loop_admitted || self.incoming[n].is_empty() {
            return Ok(Decision::Run);
        }

        let states: Vec<(usize, EdgeState)> = self.incoming[n].iter().map(|&e| (e, self.edge_state(e))).collect();
        if states.iter().any(|(_, s)| *s == EdgeState::Pending) {
            return Ok(Decision::Wait);
        }
        if let Some((e, _)) = states.iter().find(|(_, s)| *s == EdgeState::Blocked) {
            return Ok(Decision::Skip(SkipReason::UpstreamFailed(self.edges[*e].from.clone())));
        }

        let mut traversed = false;
        for (e, s) in states {
            if s == EdgeState::Live && self.condition_holds(e, n, resolver, data)? {
                traversed = true;
            }
        }
        Ok(if traversed {
            Decision::Run
        } else {
            Decision::Skip(SkipReason::NoTraversedInput)
        })
    }

    fn edge_state(&self, e: usize) -> EdgeState {
        let edge = &self.edges[e];
        let Some(&src) = self.index.get(&edge.from) else {
            return EdgeState::Dead;
        };
        let source = &self.nodes[src];
        match source.slot {
            Slot::Waiting | Slot::Dispatched => EdgeState::Pending,
            Slot::Skipped => EdgeState::Dead,
            Slot::Failed { routed } => {
                if edge.is_error_route() {
                    EdgeState::Live
                } else if routed {
                    EdgeState::Dead
                } else {
                    EdgeState::Blocked
                }
            }
            Slot::Completed => {
                if edge.is_error_route() || !handle_matches(source.handles.as_deref(), edge.source_handle.as_deref()) {
                    EdgeState::Dead
                } else {
                    EdgeState::Live
                }
            }
        }
    }

    fn condition_holds(&mut self, e: usize, target: usize, resolver: &TemplateResolver, data: &Value) -> Result<bool, EngineError> {
        let Some(condition) = self.edges[e].condition.clone() else {
            return Ok(true);
        };
        let source_iteration = self.index.get(&self.edges[e].from).map(|&s| self.nodes[s].iteration).unwrap_or(1);
        if let Some(&(iteration, result)) = self.conditions.get(&e) {
            if iteration == source_iteration {
                return Ok(result);
            }
        }

        let path = format!("edges.{}.condition", self.edges[e].id);
        let result = resolver
            .evaluate_condition(&condition, data, self.nodes[target].iteration, &path)
            .map_err(|source| EngineError::TemplateResolution {
                node_id: self.ids[target].clone(),
                source,
            })?;
        debug!(edge_id = %self.edges[e].id, %condition, result, "edge condition evaluated");
        self.conditions.insert(e, (source_iteration, result));
        Ok(result)
    }

    fn advance_loops(&mut self) -> Vec<LoopEvent> {
        let mut events = Vec::new();
        for n in std::mem::take(&mut self.just_completed) {
            for i in 0..self.loops_out[n].len() {
                // A previous loop edge may already have restarted this node.
                if self.nodes[n].slot != Slot::Completed {
                    break;
                }
                let e = self.loops_out[n][i];
                let edge = &self.edges[e];
                if !handle_matches(self.nodes[n].handles.as_deref(), edge.source_handle.as_deref()) {
                    continue;
                }
                let max_iterations = edge.loop_spec.map(|l| l.max_iterations).unwrap_or(1);
                let edge_id = edge.id.clone();
                let Some(&target) = self.index.get(&edge.to) else {
                    continue;
                };

                let counter = self.loops.entry(e).or_default();
                if counter.exhausted {
                    continue;
                }
                if counter.fired + 1 >= max_iterations {
                    counter.exhausted = true;
                    let visits = counter.fired + 1;
                    debug!(%edge_id, visits, "loop edge exhausted");
                    events.push(LoopEvent::Exhausted { edge_id, visits });
                    continue;
                }
                counter.fired += 1;

                for b in self.loop_body(target, n) {
                    let state = &mut self.nodes[b];
                    if state.ui_only || (state.slot == Slot::Waiting && b != target) {
                        continue;
                    }
                    state.iteration += 1;
                    state.slot = Slot::Waiting;
                    state.loop_admitted = b == target;
                    state.handles = None;
                }
                events.push(LoopEvent::Fired {
                    edge_id,
                    target: self.ids[target].clone(),
                    iteration: self.nodes[target].iteration,
                });
            }
        }
        events
    }

    /// `target` plus every node on a forward path from `target` to `source`.
    fn loop_body(&self, target: usize, source: usize) -> Vec<usize> {
        let descendants = self.walk(target, &self.outgoing, |e| &self.edges[e].to);
        let ancestors = self.walk(source, &self.incoming, |e| &self.edges[e].from);
        let mut body: Vec<usize> = descendants.intersection(&ancestors).copied().collect();
        if !body.contains(&target) {
            body.push(target);
        }
        body.sort_unstable();
        body
    }

    fn walk<'a>(&'a self, start: usize, adjacency: &[Vec<usize>], next: impl Fn(usize) -> &'a String) -> HashSet<usize> {
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(n) = queue.pop_front() {
            for &e in &adjacency[n] {
                if let Some(&m) = self.index.get(next(e)) {
                    if seen.insert(m) {
                        queue.push_back(m);
                    }
                }
            }
        }
        seen
    }
}

/// Handles a completed node selected through its `"$handle"` output key.
fn selected_handles(output: &Value) -> Option<Vec<String>> {
    match output.get(HANDLE_KEY)? {
        Value::String(h) => Some(vec![h.clone()]),
        Value::Array(items) => Some(items.iter().filter_map(|h| h.as_str().map(str::to_owned)).collect()),
        _ => None,
    }
}

fn handle_matches(selected: Option<&[String]>, edge_handle: Option<&str>) -> bool {
    match (edge_handle, selected) {
        (None, _) | (Some(_), None) => true,
        (Some(handle), Some(selected)) => selected.iter().any(|s| s == handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeDefinition;
    use serde_json::json;
    use uuid::Uuid;

    fn node(id: &str) -> NodeDefinition {
        NodeDefinition::new(id, "mock", Value::Null)
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge::new(format!("{from}-{to}"), from, to)
    }

    fn scheduler(nodes: &[&str], edges: Vec<Edge>) -> Scheduler {
        let workflow = Workflow::new("t", nodes.iter().map(|n| node(n)).collect(), edges);
        crate::dag::validate_dag(&workflow).expect("valid graph");
        Scheduler::new(&workflow, &ExecutorRegistry::new())
    }

    fn finished(id: &str, iteration: u32, result: Result<Value, &str>) -> NodeExecution {
        let mut record = NodeExecution::started(Uuid::nil(), id, iteration, Value::Null);
        match result {
            Ok(output) => record.complete(output),
            Err(e) => record.fail(e),
        }
        record
    }

    /// Runs the scheduler to completion; `outcome` decides each node's result.
    /// Returns the waves as `id@iteration` lists plus every skipped node.
    fn drive(
        s: &mut Scheduler,
        outcome: impl Fn(&str, u32) -> Result<Value, &'static str>,
    ) -> (Vec<Vec<String>>, Vec<String>) {
        let resolver = TemplateResolver::new();
        let mut waves = Vec::new();
        let mut skipped = Vec::new();
        for _ in 0..50 {
            let wave = s.next_wave(&resolver, &json!({})).expect("wave");
            skipped.extend(wave.skipped.iter().map(|k| k.node_id.clone()));
            if wave.ready.is_empty() {
                break;
            }
            let mut ids: Vec<String> = wave.ready.iter().map(|a| format!("{}@{}", a.node_id, a.iteration)).collect();
            ids.sort();
            waves.push(ids);
            for a in &wave.ready {
                s.record(&finished(&a.node_id, a.iteration, outcome(&a.node_id, a.iteration)));
            }
        }
        (waves, skipped)
    }

    fn ok(_: &str, _: u32) -> Result<Value, &'static str> {
        Ok(json!({}))
    }

    #[test]
    fn linear_chain_runs_one_node_per_wave() {
        let mut s = scheduler(&["a", "b", "c"], vec![edge("a", "b"), edge("b", "c")]);
        assert_eq!(s.state(), SchedulerState::NotStarted);
        let (waves, skipped) = drive(&mut s, ok);
        assert_eq!(waves, vec![vec!["a@1"], vec!["b@1"], vec!["c@1"]]);
        assert!(skipped.is_empty());
        assert_eq!(s.state(), SchedulerState::Finished(RunOutcome::Completed));
    }

    #[test]
    fn diamond_branches_share_a_wave() {
        let mut s = scheduler(
            &["a", "b", "c", "d"],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        );
        let (waves, _) = drive(&mut s, ok);
        assert_eq!(waves, vec![vec!["a@1"], vec!["b@1", "c@1"], vec!["d@1"]]);
    }

    #[test]
    fn false_condition_skips_transitively() {
        let mut s = scheduler(
            &["a", "b", "c", "d"],
            vec![edge("a", "b").with_condition("false"), edge("b", "c"), edge("a", "d")],
        );
        let (waves, skipped) = drive(&mut s, ok);
        assert_eq!(waves, vec![vec!["a@1"], vec!["d@1"]]);
        assert_eq!(skipped, vec!["b", "c"]);
        assert_eq!(s.state(), SchedulerState::Finished(RunOutcome::Completed));
    }

    #[test]
    fn join_runs_when_any_branch_is_traversed() {
        let mut s = scheduler(
            &["a", "b", "c", "d"],
            vec![
                edge("a", "b").with_condition("false"),
                edge("a", "c"),
                edge("b", "d"),
                edge("c", "d"),
            ],
        );
        let (waves, skipped) = drive(&mut s, ok);
        assert_eq!(waves, vec![vec!["a@1"], vec!["c@1"], vec!["d@1"]]);
        assert_eq!(skipped, vec!["b"]);
    }

    #[test]
    fn unrouted_failure_skips_downstream_and_fails_run() {
        let mut s = scheduler(&["a", "b", "c"], vec![edge("a", "b"), edge("b", "c")]);
        let (waves, skipped) = drive(&mut s, |id, _| if id == "a" { Err("boom") } else { Ok(json!({})) });
        assert_eq!(waves, vec![vec!["a@1"]]);
        assert_eq!(skipped, vec!["b", "c"]);
        assert_eq!(s.failures(), &[("a".to_owned(), "boom".to_owned())]);
        assert_eq!(s.state(), SchedulerState::Finished(RunOutcome::Failed));
    }

    #[test]
    fn failed_sibling_does_not_block_independent_branch() {
        let mut s = scheduler(
            &["a", "b", "c", "d"],
            vec![edge("a", "b"), edge("a", "c"), edge("c", "d")],
        );
        let (waves, skipped) = drive(&mut s, |id, _| if id == "b" { Err("b broke") } else { Ok(json!({})) });
        assert_eq!(waves, vec![vec!["a@1"], vec!["b@1", "c@1"], vec!["d@1"]]);
        assert!(skipped.is_empty());
        assert_eq!(s.state(), SchedulerState::Finished(RunOutcome::Failed));
    }

    #[test]
    fn error_route_handles_failure() {
        let mut s = scheduler(
            &["a", "recover", "next"],
            vec![edge("a", "recover").with_handle("error"), edge("a", "next")],
        );
        let (waves, skipped) = drive(&mut s, |id, _| if id == "a" { Err("down") } else { Ok(json!({})) });
        assert_eq!(waves, vec![vec!["a@1"], vec!["recover@1"]]);
        assert_eq!(skipped, vec!["next"]);
        assert_eq!(s.state(), SchedulerState::Finished(RunOutcome::Completed));
    }

    #[test]
    fn output_handle_selects_branch() {
        let mut s = scheduler(
            &["check", "yes", "no"],
            vec![edge("check", "yes").with_handle("true"), edge("check", "no").with_handle("false")],
        );
        let (waves, skipped) = drive(&mut s, |id, _| {
            Ok(if id == "check" { json!({ "$handle": "true" }) } else { json!({}) })
        });
        assert_eq!(waves, vec![vec!["check@1"], vec!["yes@1"]]);
        assert_eq!(skipped, vec!["no"]);
    }

    #[test]
    fn loop_edge_readmits_body_until_exhausted() {
        let mut s = scheduler(
            &["a", "b", "c"],
            vec![edge("a", "b"), edge("b", "a").looping(2), edge("b", "c")],
        );
        let resolver = TemplateResolver::new();
        let mut waves = Vec::new();
        let mut events = Vec::new();
        loop {
            let wave = s.next_wave(&resolver, &json!({})).unwrap();
            events.extend(wave.loop_events);
            if wave.ready.is_empty() {
                break;
            }
            for a in &wave.ready {
                waves.push(format!("{}@{}", a.node_id, a.iteration));
                s.record(&finished(&a.node_id, a.iteration, Ok(json!({}))));
            }
        }
        // The exit to c waits until the loop edge is exhausted.
        assert_eq!(waves, vec!["a@1", "b@1", "a@2", "b@2", "c@1"]);
        assert_eq!(
            events,
            vec![
                LoopEvent::Fired { edge_id: "b-a".into(), target: "a".into(), iteration: 2 },
                LoopEvent::Exhausted { edge_id: "b-a".into(), visits: 2 },
            ]
        );
        assert_eq!(s.state(), SchedulerState::Finished(RunOutcome::Completed));
    }

    #[test]
    fn loop_body_is_only_the_nodes_between_target_and_source() {
        // start → a → b → c, loop c → a, side branch start → side
        let mut s = scheduler(
            &["start", "a", "b", "c", "side"],
            vec![
                edge("start", "a"),
                edge("a", "b"),
                edge("b", "c"),
                edge("c", "a").looping(3),
                edge("start", "side"),
            ],
        );
        let (waves, _) = drive(&mut s, ok);
        let flat: Vec<String> = waves.concat();
        assert_eq!(flat.iter().filter(|w| w.starts_with("a@")).count(), 3);
        assert_eq!(flat.iter().filter(|w| w.starts_with("c@")).count(), 3);
        assert_eq!(flat.iter().filter(|w| w.starts_with("start@")).count(), 1);
        assert_eq!(flat.iter().filter(|w| w.starts_with("side@")).count(), 1);
        assert_eq!(s.iteration("b"), Some(3));
    }

    #[test]
    fn loop_handle_can_end_the_loop_early() {
        let mut s = scheduler(
            &["a", "b"],
            vec![edge("a", "b"), edge("b", "a").looping(10).with_handle("again")],
        );
        let (waves, _) = drive(&mut s, |id, iteration| {
            Ok(if id == "b" && iteration < 2 {
                json!({ "$handle": "again" })
            } else {
                json!({ "$handle": "done" })
            })
        });
        assert_eq!(waves.concat(), vec!["a@1", "b@1", "a@2", "b@2"]);
    }

    #[test]
    fn ui_only_nodes_are_never_scheduled() {
        let workflow = Workflow::new(
            "t",
            vec![node("a"), NodeDefinition::new("note", "comment", json!({ "text": "hi" }))],
            vec![],
        );
        let mut s = Scheduler::new(&workflow, &ExecutorRegistry::new());
        let (waves, skipped) = drive(&mut s, ok);
        assert_eq!(waves, vec![vec!["a@1"]]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn bad_condition_is_attributed_to_target() {
        let mut s = scheduler(&["a", "b"], vec![edge("a", "b").with_condition("a.ready")]);
        let resolver = TemplateResolver::new();
        let wave = s.next_wave(&resolver, &json!({})).unwrap();
        s.record(&finished(&wave.ready[0].node_id, 1, Ok(json!({}))));
        let err = s.next_wave(&resolver, &json!({})).unwrap_err();
        assert!(matches!(err, EngineError::TemplateResolution { node_id, .. } if node_id == "b"));
    }

    #[test]
    fn condition_sees_data_context() {
        let mut s = scheduler(
            &["a", "big", "small"],
            vec![
                edge("a", "big").with_condition("a.n > 10"),
                edge("a", "small").with_condition("{{ a.n <= 10 }}"),
            ],
        );
        let resolver = TemplateResolver::new();
        let wave = s.next_wave(&resolver, &json!({})).unwrap();
        s.record(&finished(&wave.ready[0].node_id, 1, Ok(json!({ "n": 3 }))));
        let wave = s.next_wave(&resolver, &json!({ "a": { "n": 3 } })).unwrap();
        assert_eq!(wave.ready, vec![Admission { node_id: "small".into(), iteration: 1 }]);
        assert_eq!(wave.skipped[0].node_id, "big");
    }
}
