//! DAG validation: run this before persisting or executing a workflow.
//!
//! Rules enforced:
//! 1. Node IDs and edge IDs must be unique within the workflow.
//! 2. Every edge must reference valid node IDs (both `from` and `to`).
//! 3. No edge may start and end at the same node.
//! 4. Loop edges carry no condition and allow at least one iteration.
//! 5. Edges without a `loop` spec must form a directed acyclic graph.
//!    Loop edges are the only sanctioned back-edges and are exempt.
//!
//! Returns a topologically-sorted list of node IDs (forward edges only) on
//! success.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    models::{Edge, Workflow},
    EngineError,
};

/// Validate the workflow's graph and return nodes in topological order.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] / [`EngineError::DuplicateEdgeId`].
/// - [`EngineError::UnknownNodeReference`] if an edge references a missing node.
/// - [`EngineError::SelfLoop`], [`EngineError::ConditionalLoop`],
///   [`EngineError::InvalidLoopBound`] for malformed edges.
/// - [`EngineError::CycleDetected`] if the forward edges are not acyclic.
pub fn validate_dag(workflow: &Workflow) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node and edge IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &workflow.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    let mut seen_edges: HashSet<&str> = HashSet::new();
    for edge in &workflow.edges {
        if !seen_edges.insert(edge.id.as_str()) {
            return Err(EngineError::DuplicateEdgeId(edge.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints and per-edge invariants
    // -----------------------------------------------------------------------
    for edge in &workflow.edges {
        if !seen_ids.contains(edge.from.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                edge_id: edge.id.clone(),
                node_id: edge.from.clone(),
                side: "from",
            });
        }
        if !seen_ids.contains(edge.to.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                edge_id: edge.id.clone(),
                node_id: edge.to.clone(),
                side: "to",
            });
        }
        check_edge_shape(edge)?;
    }

    // -----------------------------------------------------------------------
    // 3. Cycle detection over forward edges, one edge at a time
    // -----------------------------------------------------------------------
    let mut accepted: Vec<&Edge> = Vec::with_capacity(workflow.edges.len());
    for edge in workflow.edges.iter().filter(|e| !e.is_loop()) {
        if reaches(accepted.iter().copied(), &edge.to, &edge.from) {
            return Err(EngineError::CycleDetected {
                from: edge.from.clone(),
                to: edge.to.clone(),
            });
        }
        accepted.push(edge);
    }

    Ok(topological_order(workflow))
}

/// True if adding a forward edge `from → to` would close a cycle, i.e. a path
/// `to → … → from` already exists over the non-loop edges in `edges`.
pub fn would_create_cycle(edges: &[Edge], from: &str, to: &str) -> bool {
    reaches(edges.iter(), to, from)
}

/// Authoring-time check for adding (or updating) `candidate` next to
/// `existing`. Loop edges only get their own shape checked; they never count
/// as cycles.
pub fn check_edge(existing: &[Edge], candidate: &Edge) -> Result<(), EngineError> {
    check_edge_shape(candidate)?;
    if candidate.is_loop() {
        return Ok(());
    }
    // An update replaces the stored edge with the same ID.
    let others: Vec<Edge> = existing
        .iter()
        .filter(|e| e.id != candidate.id)
        .cloned()
        .collect();
    if would_create_cycle(&others, &candidate.from, &candidate.to) {
        return Err(EngineError::CycleDetected {
            from: candidate.from.clone(),
            to: candidate.to.clone(),
        });
    }
    Ok(())
}

/// Topological order of the forward subgraph (Kahn's algorithm).
///
/// Ties are broken by declaration order so the result is stable. Assumes the
/// workflow already passed [`validate_dag`]; nodes stuck in a cycle are left
/// out.
pub fn topological_order(workflow: &Workflow) -> Vec<String> {
    // Build adjacency list and in-degree map.
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in &workflow.nodes {
        adjacency.entry(node.id.as_str()).or_default();
        in_degree.entry(node.id.as_str()).or_insert(0);
    }

    for edge in workflow.edges.iter().filter(|e| !e.is_loop()) {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
        *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
    }

    // Seed the queue with nodes that have no incoming edges.
    let mut queue: VecDeque<&str> = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id).copied() == Some(0))
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(workflow.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    sorted
}

fn check_edge_shape(edge: &Edge) -> Result<(), EngineError> {
    if edge.from == edge.to {
        return Err(EngineError::SelfLoop {
            edge_id: edge.id.clone(),
            node_id: edge.from.clone(),
        });
    }
    if let Some(spec) = edge.loop_spec {
        if edge.condition.is_some() {
            return Err(EngineError::ConditionalLoop(edge.id.clone()));
        }
        if spec.max_iterations == 0 {
            return Err(EngineError::InvalidLoopBound(edge.id.clone()));
        }
    }
    Ok(())
}

/// Depth-first search for a path `start → … → target` over non-loop edges.
fn reaches<'a>(edges: impl Iterator<Item = &'a Edge>, start: &str, target: &str) -> bool {
    if start == target {
        return true;
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges.filter(|e| !e.is_loop()) {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![start];
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(next) = adjacency.get(node) {
            stack.extend(next.iter().copied().filter(|n| !visited.contains(n)));
        }
    }
    false
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeDefinition;
    use serde_json::Value;

    fn make_node(id: &str) -> NodeDefinition {
        NodeDefinition::new(id, "mock", Value::Null)
    }

    fn make_workflow(nodes: Vec<NodeDefinition>, edges: Vec<Edge>) -> Workflow {
        Workflow::new("test", nodes, edges)
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge::new(format!("{from}-{to}"), from, to)
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        // A → B → C
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c")],
            vec![edge("a", "b"), edge("b", "c")],
        );

        let sorted = validate_dag(&workflow).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c"), make_node("d")],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        );

        let sorted = validate_dag(&workflow).expect("should be valid");
        // 'a' must be first, 'd' must be last.
        assert_eq!(sorted.first().unwrap(), "a");
        assert_eq!(sorted.last().unwrap(), "d");
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let workflow = make_workflow(vec![make_node("a"), make_node("a")], vec![]);
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::DuplicateNodeId(id)) if id == "a"
        ));
    }

    #[test]
    fn duplicate_edge_id_is_rejected() {
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c")],
            vec![Edge::new("e1", "a", "b"), Edge::new("e1", "b", "c")],
        );
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::DuplicateEdgeId(id)) if id == "e1"
        ));
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let workflow = make_workflow(vec![make_node("a")], vec![edge("a", "ghost")]);
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::UnknownNodeReference { node_id, side: "to", .. }) if node_id == "ghost"
        ));
    }

    #[test]
    fn self_loop_is_rejected_even_as_loop_edge() {
        let workflow = make_workflow(vec![make_node("a")], vec![edge("a", "a").looping(3)]);
        assert!(matches!(validate_dag(&workflow), Err(EngineError::SelfLoop { .. })));
    }

    #[test]
    fn cycle_is_detected() {
        // A → B → C → A  (cycle!)
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c")],
            vec![edge("a", "b"), edge("b", "c"), edge("c", "a")],
        );
        assert!(matches!(
            validate_dag(&workflow),
            Err(EngineError::CycleDetected { from, to }) if from == "c" && to == "a"
        ));
    }

    #[test]
    fn loop_edge_is_exempt_from_cycle_detection() {
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c")],
            vec![edge("a", "b"), edge("b", "c"), edge("c", "a").looping(2)],
        );
        assert_eq!(validate_dag(&workflow).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn loop_edge_with_condition_or_zero_bound_is_rejected() {
        let conditional = make_workflow(
            vec![make_node("a"), make_node("b")],
            vec![edge("a", "b"), edge("b", "a").looping(2).with_condition("true")],
        );
        assert!(matches!(
            validate_dag(&conditional),
            Err(EngineError::ConditionalLoop(_))
        ));

        let zero = make_workflow(
            vec![make_node("a"), make_node("b")],
            vec![edge("a", "b"), edge("b", "a").looping(0)],
        );
        assert!(matches!(validate_dag(&zero), Err(EngineError::InvalidLoopBound(_))));
    }

    #[test]
    fn single_node_no_edges_is_valid() {
        let workflow = make_workflow(vec![make_node("solo")], vec![]);
        let sorted = validate_dag(&workflow).expect("single node should be valid");
        assert_eq!(sorted, vec!["solo"]);
    }

    #[test]
    fn would_create_cycle_follows_forward_paths_only() {
        let edges = vec![edge("a", "b"), edge("b", "c"), edge("c", "d").looping(2)];
        assert!(would_create_cycle(&edges, "c", "a"));
        assert!(would_create_cycle(&edges, "b", "b"));
        assert!(!would_create_cycle(&edges, "a", "c"));
        // The only path d → … → a would use the loop edge.
        assert!(!would_create_cycle(&edges, "a", "d"));
        assert!(!would_create_cycle(&edges, "d", "a"));
    }

    #[test]
    fn check_edge_never_rejects_a_loop_edge_as_cycle() {
        let edges = vec![edge("a", "b"), edge("b", "c")];
        assert!(check_edge(&edges, &edge("c", "a").looping(5)).is_ok());
        assert!(matches!(
            check_edge(&edges, &edge("c", "a")),
            Err(EngineError::CycleDetected { .. })
        ));
    }

    #[test]
    fn check_edge_ignores_the_edge_being_replaced() {
        // Re-pointing a-b to b-a would be a cycle only if a-b stayed.
        let edges = vec![Edge::new("e", "a", "b")];
        assert!(check_edge(&edges, &Edge::new("e", "b", "a")).is_ok());
    }
}
