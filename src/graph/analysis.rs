// SPDX-License-Identifier: MIT

//! Graph analysis: cycle detection, reachability, adjacency maps
//!
//! Cycle detection runs over the full graph before any node executes; a
//! cycle is a fatal, non-retryable condition. Reachability prunes the
//! graph to the nodes relevant to a run's entry points so an unrelated
//! branch never blocks completion.

use std::collections::{HashMap, HashSet, VecDeque};

use super::types::{WorkflowEdge, WorkflowNode};

/// Find a cycle in the graph, returning one offending node path.
///
/// Standard white/grey/black DFS: grey nodes are on the current stack, so
/// hitting a grey node again closes a cycle.
pub fn find_cycle(nodes: &[WorkflowNode], edges: &[WorkflowEdge]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    let outgoing = outgoing_by_source(edges);
    let mut color: HashMap<&str, Color> =
        nodes.iter().map(|n| (n.id.as_str(), Color::White)).collect();

    fn visit<'a>(
        id: &'a str,
        outgoing: &HashMap<&str, Vec<&'a WorkflowEdge>>,
        color: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        color.insert(id, Color::Grey);
        stack.push(id);

        for edge in outgoing.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            let target = edge.target.as_str();
            match color.get(target).copied() {
                Some(Color::Grey) => {
                    // Close the loop from the first occurrence on the stack
                    let start = stack.iter().position(|n| *n == target).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    path.push(target.to_string());
                    return Some(path);
                }
                Some(Color::White) => {
                    if let Some(path) = visit(target, outgoing, color, stack) {
                        return Some(path);
                    }
                }
                // Black or an edge pointing at an unknown node id
                _ => {}
            }
        }

        stack.pop();
        color.insert(id, Color::Black);
        None
    }

    let mut stack = Vec::new();
    for node in nodes {
        if color[node.id.as_str()] == Color::White {
            if let Some(path) = visit(node.id.as_str(), &outgoing, &mut color, &mut stack) {
                return Some(path);
            }
        }
    }
    None
}

/// Node ids forward-reachable from the given start set (inclusive)
pub fn reachable_from(
    edges: &[WorkflowEdge],
    start_ids: impl IntoIterator<Item = String>,
) -> HashSet<String> {
    let mut reachable: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();

    for id in start_ids {
        if reachable.insert(id.clone()) {
            queue.push_back(id);
        }
    }

    let outgoing = outgoing_by_source(edges);
    while let Some(id) = queue.pop_front() {
        for edge in outgoing.get(id.as_str()).map(Vec::as_slice).unwrap_or(&[]) {
            if reachable.insert(edge.target.clone()) {
                queue.push_back(edge.target.clone());
            }
        }
    }
    reachable
}

/// Edges grouped by source node id
pub fn outgoing_by_source(edges: &[WorkflowEdge]) -> HashMap<&str, Vec<&WorkflowEdge>> {
    let mut map: HashMap<&str, Vec<&WorkflowEdge>> = HashMap::new();
    for edge in edges {
        map.entry(edge.source.as_str()).or_default().push(edge);
    }
    map
}

/// Edges grouped by target node id
pub fn incoming_by_target(edges: &[WorkflowEdge]) -> HashMap<&str, Vec<&WorkflowEdge>> {
    let mut map: HashMap<&str, Vec<&WorkflowEdge>> = HashMap::new();
    for edge in edges {
        map.entry(edge.target.as_str()).or_default().push(edge);
    }
    map
}
