//! Graph analysis over validated node ids and edges.
//!
//! Cycle detection is a three-color DFS that only follows edges whose
//! endpoints both resolve, so it can run before reference errors are
//! reported. Wave computation uses `petgraph` to topologically sort the graph
//! and groups nodes by their longest-path depth, so every node in a wave can
//! run concurrently.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use turnflow_types::workflow::EdgeDef;

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Find one cycle, returned as the node path that closes it
/// (e.g. `["a", "b", "a"]`). Edges touching undeclared nodes are ignored.
pub fn find_cycle(node_ids: &[&str], edges: &[EdgeDef]) -> Option<Vec<String>> {
    let known: HashSet<&str> = node_ids.iter().copied().collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        let (from, to) = (edge.from_node.as_str(), edge.to_node.as_str());
        if known.contains(from) && known.contains(to) {
            adjacency.entry(from).or_default().push(to);
        }
    }

    let mut color: HashMap<&str, Color> = node_ids.iter().map(|id| (*id, Color::White)).collect();

    for &start in node_ids {
        if color[start] != Color::White {
            continue;
        }
        // Iterative DFS: (node, index of next child to visit).
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        color.insert(start, Color::Gray);

        while let Some((node, child_idx)) = stack.last().copied() {
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if child_idx >= children.len() {
                color.insert(node, Color::Black);
                stack.pop();
                continue;
            }
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            let child = children[child_idx];
            match color[child] {
                Color::White => {
                    color.insert(child, Color::Gray);
                    stack.push((child, 0));
                }
                Color::Gray => {
                    let pos = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                    let mut path: Vec<String> = stack[pos..].iter().map(|(n, _)| n.to_string()).collect();
                    path.push(child.to_string());
                    return Some(path);
                }
                Color::Black => {}
            }
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Wave computation
// ---------------------------------------------------------------------------

/// Group nodes into waves by longest-path depth from the graph roots.
///
/// Nodes keep their declaration order within a wave. Returns `None` if the
/// graph has a cycle.
pub fn compute_waves(node_ids: &[&str], edges: &[EdgeDef]) -> Option<Vec<Vec<String>>> {
    if node_ids.is_empty() {
        return Some(Vec::new());
    }

    let mut graph = DiGraph::<&str, ()>::new();
    let index: HashMap<&str, _> = node_ids.iter().map(|id| (*id, graph.add_node(*id))).collect();
    for edge in edges {
        if let (Some(&from), Some(&to)) = (index.get(edge.from_node.as_str()), index.get(edge.to_node.as_str())) {
            graph.add_edge(from, to, ());
        }
    }

    let sorted = toposort(&graph, None).ok()?;

    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node_idx in sorted {
        let id = graph[node_idx];
        let depth = graph
            .neighbors_directed(node_idx, petgraph::Direction::Incoming)
            .map(|pred| depths.get(graph[pred]).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(id, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<String>> = vec![Vec::new(); max_depth + 1];
    for id in node_ids {
        waves[depths[id]].push(id.to_string());
    }
    Some(waves)
}

// ---------------------------------------------------------------------------
// Reachability and depth advisories
// ---------------------------------------------------------------------------

/// Nodes reachable from `entry` (inclusive) following edges forward.
pub fn reachable_from<'a>(entry: &'a str, edges: &'a [EdgeDef]) -> HashSet<&'a str> {
    let mut seen = HashSet::from([entry]);
    let mut queue = VecDeque::from([entry]);
    while let Some(node) = queue.pop_front() {
        for edge in edges.iter().filter(|e| e.from_node == node) {
            if seen.insert(edge.to_node.as_str()) {
                queue.push_back(edge.to_node.as_str());
            }
        }
    }
    seen
}

/// Length in edges of the longest path from `entry`, for acyclic graphs.
pub fn longest_path_from(entry: &str, node_ids: &[&str], edges: &[EdgeDef]) -> usize {
    let reachable = reachable_from(entry, edges);
    let sub_nodes: Vec<&str> = node_ids.iter().copied().filter(|id| reachable.contains(id)).collect();
    let sub_edges: Vec<EdgeDef> = edges
        .iter()
        .filter(|e| reachable.contains(e.from_node.as_str()) && reachable.contains(e.to_node.as_str()))
        .cloned()
        .collect();
    compute_waves(&sub_nodes, &sub_edges)
        .map(|waves| waves.len().saturating_sub(1))
        .unwrap_or(0)
}

/// Direct predecessors of `node_id` in edge declaration order.
pub fn predecessors<'a>(node_id: &str, edges: &'a [EdgeDef]) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    edges
        .iter()
        .filter(|e| e.to_node == node_id)
        .map(|e| e.from_node.as_str())
        .filter(|from| seen.insert(*from))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(from: &str, to: &str) -> EdgeDef {
        EdgeDef::sequential(from, to)
    }

    #[test]
    fn test_two_node_cycle_found() {
        let cycle = find_cycle(&["a", "b"], &[seq("a", "b"), seq("b", "a")]).unwrap();
        assert_eq!(cycle, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_self_loop_found() {
        let cycle = find_cycle(&["a"], &[seq("a", "a")]).unwrap();
        assert_eq!(cycle, vec!["a", "a"]);
    }

    #[test]
    fn test_diamond_has_no_cycle() {
        let edges = vec![seq("a", "b"), seq("a", "c"), seq("b", "d"), seq("c", "d")];
        assert!(find_cycle(&["a", "b", "c", "d"], &edges).is_none());
    }

    #[test]
    fn test_cycle_through_undeclared_node_ignored() {
        let edges = vec![seq("a", "ghost"), seq("ghost", "a")];
        assert!(find_cycle(&["a"], &edges).is_none());
    }

    #[test]
    fn test_fan_out_fan_in_waves() {
        let edges = vec![
            EdgeDef::parallel("refiner", "critic"),
            EdgeDef::parallel("refiner", "historian"),
            seq("critic", "synthesis"),
            seq("historian", "synthesis"),
        ];
        let waves = compute_waves(&["refiner", "critic", "historian", "synthesis"], &edges).unwrap();
        assert_eq!(
            waves,
            vec![
                vec!["refiner".to_string()],
                vec!["critic".to_string(), "historian".to_string()],
                vec!["synthesis".to_string()],
            ]
        );
    }

    #[test]
    fn test_longest_path_determines_depth() {
        // a -> b -> c and a -> c: c must wait for b.
        let edges = vec![seq("a", "b"), seq("b", "c"), seq("a", "c")];
        let waves = compute_waves(&["a", "b", "c"], &edges).unwrap();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[2], vec!["c".to_string()]);
    }

    #[test]
    fn test_waves_none_on_cycle() {
        assert!(compute_waves(&["a", "b"], &[seq("a", "b"), seq("b", "a")]).is_none());
    }

    #[test]
    fn test_reachability() {
        let edges = vec![seq("a", "b"), seq("c", "d")];
        let reachable = reachable_from("a", &edges);
        assert!(reachable.contains("b"));
        assert!(!reachable.contains("c"));
    }

    #[test]
    fn test_longest_path_and_predecessors() {
        let edges = vec![seq("a", "b"), seq("b", "c"), seq("a", "c")];
        assert_eq!(longest_path_from("a", &["a", "b", "c"], &edges), 2);
        assert_eq!(predecessors("c", &edges), vec!["b", "a"]);
    }
}
