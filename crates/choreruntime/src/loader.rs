use crate::registry::NodeRegistry;
use chorecore::{FlowError, FlowRegistry, GraphDefinition};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

/// Instantiate every known node of `graph` into `flow`.
///
/// Nodes are created in id order so that entry nodes are recorded
/// deterministically. Unknown node types are skipped.
pub fn load_nodes(
    registry: &NodeRegistry,
    graph: &GraphDefinition,
    flow: &FlowRegistry,
) -> Result<(), FlowError> {
    let mut ids: Vec<&String> = graph.keys().collect();
    ids.sort();

    for id in ids {
        let config = &graph[id];
        match registry.create_node(id, config)? {
            Some(node) => flow.register(id.clone(), node),
            None => tracing::debug!(
                "skipping node {} with unknown type [{}]",
                id,
                config.node_type
            ),
        }
    }

    Ok(())
}

/// True when a directed cycle is reachable from one of the entry nodes.
pub fn has_reachable_cycle(flow: &FlowRegistry) -> bool {
    let nodes = flow.nodes();
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut index: HashMap<String, NodeIndex> = HashMap::new();

    for (id, _) in &nodes {
        index.insert(id.clone(), graph.add_node(id.clone()));
    }

    for (id, node) in &nodes {
        let from = index[id];
        for i in 0..node.next_count() {
            for conn in node.next(i) {
                if let Some(&to) = index.get(&conn.node) {
                    graph.update_edge(from, to, ());
                }
            }
        }
    }

    let mut reachable = HashSet::new();
    for start in flow.starts() {
        let Some(&root) = index.get(&start) else {
            continue;
        };
        let mut dfs = Dfs::new(&graph, root);
        while let Some(visited) = dfs.next(&graph) {
            reachable.insert(visited);
        }
    }

    tarjan_scc(&graph).into_iter().any(|component| {
        let cyclic = component.len() > 1
            || component
                .first()
                .is_some_and(|&n| graph.contains_edge(n, n));
        cyclic && component.iter().any(|n| reachable.contains(n))
    })
}
