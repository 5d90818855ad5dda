use chorecore::{Connection, FlowError, FlowRegistry, Host};

/// Walk the graph depth-first from every entry node before execution.
///
/// Each reached node gets its input activated; the first visit also
/// validates it, fetches its external data and arms the response channel
/// when the node can respond. Any failure aborts the run before a single
/// branch is spawned.
pub async fn visit_and_fetch(flow: &FlowRegistry, host: &dyn Host) -> Result<(), FlowError> {
    let starts = flow.starts();
    if starts.is_empty() {
        return Err(FlowError::EndpointNotFound(flow.endpoint().to_string()));
    }

    // (source node id, edge) pairs, popped in depth-first order.
    let mut pending: Vec<(String, Connection)> = starts
        .into_iter()
        .rev()
        .map(|id| (String::new(), Connection::new(id, "")))
        .collect();

    while let Some((source, edge)) = pending.pop() {
        if flow.cancellation().is_cancelled() {
            return Err(FlowError::Canceled);
        }

        let node = flow
            .get(&edge.node)
            .ok_or_else(|| FlowError::NodeNotFound(edge.node.clone()))?;

        if node.is_disabled() {
            continue;
        }

        node.active_input(&source, flow);

        if node.is_disabled() || node.is_checked() {
            continue;
        }

        node.validate().map_err(|source| FlowError::Validate {
            node_id: edge.node.clone(),
            node_type: node.node_type().to_string(),
            source,
        })?;

        if !node.is_fetched() {
            node.fetch(host).await.map_err(|source| FlowError::Fetch {
                node_id: edge.node.clone(),
                node_type: node.node_type().to_string(),
                source,
            })?;
        }

        if node.is_respond() {
            flow.arm_response();
        }

        node.check();

        for i in (0..node.next_count()).rev() {
            for next in node.next(i).iter().rev() {
                pending.push((edge.node.clone(), next.clone()));
            }
        }
    }

    Ok(())
}
