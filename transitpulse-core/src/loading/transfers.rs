use std::collections::BTreeMap;

use log::info;

use crate::model::{Connector, Edge, ModeGraph};
use crate::Error;

/// Key of the connector edge leaving a stop towards `mode`
pub(crate) fn transfer_key(mode: &str) -> String {
    format!("transfer:{mode}")
}

/// Adds transfer connectors between every transit mode and the walking graph.
///
/// Modes live in separate graphs, so a transfer is a zero-length loop on the
/// stop tagged with the mode it leads to: one in the transit graph towards
/// walking and one in the walking graph towards the transit mode.
pub(crate) fn add_transfer_connectors(
    transit: &mut BTreeMap<String, ModeGraph>,
    walking: &mut ModeGraph,
    transfer_cost_s: f64,
) -> Result<usize, Error> {
    let walking_mode = walking.mode().to_string();
    let mut added = 0usize;

    for (mode, graph) in transit.iter_mut() {
        let stop_ids: Vec<String> = graph
            .nodes()
            .filter(|n| walking.contains_node(&n.id))
            .map(|n| n.id.clone())
            .collect();

        for stop_id in &stop_ids {
            let to_walking = Edge::new(transfer_key(&walking_mode), transfer_cost_s, 0.0).with_connector(
                Connector::Transfer {
                    to_mode: walking_mode.clone(),
                },
            );
            graph.add_edge(stop_id, stop_id, to_walking)?;

            let to_transit = Edge::new(transfer_key(mode), transfer_cost_s, 0.0)
                .with_connector(Connector::Transfer { to_mode: mode.clone() });
            walking.add_edge(stop_id, stop_id, to_transit)?;
            added += 2;
        }
    }

    info!("Added {added} transfer connectors between transit modes and walking");
    Ok(added)
}
