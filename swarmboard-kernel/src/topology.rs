//! Network topology resolution.
//!
//! For every network column and every service row, decides which piece of the
//! connection line the renderer has to draw. Pure and deterministic: the output
//! is part of the fingerprinted snapshot.

use crate::models::{Network, Service};
use serde::{Deserialize, Serialize};

/// Line-routing state of one (service, network) cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connection {
    /// Nothing drawn
    None,
    /// Line above and below, no marker (row not attached)
    Through,
    /// Marker, line continuing downward
    Start,
    /// Line above, marker, line below
    Middle,
    /// Line above, marker, nothing below
    End,
    /// Isolated marker
    Only,
}

/// One service row, with one state per network column (same order as the snapshot networks)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConnections {
    pub service_id: String,
    pub networks: Vec<Connection>,
}

/// First and last attached rows of a network column.
///
/// `first` stays unset for ingress networks: their line enters from the top of
/// the diagram instead of starting at a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub first: Option<usize>,
    pub last: Option<usize>,
}

impl Bounds {
    pub fn scan(services: &[Service], network: &Network) -> Self {
        services
            .iter()
            .enumerate()
            .filter(|(_, service)| service.is_attached_to(&network.id))
            .fold(Bounds::default(), |bounds, (row, _)| Bounds {
                first: match bounds.first {
                    None if !network.ingress => Some(row),
                    first => first,
                },
                last: Some(row),
            })
    }

    pub fn state(&self, row: usize, attached: bool) -> Connection {
        match (self.first, self.last) {
            (_, None) => Connection::None,
            (_, Some(last)) if row > last => Connection::None,
            (Some(first), _) if row < first => Connection::None,
            (Some(first), Some(last)) if first == row && last == row => Connection::Only,
            (Some(first), _) if first == row => Connection::Start,
            (_, Some(last)) if last == row => Connection::End,
            _ if attached => Connection::Middle,
            _ => Connection::Through,
        }
    }
}

/// Computes the full connection matrix, rows in service order, columns in network order
pub fn resolve(services: &[Service], networks: &[Network]) -> Vec<ServiceConnections> {
    let bounds: Vec<Bounds> = networks.iter().map(|n| Bounds::scan(services, n)).collect();

    services
        .iter()
        .enumerate()
        .map(|(row, service)| ServiceConnections {
            service_id: service.id.clone(),
            networks: networks
                .iter()
                .zip(&bounds)
                .map(|(network, b)| b.state(row, service.is_attached_to(&network.id)))
                .collect(),
        })
        .collect()
}
