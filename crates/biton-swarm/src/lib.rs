//! biton-swarm: swarm formation over a discovery network.
//!
//! Discovery yields candidate addresses, which are deduplicated, dialed,
//! authenticated with Noise_XX, and committed to an identity-keyed registry.

pub mod connection;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod hairpin;
pub mod mainline;
pub mod noise;
pub mod registry;
pub mod swarm;
pub mod transport;

pub use connection::{peer_public_key_from_state, Connector, ConnectorConfig};
pub use discovery::{AddressStream, Discovery, StaticDiscovery};
pub use error::{DialError, Error, HandshakeError, Result};
pub use crate::mainline::{mainline_node_id, MainlineDiscovery};
pub use registry::{Peer, PeerRegistry};
pub use swarm::{Swarm, SwarmConfig};
pub use transport::{Transport, TransportSet};
