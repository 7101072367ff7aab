//! bramblesim - discrete event simulator for the bramble mesh core
//!
//! Drives many [`bramble::Node`] instances against a modeled radio layer:
//! beacon fan-out to scanning neighbors, GAP connections with delay and
//! loss, out-of-band access connections, link churn and partitions. Runs
//! are deterministic per seed.
//!
//! # Example
//!
//! ```no_run
//! use bramble::Duration;
//! use bramblesim::{Simulator, Topology};
//!
//! let topo = Topology::fully_connected(&[1, 2, 3]);
//! let mut sim = Simulator::new(42).with_topology(topo);
//! for id in [1, 2, 3] {
//!     sim.add_node(id);
//! }
//! let result = sim.run_for(Duration::from_secs(30));
//! assert!(result.converged(3));
//! ```

pub mod event;
pub mod metrics;
pub mod node;
pub mod sim;
pub mod topology;

pub use event::{ScenarioAction, SimEvent};
pub use metrics::{ClusterSnapshot, SimMetrics, SimulationResult};
pub use node::{AdvState, SimCommand, SimNode, VecEmitter};
pub use sim::{addr_of, Simulator};
pub use topology::{Link, Topology};
