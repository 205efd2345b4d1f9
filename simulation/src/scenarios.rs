//! Pre-defined simulation scenarios
//!
//! Each scenario pairs a topology with the flows that make coding pay off:
//! traffic crossing a relay in opposite directions.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::simulation::{SimConfig, SimReport, Simulation};
use crate::topology::{Topology, TopologyBuilder};
use crate::types::NodeId;

/// Canonical layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// A and C exchange packets through relay B
    AliceBob,
    /// Two crossing flows through relay E, with overhearing between ends
    Cross,
    /// Both ends of a line talk to each other
    Chain,
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::AliceBob => "alice-bob",
            Scenario::Cross => "cross",
            Scenario::Chain => "chain",
        }
    }

    /// `nodes` only applies to [`Scenario::Chain`]
    pub fn topology(&self, nodes: usize) -> Topology {
        match self {
            Scenario::AliceBob => TopologyBuilder::new().alice_bob(),
            Scenario::Cross => TopologyBuilder::new().cross(),
            Scenario::Chain => TopologyBuilder::new().chain(nodes),
        }
    }

    /// (source, destination) pairs for the layout
    pub fn flows(&self, topology: &Topology) -> Vec<(NodeId, NodeId)> {
        match self {
            Scenario::AliceBob => vec![
                (NodeId('A'), NodeId('C')),
                (NodeId('C'), NodeId('A')),
            ],
            Scenario::Cross => vec![
                (NodeId('A'), NodeId('C')),
                (NodeId('C'), NodeId('A')),
                (NodeId('B'), NodeId('D')),
                (NodeId('D'), NodeId('B')),
            ],
            Scenario::Chain => {
                let ids = topology.node_ids();
                match (ids.first(), ids.last()) {
                    (Some(&first), Some(&last)) if first != last => {
                        vec![(first, last), (last, first)]
                    }
                    _ => Vec::new(),
                }
            }
        }
    }

    /// Build a ready-to-run simulation
    pub fn build(&self, nodes: usize, config: SimConfig) -> Simulation {
        let topology = self.topology(nodes);
        let flows = self.flows(&topology);
        let mut sim = Simulation::new(topology, config);
        for (source, destination) in flows {
            sim.add_flow(source, destination);
        }
        sim
    }

    /// Build, run and report
    pub fn run(&self, nodes: usize, config: SimConfig) -> SimReport {
        info!(scenario = self.name(), "=== Running scenario ===");
        let mut sim = self.build(nodes, config);
        sim.run();
        sim.report(self.name())
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use cope_engine::CopeConfig;

    use super::*;

    fn quick_config() -> SimConfig {
        SimConfig {
            duration_ms: 300,
            start_delay_ms: 10,
            packets_per_flow: 20,
            payload_len: 32,
            engine: CopeConfig::testing(),
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_flows_match_layouts() {
        let chain = Scenario::Chain.topology(4);
        assert_eq!(
            Scenario::Chain.flows(&chain),
            vec![(NodeId('A'), NodeId('D')), (NodeId('D'), NodeId('A'))]
        );
        let cross = Scenario::Cross.topology(0);
        assert_eq!(Scenario::Cross.flows(&cross).len(), 4);
    }

    #[test]
    fn test_chain_delivers_end_to_end() {
        let report = Scenario::Chain.run(4, quick_config());
        assert_eq!(report.scenario, "chain");
        assert_eq!(report.nodes.len(), 4);
        assert_eq!(report.stats.injected, 40);
        assert!(report.stats.delivered > 0);
        assert!(report.stats.forwarded > 0);
        assert_eq!(report.stats.halted_nodes, 0);
    }

    #[test]
    fn test_cross_runs_without_halting() {
        let report = Scenario::Cross.run(0, quick_config());
        assert_eq!(report.stats.injected, 80);
        assert!(report.stats.delivered > 0);
        assert!(report.nodes.iter().all(|n| !n.halted));
    }

    #[test]
    fn test_scenario_names() {
        assert_eq!(Scenario::AliceBob.to_string(), "alice-bob");
        assert_eq!(
            serde_json::to_string(&Scenario::AliceBob).unwrap(),
            "\"alice-bob\""
        );
    }
}
