//! Discrete-time wireless simulation
//!
//! Every node runs a real [`CopeEngine`] against a [`SimHost`]. Time moves in
//! fixed airtime slots. In each slot:
//! 1. due engine timers fire on every node
//! 2. flows inject new packets at their sources
//! 3. each radio puts at most one frame on air; every node in range on the
//!    same channel hears it (subject to random loss)
//!
//! Received packets addressed to another node are re-enqueued toward the
//! static next hop, so relays see the same fingerprint the source sent and
//! can code it against what their neighbors already hold.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cope_core::{
    AddressResolution, Clock, Fingerprint, Frame, InterfaceId, Link, LinkAddr, LinkError,
    TimerHandle, TimerKind, TimerQueue, Timers,
};
use cope_engine::{
    CopeConfig, CopeEngine, EngineStats, LocalInterface, OutboundPacket, ReceiveOutcome,
};
use cope_logging::NodeContextGuard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::span::EnteredSpan;
use tracing::{debug, debug_span, error, info, trace, warn};

use crate::topology::Topology;
use crate::types::{Flow, NodeId, NodeSpec, SimPacket};

const IFACE: InterfaceId = InterfaceId(0);

/// Configuration for a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Simulated time to run
    pub duration_ms: u64,
    /// Length of one airtime slot; each radio sends at most one frame per slot
    pub airtime_ms: u64,
    /// Frames a radio buffers before the engine sees it as busy
    pub link_queue_depth: usize,
    /// Packets each flow injects
    pub packets_per_flow: u32,
    /// Gap between packets of one flow
    pub flow_interval_ms: u64,
    /// First injection time, leaving room for hellos
    pub start_delay_ms: u64,
    /// Application bytes after the IPv4 header
    pub payload_len: usize,
    /// Probability a receiver misses a frame
    pub loss_probability: f64,
    pub seed: u64,
    pub engine: CopeConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            duration_ms: 5_000,
            airtime_ms: 1,
            link_queue_depth: 1,
            packets_per_flow: 200,
            flow_interval_ms: 1,
            start_delay_ms: 1_500,
            payload_len: 512,
            loss_probability: 0.0,
            seed: 42,
            engine: CopeConfig::default(),
        }
    }
}

/// Aggregate statistics for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimStats {
    pub injected: u64,
    pub enqueue_failures: u64,
    pub delivered: u64,
    pub duplicate_deliveries: u64,
    pub forwarded: u64,
    /// Data frames put on air
    pub transmissions: u64,
    /// Data frames carrying more than one packet
    pub coded_transmissions: u64,
    /// Sum of frame degrees; what an uncoded network would have sent
    pub packets_carried: u64,
    pub hello_transmissions: u64,
    pub frames_lost: u64,
    pub decode_failures: u64,
    pub retransmissions: u64,
    pub retry_drops: u64,
    pub link_errors: u64,
    pub halted_nodes: u64,
    pub total_latency_ms: u64,
}

impl SimStats {
    /// Packets carried per data transmission
    pub fn coding_gain(&self) -> f64 {
        if self.transmissions == 0 {
            return 1.0;
        }
        self.packets_carried as f64 / self.transmissions as f64
    }

    pub fn delivery_ratio(&self) -> f64 {
        if self.injected == 0 {
            return 0.0;
        }
        self.delivered as f64 / self.injected as f64
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.delivered == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.delivered as f64
    }
}

impl std::fmt::Display for SimStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Injected:            {}", self.injected)?;
        writeln!(f, "Delivered:           {} ({:.1}%)", self.delivered, self.delivery_ratio() * 100.0)?;
        writeln!(f, "Duplicates:          {}", self.duplicate_deliveries)?;
        writeln!(f, "Forwarded:           {}", self.forwarded)?;
        writeln!(f, "Transmissions:       {}", self.transmissions)?;
        writeln!(f, "Coded transmissions: {}", self.coded_transmissions)?;
        writeln!(f, "Coding gain:         {:.2}", self.coding_gain())?;
        writeln!(f, "Hellos:              {}", self.hello_transmissions)?;
        writeln!(f, "Retransmissions:     {}", self.retransmissions)?;
        writeln!(f, "Retry drops:         {}", self.retry_drops)?;
        writeln!(f, "Decode failures:     {}", self.decode_failures)?;
        writeln!(f, "Frames lost:         {}", self.frames_lost)?;
        writeln!(f, "Enqueue failures:    {}", self.enqueue_failures)?;
        write!(f, "Avg latency:         {:.1} ms", self.average_latency_ms())
    }
}

/// Per-node engine counters in a report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: NodeId,
    pub halted: bool,
    pub engine: EngineStats,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimReport {
    pub scenario: String,
    pub elapsed_ms: u64,
    pub stats: SimStats,
    pub nodes: Vec<NodeReport>,
}

/// Host for one simulated node: a bounded radio buffer and a virtual clock
#[derive(Debug)]
pub struct SimHost {
    net: Ipv4Addr,
    depth: usize,
    outbox: VecDeque<(Bytes, LinkAddr)>,
    timers: TimerQueue,
    now: Instant,
}

impl SimHost {
    pub fn new(net: Ipv4Addr, depth: usize, now: Instant) -> Self {
        Self {
            net,
            depth,
            outbox: VecDeque::new(),
            timers: TimerQueue::new(),
            now,
        }
    }

    fn pop_frame(&mut self) -> Option<(Bytes, LinkAddr)> {
        self.outbox.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }
}

impl Link for SimHost {
    fn send(&mut self, iface: InterfaceId, frame: Bytes, dest: LinkAddr) -> Result<(), LinkError> {
        if iface != IFACE {
            return Err(LinkError::UnknownInterface(iface));
        }
        if self.outbox.len() >= self.depth {
            return Err(LinkError::NotSendable(iface));
        }
        self.outbox.push_back((frame, dest));
        Ok(())
    }

    fn is_sendable(&self, iface: InterfaceId) -> bool {
        iface == IFACE && self.outbox.len() < self.depth
    }

    fn pending_depth(&self, _iface: InterfaceId) -> usize {
        self.outbox.len()
    }
}

impl AddressResolution for SimHost {
    fn local_network_address(&self, iface: InterfaceId) -> Option<Ipv4Addr> {
        (iface == IFACE).then_some(self.net)
    }
}

impl Timers for SimHost {
    fn schedule_after(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        self.timers.schedule_after(self.now, delay, kind)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.timers.cancel(handle);
    }
}

impl Clock for SimHost {
    fn now(&self) -> Instant {
        self.now
    }
}

/// One simulated node
#[derive(Debug)]
pub struct SimNode {
    pub spec: NodeSpec,
    pub engine: CopeEngine,
    pub host: SimHost,
    received: HashSet<Fingerprint>,
}

impl SimNode {
    /// Label everything logged until the returned pair drops
    fn context(&self) -> (NodeContextGuard, EnteredSpan) {
        let guard =
            NodeContextGuard::with_index(self.spec.id.to_string(), self.spec.id.index() as u64);
        let span = debug_span!("node", node = %self.spec.id).entered();
        (guard, span)
    }

    fn is_halted(&self) -> bool {
        self.engine.is_halted()
    }
}

#[derive(Debug, Clone)]
struct FlowState {
    flow: Flow,
    sent: u32,
    next_at_ms: u64,
}

/// The simulation state
#[derive(Debug)]
pub struct Simulation {
    pub topology: Topology,
    pub config: SimConfig,
    pub nodes: Vec<SimNode>,
    pub stats: SimStats,
    flows: Vec<FlowState>,
    injected_at: HashMap<Fingerprint, u64>,
    start: Instant,
    elapsed_ms: u64,
    sequence: u32,
    rng: StdRng,
}

impl Simulation {
    pub fn new(topology: Topology, config: SimConfig) -> Self {
        let start = Instant::now();
        let nodes = topology
            .nodes()
            .iter()
            .map(|spec| {
                let local = LocalInterface {
                    id: IFACE,
                    link: spec.id.link(),
                    channel: spec.channel,
                };
                SimNode {
                    spec: *spec,
                    engine: CopeEngine::with_seed(
                        config.engine.clone(),
                        vec![local],
                        config.seed ^ spec.id.index() as u64,
                    ),
                    host: SimHost::new(spec.id.net(), config.link_queue_depth.max(1), start),
                    received: HashSet::new(),
                }
            })
            .collect();

        Self {
            rng: StdRng::seed_from_u64(config.seed),
            topology,
            config,
            nodes,
            stats: SimStats::default(),
            flows: Vec::new(),
            injected_at: HashMap::new(),
            start,
            elapsed_ms: 0,
            sequence: 0,
        }
    }

    /// Schedule a flow; packets start at `start_delay_ms`
    pub fn add_flow(&mut self, source: NodeId, destination: NodeId) {
        self.flows.push(FlowState {
            flow: Flow {
                source,
                destination,
            },
            sent: 0,
            next_at_ms: self.config.start_delay_ms,
        });
    }

    /// Start every engine (arms hello and send timers)
    pub fn initialize(&mut self) {
        for node in &mut self.nodes {
            let _ctx = node.context();
            if let Err(e) = node.engine.start(&mut node.host) {
                error!(node = %node.spec.id, error = %e, "Engine failed to start");
            }
        }
        info!(
            nodes = self.nodes.len(),
            flows = self.flows.len(),
            "Simulation initialized"
        );
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Run until the configured duration has passed
    pub fn run(&mut self) {
        self.initialize();
        while self.elapsed_ms < self.config.duration_ms {
            self.step();
        }
        self.collect_engine_stats();
        info!(elapsed_ms = self.elapsed_ms, delivered = self.stats.delivered, "Simulation complete");
    }

    /// Advance one airtime slot
    pub fn step(&mut self) {
        self.elapsed_ms += self.config.airtime_ms.max(1);
        let now = self.start + Duration::from_millis(self.elapsed_ms);
        trace!(elapsed_ms = self.elapsed_ms, "Slot");

        self.fire_timers(now);
        self.inject_traffic();
        self.transmit();
    }

    fn fire_timers(&mut self, now: Instant) {
        for node in &mut self.nodes {
            node.host.now = now;
            if node.is_halted() {
                continue;
            }
            let _ctx = node.context();
            while let Some((handle, kind)) = node.host.timers.pop_due(now) {
                if let Err(e) = node.engine.on_timer(&mut node.host, kind, handle) {
                    warn!(node = %node.spec.id, error = %e, ?kind, "Timer handling failed");
                    if node.is_halted() {
                        break;
                    }
                }
            }
        }
    }

    fn inject_traffic(&mut self) {
        for i in 0..self.flows.len() {
            let state = &self.flows[i];
            if state.sent >= self.config.packets_per_flow || state.next_at_ms > self.elapsed_ms {
                continue;
            }
            let flow = state.flow;
            self.sequence += 1;
            let payload = SimPacket {
                source: flow.source.net(),
                destination: flow.destination.net(),
                sequence: self.sequence,
                body_len: self.config.payload_len,
            }
            .to_bytes();

            self.stats.injected += 1;
            self.injected_at.insert(Fingerprint::of(&payload), self.elapsed_ms);
            if !self.send_toward(flow.source, flow.destination, payload) {
                self.stats.enqueue_failures += 1;
            }

            let state = &mut self.flows[i];
            state.sent += 1;
            state.next_at_ms += self.config.flow_interval_ms;
        }
    }

    /// Enqueue `payload` at `at` for the next hop toward `destination`
    fn send_toward(&mut self, at: NodeId, destination: NodeId, payload: Bytes) -> bool {
        let Some(hop) = self.topology.next_hop(at, destination) else {
            warn!(%at, %destination, "No route");
            return false;
        };
        let Some(node) = self.nodes.get_mut(at.index()) else {
            return false;
        };
        if node.is_halted() {
            return false;
        }
        let _ctx = node.context();
        let packet = OutboundPacket {
            payload,
            src_link: at.link(),
            dest_link: hop.link(),
            src_net: at.net(),
            dest_net: hop.net(),
            iface: IFACE,
        };
        match node.engine.enqueue(&mut node.host, packet) {
            Ok(_) => true,
            Err(e) => {
                debug!(node = %at, error = %e, "Enqueue failed");
                false
            }
        }
    }

    fn transmit(&mut self) {
        let mut on_air: Vec<(NodeId, Bytes)> = Vec::new();
        for node in &mut self.nodes {
            if let Some((frame, _dest)) = node.host.pop_frame() {
                on_air.push((node.spec.id, frame));
            }
        }

        for (sender, frame) in on_air {
            self.account(&frame);
            let Some(channel) = self.topology.spec(sender).map(|s| s.channel) else {
                continue;
            };
            let hearers: Vec<NodeId> = self
                .topology
                .in_range(sender)
                .copied()
                .filter(|n| self.topology.spec(*n).is_some_and(|s| s.channel == channel))
                .collect();
            for receiver in hearers {
                if self.config.loss_probability > 0.0
                    && self.rng.random::<f64>() < self.config.loss_probability
                {
                    self.stats.frames_lost += 1;
                    continue;
                }
                self.receive(receiver, sender, frame.clone());
            }
        }
    }

    fn account(&mut self, frame: &Bytes) {
        match Frame::decode(frame.clone()) {
            Ok(Frame::Data { header, .. }) => {
                self.stats.transmissions += 1;
                self.stats.packets_carried += header.degree() as u64;
                if header.degree() > 1 {
                    self.stats.coded_transmissions += 1;
                }
            }
            Ok(Frame::Hello(_)) => self.stats.hello_transmissions += 1,
            Err(e) => warn!(error = %e, "Undecodable frame on air"),
        }
    }

    fn receive(&mut self, receiver: NodeId, sender: NodeId, frame: Bytes) {
        let Some(node) = self.nodes.get_mut(receiver.index()) else {
            return;
        };
        if node.is_halted() {
            return;
        }
        let outcome = {
            let _ctx = node.context();
            node.engine
                .on_receive(&mut node.host, IFACE, frame, sender.link())
        };
        let packet = match outcome {
            Ok(ReceiveOutcome::Delivered(packet)) => packet,
            Ok(_) => return,
            Err(e) => {
                error!(node = %receiver, error = %e, "Receive failed");
                return;
            }
        };

        let Some(destination) = SimPacket::destination_of(&packet.payload) else {
            return;
        };
        if destination == node.spec.id.net() {
            if node.received.insert(packet.fingerprint) {
                self.stats.delivered += 1;
                if let Some(sent_at) = self.injected_at.get(&packet.fingerprint) {
                    self.stats.total_latency_ms += self.elapsed_ms - sent_at;
                }
                trace!(node = %receiver, fingerprint = %packet.fingerprint, "Delivered end to end");
            } else {
                self.stats.duplicate_deliveries += 1;
            }
            return;
        }

        let Some(final_node) = node_for(destination) else {
            return;
        };
        if self.send_toward(receiver, final_node, packet.payload) {
            self.stats.forwarded += 1;
        }
    }

    fn collect_engine_stats(&mut self) {
        for node in &self.nodes {
            let s = node.engine.stats();
            self.stats.decode_failures += s.decode_failures;
            self.stats.retransmissions += s.retransmissions;
            self.stats.retry_drops += s.retry_drops;
            self.stats.link_errors += s.link_errors;
            if node.is_halted() {
                self.stats.halted_nodes += 1;
            }
        }
    }

    pub fn report(&self, scenario: &str) -> SimReport {
        SimReport {
            scenario: scenario.to_string(),
            elapsed_ms: self.elapsed_ms,
            stats: self.stats.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeReport {
                    node: n.spec.id,
                    halted: n.is_halted(),
                    engine: n.engine.stats().clone(),
                })
                .collect(),
        }
    }
}

/// Node owning a 10.0.0.x address
fn node_for(net: Ipv4Addr) -> Option<NodeId> {
    let last = net.octets()[3];
    last.checked_sub(1)
        .and_then(|i| NodeId::from_index(usize::from(i)))
        .filter(|id| id.net() == net)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyBuilder;

    fn make_config() -> SimConfig {
        SimConfig {
            duration_ms: 400,
            start_delay_ms: 10,
            packets_per_flow: 40,
            payload_len: 64,
            engine: CopeConfig::testing(),
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_sim_host_bounds_link_queue() {
        let mut host = SimHost::new(Ipv4Addr::new(10, 0, 0, 1), 2, Instant::now());
        let frame = Bytes::from_static(b"f");
        assert!(host.send(IFACE, frame.clone(), LinkAddr::BROADCAST).is_ok());
        assert!(host.is_sendable(IFACE));
        assert!(host.send(IFACE, frame.clone(), LinkAddr::BROADCAST).is_ok());
        assert!(!host.is_sendable(IFACE));
        assert_eq!(
            host.send(IFACE, frame, LinkAddr::BROADCAST),
            Err(LinkError::NotSendable(IFACE))
        );
        assert_eq!(host.pending_depth(IFACE), 2);
    }

    #[test]
    fn test_node_for_address() {
        assert_eq!(node_for(NodeId('C').net()), Some(NodeId('C')));
        assert_eq!(node_for(Ipv4Addr::new(10, 0, 0, 0)), None);
        assert_eq!(node_for(Ipv4Addr::new(192, 168, 0, 1)), None);
    }

    #[test]
    fn test_single_hop_delivery() {
        let mut topo = crate::topology::Topology::new(2, 1);
        topo.connect('A', 'B');
        topo.compute_routes();
        // No return traffic carries acks, so retransmissions compete with
        // new packets; pace the flow below link capacity
        let config = SimConfig {
            flow_interval_ms: 5,
            ..make_config()
        };
        let mut sim = Simulation::new(topo, config);
        sim.add_flow(NodeId('A'), NodeId('B'));
        sim.run();

        assert_eq!(sim.stats.injected, 40);
        assert_eq!(sim.stats.delivered, 40);
        assert_eq!(sim.stats.coded_transmissions, 0);
    }

    #[test]
    fn test_alice_bob_codes_at_relay() {
        let mut sim = Simulation::new(TopologyBuilder::new().alice_bob(), make_config());
        sim.add_flow(NodeId('A'), NodeId('C'));
        sim.add_flow(NodeId('C'), NodeId('A'));
        sim.run();

        assert_eq!(sim.stats.injected, 80);
        assert!(sim.stats.delivered > 0);
        assert!(sim.stats.coded_transmissions > 0);
        assert!(sim.stats.coding_gain() > 1.0);
        assert_eq!(sim.stats.halted_nodes, 0);
    }

    #[test]
    fn test_report_serializes() {
        let mut sim = Simulation::new(TopologyBuilder::new().alice_bob(), make_config());
        sim.add_flow(NodeId('A'), NodeId('C'));
        sim.run();
        let json = serde_json::to_string(&sim.report("alice-bob")).unwrap();
        assert!(json.contains("\"scenario\":\"alice-bob\""));
        assert!(json.contains("coded_transmissions"));
    }
}
