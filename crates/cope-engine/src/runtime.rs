//! Tokio driver for a single engine
//!
//! [`spawn_node`] moves a [`CopeEngine`] into its own task together with a
//! link and an address resolver. The task owns a [`TimerQueue`] and sleeps
//! until the next deadline or the next [`NodeCommand`], whichever comes
//! first, so engine calls never overlap. Packets the engine delivers are
//! forwarded on the `deliveries` channel.
//!
//! The task ends on [`NodeCommand::Shutdown`], when every [`NodeHandle`] is
//! dropped, or on a fatal engine error, which is returned from the join
//! handle.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cope_core::{
    AddressResolution, Clock, Fingerprint, InterfaceId, Link, LinkAddr, LinkError, TimerHandle,
    TimerKind, TimerQueue, Timers,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{CopeEngine, DeliveredPacket, EngineStats, ReceiveOutcome};
use crate::error::EngineError;
use crate::queue::OutboundPacket;

const COMMAND_BUFFER: usize = 256;

/// Requests accepted by a running node
#[derive(Debug)]
pub enum NodeCommand {
    /// Queue a network-layer packet
    Send {
        packet: OutboundPacket,
        reply: oneshot::Sender<Result<Fingerprint, EngineError>>,
    },
    /// A frame came in on a local interface
    Receive {
        iface: InterfaceId,
        frame: Bytes,
        sender: LinkAddr,
    },
    Stats(oneshot::Sender<EngineStats>),
    Shutdown,
}

/// Cloneable handle to a spawned node
#[derive(Debug, Clone)]
pub struct NodeHandle {
    tx: mpsc::Sender<NodeCommand>,
}

impl NodeHandle {
    pub async fn send(&self, packet: OutboundPacket) -> Result<Fingerprint, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command(NodeCommand::Send { packet, reply }).await?;
        rx.await.map_err(|_| EngineError::Halted)?
    }

    pub async fn deliver_frame(
        &self,
        iface: InterfaceId,
        frame: Bytes,
        sender: LinkAddr,
    ) -> Result<(), EngineError> {
        self.command(NodeCommand::Receive {
            iface,
            frame,
            sender,
        })
        .await
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.command(NodeCommand::Stats(reply)).await?;
        rx.await.map_err(|_| EngineError::Halted)
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.command(NodeCommand::Shutdown).await
    }

    async fn command(&self, command: NodeCommand) -> Result<(), EngineError> {
        self.tx.send(command).await.map_err(|_| EngineError::Halted)
    }
}

/// [`cope_core::Host`] backed by a real link and tokio time
#[derive(Debug)]
pub struct RuntimeHost<L, R> {
    link: L,
    resolver: R,
    timers: TimerQueue,
}

impl<L, R> RuntimeHost<L, R> {
    pub fn new(link: L, resolver: R) -> Self {
        Self {
            link,
            resolver,
            timers: TimerQueue::new(),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn pop_due(&mut self) -> Option<(TimerHandle, TimerKind)> {
        let now = tokio::time::Instant::now().into_std();
        self.timers.pop_due(now)
    }
}

impl<L: Link, R> Link for RuntimeHost<L, R> {
    fn send(&mut self, iface: InterfaceId, frame: Bytes, dest: LinkAddr) -> Result<(), LinkError> {
        self.link.send(iface, frame, dest)
    }

    fn is_sendable(&self, iface: InterfaceId) -> bool {
        self.link.is_sendable(iface)
    }

    fn pending_depth(&self, iface: InterfaceId) -> usize {
        self.link.pending_depth(iface)
    }
}

impl<L, R: AddressResolution> AddressResolution for RuntimeHost<L, R> {
    fn local_network_address(&self, iface: InterfaceId) -> Option<Ipv4Addr> {
        self.resolver.local_network_address(iface)
    }
}

impl<L, R> Timers for RuntimeHost<L, R> {
    fn schedule_after(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        let now = tokio::time::Instant::now().into_std();
        self.timers.schedule_after(now, delay, kind)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.timers.cancel(handle);
    }
}

impl<L, R> Clock for RuntimeHost<L, R> {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Spawn `engine` on the current runtime
pub fn spawn_node<L, R>(
    engine: CopeEngine,
    link: L,
    resolver: R,
    deliveries: mpsc::Sender<DeliveredPacket>,
) -> (NodeHandle, JoinHandle<Result<EngineStats, EngineError>>)
where
    L: Link + Send + 'static,
    R: AddressResolution + Send + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let host = RuntimeHost::new(link, resolver);
    let task = tokio::spawn(run_node(engine, host, rx, deliveries));
    (NodeHandle { tx }, task)
}

async fn run_node<L: Link, R: AddressResolution>(
    mut engine: CopeEngine,
    mut host: RuntimeHost<L, R>,
    mut rx: mpsc::Receiver<NodeCommand>,
    deliveries: mpsc::Sender<DeliveredPacket>,
) -> Result<EngineStats, EngineError> {
    engine.start(&mut host)?;
    info!(interfaces = engine.interfaces().len(), "Node started");

    loop {
        let deadline = host.next_deadline();
        let sleep = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else {
                    debug!("All node handles dropped");
                    break;
                };
                match command {
                    NodeCommand::Send { packet, reply } => {
                        match engine.enqueue(&mut host, packet) {
                            Err(e) if e.is_fatal() => {
                                let _ = reply.send(Err(EngineError::Halted));
                                return Err(e);
                            }
                            result => {
                                let _ = reply.send(result);
                            }
                        }
                    }
                    NodeCommand::Receive { iface, frame, sender } => {
                        match engine.on_receive(&mut host, iface, frame, sender) {
                            Ok(ReceiveOutcome::Delivered(packet)) => {
                                if deliveries.send(packet).await.is_err() {
                                    warn!("Delivery receiver dropped");
                                }
                            }
                            Ok(_) => {}
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => warn!(error = %e, "Receive failed"),
                        }
                    }
                    NodeCommand::Stats(reply) => {
                        let _ = reply.send(engine.stats().clone());
                    }
                    NodeCommand::Shutdown => break,
                }
            }
            _ = sleep => {
                while let Some((handle, kind)) = host.pop_due() {
                    match engine.on_timer(&mut host, kind, handle) {
                        Ok(()) => {}
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => warn!(error = %e, ?kind, "Timer handling failed"),
                    }
                }
            }
        }
    }

    info!(stats = ?engine.stats(), "Node stopped");
    Ok(engine.stats().clone())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::coding::LocalInterface;
    use crate::config::CopeConfig;

    /// Puts every frame on an unbounded channel tagged with the transmitter
    struct ChannelLink {
        me: LinkAddr,
        air: mpsc::UnboundedSender<(LinkAddr, Bytes)>,
    }

    impl Link for ChannelLink {
        fn send(&mut self, _: InterfaceId, frame: Bytes, _: LinkAddr) -> Result<(), LinkError> {
            self.air
                .send((self.me, frame))
                .map_err(|e| LinkError::SendFailed(e.to_string()))
        }

        fn is_sendable(&self, _: InterfaceId) -> bool {
            true
        }

        fn pending_depth(&self, _: InterfaceId) -> usize {
            0
        }
    }

    struct StaticAddresses(HashMap<InterfaceId, Ipv4Addr>);

    impl AddressResolution for StaticAddresses {
        fn local_network_address(&self, iface: InterfaceId) -> Option<Ipv4Addr> {
            self.0.get(&iface).copied()
        }
    }

    fn node(
        index: u32,
        air: mpsc::UnboundedSender<(LinkAddr, Bytes)>,
        deliveries: mpsc::Sender<DeliveredPacket>,
    ) -> (NodeHandle, JoinHandle<Result<EngineStats, EngineError>>) {
        let link = LinkAddr::from_index(index);
        let iface = LocalInterface {
            id: InterfaceId(0),
            link,
            channel: 1,
        };
        let engine = CopeEngine::with_seed(CopeConfig::testing(), vec![iface], u64::from(index));
        let resolver = StaticAddresses(HashMap::from([(
            InterfaceId(0),
            Ipv4Addr::new(10, 0, 0, index as u8),
        )]));
        spawn_node(engine, ChannelLink { me: link, air }, resolver, deliveries)
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_nodes_exchange_packet() {
        let (air_tx, mut air_rx) = mpsc::unbounded_channel();
        let (a_out, _a_in) = mpsc::channel(16);
        let (b_out, mut b_in) = mpsc::channel(16);
        let (alice, alice_task) = node(1, air_tx.clone(), a_out);
        let (bob, bob_task) = node(2, air_tx, b_out);

        // Shared medium: every frame reaches the other node
        let (a, b) = (alice.clone(), bob.clone());
        let medium = tokio::spawn(async move {
            while let Some((from, frame)) = air_rx.recv().await {
                let to = if from == LinkAddr::from_index(1) { &b } else { &a };
                if to.deliver_frame(InterfaceId(0), frame, from).await.is_err() {
                    break;
                }
            }
        });

        let payload = Bytes::from_static(b"hello bob");
        let fingerprint = alice
            .send(OutboundPacket {
                payload: payload.clone(),
                src_link: LinkAddr::from_index(1),
                dest_link: LinkAddr::from_index(2),
                src_net: Ipv4Addr::new(10, 0, 0, 1),
                dest_net: Ipv4Addr::new(10, 0, 0, 2),
                iface: InterfaceId(0),
            })
            .await
            .unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(5), b_in.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.fingerprint, fingerprint);
        assert_eq!(delivered.payload, payload);
        assert_eq!(delivered.from, LinkAddr::from_index(1));
        assert!(!delivered.decoded);

        let stats = bob.stats().await.unwrap();
        assert_eq!(stats.delivered, 1);

        alice.shutdown().await.unwrap();
        bob.shutdown().await.unwrap();
        assert!(alice_task.await.unwrap().is_ok());
        assert!(bob_task.await.unwrap().is_ok());
        medium.abort();
    }

    #[tokio::test]
    async fn test_handle_reports_halted_after_exit() {
        let (air_tx, _air_rx) = mpsc::unbounded_channel();
        let (out, _in) = mpsc::channel(1);
        let (handle, task) = node(3, air_tx, out);
        tokio_test::assert_ok!(handle.shutdown().await);
        tokio_test::assert_ok!(task.await.unwrap());

        let err = tokio_test::assert_err!(handle.stats().await);
        assert!(matches!(err, EngineError::Halted));
    }
}
