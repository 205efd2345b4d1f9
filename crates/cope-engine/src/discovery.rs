//! Hello-based neighbor discovery
//!
//! Every hello period (plus random jitter so neighbors do not synchronize)
//! the node queues one hello per local interface, each listing the
//! (network address, link address, channel) triple of every local
//! interface. Hellos jump the output queue and are never coded.

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::BytesMut;
use cope_core::{AddressTriple, HelloMessage, Host, TimerKind};
use rand::Rng;
use tracing::{debug, trace};

use crate::engine::CopeEngine;
use crate::error::{EngineError, QueueError};
use crate::queue::QueueEntry;

impl CopeEngine {
    /// The hello this node would advertise right now
    pub fn local_hello<H: Host>(&self, host: &H) -> HelloMessage {
        HelloMessage::new(
            self.interfaces
                .iter()
                .map(|i| {
                    let net = host
                        .local_network_address(i.id)
                        .unwrap_or(Ipv4Addr::UNSPECIFIED);
                    AddressTriple::new(net, i.link, i.channel)
                })
                .collect(),
        )
    }

    /// Queue a hello on every interface and try to send.
    ///
    /// Returns how many hellos were queued; an interface whose previous hello
    /// is still waiting gets no second one.
    pub fn send_hello<H: Host>(&mut self, host: &mut H) -> Result<usize, EngineError> {
        let hello = self.local_hello(host);
        let mut body = BytesMut::with_capacity(hello.encoded_len());
        hello.encode(&mut body)?;
        let body = body.freeze();
        let src_net = self.primary_network(host);

        let mut queued = 0;
        for local in self.interfaces.clone() {
            let entry = QueueEntry::hello(local.id, local.link, src_net, body.clone());
            match self.queue.push_front(entry) {
                Ok(_) => queued += 1,
                Err(QueueError::Duplicate(_)) => {
                    trace!(iface = %local.id, "Previous hello still queued");
                }
                Err(e) => {
                    debug!(iface = %local.id, error = %e, "Hello not queued");
                }
            }
        }
        debug!(queued, triples = hello.triples.len(), "Queued hellos");

        self.try_send(host)?;
        Ok(queued)
    }

    pub(crate) fn on_hello_timer<H: Host>(&mut self, host: &mut H) -> Result<(), EngineError> {
        self.send_hello(host)?;
        self.schedule_hello(host);
        Ok(())
    }

    pub(crate) fn schedule_hello<H: Host>(&mut self, host: &mut H) {
        let delay = self.next_hello_delay();
        if let Some(old) = self.hello_timer.take() {
            host.cancel(old);
        }
        self.hello_timer = Some(host.schedule_after(delay, TimerKind::Hello));
    }

    /// Hello period plus uniform jitter in `[0, hello_jitter]`
    pub(crate) fn next_hello_delay(&mut self) -> Duration {
        let jitter = self.rng.random_range(0..=self.config.hello_jitter_ms);
        self.config.hello_interval() + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use cope_core::{InterfaceId, LinkAddr};

    use crate::coding::LocalInterface;
    use crate::config::CopeConfig;

    use super::*;

    #[test]
    fn test_hello_delay_within_jitter() {
        let config = CopeConfig {
            hello_interval_ms: 100,
            hello_jitter_ms: 20,
            ..CopeConfig::testing()
        };
        let mut engine = CopeEngine::with_seed(
            config,
            vec![LocalInterface {
                id: InterfaceId(0),
                link: LinkAddr::from_index(1),
                channel: 1,
            }],
            7,
        );
        for _ in 0..50 {
            let delay = engine.next_hello_delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(120));
        }
    }
}
