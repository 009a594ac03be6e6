//! Message routing.
//!
//! This module handles:
//! - Sending application data (next hop from the table, default route up)
//! - Receiving unicasts: delivery, forwarding, topology report merging
//! - Delivery status: ETX bookkeeping and failure-driven cleanup
//! - Parent re-selection after the parent is lost
//!
//! Downward routes exist only for nodes in our subtree; anything else goes
//! to the parent.

use log::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::metric::{update_etx, Metric};
use crate::node::Node;
use crate::table::Freshness;
use crate::time::Timestamp;
use crate::timers::TimerKind;
use crate::traits::{Clock, IncomingData, Random, Transport};
use crate::types::{DeliveryStatus, EntryKind, Error, Event, LinkAddr, HOPS_UNKNOWN};
use crate::wire::{encode_unicast, PacketType, Unicast, UnicastHeader};

impl<T, R, Clk, Cfg> Node<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Send application data to `destination`.
    ///
    /// Routes down if `destination` is in our subtree, otherwise up through
    /// the parent.
    pub fn send(&mut self, destination: LinkAddr, payload: &[u8]) -> Result<(), Error> {
        if destination == self.addr() {
            self.push_incoming_data(IncomingData {
                source: destination,
                hops: 0,
                payload: payload.to_vec(),
            });
            return Ok(());
        }
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }
        let next_hop = self.table().lookup(&destination, self.parent());
        if next_hop.is_null() {
            return Err(Error::NoRoute);
        }

        let header = UnicastHeader {
            packet_type: PacketType::Data,
            source: self.addr(),
            destination,
            hop_count: 0,
        };
        let frame = encode_unicast(&header, payload);
        if frame.len() > self.transport().mtu() {
            return Err(Error::MessageTooLarge);
        }
        self.unicast(next_hop, frame)?;
        self.metrics_mut().data_sent += 1;
        trace!("data to {} via {}", destination, next_hop);
        Ok(())
    }

    /// Handle a received unicast frame.
    pub(crate) fn handle_unicast(&mut self, from: LinkAddr, data: &[u8], now: Timestamp) {
        let unicast = match Unicast::parse(data) {
            Ok(u) => u,
            Err(e) => {
                warn!("malformed unicast from {}: {}", from, e);
                self.metrics_mut().malformed += 1;
                return;
            }
        };
        self.table_mut().refresh(&from, now);

        match unicast {
            Unicast::Data {
                mut header,
                payload,
            } => {
                header.hop_count = header.hop_count.saturating_add(1);
                if header.hop_count > Cfg::MAX_PATH_LENGTH {
                    warn!(
                        "dropping data {} -> {}: {} hops",
                        header.source, header.destination, header.hop_count
                    );
                    self.metrics_mut().data_dropped += 1;
                    return;
                }
                if header.destination == self.addr() {
                    self.metrics_mut().data_delivered += 1;
                    debug!(
                        "delivered data from {} ({} hops)",
                        header.source, header.hop_count
                    );
                    self.push_incoming_data(IncomingData {
                        source: header.source,
                        hops: header.hop_count,
                        payload,
                    });
                } else {
                    self.forward(&header, &payload);
                }
            }
            Unicast::Report { report, .. } => {
                self.metrics_mut().reports_received += 1;
                if !self.merge_report(from, &report.deltas, now) {
                    return;
                }
                debug!("report from {}: {} deltas", from, report.deltas.len());
                if !self.is_sink() {
                    let delay = Cfg::report_relay_delay(self.random_mut());
                    self.timers_mut().set(TimerKind::Report, now + delay);
                }
            }
        }
    }

    /// Relay a data packet one hop further with its header unchanged.
    pub(crate) fn forward(&mut self, header: &UnicastHeader, payload: &[u8]) {
        let next_hop = self.table().lookup(&header.destination, self.parent());
        if next_hop.is_null() {
            warn!("no route to {}, dropping", header.destination);
            self.metrics_mut().data_dropped += 1;
            return;
        }
        let frame = encode_unicast(header, payload);
        match self.unicast(next_hop, frame) {
            Ok(()) => {
                self.metrics_mut().data_forwarded += 1;
                trace!("forwarded data for {} via {}", header.destination, next_hop);
            }
            Err(e) => {
                warn!("forward to {} failed: {}", next_hop, e);
                self.metrics_mut().data_dropped += 1;
            }
        }
    }

    /// Account the MAC outcome of the oldest unicast still in flight.
    ///
    /// A failure forces the next hop's entry invalid and sweeps the table at
    /// once, which re-parents (lost parent) or drops a subtree (lost child).
    pub(crate) fn handle_delivery_status(
        &mut self,
        status: DeliveryStatus,
        transmissions: u8,
        now: Timestamp,
    ) {
        let target = self.take_unicast_target();
        let acked = status == DeliveryStatus::Ok;
        if acked {
            self.metrics_mut().unicast_acked += 1;
        } else {
            self.metrics_mut().unicast_failed += 1;
        }

        let Some(target) = target else {
            trace!("delivery status with no unicast in flight");
            return;
        };
        let Some(entry) = self.table_mut().get_mut(&target) else {
            trace!("delivery status for unknown {}", target);
            return;
        };
        entry.record_transmission(transmissions, acked);
        entry.etx = update_etx::<Cfg>(entry.tx_count, entry.ack_count, entry.etx, entry.last_rssi);

        if acked {
            entry.freshness = Freshness::At(now);
        } else {
            debug!("no ack from {} after {} transmissions", target, transmissions);
            entry.freshness = Freshness::AlwaysInvalid;
            self.run_cleanup(now);
        }
    }

    /// Pick a new parent among the neighbors, or disconnect.
    ///
    /// The caller has already dropped the old parent: it was swept out of the
    /// table or turned into a Child, so it cannot be picked again.
    pub(crate) fn change_parent(&mut self, now: Timestamp) {
        if self.is_sink() {
            return;
        }

        let Some((candidate, metric)) = self.table().best_candidate() else {
            self.set_parent(LinkAddr::NULL);
            self.set_position(Metric::INFINITE, HOPS_UNKNOWN);
            info!("node {} disconnected", self.addr());
            self.push_event(Event::Disconnected);
            return;
        };

        let mut hops = HOPS_UNKNOWN;
        if let Some(entry) = self.table_mut().get_mut(&candidate) {
            entry.kind = EntryKind::Parent;
            entry.next_hop = candidate;
            hops = entry.hop_count.saturating_add(1);
        }
        let metric = Metric::encode(metric);
        self.set_parent(candidate);
        self.set_position(metric, hops);
        info!(
            "node {} re-parented to {} metric {} hops {}",
            self.addr(),
            candidate,
            metric.decode(),
            hops
        );
        self.push_event(Event::ParentChanged {
            parent: candidate,
            metric,
            hops,
        });

        self.resync_topology();
        self.report_timer(now);
    }
}
