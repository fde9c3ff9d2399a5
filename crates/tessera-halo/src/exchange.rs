//! Boundary-buffer transport for collective halo exchange.
//!
//! [`HaloExchange`] is the seam between the engine and whatever carries
//! packed halo buffers between processes. [`ChannelMesh`] is the
//! in-process implementation: a full mesh of crossbeam channels, one per
//! ordered pair of partitions, used when partitions run as threads.
//!
//! Each buffer travels with the exchange round it belongs to. A receiver
//! discards buffers from earlier rounds (left over from an exchange that
//! failed part-way), so one failed step can never shift every later
//! step's halo by one round. A buffer from a later round means the
//! sender has moved past the awaited one; it is held back for the round
//! it belongs to.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tessera_core::{GridError, Pid};

/// Point-to-point transport for packed halo buffers.
///
/// `send` must not block on the receiver: every partition sends to all
/// neighbors before receiving from any of them.
pub trait HaloExchange: Send {
    /// Queue `buf` for partition `to` as part of exchange round `round`.
    fn send(&mut self, to: Pid, round: u64, buf: Vec<u8>) -> Result<(), GridError>;

    /// Block until partition `from`'s buffer for round `round` arrives.
    fn recv(&mut self, from: Pid, round: u64) -> Result<Vec<u8>, GridError>;
}

/// A buffer in flight, tagged with its exchange round.
struct Frame {
    round: u64,
    payload: Vec<u8>,
}

/// Factory for a fully connected in-process exchange mesh.
pub struct ChannelMesh;

impl ChannelMesh {
    /// Build endpoints for `count` partitions, indexed by pid.
    ///
    /// Channels are unbounded, so sends never block. Receives give up
    /// after `timeout`.
    pub fn build(count: usize, timeout: Duration) -> Vec<MeshEndpoint> {
        // links[from][to]
        let mut senders: Vec<Vec<Sender<Frame>>> = (0..count).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<Receiver<Frame>>> = (0..count).map(|_| Vec::new()).collect();
        for from in 0..count {
            for _to in 0..count {
                let (tx, rx) = crossbeam_channel::unbounded();
                senders[from].push(tx);
                // Collected in `from` order for every `to`; transposed below.
                receivers[from].push(rx);
            }
        }
        // receivers[from][to] -> inbound[to][from]
        let mut inbound: Vec<Vec<Option<Receiver<Frame>>>> =
            (0..count).map(|_| (0..count).map(|_| None).collect()).collect();
        for (from, row) in receivers.into_iter().enumerate() {
            for (to, rx) in row.into_iter().enumerate() {
                inbound[to][from] = Some(rx);
            }
        }
        senders
            .into_iter()
            .zip(inbound)
            .enumerate()
            .map(|(pid, (outbound, inbound))| MeshEndpoint {
                pid: Pid(pid as u32),
                outbound,
                inbound: inbound.into_iter().flatten().collect(),
                ahead: (0..count).map(|_| None).collect(),
                timeout,
            })
            .collect()
    }
}

/// One partition's view of a [`ChannelMesh`].
pub struct MeshEndpoint {
    pid: Pid,
    outbound: Vec<Sender<Frame>>,
    inbound: Vec<Receiver<Frame>>,
    /// Per sender: a buffer received early, for a round not yet awaited.
    ahead: Vec<Option<Frame>>,
    timeout: Duration,
}

impl MeshEndpoint {
    /// The partition this endpoint belongs to.
    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl HaloExchange for MeshEndpoint {
    fn send(&mut self, to: Pid, round: u64, buf: Vec<u8>) -> Result<(), GridError> {
        let tx = self
            .outbound
            .get(to.index())
            .ok_or_else(|| GridError::communication(to, "no mesh link to partition"))?;
        tx.send(Frame {
            round,
            payload: buf,
        })
        .map_err(|_| GridError::communication(to, "peer endpoint dropped"))
    }

    fn recv(&mut self, from: Pid, round: u64) -> Result<Vec<u8>, GridError> {
        let (Some(rx), Some(ahead)) = (
            self.inbound.get(from.index()),
            self.ahead.get_mut(from.index()),
        ) else {
            return Err(GridError::communication(from, "no mesh link from partition"));
        };

        // Buffers arrive in round order per sender, so a held-back buffer
        // is either this round's, a later one, or stale.
        if let Some(frame) = ahead.take() {
            if frame.round == round {
                return Ok(frame.payload);
            }
            if frame.round > round {
                let early = frame.round;
                *ahead = Some(frame);
                return Err(skipped_round(from, early, round));
            }
        }

        loop {
            match rx.recv_timeout(self.timeout) {
                Ok(frame) if frame.round == round => return Ok(frame.payload),
                Ok(frame) if frame.round < round => {
                    tracing::debug!(
                        pid = %self.pid,
                        from = %from,
                        stale_round = frame.round,
                        round,
                        "discarding stale halo buffer"
                    );
                }
                Ok(frame) => {
                    tracing::debug!(
                        pid = %self.pid,
                        from = %from,
                        early_round = frame.round,
                        round,
                        "holding back early halo buffer"
                    );
                    let early = frame.round;
                    *ahead = Some(frame);
                    return Err(skipped_round(from, early, round));
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(GridError::communication(
                        from,
                        format!("timed out after {:?} waiting for halo buffer", self.timeout),
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(GridError::communication(from, "peer endpoint dropped"));
                }
            }
        }
    }
}

fn skipped_round(from: Pid, early: u64, round: u64) -> GridError {
    GridError::communication(
        from,
        format!("received halo buffer for round {early} while waiting for {round}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(n: usize) -> Vec<MeshEndpoint> {
        ChannelMesh::build(n, Duration::from_millis(200))
    }

    #[test]
    fn endpoints_are_indexed_by_pid() {
        let eps = mesh(3);
        let pids: Vec<Pid> = eps.iter().map(|e| e.pid()).collect();
        assert_eq!(pids, vec![Pid(0), Pid(1), Pid(2)]);
    }

    #[test]
    fn buffers_route_between_pairs() {
        let mut eps = mesh(3);
        eps[0].send(Pid(2), 0, vec![1, 2]).unwrap();
        eps[1].send(Pid(2), 0, vec![3]).unwrap();
        assert_eq!(eps[2].recv(Pid(1), 0).unwrap(), vec![3]);
        assert_eq!(eps[2].recv(Pid(0), 0).unwrap(), vec![1, 2]);
    }

    #[test]
    fn stale_rounds_are_skipped() {
        let mut eps = mesh(2);
        eps[0].send(Pid(1), 4, vec![4]).unwrap();
        eps[0].send(Pid(1), 5, vec![5]).unwrap();
        assert_eq!(eps[1].recv(Pid(0), 5).unwrap(), vec![5]);
    }

    #[test]
    fn future_round_is_an_error() {
        let mut eps = mesh(2);
        eps[0].send(Pid(1), 9, vec![9]).unwrap();
        let err = eps[1].recv(Pid(0), 3).unwrap_err();
        assert!(matches!(err, GridError::Communication { pid: Some(Pid(0)), .. }));
    }

    #[test]
    fn early_buffer_is_delivered_in_its_own_round() {
        let mut eps = mesh(2);
        eps[0].send(Pid(1), 9, vec![9]).unwrap();
        eps[0].send(Pid(1), 10, vec![10]).unwrap();
        assert!(eps[1].recv(Pid(0), 3).is_err());
        // Still held back while an older round is awaited.
        assert!(eps[1].recv(Pid(0), 4).is_err());
        assert_eq!(eps[1].recv(Pid(0), 9).unwrap(), vec![9]);
        assert_eq!(eps[1].recv(Pid(0), 10).unwrap(), vec![10]);
    }

    #[test]
    fn held_back_buffer_goes_stale_when_its_round_is_skipped() {
        let mut eps = mesh(2);
        eps[0].send(Pid(1), 2, vec![2]).unwrap();
        assert!(eps[1].recv(Pid(0), 1).is_err());
        eps[0].send(Pid(1), 3, vec![3]).unwrap();
        assert_eq!(eps[1].recv(Pid(0), 3).unwrap(), vec![3]);
    }

    #[test]
    fn recv_times_out() {
        let mut eps = mesh(2);
        let err = eps[1].recv(Pid(0), 0).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn unknown_pid_is_a_communication_fault() {
        let mut eps = mesh(2);
        assert!(eps[0].send(Pid(7), 0, vec![]).is_err());
        assert!(eps[0].recv(Pid(7), 0).is_err());
    }

    #[test]
    fn dropped_peer_is_reported() {
        let mut eps = mesh(2);
        let mut survivor = eps.remove(1);
        drop(eps);
        let err = survivor.recv(Pid(0), 0).unwrap_err();
        assert!(err.to_string().contains("dropped"));
    }
}
