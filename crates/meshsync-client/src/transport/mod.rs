//! Reconnecting push transport.
//!
//! [`spawn`] runs one driver task that owns at most one live channel. The
//! task feeds channel activity, reconnect timers, and close requests into a
//! [`ConnectionMachine`] and carries out the actions it returns. Decoded
//! frames and connectivity changes come out of [`TransportHandle::recv`].

pub mod machine;
pub mod ws;

use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::warn;

use crate::error::TransportError;

pub use machine::{Action, ConnectionMachine, ConnectionState, ReconnectToken, TransportEvent};
pub use ws::{WsChannel, WsConnector};

/// An open realtime channel delivering text frames.
pub trait FrameChannel: Send {
    /// Next text frame. `None` means the peer closed the channel.
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens channels.
pub trait Connector: Send + Sync + 'static {
    type Channel: FrameChannel + 'static;

    fn dial(&self) -> impl Future<Output = Result<Self::Channel, TransportError>> + Send;
}

enum Control {
    Close,
}

/// Caller side of a running transport.
pub struct TransportHandle {
    control: mpsc::UnboundedSender<Control>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    task: JoinHandle<()>,
}

impl TransportHandle {
    /// Next transport event. `None` once the transport has been closed and
    /// every buffered event has been read.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Requests shutdown. Idempotent.
    pub fn close(&self) {
        let _ = self.control.send(Control::Close);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Starts the driver task and immediately begins connecting.
pub fn spawn<C: Connector>(connector: C, reconnect_delay: Duration) -> TransportHandle {
    let (control, control_rx) = mpsc::unbounded_channel();
    let (events_tx, events) = mpsc::unbounded_channel();
    let machine = ConnectionMachine::new(reconnect_delay);
    let task = tokio::spawn(drive(connector, machine, control_rx, events_tx));
    TransportHandle {
        control,
        events,
        task,
    }
}

type Timer = Option<(ReconnectToken, Pin<Box<Sleep>>)>;

async fn drive<C: Connector>(
    connector: C,
    mut machine: ConnectionMachine,
    mut control: mpsc::UnboundedReceiver<Control>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut channel: Option<C::Channel> = None;
    let mut timer: Timer = None;
    let mut queue: VecDeque<Action> = machine.connect().into();

    loop {
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Dial => {
                    tokio::select! {
                        dialed = connector.dial() => match dialed {
                            Ok(opened) => {
                                channel = Some(opened);
                                queue.extend(machine.opened());
                            }
                            Err(e) => {
                                warn!(error = %e, "realtime connect failed");
                                queue.extend(machine.dial_failed());
                            }
                        },
                        _ = control.recv() => queue.extend(machine.close()),
                    }
                }
                Action::Hangup => {
                    if let Some(mut open) = channel.take() {
                        open.close().await;
                    }
                }
                Action::Schedule { token, delay } => timer = Some((token, Box::pin(sleep(delay)))),
                Action::CancelTimer => timer = None,
                Action::Emit(event) => {
                    // The handle may already be gone; keep draining actions.
                    let _ = events.send(event);
                }
            }
        }

        if machine.state() == ConnectionState::Closed {
            break;
        }

        tokio::select! {
            _ = control.recv() => queue.extend(machine.close()),
            frame = next_frame(&mut channel) => match frame {
                Some(Ok(text)) => queue.extend(machine.frame(&text)),
                Some(Err(e)) => {
                    warn!(error = %e, "realtime channel failed");
                    channel = None;
                    queue.extend(machine.lost());
                }
                None => {
                    channel = None;
                    queue.extend(machine.lost());
                }
            },
            token = timer_elapsed(&mut timer) => {
                timer = None;
                queue.extend(machine.timer_fired(token));
            }
        }
    }
}

async fn next_frame<Ch: FrameChannel>(
    channel: &mut Option<Ch>,
) -> Option<Result<String, TransportError>> {
    match channel {
        Some(open) => open.next_frame().await,
        None => pending().await,
    }
}

async fn timer_elapsed(timer: &mut Timer) -> ReconnectToken {
    match timer {
        Some((token, sleeping)) => {
            sleeping.as_mut().await;
            *token
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use meshsync_core::InboundFrame;

    /// Each successful dial hands the test the sending half of the new channel.
    struct FakeConnector {
        dials: Arc<AtomicUsize>,
        failures_left: Arc<AtomicUsize>,
        peers: mpsc::UnboundedSender<mpsc::UnboundedSender<String>>,
    }

    struct FakeChannel {
        frames: mpsc::UnboundedReceiver<String>,
    }

    impl FrameChannel for FakeChannel {
        async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
            self.frames.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.frames.close();
        }
    }

    impl Connector for FakeConnector {
        type Channel = FakeChannel;

        async fn dial(&self) -> Result<FakeChannel, TransportError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(TransportError::Connect("refused".into()));
            }
            let (tx, frames) = mpsc::unbounded_channel();
            let _ = self.peers.send(tx);
            Ok(FakeChannel { frames })
        }
    }

    struct Harness {
        handle: TransportHandle,
        dials: Arc<AtomicUsize>,
        peers: mpsc::UnboundedReceiver<mpsc::UnboundedSender<String>>,
    }

    fn start(failures: usize) -> Harness {
        let dials = Arc::new(AtomicUsize::new(0));
        let (peers_tx, peers) = mpsc::unbounded_channel();
        let connector = FakeConnector {
            dials: dials.clone(),
            failures_left: Arc::new(AtomicUsize::new(failures)),
            peers: peers_tx,
        };
        Harness {
            handle: spawn(connector, Duration::from_secs(3)),
            dials,
            peers,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loss_reconnects_once_after_delay() {
        let mut h = start(0);
        assert_eq!(h.handle.recv().await, Some(TransportEvent::Connected));
        let peer = h.peers.recv().await.unwrap();

        drop(peer);
        assert_eq!(h.handle.recv().await, Some(TransportEvent::Disconnected));
        assert_eq!(h.dials.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(2_999)).await;
        assert_eq!(h.dials.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(2)).await;
        assert_eq!(h.handle.recv().await, Some(TransportEvent::Connected));
        assert_eq!(h.dials.load(Ordering::SeqCst), 2);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_delay_prevents_reconnect() {
        let mut h = start(0);
        assert_eq!(h.handle.recv().await, Some(TransportEvent::Connected));
        drop(h.peers.recv().await.unwrap());
        assert_eq!(h.handle.recv().await, Some(TransportEvent::Disconnected));

        sleep(Duration::from_secs(1)).await;
        h.handle.close();
        h.handle.close();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.dials.load(Ordering::SeqCst), 1);
        assert_eq!(h.handle.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_dials_keep_retrying() {
        let mut h = start(2);
        assert_eq!(h.handle.recv().await, Some(TransportEvent::Connected));
        assert_eq!(h.dials.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_do_not_drop_the_channel() {
        let mut h = start(0);
        assert_eq!(h.handle.recv().await, Some(TransportEvent::Connected));
        let peer = h.peers.recv().await.unwrap();

        peer.send("not json".into()).unwrap();
        peer.send(r#"{"type":"unknown_kind","data":1}"#.into()).unwrap();
        peer.send(r#"{"type":"topology_update","data":{"A":["B"]}}"#.into())
            .unwrap();

        match h.handle.recv().await {
            Some(TransportEvent::Frame(InboundFrame::AdjacencyReplace(adj))) => {
                assert_eq!(adj.edge_count(), 1)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_while_open_reports_disconnect_and_stops() {
        let mut h = start(0);
        assert_eq!(h.handle.recv().await, Some(TransportEvent::Connected));
        let _peer = h.peers.recv().await.unwrap();

        h.handle.close();
        assert_eq!(h.handle.recv().await, Some(TransportEvent::Disconnected));
        assert_eq!(h.handle.recv().await, None);
    }
}
