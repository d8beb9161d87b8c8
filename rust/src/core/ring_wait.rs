use std::sync::Arc;
use std::time::Duration;

use flume::Sender;
use tokio::sync::oneshot;

use crate::transport::{RealtimeTransport, TransportEvent};
use crate::updates::{CoreMsg, InternalEvent, TransportSource};

/// Bounded wait for the callee to join an outgoing call.
///
/// Resolves exactly once per attempt, with one of:
/// - `RingWaitElapsed` when the bound passes,
/// - a synthetic `RemoteJoined` when presence polling sees a participant,
/// - nothing, when cancelled (hangup, cancel, real `RemoteJoined`).
///
/// Polling exists because the join event can fire before the subscription is live.
#[derive(Debug)]
pub(super) struct RingWait {
    attempt: u64,
    cancel: Option<oneshot::Sender<()>>,
}

impl RingWait {
    pub(super) fn start(
        runtime: &tokio::runtime::Handle,
        attempt: u64,
        timeout: Duration,
        poll_interval: Duration,
        transport: Arc<dyn RealtimeTransport>,
        tx: Sender<CoreMsg>,
    ) -> Self {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        runtime.spawn(async move {
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            let mut poll = tokio::time::interval(poll_interval);
            poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    // Either an explicit cancel or the handle was dropped.
                    _ = &mut cancel_rx => return,
                    _ = &mut deadline => {
                        tracing::info!(attempt, "ring wait: elapsed without a join");
                        let _ = tx.send(CoreMsg::Internal(Box::new(
                            InternalEvent::RingWaitElapsed { attempt },
                        )));
                        return;
                    }
                    _ = poll.tick() => {
                        if transport.has_remote_participants() {
                            tracing::debug!(attempt, "ring wait: presence poll saw a participant");
                            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::Transport {
                                source: TransportSource::Subscription(attempt),
                                event: TransportEvent::RemoteJoined,
                            })));
                            return;
                        }
                    }
                }
            }
        });
        Self {
            attempt,
            cancel: Some(cancel_tx),
        }
    }

    pub(super) fn attempt(&self) -> u64 {
        self.attempt
    }

    pub(super) fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}
