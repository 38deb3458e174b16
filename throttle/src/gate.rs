use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::instrument;

use crate::rate::Rate;

// stands in for "never" when a period is too long to be added to the current instant
const FAR_FUTURE: std::time::Duration = std::time::Duration::from_secs(86400 * 365 * 30);

/// Authorizes the production of one batch of items.
#[derive(Debug)]
pub struct Permit;

/// The gate stopped running and can no longer accept rate changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate gate is no longer running")]
pub struct GateClosed;

#[derive(Debug)]
struct RateUpdate {
    rate: Rate,
    applied: oneshot::Sender<()>,
}

/// Sending side of the rate-update channel.
///
/// Cloning is cheap; concurrent callers are serialized by the gate, the last one applied wins.
#[derive(Debug, Clone)]
pub struct RateHandle {
    updates: mpsc::Sender<RateUpdate>,
}

impl RateHandle {
    /// Hands a new rate over to the gate and waits until the gate has applied it.
    pub async fn set_rate(&self, rate: Rate) -> Result<(), GateClosed> {
        let (applied, ack) = oneshot::channel();
        self.updates
            .send(RateUpdate { rate, applied })
            .await
            .map_err(|_| GateClosed)?;
        ack.await.map_err(|_| GateClosed)
    }
}

/// Receiving side of the permit channel.
#[derive(Debug)]
pub struct Permits {
    receiver: mpsc::Receiver<Permit>,
}

impl Permits {
    /// Waits for the next permit. Returns `None` once the gate has stopped.
    pub async fn acquire(&mut self) -> Option<Permit> {
        self.receiver.recv().await
    }
}

#[derive(Debug)]
enum State {
    Active { deadline: Instant },
    Paused,
}

impl State {
    fn arm(rate: Rate) -> Self {
        match rate.period() {
            Some(period) => {
                let now = Instant::now();
                let deadline = now.checked_add(period).unwrap_or_else(|| now + FAR_FUTURE);
                State::Active { deadline }
            }
            None => State::Paused,
        }
    }

    async fn expired(&self) {
        match self {
            State::Active { deadline } => tokio::time::sleep_until(*deadline).await,
            State::Paused => std::future::pending().await,
        }
    }
}

/// Timer-driven scheduler issuing one [`Permit`] per period of the current [`Rate`].
///
/// The rate lives only inside the gate. Everything else talks to it through a [`RateHandle`]
/// and receives its output through [`Permits`].
#[derive(Debug)]
pub struct RateGate {
    rate: Rate,
    permits: mpsc::Sender<Permit>,
    updates: mpsc::Receiver<RateUpdate>,
}

/// Creates a gate starting at `initial` together with its rate handle and permit receiver.
///
/// Both channels hold at most one message: a pending rate change or a permit not yet taken.
pub fn channel(initial: Rate) -> (RateGate, RateHandle, Permits) {
    let (permit_sender, permit_receiver) = mpsc::channel(1);
    let (update_sender, update_receiver) = mpsc::channel(1);
    let gate = RateGate {
        rate: initial,
        permits: permit_sender,
        updates: update_receiver,
    };
    (
        gate,
        RateHandle {
            updates: update_sender,
        },
        Permits {
            receiver: permit_receiver,
        },
    )
}

impl RateGate {
    pub fn rate(&self) -> Rate {
        self.rate
    }

    /// Runs the scheduling loop.
    ///
    /// Each cycle waits for whichever comes first: cancellation, a rate change or the timer.
    /// A rate change re-arms the timer with the new period, a paused gate has no timer at all.
    /// The first permit is due one period after this call, not after construction.
    /// Returns when cancelled or when nobody is left to take permits; losing every
    /// [`RateHandle`] just freezes the current rate.
    #[instrument(skip_all)]
    pub async fn run(mut self, cancel: tokio_util::sync::CancellationToken) {
        tracing::debug!("rate gate starting at {}", self.rate);
        let mut state = State::arm(self.rate);
        let mut updates_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("rate gate cancelled");
                    return;
                }
                update = self.updates.recv(), if updates_open => match update {
                    Some(update) => self.apply(update, &mut state),
                    None => {
                        tracing::debug!("all rate handles dropped, staying at {}", self.rate);
                        updates_open = false;
                    }
                },
                _ = state.expired() => {
                    let delivered = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::debug!("rate gate cancelled while issuing a permit");
                            return;
                        }
                        delivered = self.issue() => delivered,
                    };
                    if !delivered {
                        tracing::debug!("permit receiver gone, stopping rate gate");
                        return;
                    }
                    state = State::arm(self.rate);
                }
            }
        }
    }

    fn apply(&mut self, update: RateUpdate, state: &mut State) {
        let RateUpdate { rate, applied } = update;
        if rate == self.rate {
            // keep the pending deadline
            tracing::debug!("rate unchanged at {}", rate);
        } else {
            tracing::info!("rate changed: {} -> {}", self.rate, rate);
            self.rate = rate;
            *state = State::arm(rate);
            tracing::trace!("rearmed: {:?}", state);
        }
        // the requester may have stopped waiting for the ack
        let _ = applied.send(());
    }

    /// Hands out one permit and waits until it has been taken.
    async fn issue(&self) -> bool {
        tracing::trace!("issuing permit");
        if self.permits.send(Permit).await.is_err() {
            return false;
        }
        // the channel slot frees up only once the source received the permit
        self.permits.reserve().await.is_ok()
    }
}
