//! Timer-driven admission control for line pipelines
//!
//! This crate provides the rate gate used by `ratelim`: a single task that hands out
//! admission permits at a configurable rate, and whose rate can be changed while it runs.
//!
//! # Overview
//!
//! The gate is built from three pieces returned by [`channel`]:
//!
//! 1. **[`RateGate`]** - the scheduler itself, driven by [`RateGate::run`]
//! 2. **[`Permits`]** - receiving end for permits, one permit per gate firing
//! 3. **[`RateHandle`]** - cloneable sender for rate changes
//!
//! The current [`Rate`] is owned by the gate task alone. Nothing else can read or write it, so
//! there are no locks: a rate change is a message, and the gate waits on "timer expired" and
//! "rate changed" in the same `select!`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use throttle::Rate;
//!
//! # async fn example() -> Result<(), throttle::GateClosed> {
//! let (gate, handle, mut permits) = throttle::channel(Rate::new(5.0).unwrap());
//! let cancel = tokio_util::sync::CancellationToken::new();
//! tokio::spawn(gate.run(cancel.clone()));
//!
//! // one permit every 200ms
//! while permits.acquire().await.is_some() {
//!     // produce a batch here
//! #   break;
//! }
//!
//! // pause, then resume at 10/s
//! handle.set_rate(Rate::PAUSED).await?;
//! handle.set_rate(Rate::new(10.0).unwrap()).await?;
//! cancel.cancel();
//! # Ok(())
//! # }
//! ```
//!
//! # Period Calculation
//!
//! For a rate `r > 0` the gate waits
//!
//! ```text
//! period = ⌈1000 / r⌉ ms
//! ```
//!
//! between permits. A rate of `0` pauses the gate: no timer is armed and no permits are issued
//! until a non-zero rate arrives.
//!
//! # Backpressure
//!
//! Permits are never buffered beyond the one being handed over. After a firing the gate waits
//! until the permit has been taken before arming the next timer, so a slow consumer slows the
//! gate down instead of accumulating a burst of permits.
//!
//! # Rate Changes
//!
//! [`RateHandle::set_rate`] resolves only after the gate applied the new rate. A change cancels
//! the pending wait and starts a fresh one with the new period. Setting the rate the gate
//! already runs at leaves the pending wait alone.

mod gate;
mod rate;

pub use gate::{GateClosed, Permit, Permits, RateGate, RateHandle, channel};
pub use rate::{Rate, RateError};
