//! Escalation policy model and the background engine that advances firing
//! alerts through it.
//!
//! [`planner`] is the pure tier-advancement arithmetic shared by the live
//! [`engine`] and the [`dryrun`] endpoint; [`targets`] resolves a tier's
//! target selectors against on-call state; [`subscriber`] races the Redis
//! ack/resolve channels against the tick loop under an advisory lock, so a
//! concurrent ack always wins.

pub mod dryrun;
pub mod engine;
pub mod handoff;
pub mod planner;
pub mod subscriber;
pub mod targets;

pub use dryrun::{dry_run, DryRunStep};
pub use engine::{EscalationEngine, TICK_INTERVAL};
pub use handoff::{HandoffNotifier, HANDOFF_CHECK_INTERVAL};
pub use subscriber::AckResolveSubscriber;
