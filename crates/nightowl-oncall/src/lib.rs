//! Roster on-call resolution: override precedence, follow-the-sun handoff,
//! rotation-position arithmetic, shift history, and iCal export.
//!
//! The arithmetic is kept dependency-free of the database (see
//! [`resolution`] and [`history`]) so the on-call determinism property
//! (identical configuration + timestamp always yields identical results) is
//! checked by plain unit tests rather than integration tests against
//! Postgres. [`service::OnCallService`] is the thin I/O layer that loads
//! rows and calls through to the pure functions.

pub mod history;
pub mod ical;
pub mod resolution;
pub mod service;

pub use resolution::{resolve, resolve_schedule, select_active_roster};
pub use service::OnCallService;
