pub mod alert;
pub mod audit;
pub mod escalation;
pub mod incident;
pub mod message;
pub mod roster;
pub mod tenant;

pub use alert::{Alert, AlertStatus, NormalizedAlert, Severity};
pub use audit::{Actor, AuditEntry};
pub use escalation::{
    EscalationAction, EscalationEvent, EscalationPolicy, EscalationTier, NotifyMethod,
    NotifyResult, PlannedNotification, TargetSelector,
};
pub use incident::{Incident, IncidentHistoryEntry, IncidentSearchHit, Pagination};
pub use message::{ChatProviderKind, MessageMapping};
pub use roster::{
    OnCallResolution, OnCallSource, Roster, RosterMember, RosterOverride, RotationType, Shift,
    UserRef,
};
pub use tenant::{ApiKey, Tenant, TenantContext};
