//! Notifier dispatcher: translates a tier action into a provider call and
//! records the resulting message reference for continuity.
//!
//! [`provider`] defines the capability set every chat/telephony provider
//! exposes as a trait object, [`slack`] is the one illustrative concrete
//! chat implementation, [`registry`] resolves a tenant's configured
//! provider, [`mappings`] is the `message_mappings` repository, and
//! [`dispatcher`] ties them together with the single retry-on-timeout
//! policy.

pub mod dispatcher;
pub mod mappings;
pub mod provider;
pub mod registry;
pub mod slack;

pub use dispatcher::NotifierDispatcher;
pub use provider::{AlertMessage, ChatProvider, DirectMessage, EscalationMessage, MessageRef, ProviderError, TelephonyProvider};
pub use registry::ProviderRegistry;
