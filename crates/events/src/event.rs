use chrono::{DateTime, Utc};

/// A domain event: an immutable fact produced by an aggregate decision.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name, e.g. "stock.movement.recorded".
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time of the change.
    fn occurred_at(&self) -> DateTime<Utc>;
}
