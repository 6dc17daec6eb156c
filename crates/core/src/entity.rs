//! Entity trait: identity inside an owning aggregate.

/// Something with a stable identity that lives inside an aggregate
/// (a movement detail row, an invoice line).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
