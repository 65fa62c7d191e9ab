//! Local publish/subscribe fan-out of store mutations.

pub mod bus;
pub mod events;

pub use bus::{PubSub, Subscription, SubscriptionRecvError};
pub use events::{StoreAction, StoreEvent};
