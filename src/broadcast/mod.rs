pub mod events;
pub mod hub;

pub use events::Event;
pub use hub::{BroadcastHub, DeliveryMode, PublishReport, SubscriberId, Subscription};
