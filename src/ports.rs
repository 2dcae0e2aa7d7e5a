pub mod push;
pub mod store;
pub mod time;

pub use push::{PushEncoder, PushSender};
pub use store::SubscriptionStore;
pub use time::TimeProvider;
