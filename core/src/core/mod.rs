pub mod business;
pub mod model;
pub mod outcome;
pub mod shard;

pub use business::{BusinessBuilder, CallbackBusiness, OrderBusiness};
pub use model::{CompensationMessage, Order, OrderRecord, OrderStatus, OrderType, PayStatus, PayType};
pub use outcome::ForwardOutcome;
pub use shard::ShardRouter;
