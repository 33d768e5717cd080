pub mod broadcaster;
pub mod redis_relay;

pub use broadcaster::*;
pub use redis_relay::*;
