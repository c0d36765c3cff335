//! HTTP request handlers.

pub mod health;
pub mod stream;

pub use health::health;
pub use stream::flight_stream;
