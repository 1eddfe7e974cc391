pub mod api;
pub mod channel;
pub mod error;
pub mod ws;

pub use api::{Endpoints, HealthStatus, HttpSessionApi, SessionApi};
pub use channel::{
    ChannelEvent, ChannelEventKind, ChannelFactory, ChannelLink, EventSender, Generation,
    StreamChannel,
};
pub use error::ServiceError;
pub use ws::WsChannelFactory;
