//! Outbound notifications: payload assembly per channel and the transports
//! that deliver them.

pub mod dispatcher;
pub mod payload;
pub mod transport;

pub use dispatcher::{NotificationDispatcher, build_outbound};
pub use transport::{ChannelTransport, HttpTransport, Outbound, SmtpSettings};
