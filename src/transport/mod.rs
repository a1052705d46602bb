//! Outbound connections from the front-door to the specialized nodes.

pub mod forward;

pub use forward::{IncomingBody, NodeClient, CONNECT_TIMEOUT};
