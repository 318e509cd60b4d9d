//! Message types for the conduit bus.
//!
//! Drivers and the session manager never call each other directly. Everything
//! they exchange is one of the [`Message`] variants defined here, published on
//! the bus owned by `conduit-runtime`.
//!
//! Data messages are named from the session's point of view:
//!
//! - [`Message::DataIn`] carries bytes a driver read from its endpoint *into*
//!   the session
//! - [`Message::DataOut`] carries bytes leaving the session, to be written to a
//!   driver's sink
//!
//! # Main Types
//!
//! - [`SessionId`] - identifier minted by the session manager
//! - [`MessageKind`] - closed set of subscribable message kinds
//! - [`Message`] - the message itself
//! - [`Reply`] - single-assignment slot for synchronous answers

pub mod message;
pub mod session;

pub use message::{CreateSession, Message, MessageKind, Reply};
pub use session::SessionId;
