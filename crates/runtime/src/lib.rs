//! Conduit runtime - message bus, stream multiplexer and drivers
//!
//! This crate provides everything a driver needs to bind an I/O endpoint to a
//! session:
//!
//! - **Bus**: synchronous, re-entrant publish/subscribe over [`Message`]
//! - **Multiplexer**: single-threaded dispatch of stream read/close events
//! - **Console driver**: binds stdin/stdout (or any reader/writer pair) to one session
//! - **Loopback sessions**: in-process session manager that echoes data back
//! - **Supervisor**: receives driver exits instead of drivers exiting the process
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  readable/closed  ┌──────────────┐
//! │ Multiplexer  │ ────────────────► │ConsoleDriver │──► sink (stdout)
//! └──────────────┘                   └──────┬───────┘
//!                                           │ publish / handle
//!                                    ┌──────▼───────┐
//!                                    │  MessageBus  │
//!                                    └──────┬───────┘
//!                                           │
//!                                    ┌──────▼───────┐
//!                                    │   Sessions   │
//!                                    └──────────────┘
//! ```
//!
//! No component is global: an owning context creates the bus, the multiplexer
//! and the supervisor, and passes them to each driver it constructs.
//!
//! [`Message`]: conduit_protocol::Message

pub mod bus;
pub mod console;
pub mod error;
pub mod multiplexer;
pub mod sessions;
pub mod supervisor;
pub mod testing;

pub use bus::{HandlerId, MessageBus, MessageHandler};
pub use console::{ConsoleDriver, ConsoleStreams, Phase};
pub use error::{DriverError, Error, Result};
pub use multiplexer::{Multiplexer, SelectResponse, StreamHandle, StreamKind};
pub use sessions::LoopbackSessions;
pub use supervisor::{DriverExit, ExitReason, ExitSender, Supervisor};
