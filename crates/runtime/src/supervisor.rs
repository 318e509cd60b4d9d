//! Exit signalling between drivers and their owner.
//!
//! A driver never terminates the process. When its stream closes, its session
//! is destroyed or it hits a fault, it sends one [`DriverExit`] to the
//! [`Supervisor`], and whoever owns the supervisor decides what happens next.

use std::fmt;

use conduit_protocol::SessionId;
use tokio::sync::mpsc;

use crate::error::DriverError;
use crate::multiplexer::StreamHandle;

/// Why a driver stopped.
#[derive(Debug)]
pub enum ExitReason {
	/// The driver's session was destroyed (normally because its input closed).
	SessionDestroyed(SessionId),
	/// The input closed before any session existed.
	StreamClosed,
	/// The driver hit a fault it cannot recover from.
	Fault(DriverError),
}

impl fmt::Display for ExitReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExitReason::SessionDestroyed(session_id) => write!(f, "session {session_id} destroyed"),
			ExitReason::StreamClosed => f.write_str("stream closed before a session existed"),
			ExitReason::Fault(err) => write!(f, "fault: {err}"),
		}
	}
}

/// Exit notification sent by a driver.
#[derive(Debug)]
pub struct DriverExit {
	pub handle: StreamHandle,
	pub reason: ExitReason,
}

/// Sending half handed to drivers.
pub type ExitSender = mpsc::UnboundedSender<DriverExit>;

/// Receives exit notifications from every driver created with its sender.
pub struct Supervisor {
	exits: mpsc::UnboundedReceiver<DriverExit>,
}

impl Supervisor {
	pub fn new() -> (Self, ExitSender) {
		let (tx, exits) = mpsc::unbounded_channel();
		(Self { exits }, tx)
	}

	/// Waits for the next driver exit. Returns `None` once every sender is gone.
	pub async fn next_exit(&mut self) -> Option<DriverExit> {
		self.exits.recv().await
	}

	/// Returns an already queued exit without waiting.
	pub fn try_next_exit(&mut self) -> Option<DriverExit> {
		self.exits.try_recv().ok()
	}
}
