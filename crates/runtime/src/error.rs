//! Error types for the conduit runtime.

use conduit_protocol::MessageKind;
use thiserror::Error;

use crate::multiplexer::StreamHandle;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by runtime setup and teardown calls.
#[derive(Debug, Error)]
pub enum Error {
	/// Another registration already owns this stream handle.
	#[error("Stream handle {0} is already registered")]
	HandleInUse(StreamHandle),

	/// No registration exists for this stream handle.
	#[error("Stream handle {0} is not registered")]
	UnknownHandle(StreamHandle),

	/// The multiplexer run loop was started twice.
	#[error("Multiplexer is already running")]
	AlreadyRunning,
}

/// Faults a driver reports to its supervisor instead of aborting the process.
#[derive(Debug, Error)]
pub enum DriverError {
	/// The handler received a kind it never subscribed to.
	#[error("Driver received unsubscribed {0} message")]
	UnexpectedMessage(MessageKind),

	/// CREATE_SESSION was published but no subscriber filled the reply.
	#[error("No session manager answered CREATE_SESSION")]
	NoSessionManager,

	/// Writing session output to the sink failed.
	#[error("Failed to write {bytes} bytes to sink: {source}")]
	Sink {
		bytes: usize,
		#[source]
		source: std::io::Error,
	},
}
