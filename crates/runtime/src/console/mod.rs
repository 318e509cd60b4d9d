//! Console driver: binds a byte stream and its sink to one session.
//!
//! The driver talks to the rest of the process only through the multiplexer
//! (for its input stream) and the bus (for everything else):
//!
//! 1. On START it publishes CREATE_SESSION and keeps the id from the reply
//! 2. Every chunk read from its input is published as DATA_IN
//! 3. DATA_OUT addressed to its session is written to the sink
//! 4. When the input closes it publishes DESTROY_SESSION; once that reaches
//!    its own handler the supervisor is told the driver is done
//!
//! Messages addressed to any other session are ignored.


use std::io::Write;
use std::sync::{Arc, Weak};

use conduit_protocol::{Message, MessageKind, SessionId};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{MessageBus, MessageHandler};
use crate::error::{DriverError, Result};
use crate::multiplexer::{BoxedReader, Multiplexer, SelectResponse, StreamHandle, StreamKind};
use crate::supervisor::{DriverExit, ExitReason, ExitSender};

/// Message kinds the console driver subscribes to.
pub const SUBSCRIPTIONS: [MessageKind; 3] = [
	MessageKind::Start,
	MessageKind::DataOut,
	MessageKind::DestroySession,
];

#[cfg(windows)]
const STDIN_KIND: StreamKind = StreamKind::Pipe;
#[cfg(not(windows))]
const STDIN_KIND: StreamKind = StreamKind::Stream;

/// Blocking writer receiving session output.
pub type BoxedSink = Box<dyn Write + Send>;

/// Endpoints a console driver binds together.
pub struct ConsoleStreams {
	pub handle: StreamHandle,
	pub kind: StreamKind,
	pub reader: BoxedReader,
	pub sink: BoxedSink,
}

impl ConsoleStreams {
	/// Process standard input and standard output.
	pub fn stdio() -> Self {
		Self {
			handle: StreamHandle::STDIN,
			kind: STDIN_KIND,
			reader: Box::new(tokio::io::stdin()),
			sink: Box::new(std::io::stdout()),
		}
	}
}

/// Where the driver is in its session lifecycle. Only ever moves forward,
/// except that a failed CREATE_SESSION falls back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Idle,
	Creating,
	Bound,
	Closed,
}

struct State {
	session_id: Option<SessionId>,
	phase: Phase,
	/// Input read before the session existed.
	pending: Vec<u8>,
}

pub struct ConsoleDriver {
	handle: StreamHandle,
	bus: Arc<MessageBus>,
	multiplexer: Weak<Multiplexer>,
	message_handler: Mutex<Option<MessageHandler>>,
	state: Mutex<State>,
	sink: Mutex<BoxedSink>,
	exits: ExitSender,
}

impl ConsoleDriver {
	/// Creates a driver bound to the process's stdin and stdout.
	pub fn new(multiplexer: &Arc<Multiplexer>, bus: Arc<MessageBus>, exits: ExitSender) -> Result<Arc<Self>> {
		Self::with_streams(multiplexer, bus, exits, ConsoleStreams::stdio())
	}

	/// Creates a driver over arbitrary streams.
	///
	/// Registers the input with `multiplexer`, installs both stream callbacks,
	/// then registers a bus handler and subscribes it to [`SUBSCRIPTIONS`].
	/// Fails with [`Error::HandleInUse`](crate::Error::HandleInUse) if the
	/// handle already has an owner.
	pub fn with_streams(
		multiplexer: &Arc<Multiplexer>,
		bus: Arc<MessageBus>,
		exits: ExitSender,
		streams: ConsoleStreams,
	) -> Result<Arc<Self>> {
		let ConsoleStreams {
			handle,
			kind,
			reader,
			sink,
		} = streams;

		// A driver always owns its handle; Drop releases it.
		multiplexer.register(handle, kind, reader)?;

		let driver = Arc::new(Self {
			handle,
			bus: Arc::clone(&bus),
			multiplexer: Arc::downgrade(multiplexer),
			message_handler: Mutex::new(None),
			state: Mutex::new(State {
				session_id: None,
				phase: Phase::Idle,
				pending: Vec::new(),
			}),
			sink: Mutex::new(sink),
			exits,
		});

		let weak = Arc::downgrade(&driver);
		multiplexer.set_on_readable(handle, move |_, data| match weak.upgrade() {
			Some(driver) => driver.on_readable(data),
			None => SelectResponse::Remove,
		})?;

		let weak = Arc::downgrade(&driver);
		multiplexer.set_on_closed(handle, move |_| match weak.upgrade() {
			Some(driver) => driver.on_closed(),
			None => SelectResponse::Remove,
		})?;

		let weak = Arc::downgrade(&driver);
		let message_handler = bus.register(move |bus, message| {
			if let Some(driver) = weak.upgrade() {
				driver.handle_message(bus, message);
			}
		});
		for kind in SUBSCRIPTIONS {
			bus.subscribe(kind, &message_handler);
		}
		*driver.message_handler.lock() = Some(message_handler);

		debug!(target: "conduit", %handle, ?kind, "console driver attached");
		Ok(driver)
	}

	pub fn handle(&self) -> StreamHandle {
		self.handle
	}

	pub fn session_id(&self) -> Option<SessionId> {
		self.state.lock().session_id
	}

	pub fn phase(&self) -> Phase {
		self.state.lock().phase
	}

	/// Unsubscribes from the bus and releases the input stream. Idempotent.
	pub fn close(&self) {
		if let Some(handler) = self.message_handler.lock().take() {
			self.bus.unsubscribe(&handler);
		}
		if let Some(multiplexer) = self.multiplexer.upgrade() {
			multiplexer.unregister(self.handle);
		}
	}

	fn on_readable(&self, data: &[u8]) -> SelectResponse {
		let session_id = {
			let mut state = self.state.lock();
			match (state.phase, state.session_id) {
				(Phase::Bound, Some(session_id)) => session_id,
				(Phase::Closed, _) => {
					warn!(target: "conduit", handle = %self.handle, bytes = data.len(), "input after session closed, discarding");
					return SelectResponse::Remove;
				}
				_ => {
					state.pending.extend_from_slice(data);
					debug!(target: "conduit", handle = %self.handle, pending = state.pending.len(), "no session yet, buffering input");
					return SelectResponse::Keep;
				}
			}
		};

		trace!(target: "conduit", %session_id, bytes = data.len(), "forwarding input");
		self.bus.publish(&Message::data_in(session_id, data));
		SelectResponse::Keep
	}

	fn on_closed(&self) -> SelectResponse {
		let session_id = {
			let mut state = self.state.lock();
			match state.phase {
				Phase::Closed => return SelectResponse::Remove,
				Phase::Bound => state.session_id,
				Phase::Idle | Phase::Creating => {
					state.phase = Phase::Closed;
					None
				}
			}
		};

		match session_id {
			Some(session_id) => {
				info!(target: "conduit", handle = %self.handle, %session_id, "input closed, destroying session");
				self.bus.publish(&Message::destroy_session(session_id));
			}
			None => {
				let dropped = std::mem::take(&mut self.state.lock().pending).len();
				if dropped > 0 {
					warn!(target: "conduit", handle = %self.handle, bytes = dropped, "input closed before a session existed, buffered input lost");
				}
				self.signal(ExitReason::StreamClosed);
			}
		}
		SelectResponse::Remove
	}

	fn handle_message(&self, bus: &MessageBus, message: &Message) {
		match message {
			Message::Start => self.handle_start(bus),
			Message::DataOut { session_id, data } => self.handle_data_out(*session_id, data),
			Message::DestroySession { session_id } => self.handle_destroy(*session_id),
			Message::CreateSession(_) | Message::DataIn { .. } => self.unexpected(message.kind()),
		}
	}

	fn handle_start(&self, bus: &MessageBus) {
		{
			let mut state = self.state.lock();
			if state.phase != Phase::Idle {
				warn!(target: "conduit", handle = %self.handle, session_id = ?state.session_id, phase = ?state.phase, "repeated START ignored");
				return;
			}
			state.phase = Phase::Creating;
		}

		let request = Message::create_session();
		bus.publish(&request);

		let Some(session_id) = request.session_id() else {
			self.state.lock().phase = Phase::Idle;
			error!(target: "conduit", handle = %self.handle, "CREATE_SESSION went unanswered");
			self.signal(ExitReason::Fault(DriverError::NoSessionManager));
			return;
		};

		let pending = {
			let mut state = self.state.lock();
			state.session_id = Some(session_id);
			state.phase = Phase::Bound;
			std::mem::take(&mut state.pending)
		};
		info!(target: "conduit", handle = %self.handle, %session_id, "session created");

		if !pending.is_empty() {
			debug!(target: "conduit", %session_id, bytes = pending.len(), "flushing buffered input");
			bus.publish(&Message::data_in(session_id, pending));
		}
	}

	fn handle_data_out(&self, session_id: SessionId, data: &[u8]) {
		{
			let state = self.state.lock();
			if state.phase != Phase::Bound || state.session_id != Some(session_id) {
				trace!(target: "conduit", %session_id, "DATA_OUT for another session");
				return;
			}
		}

		let written = {
			let mut sink = self.sink.lock();
			sink.write_all(data).and_then(|()| sink.flush())
		};
		if let Err(source) = written {
			error!(target: "conduit", %session_id, error = %source, "sink write failed");
			self.signal(ExitReason::Fault(DriverError::Sink {
				bytes: data.len(),
				source,
			}));
		}
	}

	fn handle_destroy(&self, session_id: SessionId) {
		{
			let mut state = self.state.lock();
			if state.session_id != Some(session_id) {
				trace!(target: "conduit", %session_id, "DESTROY_SESSION for another session");
				return;
			}
			if state.phase == Phase::Closed {
				debug!(target: "conduit", %session_id, "session already destroyed");
				return;
			}
			state.phase = Phase::Closed;
		}

		info!(target: "conduit", handle = %self.handle, %session_id, "session destroyed");
		self.signal(ExitReason::SessionDestroyed(session_id));
	}

	fn unexpected(&self, kind: MessageKind) {
		error!(target: "conduit", handle = %self.handle, %kind, "console driver received unsubscribed message");
		if cfg!(debug_assertions) {
			panic!("console driver received unsubscribed {kind} message");
		}
		self.signal(ExitReason::Fault(DriverError::UnexpectedMessage(kind)));
	}

	fn signal(&self, reason: ExitReason) {
		let exit = DriverExit {
			handle: self.handle,
			reason,
		};
		if let Err(err) = self.exits.send(exit) {
			warn!(target: "conduit", handle = %self.handle, reason = %err.0.reason, "supervisor gone, exit not delivered");
		}
	}
}

impl Drop for ConsoleDriver {
	fn drop(&mut self) {
		self.close();
	}
}
