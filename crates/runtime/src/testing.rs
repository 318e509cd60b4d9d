//! Test doubles for driver tests.
//!
//! - [`MemorySink`]: cloneable in-memory sink that records every write call
//! - [`FailingSink`]: sink whose writes always fail with a broken pipe
//! - [`MessageLog`]: bus subscriber that records what was published

use std::io::{self, Write};
use std::sync::Arc;

use conduit_protocol::{Message, MessageKind, SessionId};
use parking_lot::Mutex;

use crate::bus::{MessageBus, MessageHandler};

/// In-memory sink. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
	inner: Arc<Mutex<SinkState>>,
}

#[derive(Debug, Default)]
struct SinkState {
	bytes: Vec<u8>,
	writes: usize,
	flushes: usize,
}

impl MemorySink {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn contents(&self) -> Vec<u8> {
		self.inner.lock().bytes.clone()
	}

	pub fn write_calls(&self) -> usize {
		self.inner.lock().writes
	}

	pub fn flushes(&self) -> usize {
		self.inner.lock().flushes
	}
}

impl Write for MemorySink {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let mut state = self.inner.lock();
		state.bytes.extend_from_slice(buf);
		state.writes += 1;
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		self.inner.lock().flushes += 1;
		Ok(())
	}
}

/// Sink that rejects every write.
#[derive(Debug, Default)]
pub struct FailingSink;

impl Write for FailingSink {
	fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
		Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

/// One recorded publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
	pub kind: MessageKind,
	pub session_id: Option<SessionId>,
	pub payload: Vec<u8>,
}

/// Records every message of the subscribed kinds, in delivery order.
pub struct MessageLog {
	entries: Arc<Mutex<Vec<Recorded>>>,
	handler: MessageHandler,
}

impl MessageLog {
	pub fn attach(bus: &MessageBus, kinds: &[MessageKind]) -> Self {
		let entries = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&entries);
		let handler = bus.register(move |_, message: &Message| {
			sink.lock().push(Recorded {
				kind: message.kind(),
				session_id: message.session_id(),
				payload: message.payload().to_vec(),
			});
		});
		for kind in kinds {
			bus.subscribe(*kind, &handler);
		}
		Self { entries, handler }
	}

	/// Subscribes to every message kind.
	pub fn attach_all(bus: &MessageBus) -> Self {
		Self::attach(bus, &MessageKind::ALL)
	}

	pub fn entries(&self) -> Vec<Recorded> {
		self.entries.lock().clone()
	}

	pub fn of_kind(&self, kind: MessageKind) -> Vec<Recorded> {
		self.entries
			.lock()
			.iter()
			.filter(|entry| entry.kind == kind)
			.cloned()
			.collect()
	}

	pub fn count(&self, kind: MessageKind) -> usize {
		self.of_kind(kind).len()
	}

	pub fn detach(self, bus: &MessageBus) {
		bus.unsubscribe(&self.handler);
	}
}
