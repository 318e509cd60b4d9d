//! `--trace-messages`: one JSON line per bus publication.
//!
//! Payloads are summarized by length; session data never reaches the tap output.
//!
//! Most kinds are recorded before any other subscriber sees them. CREATE_SESSION
//! is recorded last, once the session manager has filled the reply, so its
//! record carries the assigned id.

use std::io::Write;
use std::sync::Arc;

use conduit_protocol::{Message, MessageKind, SessionId};
use conduit_runtime::{MessageBus, MessageHandler};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

pub type BoxedWriter = Box<dyn Write + Send>;

#[derive(Debug, Serialize)]
pub struct TapRecord {
	pub seq: u64,
	pub kind: MessageKind,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<SessionId>,
	pub bytes: usize,
}

impl TapRecord {
	fn of(seq: u64, message: &Message) -> Self {
		Self {
			seq,
			kind: message.kind(),
			session_id: message.session_id(),
			bytes: message.payload().len(),
		}
	}
}

struct TapState {
	out: BoxedWriter,
	seq: u64,
	broken: bool,
}

/// Bus subscriber that serializes every message it sees.
pub struct MessageTap {
	handler: MessageHandler,
}

impl MessageTap {
	/// Subscribes to every kind except CREATE_SESSION. Attach before the
	/// drivers so each message is recorded before it is acted upon, then call
	/// [`record_replies`](Self::record_replies) once the session manager is attached.
	pub fn attach(bus: &MessageBus, out: BoxedWriter) -> Self {
		let state = Arc::new(Mutex::new(TapState {
			out,
			seq: 0,
			broken: false,
		}));
		let handler = bus.register(move |_, message: &Message| {
			let mut state = state.lock();
			if state.broken {
				return;
			}
			state.seq += 1;
			let record = TapRecord::of(state.seq, message);
			if let Err(err) = write_record(&mut state.out, &record) {
				warn!(target: "conduit", error = %err, "message tap disabled");
				state.broken = true;
			}
		});
		for kind in MessageKind::ALL {
			if kind != MessageKind::CreateSession {
				bus.subscribe(kind, &handler);
			}
		}
		Self { handler }
	}

	/// Subscribes to CREATE_SESSION behind every subscriber attached so far.
	pub fn record_replies(&self, bus: &MessageBus) {
		bus.subscribe(MessageKind::CreateSession, &self.handler);
	}

	pub fn detach(self, bus: &MessageBus) {
		bus.unsubscribe(&self.handler);
	}
}

fn write_record(out: &mut BoxedWriter, record: &TapRecord) -> std::io::Result<()> {
	let line = serde_json::to_string(record)?;
	writeln!(out, "{line}")?;
	out.flush()
}

#[cfg(test)]
mod tests {
	use conduit_runtime::LoopbackSessions;
	use conduit_runtime::testing::{FailingSink, MemorySink};
	use serde_json::Value;

	use super::*;

	fn lines(sink: &MemorySink) -> Vec<Value> {
		String::from_utf8(sink.contents())
			.unwrap()
			.lines()
			.map(|line| serde_json::from_str(line).unwrap())
			.collect()
	}

	#[test]
	fn test_records_each_message_in_order() {
		let bus = MessageBus::new();
		let sink = MemorySink::new();
		let _tap = MessageTap::attach(&bus, Box::new(sink.clone()));

		bus.publish(&Message::Start);
		bus.publish(&Message::data_in(SessionId::new(7), b"secret".to_vec()));

		let records = lines(&sink);
		assert_eq!(records.len(), 2);
		assert_eq!(records[0]["seq"], 1);
		assert_eq!(records[0]["kind"], "START");
		assert!(records[0].get("session_id").is_none());
		assert_eq!(records[1]["kind"], "DATA_IN");
		assert_eq!(records[1]["session_id"], 7);
		assert_eq!(records[1]["bytes"], 6);
		assert!(!String::from_utf8(sink.contents()).unwrap().contains("secret"));
	}

	#[test]
	fn test_sees_nested_publications() {
		let bus = MessageBus::new();
		let sink = MemorySink::new();
		let tap = MessageTap::attach(&bus, Box::new(sink.clone()));
		let _sessions = LoopbackSessions::attach(&bus, SessionId::new(3));
		tap.record_replies(&bus);

		bus.publish(&Message::create_session());
		bus.publish(&Message::data_in(SessionId::new(3), b"hi".to_vec()));

		let kinds: Vec<_> = lines(&sink)
			.iter()
			.map(|record| record["kind"].as_str().unwrap().to_string())
			.collect();
		assert_eq!(kinds, ["CREATE_SESSION", "DATA_IN", "DATA_OUT"]);
	}

	#[test]
	fn test_create_session_record_carries_assigned_id() {
		let bus = MessageBus::new();
		let sink = MemorySink::new();
		let tap = MessageTap::attach(&bus, Box::new(sink.clone()));
		let _sessions = LoopbackSessions::attach(&bus, SessionId::new(9));
		tap.record_replies(&bus);

		bus.publish(&Message::create_session());

		let records = lines(&sink);
		assert_eq!(records.len(), 1);
		assert_eq!(records[0]["kind"], "CREATE_SESSION");
		assert_eq!(records[0]["session_id"], 9);
	}

	#[test]
	fn test_create_session_skipped_until_replies_recorded() {
		let bus = MessageBus::new();
		let sink = MemorySink::new();
		let _tap = MessageTap::attach(&bus, Box::new(sink.clone()));

		assert_eq!(bus.publish(&Message::create_session()), 0);
		assert!(sink.contents().is_empty());
	}

	#[test]
	fn test_broken_writer_disables_tap() {
		let bus = MessageBus::new();
		let _tap = MessageTap::attach(&bus, Box::new(FailingSink));

		assert_eq!(bus.publish(&Message::Start), 1);
		assert_eq!(bus.publish(&Message::Start), 1);
	}

	#[test]
	fn test_detach() {
		let bus = MessageBus::new();
		let sink = MemorySink::new();
		let tap = MessageTap::attach(&bus, Box::new(sink.clone()));
		tap.detach(&bus);

		assert_eq!(bus.publish(&Message::Start), 0);
		assert!(sink.contents().is_empty());
	}
}
