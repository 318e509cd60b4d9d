//! Bus messages and their kinds.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// Subscribable message kinds.
///
/// Handlers subscribe per kind; [`Message::kind`] maps every message onto
/// exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
	/// All drivers are constructed; sessions may be created.
	Start,
	/// A driver asks the session manager for a new session.
	CreateSession,
	/// A session is being torn down.
	DestroySession,
	/// Bytes flowing from a driver into its session.
	DataIn,
	/// Bytes flowing from a session out to its driver.
	DataOut,
}

impl MessageKind {
	pub const ALL: [MessageKind; 5] = [
		MessageKind::Start,
		MessageKind::CreateSession,
		MessageKind::DestroySession,
		MessageKind::DataIn,
		MessageKind::DataOut,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			MessageKind::Start => "START",
			MessageKind::CreateSession => "CREATE_SESSION",
			MessageKind::DestroySession => "DESTROY_SESSION",
			MessageKind::DataIn => "DATA_IN",
			MessageKind::DataOut => "DATA_OUT",
		}
	}
}

impl fmt::Display for MessageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A message published on the bus.
///
/// The publisher owns the message; subscribers only borrow it for the
/// duration of the synchronous publish call.
#[derive(Debug)]
pub enum Message {
	Start,
	CreateSession(CreateSession),
	DestroySession { session_id: SessionId },
	DataIn { session_id: SessionId, data: Vec<u8> },
	DataOut { session_id: SessionId, data: Vec<u8> },
}

impl Message {
	pub fn create_session() -> Self {
		Message::CreateSession(CreateSession::default())
	}

	pub fn data_in(session_id: SessionId, data: impl Into<Vec<u8>>) -> Self {
		Message::DataIn {
			session_id,
			data: data.into(),
		}
	}

	pub fn data_out(session_id: SessionId, data: impl Into<Vec<u8>>) -> Self {
		Message::DataOut {
			session_id,
			data: data.into(),
		}
	}

	pub fn destroy_session(session_id: SessionId) -> Self {
		Message::DestroySession { session_id }
	}

	pub fn kind(&self) -> MessageKind {
		match self {
			Message::Start => MessageKind::Start,
			Message::CreateSession(_) => MessageKind::CreateSession,
			Message::DestroySession { .. } => MessageKind::DestroySession,
			Message::DataIn { .. } => MessageKind::DataIn,
			Message::DataOut { .. } => MessageKind::DataOut,
		}
	}

	/// Session this message is addressed to, if any.
	///
	/// For [`Message::CreateSession`] this is the id assigned so far, which is
	/// `None` until a session manager has answered.
	pub fn session_id(&self) -> Option<SessionId> {
		match self {
			Message::Start => None,
			Message::CreateSession(create) => create.reply.peek(),
			Message::DestroySession { session_id }
			| Message::DataIn { session_id, .. }
			| Message::DataOut { session_id, .. } => Some(*session_id),
		}
	}

	/// Payload bytes for data messages, empty otherwise.
	pub fn payload(&self) -> &[u8] {
		match self {
			Message::DataIn { data, .. } | Message::DataOut { data, .. } => data,
			_ => &[],
		}
	}
}

/// Request for a new session.
///
/// The session manager answers by filling [`CreateSession::reply`] while the
/// publish call is still running, so the publisher can read the new id as
/// soon as `publish` returns.
#[derive(Debug, Default)]
pub struct CreateSession {
	pub reply: Reply<SessionId>,
}

/// Single-assignment answer slot carried inside a message.
///
/// The first subscriber to [`fill`](Self::fill) the slot wins; later attempts
/// are rejected so two session managers cannot both claim one request.
#[derive(Debug)]
pub struct Reply<T> {
	value: Mutex<Option<T>>,
}

impl<T> Default for Reply<T> {
	fn default() -> Self {
		Self {
			value: Mutex::new(None),
		}
	}
}

impl<T> Reply<T> {
	/// Stores `value` unless the slot is already filled. Returns whether it was stored.
	pub fn fill(&self, value: T) -> bool {
		let mut slot = self.value.lock();
		if slot.is_some() {
			return false;
		}
		*slot = Some(value);
		true
	}
}

impl<T: Copy> Reply<T> {
	pub fn peek(&self) -> Option<T> {
		*self.value.lock()
	}
}
