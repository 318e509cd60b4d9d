//! Loopback session manager.
//!
//! Stands in for the real session layer: it mints session ids, answers
//! CREATE_SESSION, and echoes every DATA_IN of a live session straight back as
//! DATA_OUT. Nothing leaves the process, which makes it useful both as a
//! local echo endpoint and as the session side of driver tests.

use std::sync::{Arc, Weak};

use conduit_protocol::{Message, MessageKind, SessionId};
use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, MessageHandler};

/// Message kinds the loopback manager subscribes to.
pub const SUBSCRIPTIONS: [MessageKind; 3] = [
	MessageKind::CreateSession,
	MessageKind::DataIn,
	MessageKind::DestroySession,
];

struct Sessions {
	next_id: SessionId,
	live: IndexSet<SessionId>,
	created: usize,
}

impl Sessions {
	/// First id at or after `next_id` that is not live, wrapping once around the id space.
	fn free_id(&self) -> Option<SessionId> {
		let mut session_id = self.next_id;
		for _ in 0..=u16::MAX as usize {
			if !self.live.contains(&session_id) {
				return Some(session_id);
			}
			session_id = session_id.next();
		}
		None
	}
}

pub struct LoopbackSessions {
	sessions: Mutex<Sessions>,
	message_handler: Mutex<Option<MessageHandler>>,
}

impl LoopbackSessions {
	/// Creates the manager and subscribes it to `bus`. Ids start at `first_id`.
	pub fn attach(bus: &MessageBus, first_id: SessionId) -> Arc<Self> {
		let manager = Arc::new(Self {
			sessions: Mutex::new(Sessions {
				next_id: first_id,
				live: IndexSet::new(),
				created: 0,
			}),
			message_handler: Mutex::new(None),
		});

		let weak: Weak<Self> = Arc::downgrade(&manager);
		let handler = bus.register(move |bus, message| {
			if let Some(manager) = weak.upgrade() {
				manager.handle_message(bus, message);
			}
		});
		for kind in SUBSCRIPTIONS {
			bus.subscribe(kind, &handler);
		}
		*manager.message_handler.lock() = Some(handler);
		manager
	}

	pub fn detach(&self, bus: &MessageBus) {
		if let Some(handler) = self.message_handler.lock().take() {
			bus.unsubscribe(&handler);
		}
	}

	/// Number of sessions created so far.
	pub fn created(&self) -> usize {
		self.sessions.lock().created
	}

	pub fn live_sessions(&self) -> Vec<SessionId> {
		self.sessions.lock().live.iter().copied().collect()
	}

	pub fn is_live(&self, session_id: SessionId) -> bool {
		self.sessions.lock().live.contains(&session_id)
	}

	fn handle_message(&self, bus: &MessageBus, message: &Message) {
		match message {
			Message::CreateSession(request) => {
				let mut sessions = self.sessions.lock();
				let Some(session_id) = sessions.free_id() else {
					warn!(target: "conduit", live = sessions.live.len(), "session ids exhausted, CREATE_SESSION left unanswered");
					return;
				};
				if request.reply.fill(session_id) {
					sessions.next_id = session_id.next();
					sessions.live.insert(session_id);
					sessions.created += 1;
					info!(target: "conduit", %session_id, "loopback session created");
				}
			}
			Message::DataIn { session_id, data } => {
				if !self.is_live(*session_id) {
					debug!(target: "conduit", %session_id, bytes = data.len(), "DATA_IN for unknown session dropped");
					return;
				}
				bus.publish(&Message::data_out(*session_id, data.as_slice()));
			}
			Message::DestroySession { session_id } => {
				if self.sessions.lock().live.shift_remove(session_id) {
					info!(target: "conduit", %session_id, "loopback session destroyed");
				}
			}
			Message::Start | Message::DataOut { .. } => {}
		}
	}
}
