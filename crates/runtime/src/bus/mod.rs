//! Synchronous publish/subscribe bus.
//!
//! [`MessageBus::publish`] runs every handler subscribed to the message's kind,
//! in subscription order, before returning. Handlers receive the bus itself so
//! they can publish follow-up messages from inside a delivery; the subscriber
//! list is snapshotted and its lock released before any handler runs, which
//! keeps re-entrant publishing and unsubscribing deadlock free.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use conduit_protocol::{Message, MessageKind};
use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::trace;

/// Unique identifier for a registered handler.
pub type HandlerId = u64;

/// Handler function invoked for every delivered message.
pub type HandlerFn = Arc<dyn Fn(&MessageBus, &Message) + Send + Sync>;

/// Registration token returned by [`MessageBus::register`].
///
/// Deliberately not `Clone`: the owner of the token is the only one that can
/// subscribe or unsubscribe the handler.
#[derive(Debug, PartialEq, Eq)]
pub struct MessageHandler {
	id: HandlerId,
}

impl MessageHandler {
	pub fn id(&self) -> HandlerId {
		self.id
	}
}

#[derive(Default)]
struct Registry {
	handlers: HashMap<HandlerId, HandlerFn>,
	subscribers: HashMap<MessageKind, IndexSet<HandlerId>>,
}

/// Typed synchronous fan-out bus.
pub struct MessageBus {
	next_id: AtomicU64,
	registry: Mutex<Registry>,
}

impl Default for MessageBus {
	fn default() -> Self {
		Self::new()
	}
}

impl MessageBus {
	pub fn new() -> Self {
		Self {
			next_id: AtomicU64::new(1),
			registry: Mutex::new(Registry::default()),
		}
	}

	/// Registers a handler without subscribing it to anything yet.
	pub fn register<F>(&self, handler: F) -> MessageHandler
	where
		F: Fn(&MessageBus, &Message) + Send + Sync + 'static,
	{
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		self.registry.lock().handlers.insert(id, Arc::new(handler));
		MessageHandler { id }
	}

	/// Subscribes `handler` to `kind`. Subscribing twice to the same kind is a no-op.
	///
	/// Returns `false` if the handler has already been unsubscribed.
	pub fn subscribe(&self, kind: MessageKind, handler: &MessageHandler) -> bool {
		let mut registry = self.registry.lock();
		if !registry.handlers.contains_key(&handler.id) {
			return false;
		}
		registry.subscribers.entry(kind).or_default().insert(handler.id);
		true
	}

	/// Removes `handler` from every kind and forgets it.
	pub fn unsubscribe(&self, handler: &MessageHandler) {
		let mut registry = self.registry.lock();
		registry.handlers.remove(&handler.id);
		for ids in registry.subscribers.values_mut() {
			ids.shift_remove(&handler.id);
		}
	}

	/// Delivers `message` to every subscriber of its kind and returns how many ran.
	pub fn publish(&self, message: &Message) -> usize {
		let kind = message.kind();
		let targets: Vec<HandlerFn> = {
			let registry = self.registry.lock();
			registry
				.subscribers
				.get(&kind)
				.into_iter()
				.flatten()
				.filter_map(|id| registry.handlers.get(id).cloned())
				.collect()
		};

		trace!(
			target: "conduit",
			kind = %kind,
			session_id = ?message.session_id(),
			bytes = message.payload().len(),
			subscribers = targets.len(),
			"publish"
		);

		for handler in &targets {
			handler(self, message);
		}
		targets.len()
	}

	pub fn subscriber_count(&self, kind: MessageKind) -> usize {
		self.registry
			.lock()
			.subscribers
			.get(&kind)
			.map_or(0, IndexSet::len)
	}
}
