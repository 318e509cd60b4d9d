use std::sync::Arc;

use conduit_protocol::SessionId;
use parking_lot::Mutex;

use super::*;

fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> impl Fn(&MessageBus, &Message) + Send + Sync + 'static {
	let log = Arc::clone(log);
	move |_bus: &MessageBus, message: &Message| log.lock().push(format!("{name}:{}", message.kind()))
}

#[test]
fn test_handler_ids_increment() {
	let bus = MessageBus::new();
	let a = bus.register(|_, _| {});
	let b = bus.register(|_, _| {});
	assert!(b.id() > a.id());
}

#[test]
fn test_publish_in_subscription_order() {
	let bus = MessageBus::new();
	let log = Arc::new(Mutex::new(Vec::new()));

	let second = bus.register(recorder(&log, "second"));
	let first = bus.register(recorder(&log, "first"));
	bus.subscribe(MessageKind::Start, &first);
	bus.subscribe(MessageKind::Start, &second);

	assert_eq!(bus.publish(&Message::Start), 2);
	assert_eq!(*log.lock(), vec!["first:START", "second:START"]);
}

#[test]
fn test_publish_only_reaches_subscribed_kind() {
	let bus = MessageBus::new();
	let log = Arc::new(Mutex::new(Vec::new()));

	let handler = bus.register(recorder(&log, "h"));
	bus.subscribe(MessageKind::DataOut, &handler);

	assert_eq!(bus.publish(&Message::data_in(SessionId::new(1), b"x".to_vec())), 0);
	assert_eq!(bus.publish(&Message::data_out(SessionId::new(1), b"x".to_vec())), 1);
	assert_eq!(*log.lock(), vec!["h:DATA_OUT"]);
}

#[test]
fn test_duplicate_subscribe_delivers_once() {
	let bus = MessageBus::new();
	let log = Arc::new(Mutex::new(Vec::new()));

	let handler = bus.register(recorder(&log, "h"));
	assert!(bus.subscribe(MessageKind::Start, &handler));
	assert!(bus.subscribe(MessageKind::Start, &handler));

	bus.publish(&Message::Start);
	assert_eq!(log.lock().len(), 1);
	assert_eq!(bus.subscriber_count(MessageKind::Start), 1);
}

#[test]
fn test_unsubscribe_removes_every_kind() {
	let bus = MessageBus::new();
	let log = Arc::new(Mutex::new(Vec::new()));

	let handler = bus.register(recorder(&log, "h"));
	bus.subscribe(MessageKind::Start, &handler);
	bus.subscribe(MessageKind::DataOut, &handler);
	bus.unsubscribe(&handler);

	bus.publish(&Message::Start);
	bus.publish(&Message::data_out(SessionId::new(1), Vec::new()));
	assert!(log.lock().is_empty());
	assert_eq!(bus.subscriber_count(MessageKind::Start), 0);
	assert!(!bus.subscribe(MessageKind::Start, &handler));
}

#[test]
fn test_reentrant_publish() {
	let bus = MessageBus::new();
	let log = Arc::new(Mutex::new(Vec::new()));

	let relay = bus.register(|bus, message| {
		if let Message::DataIn { session_id, data } = message {
			bus.publish(&Message::data_out(*session_id, data.clone()));
		}
	});
	let sink = bus.register(recorder(&log, "sink"));
	bus.subscribe(MessageKind::DataIn, &relay);
	bus.subscribe(MessageKind::DataOut, &sink);

	bus.publish(&Message::data_in(SessionId::new(4), b"ping".to_vec()));
	assert_eq!(*log.lock(), vec!["sink:DATA_OUT"]);
}

#[test]
fn test_reply_filled_during_publish() {
	let bus = MessageBus::new();
	let manager = bus.register(|_, message| {
		if let Message::CreateSession(request) = message {
			request.reply.fill(SessionId::new(77));
		}
	});
	bus.subscribe(MessageKind::CreateSession, &manager);

	let request = Message::create_session();
	bus.publish(&request);
	assert_eq!(request.session_id(), Some(SessionId::new(77)));
}

#[test]
fn test_unsubscribe_from_inside_handler() {
	let bus = Arc::new(MessageBus::new());
	let token: Arc<Mutex<Option<MessageHandler>>> = Arc::new(Mutex::new(None));

	let slot = Arc::clone(&token);
	let handler = bus.register(move |bus, _| {
		if let Some(handler) = slot.lock().take() {
			bus.unsubscribe(&handler);
		}
	});
	bus.subscribe(MessageKind::Start, &handler);
	*token.lock() = Some(handler);

	assert_eq!(bus.publish(&Message::Start), 1);
	assert_eq!(bus.publish(&Message::Start), 0);
}
