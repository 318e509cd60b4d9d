//! Single-threaded stream multiplexer.
//!
//! Streams are registered with a handle, a kind and an async reader. Once
//! [`Multiplexer::run`] is started every reader is moved into its own task
//! that only reads chunks and forwards them into one queue. The run loop takes
//! one event at a time off that queue and invokes the matching callback to
//! completion before waiting again, so callbacks never run concurrently and
//! never observe a suspension point.
//!
//! # Event Flow
//!
//! 1. Reader task reads up to `read_buffer` bytes from its stream
//! 2. The chunk is queued as a readable event (or a closed event on EOF/error)
//! 3. The run loop pops the event and calls `on_readable` / `on_closed`
//! 4. The callback's [`SelectResponse`] decides whether the stream stays registered
//!
//! The queue holds at most [`EVENT_QUEUE_DEPTH`] events. A reader whose chunk
//! does not fit waits for the loop before reading again, so a slow callback
//! throttles its input instead of buffering it.
//!
//! Closed streams are always dropped after their `on_closed` callback ran.


use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default number of bytes read from a stream per event.
pub const DEFAULT_READ_BUFFER: usize = 4096;

/// Events queued between the reader tasks and the run loop.
pub const EVENT_QUEUE_DEPTH: usize = 4;

/// Identity of a registered stream (a file descriptor on unix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(u64);

impl StreamHandle {
	pub const STDIN: StreamHandle = StreamHandle(0);

	pub const fn new(raw: u64) -> Self {
		Self(raw)
	}
}

impl fmt::Display for StreamHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// What sort of endpoint a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
	/// Point-to-point byte stream (socket or tty/pipe fd on unix).
	Stream,
	/// Anonymous pipe serviced by a helper thread (windows console input).
	Pipe,
}

/// Answer a callback gives the multiplexer about its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectResponse {
	Keep,
	Remove,
}

/// Readable half of a registered stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Invoked with every chunk read from the stream.
pub type OnReadable = Arc<dyn Fn(StreamHandle, &[u8]) -> SelectResponse + Send + Sync>;

/// Invoked once when the stream reaches EOF or fails.
pub type OnClosed = Arc<dyn Fn(StreamHandle) -> SelectResponse + Send + Sync>;

#[derive(Debug)]
enum StreamEvent {
	Readable {
		handle: StreamHandle,
		generation: u64,
		data: Vec<u8>,
	},
	Closed {
		handle: StreamHandle,
		generation: u64,
	},
}

struct Registration {
	kind: StreamKind,
	generation: u64,
	reader: Option<BoxedReader>,
	task: Option<JoinHandle<()>>,
	on_readable: Option<OnReadable>,
	on_closed: Option<OnClosed>,
}

impl Registration {
	fn abort(&mut self) {
		if let Some(task) = self.task.take() {
			task.abort();
		}
	}
}

#[derive(Default)]
struct Streams {
	next_generation: u64,
	entries: IndexMap<StreamHandle, Registration>,
}

/// Readiness dispatcher shared by every driver of a process.
pub struct Multiplexer {
	read_buffer: usize,
	streams: Mutex<Streams>,
	events_tx: mpsc::Sender<StreamEvent>,
	events_rx: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
	/// Signalled by `register` so a waiting loop starts the new reader.
	registered: Notify,
	shutdown: Notify,
}

impl Default for Multiplexer {
	fn default() -> Self {
		Self::new(DEFAULT_READ_BUFFER)
	}
}

impl Multiplexer {
	/// Creates a multiplexer reading at most `read_buffer` bytes per event.
	pub fn new(read_buffer: usize) -> Self {
		let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
		Self {
			read_buffer: read_buffer.max(1),
			streams: Mutex::new(Streams::default()),
			events_tx,
			events_rx: Mutex::new(Some(events_rx)),
			registered: Notify::new(),
			shutdown: Notify::new(),
		}
	}

	/// Associates `handle` with `reader`. Each handle has at most one owner.
	pub fn register(&self, handle: StreamHandle, kind: StreamKind, reader: BoxedReader) -> Result<()> {
		let mut streams = self.streams.lock();
		if streams.entries.contains_key(&handle) {
			return Err(Error::HandleInUse(handle));
		}
		streams.next_generation += 1;
		let generation = streams.next_generation;
		streams.entries.insert(
			handle,
			Registration {
				kind,
				generation,
				reader: Some(reader),
				task: None,
				on_readable: None,
				on_closed: None,
			},
		);
		drop(streams);
		self.registered.notify_one();
		debug!(target: "conduit", %handle, ?kind, "stream registered");
		Ok(())
	}

	pub fn set_on_readable<F>(&self, handle: StreamHandle, callback: F) -> Result<()>
	where
		F: Fn(StreamHandle, &[u8]) -> SelectResponse + Send + Sync + 'static,
	{
		let mut streams = self.streams.lock();
		let entry = streams
			.entries
			.get_mut(&handle)
			.ok_or(Error::UnknownHandle(handle))?;
		entry.on_readable = Some(Arc::new(callback));
		Ok(())
	}

	pub fn set_on_closed<F>(&self, handle: StreamHandle, callback: F) -> Result<()>
	where
		F: Fn(StreamHandle) -> SelectResponse + Send + Sync + 'static,
	{
		let mut streams = self.streams.lock();
		let entry = streams
			.entries
			.get_mut(&handle)
			.ok_or(Error::UnknownHandle(handle))?;
		entry.on_closed = Some(Arc::new(callback));
		Ok(())
	}

	/// Drops the registration for `handle` and stops its reader.
	///
	/// Returns `false` if the handle was not registered.
	pub fn unregister(&self, handle: StreamHandle) -> bool {
		let removed = self.streams.lock().entries.shift_remove(&handle);
		match removed {
			Some(mut entry) => {
				entry.abort();
				debug!(target: "conduit", %handle, "stream unregistered");
				true
			}
			None => false,
		}
	}

	pub fn is_registered(&self, handle: StreamHandle) -> bool {
		self.streams.lock().entries.contains_key(&handle)
	}

	pub fn len(&self) -> usize {
		self.streams.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Asks a running (or about to run) loop to stop.
	pub fn shutdown(&self) {
		self.shutdown.notify_one();
	}

	/// Runs the dispatch loop until no streams remain or [`shutdown`](Self::shutdown) is called.
	///
	/// Must be called from within a tokio runtime. Can only be called once.
	pub async fn run(&self) -> Result<()> {
		let mut events = self.events_rx.lock().take().ok_or(Error::AlreadyRunning)?;

		loop {
			self.spawn_pending_readers();
			if self.is_empty() {
				debug!(target: "conduit", "no streams left, multiplexer stopping");
				break;
			}

			let event = tokio::select! {
				biased;
				_ = self.shutdown.notified() => {
					info!(target: "conduit", "multiplexer shutdown requested");
					break;
				}
				_ = self.registered.notified() => continue,
				event = events.recv() => event,
			};

			match event {
				Some(event) => self.dispatch(event),
				None => break,
			}
		}

		self.abort_readers();
		Ok(())
	}

	fn spawn_pending_readers(&self) {
		let mut streams = self.streams.lock();
		for (handle, entry) in streams.entries.iter_mut() {
			if let Some(reader) = entry.reader.take() {
				debug!(target: "conduit", %handle, kind = ?entry.kind, "reader started");
				entry.task = Some(tokio::spawn(read_stream(
					*handle,
					entry.generation,
					reader,
					self.read_buffer,
					self.events_tx.clone(),
				)));
			}
		}
	}

	fn dispatch(&self, event: StreamEvent) {
		match event {
			StreamEvent::Readable {
				handle,
				generation,
				data,
			} => {
				let callback = {
					let streams = self.streams.lock();
					match streams.entries.get(&handle) {
						Some(entry) if entry.generation == generation => entry.on_readable.clone(),
						_ => return,
					}
				};
				let response = match callback {
					Some(callback) => callback(handle, &data),
					None => {
						warn!(target: "conduit", %handle, bytes = data.len(), "no readable callback, dropping chunk");
						SelectResponse::Keep
					}
				};
				if response == SelectResponse::Remove {
					self.unregister_generation(handle, generation);
				}
			}
			StreamEvent::Closed { handle, generation } => {
				let callback = {
					let streams = self.streams.lock();
					match streams.entries.get(&handle) {
						Some(entry) if entry.generation == generation => entry.on_closed.clone(),
						_ => return,
					}
				};
				if let Some(callback) = callback {
					callback(handle);
				}
				self.unregister_generation(handle, generation);
			}
		}
	}

	fn unregister_generation(&self, handle: StreamHandle, generation: u64) {
		let mut streams = self.streams.lock();
		if streams
			.entries
			.get(&handle)
			.is_some_and(|entry| entry.generation == generation)
		{
			if let Some(mut entry) = streams.entries.shift_remove(&handle) {
				entry.abort();
			}
			debug!(target: "conduit", %handle, "stream removed");
		}
	}

	fn abort_readers(&self) {
		for entry in self.streams.lock().entries.values_mut() {
			entry.abort();
		}
	}
}

impl Drop for Multiplexer {
	fn drop(&mut self) {
		self.abort_readers();
	}
}

async fn read_stream(
	handle: StreamHandle,
	generation: u64,
	mut reader: BoxedReader,
	capacity: usize,
	events: mpsc::Sender<StreamEvent>,
) {
	let mut buf = vec![0u8; capacity];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => {
				debug!(target: "conduit", %handle, "stream reached EOF");
				break;
			}
			Ok(n) => {
				let event = StreamEvent::Readable {
					handle,
					generation,
					data: buf[..n].to_vec(),
				};
				if events.send(event).await.is_err() {
					return;
				}
			}
			Err(e) if e.kind() == ErrorKind::Interrupted => continue,
			Err(e) => {
				warn!(target: "conduit", %handle, error = %e, "stream read failed, treating as closed");
				break;
			}
		}
	}
	let _ = events.send(StreamEvent::Closed { handle, generation }).await;
}
