//! Owning context for one console run.
//!
//! Builds the bus, the multiplexer and the supervisor, attaches the loopback
//! session manager and the console driver, then publishes START and drives
//! the multiplexer until a driver reports that it is done.

use std::sync::Arc;

use anyhow::Context;
use conduit_protocol::{Message, SessionId};
use conduit_runtime::multiplexer::DEFAULT_READ_BUFFER;
use conduit_runtime::{
	ConsoleDriver, ConsoleStreams, DriverExit, LoopbackSessions, MessageBus, Multiplexer, Supervisor,
};
use tracing::{debug, info};

use crate::error::Result;
use crate::tap::{BoxedWriter, MessageTap};

#[derive(Debug, Clone)]
pub struct AppConfig {
	pub read_buffer: usize,
	pub first_session_id: SessionId,
	pub trace_messages: bool,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			read_buffer: DEFAULT_READ_BUFFER,
			first_session_id: SessionId::new(1),
			trace_messages: false,
		}
	}
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
	/// Every stream was released without any driver reporting an exit.
	Drained,
	/// A driver reported that it is done; the process should terminate.
	DriverExited(DriverExit),
}

impl RunOutcome {
	pub fn exit_code(&self) -> i32 {
		match self {
			Self::Drained => 0,
			Self::DriverExited(_) => 1,
		}
	}
}

pub struct App {
	bus: Arc<MessageBus>,
	multiplexer: Arc<Multiplexer>,
	supervisor: Supervisor,
	sessions: Arc<LoopbackSessions>,
	console: Arc<ConsoleDriver>,
	tap: Option<MessageTap>,
}

impl App {
	/// Binds the console driver to the process's stdin and stdout.
	pub fn new(config: &AppConfig) -> Result<Self> {
		let tap_out: BoxedWriter = Box::new(std::io::stderr());
		Self::with_streams(config, ConsoleStreams::stdio(), tap_out)
	}

	pub fn with_streams(config: &AppConfig, streams: ConsoleStreams, tap_out: BoxedWriter) -> Result<Self> {
		let bus = Arc::new(MessageBus::new());
		let multiplexer = Arc::new(Multiplexer::new(config.read_buffer));
		let (supervisor, exits) = Supervisor::new();

		let tap = config.trace_messages.then(|| MessageTap::attach(&bus, tap_out));
		let sessions = LoopbackSessions::attach(&bus, config.first_session_id);
		let handle = streams.handle;
		let console = ConsoleDriver::with_streams(&multiplexer, Arc::clone(&bus), exits, streams)
			.with_context(|| format!("attaching console driver to stream {handle}"))?;
		if let Some(tap) = &tap {
			tap.record_replies(&bus);
		}

		debug!(target: "conduit", read_buffer = config.read_buffer, first_session_id = %config.first_session_id, "app assembled");
		Ok(Self {
			bus,
			multiplexer,
			supervisor,
			sessions,
			console,
			tap,
		})
	}

	pub fn console(&self) -> &Arc<ConsoleDriver> {
		&self.console
	}

	pub fn sessions(&self) -> &Arc<LoopbackSessions> {
		&self.sessions
	}

	/// Publishes START, then runs until a driver exits or every stream is gone.
	pub async fn run(mut self) -> Result<RunOutcome> {
		self.bus.publish(&Message::Start);

		let multiplexer = Arc::clone(&self.multiplexer);
		let first = tokio::select! {
			exit = self.supervisor.next_exit() => exit,
			result = multiplexer.run() => {
				result?;
				None
			}
		};
		let exit = first.or_else(|| self.supervisor.try_next_exit());

		self.shutdown();
		let outcome = match exit {
			Some(exit) => {
				info!(target: "conduit", handle = %exit.handle, reason = %exit.reason, "driver exited");
				RunOutcome::DriverExited(exit)
			}
			None => RunOutcome::Drained,
		};
		Ok(outcome)
	}

	fn shutdown(&mut self) {
		self.console.close();
		self.multiplexer.shutdown();
		self.sessions.detach(&self.bus);
		if let Some(tap) = self.tap.take() {
			tap.detach(&self.bus);
		}
	}
}

#[cfg(test)]
mod tests {
	use conduit_runtime::testing::MemorySink;
	use conduit_runtime::{ExitReason, Phase, StreamHandle, StreamKind};
	use tokio::io::AsyncWriteExt;

	use super::*;

	fn duplex_streams(sink: &MemorySink) -> (ConsoleStreams, tokio::io::DuplexStream) {
		let (reader, writer) = tokio::io::duplex(256);
		let streams = ConsoleStreams {
			handle: StreamHandle::new(3),
			kind: StreamKind::Stream,
			reader: Box::new(reader),
			sink: Box::new(sink.clone()),
		};
		(streams, writer)
	}

	#[tokio::test]
	async fn test_echo_until_input_closes() {
		let sink = MemorySink::new();
		let (streams, mut writer) = duplex_streams(&sink);
		let app = App::with_streams(&AppConfig::default(), streams, Box::new(std::io::sink())).unwrap();
		let console = Arc::clone(app.console());
		let sessions = Arc::clone(app.sessions());

		writer.write_all(b"hello\n").await.unwrap();
		drop(writer);

		let outcome = app.run().await.unwrap();
		assert_eq!(outcome.exit_code(), 1);
		match outcome {
			RunOutcome::DriverExited(exit) => {
				assert_eq!(exit.handle, StreamHandle::new(3));
				assert!(matches!(exit.reason, ExitReason::SessionDestroyed(id) if id == SessionId::new(1)));
			}
			RunOutcome::Drained => panic!("expected a driver exit"),
		}
		assert_eq!(sink.contents(), b"hello\n");
		assert_eq!(console.phase(), Phase::Closed);
		assert_eq!(sessions.created(), 1);
		assert!(sessions.live_sessions().is_empty());
	}

	#[tokio::test]
	async fn test_first_session_id_is_configurable() {
		let sink = MemorySink::new();
		let (streams, writer) = duplex_streams(&sink);
		let config = AppConfig {
			first_session_id: SessionId::new(0x4242),
			..AppConfig::default()
		};
		let app = App::with_streams(&config, streams, Box::new(std::io::sink())).unwrap();
		let console = Arc::clone(app.console());
		drop(writer);

		let outcome = app.run().await.unwrap();
		assert!(matches!(
			outcome,
			RunOutcome::DriverExited(DriverExit {
				reason: ExitReason::SessionDestroyed(id),
				..
			}) if id == SessionId::new(0x4242)
		));
		assert_eq!(console.session_id(), Some(SessionId::new(0x4242)));
	}

	#[tokio::test]
	async fn test_trace_messages_records_lifecycle() {
		let sink = MemorySink::new();
		let tap = MemorySink::new();
		let (streams, mut writer) = duplex_streams(&sink);
		let config = AppConfig {
			trace_messages: true,
			..AppConfig::default()
		};
		let app = App::with_streams(&config, streams, Box::new(tap.clone())).unwrap();

		writer.write_all(b"abc").await.unwrap();
		drop(writer);
		app.run().await.unwrap();

		let records: Vec<serde_json::Value> = String::from_utf8(tap.contents())
			.unwrap()
			.lines()
			.map(|line| serde_json::from_str(line).unwrap())
			.collect();
		let kinds: Vec<&str> = records
			.iter()
			.map(|record| record["kind"].as_str().unwrap())
			.collect();
		assert_eq!(
			kinds,
			["START", "CREATE_SESSION", "DATA_IN", "DATA_OUT", "DESTROY_SESSION"]
		);
		assert!(records[0].get("session_id").is_none());
		for record in &records[1..] {
			assert_eq!(record["session_id"], 1, "record: {record}");
		}
	}

	#[tokio::test]
	async fn test_small_read_buffer_preserves_bytes() {
		let sink = MemorySink::new();
		let (streams, mut writer) = duplex_streams(&sink);
		let config = AppConfig {
			read_buffer: 3,
			..AppConfig::default()
		};
		let app = App::with_streams(&config, streams, Box::new(std::io::sink())).unwrap();

		writer.write_all(b"abcdefghij").await.unwrap();
		drop(writer);
		app.run().await.unwrap();

		assert_eq!(sink.contents(), b"abcdefghij");
		assert!(sink.write_calls() >= 4);
	}
}
