#[cfg(test)]
mod tests;

use clap::{ArgAction, Parser};
use conduit_protocol::SessionId;
use conduit_runtime::multiplexer::DEFAULT_READ_BUFFER;

use crate::app::AppConfig;

#[derive(Parser, Debug)]
#[command(
	name = "conduit",
	about = "Bind this console to a conduit session",
	long_about = "Reads stdin and forwards it to a session, writing the session's output to stdout.\n\
		The process exits once stdin closes and the session has been torn down.",
	version
)]
pub struct Cli {
	/// Increase verbosity (-v lifecycle, -vv per message, -vvv everything)
	#[arg(short, long, global = true, action = ArgAction::Count)]
	pub verbose: u8,

	/// Maximum bytes taken from stdin per read
	#[arg(long, value_name = "BYTES", default_value_t = DEFAULT_READ_BUFFER, value_parser = parse_read_buffer)]
	pub read_buffer: usize,

	/// First id handed out by the session manager
	#[arg(long, value_name = "ID", default_value_t = 1)]
	pub first_session_id: u16,

	/// Print every bus message to stderr as a JSON line
	#[arg(long)]
	pub trace_messages: bool,
}

impl Cli {
	pub fn app_config(&self) -> AppConfig {
		AppConfig {
			read_buffer: self.read_buffer,
			first_session_id: SessionId::new(self.first_session_id),
			trace_messages: self.trace_messages,
		}
	}
}

fn parse_read_buffer(value: &str) -> Result<usize, String> {
	let bytes: usize = value.parse().map_err(|err| format!("{err}"))?;
	if bytes == 0 {
		return Err("read buffer must be at least one byte".to_string());
	}
	Ok(bytes)
}
