use clap::Parser;

use super::*;

#[test]
fn defaults() {
	let cli = Cli::try_parse_from(["conduit"]).unwrap();
	assert_eq!(cli.verbose, 0);
	assert_eq!(cli.read_buffer, DEFAULT_READ_BUFFER);
	assert_eq!(cli.first_session_id, 1);
	assert!(!cli.trace_messages);
}

#[test]
fn verbosity_counts() {
	let cli = Cli::try_parse_from(["conduit", "-vv"]).unwrap();
	assert_eq!(cli.verbose, 2);

	let cli = Cli::try_parse_from(["conduit", "-v", "--verbose", "-v"]).unwrap();
	assert_eq!(cli.verbose, 3);
}

#[test]
fn parses_tuning_flags() {
	let cli = Cli::try_parse_from([
		"conduit",
		"--read-buffer",
		"512",
		"--first-session-id",
		"4096",
		"--trace-messages",
	])
	.unwrap();

	let config = cli.app_config();
	assert_eq!(config.read_buffer, 512);
	assert_eq!(config.first_session_id, SessionId::new(4096));
	assert!(config.trace_messages);
}

#[test]
fn rejects_zero_read_buffer() {
	let err = Cli::try_parse_from(["conduit", "--read-buffer", "0"]).unwrap_err();
	assert!(err.to_string().contains("at least one byte"));
}

#[test]
fn rejects_out_of_range_session_id() {
	assert!(Cli::try_parse_from(["conduit", "--first-session-id", "65536"]).is_err());
	assert!(Cli::try_parse_from(["conduit", "--first-session-id", "-1"]).is_err());
}

#[test]
fn rejects_positional_arguments() {
	assert!(Cli::try_parse_from(["conduit", "extra"]).is_err());
}
