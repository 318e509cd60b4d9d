use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the global subscriber. Always writes to stderr: stdout carries session data.
///
/// `RUST_LOG` takes precedence over `verbosity`.
pub fn init_logging(verbosity: u8) {
	// 0: faults only
	// 1 (-v): session created/destroyed, driver exits
	// 2 (-vv): attach/detach, buffering, stream lifecycle
	// 3+ (-vvv): every chunk and every bus publish
	let default_level = match verbosity {
		0 => "error",
		1 => "info",
		2 => "debug",
		_ => "trace",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr.with_max_level(tracing::Level::TRACE))
		.with_target(true)
		.compact()
		.init();
}
