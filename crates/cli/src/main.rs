use clap::Parser;
use conduit_cli::app::{App, RunOutcome};
use conduit_cli::cli::Cli;
use conduit_cli::logging;
use conduit_runtime::ExitReason;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let code = match run(&cli).await {
		Ok(RunOutcome::Drained) => 0,
		Ok(RunOutcome::DriverExited(exit)) => {
			if let ExitReason::Fault(fault) = &exit.reason {
				error!(target: "conduit", handle = %exit.handle, "{fault}");
			}
			eprintln!("Pipe broken [stdin]...");
			RunOutcome::DriverExited(exit).exit_code()
		}
		Err(err) => {
			eprintln!("Error: {err:#}");
			1
		}
	};

	// Exit explicitly: a pending blocking read on stdin would otherwise hold the runtime open.
	std::process::exit(code);
}

async fn run(cli: &Cli) -> conduit_cli::error::Result<RunOutcome> {
	let app = App::new(&cli.app_config())?;
	app.run().await
}
