use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConduitError>;

#[derive(Debug, Error)]
pub enum ConduitError {
	#[error("runtime error: {0}")]
	Runtime(#[from] conduit_runtime::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}
