//! Session identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a session, minted by the session manager.
///
/// Opaque to drivers: they only store it and compare it against the id carried
/// by incoming messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u16);

impl SessionId {
	pub const fn new(raw: u16) -> Self {
		Self(raw)
	}

	/// Returns the id following this one, wrapping at `u16::MAX`.
	pub const fn next(self) -> Self {
		Self(self.0.wrapping_add(1))
	}
}

impl From<u16> for SessionId {
	fn from(raw: u16) -> Self {
		Self(raw)
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#06x}", self.0)
	}
}
