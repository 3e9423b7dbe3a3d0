use crate::{client::ConnectionState, packets::DeserializeError, serde::SerializeError};
use std::io;

/// Errors surfaced by a [`Session`](crate::client::Session).
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("failed to resolve {host}:{port}: {source}")]
	AddressResolution {
		host: String,
		port: u16,
		#[source]
		source: io::Error,
	},

	#[error("failed to connect to {host}:{port}: {source}")]
	TransportConnect {
		host: String,
		port: u16,
		#[source]
		source: io::Error,
	},

	#[error("malformed frame: {0}")]
	MalformedFrame(#[from] DeserializeError),

	#[error("connection refused by server: {}", reject_reason(.0))]
	ProtocolReject(u8),

	#[error("read from transport failed: {0}")]
	TransportRead(#[source] io::Error),

	#[error("write to transport failed: {0}")]
	TransportWrite(#[source] io::Error),

	#[error("cannot move from {from:?} to {to:?}")]
	InvalidTransition {
		from: ConnectionState,
		to: ConnectionState,
	},

	#[error("session is not connected")]
	NotConnected,

	#[error("every message identifier is awaiting an acknowledgement")]
	IdsExhausted,

	#[error("failed to encode packet: {0}")]
	Serialize(#[from] SerializeError),
}

impl Error {
	/// Returns `true` if the session can not continue after this error.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			Self::MalformedFrame(_) | Self::TransportRead(_) | Self::TransportWrite(_)
		)
	}
}

fn reject_reason(code: &u8) -> String {
	match crate::packets::ConnectReturnCode::from_u8(*code) {
		Some(code) => code.description().to_string(),
		None => format!("unknown return code {code}"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reject_messages() {
		assert_eq!(
			Error::ProtocolReject(5).to_string(),
			"connection refused by server: not authorized"
		);
		assert_eq!(
			Error::ProtocolReject(9).to_string(),
			"connection refused by server: unknown return code 9"
		);
	}

	#[test]
	fn fatal_errors() {
		assert!(Error::MalformedFrame(DeserializeError::MalformedLength).is_fatal());
		assert!(Error::TransportRead(io::ErrorKind::ConnectionReset.into()).is_fatal());
		assert!(!Error::NotConnected.is_fatal());
		assert!(!Error::ProtocolReject(2).is_fatal());
	}
}
