use crate::{PacketId, QoS};
use bytes::Bytes;
use std::ops;

/// Will Message
///
/// The will message is set by the Client when it connects to the Server. If the
/// Client disconnects abnormally, the Server publishes the will message to the
/// topic on behalf of the Client, with the Will QoS and Retain flags as
/// specified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Will {
	/// The topic to publish the will message to.
	pub topic: String,

	/// The message to publish as the will.
	pub payload: Bytes,

	/// The quality of service to publish the will message at.
	pub qos: QoS,

	/// Whether or not the will message should be retained.
	pub retain: bool,
}

impl Will {
	/// Creates a new Will.
	///
	/// # Examples
	/// ```
	/// # use mqttc::{misc::Will, QoS};
	/// let will = Will::new("clients/abc/status", "offline", QoS::AtLeastOnce, true);
	/// assert_eq!(will.topic, "clients/abc/status");
	/// assert_eq!(&will.payload[..], b"offline");
	/// ```
	pub fn new(
		topic: impl Into<String>,
		payload: impl Into<Bytes>,
		qos: QoS,
		retain: bool,
	) -> Self {
		Self {
			topic: topic.into(),
			payload: payload.into(),
			qos,
			retain,
		}
	}
}

/// A message identifier counter which skips 0 when it wraps.
#[derive(Debug)]
pub(crate) struct WrappingNonZeroU16(PacketId);

impl WrappingNonZeroU16 {
	pub const MAX: Self = Self(PacketId::MAX);

	#[inline]
	pub fn get(&self) -> PacketId {
		let Self(inner) = self;
		*inner
	}
}

impl Default for WrappingNonZeroU16 {
	#[inline]
	fn default() -> Self {
		Self(PacketId::MIN)
	}
}

impl ops::AddAssign<u16> for WrappingNonZeroU16 {
	#[inline]
	fn add_assign(&mut self, rhs: u16) {
		let Self(inner) = self;
		*inner = inner.checked_add(rhs).unwrap_or(PacketId::MIN);
	}
}
