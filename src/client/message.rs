use crate::{packets::Publish, PacketId, QoS};
use bytes::Bytes;

/// An application message, either published by the Client or received from
/// the Server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
	/// Message identifier.
	///
	/// `None` until the session assigns one for QoS 1 and 2 messages. Always
	/// `None` for QoS 0.
	pub id: Option<PacketId>,
	pub qos: QoS,
	/// Indicates whether the retain flag is set.
	pub retain: bool,
	/// Indicates whether this is a redelivery.
	pub duplicate: bool,
	/// Message topic.
	pub topic: String,
	/// Message payload.
	pub payload: Bytes,
}

impl Message {
	/// Creates a QoS 0 message with no flags set.
	///
	/// # Examples
	/// ```
	/// # use mqttc::{client::Message, QoS};
	/// let message = Message::new("sensors/1", "21.5").with_qos(QoS::AtLeastOnce);
	/// assert_eq!(message.id, None);
	/// assert_eq!(message.qos, QoS::AtLeastOnce);
	/// ```
	pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
		Self {
			id: None,
			qos: QoS::AtMostOnce,
			retain: false,
			duplicate: false,
			topic: topic.into(),
			payload: payload.into(),
		}
	}

	#[inline]
	pub fn with_qos(mut self, qos: QoS) -> Self {
		self.qos = qos;
		self
	}

	#[inline]
	pub fn with_retain(mut self, retain: bool) -> Self {
		self.retain = retain;
		self
	}

	/// Borrows the message as a [`Publish`] packet.
	///
	/// A QoS 1 or 2 message without an identifier is encoded at QoS 0, so
	/// identifiers must be assigned first.
	pub(crate) fn as_publish(&self) -> Publish<'_> {
		let Self {
			id,
			qos,
			retain,
			duplicate,
			topic,
			payload,
		} = self;

		match (qos, id) {
			(QoS::AtLeastOnce, Some(id)) => Publish::AtLeastOnce {
				id: *id,
				retain: *retain,
				duplicate: *duplicate,
				topic,
				payload: payload.clone(),
			},
			(QoS::ExactlyOnce, Some(id)) => Publish::ExactlyOnce {
				id: *id,
				retain: *retain,
				duplicate: *duplicate,
				topic,
				payload: payload.clone(),
			},
			_ => Publish::AtMostOnce {
				retain: *retain,
				topic,
				payload: payload.clone(),
			},
		}
	}
}

impl From<&Publish<'_>> for Message {
	fn from(publish: &Publish<'_>) -> Self {
		let (retain, duplicate) = publish.retain_and_duplicate();
		Self {
			id: publish.id(),
			qos: publish.qos(),
			retain,
			duplicate,
			topic: publish.topic().to_owned(),
			payload: publish.payload().clone(),
		}
	}
}
