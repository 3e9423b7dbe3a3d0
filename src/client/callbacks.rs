use super::{ConnectionState, Message};
use crate::{packets::SubscribeFailed, PacketId, PacketType, QoS};
use std::{collections::HashMap, fmt};

/// A protocol event reported to the handler registered for its packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
	/// The session changed state. Reported through the
	/// [`Connect`](PacketType::Connect) slot.
	Connection(ConnectionState),
	/// A CONNACK arrived carrying the raw return code.
	ConnAck { code: u8 },
	/// A PUBLISH was sent.
	Publish { message: &'a Message },
	PubAck(PacketId),
	PubRec(PacketId),
	PubRel(PacketId),
	PubComp(PacketId),
	/// A SUBSCRIBE was sent.
	Subscribe {
		id: PacketId,
		topic: &'a str,
		qos: QoS,
	},
	SubAck {
		id: PacketId,
		result: &'a [Result<QoS, SubscribeFailed>],
	},
	/// An UNSUBSCRIBE was sent.
	Unsubscribe { id: PacketId, topic: &'a str },
	UnsubAck(PacketId),
	/// A PINGREQ was sent.
	PingReq,
	PingResp,
	/// A DISCONNECT was sent.
	Disconnect,
}

impl Event<'_> {
	/// The handler slot this event is dispatched to.
	pub fn packet_type(&self) -> PacketType {
		match self {
			Self::Connection(_) => PacketType::Connect,
			Self::ConnAck { .. } => PacketType::ConnAck,
			Self::Publish { .. } => PacketType::Publish,
			Self::PubAck(_) => PacketType::PubAck,
			Self::PubRec(_) => PacketType::PubRec,
			Self::PubRel(_) => PacketType::PubRel,
			Self::PubComp(_) => PacketType::PubComp,
			Self::Subscribe { .. } => PacketType::Subscribe,
			Self::SubAck { .. } => PacketType::SubAck,
			Self::Unsubscribe { .. } => PacketType::Unsubscribe,
			Self::UnsubAck(_) => PacketType::UnsubAck,
			Self::PingReq => PacketType::PingReq,
			Self::PingResp => PacketType::PingResp,
			Self::Disconnect => PacketType::Disconnect,
		}
	}

	/// The message identifier carried by the event, if any.
	pub fn id(&self) -> Option<PacketId> {
		match self {
			Self::Publish { message } => message.id,
			Self::PubAck(id)
			| Self::PubRec(id)
			| Self::PubRel(id)
			| Self::PubComp(id)
			| Self::UnsubAck(id)
			| Self::Subscribe { id, .. }
			| Self::SubAck { id, .. }
			| Self::Unsubscribe { id, .. } => Some(*id),
			_ => None,
		}
	}
}

pub type Handler = Box<dyn FnMut(&Event<'_>) + Send>;
pub type MessageHandler = Box<dyn FnMut(&Message) + Send>;

/// Handlers keyed by packet type, plus the application message handler.
///
/// Events for a slot without a handler are dropped.
#[derive(Default)]
pub struct Callbacks {
	handlers: HashMap<PacketType, Handler>,
	message: Option<MessageHandler>,
}

impl Callbacks {
	/// Registers `handler` for `packet_type`, returning the handler it
	/// replaces.
	pub fn set<F>(&mut self, packet_type: PacketType, handler: F) -> Option<Handler>
	where
		F: FnMut(&Event<'_>) + Send + 'static,
	{
		self.handlers.insert(packet_type, Box::new(handler))
	}

	pub fn clear(&mut self, packet_type: PacketType) -> Option<Handler> {
		self.handlers.remove(&packet_type)
	}

	pub fn set_message_handler<F>(&mut self, handler: F) -> Option<MessageHandler>
	where
		F: FnMut(&Message) + Send + 'static,
	{
		self.message.replace(Box::new(handler))
	}

	pub fn clear_message_handler(&mut self) -> Option<MessageHandler> {
		self.message.take()
	}

	/// Invokes the handler registered for the event's packet type.
	pub fn dispatch(&mut self, event: &Event<'_>) {
		let packet_type = event.packet_type();
		match self.handlers.get_mut(&packet_type) {
			Some(handler) => handler(event),
			None => tracing::trace!(%packet_type, "no handler registered"),
		}
	}

	/// Hands an inbound application message to the message handler.
	pub fn deliver(&mut self, message: &Message) {
		match self.message.as_mut() {
			Some(handler) => handler(message),
			None => tracing::trace!(topic = %message.topic, "no message handler registered"),
		}
	}
}

impl fmt::Debug for Callbacks {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut registered: Vec<_> = self.handlers.keys().collect();
		registered.sort();
		f.debug_struct("Callbacks")
			.field("registered", &registered)
			.field("message", &self.message.is_some())
			.finish()
	}
}
