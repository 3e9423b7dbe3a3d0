use crate::{
	frame::Frame,
	packets::{
		ConnAck, Connect, DeserializeError, Disconnect, PingReq, PingResp, PubAck, PubComp, PubRec,
		PubRel, Publish, SerializePacket, SubAck, Subscribe, UnsubAck, Unsubscribe,
	},
	serde,
};
use bytes::BufMut;
use std::fmt;

/// A decoded MQTT control packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Packet<'a> {
	Connect(Box<Connect<'a>>),
	ConnAck(ConnAck),
	Publish(Publish<'a>),
	PubAck(PubAck),
	PubRec(PubRec),
	PubRel(PubRel),
	PubComp(PubComp),
	Subscribe(Subscribe<'a>),
	SubAck(SubAck),
	Unsubscribe(Unsubscribe<'a>),
	UnsubAck(UnsubAck),
	PingReq,
	PingResp,
	Disconnect,
}

/// The control packet type carried in the high nibble of the fixed header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PacketType {
	Connect = 1,
	ConnAck,
	Publish,
	PubAck,
	PubRec,
	PubRel,
	PubComp,
	Subscribe,
	SubAck,
	Unsubscribe,
	UnsubAck,
	PingReq,
	PingResp,
	Disconnect,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid packet type {0}")]
pub struct InvalidPacketType(pub u8);

impl PacketType {
	/// Every valid packet type, in wire order.
	pub const ALL: [Self; 14] = [
		Self::Connect,
		Self::ConnAck,
		Self::Publish,
		Self::PubAck,
		Self::PubRec,
		Self::PubRel,
		Self::PubComp,
		Self::Subscribe,
		Self::SubAck,
		Self::Unsubscribe,
		Self::UnsubAck,
		Self::PingReq,
		Self::PingResp,
		Self::Disconnect,
	];

	/// Extracts the packet type from a fixed header byte.
	///
	/// # Examples
	/// ```
	/// # use mqttc::PacketType;
	/// assert_eq!(PacketType::from_header(0x62).unwrap(), PacketType::PubRel);
	/// assert!(PacketType::from_header(0xf0).is_err());
	/// ```
	pub fn from_header(header: u8) -> Result<Self, DeserializeError> {
		Self::try_from(header >> 4).map_err(|_| DeserializeError::InvalidHeader(header))
	}

	/// The packet type shifted into the high nibble of a fixed header.
	#[inline]
	pub fn header_bits(self) -> u8 {
		(self as u8) << 4
	}

	/// The upper-case name of the packet type, e.g. `"PUBLISH"`.
	pub fn name(self) -> &'static str {
		match self {
			Self::Connect => "CONNECT",
			Self::ConnAck => "CONNACK",
			Self::Publish => "PUBLISH",
			Self::PubAck => "PUBACK",
			Self::PubRec => "PUBREC",
			Self::PubRel => "PUBREL",
			Self::PubComp => "PUBCOMP",
			Self::Subscribe => "SUBSCRIBE",
			Self::SubAck => "SUBACK",
			Self::Unsubscribe => "UNSUBSCRIBE",
			Self::UnsubAck => "UNSUBACK",
			Self::PingReq => "PINGREQ",
			Self::PingResp => "PINGRESP",
			Self::Disconnect => "DISCONNECT",
		}
	}
}

impl TryFrom<u8> for PacketType {
	type Error = InvalidPacketType;

	/// Converts a packet type value (1 to 14) into a [`PacketType`].
	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			1..=14 => Ok(Self::ALL[usize::from(value) - 1]),
			_ => Err(InvalidPacketType(value)),
		}
	}
}

impl fmt::Display for PacketType {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl<'a> Packet<'a> {
	/// Parses a [`Packet`] from a complete frame.
	///
	/// Header flags are only interpreted for PUBLISH packets.
	pub fn parse(frame: &'a Frame) -> Result<Self, DeserializeError> {
		let packet = match frame.packet_type()? {
			PacketType::Connect => Self::Connect(Box::new(frame.deserialize_packet()?)),
			PacketType::ConnAck => Self::ConnAck(frame.deserialize_packet()?),
			PacketType::Publish => Self::Publish(frame.deserialize_packet()?),
			PacketType::PubAck => Self::PubAck(frame.deserialize_packet()?),
			PacketType::PubRec => Self::PubRec(frame.deserialize_packet()?),
			PacketType::PubRel => Self::PubRel(frame.deserialize_packet()?),
			PacketType::PubComp => Self::PubComp(frame.deserialize_packet()?),
			PacketType::Subscribe => Self::Subscribe(frame.deserialize_packet()?),
			PacketType::SubAck => Self::SubAck(frame.deserialize_packet()?),
			PacketType::Unsubscribe => Self::Unsubscribe(frame.deserialize_packet()?),
			PacketType::UnsubAck => Self::UnsubAck(frame.deserialize_packet()?),
			PacketType::PingReq => PingReq::deserialize_from(frame)?.into(),
			PacketType::PingResp => PingResp::deserialize_from(frame)?.into(),
			PacketType::Disconnect => Disconnect::deserialize_from(frame)?.into(),
		};

		Ok(packet)
	}

	#[inline]
	pub fn packet_type(&self) -> PacketType {
		match self {
			Self::Connect(_) => PacketType::Connect,
			Self::ConnAck(_) => PacketType::ConnAck,
			Self::Publish(_) => PacketType::Publish,
			Self::PubAck(_) => PacketType::PubAck,
			Self::PubRec(_) => PacketType::PubRec,
			Self::PubRel(_) => PacketType::PubRel,
			Self::PubComp(_) => PacketType::PubComp,
			Self::Subscribe(_) => PacketType::Subscribe,
			Self::SubAck(_) => PacketType::SubAck,
			Self::Unsubscribe(_) => PacketType::Unsubscribe,
			Self::UnsubAck(_) => PacketType::UnsubAck,
			Self::PingReq => PacketType::PingReq,
			Self::PingResp => PacketType::PingResp,
			Self::Disconnect => PacketType::Disconnect,
		}
	}
}

impl SerializePacket for Packet<'_> {
	fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), serde::SerializeError> {
		match self {
			Self::Connect(connect) => connect.serialize_into(dst),
			Self::ConnAck(connack) => connack.serialize_into(dst),
			Self::Publish(publish) => publish.serialize_into(dst),
			Self::PubAck(puback) => puback.serialize_into(dst),
			Self::PubRec(pubrec) => pubrec.serialize_into(dst),
			Self::PubRel(pubrel) => pubrel.serialize_into(dst),
			Self::PubComp(pubcomp) => pubcomp.serialize_into(dst),
			Self::Subscribe(subscribe) => subscribe.serialize_into(dst),
			Self::SubAck(suback) => suback.serialize_into(dst),
			Self::Unsubscribe(unsubscribe) => unsubscribe.serialize_into(dst),
			Self::UnsubAck(unsuback) => unsuback.serialize_into(dst),
			Self::PingReq => PingReq.serialize_into(dst),
			Self::PingResp => PingResp.serialize_into(dst),
			Self::Disconnect => Disconnect.serialize_into(dst),
		}
	}
}

impl<'a> From<Connect<'a>> for Packet<'a> {
	#[inline]
	fn from(value: Connect<'a>) -> Self {
		Self::Connect(Box::new(value))
	}
}

impl<'a> From<ConnAck> for Packet<'a> {
	#[inline]
	fn from(value: ConnAck) -> Self {
		Self::ConnAck(value)
	}
}

impl<'a> From<Publish<'a>> for Packet<'a> {
	#[inline]
	fn from(value: Publish<'a>) -> Self {
		Self::Publish(value)
	}
}

impl<'a> From<Subscribe<'a>> for Packet<'a> {
	#[inline]
	fn from(value: Subscribe<'a>) -> Self {
		Self::Subscribe(value)
	}
}

impl<'a> From<SubAck> for Packet<'a> {
	#[inline]
	fn from(value: SubAck) -> Self {
		Self::SubAck(value)
	}
}

impl<'a> From<Unsubscribe<'a>> for Packet<'a> {
	#[inline]
	fn from(value: Unsubscribe<'a>) -> Self {
		Self::Unsubscribe(value)
	}
}
