use crate::{
	bytes_reader::Cursor, frame::Frame, misc::Will, serde, InvalidQoS, Packet, PacketId,
	PacketType, QoS,
};
use bytes::{BufMut, Bytes, BytesMut};
use std::{fmt, str::Utf8Error};

/// The protocol name sent in [`Connect`] packets.
pub const PROTOCOL_NAME: &str = "MQIsdp";

/// The protocol level sent in [`Connect`] packets.
pub const PROTOCOL_LEVEL: u8 = 3;

pub trait SerializePacket {
	/// Serializes the packet into the provided [`BufMut`] implementation.
	fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), serde::SerializeError>;

	/// Serializes the packet onto the end of `dst`, growing it as required.
	fn serialize_to_bytes(&self, dst: &mut BytesMut) -> Result<(), serde::SerializeError> {
		self.serialize_into(dst)
	}

	/// Serializes the packet into a new [`Bytes`].
	fn to_bytes(&self) -> Result<Bytes, serde::SerializeError> {
		let mut buffer = BytesMut::new();
		self.serialize_to_bytes(&mut buffer)?;
		Ok(buffer.freeze())
	}
}

pub trait DeserializePacket<'a>: Sized {
	fn deserialize_from(frame: &'a Frame) -> Result<Self, DeserializeError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscribeFailed;

/// The return codes a Server may send in a [`ConnAck`] packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
	Accepted = 0,
	UnacceptableProtocolVersion,
	IdentifierRejected,
	ServerUnavailable,
	BadUsernameOrPassword,
	NotAuthorized,
}

impl ConnectReturnCode {
	pub fn from_u8(code: u8) -> Option<Self> {
		match code {
			0 => Some(Self::Accepted),
			1 => Some(Self::UnacceptableProtocolVersion),
			2 => Some(Self::IdentifierRejected),
			3 => Some(Self::ServerUnavailable),
			4 => Some(Self::BadUsernameOrPassword),
			5 => Some(Self::NotAuthorized),
			_ => None,
		}
	}

	pub fn description(self) -> &'static str {
		match self {
			Self::Accepted => "connection accepted",
			Self::UnacceptableProtocolVersion => "unacceptable protocol version",
			Self::IdentifierRejected => "identifier rejected",
			Self::ServerUnavailable => "server unavailable",
			Self::BadUsernameOrPassword => "bad user name or password",
			Self::NotAuthorized => "not authorized",
		}
	}
}

//
// Packet Types
//

/// A `Connect` packet is sent by the Client to the Server to initialise a
/// session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connect<'a> {
	/// Protocol name. Should always be `"MQIsdp"`.
	pub protocol_name: &'a str,

	/// Protocol version.
	pub protocol_level: u8,

	/// Client ID. May be empty.
	pub client_id: &'a str,

	/// Keep-alive timeout in seconds.
	pub keep_alive: u16,

	/// Request a clean session.
	pub clean_session: bool,

	/// Last will and testament for the Client.
	pub will: Option<Will>,

	pub username: Option<&'a str>,
	pub password: Option<&'a str>,
}

/// A ConnAck packet is sent by the Server to the Client in response to a
/// [`Connect`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnAck {
	/// Raw return code. 0 means the connection was accepted.
	pub code: u8,
}

/// A Publish packet can be sent by either the Client or the Server.
#[derive(Clone, PartialEq, Eq)]
pub enum Publish<'a> {
	AtMostOnce {
		retain: bool,
		topic: &'a str,
		payload: Bytes,
	},
	AtLeastOnce {
		id: PacketId,
		retain: bool,
		duplicate: bool,
		topic: &'a str,
		payload: Bytes,
	},
	ExactlyOnce {
		id: PacketId,
		retain: bool,
		duplicate: bool,
		topic: &'a str,
		payload: Bytes,
	},
}

id_packet!(PubAck, Packet::PubAck, 0x40, "PubAck");
id_packet!(PubRec, Packet::PubRec, 0x50, "PubRec");
id_packet!(PubRel, Packet::PubRel, 0x62, "PubRel");
id_packet!(PubComp, Packet::PubComp, 0x70, "PubComp");

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscribe<'a> {
	pub id: PacketId,
	pub topics: Vec<(&'a str, QoS)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubAck {
	pub id: PacketId,
	pub result: Vec<Result<QoS, SubscribeFailed>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unsubscribe<'a> {
	pub id: PacketId,
	pub topics: Vec<&'a str>,
}

id_packet!(UnsubAck, Packet::UnsubAck, 0xb0, "UnsubAck");
nul_packet!(PingReq, Packet::PingReq, 0xc0);
nul_packet!(PingResp, Packet::PingResp, 0xd0);
nul_packet!(Disconnect, Packet::Disconnect, 0xe0);

mod connect {
	use super::*;

	const CLEAN_SESSION: u8 = 0x02;
	const WILL: u8 = 0x04;
	const WILL_QOS_SHIFT: u8 = 3;
	const WILL_QOS_MASK: u8 = 0x18;
	const WILL_RETAIN: u8 = 0x20;
	const PASSWORD: u8 = 0x40;
	const USERNAME: u8 = 0x80;

	impl<'a> Default for Connect<'a> {
		fn default() -> Self {
			Self {
				protocol_name: PROTOCOL_NAME,
				protocol_level: PROTOCOL_LEVEL,
				client_id: "",
				keep_alive: 0,
				clean_session: true,
				will: None,
				username: None,
				password: None,
			}
		}
	}

	impl<'a> Connect<'a> {
		pub fn deserialize_from(frame: &'a Frame) -> Result<Self, DeserializeError> {
			let mut cursor = Cursor::from_frame(frame);
			let protocol_name = match cursor.take_str()? {
				PROTOCOL_NAME => PROTOCOL_NAME,
				_ => {
					return Err(DeserializeError::MalformedPacket("invalid protocol name"));
				}
			};

			let protocol_level = cursor.take_u8()?;
			let flags = cursor.take_u8()?;
			let keep_alive = cursor.take_u16()?;
			let client_id = cursor.take_str()?;

			let clean_session = flags & CLEAN_SESSION == CLEAN_SESSION;
			let will = if flags & WILL == WILL {
				let topic = cursor.take_str()?;
				let payload = cursor.take_prefixed()?;
				let qos = ((flags & WILL_QOS_MASK) >> WILL_QOS_SHIFT).try_into()?;
				let retain = flags & WILL_RETAIN == WILL_RETAIN;
				Some(Will::new(topic, Bytes::copy_from_slice(payload), qos, retain))
			} else {
				None
			};

			let username = if flags & USERNAME == USERNAME {
				Some(cursor.take_str()?)
			} else {
				None
			};

			let password = if flags & PASSWORD == PASSWORD {
				Some(cursor.take_str()?)
			} else {
				None
			};

			if cursor.has_remaining() {
				return Err(DeserializeError::MalformedPacket(
					"trailing bytes after Connect payload",
				));
			}

			Ok(Self {
				protocol_name,
				protocol_level,
				client_id,
				keep_alive,
				clean_session,
				will,
				username,
				password,
			})
		}

		pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), serde::SerializeError> {
			// Write the packet type and length.
			serde::put_u8(dst, 0x10)?;
			serde::put_var(dst, self.payload_len())?;

			// Write the protocol name and level.
			serde::put_str(dst, self.protocol_name)?;
			serde::put_u8(dst, self.protocol_level)?;

			// Write the flags and keep alive.
			serde::put_u8(dst, self.flags())?;
			serde::put_u16(dst, self.keep_alive)?;

			serde::put_str(dst, self.client_id)?;

			if let Some(will) = &self.will {
				serde::put_str(dst, &will.topic)?;
				serde::put_prefixed(dst, &will.payload)?;
			}

			if let Some(username) = self.username {
				serde::put_str(dst, username)?;
			}

			if let Some(password) = self.password {
				serde::put_str(dst, password)?;
			}

			Ok(())
		}

		#[inline(always)]
		fn payload_len(&self) -> usize {
			let mut len = 2 + self.protocol_name.len() + 4 + (2 + self.client_id.len());

			if let Some(will) = &self.will {
				len += 2 + will.topic.len() + 2 + will.payload.len();
			}

			if let Some(username) = self.username {
				len += 2 + username.len();
			}

			if let Some(password) = self.password {
				len += 2 + password.len();
			}

			len
		}

		fn flags(&self) -> u8 {
			let mut flags = 0;

			if self.clean_session {
				flags |= CLEAN_SESSION;
			}

			if let Some(will) = &self.will {
				flags |= WILL;
				flags |= (will.qos as u8) << WILL_QOS_SHIFT;
				if will.retain {
					flags |= WILL_RETAIN;
				}
			}

			if self.username.is_some() {
				flags |= USERNAME;
			}

			if self.password.is_some() {
				flags |= PASSWORD;
			}

			flags
		}
	}
}

impl ConnAck {
	pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
		let mut cursor = Cursor::from_frame(frame);

		if cursor.remaining() != 2 {
			return Err(DeserializeError::MalformedPacket(
				"ConnAck packet must have length 2",
			));
		}

		// The first byte is reserved in MQTT 3.1.
		let _reserved = cursor.take_u8()?;
		let code = cursor.take_u8()?;

		Ok(Self { code })
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), serde::SerializeError> {
		serde::put_u8(dst, 0x20)?;
		serde::put_var(dst, 2)?;
		serde::put_u8(dst, 0x00)?;
		serde::put_u8(dst, self.code)?;
		Ok(())
	}

	#[inline]
	pub fn is_accepted(&self) -> bool {
		self.code == ConnectReturnCode::Accepted as u8
	}

	#[inline]
	pub fn return_code(&self) -> Option<ConnectReturnCode> {
		ConnectReturnCode::from_u8(self.code)
	}
}

const PUBLISH_HEADER_CONTROL: u8 = 0x30;
const PUBLISH_HEADER_RETAIN_FLAG: u8 = 0x01;
const PUBLISH_HEADER_DUPLICATE_FLAG: u8 = 0x08;
const PUBLISH_HEADER_QOS_MASK: u8 = 0x06;

impl<'a> Publish<'a> {
	pub fn deserialize_from(frame: &'a Frame) -> Result<Self, DeserializeError> {
		// Extract properties from the header flags.
		let flags = frame.flags();
		let retain = flags & PUBLISH_HEADER_RETAIN_FLAG == PUBLISH_HEADER_RETAIN_FLAG;
		let duplicate = flags & PUBLISH_HEADER_DUPLICATE_FLAG == PUBLISH_HEADER_DUPLICATE_FLAG;
		let qos: QoS = ((flags & PUBLISH_HEADER_QOS_MASK) >> 1).try_into()?;

		let mut cursor = Cursor::from_frame(frame);
		let topic = cursor.take_str()?;

		// The interpretation of the remaining bytes depends on the QoS.
		match qos {
			QoS::AtMostOnce => {
				if duplicate {
					return Err(DeserializeError::MalformedPacket(
						"duplicate flag must be 0 for Publish packets with QoS of AtMostOnce",
					));
				}

				Ok(Self::AtMostOnce {
					retain,
					topic,
					payload: frame.payload.slice(cursor.position()..),
				})
			}
			QoS::AtLeastOnce => {
				let id = cursor.take_id()?;
				Ok(Self::AtLeastOnce {
					id,
					retain,
					duplicate,
					topic,
					payload: frame.payload.slice(cursor.position()..),
				})
			}
			QoS::ExactlyOnce => {
				let id = cursor.take_id()?;
				Ok(Self::ExactlyOnce {
					id,
					retain,
					duplicate,
					topic,
					payload: frame.payload.slice(cursor.position()..),
				})
			}
		}
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), serde::SerializeError> {
		let topic = self.topic();
		let payload = self.payload();
		let id = self.id();
		let id_len = if id.is_some() { 2 } else { 0 };

		serde::put_u8(dst, self.header())?;
		serde::put_var(dst, 2 + topic.len() + id_len + payload.len())?;
		serde::put_str(dst, topic)?;
		if let Some(id) = id {
			serde::put_u16(dst, id.get())?;
		}
		serde::put_slice(dst, payload)?;

		Ok(())
	}

	/// The fixed header byte, with the QoS, DUP and RETAIN bits.
	pub fn header(&self) -> u8 {
		let (retain, duplicate) = self.retain_and_duplicate();
		let mut header = PUBLISH_HEADER_CONTROL | (self.qos() as u8) << 1;
		if retain {
			header |= PUBLISH_HEADER_RETAIN_FLAG;
		}
		if duplicate {
			header |= PUBLISH_HEADER_DUPLICATE_FLAG;
		}
		header
	}

	#[inline]
	pub fn topic(&self) -> &'a str {
		match self {
			Self::AtMostOnce { topic, .. }
			| Self::AtLeastOnce { topic, .. }
			| Self::ExactlyOnce { topic, .. } => topic,
		}
	}

	#[inline]
	pub fn payload(&self) -> &Bytes {
		match self {
			Self::AtMostOnce { payload, .. }
			| Self::AtLeastOnce { payload, .. }
			| Self::ExactlyOnce { payload, .. } => payload,
		}
	}

	#[inline]
	pub fn qos(&self) -> QoS {
		match self {
			Self::AtMostOnce { .. } => QoS::AtMostOnce,
			Self::AtLeastOnce { .. } => QoS::AtLeastOnce,
			Self::ExactlyOnce { .. } => QoS::ExactlyOnce,
		}
	}

	/// The message identifier. Always `None` at QoS 0.
	#[inline]
	pub fn id(&self) -> Option<PacketId> {
		match self {
			Self::AtMostOnce { .. } => None,
			Self::AtLeastOnce { id, .. } | Self::ExactlyOnce { id, .. } => Some(*id),
		}
	}

	/// The RETAIN and DUP flags. DUP is never set at QoS 0.
	pub(crate) fn retain_and_duplicate(&self) -> (bool, bool) {
		match self {
			Self::AtMostOnce { retain, .. } => (*retain, false),
			Self::AtLeastOnce {
				retain, duplicate, ..
			}
			| Self::ExactlyOnce {
				retain, duplicate, ..
			} => (*retain, *duplicate),
		}
	}
}

impl fmt::Debug for Publish<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Publish")
			.field("header", &format_args!("{:#04x}", self.header()))
			.field("id", &self.id())
			.field("topic", &self.topic())
			.field("payload_len", &self.payload().len())
			.finish()
	}
}

impl<'a> Subscribe<'a> {
	/// Parses the payload of a [`Subscribe`] packet.
	pub fn deserialize_from(frame: &'a Frame) -> Result<Self, DeserializeError> {
		let mut cursor = Cursor::from_frame(frame);

		let id = cursor.take_id()?;
		let mut topics = Vec::new();
		while cursor.has_remaining() {
			let topic = cursor.take_str()?;
			let qos = cursor.take_u8()?.try_into()?;
			topics.push((topic, qos));
		}

		if topics.is_empty() {
			return Err(DeserializeError::MalformedPacket(
				"Subscribe packet must contain at least one topic",
			));
		}

		Ok(Self { id, topics })
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), serde::SerializeError> {
		let Self { id, topics } = self;
		serde::put_u8(dst, 0x82)?;

		let len = 2 + topics
			.iter()
			.fold(0usize, |acc, (topic, _)| acc + 3 + topic.len());

		serde::put_var(dst, len)?;
		serde::put_u16(dst, id.get())?;
		for (topic, qos) in topics {
			serde::put_str(dst, topic)?;
			serde::put_u8(dst, *qos as u8)?;
		}

		Ok(())
	}
}

impl SubAck {
	pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
		let mut cursor = Cursor::from_frame(frame);
		let id = cursor.take_id()?;

		let mut result = Vec::new();
		while cursor.has_remaining() {
			let return_code = cursor.take_u8()?;
			let qos = match QoS::try_from(return_code) {
				Ok(qos) => Ok(qos),
				Err(_) if return_code == 0x80 => Err(SubscribeFailed),
				Err(_) => {
					return Err(DeserializeError::MalformedPacket(
						"invalid return code in SubAck",
					));
				}
			};

			result.push(qos);
		}

		if result.is_empty() {
			return Err(DeserializeError::MalformedPacket(
				"SubAck packet must contain at least one return code",
			));
		}

		Ok(Self { id, result })
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), serde::SerializeError> {
		let Self { id, result } = self;
		serde::put_u8(dst, 0x90)?;
		serde::put_var(dst, 2 + result.len())?;
		serde::put_u16(dst, id.get())?;
		for qos in result {
			serde::put_u8(dst, qos.as_ref().map(|qos| *qos as u8).unwrap_or(0x80))?;
		}

		Ok(())
	}
}

impl<'a> Unsubscribe<'a> {
	/// Deserializes an [`Unsubscribe`] packet.
	pub fn deserialize_from(frame: &'a Frame) -> Result<Self, DeserializeError> {
		let mut cursor = Cursor::from_frame(frame);

		let id = cursor.take_id()?;

		let mut topics = Vec::new();
		while cursor.has_remaining() {
			topics.push(cursor.take_str()?);
		}

		if topics.is_empty() {
			return Err(DeserializeError::MalformedPacket(
				"Unsubscribe packet must contain at least one topic",
			));
		}

		Ok(Self { id, topics })
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), serde::SerializeError> {
		let Self { id, topics } = self;
		serde::put_u8(dst, 0xa2)?;

		let len = 2 + topics
			.iter()
			.fold(0usize, |acc, topic| acc + 2 + topic.len());

		serde::put_var(dst, len)?;
		serde::put_u16(dst, id.get())?;
		for topic in topics {
			serde::put_str(dst, topic)?;
		}

		Ok(())
	}
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeserializeError {
	#[error("more bytes are required to complete the frame")]
	Incomplete,
	#[error("packet body is shorter than its fields")]
	Truncated,
	#[error(transparent)]
	InvalidQoS(#[from] InvalidQoS),
	#[error("invalid fixed header {0:#04x}")]
	InvalidHeader(u8),
	#[error("message identifier must not be 0")]
	ZeroPacketId,
	#[error("remaining length field is longer than 4 bytes")]
	MalformedLength,
	#[error("remaining length declares {declared} bytes but {actual} are present")]
	LengthMismatch { declared: usize, actual: usize },
	#[error("malformed packet: {0}")]
	MalformedPacket(&'static str),
	#[error("unexpected {0} packet from server")]
	UnexpectedPacket(PacketType),
	#[error(transparent)]
	Utf8Error(#[from] Utf8Error),
}

macro_rules! impl_serde {
	($name:tt) => {
		impl SerializePacket for $name {
			fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), serde::SerializeError> {
				Self::serialize_into(&self, dst)
			}
		}

		impl<'a> DeserializePacket<'a> for $name {
			fn deserialize_from(frame: &'a Frame) -> Result<Self, DeserializeError> {
				Self::deserialize_from(frame)
			}
		}
	};
	($name:tt,$a:tt) => {
		impl<$a> SerializePacket for $name<$a> {
			fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), serde::SerializeError> {
				Self::serialize_into(&self, dst)
			}
		}

		impl<$a> DeserializePacket<$a> for $name<$a> {
			fn deserialize_from(frame: &$a Frame) -> Result<Self, DeserializeError> {
				Self::deserialize_from(frame)
			}
		}
	};
}

impl_serde!(Connect, 'a);
impl_serde!(ConnAck);
impl_serde!(Publish, 'a);
impl_serde!(PubAck);
impl_serde!(PubRec);
impl_serde!(PubRel);
impl_serde!(PubComp);
impl_serde!(Subscribe, 'a);
impl_serde!(SubAck);
impl_serde!(Unsubscribe, 'a);
impl_serde!(UnsubAck);
impl_serde!(PingReq);
impl_serde!(PingResp);
impl_serde!(Disconnect);

macro_rules! id_packet {
	($name:tt,$variant:expr,$header:literal,$label:literal) => {
		#[derive(Clone, Debug, PartialEq, Eq)]
		pub struct $name {
			pub id: PacketId,
		}

		impl $name {
			pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
				let mut cursor = Cursor::from_frame(frame);

				if cursor.remaining() != 2 {
					return Err(DeserializeError::MalformedPacket(concat!(
						$label,
						" packet must have length 2"
					)));
				}

				let id = cursor.take_id()?;
				Ok(Self { id })
			}

			pub fn serialize_into(
				&self,
				dst: &mut impl BufMut,
			) -> Result<(), serde::SerializeError> {
				let Self { id } = self;
				serde::put_u8(dst, $header)?;
				serde::put_var(dst, 2)?;
				serde::put_u16(dst, id.get())?;
				Ok(())
			}
		}

		impl<'a> From<$name> for Packet<'a> {
			#[inline]
			fn from(value: $name) -> Packet<'a> {
				$variant(value)
			}
		}
	};
}
use id_packet;

macro_rules! nul_packet {
	($name:tt,$variant:expr,$header:literal) => {
		#[derive(Clone, Debug, PartialEq, Eq)]
		pub struct $name;

		impl $name {
			pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
				if !frame.payload.is_empty() {
					return Err(DeserializeError::MalformedPacket(
						"packet must have length 0",
					));
				}
				Ok(Self)
			}

			pub fn serialize_into(
				&self,
				dst: &mut impl BufMut,
			) -> Result<(), serde::SerializeError> {
				serde::put_u8(dst, $header)?;
				serde::put_var(dst, 0)?;
				Ok(())
			}
		}

		impl<'a> From<$name> for Packet<'a> {
			#[inline]
			fn from(_: $name) -> Packet<'a> {
				$variant
			}
		}
	};
}
use nul_packet;
