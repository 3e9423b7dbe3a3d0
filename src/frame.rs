use crate::{
	bytes_reader::Cursor,
	packets::{DeserializeError, DeserializePacket},
	PacketType,
};
use bytes::Bytes;

/// A single MQTT control packet split into its fixed header byte and the
/// bytes following the remaining-length field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
	pub header: u8,
	pub payload: Bytes,
}

impl Frame {
	/// Checks whether a complete packet frame can be deserialized from the
	/// cursor.
	///
	/// Returns the total length of the frame, including the fixed header.
	/// [`DeserializeError::Incomplete`] means more bytes are required.
	pub fn check(cursor: &mut Cursor) -> Result<usize, DeserializeError> {
		let header = cursor.take_u8()?;
		PacketType::from_header(header)?;

		let length = cursor.take_var()?;
		cursor.take_slice(length)?;

		Ok(cursor.position())
	}

	/// Deserializes a frame from `buffer`, which must contain *exactly* one
	/// complete frame.
	pub fn parse_exact(buffer: Bytes) -> Result<Self, DeserializeError> {
		let mut cursor = Cursor::new(&buffer);
		let header = cursor.take_u8()?;
		PacketType::from_header(header)?;

		let declared = cursor.take_var()?;
		let offset = cursor.position();
		let actual = buffer.len() - offset;
		if declared != actual {
			return Err(DeserializeError::LengthMismatch { declared, actual });
		}

		Ok(Self {
			header,
			payload: buffer.slice(offset..),
		})
	}

	#[inline]
	pub fn packet_type(&self) -> Result<PacketType, DeserializeError> {
		PacketType::from_header(self.header)
	}

	/// The flag bits in the low nibble of the fixed header.
	#[inline]
	pub fn flags(&self) -> u8 {
		self.header & 0x0f
	}

	pub fn deserialize_packet<'a, T>(&'a self) -> Result<T, DeserializeError>
	where
		T: DeserializePacket<'a>,
	{
		T::deserialize_from(self).map_err(|error| match error {
			// The frame length has already been validated, so running out of
			// bytes means the packet body is shorter than its fields.
			DeserializeError::Incomplete => DeserializeError::Truncated,
			error => error,
		})
	}
}
