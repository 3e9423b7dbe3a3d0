use crate::{misc::WrappingNonZeroU16, PacketId, PacketType, QoS};
use std::collections::{HashMap, HashSet};

/// Lifecycle of a [`Session`](super::Session).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
	/// Configured but never connected.
	#[default]
	Init,
	/// CONNECT sent, waiting for CONNACK.
	Connecting,
	/// CONNACK accepted.
	Connected,
	Disconnected,
}

impl ConnectionState {
	/// Returns `true` if the session may move from `self` to `next`.
	pub fn can_transition_to(self, next: Self) -> bool {
		use ConnectionState::*;
		matches!(
			(self, next),
			(Init | Disconnected, Connecting)
				| (Connecting, Connected)
				| (Connecting | Connected, Disconnected)
		)
	}

	/// Returns `true` while a transport is open.
	#[inline]
	pub fn is_open(self) -> bool {
		matches!(self, Self::Connecting | Self::Connected)
	}
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
	/// Received an acknowledgement that we were not expecting.
	#[error("unsolicited {0} packet")]
	Unsolicited(PacketType),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PublishState {
	/// QoS 1, waiting for PUBACK.
	Ack,
	/// QoS 2, waiting for PUBREC.
	Rec,
	/// QoS 2, PUBREL sent, waiting for PUBCOMP.
	Comp,
}

/// Message identifiers with an acknowledgement still outstanding, in either
/// direction.
#[derive(Debug)]
pub(crate) struct InFlight {
	publish: HashMap<PacketId, PublishState>,
	subscribe: HashSet<PacketId>,
	unsubscribe: HashSet<PacketId>,

	/// QoS 2 messages received from the Server and not yet released.
	incoming: HashSet<PacketId>,

	packet_id: WrappingNonZeroU16,
}

impl Default for InFlight {
	fn default() -> Self {
		Self {
			publish: Default::default(),
			subscribe: Default::default(),
			unsubscribe: Default::default(),
			incoming: Default::default(),
			packet_id: WrappingNonZeroU16::MAX,
		}
	}
}

impl InFlight {
	/// Forgets all outstanding acknowledgements. The id counter keeps running.
	pub fn reset(&mut self) {
		self.publish.clear();
		self.subscribe.clear();
		self.unsubscribe.clear();
		self.incoming.clear();
	}

	/// Generates the next unused message identifier for an outgoing PUBLISH,
	/// SUBSCRIBE or UNSUBSCRIBE.
	///
	/// Returns `None` if every identifier is awaiting an acknowledgement.
	pub fn generate_id(&mut self) -> Option<PacketId> {
		for _ in 0..u16::MAX {
			self.packet_id += 1;
			let id = self.packet_id.get();
			if !self.is_outstanding(id) {
				return Some(id);
			}
		}
		None
	}

	#[inline]
	pub fn is_outstanding(&self, id: PacketId) -> bool {
		self.publish.contains_key(&id) || self.subscribe.contains(&id) || self.unsubscribe.contains(&id)
	}

	/// Records an outgoing PUBLISH.
	pub fn publish(&mut self, id: PacketId, qos: QoS) {
		match qos {
			QoS::AtMostOnce => {}
			QoS::AtLeastOnce => {
				self.publish.insert(id, PublishState::Ack);
			}
			QoS::ExactlyOnce => {
				self.publish.insert(id, PublishState::Rec);
			}
		}
	}

	pub fn subscribe(&mut self, id: PacketId) {
		self.subscribe.insert(id);
	}

	pub fn unsubscribe(&mut self, id: PacketId) {
		self.unsubscribe.insert(id);
	}

	/// Handles an incoming PUBACK.
	pub fn puback(&mut self, id: PacketId) -> Result<(), StateError> {
		match self.publish.get(&id) {
			Some(PublishState::Ack) => {
				self.publish.remove(&id);
				Ok(())
			}
			_ => Err(StateError::Unsolicited(PacketType::PubAck)),
		}
	}

	/// Handles an incoming PUBREC. On success the caller must send PUBREL.
	///
	/// A repeated PUBREC for a message already waiting on PUBCOMP succeeds
	/// again so the PUBREL is resent.
	pub fn pubrec(&mut self, id: PacketId) -> Result<(), StateError> {
		match self.publish.get_mut(&id) {
			Some(state) if matches!(state, PublishState::Rec | PublishState::Comp) => {
				*state = PublishState::Comp;
				Ok(())
			}
			_ => Err(StateError::Unsolicited(PacketType::PubRec)),
		}
	}

	/// Handles an incoming PUBCOMP.
	pub fn pubcomp(&mut self, id: PacketId) -> Result<(), StateError> {
		match self.publish.get(&id) {
			Some(PublishState::Comp) => {
				self.publish.remove(&id);
				Ok(())
			}
			_ => Err(StateError::Unsolicited(PacketType::PubComp)),
		}
	}

	pub fn suback(&mut self, id: PacketId) -> Result<(), StateError> {
		self.subscribe
			.remove(&id)
			.then_some(())
			.ok_or(StateError::Unsolicited(PacketType::SubAck))
	}

	pub fn unsuback(&mut self, id: PacketId) -> Result<(), StateError> {
		self.unsubscribe
			.remove(&id)
			.then_some(())
			.ok_or(StateError::Unsolicited(PacketType::UnsubAck))
	}

	/// Records an incoming QoS 2 PUBLISH. Returns `false` if the message was
	/// already received and must not be delivered again.
	pub fn receive_exactly_once(&mut self, id: PacketId) -> bool {
		self.incoming.insert(id)
	}

	/// Handles an incoming PUBREL. PUBCOMP is sent either way.
	pub fn pubrel(&mut self, id: PacketId) -> Result<(), StateError> {
		self.incoming
			.remove(&id)
			.then_some(())
			.ok_or(StateError::Unsolicited(PacketType::PubRel))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn id(value: u16) -> PacketId {
		PacketId::new(value).unwrap()
	}

	#[test]
	fn legal_transitions() {
		use ConnectionState::*;
		let states = [Init, Connecting, Connected, Disconnected];
		let legal = [
			(Init, Connecting),
			(Disconnected, Connecting),
			(Connecting, Connected),
			(Connecting, Disconnected),
			(Connected, Disconnected),
		];

		for from in states {
			for to in states {
				assert_eq!(
					from.can_transition_to(to),
					legal.contains(&(from, to)),
					"{from:?} -> {to:?}"
				);
			}
		}
	}

	#[test]
	fn ids_start_at_one_and_increase() {
		let mut state = InFlight::default();
		let ids: Vec<u16> = (0..5).map(|_| state.generate_id().unwrap().get()).collect();
		assert_eq!(ids, [1, 2, 3, 4, 5]);
	}

	#[test]
	fn outstanding_ids_are_skipped_after_wrapping() {
		let mut state = InFlight::default();
		let first = state.generate_id().unwrap();
		state.publish(first, QoS::AtLeastOnce);
		let second = state.generate_id().unwrap();
		state.subscribe(second);

		// Run the counter around to just before the first id again.
		for _ in 0..u16::MAX - 2 {
			state.generate_id().unwrap();
		}

		assert_eq!(state.generate_id(), Some(id(3)));
	}

	#[test]
	fn exactly_once_sender_flow() {
		let mut state = InFlight::default();
		state.publish(id(4), QoS::ExactlyOnce);

		assert_eq!(
			state.pubcomp(id(4)),
			Err(StateError::Unsolicited(PacketType::PubComp))
		);
		assert_eq!(state.pubrec(id(4)), Ok(()));
		// Retransmitted PUBREC resends PUBREL.
		assert_eq!(state.pubrec(id(4)), Ok(()));
		assert!(state.is_outstanding(id(4)));
		assert_eq!(state.pubcomp(id(4)), Ok(()));
		assert!(!state.is_outstanding(id(4)));
	}

	#[test]
	fn unsolicited_acks() {
		let mut state = InFlight::default();
		state.publish(id(1), QoS::ExactlyOnce);
		assert_eq!(
			state.puback(id(1)),
			Err(StateError::Unsolicited(PacketType::PubAck))
		);
		assert_eq!(
			state.suback(id(2)),
			Err(StateError::Unsolicited(PacketType::SubAck))
		);
		assert_eq!(
			state.pubrel(id(3)),
			Err(StateError::Unsolicited(PacketType::PubRel))
		);
	}

	#[test]
	fn duplicate_incoming_exactly_once() {
		let mut state = InFlight::default();
		assert!(state.receive_exactly_once(id(9)));
		assert!(!state.receive_exactly_once(id(9)));
		assert_eq!(state.pubrel(id(9)), Ok(()));
		assert!(state.receive_exactly_once(id(9)));
	}
}
