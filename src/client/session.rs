use super::{
	callbacks::{Callbacks, Event, Handler, MessageHandler},
	configuration::ClientConfiguration,
	keep_alive::KeepAlive,
	state::{ConnectionState, InFlight},
	transport::{is_transient, Connector, Transport},
	Message,
};
use crate::{
	bytes_reader::Cursor,
	frame::Frame,
	misc::Will,
	packets::{
		self, ConnAck, DeserializeError, PubAck, PubComp, PubRec, PubRel, Publish, SerializePacket,
		SubAck, UnsubAck,
	},
	Error, Packet, PacketId, PacketType, QoS,
};
use bytes::{Buf, Bytes, BytesMut};
use std::{
	fmt, io,
	time::{Duration, Instant},
};

/// Bytes requested from the transport per [`Session::read`].
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// An MQTT 3.1 client session.
///
/// The session owns the transport and every piece of protocol state. It does
/// no I/O on its own: the owner calls [`read`](Session::read) when the
/// transport is readable and [`poll_keep_alive`](Session::poll_keep_alive)
/// periodically, and every outgoing frame is written through one buffer.
pub struct Session<C: Connector> {
	connector: C,
	transport: Option<C::Transport>,
	config: ClientConfiguration,
	state: ConnectionState,
	callbacks: Callbacks,
	keep_alive: KeepAlive,
	in_flight: InFlight,

	/// Serialized packets not yet accepted by the transport.
	outgoing: BytesMut,

	/// Received bytes not yet forming a complete frame.
	incoming: BytesMut,

	last_error: Option<String>,
}

impl<C: Connector> Session<C> {
	pub fn new(connector: C) -> Self {
		Self::with_configuration(connector, ClientConfiguration::default())
	}

	pub fn with_configuration(connector: C, config: ClientConfiguration) -> Self {
		Self {
			connector,
			transport: None,
			keep_alive: KeepAlive::new(config.keep_alive_interval()),
			config,
			state: ConnectionState::Init,
			callbacks: Callbacks::default(),
			in_flight: InFlight::default(),
			outgoing: BytesMut::new(),
			incoming: BytesMut::new(),
			last_error: None,
		}
	}

	//
	// Configuration
	//

	#[inline]
	pub fn configuration(&self) -> &ClientConfiguration {
		&self.config
	}

	/// Mutable access to the configuration. Changes apply on the next
	/// [`connect`](Self::connect).
	#[inline]
	pub fn configuration_mut(&mut self) -> &mut ClientConfiguration {
		&mut self.config
	}

	pub fn set_server(&mut self, server: impl Into<String>) {
		self.config.server = server.into();
	}

	pub fn set_port(&mut self, port: u16) {
		self.config.port = port;
	}

	pub fn set_client_id(&mut self, client_id: impl Into<String>) {
		self.config.client_id = client_id.into();
	}

	/// Sets the username. An empty username is not sent.
	pub fn set_username(&mut self, username: impl Into<String>) {
		self.config.username = Some(username.into());
	}

	/// Sets the password. An empty password is not sent.
	pub fn set_password(&mut self, password: impl Into<String>) {
		self.config.password = Some(password.into());
	}

	pub fn set_will(&mut self, will: Will) {
		self.config.will = Some(will);
	}

	pub fn clear_will(&mut self) {
		self.config.will = None;
	}

	/// Sets the keep alive interval in seconds. 0 disables pings.
	///
	/// A running ticker restarts with the new interval.
	pub fn set_keep_alive(&mut self, keep_alive: u16) {
		self.config.keep_alive = keep_alive;
		self.keep_alive
			.set_period(self.config.keep_alive_interval(), Instant::now());
	}

	pub fn set_clean_session(&mut self, clean_session: bool) {
		self.config.clean_session = clean_session;
	}

	//
	// Callbacks
	//

	/// Registers `handler` for events of `packet_type`, replacing any existing
	/// handler.
	///
	/// Lifecycle changes are reported through [`PacketType::Connect`].
	pub fn set_callback<F>(&mut self, packet_type: PacketType, handler: F) -> Option<Handler>
	where
		F: FnMut(&Event<'_>) + Send + 'static,
	{
		self.callbacks.set(packet_type, handler)
	}

	pub fn clear_callback(&mut self, packet_type: PacketType) -> Option<Handler> {
		self.callbacks.clear(packet_type)
	}

	/// Registers the handler for application messages received from the
	/// Server.
	pub fn set_message_callback<F>(&mut self, handler: F) -> Option<MessageHandler>
	where
		F: FnMut(&Message) + Send + 'static,
	{
		self.callbacks.set_message_handler(handler)
	}

	pub fn clear_message_callback(&mut self) -> Option<MessageHandler> {
		self.callbacks.clear_message_handler()
	}

	//
	// State
	//

	#[inline]
	pub fn state(&self) -> ConnectionState {
		self.state
	}

	#[inline]
	pub fn is_connected(&self) -> bool {
		self.state == ConnectionState::Connected
	}

	/// The message of the most recent recorded error.
	#[inline]
	pub fn last_error(&self) -> Option<&str> {
		self.last_error.as_deref()
	}

	/// Returns `true` if serialized packets are waiting for the transport.
	#[inline]
	pub fn has_outgoing(&self) -> bool {
		!self.outgoing.is_empty()
	}

	#[inline]
	pub fn connector(&self) -> &C {
		&self.connector
	}

	#[inline]
	pub fn transport(&self) -> Option<&C::Transport> {
		self.transport.as_ref()
	}

	/// Time until the next keep alive ping is due.
	#[inline]
	pub fn next_keep_alive(&self, now: Instant) -> Option<Duration> {
		self.keep_alive.remaining(now)
	}

	//
	// Lifecycle
	//

	/// Opens a transport to the configured Server and sends CONNECT.
	///
	/// Only valid from [`Init`](ConnectionState::Init) or
	/// [`Disconnected`](ConnectionState::Disconnected). The session is
	/// [`Connecting`](ConnectionState::Connecting) until the Server accepts
	/// with CONNACK.
	pub fn connect(&mut self) -> Result<(), Error> {
		self.check_transition(ConnectionState::Connecting)?;
		let connect = self.connect_packet()?;

		let host = self.config.server.clone();
		let port = self.config.port;
		let addrs = match self.connector.resolve(&host, port) {
			Ok(addrs) if !addrs.is_empty() => addrs,
			result => {
				let source = result.err().unwrap_or_else(|| {
					io::Error::new(io::ErrorKind::NotFound, "no addresses found")
				});
				let error = Error::AddressResolution { host, port, source };
				return Err(self.record(error));
			}
		};

		tracing::debug!(?addrs, "connecting");
		let transport = match self.connector.open(&addrs) {
			Ok(transport) => transport,
			Err(source) => {
				let error = Error::TransportConnect { host, port, source };
				return Err(self.record(error));
			}
		};

		self.start(transport, connect)
	}

	/// Sends CONNECT over a transport the caller has already opened.
	///
	/// Follows the same rules as [`connect`](Self::connect), without resolving
	/// or opening anything.
	pub fn connect_with(&mut self, transport: C::Transport) -> Result<(), Error> {
		self.check_transition(ConnectionState::Connecting)?;
		let connect = self.connect_packet()?;
		self.start(transport, connect)
	}

	fn connect_packet(&self) -> Result<Bytes, Error> {
		let connect = packets::Connect {
			client_id: &self.config.client_id,
			keep_alive: self.config.keep_alive,
			clean_session: self.config.clean_session,
			will: self.config.will.clone(),
			username: self.config.username(),
			password: self.config.password(),
			..Default::default()
		};
		Ok(connect.to_bytes()?)
	}

	fn start(&mut self, transport: C::Transport, connect: Bytes) -> Result<(), Error> {
		if self.config.clean_session {
			self.in_flight.reset();
		}
		self.incoming.clear();
		self.outgoing.clear();
		self.outgoing.extend_from_slice(&connect);
		self.transport = Some(transport);

		self.keep_alive = KeepAlive::new(self.config.keep_alive_interval());
		self.keep_alive.start(Instant::now());

		self.transition(ConnectionState::Connecting)?;
		self.flush()
	}

	/// Sends DISCONNECT and closes the transport.
	///
	/// Has no effect unless the session is connecting or connected.
	pub fn disconnect(&mut self) -> Result<(), Error> {
		if !self.state.is_open() {
			tracing::debug!(state = ?self.state, "disconnect on a closed session");
			return Ok(());
		}

		let sent = self.send_packet(&packets::Disconnect).and_then(|()| {
			// One more attempt at whatever the transport refused.
			if self.has_outgoing() {
				self.flush()
			} else {
				Ok(())
			}
		});
		match sent {
			Ok(()) if !self.has_outgoing() => self.callbacks.dispatch(&Event::Disconnect),
			Ok(()) => tracing::warn!(
				queued = self.outgoing.len(),
				"transport blocked, DISCONNECT dropped"
			),
			Err(error) => tracing::warn!(%error, "failed to send DISCONNECT"),
		}

		if self.state.is_open() {
			self.close_transport();
			self.transition(ConnectionState::Disconnected)?;
		}

		Ok(())
	}

	/// Closes the transport without sending DISCONNECT and clears the Will.
	pub fn close(&mut self) -> Result<(), Error> {
		self.config.will = None;
		self.keep_alive.stop();
		if self.state.is_open() {
			self.close_transport();
			self.transition(ConnectionState::Disconnected)?;
		}
		Ok(())
	}

	//
	// Outgoing
	//

	/// Publishes `payload` to `topic`.
	///
	/// Returns the message identifier assigned to QoS 1 and 2 messages.
	pub fn publish(
		&mut self,
		topic: &str,
		payload: impl Into<Bytes>,
		qos: QoS,
		retain: bool,
	) -> Result<Option<PacketId>, Error> {
		let mut message = Message::new(topic, payload)
			.with_qos(qos)
			.with_retain(retain);
		self.publish_message(&mut message)
	}

	/// Publishes `message`, assigning an identifier if it needs one and has
	/// none.
	pub fn publish_message(&mut self, message: &mut Message) -> Result<Option<PacketId>, Error> {
		self.ensure_open()?;

		let assigned = message.id;
		message.id = match (message.qos, message.id) {
			(QoS::AtMostOnce, _) => None,
			(_, Some(id)) => Some(id),
			(_, None) => Some(self.generate_id()?),
		};

		if let Err(error) = queue_packet(&mut self.outgoing, &message.as_publish()) {
			message.id = assigned;
			return Err(error);
		}
		if let Some(id) = message.id {
			self.in_flight.publish(id, message.qos);
		}
		self.flush()?;

		self.callbacks.dispatch(&Event::Publish { message });
		Ok(message.id)
	}

	/// Subscribes to `topic`, returning the message identifier of the
	/// SUBSCRIBE packet.
	pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<PacketId, Error> {
		self.ensure_open()?;

		let id = self.generate_id()?;
		queue_packet(
			&mut self.outgoing,
			&packets::Subscribe {
				id,
				topics: vec![(topic, qos)],
			},
		)?;
		self.in_flight.subscribe(id);
		self.flush()?;

		self.callbacks
			.dispatch(&Event::Subscribe { id, topic, qos });
		Ok(id)
	}

	/// Unsubscribes from `topic`, returning the message identifier of the
	/// UNSUBSCRIBE packet.
	pub fn unsubscribe(&mut self, topic: &str) -> Result<PacketId, Error> {
		self.ensure_open()?;

		let id = self.generate_id()?;
		queue_packet(
			&mut self.outgoing,
			&packets::Unsubscribe {
				id,
				topics: vec![topic],
			},
		)?;
		self.in_flight.unsubscribe(id);
		self.flush()?;

		self.callbacks
			.dispatch(&Event::Unsubscribe { id, topic });
		Ok(id)
	}

	/// Sends PINGREQ.
	pub fn ping(&mut self) -> Result<(), Error> {
		self.send_packet(&packets::PingReq)?;
		self.callbacks.dispatch(&Event::PingReq);
		Ok(())
	}

	pub fn puback(&mut self, id: PacketId) -> Result<(), Error> {
		self.send_packet(&PubAck { id })
	}

	pub fn pubrec(&mut self, id: PacketId) -> Result<(), Error> {
		self.send_packet(&PubRec { id })
	}

	pub fn pubrel(&mut self, id: PacketId) -> Result<(), Error> {
		self.send_packet(&PubRel { id })
	}

	pub fn pubcomp(&mut self, id: PacketId) -> Result<(), Error> {
		self.send_packet(&PubComp { id })
	}

	/// Sends PINGREQ if the keep alive period has elapsed.
	///
	/// Returns `true` if a ping was sent.
	pub fn poll_keep_alive(&mut self, now: Instant) -> Result<bool, Error> {
		if !self.state.is_open() || !self.keep_alive.poll(now) {
			return Ok(false);
		}

		tracing::trace!("keep alive");
		self.ping()?;
		Ok(true)
	}

	/// Writes as much of the outgoing buffer as the transport accepts.
	///
	/// Bytes the transport can not take yet stay queued.
	pub fn flush(&mut self) -> Result<(), Error> {
		let Some(transport) = self.transport.as_mut() else {
			return Err(Error::NotConnected);
		};

		let mut written = 0;
		let result = loop {
			if written == self.outgoing.len() {
				break Ok(());
			}

			match transport.send(&self.outgoing[written..]) {
				Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero)),
				Ok(n) => written += n,
				Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
				Err(error) if is_transient(&error) => break Ok(()),
				Err(error) => break Err(error),
			}
		};

		tracing::trace!(written, queued = self.outgoing.len() - written, "flushed");
		self.outgoing.advance(written);
		result.map_err(|error| self.fail(Error::TransportWrite(error)))
	}

	//
	// Incoming
	//

	/// Reads once from the transport and dispatches every complete frame.
	///
	/// Returns the number of frames handled. A trailing partial frame is kept
	/// for the next call. If the Server closed the connection the session
	/// moves to [`Disconnected`](ConnectionState::Disconnected) and `Ok(0)`
	/// is returned.
	pub fn read(&mut self) -> Result<usize, Error> {
		let Some(transport) = self.transport.as_mut() else {
			return Err(Error::NotConnected);
		};

		let mut buf = [0u8; READ_BUFFER_SIZE];
		let n = match transport.recv(&mut buf) {
			Ok(0) => {
				tracing::info!("connection closed by server");
				self.close_transport();
				self.transition(ConnectionState::Disconnected)?;
				return Ok(0);
			}
			Ok(n) => n,
			Err(error) if is_transient(&error) => return Ok(0),
			Err(error) => return Err(self.fail(Error::TransportRead(error))),
		};

		tracing::trace!(n, "read bytes");
		self.incoming.extend_from_slice(&buf[..n]);
		self.process_incoming()
	}

	/// Dispatches exactly one frame supplied by the caller.
	///
	/// The remaining-length field must account for every byte after the
	/// fixed header.
	pub fn feed(&mut self, bytes: &[u8]) -> Result<(), Error> {
		match Frame::parse_exact(Bytes::copy_from_slice(bytes)) {
			Ok(frame) => self.handle_frame(frame),
			Err(error) => Err(self.malformed(error)),
		}
	}

	fn process_incoming(&mut self) -> Result<usize, Error> {
		let mut handled = 0;
		while self.transport.is_some() {
			let mut cursor = Cursor::new(&self.incoming);
			let len = match Frame::check(&mut cursor) {
				Ok(len) => len,
				Err(DeserializeError::Incomplete) => break,
				Err(error) => return Err(self.malformed(error)),
			};

			let frame = match Frame::parse_exact(self.incoming.split_to(len).freeze()) {
				Ok(frame) => frame,
				Err(error) => return Err(self.malformed(error)),
			};

			self.handle_frame(frame)?;
			handled += 1;
		}

		Ok(handled)
	}

	fn handle_frame(&mut self, frame: Frame) -> Result<(), Error> {
		let packet = match Packet::parse(&frame) {
			Ok(packet) => packet,
			Err(error) => return Err(self.malformed(error)),
		};

		tracing::trace!(?packet, "received packet");
		let packet_type = packet.packet_type();
		match packet {
			Packet::ConnAck(connack) => self.handle_connack(connack)?,
			Packet::Publish(publish) => self.handle_publish(&publish)?,
			Packet::PubAck(PubAck { id }) => {
				if let Err(error) = self.in_flight.puback(id) {
					tracing::warn!(%id, %error);
				}
				self.callbacks.dispatch(&Event::PubAck(id));
			}
			Packet::PubRec(PubRec { id }) => {
				match self.in_flight.pubrec(id) {
					Ok(()) => self.send_packet(&PubRel { id })?,
					Err(error) => tracing::warn!(%id, %error),
				}
				self.callbacks.dispatch(&Event::PubRec(id));
			}
			Packet::PubRel(PubRel { id }) => {
				if let Err(error) = self.in_flight.pubrel(id) {
					tracing::warn!(%id, %error);
				}
				self.send_packet(&PubComp { id })?;
				self.callbacks.dispatch(&Event::PubRel(id));
			}
			Packet::PubComp(PubComp { id }) => {
				if let Err(error) = self.in_flight.pubcomp(id) {
					tracing::warn!(%id, %error);
				}
				self.callbacks.dispatch(&Event::PubComp(id));
			}
			Packet::SubAck(SubAck { id, result }) => {
				if let Err(error) = self.in_flight.suback(id) {
					tracing::warn!(%id, %error);
				}
				self.callbacks
					.dispatch(&Event::SubAck { id, result: &result });
			}
			Packet::UnsubAck(UnsubAck { id }) => {
				if let Err(error) = self.in_flight.unsuback(id) {
					tracing::warn!(%id, %error);
				}
				self.callbacks.dispatch(&Event::UnsubAck(id));
			}
			Packet::PingResp => self.callbacks.dispatch(&Event::PingResp),
			Packet::Connect(_)
			| Packet::Subscribe(_)
			| Packet::Unsubscribe(_)
			| Packet::PingReq
			| Packet::Disconnect => {
				return Err(self.malformed(DeserializeError::UnexpectedPacket(packet_type)));
			}
		}

		Ok(())
	}

	fn handle_connack(&mut self, connack: ConnAck) -> Result<(), Error> {
		self.callbacks
			.dispatch(&Event::ConnAck { code: connack.code });

		if !connack.is_accepted() {
			let error = Error::ProtocolReject(connack.code);
			tracing::warn!(%error);
			self.record(error);
			return Ok(());
		}

		if self.state == ConnectionState::Connecting {
			self.transition(ConnectionState::Connected)?;
		} else {
			tracing::warn!(state = ?self.state, "ignoring CONNACK");
		}

		Ok(())
	}

	fn handle_publish(&mut self, publish: &Publish) -> Result<(), Error> {
		let deliver = match publish {
			Publish::AtMostOnce { .. } => true,
			Publish::AtLeastOnce { id, .. } => {
				self.send_packet(&PubAck { id: *id })?;
				true
			}
			Publish::ExactlyOnce { id, .. } => {
				let first = self.in_flight.receive_exactly_once(*id);
				self.send_packet(&PubRec { id: *id })?;
				if !first {
					tracing::debug!(%id, "already received, not delivering again");
				}
				first
			}
		};

		if deliver {
			self.callbacks.deliver(&Message::from(publish));
		}

		Ok(())
	}

	//
	// Helpers
	//

	fn send_packet(&mut self, packet: &(impl SerializePacket + fmt::Debug)) -> Result<(), Error> {
		self.ensure_open()?;
		queue_packet(&mut self.outgoing, packet)?;
		self.flush()
	}

	fn ensure_open(&self) -> Result<(), Error> {
		if self.transport.is_some() && self.state.is_open() {
			Ok(())
		} else {
			Err(Error::NotConnected)
		}
	}

	fn generate_id(&mut self) -> Result<PacketId, Error> {
		self.in_flight.generate_id().ok_or(Error::IdsExhausted)
	}

	fn check_transition(&self, next: ConnectionState) -> Result<(), Error> {
		if self.state.can_transition_to(next) {
			Ok(())
		} else {
			Err(Error::InvalidTransition {
				from: self.state,
				to: next,
			})
		}
	}

	fn transition(&mut self, next: ConnectionState) -> Result<(), Error> {
		self.check_transition(next)?;
		tracing::info!(from = ?self.state, to = ?next, "connection state changed");
		self.state = next;
		self.callbacks.dispatch(&Event::Connection(next));
		Ok(())
	}

	fn close_transport(&mut self) {
		self.keep_alive.stop();
		self.outgoing.clear();
		self.incoming.clear();
		if let Some(transport) = self.transport.take() {
			if let Err(error) = transport.close() {
				tracing::debug!(%error, "error closing transport");
			}
		}
	}

	/// Records a fatal transport error and drops the connection.
	fn fail(&mut self, error: Error) -> Error {
		tracing::error!(%error);
		if self.state.is_open() {
			self.close_transport();
			// Connecting and Connected may always move to Disconnected.
			let _ = self.transition(ConnectionState::Disconnected);
		}
		self.record(error)
	}

	/// Records a malformed frame, discarding everything buffered.
	fn malformed(&mut self, error: DeserializeError) -> Error {
		let error = Error::MalformedFrame(error);
		tracing::error!(%error, "dropping frame");
		self.incoming.clear();
		self.record(error)
	}

	/// Remembers `error` as the [`last_error`](Self::last_error).
	pub(crate) fn record(&mut self, error: Error) -> Error {
		self.last_error = Some(error.to_string());
		error
	}
}

/// Serializes `packet` onto the end of `outgoing`.
///
/// On failure `outgoing` is left exactly as it was, so no partial frame is
/// ever written.
fn queue_packet(
	outgoing: &mut BytesMut,
	packet: &(impl SerializePacket + fmt::Debug),
) -> Result<(), Error> {
	tracing::trace!(?packet, "queueing packet");
	let queued = outgoing.len();
	if let Err(error) = packet.serialize_to_bytes(outgoing) {
		outgoing.truncate(queued);
		return Err(error.into());
	}
	Ok(())
}

impl<C: Connector> Drop for Session<C> {
	fn drop(&mut self) {
		if let Some(transport) = self.transport.take() {
			let _ = transport.close();
		}
	}
}

impl<C: Connector> fmt::Debug for Session<C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("state", &self.state)
			.field("config", &self.config)
			.field("callbacks", &self.callbacks)
			.field("keep_alive", &self.keep_alive)
			.field("in_flight", &self.in_flight)
			.field("outgoing", &self.outgoing.len())
			.field("incoming", &self.incoming.len())
			.field("last_error", &self.last_error)
			.finish()
	}
}
