//! # mqttc
//!
//! A client-side protocol engine for MQTT 3.1.
//!
//! The [`client::Session`] owns the connection to a Server and reports
//! protocol events to handlers registered per [`PacketType`]. It performs no
//! I/O on its own; [`client::tokio::run`] drives it on a tokio runtime.
//!
//! ```no_run
//! # use mqttc::{client::{Session, TcpConnector}, PacketType, QoS};
//! let mut session = Session::new(TcpConnector::default());
//! session.set_server("localhost");
//! session.set_client_id("sensor-1");
//! session.set_message_callback(|message| println!("{}: {:?}", message.topic, message.payload));
//! session.set_callback(PacketType::SubAck, |event| println!("{event:?}"));
//!
//! session.connect()?;
//! session.subscribe("sensors/#", QoS::AtLeastOnce)?;
//! while session.state().is_open() {
//! 	session.read()?;
//! 	session.poll_keep_alive(std::time::Instant::now())?;
//! }
//! # Ok::<(), mqttc::Error>(())
//! ```
pub mod bytes_reader;
pub mod client;
mod error;
pub mod frame;
pub mod misc;
mod packet;
pub mod packets;
mod qos;
pub mod serde;

pub use self::{
	error::Error,
	packet::{InvalidPacketType, Packet, PacketType},
	qos::{InvalidQoS, QoS},
};

pub type PacketId = core::num::NonZeroU16;
