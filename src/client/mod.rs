mod callbacks;
mod configuration;
mod keep_alive;
mod message;
mod session;
mod state;
mod transport;

#[cfg(feature = "tokio-client")]
pub mod tokio;

pub use self::{
	callbacks::{Callbacks, Event, Handler, MessageHandler},
	configuration::{
		ClientConfiguration, UnsupportedScheme, DEFAULT_KEEP_ALIVE, DEFAULT_MQTT_HOST,
		DEFAULT_MQTT_PORT,
	},
	keep_alive::KeepAlive,
	message::Message,
	session::Session,
	state::{ConnectionState, StateError},
	transport::{Connector, TcpConnector, Transport},
};
