//! Drives a [`Session`] on a tokio runtime.
use super::{
	transport::{Connector, Transport},
	Session,
};
use crate::Error;
use ::tokio::{
	net::{self, TcpStream},
	sync::oneshot,
	time,
};
use std::{
	io,
	net::{Shutdown, SocketAddr},
	time::Instant,
};

/// Opens [`TokioTransport`]s.
///
/// [`run`] resolves and connects asynchronously. Only a direct call to
/// [`Session::connect`] goes through the blocking [`Connector`] methods, and
/// that must happen within a tokio runtime.
#[derive(Debug, Default)]
pub struct TokioConnector {
	pub nodelay: bool,
}

impl Connector for TokioConnector {
	type Transport = TokioTransport;

	fn open(&mut self, addrs: &[SocketAddr]) -> io::Result<TokioTransport> {
		let stream = std::net::TcpStream::connect(addrs)?;
		stream.set_nodelay(self.nodelay)?;
		stream.set_nonblocking(true)?;
		TcpStream::from_std(stream).map(TokioTransport)
	}
}

/// A non-blocking TCP stream registered with the tokio reactor.
#[derive(Debug)]
pub struct TokioTransport(TcpStream);

impl TokioTransport {
	/// Waits until the stream may be readable.
	pub async fn readable(&self) -> io::Result<()> {
		self.0.readable().await
	}

	/// Waits until the stream may be writable.
	pub async fn writable(&self) -> io::Result<()> {
		self.0.writable().await
	}
}

impl Transport for TokioTransport {
	#[inline]
	fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.try_write(buf)
	}

	#[inline]
	fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.0.try_read(buf)
	}

	fn close(self) -> io::Result<()> {
		match self.0.into_std()?.shutdown(Shutdown::Both) {
			Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
			result => result,
		}
	}
}

#[derive(Debug)]
enum Wake {
	Readable,
	Writable,
	KeepAlive,
	Shutdown,
}

/// Runs `session` until it disconnects.
///
/// The session is connected first if it is not already open. Completing (or
/// dropping the sender of) `shutdown` sends DISCONNECT and returns.
#[tracing::instrument(skip_all)]
pub async fn run(
	session: &mut Session<TokioConnector>,
	mut shutdown: oneshot::Receiver<()>,
) -> Result<(), Error> {
	if !session.state().is_open() {
		let transport = open(session).await?;
		session.connect_with(transport)?;
	}

	while session.state().is_open() {
		let wake = {
			let Some(transport) = session.transport() else {
				break;
			};
			let keep_alive = session.next_keep_alive(Instant::now());
			let has_outgoing = session.has_outgoing();

			#[rustfmt::skip]
			::tokio::select! {
				result = transport.readable() => result.map(|()| Wake::Readable),
				result = transport.writable(), if has_outgoing => result.map(|()| Wake::Writable),
				_ = time::sleep(keep_alive.unwrap_or_default()), if keep_alive.is_some() => Ok(Wake::KeepAlive),
				_ = &mut shutdown => Ok(Wake::Shutdown),
			}
		};

		let wake = match wake {
			Ok(wake) => wake,
			Err(error) => {
				tracing::error!(%error, "transport failed");
				session.close()?;
				return Err(Error::TransportRead(error));
			}
		};

		tracing::trace!(?wake);
		let result = match wake {
			Wake::Readable => session.read().map(drop),
			Wake::Writable => session.flush(),
			Wake::KeepAlive => session.poll_keep_alive(Instant::now()).map(drop),
			Wake::Shutdown => {
				tracing::info!("shutting down");
				return session.disconnect();
			}
		};

		if let Err(error) = result {
			if error.is_fatal() {
				// The session has recorded the error already.
				session.close()?;
				return Err(error);
			}
			tracing::warn!(%error);
		}
	}

	tracing::debug!(state = ?session.state(), "session closed");
	Ok(())
}

/// Resolves and connects to the configured Server on the runtime.
async fn open(session: &mut Session<TokioConnector>) -> Result<TokioTransport, Error> {
	let host = session.configuration().server.clone();
	let port = session.configuration().port;

	let lookup = net::lookup_host((host.as_str(), port))
		.await
		.map(|addrs| addrs.collect::<Vec<SocketAddr>>());
	let addrs = match lookup {
		Ok(addrs) => addrs,
		Err(source) => {
			let error = Error::AddressResolution { host, port, source };
			return Err(session.record(error));
		}
	};
	if addrs.is_empty() {
		let source = io::Error::new(io::ErrorKind::NotFound, "no addresses found");
		let error = Error::AddressResolution { host, port, source };
		return Err(session.record(error));
	}

	tracing::debug!(?addrs, "connecting");
	let nodelay = session.connector().nodelay;
	let stream = async {
		let stream = TcpStream::connect(&addrs[..]).await?;
		stream.set_nodelay(nodelay)?;
		io::Result::Ok(stream)
	};
	match stream.await {
		Ok(stream) => Ok(TokioTransport(stream)),
		Err(source) => {
			let error = Error::TransportConnect { host, port, source };
			Err(session.record(error))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{client::ConnectionState, PacketType};
	use ::tokio::{
		io::{AsyncReadExt, AsyncWriteExt},
		net::TcpListener,
		sync::mpsc,
		time::{timeout, Duration},
	};

	#[tokio::test]
	async fn keeps_alive_and_shuts_down() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();

		let broker = ::tokio::spawn(async move {
			let (mut socket, _) = listener.accept().await?;

			let mut connect = [0u8; 17];
			socket.read_exact(&mut connect).await?;
			assert_eq!(&connect[..2], &[0x10, 0x0f]);
			assert_eq!(&connect[14..], &[0x00, 0x01, b't']);
			socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await?;

			let mut ping = [0u8; 2];
			socket.read_exact(&mut ping).await?;
			assert_eq!(ping, [0xc0, 0x00]);
			socket.write_all(&[0xd0, 0x00]).await?;

			let mut disconnect = [0u8; 2];
			socket.read_exact(&mut disconnect).await?;
			assert_eq!(disconnect, [0xe0, 0x00]);
			io::Result::Ok(())
		});

		let mut session = Session::new(TokioConnector::default());
		session.set_server("127.0.0.1");
		session.set_port(port);
		session.set_client_id("t");
		session.set_keep_alive(1);

		let (events, mut pongs) = mpsc::unbounded_channel();
		session.set_callback(PacketType::PingResp, move |_| {
			let _ = events.send(());
		});

		let (stop, stop_rx) = oneshot::channel();
		let driver = ::tokio::spawn(async move {
			let result = run(&mut session, stop_rx).await;
			(session, result)
		});

		let pong = timeout(Duration::from_secs(5), pongs.recv()).await;
		assert_eq!(pong.unwrap(), Some(()));
		stop.send(()).unwrap();

		let (session, result) = timeout(Duration::from_secs(5), driver)
			.await
			.unwrap()
			.unwrap();
		tokio_test::assert_ok!(result);
		assert_eq!(session.state(), ConnectionState::Disconnected);
		tokio_test::assert_ok!(broker.await.unwrap());
	}

	#[tokio::test]
	async fn server_close_ends_the_run() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();

		let broker = ::tokio::spawn(async move {
			let (mut socket, _) = listener.accept().await?;
			let mut connect = [0u8; 16];
			socket.read_exact(&mut connect).await?;
			// Reject, then hang up.
			socket.write_all(&[0x20, 0x02, 0x00, 0x02]).await?;
			io::Result::Ok(())
		});

		let mut session = Session::new(TokioConnector::default());
		session.set_server("127.0.0.1");
		session.set_port(port);
		session.set_client_id("");

		let (_stop, stop_rx) = oneshot::channel();
		let result = timeout(Duration::from_secs(5), run(&mut session, stop_rx)).await;
		tokio_test::assert_ok!(result.unwrap());
		assert_eq!(session.state(), ConnectionState::Disconnected);
		assert_eq!(
			session.last_error(),
			Some("connection refused by server: identifier rejected")
		);
		tokio_test::assert_ok!(broker.await.unwrap());
	}

	#[tokio::test]
	async fn refused_connection_is_reported() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		drop(listener);

		let mut session = Session::new(TokioConnector::default());
		session.set_server("127.0.0.1");
		session.set_port(port);

		let (_stop, stop_rx) = oneshot::channel();
		let result = timeout(Duration::from_secs(5), run(&mut session, stop_rx)).await;
		assert!(matches!(
			result.unwrap(),
			Err(Error::TransportConnect { port: p, .. }) if p == port
		));
		assert_eq!(session.state(), ConnectionState::Init);
		assert!(session.last_error().is_some());
	}
}
