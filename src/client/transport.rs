use std::{
	io::{self, Read, Write},
	net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
	time::Duration,
};

/// A byte stream to the Server.
pub trait Transport {
	/// Writes some of `buf`, returning how many bytes were written.
	fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

	/// Reads into `buf`. `Ok(0)` means the peer closed the connection.
	fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

	fn close(self) -> io::Result<()>;
}

/// Resolves Server addresses and opens [`Transport`]s to them.
pub trait Connector {
	type Transport: Transport;

	fn resolve(&mut self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
		Ok((host, port).to_socket_addrs()?.collect())
	}

	/// Opens a transport to the first reachable address in `addrs`.
	fn open(&mut self, addrs: &[SocketAddr]) -> io::Result<Self::Transport>;
}

/// Opens blocking TCP connections.
#[derive(Clone, Debug, Default)]
pub struct TcpConnector {
	/// Applied to every stream opened. A read that times out is treated as
	/// "no data yet", which lets a caller interleave reads with keep alive
	/// polling on one thread.
	pub read_timeout: Option<Duration>,
	pub nodelay: bool,
}

impl Connector for TcpConnector {
	type Transport = TcpStream;

	fn open(&mut self, addrs: &[SocketAddr]) -> io::Result<TcpStream> {
		let stream = TcpStream::connect(addrs)?;
		stream.set_read_timeout(self.read_timeout)?;
		stream.set_nodelay(self.nodelay)?;
		Ok(stream)
	}
}

impl Transport for TcpStream {
	#[inline]
	fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.write(buf)
	}

	#[inline]
	fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.read(buf)
	}

	fn close(self) -> io::Result<()> {
		match self.shutdown(Shutdown::Both) {
			// The peer may already be gone.
			Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
			result => result,
		}
	}
}

/// Returns `true` for read and write errors that only mean "try again later".
#[inline]
pub(crate) fn is_transient(error: &io::Error) -> bool {
	matches!(
		error.kind(),
		io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::TcpListener;

	#[test]
	fn tcp_round_trip() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();

		let mut connector = TcpConnector {
			read_timeout: Some(Duration::from_millis(50)),
			nodelay: true,
		};
		let mut transport = connector.open(&[addr]).unwrap();
		let (mut server, _) = listener.accept().unwrap();

		assert_eq!(transport.send(&[0xc0, 0x00]).unwrap(), 2);
		let mut request = [0; 2];
		server.read_exact(&mut request).unwrap();
		assert_eq!(request, [0xc0, 0x00]);

		// Nothing to read yet.
		let mut buf = [0; 8];
		let error = transport.recv(&mut buf).unwrap_err();
		assert!(is_transient(&error), "{error:?}");

		server.write_all(&[0xd0, 0x00]).unwrap();
		assert_eq!(transport.recv(&mut buf).unwrap(), 2);

		transport.close().unwrap();
		assert_eq!(server.read(&mut buf).unwrap(), 0);
	}

	#[test]
	fn resolves_literal_addresses() {
		let addrs = TcpConnector::default().resolve("127.0.0.1", 1883).unwrap();
		assert_eq!(addrs, ["127.0.0.1:1883".parse::<SocketAddr>().unwrap()]);
	}
}
