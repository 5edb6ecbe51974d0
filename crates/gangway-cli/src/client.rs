//! Minimal bridge-protocol client over TCP or Unix sockets.

use std::io::{self, Read, Write};
use std::net::TcpStream;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use thiserror::Error;

use gangway_config::{SocketEndpoint, SocketParseError};
use gangway_protocol::{CallType, ContentKind, Header, ResponseHeader, WireError};

/// Failures surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint argument did not parse.
    #[error("invalid endpoint '{input}': {source}")]
    Endpoint {
        /// Offending argument.
        input: String,
        /// Parse failure.
        #[source]
        source: SocketParseError,
    },
    /// The call type argument is unknown or reserved for the engine.
    #[error("invalid call type '{token}': expected text, json, data or binary")]
    CallType {
        /// Offending argument.
        token: String,
    },
    /// Unix sockets are unavailable on this platform.
    #[error("unix endpoints are unsupported on this platform")]
    UnsupportedUnix,
    /// Connecting to the daemon failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Configured endpoint.
        endpoint: String,
        /// Underlying connection failure.
        #[source]
        source: io::Error,
    },
    /// The daemon's handshake acknowledgement was malformed.
    #[error("malformed handshake acknowledgement: {message}")]
    Handshake {
        /// What the client observed.
        message: String,
    },
    /// The conversation broke at the wire level.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// Plain transport failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

enum ClientStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// One open conversation with the daemon.
pub struct BridgeClient {
    stream: ClientStream,
    session_id: String,
}

impl BridgeClient {
    /// Connects to the daemon endpoint.
    ///
    /// # Errors
    ///
    /// [`ClientError::Connect`] when the transport connection fails.
    pub fn connect(endpoint: &SocketEndpoint) -> Result<Self, ClientError> {
        let stream = match endpoint {
            SocketEndpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).map_err(|source| {
                    ClientError::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                })?;
                ClientStream::Tcp(stream)
            }
            SocketEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    let stream = UnixStream::connect(path.as_std_path()).map_err(|source| {
                        ClientError::Connect {
                            endpoint: endpoint.to_string(),
                            source,
                        }
                    })?;
                    ClientStream::Unix(stream)
                }

                #[cfg(not(unix))]
                {
                    let _ = path;
                    return Err(ClientError::UnsupportedUnix);
                }
            }
        };
        Ok(Self {
            stream,
            session_id: String::new(),
        })
    }

    /// Performs the `open` handshake and records the acknowledged session.
    ///
    /// # Errors
    ///
    /// [`ClientError::Handshake`] when the daemon's acknowledgement is not
    /// the expected JSON object.
    pub fn open(&mut self, session_id: &str) -> Result<&str, ClientError> {
        self.send(CallType::Open, "", session_id, b"{}")?;
        let (kind, body) = self.receive()?;
        if kind != Some(ContentKind::Json) {
            return Err(ClientError::Handshake {
                message: "acknowledgement is not json content".into(),
            });
        }
        let ack: serde_json::Value =
            serde_json::from_slice(&body).map_err(|error| ClientError::Handshake {
                message: error.to_string(),
            })?;
        let session = ack
            .get("session_id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| ClientError::Handshake {
                message: "acknowledgement carries no session_id".into(),
            })?;
        self.session_id = session;
        Ok(&self.session_id)
    }

    /// The session id acknowledged by the daemon.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Issues one call and reads its content.
    ///
    /// # Errors
    ///
    /// Propagates wire-level failures while sending or receiving.
    pub fn call(
        &mut self,
        call_type: CallType,
        name: &str,
        payload: &[u8],
    ) -> Result<(Option<ContentKind>, Vec<u8>), ClientError> {
        let session = self.session_id.clone();
        self.send(call_type, name, &session, payload)?;
        self.receive()
    }

    /// Sends the `close` sentinel and drops the connection.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure when the sentinel cannot be sent.
    pub fn close(mut self) -> Result<(), ClientError> {
        let session = self.session_id.clone();
        self.send(CallType::Close, "", &session, b"")?;
        Ok(())
    }

    fn send(
        &mut self,
        call_type: CallType,
        name: &str,
        session: &str,
        payload: &[u8],
    ) -> Result<(), ClientError> {
        let header = Header::new(call_type, name, session, payload.len() as u64);
        self.stream.write_all(header.wire_format().as_bytes())?;
        self.stream.write_all(payload)?;
        self.stream.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<(Option<ContentKind>, Vec<u8>), ClientError> {
        let header = ResponseHeader::read_from(&mut self.stream)?;
        let body = header.read_body(&mut self.stream)?;
        Ok((header.kind, body))
    }
}
