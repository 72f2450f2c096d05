//! Byte sinks reachable through a collection URI.
//!
//! Supported URIs:
//!
//! - `file:<path>` writes to a local file, `file:-` to standard output
//! - `tcp:<host>[:<port>]` connects to a collection server
//! - `<host>[:<port>]` is shorthand for `tcp:`
//!
//! The default port is 3003.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default port of an OML collection server.
pub const DEFAULT_PORT: u16 = 3003;

/// A parsed, fully qualified collection URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionUri {
    /// Standard output (`file:-`). Never closed by the SDK.
    Stdout,

    /// A local file.
    File(PathBuf),

    /// A TCP collection server.
    Tcp { host: String, port: u16 },
}

impl CollectionUri {
    /// Parse a possibly under-qualified URI.
    ///
    /// ```rust
    /// use oml_sdk::CollectionUri;
    ///
    /// assert_eq!(
    ///     CollectionUri::parse("collector").unwrap().to_string(),
    ///     "tcp:collector:3003"
    /// );
    /// assert_eq!(CollectionUri::parse("file:-").unwrap(), CollectionUri::Stdout);
    /// ```
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(Error::InvalidUri(uri.to_string()));
        }

        // Paths may contain ':' so everything after the scheme is the path
        if let Some(path) = uri.strip_prefix("file:") {
            return match path {
                "" => Err(Error::InvalidUri(uri.to_string())),
                "-" => Ok(CollectionUri::Stdout),
                path => Ok(CollectionUri::File(PathBuf::from(path))),
            };
        }

        let parts: Vec<&str> = uri.split(':').collect();
        let (host, port) = match parts.as_slice() {
            [host] => (*host, None),
            ["tcp", host] => (*host, None),
            [host, port] if port.parse::<u16>().is_ok() => (*host, Some(*port)),
            [scheme, _] => return Err(Error::UnsupportedScheme(scheme.to_string())),
            ["tcp", host, port] => (*host, Some(*port)),
            [scheme, _, _] => return Err(Error::UnsupportedScheme(scheme.to_string())),
            _ => return Err(Error::InvalidUri(uri.to_string())),
        };

        let host = host.trim_start_matches("//");
        if host.is_empty() {
            return Err(Error::InvalidUri(uri.to_string()));
        }
        let port = match port {
            Some(p) => p.parse().map_err(|_| Error::InvalidUri(uri.to_string()))?,
            None => DEFAULT_PORT,
        };
        Ok(CollectionUri::Tcp {
            host: host.to_string(),
            port,
        })
    }

    /// Scheme name.
    pub fn scheme(&self) -> &'static str {
        match self {
            CollectionUri::Stdout | CollectionUri::File(_) => "file",
            CollectionUri::Tcp { .. } => "tcp",
        }
    }
}

impl FromStr for CollectionUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CollectionUri::parse(s)
    }
}

impl fmt::Display for CollectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionUri::Stdout => f.write_str("file:-"),
            CollectionUri::File(path) => write!(f, "file:{}", path.display()),
            CollectionUri::Tcp { host, port } => write!(f, "tcp:{}:{}", host, port),
        }
    }
}

/// An open byte sink. Owned by exactly one channel worker.
pub trait Transport: Send {
    /// Write `text` followed by a newline and flush.
    fn write_line(&mut self, text: &str) -> io::Result<()>;

    /// Flush and release the sink.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens transports, both initially and when reconnecting.
pub trait Connector: Send {
    /// Open a fresh transport.
    fn connect(&mut self) -> Result<Box<dyn Transport>>;

    /// Human-readable destination, used in logs.
    fn describe(&self) -> String;
}

/// Transport over any `Write` implementation.
pub struct WriterTransport<W: Write + Send> {
    writer: Option<W>,
    closable: bool,
}

impl<W: Write + Send> WriterTransport<W> {
    /// Wrap a writer that is closed (dropped) on `close`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
            closable: true,
        }
    }

    /// Wrap a writer that is only flushed on `close`.
    pub fn unclosable(writer: W) -> Self {
        Self {
            writer: Some(writer),
            closable: false,
        }
    }
}

impl<W: Write + Send> Transport for WriterTransport<W> {
    fn write_line(&mut self, text: &str) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))?;
        writer.write_all(text.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        if self.closable {
            self.writer = None;
        }
        Ok(())
    }
}

/// Transport over a TCP stream.
struct TcpTransport {
    stream: Option<TcpStream>,
}

impl Transport for TcpTransport {
    fn write_line(&mut self, text: &str) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))?;
        // one write per line keeps the segment count low with nodelay set
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.push(b'\n');
        stream.write_all(&buf)?;
        stream.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.shutdown(std::net::Shutdown::Write)?;
        }
        Ok(())
    }
}

/// Connector for a [`CollectionUri`].
///
/// Files are truncated on the first open (unless `append` is set) and
/// appended to on every reconnect so earlier output is kept.
#[derive(Debug, Clone)]
pub struct UriConnector {
    uri: CollectionUri,
    append: bool,
    opened: bool,
}

impl UriConnector {
    /// Create a connector.
    pub fn new(uri: CollectionUri, append: bool) -> Self {
        Self {
            uri,
            append,
            opened: false,
        }
    }

    /// The target URI.
    pub fn uri(&self) -> &CollectionUri {
        &self.uri
    }
}

impl Connector for UriConnector {
    fn connect(&mut self) -> Result<Box<dyn Transport>> {
        let transport: Box<dyn Transport> = match &self.uri {
            CollectionUri::Stdout => Box::new(WriterTransport::unclosable(io::stdout())),
            CollectionUri::File(path) => {
                let connection_error = |source| Error::Connection {
                    uri: self.uri.to_string(),
                    source,
                };
                // writes always go through an append handle so several
                // channels can share one file without clobbering each other
                if !self.append && !self.opened {
                    File::create(path).map_err(connection_error)?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(connection_error)?;
                Box::new(WriterTransport::new(BufWriter::new(file)))
            }
            CollectionUri::Tcp { host, port } => {
                let stream =
                    TcpStream::connect((host.as_str(), *port)).map_err(|source| Error::Connection {
                        uri: self.uri.to_string(),
                        source,
                    })?;
                stream.set_nodelay(true)?;
                Box::new(TcpTransport {
                    stream: Some(stream),
                })
            }
        };
        self.opened = true;
        Ok(transport)
    }

    fn describe(&self) -> String {
        self.uri.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    fn tcp(host: &str, port: u16) -> CollectionUri {
        CollectionUri::Tcp {
            host: host.to_string(),
            port,
        }
    }

    #[test]
    fn parse_qualifies_short_forms() {
        assert_eq!(CollectionUri::parse("localhost").unwrap(), tcp("localhost", 3003));
        assert_eq!(CollectionUri::parse("localhost:3004").unwrap(), tcp("localhost", 3004));
        assert_eq!(CollectionUri::parse("tcp:localhost").unwrap(), tcp("localhost", 3003));
        assert_eq!(
            CollectionUri::parse("tcp:localhost:3004").unwrap(),
            tcp("localhost", 3004)
        );
        assert_eq!(
            CollectionUri::parse("tcp://localhost:3004").unwrap(),
            tcp("localhost", 3004)
        );
    }

    #[test]
    fn parse_file_forms() {
        assert_eq!(CollectionUri::parse("file:-").unwrap(), CollectionUri::Stdout);
        assert_eq!(
            CollectionUri::parse("file:/tmp/a:b.oml").unwrap(),
            CollectionUri::File(PathBuf::from("/tmp/a:b.oml"))
        );
        assert!(matches!(CollectionUri::parse("file:"), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn parse_rejects_unknown_schemes() {
        assert!(matches!(
            CollectionUri::parse("udp:host:3003"),
            Err(Error::UnsupportedScheme(s)) if s == "udp"
        ));
        assert!(matches!(
            CollectionUri::parse("http:host"),
            Err(Error::UnsupportedScheme(s)) if s == "http"
        ));
        assert!(matches!(CollectionUri::parse("tcp:h:notaport"), Err(Error::InvalidUri(_))));
        assert!(matches!(CollectionUri::parse("a:b:c:d"), Err(Error::InvalidUri(_))));
        assert!(matches!(CollectionUri::parse(""), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn display_is_fully_qualified() {
        assert_eq!(tcp("h", 1).to_string(), "tcp:h:1");
        assert_eq!(CollectionUri::Stdout.to_string(), "file:-");
        assert_eq!(CollectionUri::Stdout.scheme(), "file");
    }

    #[test]
    fn file_is_truncated_then_appended_on_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.oml");
        std::fs::write(&path, "stale\n").unwrap();

        let mut connector = UriConnector::new(CollectionUri::File(path.clone()), false);
        let mut first = connector.connect().unwrap();
        first.write_line("one").unwrap();
        first.close().unwrap();

        let mut second = connector.connect().unwrap();
        second.write_line("two").unwrap();
        second.close().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn append_mode_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.oml");
        std::fs::write(&path, "kept\n").unwrap();

        let mut connector = UriConnector::new(CollectionUri::File(path.clone()), true);
        let mut transport = connector.connect().unwrap();
        transport.write_line("new").unwrap();
        transport.close().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kept\nnew\n");
    }

    #[test]
    fn unreachable_tcp_is_a_connection_error() {
        // bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let mut connector = UriConnector::new(tcp("127.0.0.1", port), false);
        assert!(matches!(connector.connect(), Err(Error::Connection { .. })));
    }

    #[test]
    fn tcp_lines_reach_the_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut connector = UriConnector::new(tcp("127.0.0.1", port), false);
        let mut transport = connector.connect().unwrap();
        let (stream, _) = listener.accept().unwrap();

        transport.write_line("hello\tworld").unwrap();
        transport.close().unwrap();

        let lines: Vec<String> = BufReader::new(stream).lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["hello\tworld"]);
    }

    #[test]
    fn closed_writer_reports_not_connected() {
        let mut transport = WriterTransport::new(Vec::new());
        transport.close().unwrap();
        let err = transport.write_line("x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
