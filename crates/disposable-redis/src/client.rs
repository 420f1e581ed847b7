//! Client handle bound to a disposable server.
//!
//! A `Client` borrows its supervisor, so the server cannot be stopped while a
//! client is alive. The TCP connection is opened lazily on the first command
//! and dropped after any I/O or framing failure; the next command reconnects.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::process::DisposableRedis;
use crate::reload::{ReloadPhase, ReloadRetry};
use crate::resp::{encode_command, read_value, Value};
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use tracing::debug;

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Connection {
    fn open(port: u16) -> Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let stream = TcpStream::connect_timeout(&addr, HarnessConfig::CONNECT_TIMEOUT)
            .map_err(|e| HarnessError::connection(port, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| HarnessError::connection(port, e))?;
        let writer = stream
            .try_clone()
            .map_err(|e| HarnessError::connection(port, e))?;

        debug!("Connected to server on port {}", port);
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }
}

/// Client for one disposable server instance.
pub struct Client<'a> {
    server: &'a DisposableRedis,
    port: u16,
    conn: Option<Connection>,
}

impl std::fmt::Debug for Client<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("port", &self.port)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

impl<'a> Client<'a> {
    pub(crate) fn new(server: &'a DisposableRedis, port: u16) -> Self {
        Self {
            server,
            port,
            conn: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The supervisor this client is bound to.
    pub fn server(&self) -> &'a DisposableRedis {
        self.server
    }

    /// Send a raw command and return its reply.
    ///
    /// Error replies come back as [`HarnessError::Server`].
    pub fn execute<I, S>(&mut self, args: I) -> Result<Value>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let request = encode_command(args);
        let port = self.port;

        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => Connection::open(port)?,
        };

        let reply = conn
            .writer
            .write_all(&request)
            .and_then(|_| conn.writer.flush())
            .map_err(|e| HarnessError::connection(port, e))
            .and_then(|_| read_value(&mut conn.reader));

        // Only a clean exchange keeps the connection for reuse.
        match reply {
            Ok(Some(value)) => {
                self.conn = Some(conn);
                value.into_result()
            }
            Ok(None) => Err(HarnessError::Connection {
                port,
                message: "connection closed by server".to_string(),
                source: None,
            }),
            Err(HarnessError::Io { source: Some(e), .. }) => Err(HarnessError::connection(port, e)),
            Err(e) => Err(e),
        }
    }

    /// Liveness probe.
    pub fn ping(&mut self) -> Result<()> {
        match self.execute(["PING"])? {
            Value::Simple(s) if s == "PONG" => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.expect_ok("SET", ["SET", key, value])
    }

    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        match self.execute(["GET", key])? {
            Value::Bulk(None) => Ok(None),
            other => other
                .as_text()
                .map(Some)
                .ok_or_else(|| unexpected("GET", &other)),
        }
    }

    /// Delete keys, returning how many existed.
    pub fn del(&mut self, keys: &[&str]) -> Result<i64> {
        let args = std::iter::once("DEL").chain(keys.iter().copied());
        self.expect_integer("DEL", args)
    }

    pub fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.expect_integer("EXISTS", ["EXISTS", key])? > 0)
    }

    pub fn dbsize(&mut self) -> Result<i64> {
        self.expect_integer("DBSIZE", ["DBSIZE"])
    }

    /// Synchronously write the dataset to the dump file.
    pub fn save(&mut self) -> Result<()> {
        self.expect_ok("SAVE", ["SAVE"])
    }

    /// Discard in-memory state and reload it from the dump file.
    pub fn debug_reload(&mut self) -> Result<()> {
        self.expect_ok("DEBUG RELOAD", ["DEBUG", "RELOAD"])
    }

    /// Two-phase iteration: first attempt, then a retry after the server
    /// dumped and reloaded its state.
    ///
    /// The iterator holds the supervisor, not this client, so the client stays
    /// usable inside the loop.
    pub fn retry_with_reload(&self) -> ReloadRetry<'a> {
        ReloadRetry::new(self.server)
    }

    /// Run `body` once per [`ReloadPhase`], reloading in between.
    pub fn with_reload<E, F>(&mut self, mut body: F) -> std::result::Result<(), E>
    where
        F: FnMut(&mut Self, ReloadPhase) -> std::result::Result<(), E>,
        E: From<HarnessError>,
    {
        for phase in self.retry_with_reload() {
            body(self, phase?)?;
        }
        Ok(())
    }

    fn expect_ok<I, S>(&mut self, name: &str, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        match self.execute(args)? {
            Value::Simple(s) if s == "OK" => Ok(()),
            other => Err(unexpected(name, &other)),
        }
    }

    fn expect_integer<I, S>(&mut self, name: &str, args: I) -> Result<i64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let value = self.execute(args)?;
        value.as_integer().ok_or_else(|| unexpected(name, &value))
    }
}

fn unexpected(command: &str, reply: &Value) -> HarnessError {
    HarnessError::protocol(format!("unexpected reply to {}: {:?}", command, reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HarnessSettings, InstanceConfig};
    use crate::resp::write_value;
    use std::io::BufRead;
    use std::net::TcpListener;

    /// Serve scripted replies to a single connection.
    fn scripted_server(replies: Vec<Value>) -> (u16, std::thread::JoinHandle<Vec<Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut seen = Vec::new();
            for reply in replies {
                let request = read_value(&mut reader).unwrap().unwrap();
                seen.push(request);
                write_value(&mut writer, &reply).unwrap();
            }
            // Drain until the client hangs up
            let _ = reader.fill_buf();
            seen
        });
        (port, handle)
    }

    fn supervisor_on(port: u16) -> DisposableRedis {
        // Never started; only used as the client's owner.
        let config = InstanceConfig::new().with_port(port);
        DisposableRedis::with_settings(config, HarnessSettings::default())
    }

    #[test]
    fn test_commands_against_scripted_server() {
        let (port, handle) = scripted_server(vec![
            Value::Simple("PONG".into()),
            Value::ok(),
            Value::bulk("v"),
            Value::Bulk(None),
            Value::Integer(1),
        ]);
        let owner = supervisor_on(port);
        let mut client = Client::new(&owner, port);

        client.ping().unwrap();
        client.set("k", "v").unwrap();
        assert_eq!(client.get("k").unwrap(), Some("v".to_string()));
        assert_eq!(client.get("missing").unwrap(), None);
        assert_eq!(client.del(&["k"]).unwrap(), 1);
        drop(client);

        let seen = handle.join().unwrap();
        assert_eq!(seen.len(), 5);
        assert_eq!(
            seen[1],
            Value::Array(Some(vec![Value::bulk("SET"), Value::bulk("k"), Value::bulk("v")]))
        );
    }

    #[test]
    fn test_error_reply_is_server_error() {
        let (port, handle) = scripted_server(vec![Value::Error("ERR no dump".into())]);
        let owner = supervisor_on(port);
        let mut client = Client::new(&owner, port);

        let err = client.debug_reload().unwrap_err();
        assert_eq!(err.server_message(), Some("ERR no dump"));
        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn test_unexpected_reply_is_protocol_error() {
        let (port, handle) = scripted_server(vec![Value::Integer(3)]);
        let owner = supervisor_on(port);
        let mut client = Client::new(&owner, port);

        assert!(matches!(client.ping(), Err(HarnessError::Protocol { .. })));
        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn test_refused_connection_is_retryable() {
        let port = crate::network::allocate_port().unwrap();
        let owner = supervisor_on(port);
        let mut client = Client::new(&owner, port);

        let err = client.ping().unwrap_err();
        assert!(err.is_retryable(), "got {:?}", err);
    }
}
