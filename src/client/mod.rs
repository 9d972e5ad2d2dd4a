// The MIT License (MIT)

// Copyright (c) 2014 Y. T. CHUNG <zonyitoo@gmail.com>

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Memcached client

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use bufstream::BufStream;
use bytes::Bytes;
use conhash::{ConsistentHash, Node};
use parking_lot::Mutex;

use crate::proto::text::TextProto;
use crate::proto::{Cas, CasStore, Error, PersistTo, Result};

/// Replicas on the hash ring per unit of server weight
const REPLICAS_PER_WEIGHT: usize = 160;

/// Each key lives on exactly one server, which acknowledges from memory.
const NODES_PER_KEY: u8 = 1;

pub trait Stream: Read + Write + Send {}

impl<S: Read + Write + Send> Stream for S {}

type Connection = TextProto<BufStream<Box<dyn Stream>>>;

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AddrType {
    Tcp(String),
    #[cfg(unix)]
    Unix(String),
}

impl AddrType {
    fn parse(addr: &str) -> Result<AddrType> {
        if let Some(path) = addr.strip_prefix("unix://") {
            return unix_addr(path);
        }
        let host = addr.strip_prefix("tcp://").unwrap_or(addr);
        if host.is_empty() || !host.contains(':') {
            return Err(Error::Malformed {
                desc: "Server address must be host:port",
                detail: Some(addr.to_owned()),
            });
        }
        Ok(AddrType::Tcp(host.to_owned()))
    }

    fn connect(&self, opts: &ConnectOptions) -> io::Result<Box<dyn Stream>> {
        match *self {
            AddrType::Tcp(ref host) => {
                let stream = match opts.connect_timeout {
                    Some(limit) => connect_tcp_timeout(host, limit)?,
                    None => TcpStream::connect(&host[..])?,
                };
                stream.set_nodelay(true)?;
                stream.set_read_timeout(opts.read_timeout)?;
                stream.set_write_timeout(opts.write_timeout)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            AddrType::Unix(ref path) => {
                let stream = UnixStream::connect(path)?;
                stream.set_read_timeout(opts.read_timeout)?;
                stream.set_write_timeout(opts.write_timeout)?;
                Ok(Box::new(stream))
            }
        }
    }
}

#[cfg(unix)]
fn unix_addr(path: &str) -> Result<AddrType> {
    Ok(AddrType::Unix(path.to_owned()))
}

#[cfg(not(unix))]
fn unix_addr(path: &str) -> Result<AddrType> {
    Err(Error::Malformed {
        desc: "Unix sockets are not supported on this platform",
        detail: Some(path.to_owned()),
    })
}

fn connect_tcp_timeout(host: &str, limit: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in host.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, limit) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved")))
}

struct Server {
    addr: AddrType,
    conn: Mutex<Option<Connection>>,
}

impl Server {
    fn open(&self, opts: &ConnectOptions) -> io::Result<Connection> {
        let stream = self.addr.connect(opts)?;
        info!("connected to {:?}", self.addr);
        Ok(TextProto::new(BufStream::new(stream)))
    }
}

/// Position of a server on the hash ring.
#[derive(Debug, Clone)]
struct ServerNode {
    name: String,
    index: usize,
}

impl Node for ServerNode {
    fn name(&self) -> String {
        self.name.clone()
    }
}

/// A `CasStore` backed by memcached-protocol servers
///
/// Keys are spread over the servers with consistent hashing. Each server holds
/// one connection; a connection that fails is dropped and reopened on the next
/// call.
///
/// ```no_run
/// use hanger::client::{Client, ConnectOptions};
/// use hanger::Updater;
///
/// let client = Client::connect(&[("tcp://127.0.0.1:11211", 1)], ConnectOptions::default()).unwrap();
/// let updater = Updater::new(client);
/// let h = updater.initialize(&b"{\"data\":\"some json\"}"[..]).unwrap();
/// ```
pub struct Client {
    servers: Vec<Server>,
    ring: ConsistentHash<ServerNode>,
    options: ConnectOptions,
}

impl Client {
    /// Connect to Memcached servers
    ///
    /// Servers are given as `(address, weight)`; addresses are `tcp://host:port`,
    /// `host:port` or `unix://path`.
    pub fn connect(svrs: &[(&str, usize)], options: ConnectOptions) -> Result<Client> {
        if svrs.is_empty() {
            return Err(Error::Malformed {
                desc: "Empty server list",
                detail: None,
            });
        }

        let mut servers = Vec::new();
        let mut ring = ConsistentHash::new();
        for &(addr, weight) in svrs.iter() {
            let server = Server {
                addr: AddrType::parse(addr)?,
                conn: Mutex::new(None),
            };
            *server.conn.lock() = Some(server.open(&options)?);

            let node = ServerNode {
                name: addr.to_owned(),
                index: servers.len(),
            };
            ring.add(&node, weight.max(1) * REPLICAS_PER_WEIGHT);
            servers.push(server);
        }

        Ok(Client {
            servers: servers,
            ring: ring,
            options: options,
        })
    }

    fn find_server_by_key(&self, key: &str) -> &Server {
        let idx = self.ring.get(key.as_bytes()).map(|node| node.index).unwrap_or(0);
        &self.servers[idx]
    }

    /// Runs `f` on the connection owning `key`.
    fn with_conn<T, F>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        self.on_server(self.find_server_by_key(key), f)
    }

    /// A connection whose last call failed ambiguously may be out of step with
    /// the server, so it is dropped and the next call reconnects.
    fn on_server<T, F>(&self, server: &Server, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = server.conn.lock();
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => server.open(&self.options)?,
        };

        let result = f(&mut conn);
        match result {
            Err(ref err) if err.is_ambiguous() => {
                warn!("dropping connection to {:?}: {}", server.addr, err);
            }
            _ => *guard = Some(conn),
        }
        result
    }

    /// Versions reported by every server.
    pub fn versions(&self) -> Result<Vec<String>> {
        let mut versions = Vec::with_capacity(self.servers.len());
        for server in self.servers.iter() {
            versions.push(self.on_server(server, |conn| conn.version())?);
        }
        Ok(versions)
    }
}

impl CasStore for Client {
    fn insert(&self, key: &str, value: Bytes, persist: PersistTo) -> Result<()> {
        persist.check(NODES_PER_KEY)?;
        self.with_conn(key, |conn| conn.add(key, &value, 0, 0))
    }

    fn get(&self, key: &str) -> Result<(Bytes, Cas)> {
        self.with_conn(key, |conn| conn.gets(key).map(|(value, _, cas)| (value, cas)))
    }

    fn replace(&self, key: &str, value: Bytes, cas: Cas, persist: PersistTo) -> Result<()> {
        persist.check(NODES_PER_KEY)?;
        self.with_conn(key, |conn| conn.cas(key, &value, 0, 0, cas))
    }

    fn remove(&self, key: &str, persist: PersistTo) -> Result<()> {
        persist.check(NODES_PER_KEY)?;
        self.with_conn(key, |conn| match persist {
            PersistTo::None => conn.delete_noreply(key),
            _ => conn.delete(key),
        })
    }
}
