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

//! Memcached text protocol, restricted to the commands a CAS chain needs.

use std::fmt;
use std::io::{self, BufRead, Read, Write};

use bytes::Bytes;

use crate::proto::{Cas, Error, Result};

// Storage commands
const OP_ADD: &str = "add";
const OP_CAS: &str = "cas";
const OP_DELETE: &str = "delete";
const OP_VERSION: &str = "version";

// Retrival commands
const OP_GETS: &str = "gets";

const NOREPLY: &str = "noreply";

const REPLY_ERROR: &str = "ERROR";
const REPLY_CLIENT_ERROR: &str = "CLIENT_ERROR";
const REPLY_SERVER_ERROR: &str = "SERVER_ERROR";

const REPLY_STORED: &str = "STORED";
const REPLY_NOT_STORED: &str = "NOT_STORED";
const REPLY_EXISTS: &str = "EXISTS";
const REPLY_NOT_FOUND: &str = "NOT_FOUND";
const REPLY_END: &str = "END";
const REPLY_VALUE: &str = "VALUE";
const REPLY_DELETED: &str = "DELETED";
const REPLY_VERSION: &str = "VERSION";

pub const MAX_KEY_LEN: usize = 250;
/// Largest item a server can be configured to hold (`-I 1024m`).
pub const MAX_VALUE_LEN: u64 = 1 << 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Error,
    ClientError(String),
    ServerError(String),
}

impl Reply {
    pub fn desc(&self) -> &'static str {
        match *self {
            Reply::Error => "error",
            Reply::ClientError(..) => "client error",
            Reply::ServerError(..) => "server error",
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Reply::Error => write!(f, "error"),
            Reply::ClientError(ref e) => write!(f, "client error: {}", e),
            Reply::ServerError(ref e) => write!(f, "server error: {}", e),
        }
    }
}

/// Keys must be at most 250 bytes with no whitespace or control characters.
pub fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(Error::Malformed {
            desc: "Key length must be within 1..=250 bytes",
            detail: Some(key.len().to_string()),
        });
    }
    if key.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(Error::Malformed {
            desc: "Key must not contain whitespace or control characters",
            detail: Some(key.to_owned()),
        });
    }
    Ok(())
}

fn unknown_reply(line: &str) -> Error {
    Error::bad_reply("Unknown reply", line)
}

/// Maps the three generic error replies, which any command may return.
fn error_reply(line: &str) -> Option<Error> {
    let mut splitted = line.splitn(2, ' ');
    match (splitted.next(), splitted.next()) {
        (Some(REPLY_ERROR), None) => Some(Error::Server(Reply::Error)),
        (Some(REPLY_CLIENT_ERROR), msg) => Some(Error::Server(Reply::ClientError(
            msg.unwrap_or_default().to_owned(),
        ))),
        (Some(REPLY_SERVER_ERROR), msg) => Some(Error::Server(Reply::ServerError(
            msg.unwrap_or_default().to_owned(),
        ))),
        _ => None,
    }
}

pub struct TextProto<S: BufRead + Write> {
    pub stream: S,
}

impl<S: BufRead + Write> TextProto<S> {
    pub fn new(stream: S) -> TextProto<S> {
        TextProto { stream: stream }
    }

    fn send(&mut self, cmd: &str, data: Option<&[u8]>) -> Result<()> {
        trace!("> {}", cmd);
        self.stream.write_all(cmd.as_bytes())?;
        self.stream.write_all(b"\r\n")?;
        if let Some(data) = data {
            self.stream.write_all(data)?;
            self.stream.write_all(b"\r\n")?;
        }
        self.stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let mut resp = String::new();
        if self.stream.read_line(&mut resp)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by server").into());
        }
        let line = resp.trim_end().to_owned();
        trace!("< {}", line);
        Ok(line)
    }

    /// `add`: store only if the key is absent.
    pub fn add(&mut self, key: &str, value: &[u8], flags: u32, expiration: u32) -> Result<()> {
        check_key(key)?;
        let cmd = format!("{} {} {} {} {}", OP_ADD, key, flags, expiration, value.len());
        self.send(&cmd, Some(value))?;

        let resp = self.read_line()?;
        match &resp[..] {
            REPLY_STORED => Ok(()),
            REPLY_NOT_STORED => Err(Error::DuplicateKey),
            line => Err(error_reply(line).unwrap_or_else(|| unknown_reply(line))),
        }
    }

    /// `cas`: store only if nobody wrote the key since `cas` was fetched.
    pub fn cas(&mut self, key: &str, value: &[u8], flags: u32, expiration: u32, cas: Cas) -> Result<()> {
        check_key(key)?;
        let cmd = format!(
            "{} {} {} {} {} {}",
            OP_CAS,
            key,
            flags,
            expiration,
            value.len(),
            cas.0
        );
        self.send(&cmd, Some(value))?;

        let resp = self.read_line()?;
        match &resp[..] {
            REPLY_STORED => Ok(()),
            REPLY_EXISTS => Err(Error::StaleVersion),
            REPLY_NOT_FOUND => Err(Error::NotFound),
            line => Err(error_reply(line).unwrap_or_else(|| unknown_reply(line))),
        }
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        check_key(key)?;
        self.send(&format!("{} {}", OP_DELETE, key), None)?;

        let resp = self.read_line()?;
        match &resp[..] {
            REPLY_DELETED => Ok(()),
            REPLY_NOT_FOUND => Err(Error::NotFound),
            line => Err(error_reply(line).unwrap_or_else(|| unknown_reply(line))),
        }
    }

    /// Fire-and-forget delete, the server sends nothing back.
    pub fn delete_noreply(&mut self, key: &str) -> Result<()> {
        check_key(key)?;
        self.send(&format!("{} {} {}", OP_DELETE, key, NOREPLY), None)
    }

    /// `gets`: value, flags and CAS unique of a single key.
    pub fn gets(&mut self, key: &str) -> Result<(Bytes, u32, Cas)> {
        check_key(key)?;
        self.send(&format!("{} {}", OP_GETS, key), None)?;

        let resp = self.read_line()?;
        if resp == REPLY_END {
            return Err(Error::NotFound);
        }

        let (flags, val_len, cas) = {
            let mut splitted = resp.split(' ');
            match (
                splitted.next(),
                splitted.next(),
                splitted.next(),
                splitted.next(),
                splitted.next(),
            ) {
                (Some(REPLY_VALUE), Some(rkey), Some(flags), Some(val_len), Some(cas)) => {
                    if rkey != key {
                        return Err(Error::bad_reply("Reply for another key", rkey));
                    }
                    let flags = flags
                        .parse::<u32>()
                        .map_err(|err| Error::bad_reply("Invalid flag", &err.to_string()))?;
                    let val_len = val_len
                        .parse::<u64>()
                        .map_err(|err| Error::bad_reply("Invalid value length", &err.to_string()))?;
                    if val_len > MAX_VALUE_LEN {
                        return Err(Error::bad_reply("Value too large", &val_len.to_string()));
                    }
                    let cas = cas
                        .parse::<u64>()
                        .map_err(|err| Error::bad_reply("Invalid cas", &err.to_string()))?;
                    (flags, val_len, Cas(cas))
                }
                _ => return Err(error_reply(&resp).unwrap_or_else(|| unknown_reply(&resp))),
            }
        };

        let mut val = Vec::new();
        (&mut self.stream).take(val_len).read_to_end(&mut val)?;
        if (val.len() as u64) < val_len {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated value").into());
        }
        let mut crlf = [0u8; 2];
        self.stream.read_exact(&mut crlf)?;

        let end = self.read_line()?;
        match &end[..] {
            REPLY_END => Ok((Bytes::from(val), flags, cas)),
            _ => Err(unknown_reply(&end)),
        }
    }

    pub fn version(&mut self) -> Result<String> {
        self.send(OP_VERSION, None)?;

        let resp = self.read_line()?;
        let mut splitted = resp.splitn(2, ' ');
        match (splitted.next(), splitted.next()) {
            (Some(REPLY_VERSION), Some(version)) => Ok(version.to_owned()),
            _ => Err(error_reply(&resp).unwrap_or_else(|| unknown_reply(&resp))),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, BufRead, Cursor, Read, Write};

    use crate::proto::text::{check_key, Reply, TextProto};
    use crate::proto::{Cas, Error};

    /// Scripted server: replies are queued up front, requests are recorded.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl BufRead for Duplex {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            self.input.fill_buf()
        }

        fn consume(&mut self, amt: usize) {
            self.input.consume(amt)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn proto(replies: &str) -> TextProto<Duplex> {
        TextProto::new(Duplex {
            input: Cursor::new(replies.as_bytes().to_vec()),
            output: Vec::new(),
        })
    }

    fn sent(p: &TextProto<Duplex>) -> String {
        String::from_utf8(p.stream.output.clone()).unwrap()
    }

    #[test]
    fn test_add() {
        let mut p = proto("STORED\r\nNOT_STORED\r\n");
        p.add("test:add", b"val", 0, 0).unwrap();
        assert_eq!(sent(&p), "add test:add 0 0 3\r\nval\r\n");

        match p.add("test:add", b"val", 0, 0) {
            Err(Error::DuplicateKey) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_gets() {
        let mut p = proto("VALUE test:gets 7 5 42\r\nhello\r\nEND\r\nEND\r\n");
        let (val, flags, cas) = p.gets("test:gets").unwrap();
        assert_eq!(&val[..], b"hello");
        assert_eq!(flags, 7);
        assert_eq!(cas, Cas(42));
        assert_eq!(sent(&p), "gets test:gets\r\n");

        match p.gets("test:gets") {
            Err(Error::NotFound) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_gets_value_with_crlf_inside() {
        let mut p = proto("VALUE k 0 4 1\r\na\r\nb\r\nEND\r\n");
        let (val, _, _) = p.gets("k").unwrap();
        assert_eq!(&val[..], b"a\r\nb");
    }

    #[test]
    fn test_cas() {
        let mut p = proto("STORED\r\nEXISTS\r\nNOT_FOUND\r\n");
        p.cas("h", b"v2", 0, 0, Cas(9)).unwrap();
        assert_eq!(sent(&p), "cas h 0 0 2 9\r\nv2\r\n");

        match p.cas("h", b"v3", 0, 0, Cas(9)) {
            Err(Error::StaleVersion) => {}
            other => panic!("unexpected {:?}", other),
        }
        match p.cas("h", b"v3", 0, 0, Cas(10)) {
            Err(Error::NotFound) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_delete() {
        let mut p = proto("DELETED\r\nNOT_FOUND\r\n");
        p.delete("gone").unwrap();
        assert!(match p.delete("gone") {
            Err(Error::NotFound) => true,
            _ => false,
        });

        p.delete_noreply("gone").unwrap();
        assert!(sent(&p).ends_with("delete gone noreply\r\n"));
    }

    #[test]
    fn test_error_replies() {
        let mut p = proto("SERVER_ERROR out of memory storing object\r\nERROR\r\n");
        match p.add("k", b"v", 0, 0) {
            Err(Error::Server(Reply::ServerError(msg))) => {
                assert_eq!(msg, "out of memory storing object")
            }
            other => panic!("unexpected {:?}", other),
        }
        match p.delete("k") {
            Err(Error::Server(Reply::Error)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_oversized_value_length() {
        let mut p = proto("VALUE k 0 18446744073709551615 1\r\nab\r\nEND\r\n");
        assert!(p.gets("k").unwrap_err().is_ambiguous());

        // within bounds but longer than what the server actually sent
        let mut p = proto("VALUE k 0 4096 1\r\nab\r\nEND\r\n");
        assert!(p.gets("k").unwrap_err().is_ambiguous());
    }

    #[test]
    fn test_unframed_reply_is_unavailable() {
        // a value for another key, whose body looks like the next reply
        let mut p = proto("VALUE other 0 6 1\r\nSTORED\r\nEND\r\nEXISTS\r\n");
        assert!(p.gets("h").unwrap_err().is_ambiguous());

        let mut p = proto("VALUE k 0 1 1\r\na\r\nVALUE k 0 1 2\r\n");
        assert!(p.gets("k").unwrap_err().is_ambiguous());

        let mut p = proto("MAYBE\r\n");
        assert!(p.cas("h", b"v", 0, 0, Cas(1)).unwrap_err().is_ambiguous());
    }

    #[test]
    fn test_closed_connection_is_unavailable() {
        let mut p = proto("");
        let err = p.gets("k").unwrap_err();
        assert!(err.is_ambiguous());
    }

    #[test]
    fn test_version() {
        let mut p = proto("VERSION 1.6.21\r\n");
        assert_eq!(p.version().unwrap(), "1.6.21");
    }

    #[test]
    fn test_keys() {
        assert!(check_key("0f3c-aa").is_ok());
        assert!(check_key("").is_err());
        assert!(check_key("with space").is_err());
        assert!(check_key("line\nbreak").is_err());
        assert!(check_key(&"k".repeat(251)).is_err());

        let mut p = proto("");
        assert!(p.add("bad key", b"v", 0, 0).is_err());
        assert!(p.stream.output.is_empty());
    }
}
