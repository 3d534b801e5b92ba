//! Minimal anonymous FTP session for tree walks
//!
//! The walker consumes LIST output as raw bytes because file names arrive in
//! whatever encoding the server uses; high-level FTP clients hand listings
//! back as UTF-8 strings and choke on anything else, so the walk drives the
//! control and data channels directly. Anonymous login and passive mode
//! only. The liveness probe keeps using `suppaftp` (see `probe`).

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

/// Upper bound on one whole LIST transfer; per-read socket timeouts cannot
/// stop a server that drips bytes forever.
const LIST_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum FtpError {
    #[error("FTP I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed FTP reply: {0:?}")]
    BadReply(String),

    #[error("{command} rejected: {reply}")]
    Rejected { command: String, reply: String },

    #[error("LIST transfer took too long")]
    ListTimeout,
}

impl FtpError {
    fn rejected(command: &str, reply: String) -> Self {
        Self::Rejected {
            command: command.to_string(),
            reply,
        }
    }
}

/// One FTP control connection, logged in anonymously, issuing LIST commands
/// over passive-mode data connections.
pub struct FtpSession {
    control: BufReader<TcpStream>,
    timeout: Duration,
}

impl FtpSession {
    /// Open the control connection and read the greeting, all within
    /// `timeout` per socket operation.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, FtpError> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let mut session = Self {
            control: BufReader::new(stream),
            timeout,
        };
        let (code, reply) = session.read_reply()?;
        if code != 220 {
            return Err(FtpError::rejected("CONNECT", reply));
        }
        debug!(address = %addr, "FTP control connection established");
        Ok(session)
    }

    pub fn login_anonymous(&mut self) -> Result<(), FtpError> {
        let (code, reply) = self.command(b"USER anonymous")?;
        match code {
            230 => return Ok(()),
            331 | 332 => {},
            _ => return Err(FtpError::rejected("USER", reply)),
        }
        let (code, reply) = self.command(b"PASS ftpscout@")?;
        if code != 230 {
            return Err(FtpError::rejected("PASS", reply));
        }
        Ok(())
    }

    /// Unicode preflight. `Ok(false)` when the server answered but refused;
    /// the caller falls back to encoding detection.
    pub fn try_utf8(&mut self) -> Result<bool, FtpError> {
        let (code, _) = self.command(b"OPTS UTF8 ON")?;
        Ok((200..300).contains(&code))
    }

    /// LIST `raw_path` (undecoded server bytes), returning the raw lines.
    pub fn list(&mut self, raw_path: &[u8]) -> Result<Vec<Vec<u8>>, FtpError> {
        let data_addr = self.passive()?;
        let data = TcpStream::connect_timeout(&data_addr, self.timeout)?;
        data.set_read_timeout(Some(self.timeout))?;

        let mut command = b"LIST ".to_vec();
        command.extend_from_slice(raw_path);
        let (code, reply) = self.command(&command)?;
        if !matches!(code, 125 | 150) {
            return Err(FtpError::rejected("LIST", reply));
        }

        let bytes = read_until_eof(data)?;

        let (code, reply) = self.read_reply()?;
        if !matches!(code, 226 | 250) {
            return Err(FtpError::rejected("LIST", reply));
        }

        trace!(bytes = bytes.len(), "LIST transfer complete");
        Ok(split_lines(&bytes))
    }

    /// Say goodbye. A failed QUIT does not invalidate the walk.
    pub fn quit(mut self) {
        match self.command(b"QUIT") {
            Ok(_) => trace!("FTP session closed"),
            Err(e) => debug!(error = %e, "QUIT failed"),
        }
    }

    fn passive(&mut self) -> Result<SocketAddr, FtpError> {
        let (code, reply) = self.command(b"PASV")?;
        if code != 227 {
            return Err(FtpError::rejected("PASV", reply));
        }
        parse_pasv_reply(&reply).ok_or(FtpError::BadReply(reply))
    }

    fn command(&mut self, command: &[u8]) -> Result<(u16, String), FtpError> {
        let stream = self.control.get_mut();
        stream.write_all(command)?;
        stream.write_all(b"\r\n")?;
        self.read_reply()
    }

    fn read_reply(&mut self) -> Result<(u16, String), FtpError> {
        let mut line = self.read_line()?;
        let bytes = line.as_bytes();
        if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(FtpError::BadReply(line));
        }
        let code: u16 = line[..3]
            .parse()
            .map_err(|_| FtpError::BadReply(line.clone()))?;

        // "xyz-" opens a multi-line reply terminated by a "xyz " line.
        if line.as_bytes()[3] == b'-' {
            let terminator = format!("{code} ");
            loop {
                let next = self.read_line()?;
                let done = next.starts_with(&terminator);
                line = next;
                if done {
                    break;
                }
            }
        }
        Ok((code, line))
    }

    fn read_line(&mut self) -> Result<String, FtpError> {
        let mut raw = Vec::new();
        self.control.read_until(b'\n', &mut raw)?;
        if raw.is_empty() {
            return Err(FtpError::BadReply("connection closed".to_string()));
        }
        while matches!(raw.last(), Some(b'\r' | b'\n')) {
            raw.pop();
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

/// `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
fn parse_pasv_reply(reply: &str) -> Option<SocketAddr> {
    let start = reply.find('(')?;
    let end = reply[start..].find(')')? + start;
    let fields = reply[start + 1..end]
        .split(',')
        .map(|f| f.trim().parse().ok())
        .collect::<Option<Vec<u8>>>()?;
    if fields.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(fields[0], fields[1], fields[2], fields[3]);
    let port = (u16::from(fields[4]) << 8) | u16::from(fields[5]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

fn read_until_eof(mut stream: TcpStream) -> Result<Vec<u8>, FtpError> {
    let deadline = Instant::now() + LIST_DEADLINE;
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        if Instant::now() >= deadline {
            return Err(FtpError::ListTimeout);
        }
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(data)
}

/// Split on `\n`, strip a trailing `\r`, drop empty lines. Trailing spaces
/// inside a line are part of the file name and survive.
fn split_lines(bytes: &[u8]) -> Vec<Vec<u8>> {
    bytes
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Scripted FTP server for tests: anonymous login, passive mode, listings
/// served from a raw-path map. Shared by the session tests here and the
/// indexing pipeline tests.
#[cfg(test)]
pub(crate) mod testserver {
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::thread;

    /// Serve up to `max_connections` sessions; `tree` maps the raw LIST
    /// argument to the raw listing payload.
    pub(crate) fn serve(
        tree: HashMap<Vec<u8>, Vec<u8>>,
        max_connections: usize,
    ) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            for _ in 0..max_connections {
                let Ok((control, _)) = listener.accept() else {
                    break;
                };
                let tree = tree.clone();
                thread::spawn(move || handle(control, tree));
            }
        });

        addr
    }

    fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<u8>> {
        let mut raw = Vec::new();
        reader.read_until(b'\n', &mut raw).ok()?;
        if raw.is_empty() {
            return None;
        }
        while matches!(raw.last(), Some(b'\r' | b'\n')) {
            raw.pop();
        }
        Some(raw)
    }

    fn handle(mut control: TcpStream, tree: HashMap<Vec<u8>, Vec<u8>>) {
        let mut reader = BufReader::new(control.try_clone().unwrap());
        control.write_all(b"220 scripted server ready\r\n").unwrap();

        while let Some(command) = read_command(&mut reader) {
            if command.starts_with(b"USER") {
                control
                    .write_all(b"331 anonymous ok, send password\r\n")
                    .unwrap();
            } else if command.starts_with(b"PASS") {
                control.write_all(b"230 logged in\r\n").unwrap();
            } else if command.starts_with(b"OPTS") {
                control.write_all(b"200 always in UTF8 mode\r\n").unwrap();
            } else if command.starts_with(b"PASV") {
                let data_listener = TcpListener::bind("127.0.0.1:0").unwrap();
                let port = data_listener.local_addr().unwrap().port();
                control
                    .write_all(
                        format!(
                            "227 Entering Passive Mode (127,0,0,1,{},{})\r\n",
                            port >> 8,
                            port & 0xff
                        )
                        .as_bytes(),
                    )
                    .unwrap();

                let Some(list) = read_command(&mut reader) else {
                    break;
                };
                assert!(list.starts_with(b"LIST "));
                let payload = tree.get(&list[5..]).cloned();
                match payload {
                    Some(payload) => {
                        control.write_all(b"150 here it comes\r\n").unwrap();
                        let (mut data, _) = data_listener.accept().unwrap();
                        data.write_all(&payload).unwrap();
                        drop(data);
                        control.write_all(b"226 done\r\n").unwrap();
                    },
                    None => {
                        control.write_all(b"550 no such directory\r\n").unwrap();
                    },
                }
            } else if command.starts_with(b"QUIT") {
                control.write_all(b"221 bye\r\n").unwrap();
                break;
            } else {
                control.write_all(b"502 not implemented\r\n").unwrap();
            }
        }
        // Drain anything the client still sends after our goodbye.
        let mut sink = Vec::new();
        let _ = reader.read_to_end(&mut sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_parse_pasv_reply() {
        let addr = parse_pasv_reply("227 Entering Passive Mode (127,0,0,1,4,1).").unwrap();
        assert_eq!(addr, "127.0.0.1:1025".parse().unwrap());
        assert!(parse_pasv_reply("227 whatever").is_none());
        assert!(parse_pasv_reply("227 (1,2,3,4,5)").is_none());
        assert!(parse_pasv_reply("227 (1,2,3,4,5,boom)").is_none());
    }

    #[test]
    fn test_split_lines() {
        let lines = split_lines(b"first\r\nsecond  \r\n\r\nlast");
        assert_eq!(
            lines,
            vec![b"first".to_vec(), b"second  ".to_vec(), b"last".to_vec()]
        );
    }

    #[test]
    fn test_session_lists_raw_bytes() {
        let mut tree = HashMap::new();
        tree.insert(
            b"/".to_vec(),
            b"-rw-r--r-- 1 ftp ftp 57 Feb 20  2012 \xe9t\xe9.zip\r\n\
              drwxr-xr-x 1 ftp ftp 0 Mar 11 13:49 stuff\r\n"
                .to_vec(),
        );
        let addr = testserver::serve(tree, 1);

        let mut session = FtpSession::connect(addr, Duration::from_secs(2)).unwrap();
        session.login_anonymous().unwrap();
        assert!(session.try_utf8().unwrap());

        let lines = session.list(b"/").unwrap();
        assert_eq!(lines.len(), 2);
        // Undecoded latin-9 bytes make it through untouched.
        assert!(lines[0].ends_with(b"\xe9t\xe9.zip"));
        assert!(lines[1].ends_with(b"stuff"));

        session.quit();
    }

    #[test]
    fn test_list_of_unknown_path_is_rejected() {
        let addr = testserver::serve(HashMap::new(), 1);

        let mut session = FtpSession::connect(addr, Duration::from_secs(2)).unwrap();
        session.login_anonymous().unwrap();
        let result = session.list(b"/nowhere");
        assert!(matches!(result, Err(FtpError::Rejected { .. })));
    }

    #[test]
    fn test_connect_rejects_non_ftp_greeting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"500 go away\r\n").unwrap();
        });

        let result = FtpSession::connect(addr, Duration::from_secs(2));
        assert!(matches!(result, Err(FtpError::Rejected { .. })));
    }
}
