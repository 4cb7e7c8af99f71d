//! Line-oriented blocking transport shared by the IMAP4 and POP3 sessions.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tracing::debug;

use crate::config::MailboxConfig;
use crate::error::ConnectionError;

/// Plaintext or TLS socket.
enum MailStream {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Read for MailStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            MailStream::Plain(s) => s.read(buf),
            MailStream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for MailStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            MailStream::Plain(s) => s.write(buf),
            MailStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            MailStream::Plain(s) => s.flush(),
            MailStream::Tls(s) => s.flush(),
        }
    }
}

/// Buffered connection with CRLF line framing.
pub(crate) struct Transport {
    stream: BufReader<MailStream>,
    timeout: Duration,
}

impl Transport {
    /// Open a TCP connection, wrapping it in TLS when the config asks for it.
    pub(crate) fn open(config: &MailboxConfig) -> Result<Self, ConnectionError> {
        let connect_err = |reason: String| ConnectionError::Connect {
            host: config.host.clone(),
            port: config.port,
            reason,
        };

        let addrs = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?;

        let mut last_err = String::from("no addresses resolved");
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_err = e.to_string(),
            }
        }
        let tcp = tcp.ok_or_else(|| connect_err(last_err))?;
        tcp.set_read_timeout(Some(config.timeout))?;
        tcp.set_write_timeout(Some(config.timeout))?;

        let stream = if config.uses_tls() {
            let tls_config = tls_config(config)?;
            let server_name = ServerName::try_from(config.host.clone())
                .map_err(|e| ConnectionError::Tls(format!("invalid server name: {e}")))?;
            let conn = rustls::ClientConnection::new(tls_config, server_name)
                .map_err(|e| ConnectionError::Tls(e.to_string()))?;
            MailStream::Tls(Box::new(rustls::StreamOwned::new(conn, tcp)))
        } else {
            MailStream::Plain(tcp)
        };

        debug!(
            host = %config.host,
            port = config.port,
            tls = config.uses_tls(),
            "Mailbox socket connected"
        );

        Ok(Self {
            stream: BufReader::new(stream),
            timeout: config.timeout,
        })
    }

    /// Read one line, without its line terminator.
    pub(crate) fn read_line(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let mut buf = Vec::new();
        let n = self
            .stream
            .read_until(b'\n', &mut buf)
            .map_err(|e| self.io_error(e))?;
        if n == 0 {
            return Err(ConnectionError::Closed);
        }
        if buf.ends_with(b"\n") {
            buf.pop();
            if buf.ends_with(b"\r") {
                buf.pop();
            }
        }
        Ok(buf)
    }

    /// Read exactly `len` bytes (an IMAP literal).
    pub(crate) fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, ConnectionError> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ConnectionError::Closed
            } else {
                self.io_error(e)
            }
        })?;
        Ok(buf)
    }

    /// Write `line` followed by CRLF and flush.
    pub(crate) fn write_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        let result = write_crlf_line(self.stream.get_mut(), line.as_bytes());
        result.map_err(|e| self.io_error(e))
    }

    fn io_error(&self, e: std::io::Error) -> ConnectionError {
        match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ConnectionError::Timeout(self.timeout)
            }
            _ => ConnectionError::Io(e),
        }
    }
}

fn write_crlf_line(stream: &mut MailStream, line: &[u8]) -> std::io::Result<()> {
    stream.write_all(line)?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}

/// Build a rustls client config trusting the webpki roots, presenting the
/// configured client certificate when there is one.
fn tls_config(config: &MailboxConfig) -> Result<Arc<rustls::ClientConfig>, ConnectionError> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ConnectionError::Tls(e.to_string()))?
    .with_root_certificates(root_store);

    let tls = match &config.client_auth {
        Some(auth) => {
            let certs = CertificateDer::pem_file_iter(&auth.cert_file)
                .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
                .map_err(|e| {
                    ConnectionError::Tls(format!(
                        "failed to read certificate {}: {e}",
                        auth.cert_file.display()
                    ))
                })?;
            let key = PrivateKeyDer::from_pem_file(&auth.key_file).map_err(|e| {
                ConnectionError::Tls(format!(
                    "failed to read private key {}: {e}",
                    auth.key_file.display()
                ))
            })?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ConnectionError::Tls(e.to_string()))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(tls))
}
