//! Scripted single-connection mail server for protocol tests.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use secrecy::SecretString;

use crate::config::MailboxConfig;
use crate::mailbox::Protocol;

/// Accepts one client, sends `greeting`, then answers every received line
/// with `respond(line)`. Stops after `LOGOUT`/`QUIT` or when the client hangs up.
pub(crate) struct ScriptedServer {
    pub port: u16,
    received: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    pub fn start<F>(greeting: &'static str, respond: F) -> Self
    where
        F: Fn(&str) -> String + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);

        let handle = std::thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            let mut writer = sock.try_clone().unwrap();
            writer.write_all(greeting.as_bytes()).unwrap();

            let mut reader = BufReader::new(sock);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
                let line = line.trim_end_matches(['\r', '\n']).to_string();
                log.lock().unwrap().push(line.clone());

                let reply = respond(&line);
                if writer.write_all(reply.as_bytes()).is_err() {
                    return;
                }
                let upper = line.to_ascii_uppercase();
                if upper.ends_with("LOGOUT") || upper == "QUIT" {
                    return;
                }
            }
        });

        Self {
            port,
            received,
            handle,
        }
    }

    /// Wait for the server thread and return every line the client sent.
    pub fn finish(self) -> Vec<String> {
        self.handle.join().unwrap();
        self.received.lock().unwrap().clone()
    }

    pub fn config(&self, protocol: Protocol) -> MailboxConfig {
        MailboxConfig {
            protocol,
            host: "127.0.0.1".into(),
            port: self.port,
            username: "editor".into(),
            password: SecretString::from("s3cret"),
            tls: false,
            client_auth: None,
            timeout: Duration::from_secs(5),
        }
    }
}
