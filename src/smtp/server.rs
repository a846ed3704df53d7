//! TCP listener and connection loop

use crate::smtp::commands::SmtpCommandHandler;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::handler::MessageHandler;
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

use std::io::{self, BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Idle time after which a silent client is disconnected
const SESSION_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct SmtpServer {
    hostname: String,
}

impl SmtpServer {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_owned(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Bind `addr` and serve on the calling thread until the listener fails
    pub fn start<H>(&self, addr: impl ToSocketAddrs, handler: H) -> Result<(), SmtpError>
    where
        H: MessageHandler + 'static,
    {
        let listener = TcpListener::bind(addr)?;
        self.start_with_listener(listener, handler)
    }

    /// Serve on an already bound listener (blocking)
    pub fn start_with_listener<H>(&self, listener: TcpListener, handler: H) -> Result<(), SmtpError>
    where
        H: MessageHandler + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        self.serve(listener, Arc::new(handler), shutdown)
    }

    /// Bind `addr` now and run the accept loop on a background thread.
    ///
    /// Binding happens before this returns, so an occupied port is reported
    /// here rather than from the background thread.
    pub fn spawn<H>(&self, addr: impl ToSocketAddrs, handler: H) -> Result<ServerHandle, SmtpError>
    where
        H: MessageHandler + 'static,
    {
        let listener = TcpListener::bind(addr)?;
        self.spawn_with_listener(listener, handler)
    }

    pub fn spawn_with_listener<H>(
        &self,
        listener: TcpListener,
        handler: H,
    ) -> Result<ServerHandle, SmtpError>
    where
        H: MessageHandler + 'static,
    {
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let server = self.clone();
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        let flag = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("smtp-accept".to_string())
            .spawn(move || server.serve(listener, handler, flag))?;

        Ok(ServerHandle {
            local_addr,
            shutdown,
            thread: Some(thread),
        })
    }

    fn serve(
        &self,
        listener: TcpListener,
        handler: Arc<dyn MessageHandler>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(), SmtpError> {
        info!(addr = %listener.local_addr()?, host = %self.hostname, "SMTP server listening");

        for stream in listener.incoming() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Error accepting connection: {e}");
                    continue;
                }
            };

            let hostname = self.hostname.clone();
            let handler = Arc::clone(&handler);
            let spawned = thread::Builder::new()
                .name("smtp-session".to_string())
                .spawn(move || {
                    let peer = stream.peer_addr().ok();
                    if let Err(e) = handle_client(&hostname, stream, handler.as_ref()) {
                        warn!(?peer, "Error handling client: {e}");
                    }
                });
            if let Err(e) = spawned {
                warn!("Could not start session thread: {e}");
            }
        }

        info!("SMTP server stopped");
        Ok(())
    }
}

/// Run one SMTP conversation to completion
fn handle_client(
    hostname: &str,
    mut stream: TcpStream,
    handler: &dyn MessageHandler,
) -> Result<(), SmtpError> {
    let peer = stream.peer_addr().ok();
    debug!(?peer, "Client connected");

    stream.set_read_timeout(Some(SESSION_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let commands = SmtpCommandHandler::new(hostname);
    let mut session = SmtpSession::new();

    send_response(&mut stream, &SmtpResponse::greeting(hostname))?;

    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                send_response(
                    &mut stream,
                    &SmtpResponse::new(421, format!("{hostname} timeout, closing connection")),
                )?;
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let text = String::from_utf8_lossy(&raw);
        let line = text.trim_end_matches(['\r', '\n']);

        if session.in_data_mode() {
            if line == "." {
                let response = match session.finish_data() {
                    Ok(envelope) => handler.handle(envelope.with_peer(peer)),
                    Err(e) => SmtpResponse::from(&e),
                };
                send_response(&mut stream, &response)?;
            } else {
                // Transparency: a leading dot was doubled by the client
                let line = line.strip_prefix('.').unwrap_or(line);
                session.add_data_line(line.to_string());
            }
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }

        let response = match commands.process_command(line, &mut session) {
            Ok(response) => response,
            Err(e) => {
                debug!(?peer, command = line, "Command rejected: {e}");
                SmtpResponse::from(&e)
            }
        };
        send_response(&mut stream, &response)?;
        if response.closes_connection() {
            break;
        }
    }

    debug!(?peer, "Client disconnected");
    Ok(())
}

fn send_response(stream: &mut TcpStream, response: &SmtpResponse) -> Result<(), SmtpError> {
    let formatted = response.format();
    let too_long = formatted
        .split("\r\n")
        .any(|line| line.len() + 2 > SmtpLimits::REPLY_LINE_MAX_LENGTH);
    if too_long {
        let truncated = SmtpResponse::new(response.code, "Response too long (truncated)");
        stream.write_all(truncated.format().as_bytes())?;
    } else {
        stream.write_all(formatted.as_bytes())?;
    }
    stream.flush()?;
    Ok(())
}

/// A server running on a background thread.
///
/// Dropping the handle stops the server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), SmtpError>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    ///
    /// Sessions already in progress run to completion on their own threads.
    /// Calling this on a stopped server does nothing.
    pub fn stop(&mut self) -> Result<(), SmtpError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        self.shutdown.store(true, Ordering::SeqCst);
        // Unblock accept() so the loop sees the flag
        if let Err(e) = TcpStream::connect_timeout(&self.wake_addr(), Duration::from_secs(1)) {
            debug!("Wake-up connection failed: {e}");
        }

        thread
            .join()
            .map_err(|_| SmtpError::Io(io::Error::other("server thread panicked")))?
    }

    fn wake_addr(&self) -> SocketAddr {
        let ip = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        SocketAddr::new(ip, self.local_addr.port())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error stopping SMTP server: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smtp::envelope::Envelope;
    use std::sync::mpsc;

    fn start_test_server() -> (ServerHandle, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel();
        let handle = SmtpServer::new("test.local")
            .spawn("127.0.0.1:0", tx)
            .unwrap();
        (handle, rx)
    }

    fn send_command(
        stream: &mut TcpStream,
        reader: &mut BufReader<TcpStream>,
        command: &str,
    ) -> String {
        write!(stream, "{command}\r\n").unwrap();
        stream.flush().unwrap();
        read_reply(reader)
    }

    /// Read a full (possibly multiline) reply, returning its last line
    fn read_reply(reader: &mut BufReader<TcpStream>) -> String {
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line.as_bytes().get(3) != Some(&b'-') {
                return line.trim().to_string();
            }
        }
    }

    fn connect(handle: &ServerHandle) -> (TcpStream, BufReader<TcpStream>) {
        let stream = TcpStream::connect(handle.local_addr()).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let greeting = read_reply(&mut reader);
        assert!(greeting.starts_with("220 test.local"));
        (stream, reader)
    }

    #[test]
    fn test_server_creation() {
        let server = SmtpServer::new("test.local");
        assert_eq!(server.hostname(), "test.local");
    }

    #[test]
    fn test_complete_smtp_session() {
        let (handle, rx) = start_test_server();
        let (mut stream, mut reader) = connect(&handle);

        let steps = [
            ("EHLO client.local", "250"),
            ("MAIL FROM:<test@example.com>", "250"),
            ("RCPT TO:<recipient@example.com>", "250"),
            ("DATA", "354"),
        ];
        for (command, code) in steps {
            let response = send_command(&mut stream, &mut reader, command);
            assert!(response.starts_with(code), "{command}: {response}");
        }

        write!(
            stream,
            "Subject: Test Email\r\n\r\nThis is a test email.\r\n..leading dot\r\n.\r\n"
        )
        .unwrap();
        stream.flush().unwrap();
        assert!(read_reply(&mut reader).starts_with("250"));

        let response = send_command(&mut stream, &mut reader, "QUIT");
        assert!(response.starts_with("221"));

        let email = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(email.sender, "test@example.com");
        assert_eq!(email.recipients, vec!["recipient@example.com"]);
        assert_eq!(
            email.data,
            "Subject: Test Email\r\n\r\nThis is a test email.\r\n.leading dot\r\n"
        );
        assert!(email.peer.is_some());
    }

    #[test]
    fn test_error_handling() {
        let (handle, _rx) = start_test_server();
        let (mut stream, mut reader) = connect(&handle);

        let response = send_command(&mut stream, &mut reader, "INVALID");
        assert!(response.starts_with("500"));

        let response = send_command(&mut stream, &mut reader, "MAIL FROM:<test@example.com>");
        assert!(response.starts_with("503"));

        let response = send_command(&mut stream, &mut reader, "QUIT");
        assert!(response.starts_with("221"));
    }

    #[test]
    fn test_handler_reply_is_sent() {
        struct Refuse;
        impl MessageHandler for Refuse {
            fn handle(&self, _envelope: Envelope) -> SmtpResponse {
                SmtpResponse::rejected("Message rejected - all recipients invalid")
            }
        }

        let handle = SmtpServer::new("test.local")
            .spawn("127.0.0.1:0", Refuse)
            .unwrap();
        let (mut stream, mut reader) = connect(&handle);

        send_command(&mut stream, &mut reader, "HELO client.local");
        send_command(&mut stream, &mut reader, "MAIL FROM:<a@example.com>");
        send_command(&mut stream, &mut reader, "RCPT TO:<b@example.com>");
        send_command(&mut stream, &mut reader, "DATA");
        let response = send_command(&mut stream, &mut reader, "Subject: x\r\n\r\nbody\r\n.");
        assert_eq!(response, "550 Message rejected - all recipients invalid");
    }

    #[test]
    fn test_stop_releases_port() {
        let (mut handle, _rx) = start_test_server();
        let addr = handle.local_addr();
        assert!(handle.is_running());

        handle.stop().unwrap();
        assert!(!handle.is_running());
        handle.stop().unwrap();

        let rebound = TcpListener::bind(addr);
        assert!(rebound.is_ok());
    }

    #[test]
    fn test_occupied_port_fails() {
        let (handle, _rx) = start_test_server();
        let (tx, _rx2) = mpsc::channel::<Envelope>();

        let result = SmtpServer::new("test.local").spawn(handle.local_addr(), tx);
        assert!(result.unwrap_err().is_address_in_use());
    }
}
