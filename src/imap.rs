use std::time::Duration;

use async_imap::error::Error as ImapError;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::error::{Error, Result};

type ImapStream = Compat<TlsStream<TcpStream>>;

/// Lifecycle of a mailbox session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Authenticated,
    Selected,
    Closed,
}

/// Opaque token for one message within the selected mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u32);

/// The capability set the ingestion pipeline needs from a remote mailbox.
#[async_trait]
pub trait MailboxSession: Send {
    fn state(&self) -> SessionState;

    /// Disconnected → Connected. Fails with [`Error::Connection`].
    async fn connect(&mut self, host: &str, port: u16) -> Result<()>;

    /// Connected → Authenticated. Fails with [`Error::Auth`] on rejection.
    async fn authenticate(&mut self, user: &str, secret: &str) -> Result<()>;

    /// Authenticated → Selected. Returns the message count of the mailbox.
    async fn select_mailbox(&mut self, name: &str) -> Result<u32>;

    /// All message handles in ascending server order.
    async fn search_all(&mut self) -> Result<Vec<Handle>>;

    /// Full raw bytes of one message. [`Error::Protocol`] is scoped to this
    /// handle; [`Error::Connection`] means the session is gone.
    async fn fetch(&mut self, handle: Handle) -> Result<Vec<u8>>;

    /// Tear down from any state. Safe to call repeatedly.
    async fn close(&mut self);
}

/// The most recent `limit` handles, newest first.
pub fn recent_handles(handles: &[Handle], limit: usize) -> Vec<Handle> {
    let start = handles.len().saturating_sub(limit);
    handles[start..].iter().rev().copied().collect()
}

/// Connect and command timeouts. Expiry is reported as a connection error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub command: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            command: Duration::from_secs(60),
        }
    }
}

enum Conn {
    None,
    Client(async_imap::Client<ImapStream>),
    Session(async_imap::Session<ImapStream>),
}

/// A live IMAP session over implicit TLS.
pub struct ImapSession {
    conn: Conn,
    state: SessionState,
    timeouts: Timeouts,
}

impl std::fmt::Debug for ImapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapSession")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ImapSession {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            conn: Conn::None,
            state: SessionState::Disconnected,
            timeouts,
        }
    }

    fn require(&self, operation: &'static str, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn session(&mut self, operation: &'static str) -> Result<&mut async_imap::Session<ImapStream>> {
        match &mut self.conn {
            Conn::Session(session) => Ok(session),
            _ => Err(Error::InvalidState {
                operation,
                state: self.state,
            }),
        }
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("IMAP session {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.require("connect", SessionState::Disconnected)?;

        let tls_stream = timeout(self.timeouts.connect, async {
            let tcp = TcpStream::connect((host, port))
                .await
                .map_err(|e| Error::Connection(format!("TCP connect to {host}:{port}: {e}")))?;
            let connector = tokio_native_tls::native_tls::TlsConnector::new()
                .map_err(|e| Error::Connection(format!("TLS setup: {e}")))?;
            tokio_native_tls::TlsConnector::from(connector)
                .connect(host, tcp)
                .await
                .map_err(|e| Error::Connection(format!("TLS handshake with {host}: {e}")))
        })
        .await
        .map_err(|_| Error::Connection(format!("connect to {host}:{port} timed out")))??;

        self.conn = Conn::Client(async_imap::Client::new(tls_stream.compat()));
        self.transition(SessionState::Connected);
        Ok(())
    }

    async fn authenticate(&mut self, user: &str, secret: &str) -> Result<()> {
        self.require("authenticate", SessionState::Connected)?;
        let Conn::Client(client) = std::mem::replace(&mut self.conn, Conn::None) else {
            return Err(Error::InvalidState {
                operation: "authenticate",
                state: self.state,
            });
        };

        match timeout(self.timeouts.command, client.login(user, secret)).await {
            Ok(Ok(session)) => {
                self.conn = Conn::Session(session);
                self.transition(SessionState::Authenticated);
                Ok(())
            }
            Ok(Err((e, client))) => {
                self.conn = Conn::Client(client);
                match e {
                    ImapError::No(msg) | ImapError::Bad(msg) => Err(Error::Auth(msg)),
                    other => Err(Error::Connection(format!("login: {other}"))),
                }
            }
            Err(_) => {
                // The client was consumed by the timed-out future.
                self.transition(SessionState::Closed);
                Err(Error::Connection("login timed out".into()))
            }
        }
    }

    async fn select_mailbox(&mut self, name: &str) -> Result<u32> {
        self.require("select", SessionState::Authenticated)?;
        let limit = self.timeouts.command;
        let session = self.session("select")?;
        let mailbox = timeout(limit, session.select(name))
            .await
            .map_err(|_| Error::Connection(format!("SELECT {name} timed out")))?
            .map_err(|e| match e {
                ImapError::No(msg) | ImapError::Bad(msg) => {
                    Error::Protocol(format!("cannot select mailbox '{name}': {msg}"))
                }
                other => classify(other),
            })?;
        self.transition(SessionState::Selected);
        Ok(mailbox.exists)
    }

    async fn search_all(&mut self) -> Result<Vec<Handle>> {
        self.require("search", SessionState::Selected)?;
        let limit = self.timeouts.command;
        let session = self.session("search")?;
        let found = timeout(limit, session.search("ALL"))
            .await
            .map_err(|_| Error::Connection("SEARCH timed out".into()))?
            .map_err(classify)?;
        // The server reply is a set; restore its ascending sequence order.
        let mut handles: Vec<Handle> = found.into_iter().map(Handle).collect();
        handles.sort_unstable();
        Ok(handles)
    }

    async fn fetch(&mut self, handle: Handle) -> Result<Vec<u8>> {
        self.require("fetch", SessionState::Selected)?;
        let limit = self.timeouts.command;
        let session = self.session("fetch")?;

        let raw = timeout(limit, async {
            let stream = session
                .fetch(handle.0.to_string(), "BODY.PEEK[]")
                .await
                .map_err(classify)?;
            tokio::pin!(stream);
            let mut raw = None;
            // Drain the whole response so the session stays in sync.
            while let Some(item) = stream.next().await {
                let fetch = item.map_err(classify)?;
                if raw.is_none() {
                    raw = fetch.body().map(<[u8]>::to_vec);
                }
            }
            Ok::<_, Error>(raw)
        })
        .await
        .map_err(|_| Error::Connection(format!("FETCH {} timed out", handle.0)))??;

        raw.ok_or_else(|| Error::Protocol(format!("FETCH {} returned no body", handle.0)))
    }

    async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let limit = self.timeouts.command;
        match std::mem::replace(&mut self.conn, Conn::None) {
            Conn::Session(mut session) => {
                if self.state == SessionState::Selected {
                    if let Ok(Err(e)) = timeout(limit, session.close()).await {
                        log::debug!("IMAP CLOSE failed: {e}");
                    }
                }
                match timeout(limit, session.logout()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => log::debug!("IMAP LOGOUT failed: {e}"),
                    Err(_) => log::debug!("IMAP LOGOUT timed out"),
                }
            }
            // Never logged in: dropping the stream closes the socket.
            Conn::Client(_) | Conn::None => {}
        }
        self.transition(SessionState::Closed);
    }
}

/// Map a transport-level IMAP error onto the crate taxonomy.
fn classify(e: ImapError) -> Error {
    match e {
        ImapError::No(msg) | ImapError::Bad(msg) => Error::Protocol(msg),
        ImapError::Parse(e) => Error::Protocol(format!("unparseable server response: {e}")),
        other => Error::Connection(other.to_string()),
    }
}
