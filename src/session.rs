//! Line-oriented login sessions to a DX cluster or a CW skimmer.
//!
//! Both feeds speak the same telnet-style dialogue: the server sends some
//! welcome text, asks for a callsign, and then shows a prompt once the login
//! is accepted. After that it streams lines and accepts commands.
//!
//! A [`SessionEndpoint`] never lets an I/O error escape. Failures are logged
//! and move the session back to [`SessionState::Disconnected`]; the poll loop
//! decides when to try again.
//!
//! The login dialogue can take seconds, so [`SessionEndpoint::start_connect`]
//! runs it on its own task and [`SessionEndpoint::poll_login`] picks up the
//! result without waiting. Other endpoints keep being served meanwhile.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, trace, warn};

/// Maximum bytes read from the socket in one receive.
pub const RECV_BUFFER_SIZE: usize = 8192;

/// Appended to every command sent to the server.
pub const LINE_TERMINATOR: &str = "\n";

/// Command sent before closing a session.
pub const LOGOUT_COMMAND: &str = "BYE";

/// Upper bound on any single write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for the server to acknowledge a logout.
const LOGOUT_WAIT: Duration = Duration::from_millis(500);

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingLogin,
    LoggedIn,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::AwaitingLogin => write!(f, "awaiting login"),
            SessionState::LoggedIn => write!(f, "logged in"),
        }
    }
}

/// Reasons a login attempt fails. Only used for logging.
#[derive(Debug, Error)]
enum SessionError {
    #[error("connection timed out")]
    ConnectTimeout,

    #[error("no prompt within {0:?}")]
    LoginTimeout(Duration),

    #[error("connection closed by server")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("login task ended: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Short name used in log output (`skimmer`, `cluster`).
    pub name: String,

    pub host: String,
    pub port: u16,

    /// Callsign sent when the login prompt appears.
    pub user: String,

    /// Sent when `password_prompt` appears, if both are set.
    pub password: String,
    pub password_prompt: Option<String>,

    /// Text that shows the login was accepted.
    pub prompt: String,

    /// Text that asks for the callsign.
    pub login_prompt: String,

    pub connect_timeout: Duration,

    /// Overall deadline for the login dialogue.
    pub login_timeout: Duration,

    /// Bound on each receive once logged in.
    pub receive_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "cluster".to_string(),
            host: "localhost".to_string(),
            port: 7300,
            user: "N0CALL".to_string(),
            password: String::new(),
            password_prompt: None,
            prompt: ">".to_string(),
            login_prompt: "login:".to_string(),
            connect_timeout: Duration::from_secs(5),
            login_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_millis(100),
        }
    }
}

impl SessionConfig {
    /// Address in `host:port` form.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Something commands can be written to.
///
/// Implemented by [`SessionEndpoint`]; the relay is written against this so
/// it can be exercised without sockets.
pub trait LineSink {
    /// Whether the sink currently accepts commands.
    fn is_ready(&self) -> bool;

    /// Send one command. Failures are handled by the sink.
    fn send_line(&mut self, line: &str) -> impl Future<Output = ()>;
}

/// Decode received bytes, dropping anything that is not valid UTF-8.
fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect()
}

async fn write_line(stream: &mut TcpStream, line: &str) -> std::io::Result<()> {
    let mut data = Vec::with_capacity(line.len() + LINE_TERMINATOR.len());
    data.extend_from_slice(line.as_bytes());
    data.extend_from_slice(LINE_TERMINATOR.as_bytes());

    timeout(WRITE_TIMEOUT, stream.write_all(&data))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))?
}

/// Connect and run the login dialogue, reporting progress on `progress`.
async fn open_and_login(
    config: SessionConfig,
    progress: watch::Sender<SessionState>,
) -> Result<TcpStream, SessionError> {
    let addr = config.addr();
    let mut stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| SessionError::ConnectTimeout)??;
    debug!("Connected to {}", addr);
    progress.send_replace(SessionState::AwaitingLogin);

    let deadline = Instant::now() + config.login_timeout;
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        let n = timeout_at(deadline, stream.read(&mut buf))
            .await
            .map_err(|_| SessionError::LoginTimeout(config.login_timeout))??;
        if n == 0 {
            return Err(SessionError::Closed);
        }

        let text = decode_text(&buf[..n]);
        for line in text.lines() {
            debug!("{} < {}", config.name, line);

            if !config.login_prompt.is_empty() && line.contains(&config.login_prompt) {
                debug!("Sending callsign {}", config.user);
                write_line(&mut stream, &config.user).await?;
            }

            if let Some(ref password_prompt) = config.password_prompt
                && !password_prompt.is_empty()
                && !config.password.is_empty()
                && line.contains(password_prompt.as_str())
            {
                debug!("Sending password");
                write_line(&mut stream, &config.password).await?;
            }

            if line.contains(&config.prompt) {
                return Ok(stream);
            }
        }
    }
}

/// A login running in the background.
struct PendingLogin {
    task: JoinHandle<Result<TcpStream, SessionError>>,
    progress: watch::Receiver<SessionState>,
}

/// A login session to a cluster or skimmer.
pub struct SessionEndpoint {
    config: SessionConfig,
    state: SessionState,
    stream: Option<TcpStream>,
    login: Option<PendingLogin>,
    /// Received text after the last complete line.
    carry: String,
}

impl SessionEndpoint {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Disconnected,
            stream: None,
            login: None,
            carry: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        match self.login {
            Some(ref pending) => *pending.progress.borrow(),
            None => self.state,
        }
    }

    /// Whether a login is running in the background.
    pub fn is_connecting(&self) -> bool {
        self.login.is_some()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == SessionState::LoggedIn
    }

    /// Drop the connection, and any login in progress, without any goodbye.
    fn reset(&mut self) {
        if let Some(pending) = self.login.take() {
            pending.task.abort();
        }
        self.stream = None;
        self.carry.clear();
        self.state = SessionState::Disconnected;
    }

    /// Start connecting and logging in on a background task.
    ///
    /// Must be called from within a tokio runtime. Any current connection is
    /// dropped first.
    pub fn start_connect(&mut self) {
        self.reset();
        info!("Connecting to {} at {}...", self.config.name, self.config.addr());

        let (progress, watcher) = watch::channel(SessionState::Connecting);
        self.state = SessionState::Connecting;
        self.login = Some(PendingLogin {
            task: tokio::spawn(open_and_login(self.config.clone(), progress)),
            progress: watcher,
        });
    }

    /// Pick up the result of a background login without waiting for it.
    ///
    /// Returns `None` while no login has finished, otherwise whether it
    /// succeeded.
    pub async fn poll_login(&mut self) -> Option<bool> {
        if !self.login.as_ref()?.task.is_finished() {
            return None;
        }
        let pending = self.login.take()?;
        Some(self.finish_login(pending).await)
    }

    /// Connect and log in, waiting for the outcome.
    ///
    /// Returns `true` once the server prompt has been seen. Any failure
    /// leaves the session disconnected.
    pub async fn connect(&mut self) -> bool {
        self.start_connect();
        match self.login.take() {
            Some(pending) => self.finish_login(pending).await,
            None => false,
        }
    }

    async fn finish_login(&mut self, pending: PendingLogin) -> bool {
        let result = match pending.task.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::from(e)),
        };

        match result {
            Ok(stream) => {
                self.carry.clear();
                self.stream = Some(stream);
                self.state = SessionState::LoggedIn;
                info!("Logged in to {} as {}", self.config.name, self.config.user);
                true
            }
            Err(e) => {
                warn!(
                    "Connection to {} at {} failed: {}",
                    self.config.name,
                    self.config.addr(),
                    e
                );
                self.reset();
                false
            }
        }
    }

    /// Send one command line. Errors are logged and drop the session.
    pub async fn send(&mut self, command: &str) {
        let Some(stream) = self.stream.as_mut() else {
            debug!("Not sending '{}': {} is not connected", command, self.config.name);
            return;
        };

        trace!("{} > {}", self.config.name, command);
        if let Err(e) = write_line(stream, command).await {
            warn!("Send to {} failed: {}", self.config.name, e);
            self.reset();
        }
    }

    /// Wait up to the receive timeout for data.
    ///
    /// Returns the complete lines received so far, or `None` when nothing
    /// complete arrived. A reset or closed connection starts one immediate
    /// reconnect in the background.
    pub async fn receive(&mut self) -> Option<String> {
        let stream = self.stream.as_mut()?;
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        match timeout(self.config.receive_timeout, stream.read(&mut buf)).await {
            Err(_) => None,
            Ok(Ok(0)) => {
                warn!("{} closed the connection", self.config.name);
                self.start_connect();
                None
            }
            Ok(Ok(n)) => {
                self.carry.push_str(&decode_text(&buf[..n]));
                self.take_lines()
            }
            Ok(Err(e)) => {
                warn!("Receive from {} failed: {}", self.config.name, e);
                self.start_connect();
                None
            }
        }
    }

    /// Split off everything up to the last line break.
    fn take_lines(&mut self) -> Option<String> {
        match self.carry.rfind('\n') {
            Some(end) => {
                let rest = self.carry.split_off(end + 1);
                Some(std::mem::replace(&mut self.carry, rest))
            }
            // a partial line that fills the buffer is never going to end
            None if self.carry.len() >= RECV_BUFFER_SIZE => Some(std::mem::take(&mut self.carry)),
            None => None,
        }
    }

    /// Log out and close. Best effort, bounded in time.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            info!("Disconnecting from {}", self.config.name);
            if let Err(e) = write_line(&mut stream, LOGOUT_COMMAND).await {
                debug!("Logout to {} failed: {}", self.config.name, e);
            }

            let mut buf = vec![0u8; 2048];
            if let Ok(Ok(n)) = timeout(LOGOUT_WAIT, stream.read(&mut buf)).await
                && n > 0
            {
                debug!("{} < {}", self.config.name, decode_text(&buf[..n]).trim_end());
            }

            let _ = timeout(LOGOUT_WAIT, stream.shutdown()).await;
        }
        self.reset();
    }
}

impl Drop for SessionEndpoint {
    fn drop(&mut self) {
        if let Some(pending) = self.login.take() {
            pending.task.abort();
        }
    }
}

impl LineSink for SessionEndpoint {
    fn is_ready(&self) -> bool {
        self.is_logged_in()
    }

    fn send_line(&mut self, line: &str) -> impl Future<Output = ()> {
        self.send(line)
    }
}

/// A disabled feed is never ready and drops whatever is sent to it.
impl<S: LineSink> LineSink for Option<S> {
    fn is_ready(&self) -> bool {
        self.as_ref().is_some_and(LineSink::is_ready)
    }

    async fn send_line(&mut self, line: &str) {
        if let Some(sink) = self {
            sink.send_line(line).await;
        }
    }
}
