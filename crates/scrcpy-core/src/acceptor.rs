//! Establishes and reads the video/audio TCP connections to the agent.
//! Two connection modes: `Reverse` (we listen, agent dials back) and
//! `Forward` (we dial the agent, which must already be listening).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use scrcpy_common::config::ConnectionMode;
use scrcpy_common::error::{Error, Result};

const READ_CHUNK_MAX: usize = 65_536;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    Idle,
    Listening,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

pub type DataHandler = Box<dyn FnMut(&[u8]) + Send>;

struct Handlers {
    video: Option<DataHandler>,
    audio: Option<DataHandler>,
}

pub struct SocketAcceptor {
    mode: ConnectionMode,
    port: u16,
    audio_enabled: bool,
    state: Arc<Mutex<AcceptorState>>,
    handlers: Arc<Mutex<Handlers>>,
    video_task: Option<JoinHandle<()>>,
    audio_task: Option<JoinHandle<()>>,
    listener_task: Option<JoinHandle<()>>,
}

impl SocketAcceptor {
    pub fn new(mode: ConnectionMode, port: u16, audio_enabled: bool) -> Self {
        Self {
            mode,
            port,
            audio_enabled,
            state: Arc::new(Mutex::new(AcceptorState::Idle)),
            handlers: Arc::new(Mutex::new(Handlers {
                video: None,
                audio: None,
            })),
            video_task: None,
            audio_task: None,
            listener_task: None,
        }
    }

    pub fn set_on_video_data(&mut self, handler: DataHandler) {
        self.handlers.lock().unwrap().video = Some(handler);
    }

    pub fn set_on_audio_data(&mut self, handler: DataHandler) {
        self.handlers.lock().unwrap().audio = Some(handler);
    }

    pub fn state(&self) -> AcceptorState {
        *self.state.lock().unwrap()
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::InvalidPort(self.port));
        }
        *self.state.lock().unwrap() = AcceptorState::Connecting;
        match self.mode {
            ConnectionMode::Reverse => self.start_reverse().await,
            ConnectionMode::Forward => self.start_forward().await,
        }
    }

    async fn start_reverse(&mut self) -> Result<()> {
        *self.state.lock().unwrap() = AcceptorState::Listening;
        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(|e| {
                *self.state.lock().unwrap() = AcceptorState::Error;
                Error::port_forwarding_failed(format!("bind {}: {e}", self.port))
            })?;

        let (video_stream, _) = listener.accept().await.map_err(|e| {
            *self.state.lock().unwrap() = AcceptorState::Error;
            Error::receive_error(format!("accepting video connection: {e}"))
        })?;
        info!("video connection accepted (reverse mode)");
        self.spawn_reader(video_stream, ConnKind::Video);
        *self.state.lock().unwrap() = AcceptorState::Connected;

        if self.audio_enabled {
            match listener.accept().await {
                Ok((audio_stream, _)) => {
                    info!("audio connection accepted (reverse mode)");
                    self.spawn_reader(audio_stream, ConnKind::Audio);
                }
                Err(e) => {
                    warn!("audio connection failed, continuing video-only: {e}");
                }
            }
        }

        // Any further connection attempts are not part of the protocol;
        // close them immediately so the agent doesn't block on us.
        let state = self.state.clone();
        self.listener_task = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((extra, _)) => {
                        debug!("closing unexpected extra connection");
                        drop(extra);
                    }
                    Err(_) => break,
                }
                if *state.lock().unwrap() == AcceptorState::Disconnected {
                    break;
                }
            }
        }));

        Ok(())
    }

    async fn start_forward(&mut self) -> Result<()> {
        let video_stream = TcpStream::connect(("127.0.0.1", self.port))
            .await
            .map_err(|e| {
                *self.state.lock().unwrap() = AcceptorState::Error;
                Error::receive_error(format!("dialing video connection: {e}"))
            })?;
        info!("video connection dialed (forward mode)");
        self.spawn_reader(video_stream, ConnKind::Video);
        *self.state.lock().unwrap() = AcceptorState::Connected;

        if self.audio_enabled {
            match TcpStream::connect(("127.0.0.1", self.port)).await {
                Ok(audio_stream) => {
                    info!("audio connection dialed (forward mode)");
                    self.spawn_reader(audio_stream, ConnKind::Audio);
                }
                Err(e) => {
                    warn!("audio connection failed, continuing video-only: {e}");
                }
            }
        }
        Ok(())
    }

    fn spawn_reader(&mut self, mut stream: TcpStream, kind: ConnKind) {
        let handlers = self.handlers.clone();
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK_MAX];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) => {
                        debug!(?kind, "connection closed by peer");
                        break;
                    }
                    Ok(n) => {
                        let mut handlers = handlers.lock().unwrap();
                        let handler = match kind {
                            ConnKind::Video => handlers.video.as_mut(),
                            ConnKind::Audio => handlers.audio.as_mut(),
                        };
                        if let Some(handler) = handler {
                            handler(&buf[..n]);
                        }
                    }
                    Err(e) => {
                        warn!(?kind, "read error: {e}");
                        if matches!(kind, ConnKind::Video) {
                            *state.lock().unwrap() = AcceptorState::Error;
                        }
                        break;
                    }
                }
            }
        });
        match kind {
            ConnKind::Video => self.video_task = Some(task),
            ConnKind::Audio => self.audio_task = Some(task),
        }
    }

    pub async fn wait_for_video_connection(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.state() {
                AcceptorState::Connected => return Ok(()),
                AcceptorState::Error => return Err(Error::receive_error("acceptor entered error state")),
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::ConnectionTimeout);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn stop(&mut self) {
        *self.state.lock().unwrap() = AcceptorState::Disconnected;
        for task in [self.video_task.take(), self.audio_task.take(), self.listener_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ConnKind {
    Video,
    Audio,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forward_dials_video_then_audio_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let mut dials = Vec::new();
            for i in 0..3 {
                let (stream, _) = listener.accept().await.unwrap();
                dials.push(i);
                drop(stream);
            }
            dials
        });

        let mut acceptor = SocketAcceptor::new(ConnectionMode::Forward, port, true);
        acceptor.start().await.unwrap();
        assert_eq!(acceptor.state(), AcceptorState::Connected);

        // Emulate a third, unexpected dial that the protocol doesn't use.
        let _extra = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        let dials = tokio::time::timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        assert_eq!(dials.len(), 3);
    }
}
