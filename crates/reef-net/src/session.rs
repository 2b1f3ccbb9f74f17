//! Replication sessions.
//!
//! [`replicate`] runs one session over a duplex byte stream in a spawned
//! task. The session handshakes, announces both logs, then exchanges
//! requests and verified downloads until both sides are done (or, when
//! live, until closed). Frames are read and written by two helper tasks so
//! the session loop never blocks on the transport.

use std::sync::Arc;

use reef_log::Log;
use reef_types::PublicKey;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::channel::{ChannelState, QueuedRequest};
use crate::error::NetError;
use crate::message::{Channel, WireMessage};
use crate::transport::{MessageReceiver, MessageSender, handshake};

type Result<T> = std::result::Result<T, NetError>;

/// Decoded messages buffered between the reader task and the session.
const INCOMING_CAPACITY: usize = 256;

/// One log taking part in a session.
#[derive(Clone)]
pub struct Feed {
    pub log: Arc<Log>,
    /// Fetch only blocks local readers wait for.
    pub sparse: bool,
}

/// Session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicateOptions {
    /// Keep the session open after both sides are in sync.
    pub live: bool,
    /// Encrypt frames after the handshake. Both sides must agree.
    pub encrypt: bool,
    /// Most block requests outstanding per log.
    pub max_inflight: usize,
}

impl Default for ReplicateOptions {
    fn default() -> Self {
        Self {
            live: false,
            encrypt: true,
            max_inflight: 32,
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Handshaking,
    Syncing,
    LiveIdle,
    LiveSyncing,
    Closed,
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Blocks verified and stored locally.
    pub downloaded: u64,
    /// Blocks sent to the peer.
    pub uploaded: u64,
    /// Downloads that could not be verified against trusted data.
    pub dropped: u64,
}

/// Handle to a running session.
pub struct ReplicationHandle {
    state: watch::Receiver<SessionState>,
    close: Arc<Notify>,
    task: JoinHandle<Result<SessionStats>>,
}

impl ReplicationHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Suspend until the state satisfies `f`.
    pub async fn wait_for(&self, f: impl Fn(SessionState) -> bool) -> SessionState {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(|s| f(*s)).await.map(|state| *state).ok();
        reached.unwrap_or_else(|| *rx.borrow())
    }

    /// Ask the session to send `Close` and end.
    pub fn close(&self) {
        self.close.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end.
    pub async fn finished(self) -> Result<SessionStats> {
        self.task.await.map_err(|e| NetError::Task(e.to_string()))?
    }
}

/// Replicate a drive's logs with the peer on the other end of `io`.
///
/// `feeds` are indexed by [`Channel::index`]: metadata first, then content.
/// Both logs must belong to `key`.
pub fn replicate<S>(
    io: S,
    key: PublicKey,
    feeds: [Feed; 2],
    options: ReplicateOptions,
) -> ReplicationHandle
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (state_tx, state_rx) = watch::channel(SessionState::Idle);
    let close = Arc::new(Notify::new());
    let task = tokio::spawn(run(io, key, feeds, options, state_tx, close.clone()));
    ReplicationHandle {
        state: state_rx,
        close,
        task,
    }
}

async fn run<S>(
    io: S,
    key: PublicKey,
    feeds: [Feed; 2],
    options: ReplicateOptions,
    state_tx: watch::Sender<SessionState>,
    close: Arc<Notify>,
) -> Result<SessionStats>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    state_tx.send_replace(SessionState::Handshaking);
    let (read_half, write_half) = tokio::io::split(io);
    let (receiver, sender) = match handshake(read_half, write_half, &key, options.encrypt).await {
        Ok(halves) => halves,
        Err(e) => {
            warn!(error = %e, "handshake failed");
            state_tx.send_replace(SessionState::Closed);
            return Err(e);
        }
    };
    state_tx.send_replace(SessionState::Syncing);

    let (in_tx, in_rx) = mpsc::channel(INCOMING_CAPACITY);
    let reader = tokio::spawn(read_loop(receiver, in_tx));
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(sender, out_rx));

    let [metadata, content] = feeds;
    let mut session = Session {
        channels: [
            ChannelState::new(Channel::Metadata, metadata.log, metadata.sparse, out_tx.clone()),
            ChannelState::new(Channel::Content, content.log, content.sparse, out_tx.clone()),
        ],
        out: out_tx,
        options,
        state_tx,
        stats: SessionStats::default(),
        local_idle: false,
        remote_idle: false,
    };

    let result = session.run(in_rx, &close).await;
    let stats = session.stats;
    session.state_tx.send_replace(SessionState::Closed);
    // Dropping the session drops every sender, letting the writer drain.
    drop(session);
    reader.abort();

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "writer stopped early"),
        Err(e) => debug!(error = %e, "writer task failed"),
    }

    match result {
        Ok(()) => {
            info!(
                downloaded = stats.downloaded,
                uploaded = stats.uploaded,
                dropped = stats.dropped,
                "replication finished"
            );
            Ok(stats)
        }
        Err(e) => {
            warn!(error = %e, "replication failed");
            Err(e)
        }
    }
}

async fn read_loop<R>(mut receiver: MessageReceiver<R>, tx: mpsc::Sender<Result<WireMessage>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match receiver.recv().await {
            Ok(Some(message)) => {
                if tx.send(Ok(message)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

async fn write_loop<W>(
    mut sender: MessageSender<W>,
    mut rx: mpsc::UnboundedReceiver<WireMessage>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        sender.send(&message).await?;
    }
    sender.shutdown().await
}

// ---------------------------------------------------------------------------
// Session loop
// ---------------------------------------------------------------------------

enum Step {
    Message(Option<Result<WireMessage>>),
    Event(Channel, std::result::Result<reef_log::LogEvent, RecvError>),
    Close,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Session {
    channels: [ChannelState; 2],
    out: mpsc::UnboundedSender<WireMessage>,
    options: ReplicateOptions,
    state_tx: watch::Sender<SessionState>,
    stats: SessionStats,
    /// We told the peer we have nothing left to fetch.
    local_idle: bool,
    remote_idle: bool,
}

impl Session {
    async fn run(
        &mut self,
        mut incoming: mpsc::Receiver<Result<WireMessage>>,
        close: &Notify,
    ) -> Result<()> {
        for channel in &mut self.channels {
            channel.announce_all()?;
        }

        loop {
            let step = {
                let [metadata, content] = &mut self.channels;
                tokio::select! {
                    message = incoming.recv() => Step::Message(message),
                    event = metadata.events.recv() => Step::Event(Channel::Metadata, event),
                    event = content.events.recv() => Step::Event(Channel::Content, event),
                    _ = close.notified() => Step::Close,
                }
            };

            let flow = match step {
                Step::Message(None) => {
                    debug!("peer closed the stream");
                    Flow::Stop
                }
                Step::Message(Some(message)) => self.on_message(message?).await?,
                Step::Event(channel, event) => {
                    let state = &mut self.channels[channel.index()];
                    match event {
                        Ok(event) => state.on_event(event)?,
                        Err(RecvError::Lagged(skipped)) => state.on_lagged(skipped)?,
                        Err(RecvError::Closed) => return Ok(()),
                    }
                    Flow::Continue
                }
                Step::Close => {
                    debug!("closing session");
                    self.send(WireMessage::Close)?;
                    Flow::Stop
                }
            };
            if flow == Flow::Stop {
                return Ok(());
            }

            // Handle whatever else already arrived so cancels are seen
            // before the requests they withdraw are served.
            while let Ok(message) = incoming.try_recv() {
                if self.on_message(message?).await? == Flow::Stop {
                    return Ok(());
                }
            }

            for channel in &mut self.channels {
                self.stats.uploaded += channel.serve().await?.blocks;
                channel.schedule(self.options.max_inflight)?;
            }

            if self.update_state()? == Flow::Stop {
                return Ok(());
            }
        }
    }

    fn send(&self, message: WireMessage) -> Result<()> {
        self.out.send(message).map_err(|_| NetError::Closed)
    }

    async fn on_message(&mut self, message: WireMessage) -> Result<Flow> {
        trace!(?message, "received");
        match message {
            WireMessage::Sync {
                channel,
                length,
                have,
            } => self.channels[channel.index()].on_sync(length, &have),
            WireMessage::Have {
                channel,
                start,
                length,
            } => self.channels[channel.index()].on_have(start, length),
            WireMessage::Request {
                channel,
                id,
                block,
                known_length,
                upgrade,
            } => {
                self.remote_idle = false;
                self.channels[channel.index()].on_request(QueuedRequest {
                    id,
                    block,
                    known_length,
                    upgrade,
                })?
            }
            WireMessage::Cancel { channel, id } => self.channels[channel.index()].on_cancel(id),
            WireMessage::Data {
                channel,
                id,
                download,
            } => {
                let received = self.channels[channel.index()].on_data(id, download).await?;
                if received.block {
                    self.stats.downloaded += 1;
                }
                if received.dropped {
                    self.stats.dropped += 1;
                }
            }
            WireMessage::NoData { channel, id } => self.channels[channel.index()].on_no_data(id),
            WireMessage::Idle => self.remote_idle = true,
            WireMessage::Close => {
                debug!("peer sent close");
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Publish the current state. A non-live session stops once both
    /// sides are idle.
    fn update_state(&mut self) -> Result<Flow> {
        let synced = self.channels.iter().all(|c| c.remote_synced);
        let fetching = self.channels.iter().any(ChannelState::is_fetching);
        let serving = self.channels.iter().any(ChannelState::is_serving);

        let state = match (self.options.live, synced && !fetching && !serving) {
            (true, true) => SessionState::LiveIdle,
            (true, false) => SessionState::LiveSyncing,
            (false, _) => SessionState::Syncing,
        };
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = ?current, to = ?state, "session state");
            *current = state;
            true
        });

        if self.options.live {
            return Ok(Flow::Continue);
        }

        let done = synced && !fetching;
        if done && !self.local_idle {
            self.local_idle = true;
            self.send(WireMessage::Idle)?;
        } else if !done {
            self.local_idle = false;
        }
        if self.local_idle && self.remote_idle && !serving {
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }
}
