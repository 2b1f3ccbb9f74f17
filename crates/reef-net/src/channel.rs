//! Per-log replication state within one session.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use reef_log::{Download, Log, LogError, LogEvent};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use crate::error::NetError;
use crate::message::{Channel, WireMessage};
use crate::ranges::RangeSet;

type Result<T> = std::result::Result<T, NetError>;

/// Most unanswered requests a peer may queue with us.
pub(crate) const MAX_QUEUED_REQUESTS: usize = 1024;

/// A request from the peer waiting to be served.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueuedRequest {
    pub id: u64,
    pub block: Option<u64>,
    pub known_length: u64,
    pub upgrade: bool,
}

/// Result of serving queued requests.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Served {
    pub blocks: u64,
}

/// Result of applying one `Data` message.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Received {
    pub block: bool,
    pub dropped: bool,
}

pub(crate) struct ChannelState {
    pub channel: Channel,
    pub log: Arc<Log>,
    sparse: bool,
    pub events: broadcast::Receiver<LogEvent>,
    out: mpsc::UnboundedSender<WireMessage>,

    /// Length last announced to the peer.
    announced: u64,
    remote_length: u64,
    pub remote_synced: bool,
    remote_have: RangeSet,

    next_id: u64,
    /// Outstanding requests: id -> block (`None` for head upgrades).
    inflight: HashMap<u64, Option<u64>>,
    /// Outstanding block requests: block -> id.
    requested: HashMap<u64, u64>,
    /// Peer length at which an upgrade came back unusable.
    upgrade_failed_at: Option<u64>,
    /// Blocks the peer could not prove; retried once it advertises more.
    dropped: HashSet<u64>,

    serving: VecDeque<QueuedRequest>,
}

impl ChannelState {
    pub(crate) fn new(
        channel: Channel,
        log: Arc<Log>,
        sparse: bool,
        out: mpsc::UnboundedSender<WireMessage>,
    ) -> Self {
        let events = log.subscribe();
        Self {
            channel,
            log,
            sparse,
            events,
            out,
            announced: 0,
            remote_length: 0,
            remote_synced: false,
            remote_have: RangeSet::default(),
            next_id: 0,
            inflight: HashMap::new(),
            requested: HashMap::new(),
            upgrade_failed_at: None,
            dropped: HashSet::new(),
            serving: VecDeque::new(),
        }
    }

    fn send(&self, message: WireMessage) -> Result<()> {
        self.out.send(message).map_err(|_| NetError::Closed)
    }

    /// Whether requests of ours are still unanswered.
    pub(crate) fn is_fetching(&self) -> bool {
        !self.inflight.is_empty()
    }

    pub(crate) fn is_serving(&self) -> bool {
        !self.serving.is_empty()
    }

    /// Tell the peer our length and everything we store.
    pub(crate) fn announce_all(&mut self) -> Result<()> {
        let length = self.log.length();
        self.announced = length;
        self.send(WireMessage::Sync {
            channel: self.channel,
            length,
            have: self.log.downloaded_ranges(),
        })
    }

    // ------------------------------------------------------------------
    // Local events
    // ------------------------------------------------------------------

    pub(crate) fn on_event(&mut self, event: LogEvent) -> Result<()> {
        match event {
            LogEvent::Appended { length } => {
                let start = self.announced.min(length);
                self.announced = length;
                self.send(WireMessage::Sync {
                    channel: self.channel,
                    length,
                    have: vec![(start, length - start)],
                })
            }
            LogEvent::Upgraded { length } => {
                self.announced = self.announced.max(length);
                self.send(WireMessage::Sync {
                    channel: self.channel,
                    length,
                    have: Vec::new(),
                })
            }
            LogEvent::Downloaded { index } => self.send(WireMessage::Have {
                channel: self.channel,
                start: index,
                length: 1,
            }),
            LogEvent::Want { .. } => Ok(()),
            LogEvent::Unwant { index } => {
                if let Some(id) = self.requested.remove(&index) {
                    self.inflight.remove(&id);
                    trace!(channel = %self.channel, index, id, "cancelling request");
                    self.send(WireMessage::Cancel {
                        channel: self.channel,
                        id,
                    })?;
                }
                Ok(())
            }
        }
    }

    /// Missed events: re-announce everything.
    pub(crate) fn on_lagged(&mut self, skipped: u64) -> Result<()> {
        debug!(channel = %self.channel, skipped, "log events lagged, resyncing");
        self.announce_all()
    }

    // ------------------------------------------------------------------
    // Peer messages
    // ------------------------------------------------------------------

    pub(crate) fn on_sync(&mut self, length: u64, have: &[(u64, u64)]) {
        if length > self.remote_length {
            self.remote_length = length;
            self.upgrade_failed_at = None;
            self.dropped.clear();
        }
        self.add_have(have);
        self.remote_synced = true;
    }

    pub(crate) fn on_have(&mut self, start: u64, length: u64) {
        self.add_have(&[(start, length)]);
    }

    fn add_have(&mut self, runs: &[(u64, u64)]) {
        for &(start, length) in runs {
            let end = start.saturating_add(length);
            self.remote_have.insert(start, end);
            self.dropped.retain(|i| *i < start || *i >= end);
        }
    }

    pub(crate) fn on_request(&mut self, request: QueuedRequest) -> Result<()> {
        if self.serving.len() >= MAX_QUEUED_REQUESTS {
            return Err(NetError::Protocol(format!(
                "peer queued more than {MAX_QUEUED_REQUESTS} requests"
            )));
        }
        self.serving.push_back(request);
        Ok(())
    }

    pub(crate) fn on_cancel(&mut self, id: u64) {
        self.serving.retain(|r| r.id != id);
    }

    /// Verify and store a download. Integrity failures end the session.
    pub(crate) async fn on_data(&mut self, id: u64, download: Download) -> Result<Received> {
        let Some(block) = self.inflight.remove(&id) else {
            trace!(channel = %self.channel, id, "ignoring data for withdrawn request");
            return Ok(Received::default());
        };
        if let Some(index) = block {
            self.requested.remove(&index);
        }

        let applied = match self.log.apply_download(download).await {
            Ok(applied) => applied,
            Err(e) => {
                warn!(channel = %self.channel, id, error = %e, "rejecting peer data");
                return Err(e.into());
            }
        };

        let mut received = Received {
            block: applied.block.is_some(),
            dropped: applied.dropped,
        };
        match block {
            Some(index) if applied.dropped || (applied.block.is_none() && !self.log.has(index)) => {
                self.dropped.insert(index);
                received.dropped = true;
            }
            None if applied.dropped || applied.upgraded.is_none() => {
                self.upgrade_failed_at = Some(self.remote_length);
            }
            _ => {}
        }
        Ok(received)
    }

    pub(crate) fn on_no_data(&mut self, id: u64) {
        match self.inflight.remove(&id) {
            Some(Some(index)) => {
                self.requested.remove(&index);
                self.remote_have.remove(index);
                self.dropped.insert(index);
            }
            Some(None) => self.upgrade_failed_at = Some(self.remote_length),
            None => {}
        }
    }

    // ------------------------------------------------------------------
    // Scheduling and serving
    // ------------------------------------------------------------------

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Issue requests for what we lack and the peer has, up to
    /// `max_inflight` block requests.
    pub(crate) fn schedule(&mut self, max_inflight: usize) -> Result<()> {
        let length = self.log.length();

        let upgrading = self.inflight.values().any(Option::is_none);
        if self.remote_length > length
            && !upgrading
            && self.upgrade_failed_at != Some(self.remote_length)
        {
            let id = self.next_id();
            self.inflight.insert(id, None);
            trace!(channel = %self.channel, id, from = length, to = self.remote_length, "requesting upgrade");
            self.send(WireMessage::Request {
                channel: self.channel,
                id,
                block: None,
                known_length: length,
                upgrade: true,
            })?;
        }

        if self.requested.len() >= max_inflight {
            return Ok(());
        }
        let candidates = if self.sparse {
            self.log.pending_wants()
        } else {
            self.log.missing_in(0, length)
        };
        for index in candidates {
            if self.requested.len() >= max_inflight {
                break;
            }
            if index >= length
                || self.requested.contains_key(&index)
                || self.dropped.contains(&index)
                || !self.remote_have.contains(index)
                || self.log.has(index)
            {
                continue;
            }
            let id = self.next_id();
            self.inflight.insert(id, Some(index));
            self.requested.insert(index, id);
            self.send(WireMessage::Request {
                channel: self.channel,
                id,
                block: Some(index),
                known_length: length,
                upgrade: true,
            })?;
        }
        Ok(())
    }

    /// Answer every queued request.
    pub(crate) async fn serve(&mut self) -> Result<Served> {
        let mut served = Served::default();
        while let Some(request) = self.serving.pop_front() {
            let download = if request.block.is_none() && !request.upgrade {
                None
            } else {
                match self.log.serve(request.block, request.known_length).await {
                    Ok(download) => download,
                    // A sparse replica may lack the nodes a proof needs.
                    Err(LogError::MissingNode(_) | LogError::MissingBlock(_)) => None,
                    Err(e) => return Err(e.into()),
                }
            };
            let reply = match download {
                Some(download) => {
                    if download.block.is_some() {
                        served.blocks += 1;
                    }
                    WireMessage::Data {
                        channel: self.channel,
                        id: request.id,
                        download,
                    }
                }
                None => WireMessage::NoData {
                    channel: self.channel,
                    id: request.id,
                },
            };
            self.send(reply)?;
        }
        Ok(served)
    }
}
