//! In-memory implementations of the connection and media capabilities.
//!
//! Compiled for unit tests and, through the `test-util` feature, for the
//! integration tests under `tests/`.

use crate::error::{Error, Result};
use crate::media::{LocalStream, MediaConfig, MediaSource};
use crate::peer::{PeerConnection, PeerConnector, PeerEventKind, PeerEventSink};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Operation recorded by a [`FakeConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOp {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    AddTrack(String),
    Close,
}

#[derive(Debug, Clone, Copy, Default)]
struct Behaviour {
    fail_remote_description: bool,
    fail_candidates: bool,
    emit_local_candidate: bool,
}

pub struct FakeConnection {
    events: PeerEventSink,
    behaviour: Behaviour,
    ops: Mutex<Vec<FakeOp>>,
}

impl FakeConnection {
    fn new(events: PeerEventSink, behaviour: Behaviour) -> Self {
        Self {
            events,
            behaviour,
            ops: Mutex::new(Vec::new()),
        }
    }

    pub fn remote_id(&self) -> &str {
        self.events.remote_id()
    }

    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    pub fn ops(&self) -> Vec<FakeOp> {
        self.ops.lock().clone()
    }

    /// Candidates applied so far, in application order.
    pub fn applied_candidates(&self) -> Vec<String> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                FakeOp::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.ops
            .lock()
            .iter()
            .filter(|op| **op == FakeOp::Close)
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Emits an event as if the underlying transport produced it.
    pub fn emit(&self, kind: PeerEventKind) {
        self.events.emit(kind);
    }

    fn record(&self, op: FakeOp) {
        self.ops.lock().push(op);
    }

    fn description(&self, kind: SdpKind) -> SessionDescription {
        let sdp = format!(
            "v=0\r\ns=fake {:?} for {} gen {}\r\n",
            kind,
            self.remote_id(),
            self.generation()
        );
        SessionDescription { kind, sdp }
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(FakeOp::CreateOffer);
        Ok(self.description(SdpKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(FakeOp::CreateAnswer);
        Ok(self.description(SdpKind::Answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(FakeOp::SetLocal(desc.kind));
        if self.behaviour.emit_local_candidate {
            self.events.emit(PeerEventKind::LocalCandidate(IceCandidate::new(format!(
                "candidate:fake {} gen {}",
                self.remote_id(),
                self.generation()
            ))));
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.behaviour.fail_remote_description {
            return Err(Error::Negotiation(format!(
                "Fake connection rejected remote {:?}",
                desc.kind
            )));
        }
        self.record(FakeOp::SetRemote(desc.kind));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.behaviour.fail_candidates {
            return Err(Error::Negotiation("Fake connection rejected candidate".to_string()));
        }
        self.record(FakeOp::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<()> {
        self.record(FakeOp::AddTrack(track.id().to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(FakeOp::Close);
        Ok(())
    }
}

/// Hands out [`FakeConnection`]s and remembers every one it created.
#[derive(Default)]
pub struct FakeConnector {
    behaviour: Behaviour,
    fail_connect: Option<String>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection emits one local candidate after its local
    /// description is applied.
    pub fn with_local_candidates(mut self) -> Self {
        self.behaviour.emit_local_candidate = true;
        self
    }

    pub fn failing_remote_description(mut self) -> Self {
        self.behaviour.fail_remote_description = true;
        self
    }

    pub fn failing_candidates(mut self) -> Self {
        self.behaviour.fail_candidates = true;
        self
    }

    /// Refuses to create connections for `remote_id`.
    pub fn failing_connect(mut self, remote_id: impl Into<String>) -> Self {
        self.fail_connect = Some(remote_id.into());
        self
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().clone()
    }

    /// Most recent connection created for `remote_id`.
    pub fn connection_for(&self, remote_id: &str) -> Option<Arc<FakeConnection>> {
        self.connections
            .lock()
            .iter()
            .rev()
            .find(|c| c.remote_id() == remote_id)
            .cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.connections.lock().len()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>> {
        if self.fail_connect.as_deref() == Some(events.remote_id()) {
            return Err(Error::Negotiation(format!(
                "Fake connector refused {}",
                events.remote_id()
            )));
        }
        let connection = Arc::new(FakeConnection::new(events, self.behaviour));
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

/// Media source that counts acquisitions instead of opening devices.
#[derive(Default)]
pub struct FakeMediaSource {
    delay: Option<Duration>,
    fail: bool,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl FakeMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self, config: &MediaConfig) -> Result<LocalStream> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::MediaCapture("Permission denied".to_string()));
        }
        let track: Arc<dyn TrackLocal + Send + Sync> = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            config.stream_id.clone(),
        ));
        Ok(LocalStream::new(config.stream_id.clone(), vec![track]))
    }

    async fn release(&self, _stream: &LocalStream) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
