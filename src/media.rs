//! Local capture stream shared by every peer link of a session.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
    pub stream_id: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
            stream_id: "webrtc-rooms".to_string(),
        }
    }
}

/// Captured local tracks, attached to each new peer connection.
pub struct LocalStream {
    id: String,
    tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn TrackLocal + Send + Sync>] {
        &self.tracks
    }
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Capture device access.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Opens the devices requested by `config`. Fails with
    /// [`Error::MediaCapture`] when they are unavailable.
    async fn acquire(&self, config: &MediaConfig) -> Result<LocalStream>;

    async fn release(&self, stream: &LocalStream);
}

/// Lazily acquired, shared local stream.
///
/// Concurrent callers of [`LocalMedia::ensure`] all wait on the same
/// acquisition, so the devices are opened at most once per call session.
/// A failed acquisition is not cached and the next `ensure` retries.
pub struct LocalMedia {
    source: Arc<dyn MediaSource>,
    config: MediaConfig,
    cell: Mutex<Arc<OnceCell<Arc<LocalStream>>>>,
}

impl LocalMedia {
    pub fn new(source: Arc<dyn MediaSource>, config: MediaConfig) -> Self {
        Self {
            source,
            config,
            cell: Mutex::new(Arc::new(OnceCell::new())),
        }
    }

    pub async fn ensure(&self) -> Result<Arc<LocalStream>> {
        let cell = self.cell.lock().clone();
        let stream = cell
            .get_or_try_init(|| async {
                let stream = self.source.acquire(&self.config).await?;
                info!(stream = stream.id(), tracks = stream.tracks().len(), "Local media acquired");
                Ok::<_, Error>(Arc::new(stream))
            })
            .await?;
        Ok(Arc::clone(stream))
    }

    /// The stream, if it has been acquired and not released since.
    pub fn current(&self) -> Option<Arc<LocalStream>> {
        self.cell.lock().get().cloned()
    }

    /// Stops the devices. A later `ensure` acquires them again.
    pub async fn release(&self) {
        let cell = std::mem::replace(&mut *self.cell.lock(), Arc::new(OnceCell::new()));
        if let Some(stream) = cell.get() {
            self.source.release(stream).await;
            info!(stream = stream.id(), "Local media released");
        }
    }
}

/// Produces sample-fed opus/VP8 tracks without touching any device.
///
/// Suitable for headless participants: the tracks negotiate like real
/// capture tracks and stay silent until samples are written to them.
#[derive(Debug, Default, Clone)]
pub struct StaticTrackSource;

impl StaticTrackSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaSource for StaticTrackSource {
    async fn acquire(&self, config: &MediaConfig) -> Result<LocalStream> {
        let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();

        if config.audio {
            tracks.push(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                "audio".to_owned(),
                config.stream_id.clone(),
            )));
        }

        if config.video {
            tracks.push(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                config.stream_id.clone(),
            )));
        }

        if tracks.is_empty() {
            return Err(Error::MediaCapture(
                "Neither audio nor video was requested".to_string(),
            ));
        }

        Ok(LocalStream::new(config.stream_id.clone(), tracks))
    }

    async fn release(&self, stream: &LocalStream) {
        debug!(stream = stream.id(), "Static tracks dropped");
    }
}
