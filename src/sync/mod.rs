//! Frame Synchronizer: pairs color frames with depth captured at (nearly) the
//! same instant and hands each pair to subscribers exactly once.

pub mod frame;
pub mod projection;
pub mod ring_buffer;

use crossbeam::channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;

pub use frame::{
    CameraIntrinsics, ColorFrame, ColorImage, ConfidenceMap, DepthFrame, DepthMap,
    DepthStatistics, ImageEncoding, Resolution, SynchronizedFrame,
};
pub use projection::{find_best_texture_frame, generate_uv, project_to_uv, texture_score};
pub use ring_buffer::RingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatistics {
    pub color_frames: u64,
    pub depth_frames: u64,
    pub synchronized_frames: u64,
    /// Pairs formed from depth delivered with the color frame.
    pub co_delivered_frames: u64,
    /// Color frames that never found depth within the tolerance.
    pub dropped_frames: u64,
    /// Frames pushed while paused or stopped.
    pub ignored_frames: u64,
    /// Mean color/depth timestamp difference of matched pairs, in ms.
    pub mean_delta_ms: f64,
}

/// Single-writer color/depth pairing state machine.
#[derive(Debug)]
pub struct FrameSynchronizer {
    config: SyncConfig,
    state: SyncState,
    /// Color frames still waiting for depth.
    color_buffer: RingBuffer<ColorFrame>,
    depth_buffer: RingBuffer<DepthFrame>,
    recent: RingBuffer<SynchronizedFrame>,
    subscribers: Vec<Sender<SynchronizedFrame>>,
    stats: SyncStatistics,
    delta_sum: f64,
    /// Newest timestamp seen on either stream.
    latest: f64,
}

impl FrameSynchronizer {
    pub fn new(config: SyncConfig) -> Self {
        let capacity = config.buffer_capacity;
        Self {
            config,
            state: SyncState::Running,
            color_buffer: RingBuffer::new(capacity),
            depth_buffer: RingBuffer::new(capacity),
            recent: RingBuffer::new(capacity),
            subscribers: Vec::new(),
            stats: SyncStatistics::default(),
            delta_sum: 0.0,
            latest: f64::NEG_INFINITY,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn statistics(&self) -> SyncStatistics {
        self.stats.clone()
    }

    /// Receive every frame synchronized from now on.
    pub fn subscribe(&mut self) -> Receiver<SynchronizedFrame> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Most recent synchronized frame.
    pub fn last_frame(&self) -> Option<&SynchronizedFrame> {
        self.recent.newest()
    }

    /// Recently synchronized frames, oldest first.
    pub fn recent_frames(&self) -> impl Iterator<Item = &SynchronizedFrame> {
        self.recent.iter()
    }

    /// Color frames waiting for depth.
    pub fn buffered_color_frames(&self) -> usize {
        self.color_buffer.len()
    }

    pub fn buffered_depth_frames(&self) -> usize {
        self.depth_buffer.len()
    }

    /// Buffer a depth frame and pair it with any pending color frames
    /// within tolerance. Returns the frames synchronized by this push.
    pub fn push_depth(&mut self, frame: DepthFrame) -> Vec<SynchronizedFrame> {
        if !self.accepting() {
            return Vec::new();
        }
        self.stats.depth_frames += 1;
        self.observe(frame.timestamp);

        let mut synced = Vec::new();
        for color in self.color_buffer.drain() {
            if (color.timestamp - frame.timestamp).abs() <= self.config.max_timestamp_delta {
                synced.push(self.pair(color, frame.clone(), false));
            } else {
                self.color_buffer.push(color);
            }
        }
        self.depth_buffer.push(frame);
        self.expire_pending();
        synced
    }

    /// Pair a color frame with depth and deliver the result.
    ///
    /// Co-delivered depth is used as is. Otherwise the buffered depth frame
    /// with the smallest timestamp difference within `max_timestamp_delta`
    /// is chosen. A frame with no match yet stays pending until depth within
    /// tolerance arrives; it is dropped once newer frames put it out of
    /// reach, when it is evicted, or on [`stop`](Self::stop).
    pub fn push_color(&mut self, mut frame: ColorFrame) -> Option<SynchronizedFrame> {
        if !self.accepting() {
            return None;
        }
        self.stats.color_frames += 1;
        self.observe(frame.timestamp);

        let synced = match frame.depth.take() {
            Some(depth) => Some(self.pair(frame, depth, true)),
            None => match self.match_depth(frame.timestamp) {
                Some(depth) => Some(self.pair(frame, depth, false)),
                None => {
                    debug!(timestamp = frame.timestamp, "No depth yet, holding color frame");
                    if let Some(evicted) = self.color_buffer.push(frame) {
                        self.drop_color(&evicted, "evicted");
                    }
                    None
                }
            },
        };
        self.expire_pending();
        synced
    }

    /// Drop every pending color frame.
    pub fn flush_pending(&mut self) {
        for color in self.color_buffer.drain() {
            self.drop_color(&color, "flushed");
        }
    }

    fn pair(&mut self, frame: ColorFrame, depth: DepthFrame, co: bool) -> SynchronizedFrame {
        let synced = SynchronizedFrame {
            timestamp: frame.timestamp,
            timestamp_delta: (frame.timestamp - depth.timestamp).abs(),
            color_resolution: frame.image.resolution,
            depth_resolution: depth.depth.resolution(),
            color_image: frame.image,
            depth_map: depth.depth,
            confidence_map: depth.confidence,
            camera_transform: frame.camera_transform,
            camera_intrinsics: frame.intrinsics,
        };

        self.stats.synchronized_frames += 1;
        if co {
            self.stats.co_delivered_frames += 1;
        }
        self.delta_sum += synced.timestamp_delta;
        self.stats.mean_delta_ms =
            self.delta_sum / self.stats.synchronized_frames as f64 * 1000.0;

        debug!(
            timestamp = synced.timestamp,
            delta_ms = synced.timestamp_delta * 1000.0,
            co_delivered = co,
            "Frame synchronized"
        );
        self.deliver(&synced);
        self.recent.push(synced.clone());
        synced
    }

    fn observe(&mut self, timestamp: f64) {
        if timestamp.is_finite() {
            self.latest = self.latest.max(timestamp);
        }
    }

    /// Drop pending color frames that no future depth can reach, assuming
    /// depth arrives in timestamp order.
    fn expire_pending(&mut self) {
        let horizon = self.latest - self.config.max_timestamp_delta;
        for color in self.color_buffer.drain() {
            if color.timestamp < horizon {
                self.drop_color(&color, "out of tolerance");
            } else {
                self.color_buffer.push(color);
            }
        }
    }

    fn drop_color(&mut self, frame: &ColorFrame, reason: &'static str) {
        self.stats.dropped_frames += 1;
        warn!(
            timestamp = frame.timestamp,
            dropped = self.stats.dropped_frames,
            reason,
            "No depth within tolerance, dropping color frame"
        );
    }

    fn match_depth(&self, timestamp: f64) -> Option<DepthFrame> {
        self.depth_buffer
            .iter()
            .map(|d| ((d.timestamp - timestamp).abs(), d))
            .filter(|(delta, _)| *delta <= self.config.max_timestamp_delta)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, d)| d.clone())
    }

    fn deliver(&mut self, frame: &SynchronizedFrame) {
        let before = self.subscribers.len();
        self.subscribers.retain(|tx| tx.send(frame.clone()).is_ok());
        if self.subscribers.len() < before {
            debug!(
                removed = before - self.subscribers.len(),
                "Dropped disconnected subscribers"
            );
        }
    }

    fn accepting(&mut self) -> bool {
        if self.state == SyncState::Running {
            return true;
        }
        self.stats.ignored_frames += 1;
        false
    }

    /// Ignore frames until [`resume`](Self::resume). Buffers are kept.
    pub fn pause(&mut self) {
        if self.state == SyncState::Running {
            self.state = SyncState::Paused;
            info!("Frame synchronizer paused");
        }
    }

    pub fn resume(&mut self) {
        if self.state == SyncState::Paused {
            self.state = SyncState::Running;
            info!("Frame synchronizer resumed");
        }
    }

    /// Stop accepting frames. Pending color frames are dropped; the depth
    /// buffer and the last frame stay readable until [`reset`](Self::reset).
    pub fn stop(&mut self) {
        self.flush_pending();
        self.state = SyncState::Stopped;
        info!(
            synchronized = self.stats.synchronized_frames,
            dropped = self.stats.dropped_frames,
            "Frame synchronizer stopped"
        );
    }

    /// Empty the color, depth and recent-frame buffers.
    pub fn clear_buffers(&mut self) {
        self.color_buffer.clear();
        self.depth_buffer.clear();
        self.recent.clear();
    }

    /// Clear buffers and statistics and start running again. Subscribers stay
    /// attached.
    pub fn reset(&mut self) {
        self.clear_buffers();
        self.stats = SyncStatistics::default();
        self.delta_sum = 0.0;
        self.latest = f64::NEG_INFINITY;
        self.state = SyncState::Running;
        info!("Frame synchronizer reset");
    }
}
