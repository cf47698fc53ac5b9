//! Color camera stream and the shared texture it feeds.

use crate::config::RuntimeConfig;
use crate::sdk::{FrameCallback, TangoSdk};
use crate::types::{CameraId, ImageBuffer};
use crate::{Result, TangoError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Connection state of the color camera callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageConnectionState {
    Disconnected,
    /// Enabled; waiting for the texture before registering the callback.
    WantToConnect,
    ConnectScheduled,
    Connected,
}

/// Texture the host engine renders the camera image from.
///
/// The engine marks it ready once its GPU resource exists; until then the
/// camera callback is not registered.
#[derive(Default)]
pub struct VideoTexture {
    ready: AtomicBool,
    latest: Mutex<Option<Arc<ImageBuffer>>>,
}

impl VideoTexture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Newest published frame. Valid until the next tick replaces it.
    pub fn latest_frame(&self) -> Option<Arc<ImageBuffer>> {
        self.latest.lock().clone()
    }

    fn publish(&self, frame: ImageBuffer) {
        *self.latest.lock() = Some(Arc::new(frame));
    }
}

pub struct ImageResolver {
    sdk: Arc<dyn TangoSdk>,
    texture: Arc<VideoTexture>,
    state: ImageConnectionState,
    pending: Arc<Mutex<Option<ImageBuffer>>>,
    accepting: Arc<AtomicBool>,
    last_timestamp: f64,
}

impl ImageResolver {
    pub fn new(sdk: Arc<dyn TangoSdk>, texture: Arc<VideoTexture>, runtime: &RuntimeConfig) -> Self {
        let state = if runtime.enable_color_camera {
            ImageConnectionState::WantToConnect
        } else {
            ImageConnectionState::Disconnected
        };
        Self {
            sdk,
            texture,
            state,
            pending: Arc::new(Mutex::new(None)),
            accepting: Arc::new(AtomicBool::new(false)),
            last_timestamp: 0.0,
        }
    }

    pub fn state(&self) -> ImageConnectionState {
        self.state
    }

    pub fn texture(&self) -> &Arc<VideoTexture> {
        &self.texture
    }

    /// Timestamp of the newest frame published to the texture.
    pub fn last_timestamp(&self) -> f64 {
        self.last_timestamp
    }

    /// Follow the camera enable flag. If disconnecting the camera fails the
    /// state is left unchanged.
    pub fn set_runtime_config(&mut self, runtime: &RuntimeConfig) -> Result<()> {
        if runtime.enable_color_camera {
            if self.state == ImageConnectionState::Disconnected {
                log::info!("Color camera requested");
                self.state = ImageConnectionState::WantToConnect;
            }
            return Ok(());
        }
        if self.state == ImageConnectionState::Connected {
            return self.disconnect_camera();
        }
        self.state = ImageConnectionState::Disconnected;
        Ok(())
    }

    fn disconnect_camera(&mut self) -> Result<()> {
        self.sdk
            .disconnect_camera(CameraId::Color)
            .map_err(TangoError::sdk("disconnect_camera"))?;
        self.accepting.store(false, Ordering::SeqCst);
        self.pending.lock().take();
        self.state = ImageConnectionState::Disconnected;
        log::info!("Color camera disconnected");
        Ok(())
    }

    pub fn tick(&mut self) {
        if self.state == ImageConnectionState::WantToConnect {
            self.try_connect();
        }
        if self.state != ImageConnectionState::Connected {
            return;
        }
        let Some(frame) = self.pending.lock().take() else {
            return;
        };
        if frame.timestamp != self.last_timestamp {
            self.last_timestamp = frame.timestamp;
            self.texture.publish(frame);
        }
    }

    fn try_connect(&mut self) {
        if !self.texture.is_ready() {
            log::trace!("Video texture not ready, deferring color camera");
            return;
        }
        self.state = ImageConnectionState::ConnectScheduled;

        let pending = self.pending.clone();
        let accepting = self.accepting.clone();
        let callback: FrameCallback = Arc::new(move |buffer: &ImageBuffer| {
            if buffer.camera == CameraId::Color && accepting.load(Ordering::SeqCst) {
                *pending.lock() = Some(buffer.clone());
            }
        });

        // Accept frames before registering so none delivered during
        // registration are dropped.
        self.accepting.store(true, Ordering::SeqCst);
        match self.sdk.connect_on_frame_available(CameraId::Color, callback) {
            Ok(()) => {
                log::info!("Color camera connected");
                self.state = ImageConnectionState::Connected;
            }
            Err(status) => {
                log::error!("Registering color frame callback failed: {}", status);
                self.accepting.store(false, Ordering::SeqCst);
                self.state = ImageConnectionState::WantToConnect;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sim::SimulatedSdk;
    use crate::types::ImageFormat;

    fn frame(ts: f64) -> ImageBuffer {
        ImageBuffer {
            camera: CameraId::Color,
            width: 4,
            height: 2,
            timestamp: ts,
            frame_number: ts as u64,
            format: ImageFormat::Rgba8888,
            data: vec![0; 32],
        }
    }

    fn runtime(color: bool) -> RuntimeConfig {
        RuntimeConfig {
            enable_color_camera: color,
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn test_waits_for_texture_before_connecting() {
        let sdk = Arc::new(SimulatedSdk::new());
        sdk.connect(&Config::default()).unwrap();
        let texture = VideoTexture::new();
        let mut image = ImageResolver::new(sdk.clone(), texture.clone(), &runtime(true));
        assert_eq!(image.state(), ImageConnectionState::WantToConnect);

        image.tick();
        assert_eq!(image.state(), ImageConnectionState::WantToConnect);
        assert!(!sdk.has_frame_callback(CameraId::Color));

        texture.mark_ready();
        image.tick();
        assert_eq!(image.state(), ImageConnectionState::Connected);
        assert!(sdk.has_frame_callback(CameraId::Color));
    }

    #[test]
    fn test_failed_registration_retries() {
        let sdk = Arc::new(SimulatedSdk::new());
        let texture = VideoTexture::new();
        texture.mark_ready();
        let mut image = ImageResolver::new(sdk.clone(), texture, &runtime(true));
        image.tick();
        assert_eq!(image.state(), ImageConnectionState::WantToConnect);

        sdk.connect(&Config::default()).unwrap();
        image.tick();
        assert_eq!(image.state(), ImageConnectionState::Connected);
    }

    #[test]
    fn test_publishes_newest_frame() {
        let sdk = Arc::new(SimulatedSdk::new());
        sdk.connect(&Config::default()).unwrap();
        let texture = VideoTexture::new();
        texture.mark_ready();
        let mut image = ImageResolver::new(sdk.clone(), texture.clone(), &runtime(true));
        image.tick();

        assert!(sdk.emit_frame(&frame(1.0)));
        assert!(sdk.emit_frame(&frame(2.0)));
        image.tick();
        assert_eq!(image.last_timestamp(), 2.0);
        assert_eq!(texture.latest_frame().unwrap().timestamp, 2.0);
    }

    #[test]
    fn test_disable_disconnects_camera() {
        let sdk = Arc::new(SimulatedSdk::new());
        sdk.connect(&Config::default()).unwrap();
        let texture = VideoTexture::new();
        texture.mark_ready();
        let mut image = ImageResolver::new(sdk.clone(), texture, &runtime(true));
        image.tick();
        image.set_runtime_config(&runtime(false)).unwrap();
        assert_eq!(image.state(), ImageConnectionState::Disconnected);
        assert!(!sdk.has_frame_callback(CameraId::Color));

        image.set_runtime_config(&runtime(true)).unwrap();
        assert_eq!(image.state(), ImageConnectionState::WantToConnect);
    }
}
