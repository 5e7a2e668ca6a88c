//! Shared fixtures and test doubles for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use prodapic::{
    BackgroundGenerator, BackgroundRemover, ComposeError, GenerationRequest, ImageAsset,
    OutputFormat, QuotaDecision, QuotaStore, Result,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

/// Solid-color PNG asset
pub fn solid_png(width: u32, height: u32, color: [u8; 4]) -> ImageAsset {
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)));
    ImageAsset::from_image(&image, OutputFormat::Png, 90).unwrap()
}

/// Opaque disc on a transparent square, the shape a matting service returns
pub fn matted_subject(size: u32, color: [u8; 3]) -> ImageAsset {
    let radius = size as f32 / 2.0;
    let image = RgbaImage::from_fn(size, size, |x, y| {
        let dx = x as f32 + 0.5 - radius;
        let dy = y as f32 + 0.5 - radius;
        if dx * dx + dy * dy <= radius * radius {
            Rgba([color[0], color[1], color[2], 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    ImageAsset::from_image(&DynamicImage::ImageRgba8(image), OutputFormat::Png, 90).unwrap()
}

/// Encoded bytes of a plausible product photo
pub fn photo_bytes() -> Vec<u8> {
    solid_png(64, 48, [220, 220, 220, 255]).bytes().to_vec()
}

type Gate = oneshot::Receiver<Result<ImageAsset>>;

/// Removal double: answers gated calls first, then the default subject
#[derive(Default)]
pub struct MockRemover {
    gates: Mutex<VecDeque<Gate>>,
    pub calls: AtomicUsize,
    subject: Option<ImageAsset>,
}

impl MockRemover {
    pub fn returning(subject: ImageAsset) -> Arc<Self> {
        Arc::new(Self {
            subject: Some(subject),
            ..Self::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a call whose result is supplied later through the returned sender
    pub fn gate(&self) -> oneshot::Sender<Result<ImageAsset>> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push_back(rx);
        tx
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackgroundRemover for MockRemover {
    async fn remove(&self, _image: &ImageAsset) -> Result<ImageAsset> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().unwrap().pop_front();
        match gate {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ComposeError::removal("gate dropped"))),
            None => self
                .subject
                .clone()
                .ok_or_else(|| ComposeError::removal("image rejected")),
        }
    }
}

/// Generation double recording every request
#[derive(Default)]
pub struct MockGenerator {
    gates: Mutex<VecDeque<Gate>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
    background: Option<ImageAsset>,
}

impl MockGenerator {
    pub fn returning(background: ImageAsset) -> Arc<Self> {
        Arc::new(Self {
            background: Some(background),
            ..Self::default()
        })
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gate(&self) -> oneshot::Sender<Result<ImageAsset>> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push_back(rx);
        tx
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// Yield until `count` requests have arrived
    pub async fn wait_for_requests(&self, count: usize) {
        while self.request_count() < count {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl BackgroundGenerator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageAsset> {
        self.requests.lock().unwrap().push(request.clone());
        let gate = self.gates.lock().unwrap().pop_front();
        match gate {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ComposeError::generation(500, "gate dropped"))),
            None => self
                .background
                .clone()
                .ok_or_else(|| ComposeError::generation(503, "service unavailable")),
        }
    }
}

/// Quota store wrapper counting every check
pub struct CountingStore<S> {
    pub inner: S,
    pub calls: AtomicUsize,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: QuotaStore> QuotaStore for CountingStore<S> {
    async fn check_and_decrement(
        &self,
        key: &str,
        window: Duration,
        capacity: u32,
    ) -> Result<QuotaDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.check_and_decrement(key, window, capacity).await
    }

    async fn refund(&self, key: &str, capacity: u32) -> Result<()> {
        self.inner.refund(key, capacity).await
    }
}

/// Quota store that parks its first check until released
pub struct HeldStore<S> {
    pub inner: S,
    hold: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl<S> HeldStore<S> {
    pub fn new(inner: S) -> Arc<Self> {
        Arc::new(Self {
            inner,
            hold: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    /// Resolves once the first check is parked
    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl<S: QuotaStore> QuotaStore for HeldStore<S> {
    async fn check_and_decrement(
        &self,
        key: &str,
        window: Duration,
        capacity: u32,
    ) -> Result<QuotaDecision> {
        if self.hold.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.check_and_decrement(key, window, capacity).await
    }

    async fn refund(&self, key: &str, capacity: u32) -> Result<()> {
        self.inner.refund(key, capacity).await
    }
}
