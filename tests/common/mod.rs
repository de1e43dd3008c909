//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use storyplay::detection::{CameraSource, VideoStream};
use storyplay::narration::{AudioSink, NarrationBackend, NarrationRequest};
use storyplay::perception::{
    BoundingBox, Frame, GestureAdapter, GestureModel, HandResult, ObjectAdapter, ObjectDetection,
    ObjectModel, SharedGesture, SharedObject, TracingOverlay, category_for,
};
use storyplay::speech::{ProviderSink, Recognizer, RecognizerError};
use storyplay::story::{Participation, ParticipationKind, StoryScene};
use storyplay::{
    DialogueLine, Error, NarrationHandle, Narrator, Notice, Perception, Result, Speaker, Story,
};

/// What the fake camera "sees"
#[derive(Clone, Default)]
pub struct Stage {
    inner: Arc<Mutex<StageState>>,
}

#[derive(Default)]
struct StageState {
    hand: Option<(String, f32)>,
    objects: Vec<(String, f32)>,
}

impl Stage {
    /// Hold up a story gesture (e.g. "wave")
    pub fn gesture(&self, name: &str, score: f32) {
        let category = category_for(name).unwrap_or(name).to_string();
        self.inner.lock().unwrap().hand = Some((category, score));
    }

    /// Hold up an object
    pub fn object(&self, label: &str, score: f32) {
        self.inner
            .lock()
            .unwrap()
            .objects
            .push((label.to_string(), score));
    }

    /// Empty the view
    pub fn clear(&self) {
        let mut state = self.inner.lock().unwrap();
        state.hand = None;
        state.objects.clear();
    }

    /// Gesture adapter watching this stage
    pub fn gesture_adapter(&self, fail_load: bool) -> SharedGesture {
        Arc::new(tokio::sync::Mutex::new(GestureAdapter::new(
            Box::new(StageGesture {
                stage: self.clone(),
                fail_load,
            }),
            Arc::new(TracingOverlay),
        )))
    }

    /// Object adapter watching this stage
    pub fn object_adapter(&self) -> SharedObject {
        Arc::new(tokio::sync::Mutex::new(ObjectAdapter::new(
            Box::new(StageObject(self.clone())),
            Arc::new(TracingOverlay),
        )))
    }
}

struct StageGesture {
    stage: Stage,
    fail_load: bool,
}

#[async_trait]
impl GestureModel for StageGesture {
    async fn load(&mut self) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if self.fail_load {
            return Err(Error::Perception("model weights missing".to_string()));
        }
        Ok(())
    }

    fn recognize(&mut self, _frame: &Frame) -> Result<Option<HandResult>> {
        let state = self.stage.inner.lock().unwrap();
        Ok(state.hand.clone().map(|(category, score)| HandResult {
            category,
            score,
            landmarks: Vec::new(),
        }))
    }
}

struct StageObject(Stage);

#[async_trait]
impl ObjectModel for StageObject {
    async fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<ObjectDetection>> {
        let state = self.0.inner.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .map(|(label, score)| ObjectDetection {
                label: label.clone(),
                score: *score,
                bounds: BoundingBox {
                    x: 10.0,
                    y: 10.0,
                    width: 100.0,
                    height: 100.0,
                },
            })
            .collect())
    }
}

/// Camera that counts acquisitions and releases
#[derive(Clone, Default)]
pub struct FakeCamera {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    deny: bool,
    blank: bool,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Camera whose permission is denied
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Camera that never produces frame dimensions
    pub fn blank() -> Self {
        Self {
            blank: true,
            ..Self::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraSource for FakeCamera {
    async fn acquire(&self) -> Result<Box<dyn VideoStream>> {
        if self.deny {
            return Err(Error::Camera("permission denied".to_string()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);

        let (width, height) = if self.blank { (0, 0) } else { (640, 480) };
        Ok(Box::new(FakeStream {
            frame: Frame::new(width, height, vec![0u8; 16]),
            released: Arc::clone(&self.released),
        }))
    }
}

struct FakeStream {
    frame: Frame,
    released: Arc<AtomicUsize>,
}

impl VideoStream for FakeStream {
    fn latest_frame(&mut self) -> Option<Frame> {
        Some(self.frame.clone())
    }

    fn stop(&mut self) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Microphone the test speaks into
#[derive(Clone, Default)]
pub struct Mic {
    sink: Arc<Mutex<Option<ProviderSink>>>,
    refuse: Arc<Mutex<Option<RecognizerError>>>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl Mic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recognizer(&self) -> Box<dyn Recognizer> {
        Box::new(MicRecognizer(self.clone()))
    }

    /// Final transcript; false if the recognizer is not running
    pub fn say(&self, text: &str) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => {
                sink.result(text, true);
                true
            }
            None => false,
        }
    }

    /// Interim transcript
    pub fn mumble(&self, text: &str) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.result(text, false);
        }
    }

    /// Recognizer stops on its own
    pub fn drop_out(&self) {
        if let Some(sink) = self.sink.lock().unwrap().take() {
            sink.ended();
        }
    }

    /// Recognizer reports an error
    pub fn fail(&self, error: RecognizerError) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.error(error);
        }
    }

    /// Next start is refused with `error`
    pub fn refuse_next(&self, error: RecognizerError) {
        *self.refuse.lock().unwrap() = Some(error);
    }

    pub fn is_live(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct MicRecognizer(Mic);

#[async_trait]
impl Recognizer for MicRecognizer {
    async fn start(&mut self, sink: ProviderSink) -> std::result::Result<(), RecognizerError> {
        self.0.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.0.refuse.lock().unwrap().take() {
            return Err(error);
        }

        sink.started();
        *self.0.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.0.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(sink) = self.0.sink.lock().unwrap().take() {
            sink.ended();
        }
    }
}

/// Sink that counts clips and holds each for `pace`
#[derive(Clone)]
pub struct CountingSink {
    pace: Duration,
    played: Arc<AtomicUsize>,
}

impl CountingSink {
    pub fn new(pace: Duration) -> Self {
        Self {
            pace,
            played: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn played(&self) -> usize {
        self.played.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for CountingSink {
    async fn play(&mut self, _mp3: &[u8]) -> Result<()> {
        tokio::time::sleep(self.pace).await;
        self.played.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Backend returning a few fake bytes per line
pub struct FakeVoice;

#[async_trait]
impl NarrationBackend for FakeVoice {
    async fn synthesize(&self, request: &NarrationRequest) -> Result<Vec<u8>> {
        Ok(request.cache_key.as_bytes().to_vec())
    }
}

/// Backend that always fails
pub struct BrokenVoice;

#[async_trait]
impl NarrationBackend for BrokenVoice {
    async fn synthesize(&self, _request: &NarrationRequest) -> Result<Vec<u8>> {
        Err(Error::Narration("service error 500".to_string()))
    }
}

/// Narration task with the given backend and a counting sink
pub fn narration(backend: Arc<dyn NarrationBackend>, sink: &CountingSink) -> NarrationHandle {
    NarrationHandle::spawn(Narrator::new(backend, Box::new(sink.clone()), 16))
}

/// Perception over a stage, camera, and mic
pub fn perception(stage: &Stage, camera: &FakeCamera, mic: &Mic) -> (Perception, SharedGesture, SharedObject) {
    let gesture = stage.gesture_adapter(false);
    let object = stage.object_adapter();
    let perception = Perception {
        camera: Arc::new(camera.clone()),
        gesture: Some(Arc::clone(&gesture)),
        object: Some(Arc::clone(&object)),
        recognizer: Some(mic.recognizer()),
    };
    (perception, gesture, object)
}

/// A story scene with two narration lines
pub fn scene(number: u32, kind: ParticipationKind, expected: &[&str]) -> StoryScene {
    StoryScene {
        scene_number: number,
        narration: vec![
            DialogueLine::new(Speaker::Mom, format!("Scene {number} begins."), "warm"),
            DialogueLine::new(Speaker::Dad, format!("Scene {number} continues."), "excited"),
        ],
        participation: Some(Participation {
            kind,
            speaker: Speaker::Mom,
            prompt: format!("Your turn in scene {number}!"),
            target_word: expected.first().copied().unwrap_or_default().to_string(),
            expected_responses: expected.iter().map(ToString::to_string).collect(),
        }),
        ambiance: String::new(),
        music: String::new(),
    }
}

pub fn story(scenes: Vec<StoryScene>) -> Story {
    Story {
        title: "Test Story".to_string(),
        scenes,
    }
}

/// Receive notices until one matches, returning everything seen
pub async fn until(
    notices: &mut mpsc::UnboundedReceiver<Notice>,
    done: impl Fn(&Notice) -> bool,
) -> Vec<Notice> {
    let mut seen = Vec::new();
    while let Some(notice) = notices.recv().await {
        let matched = done(&notice);
        seen.push(notice);
        if matched {
            return seen;
        }
    }
    panic!("notice stream ended before match; saw {seen:?}");
}

/// Drain notices available right now
pub fn drain(notices: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut seen = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        seen.push(notice);
    }
    seen
}
