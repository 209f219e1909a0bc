//! The main loop tying camera, detection pipelines, rendering and display together.

use std::fmt;

use crate::face::{
    EmotionClassifier, FaceAnnotation, FaceDetector, FacePipeline, FerPlusClassifier,
};
use crate::gui::{FrameSink, Window};
use crate::hand::{HandAnnotation, HandPipeline, HandTracker};
use crate::image::{Image, JpegBackend};
use crate::models::ModelDir;
use crate::render;
use crate::timer::{FpsCounter, Timer};
use crate::video::{
    webcam::{Webcam, WebcamOptions},
    FrameSource,
};

/// Title of the display window.
pub const WINDOW_TITLE: &str = "Smart Vision System";

/// Selects which detections run on every frame.
#[derive(Debug, Clone)]
pub struct VisionOptions {
    detect_emotion: bool,
    detect_hands: bool,
    models: Option<ModelDir>,
}

impl Default for VisionOptions {
    fn default() -> Self {
        Self {
            detect_emotion: true,
            detect_hands: true,
            models: None,
        }
    }
}

impl VisionOptions {
    /// Enables or disables emotion classification of detected faces. Enabled by default.
    pub fn detect_emotion(self, detect_emotion: bool) -> Self {
        Self {
            detect_emotion,
            ..self
        }
    }

    /// Enables or disables hand detection. Enabled by default.
    pub fn detect_hands(self, detect_hands: bool) -> Self {
        Self {
            detect_hands,
            ..self
        }
    }

    /// Loads the networks from `models` instead of the directory named by the environment.
    pub fn models(self, models: ModelDir) -> Self {
        Self {
            models: Some(models),
            ..self
        }
    }

    pub fn emotion_enabled(&self) -> bool {
        self.detect_emotion
    }

    pub fn hands_enabled(&self) -> bool {
        self.detect_hands
    }
}

/// Everything detected in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    pub faces: Vec<FaceAnnotation>,
    pub hands: Vec<HandAnnotation>,
}

impl Annotations {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty() && self.hands.is_empty()
    }
}

/// Why [`SmartVision::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The camera stopped delivering frames.
    EndOfStream,
    /// The user pressed the exit key or closed the window.
    ExitKey,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndOfStream => f.write_str("end of stream"),
            StopReason::ExitKey => f.write_str("exit requested"),
        }
    }
}

/// Live face, emotion and hand gesture annotation of a video stream.
pub struct SmartVision<S: FrameSource = Webcam, K: FrameSink = Window> {
    source: S,
    sink: K,
    faces: FacePipeline,
    hands: Option<HandPipeline>,
}

impl SmartVision {
    /// Loads all networks, opens the webcam and prepares the display window.
    pub fn open(options: VisionOptions) -> anyhow::Result<Self> {
        let models = options.models.clone().unwrap_or_default();
        log::debug!("loading networks from {}", models.dir().display());

        let classifier: Option<Box<dyn EmotionClassifier>> = if options.detect_emotion {
            Some(Box::new(FerPlusClassifier::load(&models)?))
        } else {
            None
        };
        let faces = FacePipeline::new(Box::new(FaceDetector::new(&models)?), classifier);
        let hands = if options.detect_hands {
            Some(HandPipeline::new(Box::new(HandTracker::new(&models)?)))
        } else {
            None
        };

        let webcam =
            Webcam::open(WebcamOptions::default().jpeg_backend(JpegBackend::from_env()?))?;
        Ok(Self::new(webcam, Window::new(WINDOW_TITLE), faces, hands))
    }
}

impl<S: FrameSource, K: FrameSink> SmartVision<S, K> {
    /// Creates a system from its parts. Hand detection is disabled if `hands` is [`None`].
    pub fn new(source: S, sink: K, faces: FacePipeline, hands: Option<HandPipeline>) -> Self {
        Self {
            source,
            sink,
            faces,
            hands,
        }
    }

    /// Runs both pipelines on `frame` and draws their results onto it.
    pub fn process_frame(&mut self, frame: &mut Image) -> Annotations {
        let annotations = Annotations {
            faces: self.faces.process(&*frame),
            hands: match &mut self.hands {
                Some(hands) => hands.process(&*frame),
                None => Vec::new(),
            },
        };
        render::annotate(frame, &annotations);
        annotations
    }

    /// Processes and displays frames until the stream ends or the user quits.
    ///
    /// The camera and the window are released before this returns, whatever the outcome. Display
    /// failures are returned as errors.
    pub fn run(mut self) -> anyhow::Result<StopReason> {
        let result = self.run_loop();

        self.source.release();
        self.sink.close();

        match &result {
            Ok(reason) => log::info!("stopped: {reason}"),
            Err(e) => log::error!("stopped: {e:#}"),
        }
        result
    }

    fn run_loop(&mut self) -> anyhow::Result<StopReason> {
        let mut fps = FpsCounter::new("smart vision");
        loop {
            let mut frame = match self.source.read() {
                Ok(frame) => frame,
                Err(e) => {
                    log::debug!("camera read failed: {e:#}");
                    return Ok(StopReason::EndOfStream);
                }
            };

            frame.flip_horizontal_in_place();
            self.process_frame(&mut frame);
            self.sink.show(&frame)?;

            fps.tick_with(self.timers());

            if self.sink.exit_requested() {
                return Ok(StopReason::ExitKey);
            }
        }
    }

    /// Returns the timers of the frame source and of both pipelines.
    fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        self.source
            .timers()
            .into_iter()
            .chain(self.faces.timers())
            .chain(self.hands.iter().flat_map(|hands| hands.timers()))
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque, rc::Rc};

    use anyhow::bail;

    use super::*;
    use crate::face::FaceDetect;
    use crate::image::{Color, ImageView, Rect};

    /// Counts how often the devices were shut down, and records the displayed frames.
    #[derive(Default)]
    struct Log {
        releases: usize,
        closes: usize,
        shown: Vec<Image>,
    }

    type SharedLog = Rc<RefCell<Log>>;

    struct Frames {
        frames: VecDeque<Image>,
        log: SharedLog,
        t_read: Timer,
    }

    impl FrameSource for Frames {
        fn read(&mut self) -> anyhow::Result<Image> {
            match self.frames.pop_front() {
                Some(frame) => Ok(frame),
                None => bail!("end of test stream"),
            }
        }

        fn release(&mut self) {
            self.log.borrow_mut().releases += 1;
        }

        fn timers(&self) -> Vec<&Timer> {
            vec![&self.t_read]
        }
    }

    struct Display {
        /// Requests exit after this many frames.
        exit_after: Option<usize>,
        fail: bool,
        log: SharedLog,
    }

    impl FrameSink for Display {
        fn show(&mut self, frame: &Image) -> anyhow::Result<()> {
            if self.fail {
                bail!("display lost");
            }
            self.log.borrow_mut().shown.push(frame.clone());
            Ok(())
        }

        fn exit_requested(&self) -> bool {
            self.exit_after
                .map_or(false, |n| self.log.borrow().shown.len() >= n)
        }

        fn close(&mut self) {
            self.log.borrow_mut().closes += 1;
        }
    }

    struct NoFaces;

    impl FaceDetect for NoFaces {
        fn detect_faces(&mut self, _: ImageView<'_>) -> anyhow::Result<Vec<Rect>> {
            Ok(Vec::new())
        }
    }

    fn system(
        frames: usize,
        exit_after: Option<usize>,
        fail: bool,
    ) -> (SmartVision<Frames, Display>, SharedLog) {
        let log = SharedLog::default();
        let source = Frames {
            frames: (0..frames).map(|_| test_frame()).collect(),
            log: log.clone(),
            t_read: Timer::new("read"),
        };
        let sink = Display {
            exit_after,
            fail,
            log: log.clone(),
        };
        let faces = FacePipeline::new(Box::new(NoFaces), None);
        (SmartVision::new(source, sink, faces, None), log)
    }

    fn test_frame() -> Image {
        let mut frame = Image::new(4, 2);
        frame.set(0, 0, Color::RED);
        frame
    }

    #[test]
    fn read_failure_ends_stream_and_cleans_up_once() {
        let (system, log) = system(3, None, false);
        assert_eq!(system.run().unwrap(), StopReason::EndOfStream);

        let log = log.borrow();
        assert_eq!(log.shown.len(), 3);
        assert_eq!(log.releases, 1);
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn exit_key_stops_the_loop() {
        let (system, log) = system(10, Some(2), false);
        assert_eq!(system.run().unwrap(), StopReason::ExitKey);

        let log = log.borrow();
        assert_eq!(log.shown.len(), 2);
        assert_eq!(log.releases, 1);
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn display_failure_is_returned_after_cleanup() {
        let (system, log) = system(3, None, true);
        assert!(system.run().is_err());

        let log = log.borrow();
        assert_eq!(log.releases, 1);
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn frames_are_mirrored_and_otherwise_untouched() {
        let (system, log) = system(1, None, false);
        system.run().unwrap();

        let mut expected = Image::new(4, 2);
        expected.set(3, 0, Color::RED);
        assert_eq!(log.borrow().shown[0].data(), expected.data());
    }

    #[test]
    fn nothing_detected_leaves_frame_unmodified() {
        let (mut system, _) = system(0, None, false);
        let mut frame = test_frame();
        let annotations = system.process_frame(&mut frame);
        assert!(annotations.is_empty());
        assert_eq!(frame.data(), test_frame().data());
    }

    #[test]
    fn reports_source_and_pipeline_timers() {
        let (system, _) = system(0, None, false);
        let names = system
            .timers()
            .map(|timer| timer.to_string())
            .map(|summary| summary.split(':').next().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, ["read", "face", "emotion"]);
    }

    #[test]
    fn default_options_enable_everything() {
        let options = VisionOptions::default();
        assert!(options.emotion_enabled());
        assert!(options.hands_enabled());

        let options = options.detect_emotion(false);
        assert!(!options.emotion_enabled());
        assert!(options.hands_enabled());
    }
}
