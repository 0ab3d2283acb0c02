use tracing::{info, warn};

/// Contract of an external GPU frame-capture tool. `end_capture` reports
/// whether the tool actually wrote a capture.
pub trait CaptureBackend: Send {
    fn try_init(&mut self) -> bool;
    fn begin_capture(&mut self);
    fn end_capture(&mut self) -> bool;
}

/// Backend used when no capture tool is wanted; init always fails, so the
/// bridge is born disabled.
#[derive(Debug, Default)]
pub struct NullCaptureBackend;

impl CaptureBackend for NullCaptureBackend {
    fn try_init(&mut self) -> bool {
        false
    }

    fn begin_capture(&mut self) {}

    fn end_capture(&mut self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// The backend failed to initialize; every operation is a permanent no-op.
    Disabled,
    Idle,
    Armed,
    Capturing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Complete,
    Failed,
}

/// Bounds exactly one capture attempt around one frame's GPU work.
///
/// Idle -> arm -> Armed -> begin_frame -> Capturing -> end_frame -> Idle,
/// recording the outcome. Arming while armed or capturing, and beginning
/// while not armed, are no-ops: the render path calls begin/end every frame
/// and only the designated one captures.
pub struct CaptureBridge {
    backend: Box<dyn CaptureBackend>,
    state: CaptureState,
    last_outcome: Option<CaptureOutcome>,
}

impl std::fmt::Debug for CaptureBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureBridge")
            .field("state", &self.state)
            .field("last_outcome", &self.last_outcome)
            .finish_non_exhaustive()
    }
}

impl CaptureBridge {
    pub fn new(mut backend: Box<dyn CaptureBackend>) -> Self {
        let state = if backend.try_init() {
            info!("capture_backend_ready");
            CaptureState::Idle
        } else {
            // Reported once here; the engine runs fine without captures.
            warn!("capture_backend_unavailable");
            CaptureState::Disabled
        };
        Self {
            backend,
            state,
            last_outcome: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == CaptureState::Armed
    }

    pub fn last_outcome(&self) -> Option<CaptureOutcome> {
        self.last_outcome
    }

    /// Requests that the next rendered frame be captured.
    pub fn arm(&mut self) {
        if self.state == CaptureState::Idle {
            self.state = CaptureState::Armed;
            info!("capture_armed");
        }
    }

    /// Called by the render path before submitting GPU work.
    pub fn begin_frame(&mut self) {
        if self.state == CaptureState::Armed {
            self.backend.begin_capture();
            self.state = CaptureState::Capturing;
        }
    }

    /// Called by the render path after submitting GPU work.
    pub fn end_frame(&mut self) {
        if self.state == CaptureState::Capturing {
            let completed = self.backend.end_capture();
            self.last_outcome = Some(if completed {
                CaptureOutcome::Complete
            } else {
                CaptureOutcome::Failed
            });
            if completed {
                info!("capture_complete");
            } else {
                warn!("capture_failed");
            }
            self.state = CaptureState::Idle;
        }
    }
}
