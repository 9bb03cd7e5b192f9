use crate::errors::TrackerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptState {
    Idle,
    Listening,
    Committed,
    Cancelled,
}

impl TranscriptState {
    fn name(self) -> &'static str {
        match self {
            TranscriptState::Idle => "idle",
            TranscriptState::Listening => "listening",
            TranscriptState::Committed => "committed",
            TranscriptState::Cancelled => "cancelled",
        }
    }
}

/// One recognition result segment as delivered by a speech engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub is_final: bool,
}

impl Segment {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Buffers dictated text: finals accumulate, interim text is replaced on every push.
#[derive(Debug, Clone)]
pub struct TranscriptBuffer {
    state: TranscriptState,
    final_text: String,
    interim_text: String,
}

impl Default for TranscriptBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self {
            state: TranscriptState::Idle,
            final_text: String::new(),
            interim_text: String::new(),
        }
    }

    pub fn state(&self) -> TranscriptState {
        self.state
    }

    /// Text to show while listening.
    pub fn display(&self) -> String {
        format!("{}{}", self.final_text, self.interim_text)
    }

    pub fn start(&mut self) -> Result<(), TrackerError> {
        if self.state == TranscriptState::Listening {
            return Err(self.invalid("start"));
        }
        self.final_text.clear();
        self.interim_text.clear();
        self.state = TranscriptState::Listening;
        Ok(())
    }

    pub fn push_result(&mut self, segments: &[Segment]) -> Result<(), TrackerError> {
        if self.state != TranscriptState::Listening {
            return Err(self.invalid("push a result"));
        }
        self.interim_text.clear();
        for segment in segments {
            if segment.is_final {
                self.final_text.push_str(&segment.text);
            } else {
                self.interim_text.push_str(&segment.text);
            }
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<String, TrackerError> {
        if self.state != TranscriptState::Listening {
            return Err(self.invalid("commit"));
        }
        let text = self.display().trim().to_string();
        self.final_text.clear();
        self.interim_text.clear();
        self.state = TranscriptState::Committed;
        Ok(text)
    }

    pub fn cancel(&mut self) -> Result<(), TrackerError> {
        if self.state != TranscriptState::Listening {
            return Err(self.invalid("cancel"));
        }
        self.final_text.clear();
        self.interim_text.clear();
        self.state = TranscriptState::Cancelled;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> TrackerError {
        TrackerError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }
}
