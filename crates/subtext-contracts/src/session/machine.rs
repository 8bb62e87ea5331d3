use tracing::debug;

use crate::analysis::{AnalysisResult, ParsedFields};
use crate::error::PipelineError;
use crate::segmentation::SegmentedMessages;

use super::input::RawInput;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    OcrFailed,
    Analyzed(AnalysisResult),
    AuthRequired,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::OcrFailed => "ocr_failed",
            Self::Analyzed(_) => "analyzed",
            Self::AuthRequired => "auth_required",
        }
    }
}

/// Identifies one analysis attempt. Results carrying a stale ticket are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestTicket {
    generation: u64,
}

impl RequestTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Screen-lifetime session: current state plus the entities derived so far.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    input: Option<RawInput>,
    segments: Option<SegmentedMessages>,
    generation: u64,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            input: None,
            segments: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn input(&self) -> Option<&RawInput> {
        self.input.as_ref()
    }

    pub fn segments(&self) -> Option<&SegmentedMessages> {
        self.segments.as_ref()
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        match &self.state {
            SessionState::Analyzed(result) => Some(result),
            _ => None,
        }
    }

    /// Display fields for the current analysis, or the defaults when there is none.
    pub fn parsed(&self) -> ParsedFields {
        self.analysis()
            .map(AnalysisResult::parsed)
            .unwrap_or_default()
    }

    pub fn is_current(&self, ticket: RequestTicket) -> bool {
        ticket.generation == self.generation
    }

    /// Enter `Scanning` for a new input. Any in-flight request is superseded.
    pub fn begin(&mut self, input: RawInput) -> RequestTicket {
        self.generation += 1;
        debug!(
            generation = self.generation,
            source = input.source_label(),
            from = self.state.label(),
            "session scan started"
        );
        self.input = Some(input);
        self.segments = None;
        self.state = SessionState::Scanning;
        RequestTicket {
            generation: self.generation,
        }
    }

    pub fn record_segments(&mut self, ticket: RequestTicket, segments: SegmentedMessages) -> bool {
        if !self.accepts(ticket, "segments") {
            return false;
        }
        self.segments = Some(segments);
        true
    }

    pub fn complete(&mut self, ticket: RequestTicket, result: AnalysisResult) -> bool {
        if !self.accepts(ticket, "analysis") {
            return false;
        }
        self.segments = Some(result.selected_messages.clone());
        self.state = SessionState::Analyzed(result);
        debug!(generation = self.generation, "session analyzed");
        true
    }

    pub fn fail(&mut self, ticket: RequestTicket, err: &PipelineError) -> bool {
        if !self.accepts(ticket, err.kind()) {
            return false;
        }
        match err {
            PipelineError::ExtractionFailure(_) => {
                self.segments = None;
                self.state = SessionState::OcrFailed;
            }
            PipelineError::AuthRequired(_) => {
                self.clear_derived();
                self.state = SessionState::AuthRequired;
            }
            PipelineError::SubscriptionRequired
            | PipelineError::AnalysisFailure(_)
            | PipelineError::SegmentationFailure(_)
            | PipelineError::EmptyInput => {
                self.clear_derived();
                self.state = SessionState::Idle;
            }
        }
        debug!(
            generation = self.generation,
            kind = err.kind(),
            to = self.state.label(),
            "session failed"
        );
        true
    }

    /// Drop everything derived and return to `Idle`. Late responses are ignored afterwards.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.clear_derived();
        self.state = SessionState::Idle;
        debug!(generation = self.generation, "session reset");
    }

    fn accepts(&self, ticket: RequestTicket, what: &str) -> bool {
        if !self.is_current(ticket) {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                what,
                "discarding stale result"
            );
            return false;
        }
        if self.state != SessionState::Scanning {
            debug!(
                state = self.state.label(),
                what, "discarding result outside scanning"
            );
            return false;
        }
        true
    }

    fn clear_derived(&mut self) {
        self.input = None;
        self.segments = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionMachine, SessionState};
    use crate::analysis::AnalysisResult;
    use crate::error::PipelineError;
    use crate::segmentation::SegmentedMessages;
    use crate::session::RawInput;

    fn text_input(text: &str) -> RawInput {
        RawInput::manual_text(text).unwrap()
    }

    fn result(text: &str) -> AnalysisResult {
        AnalysisResult::new(
            format!("**Hidden Intent:** {text}"),
            SegmentedMessages::fallback("hey you up?"),
        )
    }

    #[test]
    fn happy_path_reaches_analyzed() {
        let mut session = SessionMachine::new();
        let ticket = session.begin(text_input("hey you up?"));
        assert_eq!(session.state(), &SessionState::Scanning);
        assert!(session.record_segments(ticket, SegmentedMessages::fallback("hey you up?")));
        assert!(session.complete(ticket, result("boredom")));
        assert_eq!(session.state().label(), "analyzed");
        assert_eq!(session.parsed().intent, "boredom");
        assert!(session.input().is_some());
    }

    #[test]
    fn reset_clears_everything() {
        let mut session = SessionMachine::new();
        let ticket = session.begin(text_input("hey"));
        session.complete(ticket, result("x"));
        session.reset();
        assert_eq!(session.state(), &SessionState::Idle);
        assert!(session.input().is_none());
        assert!(session.segments().is_none());
        assert!(session.analysis().is_none());
        assert_eq!(session.parsed().behavior_type, "Unknown");
    }

    #[test]
    fn late_result_after_reset_is_discarded() {
        let mut session = SessionMachine::new();
        let ticket = session.begin(text_input("hey"));
        session.reset();
        assert!(!session.record_segments(ticket, SegmentedMessages::fallback("hey")));
        assert!(!session.complete(ticket, result("late")));
        assert_eq!(session.state(), &SessionState::Idle);
        assert!(session.segments().is_none());
    }

    #[test]
    fn newer_request_supersedes_older() {
        let mut session = SessionMachine::new();
        let first = session.begin(text_input("first"));
        let second = session.begin(text_input("second"));
        assert!(!session.complete(first, result("old")));
        assert!(!session.fail(first, &PipelineError::AnalysisFailure("x".to_string())));
        assert_eq!(session.state(), &SessionState::Scanning);
        assert!(session.complete(second, result("new")));
        assert_eq!(session.parsed().intent, "new");
    }

    #[test]
    fn extraction_failure_moves_to_ocr_failed() {
        let mut session = SessionMachine::new();
        let ticket = session.begin(text_input("x"));
        assert!(session.fail(ticket, &PipelineError::ExtractionFailure("none".to_string())));
        assert_eq!(session.state(), &SessionState::OcrFailed);
        assert!(session.analysis().is_none());
        session.reset();
        assert_eq!(session.state(), &SessionState::Idle);
    }

    #[test]
    fn auth_failure_discards_partial_state() {
        let mut session = SessionMachine::new();
        let ticket = session.begin(text_input("x"));
        session.record_segments(ticket, SegmentedMessages::fallback("x"));
        session.fail(ticket, &PipelineError::AuthRequired("401".to_string()));
        assert_eq!(session.state(), &SessionState::AuthRequired);
        assert!(session.input().is_none());
        assert!(session.segments().is_none());
    }

    #[test]
    fn subscription_and_analysis_failures_return_to_idle() {
        for err in [
            PipelineError::SubscriptionRequired,
            PipelineError::AnalysisFailure("boom".to_string()),
        ] {
            let mut session = SessionMachine::new();
            let ticket = session.begin(text_input("x"));
            assert!(session.fail(ticket, &err));
            assert_eq!(session.state(), &SessionState::Idle);
            assert!(session.input().is_none());
        }
    }

    #[test]
    fn second_completion_for_same_ticket_is_ignored() {
        let mut session = SessionMachine::new();
        let ticket = session.begin(text_input("x"));
        assert!(session.complete(ticket, result("one")));
        assert!(!session.complete(ticket, result("two")));
        assert_eq!(session.parsed().intent, "one");
    }
}
