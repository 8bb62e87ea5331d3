use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{json, Value};
use subtext_contracts::analysis::{AnalysisResult, ParsedFields};
use subtext_contracts::error::PipelineError;
use subtext_contracts::events::{PipelineEventKind, PipelineEvents};
use subtext_contracts::segmentation::{extract_message_block, SegmentedMessages};
use subtext_contracts::session::{
    ImageRef, InputSource, RawInput, RequestTicket, SessionMachine, SessionState,
};
use subtext_contracts::store::{Credentials, SecureStore};
use tracing::{debug, info, warn};

use crate::api::ApiClient;

/// Remote stages the pipeline drives. Every call carries the bearer token.
pub trait AnalysisBackend: Send + Sync {
    fn name(&self) -> &str;
    fn recognize_text(&self, token: &str, image: &ImageRef) -> Result<String, PipelineError>;
    fn extract_messages(&self, token: &str, raw_text: &str) -> Result<String, PipelineError>;
    fn analyze_messages(
        &self,
        token: &str,
        messages: &SegmentedMessages,
    ) -> Result<String, PipelineError>;
}

impl AnalysisBackend for ApiClient {
    fn name(&self) -> &str {
        "subtext-api"
    }

    fn recognize_text(&self, token: &str, image: &ImageRef) -> Result<String, PipelineError> {
        ApiClient::recognize_text(self, token, image)
    }

    fn extract_messages(&self, token: &str, raw_text: &str) -> Result<String, PipelineError> {
        ApiClient::extract_messages(self, token, raw_text)
    }

    fn analyze_messages(
        &self,
        token: &str,
        messages: &SegmentedMessages,
    ) -> Result<String, PipelineError> {
        ApiClient::analyze_messages(self, token, messages)
    }
}

/// Session machine shared between the thread running a request and the one
/// that may reset it.
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    inner: Arc<Mutex<SessionMachine>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, apply: impl FnOnce(&mut SessionMachine) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut guard)
    }

    pub fn begin(&self, input: RawInput) -> RequestTicket {
        self.with(|session| session.begin(input))
    }

    /// Returns the generation the reset moved to.
    pub fn reset(&self) -> u64 {
        self.with(|session| {
            session.reset();
            session.generation()
        })
    }

    /// Apply a failure and report the resulting state under the same lock.
    /// `None` when the ticket is stale and nothing changed.
    pub fn fail(&self, ticket: RequestTicket, err: &PipelineError) -> Option<SessionState> {
        self.with(|session| {
            session
                .fail(ticket, err)
                .then(|| session.state().clone())
        })
    }

    pub fn is_current(&self, ticket: RequestTicket) -> bool {
        self.with(|session| session.is_current(ticket))
    }

    pub fn snapshot(&self) -> SessionMachine {
        self.with(|session| session.clone())
    }

    pub fn state(&self) -> SessionState {
        self.with(|session| session.state().clone())
    }

    pub fn parsed(&self) -> ParsedFields {
        self.with(|session| session.parsed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed(AnalysisResult),
    /// A reset or a newer request arrived first; the result was dropped.
    Superseded,
}

pub struct AnalysisPipeline<B: AnalysisBackend, S: SecureStore> {
    backend: B,
    credentials: Credentials<S>,
    session: SharedSession,
    events: Option<PipelineEvents>,
}

impl<B: AnalysisBackend, S: SecureStore> AnalysisPipeline<B, S> {
    pub fn new(backend: B, credentials: Credentials<S>) -> Self {
        Self {
            backend,
            credentials,
            session: SharedSession::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: PipelineEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn credentials(&self) -> &Credentials<S> {
        &self.credentials
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn events(&self) -> Option<&PipelineEvents> {
        self.events.as_ref()
    }

    /// Drive one input through extraction, segmentation and analysis.
    ///
    /// Stages run strictly in order. Results that arrive after a reset or a
    /// newer `run` are discarded and reported as `Superseded`.
    pub fn run(&self, input: RawInput) -> Result<PipelineOutcome, PipelineError> {
        let source = input.source_label();
        let ticket = self.session.begin(input.clone());
        self.emit(
            PipelineEventKind::ScanStarted,
            ticket,
            json!({
                "source": source,
                "backend": self.backend.name(),
            }),
        );

        match self.run_stages(ticket, &input) {
            Ok(Some(result)) => {
                if !self.session.with(|session| session.complete(ticket, result.clone())) {
                    return Ok(self.discarded(ticket, "analysis"));
                }
                let parsed = result.parsed();
                info!(
                    generation = ticket.generation(),
                    behavior_type = %parsed.behavior_type,
                    messages = result.selected_messages.len(),
                    "analysis completed"
                );
                self.emit(
                    PipelineEventKind::AnalysisCompleted,
                    ticket,
                    json!({
                        "behavior_type": parsed.behavior_type,
                        "has_intent": !parsed.intent.is_empty(),
                        "has_reply": !parsed.reply.is_empty(),
                    }),
                );
                Ok(PipelineOutcome::Completed(result))
            }
            Ok(None) => Ok(self.discarded(ticket, "stage")),
            Err(err) => {
                let Some(state) = self.session.fail(ticket, &err) else {
                    return Ok(self.discarded(ticket, err.kind()));
                };
                warn!(generation = ticket.generation(), error = %err, "analysis failed");
                self.emit(
                    PipelineEventKind::StageFailed,
                    ticket,
                    json!({
                        "kind": err.kind(),
                        "state": state.label(),
                    }),
                );
                Err(err)
            }
        }
    }

    pub fn reset(&self) {
        let generation = self.session.reset();
        self.emit_generation(PipelineEventKind::SessionReset, generation, Value::Null);
    }

    /// `Ok(None)` means the ticket went stale between stages.
    fn run_stages(
        &self,
        ticket: RequestTicket,
        input: &RawInput,
    ) -> Result<Option<AnalysisResult>, PipelineError> {
        let raw_text = match &input.source {
            InputSource::Image(image) => {
                let token = self.credentials.usable_token()?;
                self.backend.recognize_text(&token, image)?
            }
            InputSource::ManualText { text } => {
                if text.trim().is_empty() {
                    return Err(PipelineError::EmptyInput);
                }
                text.clone()
            }
        };
        if !self.session.is_current(ticket) {
            return Ok(None);
        }
        self.emit(
            PipelineEventKind::TextExtracted,
            ticket,
            json!({
                "chars": raw_text.chars().count(),
            }),
        );

        let segments = self.segment(ticket, &raw_text)?;
        if !self
            .session
            .with(|session| session.record_segments(ticket, segments.clone()))
        {
            return Ok(None);
        }
        self.emit(
            PipelineEventKind::MessagesSegmented,
            ticket,
            json!({
                "count": segments.len(),
            }),
        );

        let token = self.credentials.usable_token()?;
        let content = self.backend.analyze_messages(&token, &segments)?;
        Ok(Some(AnalysisResult::new(content, segments)))
    }

    /// Only `AuthRequired` escapes; every other problem degrades to the raw text.
    fn segment(
        &self,
        ticket: RequestTicket,
        raw_text: &str,
    ) -> Result<SegmentedMessages, PipelineError> {
        let token = self.credentials.usable_token()?;
        let reason = match self.backend.extract_messages(&token, raw_text) {
            Ok(content) => match extract_message_block(&content)
                .and_then(|lines| {
                    SegmentedMessages::try_from(lines).map_err(PipelineError::SegmentationFailure)
                }) {
                Ok(segments) => {
                    debug!(count = segments.len(), "messages segmented");
                    return Ok(segments);
                }
                Err(err) => err,
            },
            Err(err @ PipelineError::AuthRequired(_)) => return Err(err),
            Err(err) => err,
        };
        warn!(error = %reason, "segmentation unavailable; using raw text");
        self.emit(
            PipelineEventKind::SegmentationFallback,
            ticket,
            json!({
                "reason": reason.to_string(),
            }),
        );
        Ok(SegmentedMessages::fallback(raw_text))
    }

    fn discarded(&self, ticket: RequestTicket, what: &str) -> PipelineOutcome {
        debug!(generation = ticket.generation(), what, "result discarded");
        self.emit(
            PipelineEventKind::ResultDiscarded,
            ticket,
            json!({ "stage": what }),
        );
        PipelineOutcome::Superseded
    }

    fn emit(&self, kind: PipelineEventKind, ticket: RequestTicket, detail: Value) {
        self.emit_generation(kind, ticket.generation(), detail);
    }

    fn emit_generation(&self, kind: PipelineEventKind, generation: u64, detail: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(kind, generation, detail) {
            warn!(event_type = %kind, error = %err, "failed writing pipeline event");
        }
    }
}
