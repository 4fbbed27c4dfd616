//! The session state machine.
//!
//! A submission is split in two so a host event loop can keep handling input
//! while the request is outstanding: [`SessionController::begin_submit`]
//! hands out a [`PendingSubmission`], the host drives the transport, and
//! [`SessionController::complete_submit`] folds the outcome back in.
//! Selecting or clearing history in between is allowed; the completion
//! still appends and then takes over the view.

use std::sync::Arc;

use once_cell::unsync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::history::{ChatEntry, HistoryStore};
use crate::notify::Notifier;
use crate::projection;
use crate::render::Renderer;
use crate::sanitize::{sanitize, SafeHtml};
use crate::storage::KeyValueStore;
use crate::theme::{ThemePreference, ThemeStore};
use crate::transport::{AnswerPayload, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Submitting,
    Displaying(String),
    Error(String),
}

/// Ticket for the one request allowed in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmission {
    id: u64,
    question: String,
}

impl PendingSubmission {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn question(&self) -> &str {
        &self.question
    }
}

/// The visible answer and its sanitized rendering, computed on first use.
#[derive(Default)]
struct AnswerView {
    source: String,
    rendered: OnceCell<SafeHtml>,
}

impl AnswerView {
    fn new(source: String) -> Self {
        AnswerView {
            source,
            rendered: OnceCell::new(),
        }
    }

    fn rendered(&self) -> &SafeHtml {
        self.rendered.get_or_init(|| sanitize(&self.source))
    }
}

pub struct SessionController {
    history: HistoryStore,
    theme_store: ThemeStore,
    theme: ThemePreference,
    renderer: Renderer,
    transport: Arc<dyn Transport>,
    notifier: Box<dyn Notifier>,
    state: SessionState,
    question: String,
    answer: AnswerView,
    error: Option<String>,
    active_index: Option<usize>,
    in_flight: Option<u64>,
    next_request_id: u64,
    /// Set when the user types while a request is out.
    draft_edited: bool,
}

impl SessionController {
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let history = HistoryStore::load(store.clone(), config.storage.history_key.clone());
        let theme_store = ThemeStore::new(
            store,
            config.storage.theme_key.clone(),
            config.session.default_theme,
        );
        let theme = theme_store.load();

        let mut session = SessionController {
            history,
            theme_store,
            theme,
            renderer: Renderer::new(&config.renderer),
            transport,
            notifier,
            state: SessionState::Idle,
            question: String::new(),
            answer: AnswerView::default(),
            error: None,
            active_index: None,
            in_flight: None,
            next_request_id: 0,
            draft_edited: false,
        };

        if config.session.restore_last_on_startup && !session.history.is_empty() {
            session.select_history(0);
        }
        info!(
            entries = session.history.len(),
            theme = ?session.theme,
            "Session ready"
        );
        session
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn answer(&self) -> &str {
        &self.answer.source
    }

    pub fn rendered_answer(&self) -> &SafeHtml {
        self.answer.rendered()
    }

    pub fn loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    /// Position of the active entry in the newest-first history list.
    pub fn active_display_index(&self) -> Option<usize> {
        projection::display_index(self.history.len(), self.active_index?)
    }

    pub fn history(&self) -> &[ChatEntry] {
        self.history.entries()
    }

    pub fn theme(&self) -> ThemePreference {
        self.theme
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn set_question(&mut self, question: impl Into<String>) {
        self.question = question.into();
        if self.in_flight.is_some() {
            self.draft_edited = true;
        }
    }

    /// Returns `None` for blank questions and while another request is out.
    pub fn begin_submit(&mut self, question: impl Into<String>) -> Option<PendingSubmission> {
        let question = question.into();
        if question.trim().is_empty() {
            return None;
        }
        if let Some(id) = self.in_flight {
            debug!(in_flight = id, "Ignoring submit while a request is pending");
            return None;
        }

        self.next_request_id += 1;
        let id = self.next_request_id;
        self.in_flight = Some(id);
        self.draft_edited = false;
        self.question = question.clone();
        self.error = None;
        self.state = SessionState::Submitting;
        info!(request = id, "Submitting question");

        Some(PendingSubmission { id, question })
    }

    pub fn complete_submit(
        &mut self,
        pending: PendingSubmission,
        outcome: Result<AnswerPayload, TransportError>,
    ) {
        if self.in_flight != Some(pending.id) {
            warn!(
                request = pending.id,
                in_flight = ?self.in_flight,
                "Dropping response for a request that is not in flight"
            );
            return;
        }
        self.in_flight = None;

        let payload = match outcome {
            Ok(payload) => payload,
            Err(e) => {
                warn!(request = pending.id, "Question failed: {}", e);
                let draft = self.settled_draft(pending.question);
                self.fail(draft, e.user_message());
                return;
            }
        };

        let html = self.renderer.render(payload.text()).into_string();
        let entry = ChatEntry::new(pending.question.clone(), html.clone());
        let appended = self.history.append(entry).map(|entries| entries.len() - 1);
        match appended {
            Ok(index) => {
                self.active_index = Some(index);
                if !self.keeps_typed_draft() {
                    self.question.clear();
                }
                self.answer = AnswerView::new(html.clone());
                self.state = SessionState::Displaying(html);
                debug!(request = pending.id, active = ?self.active_index, "Answer displayed");
            }
            Err(e) => {
                warn!(request = pending.id, "Could not save chat history: {}", e);
                let draft = self.settled_draft(pending.question);
                self.fail(draft, format!("Could not save chat history: {e}"));
            }
        }
    }

    /// Runs a whole submission, awaiting the transport in place.
    pub async fn submit(&mut self, question: impl Into<String>) {
        let Some(pending) = self.begin_submit(question) else {
            return;
        };
        let transport = self.transport.clone();
        let outcome = transport.ask(pending.question()).await;
        self.complete_submit(pending, outcome);
    }

    /// `display_index` 0 is the most recent entry.
    pub fn select_history(&mut self, display_index: usize) {
        match projection::project(self.history.entries(), display_index) {
            Ok(projection) => {
                self.question = projection.entry.question.clone();
                self.answer = AnswerView::new(projection.entry.answer.clone());
                self.active_index = Some(projection.storage_index);
                self.error = None;
                self.state = SessionState::Displaying(projection.entry.answer.clone());
            }
            Err(e) => {
                debug!("Selection fell back to idle: {}", e);
                self.answer = AnswerView::default();
                self.active_index = None;
                self.state = SessionState::Idle;
            }
        }
    }

    pub fn clear_history(&mut self) {
        if let Err(e) = self.history.clear() {
            warn!("Could not clear chat history: {}", e);
            self.fail(self.question.clone(), format!("Could not clear chat history: {e}"));
            return;
        }

        self.question.clear();
        self.answer = AnswerView::default();
        self.active_index = None;
        self.error = None;
        self.state = SessionState::Idle;
        info!("Chat history cleared");
    }

    pub fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
        if let Err(e) = self.theme_store.save(self.theme) {
            warn!("Could not save theme preference: {}", e);
        }
    }

    fn keeps_typed_draft(&self) -> bool {
        self.draft_edited && !self.question.trim().is_empty()
    }

    /// Text for the input after a failed submission: whatever the user typed
    /// meanwhile, otherwise the question that was sent.
    fn settled_draft(&self, submitted: String) -> String {
        if self.keeps_typed_draft() {
            self.question.clone()
        } else {
            submitted
        }
    }

    fn fail(&mut self, draft: String, message: String) {
        self.question = draft;
        self.error = Some(message.clone());
        self.notifier.notify(&message);
        self.state = SessionState::Error(message);
    }
}
