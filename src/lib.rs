//! Session core for a single-window question/answer client: markdown
//! rendering with sanitization, persisted chat history, and the state
//! machine that ties submissions, selection and clearing together.

pub mod config;
pub mod history;
pub mod notify;
pub mod projection;
pub mod render;
pub mod sanitize;
pub mod session;
pub mod storage;
pub mod theme;
pub mod transport;

pub use history::{ChatEntry, History, HistoryStore};
pub use sanitize::{sanitize, SafeHtml};
pub use session::{PendingSubmission, SessionController, SessionState};
