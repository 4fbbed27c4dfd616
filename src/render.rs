use std::panic::{self, AssertUnwindSafe};

use pulldown_cmark::{html, Event, Options, Parser};
use thiserror::Error;
use tracing::warn;

use crate::config::RendererConfig;
use crate::sanitize::{escape_text, sanitize, SafeHtml};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("answer is {len} bytes, over the {limit} byte markdown limit")]
    TooLarge { len: usize, limit: usize },
    #[error("markdown renderer panicked")]
    Markdown,
}

/// Markdown to sanitized HTML. Never fails; see [`Renderer::render`].
#[derive(Debug, Clone)]
pub struct Renderer {
    max_input_bytes: usize,
}

impl Default for Renderer {
    fn default() -> Self {
        Renderer::new(&RendererConfig::default())
    }
}

impl Renderer {
    pub fn new(config: &RendererConfig) -> Self {
        Renderer {
            max_input_bytes: config.max_input_bytes,
        }
    }

    /// Falls back to the raw text shown as escaped plain content when the
    /// markdown stage fails.
    pub fn render(&self, raw: &str) -> SafeHtml {
        match self.markdown_to_html(raw) {
            Ok(html) => sanitize(&html),
            Err(e) => {
                warn!("Rendering answer as plain text: {}", e);
                plain_text_html(raw)
            }
        }
    }

    pub fn markdown_to_html(&self, raw: &str) -> Result<String, RenderError> {
        if raw.len() > self.max_input_bytes {
            return Err(RenderError::TooLarge {
                len: raw.len(),
                limit: self.max_input_bytes,
            });
        }
        panic::catch_unwind(AssertUnwindSafe(|| push_markdown(raw))).map_err(|_| RenderError::Markdown)
    }
}

fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_FOOTNOTES);
    options
}

fn push_markdown(raw: &str) -> String {
    // single newlines inside a paragraph are kept as line breaks
    let parser = Parser::new_ext(raw, markdown_options()).map(|event| match event {
        Event::SoftBreak => Event::HardBreak,
        other => other,
    });

    let mut out = String::with_capacity(raw.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

fn plain_text_html(raw: &str) -> SafeHtml {
    let html = raw
        .lines()
        .map(escape_text)
        .collect::<Vec<_>>()
        .join("<br />\n");
    sanitize(&html)
}
