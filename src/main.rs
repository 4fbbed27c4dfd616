use anyhow::Context;
use iced::{
    alignment,
    event::{self, Event as IcedEvent},
    keyboard::{self, Key},
    time,
    widget::{button, column, container, row, scrollable, text, text_input, text_input::Id, Column},
    window, Element, Length, Size, Subscription, Task, Theme,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use chat_pane::config::Config;
use chat_pane::notify::{DesktopNotifier, Notifier, NullNotifier};
use chat_pane::projection;
use chat_pane::session::{PendingSubmission, SessionController, SessionState};
use chat_pane::storage::{KeyValueStore, MemoryStore, SqliteStore};
use chat_pane::transport::{AnswerPayload, HttpTransport, TransportError};

const APP_NAME: &str = "Chat Pane";
const PREVIEW_CHARS: usize = 40;
const TICK_MILLIS: u64 = 100;
const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CHAT_PANE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &Config) -> Arc<dyn KeyValueStore> {
    let path = config.storage.database_path();
    match SqliteStore::open(&path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(
                "Could not open {}: {}. History will not outlive this window.",
                path.display(),
                e
            );
            Arc::new(MemoryStore::new())
        }
    }
}

fn build_session(config: &Config) -> anyhow::Result<SessionController> {
    let transport = HttpTransport::new(&config.endpoint).context("invalid endpoint configuration")?;
    let notifier: Box<dyn Notifier> = if config.session.notifications {
        Box::new(DesktopNotifier::new(APP_NAME))
    } else {
        Box::new(NullNotifier)
    };

    Ok(SessionController::new(
        config,
        open_store(config),
        Arc::new(transport),
        notifier,
    ))
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::load();
    let session = build_session(&config)?;

    iced::application(APP_NAME, App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: Size::new(config.window.width as f32, config.window.height as f32),
            min_size: Some(Size::new(
                config.window.min_width as f32,
                config.window.min_height as f32,
            )),
            position: window::Position::Centered,
            ..Default::default()
        })
        .run_with(move || App::new(session))?;

    Ok(())
}

#[derive(Debug, Clone)]
enum Message {
    QuestionChanged(String),
    Submit,
    Answered(PendingSubmission, Result<AnswerPayload, TransportError>),
    SelectHistory(usize),
    ClearHistory,
    ToggleTheme,
    Tick,
    Exit,
}

struct App {
    session: SessionController,
    loading_frame: usize,
    input_id: Id,
}

impl App {
    fn new(session: SessionController) -> (Self, Task<Message>) {
        let input_id = Id::unique();
        let app = App {
            session,
            loading_frame: 0,
            input_id: input_id.clone(),
        };

        (app, text_input::focus(input_id))
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::QuestionChanged(value) => {
                self.session.set_question(value);
                Task::none()
            }
            Message::Submit => {
                let question = self.session.question().to_string();
                let Some(pending) = self.session.begin_submit(question) else {
                    return Task::none();
                };
                self.loading_frame = 0;

                let transport = self.session.transport();
                Task::future(async move {
                    let outcome = transport.ask(pending.question()).await;
                    Message::Answered(pending, outcome)
                })
            }
            Message::Answered(pending, outcome) => {
                self.session.complete_submit(pending, outcome);
                Task::none()
            }
            Message::SelectHistory(display_index) => {
                self.session.select_history(display_index);
                Task::none()
            }
            Message::ClearHistory => {
                self.session.clear_history();
                text_input::focus(self.input_id.clone())
            }
            Message::ToggleTheme => {
                self.session.toggle_theme();
                Task::none()
            }
            Message::Tick => {
                if self.session.loading() {
                    self.loading_frame = self.loading_frame.saturating_add(1);
                }
                Task::none()
            }
            Message::Exit => iced::exit(),
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.session.loading() {
            time::every(Duration::from_millis(TICK_MILLIS)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::Exit)
            } else {
                None
            }
        });

        Subscription::batch([timer, events])
    }

    fn view(&self) -> Element<Message> {
        let input = text_input("Ask a question...", self.session.question())
            .on_input(Message::QuestionChanged)
            .on_submit(Message::Submit)
            .padding(15)
            .size(18)
            .id(self.input_id.clone());

        let answer: Element<Message> = match self.session.state() {
            SessionState::Submitting => self.loading_view(),
            SessionState::Error(message) => container(text(message.clone()).size(15))
                .padding(15)
                .width(Length::Fill)
                .into(),
            SessionState::Idle => container(text("Ask anything to get started.").size(15))
                .padding(15)
                .width(Length::Fill)
                .into(),
            SessionState::Displaying(_) => scrollable(
                container(text(self.session.rendered_answer().to_plain_text()).size(15))
                    .padding(15)
                    .width(Length::Fill),
            )
            .height(Length::Fill)
            .into(),
        };

        let main = column![input, answer]
            .spacing(10)
            .width(Length::Fill)
            .height(Length::Fill);

        container(row![self.sidebar(), main].spacing(10).padding(10))
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn sidebar(&self) -> Element<Message> {
        let active = self.session.active_display_index();

        let entries = projection::display_order(self.session.history()).map(|(display_index, entry)| -> Element<Message> {
            let is_active = active == Some(display_index);
            button(text(preview(&entry.question)).size(13))
                .on_press(Message::SelectHistory(display_index))
                .width(Length::Fill)
                .style(if is_active { button::primary } else { button::text })
                .into()
        });

        let theme_label = if self.session.theme().is_dark() { "Light" } else { "Dark" };
        let controls = row![
            button(text("Clear").size(13))
                .on_press(Message::ClearHistory)
                .style(button::secondary),
            button(text(theme_label).size(13))
                .on_press(Message::ToggleTheme)
                .style(button::secondary),
        ]
        .spacing(6);

        column![
            controls,
            scrollable(Column::with_children(entries).spacing(2)).height(Length::Fill),
        ]
        .spacing(10)
        .width(Length::Fixed(220.0))
        .into()
    }

    fn loading_view(&self) -> Element<Message> {
        let spinner = SPINNER[self.loading_frame % SPINNER.len()];

        container(
            row![text(spinner).size(20), text(loading_status(self.loading_frame)).size(15)]
                .spacing(10)
                .align_y(alignment::Vertical::Center),
        )
        .padding(15)
        .width(Length::Fill)
        .into()
    }

    fn theme(&self) -> Theme {
        if self.session.theme().is_dark() {
            Theme::Dark
        } else {
            Theme::Light
        }
    }
}

fn loading_status(frame: usize) -> String {
    let elapsed = frame * TICK_MILLIS as usize / 1000;
    if elapsed == 0 {
        "Waiting for an answer".to_string()
    } else {
        format!("Waiting for an answer ({elapsed}s)")
    }
}

/// First line of a question, shortened for the history list.
fn preview(question: &str) -> String {
    let line = question.lines().next().unwrap_or_default().trim();
    if line.chars().count() > PREVIEW_CHARS {
        let cut: String = line.chars().take(PREVIEW_CHARS - 1).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_questions() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview("first line\nsecond line"), "first line");
        let long = "x".repeat(100);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), PREVIEW_CHARS);
        assert!(shown.ends_with('…'));
    }

    #[test]
    fn loading_status_counts_seconds() {
        assert_eq!(loading_status(0), "Waiting for an answer");
        assert_eq!(loading_status(9), "Waiting for an answer");
        assert_eq!(loading_status(25), "Waiting for an answer (2s)");
    }
}
