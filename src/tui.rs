use crate::{
    logger::LogTab,
    popup::{ConfirmationPopup, PopupStatus, StartRequest, StartSessionPopup},
    theme::THEME,
};
use btloadgen::session::{Registry, SessionInfo, StopOutcome};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind};
use futures::{FutureExt, StreamExt};
use log::{error, info, warn};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    prelude::*,
    style::Stylize,
    symbols::border,
    text::Line,
    widgets::{Block, Borders, Widget},
    Frame,
};
use std::{io::Stdout, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};

type Tui = Terminal<CrosstermBackend<Stdout>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppTab {
    Sessions,
    Log,
}

pub struct App {
    exit: bool,
    event_handler: EventHandler,
    log_tab: LogTab,
    quit_window: ConfirmationPopup,
    start_window: StartSessionPopup,
    rx: std::sync::mpsc::Receiver<(log::Level, String)>,
    selected_tab: AppTab,
    registry: Arc<Registry>,
    sessions: Vec<SessionInfo>,
    selected: usize,
    next_name: usize,
}

impl App {
    pub fn new(
        rx: std::sync::mpsc::Receiver<(log::Level, String)>,
        registry: Arc<Registry>,
        default_peer_addr: String,
    ) -> Self {
        Self {
            exit: false,
            event_handler: EventHandler::new(16),
            log_tab: LogTab::new(),
            quit_window: ConfirmationPopup::new(
                "".to_owned(),
                "Stop all sessions and quit?".to_owned(),
            ),
            start_window: StartSessionPopup::new(" Start Session ".to_owned(), default_peer_addr),
            rx,
            selected_tab: AppTab::Sessions,
            registry,
            sessions: Vec::new(),
            selected: 0,
            next_name: 1,
        }
    }

    /// runs the application's main loop until the user quits
    pub async fn run(&mut self, terminal: &mut Tui) -> Result<()> {
        while !self.exit {
            self.refresh_sessions();
            terminal.draw(|frame| self.render_frame(frame))?;
            let event = self.event_handler.next().await?;
            self.handle_events(event);

            // handle logging
            while let Ok(s) = self.rx.try_recv() {
                self.log_tab.push(s);
            }

            // popup handler
            match self.quit_window.status {
                PopupStatus::Closed | PopupStatus::InUse => {}
                PopupStatus::Canceled => {
                    self.quit_window.close();
                }
                PopupStatus::Confirmed => {
                    self.quit_window.close();
                    self.exit = self.quit_window.decision();
                }
            }
            match self.start_window.status {
                PopupStatus::Closed | PopupStatus::InUse => {}
                PopupStatus::Canceled => {
                    self.start_window.close();
                }
                PopupStatus::Confirmed => {
                    self.start_window.close();
                    let request = self.start_window.take();
                    self.start_session(request);
                }
            }
        }

        let stopped = self.registry.stop_all();
        if stopped > 0 {
            info!("Stopped {stopped} sessions on exit");
        }
        Ok(())
    }

    fn refresh_sessions(&mut self) {
        self.sessions = self.registry.list();
        self.selected = self.selected.min(self.sessions.len().saturating_sub(1));
    }

    fn try_quit(&mut self) {
        self.quit_window.show();
    }

    fn render_frame(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    /// updates the application's state based on user input
    fn handle_events(&mut self, event: Event) {
        match event {
            // it's important to check that the event is a key press event as
            // crossterm also emits key release and repeat events on Windows.
            Event::Key(key_event) if key_event.kind == KeyEventKind::Press => {
                self.handle_key_event(key_event)
            }
            _ => {}
        }
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        if self.quit_window.status == PopupStatus::InUse {
            self.quit_window.handle_input(key_event.code);
        } else if self.start_window.status == PopupStatus::InUse {
            self.start_window.handle_input(key_event.code);
        } else {
            match key_event.code {
                KeyCode::Char('q') => self.try_quit(),
                KeyCode::Char('1') => self.selected_tab = AppTab::Sessions,
                KeyCode::Char('2') | KeyCode::Char('l') => self.selected_tab = AppTab::Log,
                KeyCode::Char('n') => self.start_window.show(String::new(), None),
                KeyCode::Char('s') | KeyCode::Enter => self.toggle_selected(),
                KeyCode::Char('x') => self.stop_selected(),
                KeyCode::Char('j') | KeyCode::Down => match self.selected_tab {
                    AppTab::Sessions => {
                        if self.selected + 1 < self.sessions.len() {
                            self.selected += 1;
                        }
                    }
                    AppTab::Log => self.log_tab.scroll_down(),
                },
                KeyCode::Char('k') | KeyCode::Up => match self.selected_tab {
                    AppTab::Sessions => self.selected = self.selected.saturating_sub(1),
                    AppTab::Log => self.log_tab.scroll_up(),
                },
                _ => {}
            }
        }
    }

    fn start_session(&mut self, request: StartRequest) {
        let name = if request.name.is_empty() {
            let name = format!("session-{}", self.next_name);
            self.next_name += 1;
            name
        } else {
            request.name
        };

        match self
            .registry
            .start(&name, &request.peer_addr, &request.info_hash)
        {
            Ok(()) => {
                self.refresh_sessions();
                if let Some(i) = self.sessions.iter().position(|s| s.id == name) {
                    self.selected = i;
                }
            }
            Err(e) => error!("Could not start {name}: {e}"),
        }
    }

    fn toggle_selected(&mut self) {
        let Some(session) = self.sessions.get(self.selected) else {
            self.start_window.show(String::new(), None);
            return;
        };
        if session.status.running {
            self.stop_selected();
        } else {
            let last = (!session.status.info_hash.is_empty()).then(|| {
                (
                    session.status.peer_addr.clone(),
                    session.status.info_hash.clone(),
                )
            });
            self.start_window.show(session.id.clone(), last);
        }
    }

    fn stop_selected(&mut self) {
        let Some(session) = self.sessions.get(self.selected) else {
            return;
        };
        if self.registry.stop(&session.id) == StopOutcome::NotRunning {
            warn!("{} is not running", session.id);
        }
    }

    // RENDERING CODE

    fn render_sessions(&self, area: Rect, buf: &mut Buffer) {
        let vertical = Layout::vertical([Constraint::Length(1), Constraint::Min(1)]);
        let [title_bar, mut canvas] = vertical.areas(area);
        let horizontal = Layout::horizontal([
            Constraint::Length(2),  // marker
            Constraint::Min(16),    // name
            Constraint::Length(24), // peer
            Constraint::Length(12), // info hash
            Constraint::Length(10), // status
            Constraint::Length(14), // speed
        ]);

        let columns = ["", "Name", "Peer", "Info Hash", "Status", "Speed"];
        let title_bar_areas: [_; 6] = horizontal.areas(title_bar);
        Block::new().style(THEME.header).render(title_bar, buf);
        for (i, &t) in columns.iter().enumerate() {
            Span::raw(t).render(title_bar_areas[i], buf);
        }

        if self.sessions.is_empty() {
            Span::raw(" Press [n] to start a session").render(canvas, buf);
            return;
        }

        for (i, session) in self.sessions.iter().enumerate() {
            if canvas.height == 0 {
                break;
            }
            let [marker, name, peer, hash, status, speed] = horizontal.areas(canvas);
            if i == self.selected {
                buf.set_style(Rect { height: 1, ..canvas }, THEME.highlight);
                Span::raw(">").render(marker, buf);
            }

            Span::raw(session.id.as_str()).render(name, buf);
            Span::raw(session.status.peer_addr.as_str()).render(peer, buf);
            let short_hash = session.status.info_hash.get(..8).unwrap_or("");
            Span::raw(short_hash).render(hash, buf);
            if session.status.running {
                Span::styled(" Running ", THEME.running).render(status, buf);
                Span::raw(format!("{}/s", convert_to_human(session.speed * 1024))).render(speed, buf);
            } else {
                Span::styled(" Stopped ", THEME.stopped).render(status, buf);
            }

            canvas.y += 1;
            canvas.height -= 1;
        }
    }

    fn get_tabstyle(&self, tab: AppTab) -> Style {
        if self.selected_tab == tab {
            THEME.selected
        } else {
            THEME.root
        }
    }
}

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let horizontal = Layout::horizontal([Constraint::Min(0), Constraint::Length(2)]);
        let [tab_list_area, _] = horizontal.areas(area);

        let block = Block::default()
            .title(Line::from(" btloadgen ".bold()).centered())
            .title_bottom(" [n]ew  [s]tart/stop  [x] stop  [q]uit ")
            .borders(Borders::ALL)
            .border_set(border::ROUNDED);

        let inner_area = block.inner(area);
        block.render(area, buf);

        Line::from_iter([
            Span::styled(" ", self.get_tabstyle(AppTab::Sessions)),
            Span::styled("1", self.get_tabstyle(AppTab::Sessions).underlined()),
            Span::styled(" Sessions ", self.get_tabstyle(AppTab::Sessions)),
            Span::styled(" ", self.get_tabstyle(AppTab::Log)),
            Span::styled("L", self.get_tabstyle(AppTab::Log).underlined()),
            Span::styled("og ", self.get_tabstyle(AppTab::Log)),
        ])
        .right_aligned()
        .render(tab_list_area, buf);

        match self.selected_tab {
            AppTab::Sessions => self.render_sessions(inner_area, buf),
            AppTab::Log => self.log_tab.render(inner_area, buf),
        }

        if self.quit_window.status == PopupStatus::InUse {
            self.quit_window.render(area, buf);
        } else if self.start_window.status == PopupStatus::InUse {
            self.start_window.render(area, buf);
        }
    }
}

const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

fn convert_to_human(bytes: u64) -> String {
    for i in 1..=6 {
        if bytes >> (i * 10) == 0 {
            return format!("{} {}", bytes >> ((i - 1) * 10), UNITS[i - 1]);
        }
    }
    format!("{} {}", bytes >> (6 * 10), UNITS[6])
}

#[derive(Clone, Copy, Debug)]
pub enum Event {
    Error,
    Tick,
    Key(KeyEvent),
}

#[derive(Debug)]
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<Event>,
    task: JoinHandle<()>,
}

impl EventHandler {
    pub fn new(tick_rate: u64) -> Self {
        let tick_rate = std::time::Duration::from_millis(tick_rate);

        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut reader = crossterm::event::EventStream::new();
            let mut interval = tokio::time::interval(tick_rate);
            loop {
                let delay = interval.tick();
                let crossterm_event = reader.next().fuse();
                let event = tokio::select! {
                  maybe_event = crossterm_event => match maybe_event {
                      Some(Ok(crossterm::event::Event::Key(key)))
                          if key.kind == crossterm::event::KeyEventKind::Press =>
                      {
                          Event::Key(key)
                      }
                      Some(Ok(_)) => continue,
                      Some(Err(_)) => Event::Error,
                      None => break,
                  },
                  _ = delay => Event::Tick,
                };
                // the app dropped its receiver, nobody is listening anymore
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        Self { rx, task }
    }

    pub async fn next(&mut self) -> Result<Event> {
        self.rx
            .recv()
            .await
            .ok_or(color_eyre::eyre::eyre!("Unable to get event"))
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
