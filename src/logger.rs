use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use ratatui::{
    layout::Rect,
    prelude::*,
    text::Line,
    widgets::{Scrollbar, ScrollbarOrientation, ScrollbarState},
};
use std::{io::Write, sync::mpsc::Sender};

enum Sink {
    Tui(Sender<(Level, String)>),
    Stderr,
}

pub struct Logger {
    sink: Sink,
    level: LevelFilter,
}

impl Logger {
    /// Records go to the TUI's log tab.
    pub fn new(sender: Sender<(Level, String)>, level: LevelFilter) -> Self {
        Self {
            sink: Sink::Tui(sender),
            level,
        }
    }

    /// Records go straight to stderr, for headless runs.
    pub fn stderr(level: LevelFilter) -> Self {
        Self {
            sink: Sink::Stderr,
            level,
        }
    }

    pub fn init(self) -> Result<(), SetLoggerError> {
        log::set_max_level(self.level);
        log::set_boxed_logger(Box::new(self))
    }
}

fn format_record(record: &Record<'_>) -> String {
    format!(
        ": {}:{}: {}\n",
        record
            .file()
            .map(|f| f.split('/').next_back().unwrap_or(""))
            .unwrap_or(""),
        record.line().unwrap_or(0),
        record.args()
    )
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) || !record.target().starts_with("btloadgen") {
            return;
        }

        match &self.sink {
            // the tab is gone once the app is shutting down, nothing to do then
            Sink::Tui(tx) => {
                let _ = tx.send((record.level(), format_record(record)));
            }
            Sink::Stderr => {
                let _ = write!(
                    std::io::stderr().lock(),
                    "{:<5}{}",
                    record.level(),
                    format_record(record)
                );
            }
        }
    }

    fn flush(&self) {
        if let Sink::Stderr = self.sink {
            let _ = std::io::stderr().flush();
        }
    }
}

pub struct LogTab {
    text: Vec<(Level, String)>,
    offset: usize,
    spans: [Span<'static>; 5],
}

impl LogTab {
    pub fn new() -> Self {
        Self {
            text: Vec::new(),
            offset: 0,
            spans: [
                Span::styled("ERROR", Color::LightRed),
                Span::styled("WARN", Color::Yellow),
                Span::styled("INFO", Color::Green),
                Span::styled("DEBUG", Color::White),
                Span::styled("TRACE", Color::White),
            ],
        }
    }

    pub fn push(&mut self, msg: (Level, String)) {
        self.text.push(msg);
    }

    pub fn scroll_up(&mut self) {
        self.offset = std::cmp::min(self.offset + 1, self.text.len());
    }

    pub fn scroll_down(&mut self) {
        self.offset = self.offset.saturating_sub(1);
    }
}

impl Widget for &LogTab {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let mut next_line = Rect { height: 1, ..area };
        let off = std::cmp::min(
            self.offset,
            self.text.len().saturating_sub(area.height as usize),
        );
        let scroll_length = self.text.len().saturating_sub(area.height as usize);

        // does not consider multi-line log messages
        let visible_lines = if self.text.len() > area.height as usize {
            &self.text[self.text.len() - area.height as usize - off..self.text.len() - off]
        } else {
            &self.text
        };

        for l in visible_lines {
            // clones are fine here because Cow has lazy data clones
            let mut line = Line::from(self.spans[l.0 as usize - 1].clone());
            line.push_span(l.1.clone());
            line.render(next_line, buf);
            next_line.y += 1;
        }

        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("↑"))
            .end_symbol(Some("↓"));
        let mut scrollbar_state = ScrollbarState::new(scroll_length).position(off);
        scrollbar.render(
            area.inner(Margin {
                vertical: 1,
                horizontal: 0,
            }),
            buf,
            &mut scrollbar_state,
        );
    }
}
