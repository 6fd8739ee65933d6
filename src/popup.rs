use crate::theme::THEME;
use crossterm::event::KeyCode;
use ratatui::{
    layout::Flex,
    prelude::*,
    widgets::{Block, BorderType, Clear, Paragraph},
};

pub struct TextEntry {
    text: String,
    cursor_pos: usize,
    max_len: usize,
}

impl TextEntry {
    pub fn new() -> Self {
        TextEntry {
            text: String::new(),
            cursor_pos: 0,
            max_len: usize::MAX,
        }
    }

    pub fn with_text(text: String) -> Self {
        let cursor_pos = text.chars().count();
        TextEntry {
            text,
            cursor_pos,
            max_len: usize::MAX,
        }
    }

    pub fn with_max(mut self, len: usize) -> Self {
        self.max_len = len;
        self
    }

    pub fn set_text(&mut self, new_text: String) {
        self.text = new_text;
        self.cursor_pos = self.text.chars().count();
    }

    pub fn get_str(&self) -> &str {
        self.text.as_str()
    }

    pub fn get_cursor_pos(&self) -> usize {
        self.cursor_pos
    }

    fn byte_index(&self) -> usize {
        self.text
            .char_indices()
            .map(|(i, _)| i)
            .nth(self.cursor_pos)
            .unwrap_or(self.text.len())
    }

    pub fn move_cursor_left(&mut self) {
        self.cursor_pos = self.cursor_pos.saturating_sub(1);
    }

    pub fn move_cursor_right(&mut self) {
        if self.cursor_pos < self.text.chars().count() {
            self.cursor_pos += 1;
        }
    }

    pub fn insert(&mut self, c: char) {
        if self.text.chars().count() < self.max_len {
            self.text.insert(self.byte_index(), c);
            self.move_cursor_right();
        }
    }

    pub fn remove(&mut self) {
        // stops backspace from acting like del when at the beginning of the string
        if self.cursor_pos == 0 {
            return;
        }

        self.move_cursor_left();
        self.text.remove(self.byte_index());
    }

    /// Shared key handling for every text field.
    pub fn handle_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char(c) => self.insert(c),
            KeyCode::Backspace => self.remove(),
            KeyCode::Left => self.move_cursor_left(),
            KeyCode::Right => self.move_cursor_right(),
            KeyCode::Home => self.cursor_pos = 0,
            KeyCode::End => self.cursor_pos = self.text.chars().count(),
            _ => {}
        }
    }
}

#[derive(Default, Debug, PartialEq)]
pub enum PopupStatus {
    InUse,
    Canceled,
    Confirmed,
    #[default]
    Closed,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationField {
    #[default]
    Yes,
    No,
}

impl ConfirmationField {
    pub fn cycle_next(&mut self) {
        *self = match self {
            ConfirmationField::No => ConfirmationField::Yes,
            ConfirmationField::Yes => ConfirmationField::No,
        }
    }
}

pub struct ConfirmationPopup {
    pub title: String,
    pub body: String,
    pub status: PopupStatus,

    selected_field: ConfirmationField,
}

impl ConfirmationPopup {
    pub fn handle_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Left | KeyCode::Right => {
                self.selected_field.cycle_next();
            }
            KeyCode::Char('y') | KeyCode::Char('q') => {
                self.selected_field = ConfirmationField::Yes;
                self.status = PopupStatus::Confirmed;
            }
            KeyCode::Char('n') | KeyCode::Esc => {
                self.selected_field = ConfirmationField::No;
                self.status = PopupStatus::Confirmed;
            }
            KeyCode::Enter => {
                self.status = PopupStatus::Confirmed;
            }
            _ => {}
        }
    }

    pub fn new(title: String, body: String) -> ConfirmationPopup {
        ConfirmationPopup {
            selected_field: ConfirmationField::default(),
            title,
            body,
            status: PopupStatus::Closed,
        }
    }

    pub fn show(&mut self) {
        self.selected_field = ConfirmationField::default();
        self.status = PopupStatus::InUse;
    }

    pub fn close(&mut self) {
        self.status = PopupStatus::Closed;
    }

    pub fn decision(&self) -> bool {
        self.selected_field == ConfirmationField::Yes
    }

    fn button_style(&self, field: ConfirmationField) -> Style {
        if self.selected_field == field {
            THEME.popup_selected
        } else {
            THEME.popup
        }
    }
}

impl Widget for &ConfirmationPopup {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let vertical = Layout::vertical([5]).flex(Flex::Center);
        let horizontal = Layout::horizontal([45]).flex(Flex::Center);
        let [area] = vertical.areas(area);
        let [area] = horizontal.areas(area);

        let window = Block::bordered()
            .style(THEME.popup)
            .border_style(THEME.popup)
            .border_type(BorderType::Rounded)
            .title(Span::from(&self.title));

        let win_area = window.inner(area);
        Clear.render(win_area, buf);
        window.render(area, buf);

        let [body_area, _gap, button_area] = Layout::vertical([
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .areas(win_area);

        Paragraph::new(self.body.as_str())
            .style(THEME.popup)
            .alignment(Alignment::Center)
            .render(body_area, buf);

        Line::from(vec![
            Span::from(" No ").style(self.button_style(ConfirmationField::No)),
            Span::from("               "),
            Span::from(" Yes ").style(self.button_style(ConfirmationField::Yes)),
        ])
        .centered()
        .render(button_area, buf);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum StartField {
    #[default]
    Name,
    PeerAddr,
    InfoHash,
}

impl StartField {
    fn next(self) -> Self {
        match self {
            Self::Name => Self::PeerAddr,
            Self::PeerAddr => Self::InfoHash,
            Self::InfoHash => Self::Name,
        }
    }

    fn prev(self) -> Self {
        match self {
            Self::Name => Self::InfoHash,
            Self::PeerAddr => Self::Name,
            Self::InfoHash => Self::PeerAddr,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Name => " Name: ",
            Self::PeerAddr => " Peer: ",
            Self::InfoHash => " Hash: ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub name: String,
    pub peer_addr: String,
    pub info_hash: String,
}

/// Dialog asking for a session name, the peer to connect to and the info hash.
pub struct StartSessionPopup {
    pub status: PopupStatus,
    title: String,
    default_peer_addr: String,
    name: TextEntry,
    peer_addr: TextEntry,
    info_hash: TextEntry,
    selected: StartField,
}

impl StartSessionPopup {
    pub fn new(title: String, default_peer_addr: String) -> Self {
        StartSessionPopup {
            status: PopupStatus::default(),
            title,
            peer_addr: TextEntry::with_text(default_peer_addr.clone()).with_max(255),
            default_peer_addr,
            name: TextEntry::new().with_max(40),
            info_hash: TextEntry::new().with_max(40),
            selected: StartField::default(),
        }
    }

    fn field_mut(&mut self, field: StartField) -> &mut TextEntry {
        match field {
            StartField::Name => &mut self.name,
            StartField::PeerAddr => &mut self.peer_addr,
            StartField::InfoHash => &mut self.info_hash,
        }
    }

    fn field(&self, field: StartField) -> &TextEntry {
        match field {
            StartField::Name => &self.name,
            StartField::PeerAddr => &self.peer_addr,
            StartField::InfoHash => &self.info_hash,
        }
    }

    pub fn handle_input(&mut self, key: KeyCode) {
        match key {
            KeyCode::Enter => self.status = PopupStatus::Confirmed,
            KeyCode::Esc => self.status = PopupStatus::Canceled,
            KeyCode::Tab | KeyCode::Down => self.selected = self.selected.next(),
            KeyCode::BackTab | KeyCode::Up => self.selected = self.selected.prev(),
            other => self.field_mut(self.selected).handle_input(other),
        }
    }

    /// Opens the dialog. `name` pre-fills the session name and `last` the
    /// previous peer and hash when restarting a known session.
    pub fn show(&mut self, name: String, last: Option<(String, String)>) {
        self.name.set_text(name);
        match last {
            Some((peer_addr, info_hash)) => {
                self.peer_addr.set_text(peer_addr);
                self.info_hash.set_text(info_hash);
            }
            None => {
                self.peer_addr.set_text(self.default_peer_addr.clone());
                self.info_hash.set_text(String::new());
            }
        }
        self.selected = if self.name.get_str().is_empty() {
            StartField::Name
        } else {
            StartField::InfoHash
        };
        self.status = PopupStatus::InUse;
    }

    pub fn close(&mut self) {
        self.status = PopupStatus::Closed;
    }

    pub fn take(&mut self) -> StartRequest {
        StartRequest {
            name: self.name.get_str().trim().to_owned(),
            peer_addr: self.peer_addr.get_str().trim().to_owned(),
            info_hash: self.info_hash.get_str().trim().to_owned(),
        }
    }
}

impl Widget for &StartSessionPopup {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let vertical = Layout::vertical([3 + 2]).flex(Flex::Center);
        let horizontal = Layout::horizontal([60]).flex(Flex::Center);
        let [area] = vertical.areas(area);
        let [area] = horizontal.areas(area);

        let window = Block::bordered()
            .style(THEME.popup)
            .border_style(THEME.popup)
            .border_type(BorderType::Rounded)
            .title_top(self.title.as_str())
            .title_bottom(Line::raw(" [Esc] to Cancel [Enter] to Start ").right_aligned());

        let win_area = window.inner(area);
        Clear.render(win_area, buf);
        window.render(area, buf);

        let rows: [Rect; 3] = Layout::vertical([Constraint::Length(1); 3]).areas(win_area);
        for (field, row) in [StartField::Name, StartField::PeerAddr, StartField::InfoHash]
            .into_iter()
            .zip(rows)
        {
            let entry = self.field(field);
            let label = field.label();
            Span::raw(format!("{label}{} ", entry.get_str())).render(row, buf);
            if self.selected == field {
                buf.set_style(row, THEME.popup_selected);
                let x = row.x + (label.len() + entry.get_cursor_pos()) as u16;
                if x < row.right() {
                    buf[(x, row.y)].set_style(THEME.popup_cursor);
                }
            } else {
                buf.set_style(row, THEME.popup);
            }
        }
    }
}
