use ratatui::style::{Color, Style};

pub struct Theme {
    pub root: Style,
    pub selected: Style,
    pub header: Style,
    pub highlight: Style,
    pub popup: Style,
    pub popup_cursor: Style,
    pub popup_selected: Style,
    pub running: Style,
    pub stopped: Style,
}

pub const THEME: Theme = Theme {
    root: Style::new(),
    selected: Style::new().fg(Color::Black).bg(Color::LightBlue),
    header: Style::new().bg(Color::Black),
    highlight: Style::new().bg(Color::DarkGray),
    popup: Style::new().fg(Color::White),
    popup_cursor: Style::new().fg(Color::LightBlue).bg(Color::Black),
    popup_selected: Style::new().fg(Color::Black).bg(Color::LightBlue),
    running: Style::new().fg(Color::Black).bg(Color::LightGreen),
    stopped: Style::new().fg(Color::Black).bg(Color::Gray),
};
