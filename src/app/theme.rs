// app/theme.rs
// Styling for the terminal wizard, passed in explicitly.

use ratatui::style::{Color, Modifier, Style};

#[derive(Debug, Clone, Copy)]
pub struct Theme {
    pub focused: Style,
    pub blurred: Style,
    pub error: Style,
    pub success: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            focused: Style::default()
                .fg(Color::Indexed(205))
                .add_modifier(Modifier::BOLD),
            blurred: Style::default().fg(Color::Indexed(240)),
            error: Style::default().fg(Color::Red),
            success: Style::default().fg(Color::Green),
        }
    }
}

impl Theme {
    /// No colors at all, for terminals that cannot render them.
    pub fn plain() -> Self {
        Self {
            focused: Style::default().add_modifier(Modifier::BOLD),
            blurred: Style::default(),
            error: Style::default(),
            success: Style::default(),
        }
    }
}
