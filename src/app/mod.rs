pub mod theme;
pub mod tui;
pub mod tui_export;
