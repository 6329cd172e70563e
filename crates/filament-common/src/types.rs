use serde::{Deserialize, Serialize};

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub rows: u16,
    pub cols: u16,
}

impl Size {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { rows, cols }
    }
}

/// Cursor position (0-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub row: u16,
    pub col: u16,
}

impl Position {
    pub fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }
}

/// Color of a cell or of the active graphic rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    /// Terminal default foreground or background.
    Default,
    /// One of the 256 indexed palette colors (0-15 are the classic ANSI set).
    Indexed(u8),
    /// 24-bit truecolor.
    Rgb(u8, u8, u8),
}

impl Color {
    /// Map an ANSI color number (0-15) to an indexed palette color.
    pub fn from_ansi(index: u8) -> Self {
        Color::Indexed(index)
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::Default
    }
}

bitflags::bitflags! {
    /// Style and layout flags carried by a cell.
    ///
    /// `WIDE` marks the left half of a double-width character; `WIDE_SHADOW`
    /// marks the column it occupies to its right. A shadow cell never carries
    /// printable content of its own.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CellFlags: u16 {
        const BOLD          = 1 << 0;
        const DIM           = 1 << 1;
        const ITALIC        = 1 << 2;
        const UNDERLINE     = 1 << 3;
        const BLINK         = 1 << 4;
        const REVERSE       = 1 << 5;
        const HIDDEN        = 1 << 6;
        const STRIKETHROUGH = 1 << 7;
        const WIDE          = 1 << 8;
        const WIDE_SHADOW   = 1 << 9;
    }
}

/// Graphic rendition applied to newly written cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CellAttributes {
    pub fg: Color,
    pub bg: Color,
    pub underline_color: Option<Color>,
    pub flags: CellFlags,
}

/// Character cell in the terminal grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    /// Zero-width combining marks attached to this cell.
    pub combining: Vec<char>,
    pub attrs: CellAttributes,
}

impl Cell {
    pub fn new(ch: char) -> Self {
        Self {
            ch,
            combining: Vec::new(),
            attrs: CellAttributes::default(),
        }
    }

    pub fn with_attrs(ch: char, attrs: CellAttributes) -> Self {
        Self {
            ch,
            combining: Vec::new(),
            attrs,
        }
    }

    /// A blank cell carrying the given rendition (used by erase and scroll).
    pub fn blank_with(attrs: CellAttributes) -> Self {
        let mut attrs = attrs;
        attrs.flags.remove(CellFlags::WIDE | CellFlags::WIDE_SHADOW);
        Self::with_attrs(' ', attrs)
    }

    pub fn blank() -> Self {
        Self::new(' ')
    }

    pub fn is_wide(&self) -> bool {
        self.attrs.flags.contains(CellFlags::WIDE)
    }

    pub fn is_wide_shadow(&self) -> bool {
        self.attrs.flags.contains(CellFlags::WIDE_SHADOW)
    }

    /// Column width of the cell: 2 for the left half of a wide pair,
    /// 0 for a shadow, 1 otherwise.
    pub fn width(&self) -> u8 {
        if self.is_wide() {
            2
        } else if self.is_wide_shadow() {
            0
        } else {
            1
        }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank()
    }
}

/// A single typed update decoded from an SGR parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SgrAttribute {
    Reset,
    Bold,
    Dim,
    Italic,
    Underline,
    Blink,
    Reverse,
    Hidden,
    Strikethrough,

    NoBoldDim,
    NoItalic,
    NoUnderline,
    NoBlink,
    NoReverse,
    NoHidden,
    NoStrikethrough,

    Foreground(Color),
    Background(Color),
    UnderlineColor(Color),
}

bitflags::bitflags! {
    /// Terminal mode flags, defaulting per VT100.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TerminalMode: u16 {
        const CURSOR_VISIBLE     = 1 << 0;
        const AUTO_WRAP          = 1 << 1;
        const ORIGIN             = 1 << 2;
        const INSERT             = 1 << 3;
        const BRACKETED_PASTE    = 1 << 4;
        const APPLICATION_KEYPAD = 1 << 5;
        const APPLICATION_CURSOR = 1 << 6;
        const ALTERNATE_SCREEN   = 1 << 7;
    }
}

impl Default for TerminalMode {
    fn default() -> Self {
        TerminalMode::CURSOR_VISIBLE | TerminalMode::AUTO_WRAP
    }
}

/// Terminal state snapshot for host consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSnapshot {
    pub size: Size,
    pub cursor: Position,
    pub cursor_visible: bool,
    pub mode: TerminalMode,
    pub alternate_screen_active: bool,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_with_strips_wide_flags() {
        let mut attrs = CellAttributes::default();
        attrs.flags = CellFlags::WIDE | CellFlags::BOLD;
        let cell = Cell::blank_with(attrs);
        assert!(!cell.is_wide());
        assert!(cell.attrs.flags.contains(CellFlags::BOLD));
        assert_eq!(cell.width(), 1);
    }

    #[test]
    fn default_mode_is_vt100() {
        let mode = TerminalMode::default();
        assert!(mode.contains(TerminalMode::CURSOR_VISIBLE));
        assert!(mode.contains(TerminalMode::AUTO_WRAP));
        assert!(!mode.contains(TerminalMode::ALTERNATE_SCREEN));
    }
}
