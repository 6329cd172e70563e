use filament_common::types::{CellAttributes, Position};

/// Cursor state and operations
#[derive(Debug, Clone)]
pub struct Cursor {
    position: Position,
    visible: bool,
    blinking: bool,
    /// Set after writing into the last column; the next printable wraps.
    pending_wrap: bool,
}

/// Snapshot taken by DECSC and the alternate-screen switch.
#[derive(Debug, Clone)]
pub struct SavedCursor {
    pub position: Position,
    pub attrs: CellAttributes,
    pub pending_wrap: bool,
}

impl Cursor {
    /// Create a new cursor at the origin
    pub fn new() -> Self {
        Self {
            position: Position::new(0, 0),
            visible: true,
            blinking: true,
            pending_wrap: false,
        }
    }

    /// Get the current cursor position
    pub fn position(&self) -> Position {
        self.position
    }

    /// Set the cursor position, clearing any pending wrap.
    pub fn set_position(&mut self, pos: Position) {
        self.position = pos;
        self.pending_wrap = false;
    }

    pub fn set_row(&mut self, row: u16) {
        self.position.row = row;
        self.pending_wrap = false;
    }

    pub fn set_col(&mut self, col: u16) {
        self.position.col = col;
        self.pending_wrap = false;
    }

    /// Move cursor up by n rows, saturating at the top.
    pub fn move_up(&mut self, n: u16) {
        self.position.row = self.position.row.saturating_sub(n);
        self.pending_wrap = false;
    }

    /// Move cursor down by n rows, clamped to `max_row`.
    pub fn move_down(&mut self, n: u16, max_row: u16) {
        self.position.row = self.position.row.saturating_add(n).min(max_row);
        self.pending_wrap = false;
    }

    /// Move cursor left by n columns, saturating at column zero.
    pub fn move_left(&mut self, n: u16) {
        self.position.col = self.position.col.saturating_sub(n);
        self.pending_wrap = false;
    }

    /// Move cursor right by n columns, clamped to `max_col`.
    pub fn move_right(&mut self, n: u16, max_col: u16) {
        self.position.col = self.position.col.saturating_add(n).min(max_col);
        self.pending_wrap = false;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn is_blinking(&self) -> bool {
        self.blinking
    }

    pub fn set_blinking(&mut self, blinking: bool) {
        self.blinking = blinking;
    }

    pub fn pending_wrap(&self) -> bool {
        self.pending_wrap
    }

    pub fn set_pending_wrap(&mut self, pending: bool) {
        self.pending_wrap = pending;
    }

    /// Snapshot position and rendition for DECSC.
    pub fn save(&self, attrs: CellAttributes) -> SavedCursor {
        SavedCursor {
            position: self.position,
            attrs,
            pending_wrap: self.pending_wrap,
        }
    }

    /// Restore a DECSC snapshot, returning the saved rendition.
    pub fn restore(&mut self, saved: &SavedCursor) -> CellAttributes {
        self.position = saved.position;
        self.pending_wrap = saved.pending_wrap;
        saved.attrs
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_is_clamped() {
        let mut cursor = Cursor::new();
        cursor.move_right(5, 79);
        assert_eq!(cursor.position(), Position::new(0, 5));

        cursor.move_down(3, 23);
        assert_eq!(cursor.position(), Position::new(3, 5));

        cursor.move_left(10);
        assert_eq!(cursor.position(), Position::new(3, 0));

        cursor.move_up(10);
        assert_eq!(cursor.position(), Position::new(0, 0));

        cursor.move_right(200, 79);
        assert_eq!(cursor.position().col, 79);
    }

    #[test]
    fn movement_clears_pending_wrap() {
        let mut cursor = Cursor::new();
        cursor.set_pending_wrap(true);
        cursor.move_left(1);
        assert!(!cursor.pending_wrap());
    }

    #[test]
    fn save_restore_round_trips() {
        let mut cursor = Cursor::new();
        cursor.set_position(Position::new(5, 10));
        cursor.set_pending_wrap(true);
        let saved = cursor.save(CellAttributes::default());

        cursor.set_position(Position::new(1, 1));
        cursor.restore(&saved);
        assert_eq!(cursor.position(), Position::new(5, 10));
        assert!(cursor.pending_wrap());
    }
}
