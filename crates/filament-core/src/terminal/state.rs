use filament_common::types::{
    Cell, CellAttributes, CellFlags, Color, Position, SgrAttribute, Size, TerminalMode,
    TerminalSnapshot,
};
use filament_parser::{sgr, CsiDispatch, DcsDispatch, ParserHandlers, RpcSequence};
use tracing::{debug, trace};

use super::buffer::{ScreenBuffer, ScrollbackRing};
use super::cursor::{Cursor, SavedCursor};
use crate::mouse::{MouseTrackingConfig, TrackingMode};

/// Default scrollback depth in lines.
const SCROLLBACK_LINES: usize = 10_000;

/// Observable side effects of processing a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermEvent {
    Bell,
    TitleChanged(String),
}

/// Terminal state machine that manages the display buffers and cursor.
///
/// Implements [`ParserHandlers`]; all mutation flows in through the
/// escape-sequence parser.
pub struct TerminalState {
    size: Size,
    cursor: Cursor,
    saved_cursor: Option<SavedCursor>,
    alt_saved_cursor: Option<SavedCursor>,
    screen: ScreenBuffer,
    saved_primary: Option<ScreenBuffer>,
    scrollback: ScrollbackRing,
    mode: TerminalMode,
    attrs: CellAttributes,
    /// Inclusive 0-based scroll region bounds.
    scroll_region: (u16, u16),
    tab_stops: Vec<u16>,
    mouse_config: MouseTrackingConfig,
    title: String,
    outbox: Vec<u8>,
    events: Vec<TermEvent>,
    rpc_inbox: Vec<RpcSequence>,
}

impl TerminalState {
    /// Create a new terminal state with the given size
    pub fn new(size: Size) -> Self {
        debug!(?size, "creating terminal state");
        Self {
            size,
            cursor: Cursor::new(),
            saved_cursor: None,
            alt_saved_cursor: None,
            screen: ScreenBuffer::new(size),
            saved_primary: None,
            scrollback: ScrollbackRing::new(SCROLLBACK_LINES),
            mode: TerminalMode::default(),
            attrs: CellAttributes::default(),
            scroll_region: (0, size.rows.saturating_sub(1)),
            tab_stops: Self::default_tab_stops(size.cols),
            mouse_config: MouseTrackingConfig::default(),
            title: String::new(),
            outbox: Vec::new(),
            events: Vec::new(),
            rpc_inbox: Vec::new(),
        }
    }

    /// Default tab stops every 8 columns.
    fn default_tab_stops(cols: u16) -> Vec<u16> {
        (0..cols).step_by(8).collect()
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn cursor_position(&self) -> Position {
        self.cursor.position()
    }

    pub fn is_cursor_visible(&self) -> bool {
        self.cursor.is_visible()
    }

    pub fn pending_wrap(&self) -> bool {
        self.cursor.pending_wrap()
    }

    pub fn attributes(&self) -> &CellAttributes {
        &self.attrs
    }

    pub fn mode(&self) -> TerminalMode {
        self.mode
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn screen(&self) -> &ScreenBuffer {
        &self.screen
    }

    pub fn scrollback(&self) -> &ScrollbackRing {
        &self.scrollback
    }

    pub fn scroll_region(&self) -> (u16, u16) {
        self.scroll_region
    }

    pub fn mouse_config(&self) -> MouseTrackingConfig {
        self.mouse_config
    }

    /// Host policy: shift-held mouse events stay local for selection even
    /// while an application tracks the mouse.
    pub fn set_mouse_selection_priority(&mut self, enabled: bool) {
        self.mouse_config.selection_priority = enabled;
    }

    pub fn alternate_screen_active(&self) -> bool {
        self.mode.contains(TerminalMode::ALTERNATE_SCREEN)
    }

    /// Response bytes (DA, DSR) synthesized since the last call.
    pub fn take_outbox(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbox)
    }

    /// Observable events collected since the last call.
    pub fn take_events(&mut self) -> Vec<TermEvent> {
        std::mem::take(&mut self.events)
    }

    /// RPC sequences siphoned by the parser since the last call.
    pub fn take_rpc_sequences(&mut self) -> Vec<RpcSequence> {
        std::mem::take(&mut self.rpc_inbox)
    }

    pub fn snapshot(&self) -> TerminalSnapshot {
        TerminalSnapshot {
            size: self.size,
            cursor: self.cursor.position(),
            cursor_visible: self.cursor.is_visible(),
            mode: self.mode,
            alternate_screen_active: self.alternate_screen_active(),
            title: self.title.clone(),
        }
    }

    /// RIS: reset to the initial state, keeping size and title.
    pub fn reset(&mut self) {
        let size = self.size;
        let title = std::mem::take(&mut self.title);
        let outbox = std::mem::take(&mut self.outbox);
        let events = std::mem::take(&mut self.events);
        let rpc_inbox = std::mem::take(&mut self.rpc_inbox);
        *self = Self::new(size);
        self.title = title;
        self.outbox = outbox;
        self.events = events;
        self.rpc_inbox = rpc_inbox;
    }

    // === printing =========================================================

    fn put_scalar(&mut self, ch: char, width: u8) {
        if self.size.rows == 0 || self.size.cols == 0 {
            return;
        }
        match width {
            0 => self.attach_combining(ch),
            2 => self.put_char(ch, 2),
            _ => self.put_char(ch, 1),
        }
    }

    fn put_char(&mut self, ch: char, width: u16) {
        let cols = self.size.cols;
        if width == 2 && cols < 2 {
            return;
        }
        let autowrap = self.mode.contains(TerminalMode::AUTO_WRAP);

        if self.cursor.pending_wrap() && autowrap {
            self.cursor.set_col(0);
            self.linefeed();
        }

        // A wide character that does not fit wraps first.
        if width == 2 && self.cursor.position().col + 2 > cols {
            if autowrap {
                self.cursor.set_col(0);
                self.linefeed();
            } else {
                self.cursor.set_col(cols - 2);
            }
        }

        let pos = self.cursor.position();
        let mut cell = Cell::with_attrs(ch, self.attrs);
        if width == 2 {
            cell.attrs.flags.insert(CellFlags::WIDE);
            let mut shadow = Cell::blank_with(self.attrs);
            shadow.attrs.flags.insert(CellFlags::WIDE_SHADOW);
            self.screen.set_cell(pos, cell);
            self.screen
                .set_cell(Position::new(pos.row, pos.col + 1), shadow);
        } else {
            self.screen.set_cell(pos, cell);
        }

        let next = pos.col + width;
        if next >= cols {
            self.cursor.set_col(cols - 1);
            if autowrap {
                self.cursor.set_pending_wrap(true);
            }
        } else {
            self.cursor.set_col(next);
        }
    }

    /// Attach a combining mark to the most recently written cell.
    fn attach_combining(&mut self, ch: char) {
        let pos = self.cursor.position();
        let col = if self.cursor.pending_wrap() {
            pos.col
        } else if pos.col > 0 {
            pos.col - 1
        } else {
            return;
        };
        let mut target = Position::new(pos.row, col);
        if self.screen.cell(target).is_wide_shadow() && col > 0 {
            target.col -= 1;
        }
        if let Some(cell) = self.screen.cell_mut(target) {
            cell.combining.push(ch);
        }
    }

    // === cursor and scrolling =============================================

    fn linefeed(&mut self) {
        let row = self.cursor.position().row;
        let (_, bottom) = self.scroll_region;
        if row == bottom {
            self.scroll_up(1);
        } else if row < self.size.rows.saturating_sub(1) {
            self.cursor.set_row(row + 1);
        } else {
            // Below the region at the screen edge: stay put.
            self.cursor.set_pending_wrap(false);
        }
    }

    fn reverse_linefeed(&mut self) {
        let row = self.cursor.position().row;
        let (top, _) = self.scroll_region;
        if row == top {
            self.scroll_down(1);
        } else {
            self.cursor.move_up(1);
        }
    }

    fn carriage_return(&mut self) {
        self.cursor.set_col(0);
    }

    /// Scroll the region up by `n`, feeding scrollback from the primary
    /// full-screen region only.
    fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let removed = self.screen.scroll_up_region(top, bottom, n, self.attrs);
        let full_screen = top == 0 && bottom == self.size.rows.saturating_sub(1);
        if full_screen && !self.alternate_screen_active() {
            for line in removed {
                self.scrollback.push(line);
            }
        }
    }

    fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        self.screen.scroll_down_region(top, bottom, n, self.attrs);
    }

    fn tab(&mut self) {
        let col = self.cursor.position().col;
        let next = self
            .tab_stops
            .iter()
            .find(|&&stop| stop > col)
            .copied()
            .unwrap_or(self.size.cols.saturating_sub(1));
        self.cursor.set_col(next.min(self.size.cols.saturating_sub(1)));
    }

    fn set_tab_stop(&mut self) {
        let col = self.cursor.position().col;
        if !self.tab_stops.contains(&col) {
            self.tab_stops.push(col);
            self.tab_stops.sort_unstable();
        }
    }

    fn clear_tab_stop(&mut self) {
        let col = self.cursor.position().col;
        self.tab_stops.retain(|&stop| stop != col);
    }

    /// Move to an absolute position, honoring origin mode.
    fn move_to(&mut self, row: u16, col: u16) {
        let (top, bottom) = self.scroll_region;
        let (base, max_row) = if self.mode.contains(TerminalMode::ORIGIN) {
            (top, bottom)
        } else {
            (0, self.size.rows.saturating_sub(1))
        };
        let row = base.saturating_add(row).min(max_row);
        let col = col.min(self.size.cols.saturating_sub(1));
        self.cursor.set_position(Position::new(row, col));
    }

    // === erase ============================================================

    fn erase_display(&mut self, mode: u16) {
        let pos = self.cursor.position();
        let last_col = self.size.cols.saturating_sub(1);
        match mode {
            0 => {
                self.screen.erase_row_span(pos.row, pos.col, last_col, self.attrs);
                for row in pos.row + 1..self.size.rows {
                    self.screen.erase_row(row, self.attrs);
                }
            }
            1 => {
                for row in 0..pos.row {
                    self.screen.erase_row(row, self.attrs);
                }
                self.screen.erase_row_span(pos.row, 0, pos.col, self.attrs);
            }
            2 => self.screen.erase_all(self.attrs),
            3 => {
                self.screen.erase_all(self.attrs);
                self.scrollback.clear();
            }
            other => debug!(mode = other, "unhandled ED mode"),
        }
    }

    fn erase_line(&mut self, mode: u16) {
        let pos = self.cursor.position();
        let last_col = self.size.cols.saturating_sub(1);
        match mode {
            0 => self.screen.erase_row_span(pos.row, pos.col, last_col, self.attrs),
            1 => self.screen.erase_row_span(pos.row, 0, pos.col, self.attrs),
            2 => self.screen.erase_row(pos.row, self.attrs),
            other => debug!(mode = other, "unhandled EL mode"),
        }
    }

    // === line and char edits ==============================================

    fn insert_lines(&mut self, n: u16) {
        let row = self.cursor.position().row;
        let (top, bottom) = self.scroll_region;
        if row < top || row > bottom {
            return;
        }
        self.screen.scroll_down_region(row, bottom, n, self.attrs);
        self.cursor.set_col(0);
    }

    fn delete_lines(&mut self, n: u16) {
        let row = self.cursor.position().row;
        let (top, bottom) = self.scroll_region;
        if row < top || row > bottom {
            return;
        }
        self.screen.scroll_up_region(row, bottom, n, self.attrs);
        self.cursor.set_col(0);
    }

    // === modes ============================================================

    fn set_ansi_mode(&mut self, param: u16, enabled: bool) {
        match param {
            4 => self.mode.set(TerminalMode::INSERT, enabled),
            20 => {} // LNM accepted, unhandled
            other => debug!(mode = other, enabled, "unhandled ANSI mode"),
        }
    }

    fn set_dec_mode(&mut self, param: u16, enabled: bool) {
        match param {
            1 => self.mode.set(TerminalMode::APPLICATION_CURSOR, enabled),
            6 => {
                self.mode.set(TerminalMode::ORIGIN, enabled);
                self.move_to(0, 0);
            }
            7 => {
                self.mode.set(TerminalMode::AUTO_WRAP, enabled);
                if !enabled {
                    self.cursor.set_pending_wrap(false);
                }
            }
            12 => self.cursor.set_blinking(enabled),
            25 => self.cursor.set_visible(enabled),
            47 | 1047 => {
                if enabled {
                    self.enter_alternate_screen(false);
                } else {
                    self.exit_alternate_screen(false);
                }
            }
            66 => self.mode.set(TerminalMode::APPLICATION_KEYPAD, enabled),
            1000 => self.set_mouse_mode(TrackingMode::Click, enabled),
            1002 => self.set_mouse_mode(TrackingMode::Button, enabled),
            1003 => self.set_mouse_mode(TrackingMode::Any, enabled),
            1006 => self.mouse_config.sgr_encoding = enabled,
            1049 => {
                if enabled {
                    self.enter_alternate_screen(true);
                } else {
                    self.exit_alternate_screen(true);
                }
            }
            2004 => self.mode.set(TerminalMode::BRACKETED_PASTE, enabled),
            other => debug!(mode = other, enabled, "unhandled DEC private mode"),
        }
    }

    fn set_mouse_mode(&mut self, mode: TrackingMode, enabled: bool) {
        if enabled {
            self.mouse_config.mode = mode;
        } else if self.mouse_config.mode == mode {
            self.mouse_config.mode = TrackingMode::Off;
        }
    }

    fn enter_alternate_screen(&mut self, save_cursor: bool) {
        if self.alternate_screen_active() {
            return;
        }
        if save_cursor {
            self.alt_saved_cursor = Some(self.cursor.save(self.attrs));
        }
        let alt = ScreenBuffer::new(self.size);
        self.saved_primary = Some(std::mem::replace(&mut self.screen, alt));
        self.mode.insert(TerminalMode::ALTERNATE_SCREEN);
        self.cursor.set_position(Position::new(0, 0));
    }

    fn exit_alternate_screen(&mut self, restore_cursor: bool) {
        let Some(primary) = self.saved_primary.take() else {
            return;
        };
        self.screen = primary;
        self.mode.remove(TerminalMode::ALTERNATE_SCREEN);
        if self.screen.size() != self.size {
            self.fit_screen_to_size();
        }
        if restore_cursor {
            if let Some(saved) = self.alt_saved_cursor.take() {
                self.attrs = self.cursor.restore(&saved);
            }
        }
        self.clamp_cursor();
        self.screen.mark_all_dirty();
    }

    /// Bring the active buffer to `self.size` after a swap that happened
    /// under a stale size.
    fn fit_screen_to_size(&mut self) {
        let current = self.screen.size();
        if current.cols != self.size.cols {
            self.screen.resize_width(self.size.cols);
        }
        if current.rows > self.size.rows {
            for _ in 0..current.rows - self.size.rows {
                self.screen.remove_top_line();
            }
        } else {
            for _ in 0..self.size.rows - current.rows {
                self.screen.add_blank_line(CellAttributes::default());
            }
        }
        self.screen.set_rows(self.size.rows);
    }

    fn clamp_cursor(&mut self) {
        let pos = self.cursor.position();
        let clamped = Position::new(
            pos.row.min(self.size.rows.saturating_sub(1)),
            pos.col.min(self.size.cols.saturating_sub(1)),
        );
        if clamped != pos {
            self.cursor.set_position(clamped);
        }
    }

    // === resize ===========================================================

    /// Resize to `new`: rows are preserved top-to-bottom, each row is
    /// truncated or padded with no reflow, and when shrinking, rows are
    /// dropped from the top with the cursor pulled up accordingly.
    pub fn resize(&mut self, new: Size) {
        if new == self.size || new.rows == 0 || new.cols == 0 {
            return;
        }
        let old = self.size;

        self.screen.resize_width(new.cols);
        if let Some(primary) = self.saved_primary.as_mut() {
            primary.resize_width(new.cols);
        }

        if new.rows < old.rows {
            let drop = old.rows - new.rows;
            for _ in 0..drop {
                self.screen.remove_top_line();
            }
            self.screen.set_rows(new.rows);
            if let Some(primary) = self.saved_primary.as_mut() {
                for _ in 0..drop {
                    primary.remove_top_line();
                }
                primary.set_rows(new.rows);
            }
            let row = self.cursor.position().row;
            self.cursor.set_row(row.saturating_sub(drop));
        } else if new.rows > old.rows {
            for _ in old.rows..new.rows {
                self.screen.add_blank_line(CellAttributes::default());
            }
            self.screen.set_rows(new.rows);
            if let Some(primary) = self.saved_primary.as_mut() {
                for _ in old.rows..new.rows {
                    primary.add_blank_line(CellAttributes::default());
                }
                primary.set_rows(new.rows);
            }
        }

        self.size = new;
        self.clamp_cursor();
        self.cursor.set_pending_wrap(false);

        // Scroll region survives only while still valid.
        let (top, bottom) = self.scroll_region;
        let full = top == 0 && bottom == old.rows.saturating_sub(1);
        if full || bottom >= new.rows || top >= bottom {
            self.scroll_region = (0, new.rows - 1);
        }

        // Keep explicit stops that still fit, extend defaults rightward.
        self.tab_stops.retain(|&stop| stop < new.cols);
        if new.cols > old.cols {
            let mut stop = (old.cols / 8) * 8 + 8;
            while stop < new.cols {
                if !self.tab_stops.contains(&stop) {
                    self.tab_stops.push(stop);
                }
                stop += 8;
            }
            self.tab_stops.sort_unstable();
        }
    }

    // === SGR ==============================================================

    fn apply_sgr(&mut self, attr: SgrAttribute) {
        use SgrAttribute::*;
        match attr {
            Reset => self.attrs = CellAttributes::default(),
            Bold => self.attrs.flags.insert(CellFlags::BOLD),
            Dim => self.attrs.flags.insert(CellFlags::DIM),
            Italic => self.attrs.flags.insert(CellFlags::ITALIC),
            Underline => self.attrs.flags.insert(CellFlags::UNDERLINE),
            Blink => self.attrs.flags.insert(CellFlags::BLINK),
            Reverse => self.attrs.flags.insert(CellFlags::REVERSE),
            Hidden => self.attrs.flags.insert(CellFlags::HIDDEN),
            Strikethrough => self.attrs.flags.insert(CellFlags::STRIKETHROUGH),
            NoBoldDim => self.attrs.flags.remove(CellFlags::BOLD | CellFlags::DIM),
            NoItalic => self.attrs.flags.remove(CellFlags::ITALIC),
            NoUnderline => self.attrs.flags.remove(CellFlags::UNDERLINE),
            NoBlink => self.attrs.flags.remove(CellFlags::BLINK),
            NoReverse => self.attrs.flags.remove(CellFlags::REVERSE),
            NoHidden => self.attrs.flags.remove(CellFlags::HIDDEN),
            NoStrikethrough => self.attrs.flags.remove(CellFlags::STRIKETHROUGH),
            Foreground(color) => self.attrs.fg = color,
            Background(color) => self.attrs.bg = color,
            UnderlineColor(color) => {
                self.attrs.underline_color = match color {
                    Color::Default => None,
                    other => Some(other),
                }
            }
        }
    }

    // === CSI ==============================================================

    fn handle_csi(&mut self, csi: &CsiDispatch) {
        if csi.private == Some(b'?') {
            match csi.final_byte {
                b'h' => {
                    for group in csi.params.iter() {
                        if let Some(p) = group.first().and_then(|p| p.value()) {
                            self.set_dec_mode(p, true);
                        }
                    }
                }
                b'l' => {
                    for group in csi.params.iter() {
                        if let Some(p) = group.first().and_then(|p| p.value()) {
                            self.set_dec_mode(p, false);
                        }
                    }
                }
                other => debug!(final_byte = %(other as char), "unhandled private CSI"),
            }
            return;
        }

        if let Some(private) = csi.private {
            match (private, csi.final_byte) {
                (b'>', b'c') => self.outbox.extend_from_slice(b"\x1b[>0;0;0c"),
                _ => debug!(
                    private = %(private as char),
                    final_byte = %(csi.final_byte as char),
                    "unhandled private CSI"
                ),
            }
            return;
        }

        let params = &csi.params;
        match csi.final_byte {
            b'A' => {
                let n = params.get_or(0, 1).max(1);
                self.cursor.move_up(n);
            }
            b'B' => {
                let n = params.get_or(0, 1).max(1);
                self.cursor.move_down(n, self.size.rows.saturating_sub(1));
            }
            b'C' => {
                let n = params.get_or(0, 1).max(1);
                self.cursor.move_right(n, self.size.cols.saturating_sub(1));
            }
            b'D' => {
                let n = params.get_or(0, 1).max(1);
                self.cursor.move_left(n);
            }
            b'E' => {
                let n = params.get_or(0, 1).max(1);
                self.cursor.set_col(0);
                self.cursor.move_down(n, self.size.rows.saturating_sub(1));
            }
            b'F' => {
                let n = params.get_or(0, 1).max(1);
                self.cursor.set_col(0);
                self.cursor.move_up(n);
            }
            b'G' => {
                let col = params.get_or(0, 1).max(1) - 1;
                self.cursor
                    .set_col(col.min(self.size.cols.saturating_sub(1)));
            }
            b'H' | b'f' => {
                let row = params.get_or(0, 1).max(1) - 1;
                let col = params.get_or(1, 1).max(1) - 1;
                self.move_to(row, col);
            }
            b'd' => {
                let row = params.get_or(0, 1).max(1) - 1;
                self.cursor
                    .set_row(row.min(self.size.rows.saturating_sub(1)));
            }
            b'J' => self.erase_display(params.get_or(0, 0)),
            b'K' => self.erase_line(params.get_or(0, 0)),
            b'S' => {
                let n = params.get_or(0, 1);
                if n > 0 {
                    self.scroll_up(n);
                }
            }
            b'T' => {
                let n = params.get_or(0, 1);
                if n > 0 {
                    self.scroll_down(n);
                }
            }
            b'L' => self.insert_lines(params.get_or(0, 1).max(1)),
            b'M' => self.delete_lines(params.get_or(0, 1).max(1)),
            b'@' => {
                let pos = self.cursor.position();
                self.screen
                    .insert_chars(pos.row, pos.col, params.get_or(0, 1).max(1), self.attrs);
            }
            b'P' => {
                let pos = self.cursor.position();
                self.screen
                    .delete_chars(pos.row, pos.col, params.get_or(0, 1).max(1), self.attrs);
            }
            b'X' => {
                let pos = self.cursor.position();
                let n = params.get_or(0, 1).max(1);
                self.screen.erase_row_span(
                    pos.row,
                    pos.col,
                    pos.col.saturating_add(n - 1),
                    self.attrs,
                );
            }
            b'm' => {
                for attr in sgr::parse(params) {
                    self.apply_sgr(attr);
                }
            }
            b'h' => {
                for group in params.iter() {
                    if let Some(p) = group.first().and_then(|p| p.value()) {
                        self.set_ansi_mode(p, true);
                    }
                }
            }
            b'l' => {
                for group in params.iter() {
                    if let Some(p) = group.first().and_then(|p| p.value()) {
                        self.set_ansi_mode(p, false);
                    }
                }
            }
            b'r' => {
                let top = params.get_or(0, 1).max(1);
                let bottom = params.get_or(1, self.size.rows).max(1);
                if top < bottom && bottom <= self.size.rows {
                    self.scroll_region = (top - 1, bottom - 1);
                    self.move_to(0, 0);
                } else {
                    debug!(top, bottom, "DECSTBM with invalid region ignored");
                }
            }
            b'c' => {
                if params.get_or(0, 0) == 0 {
                    // VT100 with advanced video option.
                    self.outbox.extend_from_slice(b"\x1b[?1;2c");
                }
            }
            b'n' => match params.get_or(0, 0) {
                5 => self.outbox.extend_from_slice(b"\x1b[0n"),
                6 => {
                    let pos = self.cursor.position();
                    let reply = format!("\x1b[{};{}R", pos.row + 1, pos.col + 1);
                    self.outbox.extend_from_slice(reply.as_bytes());
                }
                other => debug!(param = other, "unhandled DSR"),
            },
            b'g' => match params.get_or(0, 0) {
                0 => self.clear_tab_stop(),
                3 => self.tab_stops.clear(),
                other => debug!(param = other, "unhandled TBC"),
            },
            b's' => self.saved_cursor = Some(self.cursor.save(self.attrs)),
            b'u' => {
                if let Some(saved) = self.saved_cursor.clone() {
                    self.attrs = self.cursor.restore(&saved);
                    self.clamp_cursor();
                }
            }
            other => debug!(final_byte = %(other as char), "unhandled CSI"),
        }
    }

    // === ESC ==============================================================

    fn handle_esc(&mut self, intermediates: &[u8], byte: u8) {
        match (intermediates, byte) {
            ([], b'D') => self.linefeed(),
            ([], b'E') => {
                self.carriage_return();
                self.linefeed();
            }
            ([], b'H') => self.set_tab_stop(),
            ([], b'M') => self.reverse_linefeed(),
            ([], b'7') => self.saved_cursor = Some(self.cursor.save(self.attrs)),
            ([], b'8') => match self.saved_cursor.clone() {
                Some(saved) => {
                    self.attrs = self.cursor.restore(&saved);
                    self.clamp_cursor();
                }
                None => {
                    self.cursor.set_position(Position::new(0, 0));
                    self.attrs = CellAttributes::default();
                }
            },
            ([], b'=') => self.mode.insert(TerminalMode::APPLICATION_KEYPAD),
            ([], b'>') => self.mode.remove(TerminalMode::APPLICATION_KEYPAD),
            ([], b'c') => self.reset(),
            ([], b'\\') => {} // stray ST
            ([b'('] | [b')'], _) => {} // charset designation accepted
            ([b'#'], b'8') => {
                // DECALN screen alignment pattern.
                for row in 0..self.size.rows {
                    for col in 0..self.size.cols {
                        self.screen
                            .set_cell(Position::new(row, col), Cell::new('E'));
                    }
                }
            }
            _ => debug!(?intermediates, byte = %(byte as char), "unhandled ESC"),
        }
    }

    // === OSC ==============================================================

    fn handle_osc(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        let Some((num, rest)) = text.split_once(';') else {
            debug!("OSC without payload ignored");
            return;
        };
        match num.parse::<u16>() {
            Ok(0) | Ok(2) => {
                self.title = rest.to_string();
                self.events.push(TermEvent::TitleChanged(self.title.clone()));
            }
            Ok(1) => {} // icon name accepted, unhandled
            Ok(other) => debug!(osc = other, "unhandled OSC"),
            Err(_) => debug!("OSC with non-numeric selector ignored"),
        }
    }
}

impl ParserHandlers for TerminalState {
    fn print(&mut self, ch: char, width: u8) {
        trace!(%ch, width, "print");
        self.put_scalar(ch, width);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x07 => self.events.push(TermEvent::Bell),
            0x08 => self.cursor.move_left(1),
            0x09 => self.tab(),
            0x0A | 0x0B | 0x0C => self.linefeed(),
            0x0D => self.carriage_return(),
            0x0E | 0x0F => {} // SO/SI charset shifts accepted
            other => trace!(byte = other, "unhandled control"),
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], byte: u8) {
        self.handle_esc(intermediates, byte);
    }

    fn csi_dispatch(&mut self, csi: &CsiDispatch) {
        self.handle_csi(csi);
    }

    fn osc_dispatch(&mut self, data: &[u8], _bell_terminated: bool) {
        self.handle_osc(data);
    }

    fn dcs_dispatch(&mut self, dcs: &DcsDispatch) {
        debug!(final_byte = %(dcs.final_byte as char), "DCS ignored");
    }

    fn rpc_dispatch(&mut self, seq: &RpcSequence) {
        self.rpc_inbox.push(seq.clone());
    }
}
