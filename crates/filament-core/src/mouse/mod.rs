//! Mouse tracking pipeline: tracking-mode configuration, the button/drag
//! state machine, and the X10/X11 and SGR report encoders.

use tracing::{debug, trace};

/// Which mouse events the application has asked to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    /// All events are handled locally (selection).
    #[default]
    Off,
    /// Press and release only (`?1000`).
    Click,
    /// Press, release, and motion while a button is held (`?1002`).
    Button,
    /// Press, release, and all motion (`?1003`).
    Any,
}

/// Tracking configuration, mutated by DECSET/DECRST of the mouse modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseTrackingConfig {
    pub mode: TrackingMode,
    /// `?1006`: use the SGR report encoding.
    pub sgr_encoding: bool,
    /// Shift-held events stay local for selection.
    pub selection_priority: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
}

impl MouseButton {
    /// Ordinal within the button code: wheel buttons restart at 0 and
    /// carry the wheel bit instead.
    pub fn ordinal(self) -> u16 {
        match self {
            MouseButton::Left | MouseButton::WheelUp => 0,
            MouseButton::Middle | MouseButton::WheelDown => 1,
            MouseButton::Right => 2,
        }
    }

    pub fn is_wheel(self) -> bool {
        matches!(self, MouseButton::WheelUp | MouseButton::WheelDown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseModifiers {
    pub shift: bool,
    pub alt: bool,
    pub ctrl: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    Press(MouseButton),
    Release(MouseButton),
    Motion,
}

/// A host mouse event with 1-based terminal coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub kind: MouseEventKind,
    pub x: u16,
    pub y: u16,
    pub mods: MouseModifiers,
}

impl MouseEvent {
    pub fn is_valid(&self) -> bool {
        self.x >= 1 && self.y >= 1
    }
}

const MOTION_BIT: u16 = 32;
const WHEEL_BIT: u16 = 64;
/// X10 coordinate ceiling: `32 + value` must fit in a byte.
const X10_MAX: u16 = 223;

fn modifier_bits(mods: MouseModifiers) -> u16 {
    (if mods.shift { 4 } else { 0 })
        + (if mods.alt { 8 } else { 0 })
        + (if mods.ctrl { 16 } else { 0 })
}

/// Button code for a press or motion report.
pub fn button_code(button: Option<MouseButton>, motion: bool, mods: MouseModifiers) -> u16 {
    let base = match button {
        Some(b) if b.is_wheel() => WHEEL_BIT + b.ordinal(),
        Some(b) => b.ordinal(),
        // No button: the released/none ordinal.
        None => 3,
    };
    base + modifier_bits(mods) + if motion { MOTION_BIT } else { 0 }
}

/// `ESC [ M b x y` with each byte offset by 32 and values clamped to 223.
pub fn encode_x10(code: u16, x: u16, y: u16) -> Vec<u8> {
    let clamp = |v: u16| (v.min(X10_MAX) + 32) as u8;
    vec![0x1B, b'[', b'M', clamp(code), clamp(x), clamp(y)]
}

/// `ESC [ < code ; x ; y M/m` with decimal coordinates, no clamping.
pub fn encode_sgr(code: u16, x: u16, y: u16, release: bool) -> Vec<u8> {
    let final_byte = if release { 'm' } else { 'M' };
    format!("\x1b[<{code};{x};{y}{final_byte}").into_bytes()
}

/// Parse an SGR mouse report back into its parts.
pub fn decode_sgr(bytes: &[u8]) -> Option<(u16, u16, u16, bool)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let rest = text.strip_prefix("\x1b[<")?;
    let release = rest.ends_with('m');
    let rest = rest.strip_suffix(&['M', 'm'][..])?;
    let mut parts = rest.split(';');
    let code = parts.next()?.parse().ok()?;
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((code, x, y, release))
}

/// Parse an X10 report back into `(code, x, y)`.
pub fn decode_x10(bytes: &[u8]) -> Option<(u16, u16, u16)> {
    match bytes {
        [0x1B, b'[', b'M', b, x, y] => Some((
            u16::from(*b) - 32,
            u16::from(*x) - 32,
            u16::from(*y) - 32,
        )),
        _ => None,
    }
}

/// Button/drag state machine backing the encoders.
#[derive(Debug, Clone, Default)]
pub struct MouseState {
    pressed: Option<MouseButton>,
    last_position: Option<(u16, u16)>,
    drag_active: bool,
}

impl MouseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pressed(&self) -> Option<MouseButton> {
        self.pressed
    }

    pub fn last_position(&self) -> Option<(u16, u16)> {
        self.last_position
    }

    pub fn drag_active(&self) -> bool {
        self.drag_active
    }

    /// Fold an event into the state. Returns true when a motion event
    /// actually changed the tracked position. Invalid events leave the
    /// state untouched.
    pub fn observe(&mut self, event: &MouseEvent) -> bool {
        if !event.is_valid() {
            debug!(?event, "mouse event with invalid coordinates rejected");
            return false;
        }
        match event.kind {
            MouseEventKind::Press(button) => {
                if !button.is_wheel() {
                    self.pressed = Some(button);
                    self.drag_active = false;
                }
                self.last_position = Some((event.x, event.y));
                false
            }
            MouseEventKind::Release(_) => {
                self.pressed = None;
                self.drag_active = false;
                self.last_position = Some((event.x, event.y));
                false
            }
            MouseEventKind::Motion => {
                let changed = self.last_position != Some((event.x, event.y));
                self.last_position = Some((event.x, event.y));
                if self.pressed.is_some() {
                    self.drag_active = true;
                }
                changed
            }
        }
    }

    /// Base invariants: wheel buttons are never held, drag implies a held
    /// button, tracked coordinates are 1-based.
    pub fn is_consistent(&self) -> bool {
        if let Some(button) = self.pressed {
            if button.is_wheel() {
                return false;
            }
        }
        if self.drag_active && self.pressed.is_none() {
            return false;
        }
        if let Some((x, y)) = self.last_position {
            if x < 1 || y < 1 {
                return false;
            }
        }
        true
    }

    /// Restore the base invariants.
    pub fn recover(&mut self) {
        if self.pressed.map_or(false, MouseButton::is_wheel) {
            self.pressed = None;
        }
        if self.pressed.is_none() {
            self.drag_active = false;
        }
        if let Some((x, y)) = self.last_position {
            if x < 1 || y < 1 {
                self.last_position = None;
            }
        }
    }
}

/// Where an event went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MouseRouting {
    /// Handled locally (selection); nothing is sent to the application.
    Local,
    /// Encoded report bytes destined for the application.
    Report(Vec<u8>),
}

/// Tracking-mode manager plus state machine plus encoder.
#[derive(Debug, Default)]
pub struct MousePipeline {
    config: MouseTrackingConfig,
    state: MouseState,
}

impl MousePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &MouseState {
        &self.state
    }

    /// True when the event must not reach the application.
    fn handle_locally(&self, event: &MouseEvent) -> bool {
        let config = &self.config;
        if config.mode == TrackingMode::Off {
            return true;
        }
        if config.selection_priority && event.mods.shift {
            return true;
        }
        match event.kind {
            MouseEventKind::Press(_) | MouseEventKind::Release(_) => false,
            MouseEventKind::Motion => match config.mode {
                TrackingMode::Click => true,
                TrackingMode::Button => self.state.pressed.is_none(),
                TrackingMode::Any => false,
                TrackingMode::Off => true,
            },
        }
    }

    /// Route one event under the given tracking configuration. A config
    /// change resets the button state first.
    pub fn process(&mut self, config: MouseTrackingConfig, event: &MouseEvent) -> MouseRouting {
        if config != self.config {
            trace!(?config, "mouse tracking config changed, resetting state");
            self.config = config;
            self.state = MouseState::new();
        }

        if !event.is_valid() {
            return MouseRouting::Local;
        }

        let local = self.handle_locally(event);
        self.state.observe(event);

        if local {
            return MouseRouting::Local;
        }

        let (code, release) = match event.kind {
            MouseEventKind::Press(button) => {
                (button_code(Some(button), false, event.mods), false)
            }
            MouseEventKind::Release(button) => {
                if self.config.sgr_encoding {
                    (button_code(Some(button), false, event.mods), true)
                } else {
                    // X10 reports releases with the "none" ordinal.
                    (button_code(None, false, event.mods), false)
                }
            }
            MouseEventKind::Motion => {
                (button_code(self.state.pressed, true, event.mods), false)
            }
        };

        let bytes = if self.config.sgr_encoding {
            encode_sgr(code, event.x, event.y, release)
        } else {
            encode_x10(code, event.x, event.y)
        };
        MouseRouting::Report(bytes)
    }
}
