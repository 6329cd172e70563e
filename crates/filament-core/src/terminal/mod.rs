mod buffer;
mod cursor;
mod state;

pub use buffer::{ScreenBuffer, ScrollbackRing};
pub use cursor::{Cursor, SavedCursor};
pub use state::{TermEvent, TerminalState};
