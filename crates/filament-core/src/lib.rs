pub mod events;
pub mod mouse;
pub mod rpc;
pub mod session;
pub mod shell;
pub mod terminal;
pub mod trace;

use filament_common::types::{Size, TerminalSnapshot};
use filament_parser::{CsiDispatch, DcsDispatch, Parser, ParserHandlers, RpcSequence};

pub use events::EventBus;
pub use mouse::{MouseEvent, MousePipeline, MouseRouting, MouseState};
pub use rpc::RpcRouter;
pub use session::SessionManager;
pub use shell::{EchoShell, ShellBridge};
pub use terminal::{TermEvent, TerminalState};

use trace::TraceDirection;

/// One terminal instance: the escape-sequence parser, the screen model,
/// and the mouse pipeline, driven synchronously by `write`.
pub struct Emulator {
    parser: Parser,
    state: TerminalState,
    mouse: MousePipeline,
}

impl Emulator {
    /// Create an emulator with the RPC siphon disabled; private-use CSI
    /// passes through as ordinary sequences.
    pub fn new(size: Size) -> Self {
        Self {
            parser: Parser::new(),
            state: TerminalState::new(size),
            mouse: MousePipeline::new(),
        }
    }

    /// Create an emulator whose parser siphons `ESC [ > ... <F|Q|R|E>`
    /// into the RPC inbox.
    pub fn with_rpc(size: Size) -> Self {
        Self {
            parser: Parser::with_rpc(),
            state: TerminalState::new(size),
            mouse: MousePipeline::new(),
        }
    }

    /// Process a chunk of output bytes from the shell.
    ///
    /// Not re-entrant; an emulator is a single-threaded cooperative
    /// component owned by its session.
    pub fn write(&mut self, bytes: &[u8]) {
        if trace::is_enabled() {
            let mut tap = TraceTap::new(&mut self.state);
            self.parser.feed(bytes, &mut tap);
            tap.finish();
        } else {
            self.parser.feed(bytes, &mut self.state);
        }
    }

    /// Abandon any partial escape sequence and held partial UTF-8.
    pub fn flush(&mut self) {
        self.parser.flush(&mut self.state);
    }

    pub fn state(&self) -> &TerminalState {
        &self.state
    }

    pub fn size(&self) -> Size {
        self.state.size()
    }

    pub fn resize(&mut self, size: Size) {
        self.state.resize(size);
    }

    pub fn snapshot(&self) -> TerminalSnapshot {
        self.state.snapshot()
    }

    /// Response bytes (DA, DSR) owed to the application.
    pub fn take_output(&mut self) -> Vec<u8> {
        let out = self.state.take_outbox();
        trace::record_output_bytes(&out);
        out
    }

    pub fn take_events(&mut self) -> Vec<TermEvent> {
        self.state.take_events()
    }

    /// RPC sequences collected since the last call.
    pub fn take_rpc_sequences(&mut self) -> Vec<RpcSequence> {
        self.state.take_rpc_sequences()
    }

    /// Host policy toggle: keep shift-held mouse events local.
    pub fn set_mouse_selection_priority(&mut self, enabled: bool) {
        self.state.set_mouse_selection_priority(enabled);
    }

    /// Route a host mouse event through the tracking pipeline under the
    /// terminal's current tracking configuration.
    pub fn process_mouse(&mut self, event: &MouseEvent) -> MouseRouting {
        let routing = self.mouse.process(self.state.mouse_config(), event);
        if let MouseRouting::Report(bytes) = &routing {
            trace::record_output_bytes(bytes);
        }
        routing
    }

    pub fn mouse_state(&self) -> &MouseState {
        self.mouse.state()
    }
}

/// Parser handler wrapper that mirrors every dispatched sequence into
/// the trace sink before forwarding it to the terminal state.
struct TraceTap<'a> {
    inner: &'a mut TerminalState,
    printable: String,
}

impl<'a> TraceTap<'a> {
    fn new(inner: &'a mut TerminalState) -> Self {
        Self {
            inner,
            printable: String::new(),
        }
    }

    fn emit(&mut self, escape_seq: String) {
        let printable = std::mem::take(&mut self.printable);
        trace::record(TraceDirection::Input, &escape_seq, &printable);
    }

    fn finish(&mut self) {
        if !self.printable.is_empty() {
            self.emit(String::new());
        }
    }
}

impl ParserHandlers for TraceTap<'_> {
    fn print(&mut self, ch: char, width: u8) {
        self.printable.push(ch);
        self.inner.print(ch, width);
    }

    fn execute(&mut self, byte: u8) {
        self.inner.execute(byte);
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], byte: u8) {
        let mut seq = String::from("\\x1b");
        seq.push_str(&String::from_utf8_lossy(intermediates));
        seq.push(byte as char);
        self.emit(seq);
        self.inner.esc_dispatch(intermediates, byte);
    }

    fn csi_dispatch(&mut self, csi: &CsiDispatch) {
        let mut seq = String::from("\\x1b[");
        if let Some(private) = csi.private {
            seq.push(private as char);
        }
        seq.push_str(&csi.params.to_string());
        seq.push_str(&String::from_utf8_lossy(&csi.intermediates));
        seq.push(csi.final_byte as char);
        self.emit(seq);
        self.inner.csi_dispatch(csi);
    }

    fn osc_dispatch(&mut self, data: &[u8], bell_terminated: bool) {
        let mut seq = String::from("\\x1b]");
        seq.push_str(&trace::escape_bytes(data));
        seq.push_str(if bell_terminated { "\\x07" } else { "\\x1b\\" });
        self.emit(seq);
        self.inner.osc_dispatch(data, bell_terminated);
    }

    fn dcs_dispatch(&mut self, dcs: &DcsDispatch) {
        let mut seq = String::from("\\x1bP");
        seq.push_str(&dcs.params.to_string());
        seq.push(dcs.final_byte as char);
        seq.push_str(&trace::escape_bytes(&dcs.data));
        seq.push_str("\\x1b\\");
        self.emit(seq);
        self.inner.dcs_dispatch(dcs);
    }

    fn rpc_dispatch(&mut self, seq: &RpcSequence) {
        self.emit(trace::escape_bytes(&seq.raw));
        self.inner.rpc_dispatch(seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mouse::{MouseButton, MouseEventKind, MouseModifiers};
    use filament_common::types::Position;

    #[test]
    fn write_drives_screen_model() {
        let mut emulator = Emulator::new(Size::new(80, 24));
        emulator.write(b"hi\x1b[5;5H");
        assert_eq!(emulator.state().cursor_position(), Position::new(4, 4));
        assert_eq!(emulator.state().screen().cell(Position::new(0, 0)).ch, 'h');
    }

    #[test]
    fn rpc_sequences_collected_only_with_rpc_enabled() {
        let mut plain = Emulator::new(Size::new(80, 24));
        plain.write(b"\x1b[>1500;1;F");
        assert!(plain.take_rpc_sequences().is_empty());

        let mut rpc = Emulator::with_rpc(Size::new(80, 24));
        rpc.write(b"\x1b[>1500;1;F");
        let sequences = rpc.take_rpc_sequences();
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].final_byte, b'F');
    }

    #[test]
    fn standard_behavior_identical_with_rpc_enabled() {
        let input: &[u8] = b"\x1b[2J\x1b[3;4Habc\x1b[1;31mdef\x1b]0;t\x07\x1b[6n";
        let mut plain = Emulator::new(Size::new(40, 12));
        let mut rpc = Emulator::with_rpc(Size::new(40, 12));
        plain.write(input);
        rpc.write(input);

        assert_eq!(
            plain.state().cursor_position(),
            rpc.state().cursor_position()
        );
        assert_eq!(plain.state().title(), rpc.state().title());
        assert_eq!(plain.take_output(), rpc.take_output());
        for row in 0..12 {
            assert_eq!(
                plain.state().screen().row_text(row),
                rpc.state().screen().row_text(row)
            );
        }
        assert!(rpc.take_rpc_sequences().is_empty());
    }

    #[test]
    fn mouse_reports_respect_terminal_modes() {
        let mut emulator = Emulator::new(Size::new(80, 24));
        let event = MouseEvent {
            kind: MouseEventKind::Press(MouseButton::Left),
            x: 10,
            y: 5,
            mods: MouseModifiers {
                ctrl: true,
                ..Default::default()
            },
        };

        // No tracking mode yet: local.
        assert_eq!(emulator.process_mouse(&event), MouseRouting::Local);

        emulator.write(b"\x1b[?1000h\x1b[?1006h");
        assert_eq!(
            emulator.process_mouse(&event),
            MouseRouting::Report(b"\x1b[<16;10;5M".to_vec())
        );
    }

    #[test]
    fn flush_recovers_partial_sequences() {
        let mut emulator = Emulator::new(Size::new(80, 24));
        emulator.write(b"\x1b[12");
        emulator.flush();
        emulator.write(b"x");
        assert_eq!(emulator.state().screen().cell(Position::new(0, 0)).ch, 'x');
    }
}
