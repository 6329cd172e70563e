pub mod decoder;
pub mod sgr;

pub use decoder::{scalar_width, ByteDecoder, DecodeEvent};

use tracing::{debug, trace};

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1A;
const DEL: u8 = 0x7F;

/// Longest OSC / DCS payload retained before excess bytes are discarded.
const MAX_STRING_LEN: usize = 16_384;

/// States of the escape-sequence recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    CsiIgnore,
    OscString,
    DcsEntry,
    DcsParam,
    DcsIntermediate,
    DcsPassthrough,
    DcsIgnore,
    SosPmApcString,
}

/// One component of a CSI parameter group. Empty components stay
/// distinguishable from explicit zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Param {
    #[default]
    Default,
    Value(u16),
}

impl Param {
    pub fn or(self, default: u16) -> u16 {
        match self {
            Param::Default => default,
            Param::Value(v) => v,
        }
    }

    pub fn value(self) -> Option<u16> {
        match self {
            Param::Default => None,
            Param::Value(v) => Some(v),
        }
    }
}

/// Parsed CSI parameters: semicolons separate groups, colons separate
/// sub-parameters within a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    groups: Vec<Vec<Param>>,
}

impl Params {
    pub fn from_groups(groups: Vec<Vec<Param>>) -> Self {
        Self { groups }
    }

    /// Build simple semicolon-separated parameters from plain values.
    pub fn from_values(values: &[u16]) -> Self {
        Self {
            groups: values.iter().map(|&v| vec![Param::Value(v)]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group(&self, index: usize) -> Option<&[Param]> {
        self.groups.get(index).map(|g| g.as_slice())
    }

    /// First sub-parameter of group `index`, `Default` when absent.
    pub fn get(&self, index: usize) -> Param {
        self.groups
            .get(index)
            .and_then(|g| g.first())
            .copied()
            .unwrap_or(Param::Default)
    }

    pub fn get_or(&self, index: usize, default: u16) -> u16 {
        self.get(index).or(default)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Param]> {
        self.groups.iter().map(|g| g.as_slice())
    }
}

impl std::fmt::Display for Params {
    /// Renders the parameter text as it appeared on the wire: groups
    /// joined by `;`, sub-parameters by `:`, defaults empty.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (gi, group) in self.groups.iter().enumerate() {
            if gi > 0 {
                f.write_str(";")?;
            }
            for (pi, param) in group.iter().enumerate() {
                if pi > 0 {
                    f.write_str(":")?;
                }
                if let Param::Value(v) = param {
                    write!(f, "{v}")?;
                }
            }
        }
        Ok(())
    }
}

/// A dispatched control sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsiDispatch {
    /// Private-use prefix byte (`<`, `=`, `>` or `?`), if any.
    pub private: Option<u8>,
    pub params: Params,
    pub intermediates: Vec<u8>,
    pub final_byte: u8,
}

/// A dispatched device control string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcsDispatch {
    pub private: Option<u8>,
    pub params: Params,
    pub intermediates: Vec<u8>,
    pub final_byte: u8,
    pub data: Vec<u8>,
}

/// A private-use CSI sequence siphoned off for the RPC channel:
/// `ESC [ > ... <F|Q|R|E>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcSequence {
    pub params: Params,
    pub final_byte: u8,
    /// The sequence as received, starting at ESC.
    pub raw: Vec<u8>,
}

/// Capability interface the parser dispatches into.
pub trait ParserHandlers {
    /// A printable scalar with its display width, only from `Ground`.
    fn print(&mut self, ch: char, width: u8);

    /// A C0 control byte.
    fn execute(&mut self, byte: u8) {
        let _ = byte;
    }

    /// A simple escape sequence.
    fn esc_dispatch(&mut self, intermediates: &[u8], byte: u8) {
        let _ = (intermediates, byte);
    }

    /// A well-formed control sequence.
    fn csi_dispatch(&mut self, csi: &CsiDispatch) {
        let _ = csi;
    }

    /// An operating system command, BEL or ST terminated.
    fn osc_dispatch(&mut self, data: &[u8], bell_terminated: bool) {
        let _ = (data, bell_terminated);
    }

    /// A device control string with its passthrough payload.
    fn dcs_dispatch(&mut self, dcs: &DcsDispatch) {
        let _ = dcs;
    }

    /// A private-use RPC sequence. Only invoked on RPC-enabled parsers.
    fn rpc_dispatch(&mut self, seq: &RpcSequence) {
        let _ = seq;
    }
}

/// VT500-style escape sequence parser fed by the byte stream decoder.
#[derive(Debug, Default)]
pub struct Parser {
    state: State,
    decoder: ByteDecoder,
    rpc_enabled: bool,

    private: Option<u8>,
    intermediates: Vec<u8>,
    param_groups: Vec<Vec<Param>>,
    cur_group: Vec<Param>,
    cur_value: Option<u32>,
    params_seen: bool,

    osc_buf: Vec<u8>,
    dcs_data: Vec<u8>,
    dcs_head: Option<(Option<u8>, Params, Vec<u8>, u8)>,

    /// Raw bytes of the sequence being collected, starting at ESC.
    raw: Vec<u8>,
    /// An ESC was seen inside a string; the next byte decides between
    /// ST termination and a fresh escape sequence.
    st_pending: bool,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// A parser that siphons `ESC [ > ... <F|Q|R|E>` to `rpc_dispatch`.
    pub fn with_rpc() -> Self {
        Self {
            rpc_enabled: true,
            ..Self::default()
        }
    }

    pub fn rpc_enabled(&self) -> bool {
        self.rpc_enabled
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Feed a chunk of bytes, dispatching events into `handler`.
    pub fn feed(&mut self, bytes: &[u8], handler: &mut dyn ParserHandlers) {
        let mut decoder = std::mem::take(&mut self.decoder);
        decoder.feed(bytes, &mut |ev| self.process_event(ev, handler));
        self.decoder = decoder;
    }

    /// Abandon any partial sequence and return to `Ground`. The decoder
    /// reports held partial bytes as `Invalid` first.
    pub fn flush(&mut self, handler: &mut dyn ParserHandlers) {
        let mut decoder = std::mem::take(&mut self.decoder);
        decoder.flush(&mut |ev| self.process_event(ev, handler));
        self.decoder = decoder;
        if self.state != State::Ground {
            debug!(state = ?self.state, "flush discarded a partial sequence");
        }
        self.enter_ground();
    }

    fn process_event(&mut self, event: DecodeEvent, handler: &mut dyn ParserHandlers) {
        if self.st_pending {
            self.st_pending = false;
            if matches!(event, DecodeEvent::Scalar { ch: '\\', .. }) {
                self.terminate_string(handler, false);
                return;
            }
            // The ESC aborted the string and starts a new sequence.
            self.terminate_string(handler, false);
            self.enter_escape();
            self.process_event(event, handler);
            return;
        }

        match event {
            DecodeEvent::Invalid => {
                if self.state == State::Ground {
                    handler.print(char::REPLACEMENT_CHARACTER, 1);
                } else {
                    debug!(state = ?self.state, "invalid byte inside sequence ignored");
                }
            }
            DecodeEvent::Control(byte) => self.process_control(byte, handler),
            DecodeEvent::Scalar { ch, width } => self.process_scalar(ch, width, handler),
        }
    }

    fn process_control(&mut self, byte: u8, handler: &mut dyn ParserHandlers) {
        match byte {
            ESC => match self.state {
                State::OscString | State::DcsPassthrough | State::DcsIgnore
                | State::SosPmApcString => self.st_pending = true,
                _ => self.enter_escape(),
            },
            CAN | SUB => {
                trace!("sequence aborted by CAN/SUB");
                if self.state == State::Ground {
                    handler.execute(byte);
                }
                self.enter_ground();
            }
            BEL if self.state == State::OscString => self.terminate_string(handler, true),
            DEL => {}
            _ => match self.state {
                State::Ground => handler.execute(byte),
                State::OscString | State::SosPmApcString => {}
                State::DcsPassthrough => self.push_string_byte(byte),
                // C0 controls execute immediately inside escape and CSI
                // collection, without disturbing the sequence.
                _ => handler.execute(byte),
            },
        }
    }

    fn process_scalar(&mut self, ch: char, width: u8, handler: &mut dyn ParserHandlers) {
        if self.state == State::Ground {
            handler.print(ch, width);
            return;
        }

        if !ch.is_ascii() {
            match self.state {
                State::OscString => self.push_string_chars(ch),
                State::DcsPassthrough => self.push_string_chars(ch),
                State::SosPmApcString => {}
                _ => {
                    debug!(state = ?self.state, %ch, "non-ASCII byte inside sequence ignored");
                }
            }
            return;
        }

        let byte = ch as u8;
        match self.state {
            State::Ground => unreachable!(),
            State::Escape => self.escape_byte(byte, handler),
            State::EscapeIntermediate => match byte {
                0x20..=0x2F => self.intermediates.push(byte),
                _ => {
                    handler.esc_dispatch(&self.intermediates, byte);
                    self.enter_ground();
                }
            },
            State::CsiEntry => {
                self.raw.push(byte);
                match byte {
                    0x30..=0x39 | b';' | b':' => {
                        self.param_byte(byte);
                        self.state = State::CsiParam;
                    }
                    0x3C..=0x3F => {
                        self.private = Some(byte);
                        self.state = State::CsiParam;
                    }
                    0x20..=0x2F => {
                        self.intermediates.push(byte);
                        self.state = State::CsiIntermediate;
                    }
                    0x40..=0x7E => self.dispatch_csi(byte, handler),
                    _ => self.state = State::CsiIgnore,
                }
            }
            State::CsiParam => {
                self.raw.push(byte);
                match byte {
                    0x30..=0x39 | b';' | b':' => self.param_byte(byte),
                    0x20..=0x2F => {
                        self.intermediates.push(byte);
                        self.state = State::CsiIntermediate;
                    }
                    0x3C..=0x3F => self.state = State::CsiIgnore,
                    0x40..=0x7E => self.dispatch_csi(byte, handler),
                    _ => self.state = State::CsiIgnore,
                }
            }
            State::CsiIntermediate => {
                self.raw.push(byte);
                match byte {
                    0x20..=0x2F => self.intermediates.push(byte),
                    0x40..=0x7E => self.dispatch_csi(byte, handler),
                    _ => self.state = State::CsiIgnore,
                }
            }
            State::CsiIgnore => {
                if (0x40..=0x7E).contains(&byte) {
                    debug!("malformed CSI discarded");
                    self.enter_ground();
                }
            }
            State::OscString => self.push_string_byte(byte),
            State::DcsEntry => match byte {
                0x30..=0x39 | b';' | b':' => {
                    self.param_byte(byte);
                    self.state = State::DcsParam;
                }
                0x3C..=0x3F => {
                    self.private = Some(byte);
                    self.state = State::DcsParam;
                }
                0x20..=0x2F => {
                    self.intermediates.push(byte);
                    self.state = State::DcsIntermediate;
                }
                0x40..=0x7E => self.enter_dcs_passthrough(byte),
                _ => self.state = State::DcsIgnore,
            },
            State::DcsParam => match byte {
                0x30..=0x39 | b';' | b':' => self.param_byte(byte),
                0x20..=0x2F => {
                    self.intermediates.push(byte);
                    self.state = State::DcsIntermediate;
                }
                0x40..=0x7E => self.enter_dcs_passthrough(byte),
                _ => self.state = State::DcsIgnore,
            },
            State::DcsIntermediate => match byte {
                0x20..=0x2F => self.intermediates.push(byte),
                0x40..=0x7E => self.enter_dcs_passthrough(byte),
                _ => self.state = State::DcsIgnore,
            },
            State::DcsPassthrough => self.push_string_byte(byte),
            State::DcsIgnore | State::SosPmApcString => {}
        }
    }

    fn escape_byte(&mut self, byte: u8, handler: &mut dyn ParserHandlers) {
        match byte {
            b'[' => {
                self.clear_collect();
                self.raw.clear();
                self.raw.extend_from_slice(&[ESC, b'[']);
                self.state = State::CsiEntry;
            }
            b']' => {
                self.clear_collect();
                self.osc_buf.clear();
                self.state = State::OscString;
            }
            b'P' => {
                self.clear_collect();
                self.dcs_data.clear();
                self.dcs_head = None;
                self.state = State::DcsEntry;
            }
            b'X' | b'^' | b'_' => {
                self.clear_collect();
                self.state = State::SosPmApcString;
            }
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = State::EscapeIntermediate;
            }
            0x30..=0x7E => {
                handler.esc_dispatch(&self.intermediates, byte);
                self.enter_ground();
            }
            _ => self.enter_ground(),
        }
    }

    fn param_byte(&mut self, byte: u8) {
        self.params_seen = true;
        match byte {
            b'0'..=b'9' => {
                let digit = u32::from(byte - b'0');
                let value = self.cur_value.unwrap_or(0);
                // Clamp at u16::MAX; overflow is silently ignored.
                self.cur_value = Some((value.saturating_mul(10).saturating_add(digit))
                    .min(u32::from(u16::MAX)));
            }
            b':' => self.finish_component(),
            b';' => {
                self.finish_component();
                self.finish_group();
            }
            _ => {}
        }
    }

    fn finish_component(&mut self) {
        let param = match self.cur_value.take() {
            Some(v) => Param::Value(v as u16),
            None => Param::Default,
        };
        self.cur_group.push(param);
    }

    fn finish_group(&mut self) {
        let group = std::mem::take(&mut self.cur_group);
        self.param_groups.push(group);
    }

    fn take_params(&mut self) -> Params {
        if self.params_seen {
            self.finish_component();
            self.finish_group();
        }
        Params::from_groups(std::mem::take(&mut self.param_groups))
    }

    fn dispatch_csi(&mut self, final_byte: u8, handler: &mut dyn ParserHandlers) {
        let params = self.take_params();
        let is_rpc = self.rpc_enabled
            && self.private == Some(b'>')
            && matches!(final_byte, b'F' | b'Q' | b'R' | b'E');

        if is_rpc {
            let seq = RpcSequence {
                params,
                final_byte,
                raw: std::mem::take(&mut self.raw),
            };
            trace!(final_byte = %(final_byte as char), "siphoning private CSI to RPC");
            handler.rpc_dispatch(&seq);
        } else {
            let csi = CsiDispatch {
                private: self.private,
                params,
                intermediates: std::mem::take(&mut self.intermediates),
                final_byte,
            };
            handler.csi_dispatch(&csi);
        }
        self.enter_ground();
    }

    fn enter_dcs_passthrough(&mut self, final_byte: u8) {
        let params = self.take_params();
        self.dcs_head = Some((
            self.private,
            params,
            std::mem::take(&mut self.intermediates),
            final_byte,
        ));
        self.state = State::DcsPassthrough;
    }

    fn terminate_string(&mut self, handler: &mut dyn ParserHandlers, bell: bool) {
        match self.state {
            State::OscString => {
                let data = std::mem::take(&mut self.osc_buf);
                handler.osc_dispatch(&data, bell);
            }
            State::DcsPassthrough => {
                if let Some((private, params, intermediates, final_byte)) = self.dcs_head.take() {
                    let dcs = DcsDispatch {
                        private,
                        params,
                        intermediates,
                        final_byte,
                        data: std::mem::take(&mut self.dcs_data),
                    };
                    handler.dcs_dispatch(&dcs);
                }
            }
            State::DcsIgnore | State::SosPmApcString => {}
            _ => {}
        }
        self.enter_ground();
    }

    fn push_string_byte(&mut self, byte: u8) {
        let buf = match self.state {
            State::OscString => &mut self.osc_buf,
            State::DcsPassthrough => &mut self.dcs_data,
            _ => return,
        };
        if buf.len() < MAX_STRING_LEN {
            buf.push(byte);
        }
    }

    fn push_string_chars(&mut self, ch: char) {
        let mut utf8 = [0u8; 4];
        for &b in ch.encode_utf8(&mut utf8).as_bytes() {
            self.push_string_byte(b);
        }
    }

    fn clear_collect(&mut self) {
        self.private = None;
        self.intermediates.clear();
        self.param_groups.clear();
        self.cur_group.clear();
        self.cur_value = None;
        self.params_seen = false;
    }

    fn enter_escape(&mut self) {
        self.clear_collect();
        self.state = State::Escape;
    }

    fn enter_ground(&mut self) {
        self.clear_collect();
        self.raw.clear();
        self.osc_buf.clear();
        self.dcs_data.clear();
        self.dcs_head = None;
        self.st_pending = false;
        self.state = State::Ground;
    }
}
