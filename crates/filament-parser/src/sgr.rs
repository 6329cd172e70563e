//! Decomposition of SGR parameter lists into typed attribute updates,
//! and the inverse encoding used for response synthesis and testing.

use filament_common::types::{Color, SgrAttribute};
use tracing::debug;

use crate::{Param, Params};

/// Reduce an SGR parameter list to typed updates.
///
/// Both sub-parameter forms are accepted for extended colors:
/// `38;5;n` / `38:5:n` and `38;2;r;g;b` / `38:2::r:g:b` (and the same
/// for 48 and 58). An empty list is a reset.
pub fn parse(params: &Params) -> Vec<SgrAttribute> {
    if params.is_empty() {
        return vec![SgrAttribute::Reset];
    }

    let mut attrs = Vec::new();
    let mut i = 0;
    while i < params.len() {
        let group = params.group(i).unwrap_or(&[]);
        let code = group.first().copied().unwrap_or(Param::Default).or(0);
        let mut consumed = 1;

        match code {
            0 => attrs.push(SgrAttribute::Reset),
            1 => attrs.push(SgrAttribute::Bold),
            2 => attrs.push(SgrAttribute::Dim),
            3 => attrs.push(SgrAttribute::Italic),
            4 => attrs.push(SgrAttribute::Underline),
            5 | 6 => attrs.push(SgrAttribute::Blink),
            7 => attrs.push(SgrAttribute::Reverse),
            8 => attrs.push(SgrAttribute::Hidden),
            9 => attrs.push(SgrAttribute::Strikethrough),

            22 => attrs.push(SgrAttribute::NoBoldDim),
            23 => attrs.push(SgrAttribute::NoItalic),
            24 => attrs.push(SgrAttribute::NoUnderline),
            25 => attrs.push(SgrAttribute::NoBlink),
            27 => attrs.push(SgrAttribute::NoReverse),
            28 => attrs.push(SgrAttribute::NoHidden),
            29 => attrs.push(SgrAttribute::NoStrikethrough),

            30..=37 => attrs.push(SgrAttribute::Foreground(Color::Indexed(code as u8 - 30))),
            39 => attrs.push(SgrAttribute::Foreground(Color::Default)),
            40..=47 => attrs.push(SgrAttribute::Background(Color::Indexed(code as u8 - 40))),
            49 => attrs.push(SgrAttribute::Background(Color::Default)),
            59 => attrs.push(SgrAttribute::UnderlineColor(Color::Default)),

            90..=97 => {
                attrs.push(SgrAttribute::Foreground(Color::Indexed(code as u8 - 90 + 8)))
            }
            100..=107 => {
                attrs.push(SgrAttribute::Background(Color::Indexed(code as u8 - 100 + 8)))
            }

            38 | 48 | 58 => {
                let (color, extra_groups) = if group.len() > 1 {
                    (extended_color(&group[1..]), 0)
                } else {
                    extended_color_from_groups(params, i + 1)
                };
                consumed += extra_groups;
                if let Some(color) = color {
                    attrs.push(match code {
                        38 => SgrAttribute::Foreground(color),
                        48 => SgrAttribute::Background(color),
                        _ => SgrAttribute::UnderlineColor(color),
                    });
                }
            }

            other => debug!(param = other, "unhandled SGR parameter"),
        }

        i += consumed;
    }

    attrs
}

/// Parse the colon sub-parameter tail of an extended color:
/// `5:n` or `2:[colorspace:]r:g:b`.
fn extended_color(args: &[Param]) -> Option<Color> {
    match args.first().copied().map(|p| p.or(0)) {
        Some(5) => args.get(1).map(|p| Color::Indexed(p.or(0).min(255) as u8)),
        Some(2) => {
            // `2::r:g:b` carries an empty colorspace component; `2:r:g:b`
            // omits it entirely.
            let rgb: &[Param] = match args.len() {
                0..=3 => return None,
                4 => &args[1..4],
                _ => &args[2..5],
            };
            Some(Color::Rgb(
                rgb[0].or(0).min(255) as u8,
                rgb[1].or(0).min(255) as u8,
                rgb[2].or(0).min(255) as u8,
            ))
        }
        _ => None,
    }
}

/// Parse the semicolon form of an extended color starting at group
/// `start`: `5;n` or `2;r;g;b`. Returns the color and groups consumed.
fn extended_color_from_groups(params: &Params, start: usize) -> (Option<Color>, usize) {
    match params.get(start).value() {
        Some(5) => {
            let n = params.get_or(start + 1, 0).min(255) as u8;
            if start + 1 < params.len() {
                (Some(Color::Indexed(n)), 2)
            } else {
                (None, params.len() - start)
            }
        }
        Some(2) => {
            if start + 3 < params.len() {
                let r = params.get_or(start + 1, 0).min(255) as u8;
                let g = params.get_or(start + 2, 0).min(255) as u8;
                let b = params.get_or(start + 3, 0).min(255) as u8;
                (Some(Color::Rgb(r, g, b)), 4)
            } else {
                (None, params.len() - start)
            }
        }
        _ => (None, 1),
    }
}

/// Encode attribute updates back into a semicolon-form parameter list.
///
/// Canonicalizations: 16-color values use 30-37/90-97 (and the 40/100
/// background rows), larger indices use `38;5;n`, truecolor uses
/// `38;2;r;g;b`, defaults use 39/49/59.
pub fn encode(attrs: &[SgrAttribute]) -> Vec<u16> {
    let mut out = Vec::new();
    for attr in attrs {
        match *attr {
            SgrAttribute::Reset => out.push(0),
            SgrAttribute::Bold => out.push(1),
            SgrAttribute::Dim => out.push(2),
            SgrAttribute::Italic => out.push(3),
            SgrAttribute::Underline => out.push(4),
            SgrAttribute::Blink => out.push(5),
            SgrAttribute::Reverse => out.push(7),
            SgrAttribute::Hidden => out.push(8),
            SgrAttribute::Strikethrough => out.push(9),
            SgrAttribute::NoBoldDim => out.push(22),
            SgrAttribute::NoItalic => out.push(23),
            SgrAttribute::NoUnderline => out.push(24),
            SgrAttribute::NoBlink => out.push(25),
            SgrAttribute::NoReverse => out.push(27),
            SgrAttribute::NoHidden => out.push(28),
            SgrAttribute::NoStrikethrough => out.push(29),
            SgrAttribute::Foreground(color) => encode_color(&mut out, color, 30, 90, 38, 39),
            SgrAttribute::Background(color) => encode_color(&mut out, color, 40, 100, 48, 49),
            SgrAttribute::UnderlineColor(color) => match color {
                Color::Default => out.push(59),
                Color::Indexed(n) => out.extend_from_slice(&[58, 5, u16::from(n)]),
                Color::Rgb(r, g, b) => out.extend_from_slice(&[
                    58,
                    2,
                    u16::from(r),
                    u16::from(g),
                    u16::from(b),
                ]),
            },
        }
    }
    out
}

fn encode_color(out: &mut Vec<u16>, color: Color, base: u16, bright: u16, ext: u16, default: u16) {
    match color {
        Color::Default => out.push(default),
        Color::Indexed(n) if n < 8 => out.push(base + u16::from(n)),
        Color::Indexed(n) if n < 16 => out.push(bright + u16::from(n) - 8),
        Color::Indexed(n) => out.extend_from_slice(&[ext, 5, u16::from(n)]),
        Color::Rgb(r, g, b) => {
            out.extend_from_slice(&[ext, 2, u16::from(r), u16::from(g), u16::from(b)])
        }
    }
}
