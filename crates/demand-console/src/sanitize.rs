//! Terminal-safe rendering of text that came from the backend.
//!
//! Response payloads, error details and CSV cells are drawn straight into the
//! console, so escape sequences and bidi overrides are removed first.

const MAX_CELL_CHARS: usize = 256;
const MAX_BLOCK_LINES: usize = 2000;
const TRUNCATED: &str = "...[truncated]";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scan {
    Text,
    Escape,
    // ESC [ ... final byte
    Csi,
    // ESC ] ... BEL | ESC \
    Osc { saw_esc: bool },
    // DCS/SOS/PM/APC ... ESC \
    String { saw_esc: bool },
}

struct Stripper {
    state: Scan,
}

impl Stripper {
    fn new() -> Self {
        Self { state: Scan::Text }
    }

    /// Returns the char to keep, if any.
    fn feed(&mut self, c: char) -> Option<char> {
        self.state = match self.state {
            Scan::Text => {
                if c == '\x1b' {
                    Scan::Escape
                } else {
                    return visible(c);
                }
            }
            Scan::Escape => match c {
                '[' => Scan::Csi,
                ']' => Scan::Osc { saw_esc: false },
                'P' | 'X' | '^' | '_' => Scan::String { saw_esc: false },
                _ => Scan::Text,
            },
            Scan::Csi if ('@'..='~').contains(&c) => Scan::Text,
            Scan::Csi => Scan::Csi,
            Scan::Osc { .. } if c == '\x07' => Scan::Text,
            Scan::Osc { saw_esc: true } if c == '\\' => Scan::Text,
            Scan::Osc { .. } => Scan::Osc { saw_esc: c == '\x1b' },
            Scan::String { saw_esc: true } if c == '\\' => Scan::Text,
            Scan::String { .. } => Scan::String { saw_esc: c == '\x1b' },
        };
        None
    }
}

fn visible(c: char) -> Option<char> {
    match c {
        '\t' => Some(' '),
        '\n' => Some('\n'),
        c if c.is_control() || is_bidi_control(c) => None,
        c => Some(c),
    }
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}')
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}

/// Single-line form for table cells and status lines.
pub fn sanitize_cell(input: &str) -> String {
    let mut s = Stripper::new();
    let mut out = String::new();
    for c in input.chars().filter_map(|c| s.feed(c)) {
        if out.chars().count() >= MAX_CELL_CHARS {
            out.push_str(TRUNCATED);
            break;
        }
        out.push(if c == '\n' { ' ' } else { c });
    }
    out
}

/// Multi-line form for the request and response panes; line breaks survive.
pub fn sanitize_block(input: &str) -> Vec<String> {
    let mut s = Stripper::new();
    let mut lines = vec![String::new()];
    for c in input.chars().filter_map(|c| s.feed(c)) {
        if c == '\n' {
            if lines.len() >= MAX_BLOCK_LINES {
                lines.push(TRUNCATED.to_string());
                break;
            }
            lines.push(String::new());
        } else if let Some(last) = lines.last_mut() {
            last.push(c);
        }
    }
    lines
}
