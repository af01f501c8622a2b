use crate::mnemonic::Mnemonic;
use crate::operand::is_identifier;
use serde::{Deserialize, Serialize};

/// The result of tokenizing a single source line.
///
/// Tokenizing never fails: anything that does not look like an instruction ends up with
/// [`Mnemonic::None`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ParsedLine {
    pub label: Option<String>,
    pub mnemonic: Mnemonic,
    /// The mnemonic as written, lowercased
    pub mnemonic_text: String,
    pub args: Vec<String>,
}

impl ParsedLine {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.mnemonic_text.is_empty()
    }
}

const PREFIXES: [&str; 5] = ["lock", "rep", "repe", "repne", "repz"];

/// Splits a line into label, mnemonic and comma separated arguments. Comments start at `;` or `#`.
pub fn parse_line(text: &str) -> ParsedLine {
    let code = match text.find([';', '#']) {
        Some(idx) => &text[..idx],
        None => text,
    };
    let mut rest = code.trim();
    let mut parsed = ParsedLine::default();

    if let Some((head, tail)) = rest.split_once(':') {
        let head = head.trim();
        if is_identifier(head) && !head.contains(char::is_whitespace) {
            parsed.label = Some(head.to_string());
            rest = tail.trim();
        }
    }
    if rest.is_empty() {
        return parsed;
    }

    let mut words = rest.splitn(2, char::is_whitespace);
    let mut mnemonic = words.next().unwrap_or_default().to_ascii_lowercase();
    let mut operands = words.next().unwrap_or_default().trim();
    if PREFIXES.contains(&mnemonic.as_str()) && !operands.is_empty() {
        let mut inner = operands.splitn(2, char::is_whitespace);
        mnemonic = inner.next().unwrap_or_default().to_ascii_lowercase();
        operands = inner.next().unwrap_or_default().trim();
    }

    parsed.mnemonic = Mnemonic::parse(&mnemonic);
    parsed.mnemonic_text = mnemonic;
    parsed.args = split_args(operands);
    parsed
}

fn split_args(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || !args.is_empty() {
        args.push(current.trim().to_string());
    }
    args
}
