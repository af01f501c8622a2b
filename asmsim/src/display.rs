use crate::bits::{BitValue, join_all};
use crate::state::SymbolicState;
use asmsim_isa::Register;

/// Renders bits (least significant first) as hex. A nibble that is not fully concrete shows the
/// join of its non-concrete bits: `U`, `?` or `X`.
pub fn bits_to_hex(bits: &[BitValue]) -> String {
    let mut out = String::from("0x");
    for nibble in bits.chunks(4).rev() {
        let value = nibble
            .iter()
            .enumerate()
            .try_fold(0u32, |acc, (i, b)| b.as_bool().map(|set| acc | (u32::from(set) << i)));
        match value.and_then(|v| char::from_digit(v, 16)) {
            Some(c) => out.push(c),
            None => {
                let unknown = nibble.iter().filter(|b| !b.is_concrete());
                out.push(join_all(unknown).map_or('?', |b| b.as_char()));
            }
        }
    }
    out
}

/// Renders bits (least significant first) as binary using `0`, `1`, `U`, `?` and `X`
pub fn bits_to_binary(bits: &[BitValue]) -> String {
    let mut out = String::from("0b");
    out.extend(bits.iter().rev().map(BitValue::as_char));
    out
}

/// `"<hex> = <binary>"` for a register in the given state, or an empty string when there is no
/// state
pub fn format_register(reg: Register, state: Option<&SymbolicState>) -> String {
    let Some(state) = state else {
        return String::new();
    };
    let bits = state.register_bits(reg);
    format!("{} = {}", bits_to_hex(bits), bits_to_binary(bits))
}
