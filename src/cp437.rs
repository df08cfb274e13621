//! Code page 437, the historical ZIP filename encoding.
//!
//! The APPNOTE mandates CP437 for member names without the UTF-8 flag, so it
//! is the unconditional last resort of the encoding resolver. `encoding_rs`
//! does not ship this code page; the table below covers the high half, and
//! the low half passes through as ASCII.

/// Unicode mapping for bytes 0x80..=0xFF.
const HIGH_HALF: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', // 0x80
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', // 0x90
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', // 0xA0
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', // 0xB0
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', // 0xC0
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', // 0xD0
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', // 0xE0
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}', // 0xF0
];

/// Decode a byte string as CP437. Total: every byte maps to a character,
/// so this never fails.
pub fn decode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                HIGH_HALF[(b - 0x80) as usize]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        assert_eq!(decode(b"readme.txt"), "readme.txt");
    }

    #[test]
    fn high_bytes_map_to_table() {
        assert_eq!(decode(&[0x80, 0x81, 0xE1]), "Çüß");
        assert_eq!(decode(&[0xFF]), "\u{a0}");
    }

    #[test]
    fn every_byte_decodes() {
        let all: Vec<u8> = (0u8..=255).collect();
        assert_eq!(decode(&all).chars().count(), 256);
    }
}
