//! ToUnicode CMap parsing.
//!
//! A /ToUnicode entry points at a CMap stream mapping character codes to
//! Unicode. The subset that matters for text extraction is `bfchar`
//! (single mappings) and `bfrange` (range mappings with either an
//! incrementing start value or an explicit destination array), plus
//! `codespacerange` for the source code byte width. Destination values
//! are UTF-16BE and may expand one code to several scalars.

use super::error::PDFResult;
use super::lexer::{Lexer, Token};
use super::stream::Stream;
use rustc_hash::FxHashMap;

/// Character-code to Unicode mapping extracted from a CMap stream.
pub struct CMap {
    /// code → UTF-8 destination
    map: FxHashMap<u32, String>,

    /// Widest source code seen, in bytes (1-4)
    code_width: usize,
}

impl CMap {
    pub fn new() -> Self {
        CMap {
            map: FxHashMap::default(),
            code_width: 1,
        }
    }

    /// Parses a decompressed CMap stream.
    ///
    /// Tokens outside the recognized sections (the PostScript wrapper,
    /// `usecmap`, CID operators) are skipped without error.
    pub fn parse(data: &[u8]) -> PDFResult<Self> {
        let mut cmap = CMap::new();
        let mut lexer = Lexer::new(Stream::from_bytes(data.to_vec()));

        loop {
            let token = match lexer.get_token() {
                Ok(Token::EOF) => break,
                Ok(token) => token,
                // Stray bytes in the wrapper; the lexer has advanced past them
                Err(_) => continue,
            };

            match token {
                Token::Command(cmd) if cmd == "begincodespacerange" => {
                    cmap.parse_codespace(&mut lexer);
                }
                Token::Command(cmd) if cmd == "beginbfchar" => {
                    cmap.parse_bfchar(&mut lexer);
                }
                Token::Command(cmd) if cmd == "beginbfrange" => {
                    cmap.parse_bfrange(&mut lexer);
                }
                _ => {}
            }
        }

        Ok(cmap)
    }

    /// Reads `<lo> <hi>` pairs up to `endcodespacerange`, tracking the
    /// source byte width.
    fn parse_codespace(&mut self, lexer: &mut Lexer) {
        loop {
            match lexer.get_token() {
                Ok(Token::HexString(bytes)) => {
                    self.code_width = self.code_width.max(bytes.len().clamp(1, 4));
                }
                Ok(Token::Command(cmd)) if cmd == "endcodespacerange" => break,
                Ok(Token::EOF) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }

    /// Reads `<src> <dst>` pairs up to `endbfchar`.
    fn parse_bfchar(&mut self, lexer: &mut Lexer) {
        loop {
            let src = match lexer.get_token() {
                Ok(Token::HexString(bytes)) => bytes,
                Ok(Token::Command(cmd)) if cmd == "endbfchar" => break,
                Ok(Token::EOF) | Err(_) => break,
                Ok(_) => continue,
            };
            let dst = match lexer.get_token() {
                Ok(Token::HexString(bytes)) => bytes,
                _ => continue,
            };

            self.code_width = self.code_width.max(src.len().clamp(1, 4));
            self.map.insert(code_from_bytes(&src), utf16be_to_string(&dst));
        }
    }

    /// Reads `<lo> <hi> <dst>` or `<lo> <hi> [<dst> ...]` triples up to
    /// `endbfrange`.
    fn parse_bfrange(&mut self, lexer: &mut Lexer) {
        loop {
            let lo = match lexer.get_token() {
                Ok(Token::HexString(bytes)) => bytes,
                Ok(Token::Command(cmd)) if cmd == "endbfrange" => break,
                Ok(Token::EOF) | Err(_) => break,
                Ok(_) => continue,
            };
            let hi = match lexer.get_token() {
                Ok(Token::HexString(bytes)) => bytes,
                _ => continue,
            };

            self.code_width = self.code_width.max(lo.len().clamp(1, 4));
            let lo = code_from_bytes(&lo);
            let hi = code_from_bytes(&hi);
            if hi < lo || hi - lo > 0xFFFF {
                // Corrupt range; skip the destination token and move on
                let _ = lexer.get_token();
                continue;
            }

            match lexer.get_token() {
                Ok(Token::HexString(dst)) => {
                    // Incrementing destination: bump the last UTF-16 unit
                    let mut units: Vec<u16> = dst
                        .chunks(2)
                        .map(|c| {
                            if c.len() == 2 {
                                u16::from_be_bytes([c[0], c[1]])
                            } else {
                                c[0] as u16
                            }
                        })
                        .collect();
                    if units.is_empty() {
                        continue;
                    }
                    for code in lo..=hi {
                        self.map
                            .insert(code, String::from_utf16_lossy(&units));
                        let last = units.len() - 1;
                        units[last] = units[last].wrapping_add(1);
                    }
                }
                Ok(Token::ArrayStart) => {
                    let mut code = lo;
                    loop {
                        match lexer.get_token() {
                            Ok(Token::HexString(dst)) => {
                                if code <= hi {
                                    self.map.insert(code, utf16be_to_string(&dst));
                                    code += 1;
                                }
                            }
                            Ok(Token::ArrayEnd) | Ok(Token::EOF) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Looks up the Unicode expansion of a character code.
    #[inline(always)]
    pub fn lookup(&self, code: u32) -> Option<&str> {
        self.map.get(&code).map(String::as_str)
    }

    /// Widest source code seen, in bytes.
    pub fn code_width(&self) -> usize {
        self.code_width
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for CMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Big-endian code value from raw hex-string bytes.
fn code_from_bytes(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

/// Decodes UTF-16BE bytes, surrogate pairs included.
pub fn utf16be_to_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|c| {
            if c.len() == 2 {
                u16::from_be_bytes([c[0], c[1]])
            } else {
                c[0] as u16
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bfchar() {
        let cmap = CMap::parse(b"2 beginbfchar\n<03> <0020>\n<05> <0041>\nendbfchar\n").unwrap();
        assert_eq!(cmap.lookup(3), Some(" "));
        assert_eq!(cmap.lookup(5), Some("A"));
        assert_eq!(cmap.lookup(4), None);
        assert_eq!(cmap.len(), 2);
    }

    #[test]
    fn test_parse_bfrange_incrementing() {
        let cmap = CMap::parse(b"1 beginbfrange\n<0010> <0012> <0041>\nendbfrange\n").unwrap();
        assert_eq!(cmap.lookup(0x10), Some("A"));
        assert_eq!(cmap.lookup(0x11), Some("B"));
        assert_eq!(cmap.lookup(0x12), Some("C"));
        assert_eq!(cmap.lookup(0x13), None);
        assert_eq!(cmap.code_width(), 2);
    }

    #[test]
    fn test_parse_bfrange_array_destination() {
        let cmap =
            CMap::parse(b"1 beginbfrange\n<01> <03> [<0058> <0059> <005A>]\nendbfrange\n").unwrap();
        assert_eq!(cmap.lookup(1), Some("X"));
        assert_eq!(cmap.lookup(2), Some("Y"));
        assert_eq!(cmap.lookup(3), Some("Z"));
    }

    #[test]
    fn test_multi_scalar_destination() {
        // One code expanding to an "fi" ligature replacement
        let cmap = CMap::parse(b"1 beginbfchar\n<0C> <00660069>\nendbfchar\n").unwrap();
        assert_eq!(cmap.lookup(0x0C), Some("fi"));
    }

    #[test]
    fn test_surrogate_pair_destination() {
        // U+1D11E (musical symbol) as a UTF-16BE surrogate pair
        let cmap = CMap::parse(b"1 beginbfchar\n<07> <D834DD1E>\nendbfchar\n").unwrap();
        assert_eq!(cmap.lookup(7), Some("\u{1D11E}"));
    }

    #[test]
    fn test_codespace_sets_width() {
        let cmap = CMap::parse(
            b"1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n\
              1 beginbfchar\n<0041> <0041>\nendbfchar\n",
        )
        .unwrap();
        assert_eq!(cmap.code_width(), 2);
        assert_eq!(cmap.lookup(0x41), Some("A"));
    }

    #[test]
    fn test_full_postscript_wrapper() {
        let data: &[u8] = b"/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def
/CMapName /Adobe-Identity-UCS def
/CMapType 2 def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
2 beginbfchar
<0003> <0020>
<0005> <0041>
endbfchar
1 beginbfrange
<0010> <0020> <0061>
endbfrange
endcmap
CMapName currentdict /CMap defineresource pop
end
end
";
        let cmap = CMap::parse(data).unwrap();
        assert_eq!(cmap.lookup(3), Some(" "));
        assert_eq!(cmap.lookup(5), Some("A"));
        assert_eq!(cmap.lookup(0x10), Some("a"));
        assert_eq!(cmap.lookup(0x20), Some("q"));
        assert_eq!(cmap.len(), 19);
    }

    #[test]
    fn test_empty_and_garbage_input() {
        assert!(CMap::parse(b"").unwrap().is_empty());
        assert!(CMap::parse(b"not a cmap at all )({}").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_range_skipped() {
        // hi < lo: the range is ignored but parsing continues
        let cmap = CMap::parse(
            b"2 beginbfrange\n<10> <05> <0041>\n<20> <21> <0058>\nendbfrange\n",
        )
        .unwrap();
        assert_eq!(cmap.lookup(0x10), None);
        assert_eq!(cmap.lookup(0x20), Some("X"));
        assert_eq!(cmap.lookup(0x21), Some("Y"));
    }

    #[test]
    fn test_utf16be_helper() {
        assert_eq!(utf16be_to_string(&[0x00, 0x43]), "C");
        assert_eq!(
            utf16be_to_string(&[0x00, 0x43, 0x00, 0x61, 0x00, 0x66, 0x00, 0xE9]),
            "Café"
        );
    }
}
