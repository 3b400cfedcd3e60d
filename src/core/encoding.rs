//! Per-font code → Unicode mapping.
//!
//! Builds a `FontEncoding` for each font dictionary in priority order:
//! a /ToUnicode CMap wins outright; Type0 fonts with /Identity-H (or -V)
//! read two-byte CIDs; everything else starts from the base encoding
//! named by /Encoding (WinAnsi, MacRoman, Standard) and applies
//! /Differences through the Adobe Glyph List.

use super::cmap::{CMap, utf16be_to_string};
use super::decode;
use super::error::{ErrorSink, PDFError, PDFResult};
use super::parser::{Dict, PDFObject};
use super::xref::XRef;
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Width assumed for glyphs without an entry in /Widths (1/1000 em).
const DEFAULT_SIMPLE_WIDTH: f64 = 500.0;
const DEFAULT_CID_WIDTH: f64 = 1000.0;

/// A font's resolved code → text mapping.
///
/// Exactly one of the two maps is in play: `single_byte` for simple fonts,
/// `cid_map` for composite (two-byte) fonts. `wmode` selects which text
/// matrix axis drives line breaks in the interpreter.
pub struct FontEncoding {
    /// Writing mode: 0 horizontal, 1 vertical
    pub wmode: u8,

    /// Codes are two-byte big-endian CIDs
    pub is_cid: bool,

    /// Per-code expansions for single-byte fonts (256 entries)
    single_byte: Option<Vec<Option<String>>>,

    /// CID → text for composite fonts; None means identity
    cid_map: Option<CMap>,

    /// Glyph widths in 1/1000 em, keyed by code
    widths: FxHashMap<u32, f64>,
}

impl FontEncoding {
    /// An encoding that reads bytes as StandardEncoding.
    pub fn fallback() -> Self {
        FontEncoding {
            wmode: 0,
            is_cid: false,
            single_byte: Some(base_table(BaseEncoding::Standard)),
            cid_map: None,
            widths: FxHashMap::default(),
        }
    }

    /// Builds the encoding for a font dictionary.
    pub fn build(font_dict: &Dict, xref: &mut XRef) -> PDFResult<FontEncoding> {
        let subtype = font_dict.get("Subtype").and_then(|s| s.as_name());

        let to_unicode = match font_dict.get("ToUnicode") {
            Some(obj) => match xref.fetch_if_ref(obj)? {
                PDFObject::Stream { dict, data, .. } => {
                    let payload = decode::decode_stream_object(&dict, &data)?;
                    let cmap = CMap::parse(&payload)?;
                    if cmap.is_empty() { None } else { Some(cmap) }
                }
                _ => None,
            },
            None => None,
        };

        if subtype == Some("Type0") {
            return Self::build_composite(font_dict, xref, to_unicode);
        }

        Self::build_simple(font_dict, xref, to_unicode)
    }

    /// Composite (CID) fonts: two-byte big-endian codes.
    ///
    /// With a ToUnicode CMap the CIDs go through it; without one codes map
    /// to themselves as code points.
    fn build_composite(
        font_dict: &Dict,
        xref: &mut XRef,
        to_unicode: Option<CMap>,
    ) -> PDFResult<FontEncoding> {
        let mut wmode = 0u8;

        match font_dict.get("Encoding").map(|e| xref.fetch_if_ref(e)) {
            Some(Ok(PDFObject::Name(name))) => {
                if name.ends_with("-V") {
                    wmode = 1;
                } else if !name.ends_with("-H") {
                    log::debug!("composite font with /Encoding /{}; reading as Identity", name);
                }
            }
            Some(Ok(PDFObject::Stream { dict, .. })) => {
                if let Some(w) = dict.get("WMode").and_then(|w| w.as_integer()) {
                    wmode = (w == 1) as u8;
                }
            }
            _ => {}
        }

        Ok(FontEncoding {
            wmode,
            is_cid: true,
            single_byte: None,
            cid_map: to_unicode,
            widths: FxHashMap::default(),
        })
    }

    /// Simple single-byte fonts.
    fn build_simple(
        font_dict: &Dict,
        xref: &mut XRef,
        to_unicode: Option<CMap>,
    ) -> PDFResult<FontEncoding> {
        let mut base = BaseEncoding::Standard;
        let mut differences: Option<PDFObject> = None;

        match font_dict.get("Encoding").map(|e| xref.fetch_if_ref(e)) {
            Some(Ok(PDFObject::Name(name))) => base = BaseEncoding::from_name(&name),
            Some(Ok(PDFObject::Dictionary(enc_dict))) => {
                if let Some(name) = enc_dict.get("BaseEncoding").and_then(|b| b.as_name()) {
                    base = BaseEncoding::from_name(name);
                }
                differences = enc_dict.get("Differences").cloned();
            }
            _ => {}
        }

        let mut table = base_table(base);

        if let Some(diff) = differences {
            apply_differences(&mut table, &diff, xref)?;
        }

        // ToUnicode supersedes whatever the base encoding says
        if let Some(cmap) = &to_unicode {
            for code in 0u32..256 {
                if let Some(text) = cmap.lookup(code) {
                    table[code as usize] = Some(text.to_string());
                }
            }
        }

        // /Widths is declared lazily with the encoding; only bounds
        // extraction reads it
        let mut widths = FxHashMap::default();
        if let (Some(first), Some(PDFObject::Array(arr))) = (
            font_dict.get("FirstChar").and_then(|f| f.as_integer()),
            font_dict.get("Widths").map(|w| xref.fetch_if_ref(w)).transpose()?,
        ) {
            for (i, w) in arr.iter().enumerate() {
                if let Some(width) = w.as_number() {
                    widths.insert(first as u32 + i as u32, width);
                }
            }
        }

        Ok(FontEncoding {
            wmode: 0,
            is_cid: false,
            single_byte: Some(table),
            cid_map: None,
            widths,
        })
    }

    /// Walks the codes of a shown string, yielding each glyph's text and
    /// its width in 1/1000 em.
    pub fn for_each_glyph(&self, bytes: &[u8], mut f: impl FnMut(&str, f64)) {
        let mut char_buf = [0u8; 4];

        if self.is_cid {
            let mut i = 0;
            while i < bytes.len() {
                let code = if i + 1 < bytes.len() {
                    ((bytes[i] as u32) << 8) | bytes[i + 1] as u32
                } else {
                    bytes[i] as u32
                };
                i += 2;

                let width = self
                    .widths
                    .get(&code)
                    .copied()
                    .unwrap_or(DEFAULT_CID_WIDTH);

                match self.cid_map.as_ref().and_then(|m| m.lookup(code)) {
                    Some(text) => f(text, width),
                    None => {
                        // Identity: the code is the code point
                        if let Some(ch) = char::from_u32(code) {
                            f(ch.encode_utf8(&mut char_buf), width);
                        }
                    }
                }
            }
            return;
        }

        let table = self.single_byte.as_deref().unwrap_or(&[]);
        for &byte in bytes {
            let code = byte as u32;
            let width = self
                .widths
                .get(&code)
                .copied()
                .unwrap_or(DEFAULT_SIMPLE_WIDTH);

            match table.get(byte as usize).and_then(|e| e.as_deref()) {
                Some(text) => f(text, width),
                None => {
                    // Unmapped printable codes read as Latin-1
                    if byte >= 0x20 {
                        f((byte as char).encode_utf8(&mut char_buf), width);
                    }
                }
            }
        }
    }

    /// Decodes a whole shown string into `out`.
    pub fn decode_into(&self, bytes: &[u8], out: &mut String) {
        self.for_each_glyph(bytes, |text, _| out.push_str(text));
    }
}

/// Base encodings named by /Encoding or /BaseEncoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BaseEncoding {
    Standard,
    WinAnsi,
    MacRoman,
}

impl BaseEncoding {
    fn from_name(name: &str) -> Self {
        match name {
            "WinAnsiEncoding" => BaseEncoding::WinAnsi,
            "MacRomanEncoding" => BaseEncoding::MacRoman,
            // MacExpert holds small caps and ligature variants; Standard
            // is the usable text approximation
            "MacExpertEncoding" | "StandardEncoding" => BaseEncoding::Standard,
            other => {
                log::debug!("unknown base encoding /{}; using Standard", other);
                BaseEncoding::Standard
            }
        }
    }
}

/// Builds the 256-entry table for a base encoding.
fn base_table(base: BaseEncoding) -> Vec<Option<String>> {
    let mut table: Vec<Option<String>> = vec![None; 256];
    for code in 0u16..256 {
        let ch = match base {
            BaseEncoding::WinAnsi => winansi_char(code as u8),
            BaseEncoding::MacRoman => macroman_char(code as u8),
            BaseEncoding::Standard => standard_char(code as u8),
        };
        if let Some(ch) = ch {
            table[code as usize] = Some(ch.to_string());
        }
    }
    table
}

/// Applies a /Differences array: runs of glyph names re-mapping codes
/// starting at each integer marker.
fn apply_differences(
    table: &mut [Option<String>],
    differences: &PDFObject,
    xref: &mut XRef,
) -> PDFResult<()> {
    let resolved = xref.fetch_if_ref(differences)?;
    let arr = match resolved.as_array() {
        Some(arr) => arr,
        None => return Ok(()),
    };

    let mut code: usize = 0;
    for item in arr {
        match &**item {
            PDFObject::Integer(n) => code = (*n).max(0) as usize,
            PDFObject::Name(glyph) => {
                if code < 256 {
                    table[code] = glyph_to_unicode(glyph).map(|ch| ch.to_string());
                    code += 1;
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// WinAnsiEncoding (CP1252).
fn winansi_char(code: u8) -> Option<char> {
    match code {
        0x20..=0x7E => Some(code as char),
        0x80 => Some('€'),
        0x82 => Some('‚'),
        0x83 => Some('ƒ'),
        0x84 => Some('„'),
        0x85 => Some('…'),
        0x86 => Some('†'),
        0x87 => Some('‡'),
        0x88 => Some('ˆ'),
        0x89 => Some('‰'),
        0x8A => Some('Š'),
        0x8B => Some('‹'),
        0x8C => Some('Œ'),
        0x8E => Some('Ž'),
        0x91 => Some('\u{2018}'),
        0x92 => Some('\u{2019}'),
        0x93 => Some('\u{201C}'),
        0x94 => Some('\u{201D}'),
        0x95 => Some('•'),
        0x96 => Some('–'),
        0x97 => Some('—'),
        0x98 => Some('˜'),
        0x99 => Some('™'),
        0x9A => Some('š'),
        0x9B => Some('›'),
        0x9C => Some('œ'),
        0x9E => Some('ž'),
        0x9F => Some('Ÿ'),
        0xA0..=0xFF => Some(code as char),
        _ => None,
    }
}

/// MacRomanEncoding.
fn macroman_char(code: u8) -> Option<char> {
    const HIGH: [char; 128] = [
        'Ä', 'Å', 'Ç', 'É', 'Ñ', 'Ö', 'Ü', 'á', 'à', 'â', 'ä', 'ã', 'å', 'ç', 'é', 'è', //
        'ê', 'ë', 'í', 'ì', 'î', 'ï', 'ñ', 'ó', 'ò', 'ô', 'ö', 'õ', 'ú', 'ù', 'û', 'ü', //
        '†', '°', '¢', '£', '§', '•', '¶', 'ß', '®', '©', '™', '´', '¨', '≠', 'Æ', 'Ø', //
        '∞', '±', '≤', '≥', '¥', 'µ', '∂', '∑', '∏', 'π', '∫', 'ª', 'º', 'Ω', 'æ', 'ø', //
        '¿', '¡', '¬', '√', 'ƒ', '≈', '∆', '«', '»', '…', '\u{00A0}', 'À', 'Ã', 'Õ', 'Œ',
        'œ', //
        '–', '—', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}', '÷', '◊', 'ÿ', 'Ÿ', '⁄', '€',
        '‹', '›', '\u{FB01}', '\u{FB02}', //
        '‡', '·', '‚', '„', '‰', 'Â', 'Ê', 'Á', 'Ë', 'È', 'Í', 'Î', 'Ï', 'Ì', 'Ó', 'Ô', //
        '\u{F8FF}', 'Ò', 'Ú', 'Û', 'Ù', 'ı', 'ˆ', '˜', '¯', '˘', '˙', '˚', '¸', '˝', '˛', 'ˇ',
    ];
    match code {
        0x20..=0x7E => Some(code as char),
        0x80..=0xFF => Some(HIGH[(code - 0x80) as usize]),
        _ => None,
    }
}

/// Adobe StandardEncoding.
fn standard_char(code: u8) -> Option<char> {
    match code {
        // ASCII except the typographic quotes
        0x27 => Some('\u{2019}'),
        0x60 => Some('\u{2018}'),
        0x20..=0x7E => Some(code as char),
        0xA1 => Some('¡'),
        0xA2 => Some('¢'),
        0xA3 => Some('£'),
        0xA4 => Some('⁄'),
        0xA5 => Some('¥'),
        0xA6 => Some('ƒ'),
        0xA7 => Some('§'),
        0xA8 => Some('¤'),
        0xA9 => Some('\''),
        0xAA => Some('\u{201C}'),
        0xAB => Some('«'),
        0xAC => Some('‹'),
        0xAD => Some('›'),
        0xAE => Some('\u{FB01}'),
        0xAF => Some('\u{FB02}'),
        0xB1 => Some('–'),
        0xB2 => Some('†'),
        0xB3 => Some('‡'),
        0xB4 => Some('·'),
        0xB6 => Some('¶'),
        0xB7 => Some('•'),
        0xB8 => Some('‚'),
        0xB9 => Some('„'),
        0xBA => Some('\u{201D}'),
        0xBB => Some('»'),
        0xBC => Some('…'),
        0xBD => Some('‰'),
        0xBF => Some('¿'),
        0xC1 => Some('`'),
        0xC2 => Some('´'),
        0xC3 => Some('ˆ'),
        0xC4 => Some('˜'),
        0xC5 => Some('¯'),
        0xC6 => Some('˘'),
        0xC7 => Some('˙'),
        0xC8 => Some('¨'),
        0xCA => Some('˚'),
        0xCB => Some('¸'),
        0xCD => Some('˝'),
        0xCE => Some('˛'),
        0xCF => Some('ˇ'),
        0xD0 => Some('—'),
        0xE1 => Some('Æ'),
        0xE3 => Some('ª'),
        0xE8 => Some('Ł'),
        0xE9 => Some('Ø'),
        0xEA => Some('Œ'),
        0xEB => Some('º'),
        0xF1 => Some('æ'),
        0xF5 => Some('ı'),
        0xF8 => Some('ł'),
        0xF9 => Some('ø'),
        0xFA => Some('œ'),
        0xFB => Some('ß'),
        _ => None,
    }
}

/// Resolves an Adobe Glyph List name to a Unicode code point.
///
/// Covers the names Latin text actually uses, plus the algorithmic
/// `uniXXXX`/`uXXXXXX` forms and suffixed variants like `a.sc`.
pub fn glyph_to_unicode(name: &str) -> Option<char> {
    // Single-character names map to themselves
    let mut chars = name.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        return Some(ch);
    }

    // uniXXXX and uXXXX/uXXXXXX
    if let Some(hex) = name.strip_prefix("uni") {
        if hex.len() >= 4 {
            if let Ok(code) = u32::from_str_radix(&hex[..4], 16) {
                return char::from_u32(code);
            }
        }
    }
    if let Some(hex) = name.strip_prefix('u') {
        if (4..=6).contains(&hex.len()) {
            if let Ok(code) = u32::from_str_radix(hex, 16) {
                return char::from_u32(code);
            }
        }
    }

    // Suffixed variants: a.sc, one.oldstyle
    if let Some(dot) = name.find('.') {
        if dot > 0 {
            return glyph_to_unicode(&name[..dot]);
        }
    }

    let ch = match name {
        "space" => ' ',
        "exclam" => '!',
        "quotedbl" => '"',
        "numbersign" => '#',
        "dollar" => '$',
        "percent" => '%',
        "ampersand" => '&',
        "quotesingle" => '\'',
        "parenleft" => '(',
        "parenright" => ')',
        "asterisk" => '*',
        "plus" => '+',
        "comma" => ',',
        "hyphen" | "minus" => '-',
        "period" => '.',
        "slash" => '/',
        "zero" => '0',
        "one" => '1',
        "two" => '2',
        "three" => '3',
        "four" => '4',
        "five" => '5',
        "six" => '6',
        "seven" => '7',
        "eight" => '8',
        "nine" => '9',
        "colon" => ':',
        "semicolon" => ';',
        "less" => '<',
        "equal" => '=',
        "greater" => '>',
        "question" => '?',
        "at" => '@',
        "bracketleft" => '[',
        "backslash" => '\\',
        "bracketright" => ']',
        "asciicircum" => '^',
        "underscore" => '_',
        "grave" => '`',
        "braceleft" => '{',
        "bar" => '|',
        "braceright" => '}',
        "asciitilde" => '~',
        "exclamdown" => '¡',
        "cent" => '¢',
        "sterling" => '£',
        "currency" => '¤',
        "yen" => '¥',
        "brokenbar" => '¦',
        "section" => '§',
        "dieresis" => '¨',
        "copyright" => '©',
        "ordfeminine" => 'ª',
        "guillemotleft" => '«',
        "logicalnot" => '¬',
        "registered" => '®',
        "macron" => '¯',
        "degree" => '°',
        "plusminus" => '±',
        "acute" => '´',
        "mu" => 'µ',
        "paragraph" => '¶',
        "periodcentered" => '·',
        "cedilla" => '¸',
        "ordmasculine" => 'º',
        "guillemotright" => '»',
        "onequarter" => '¼',
        "onehalf" => '½',
        "threequarters" => '¾',
        "questiondown" => '¿',
        "Agrave" => 'À',
        "Aacute" => 'Á',
        "Acircumflex" => 'Â',
        "Atilde" => 'Ã',
        "Adieresis" => 'Ä',
        "Aring" => 'Å',
        "AE" => 'Æ',
        "Ccedilla" => 'Ç',
        "Egrave" => 'È',
        "Eacute" => 'É',
        "Ecircumflex" => 'Ê',
        "Edieresis" => 'Ë',
        "Igrave" => 'Ì',
        "Iacute" => 'Í',
        "Icircumflex" => 'Î',
        "Idieresis" => 'Ï',
        "Eth" => 'Ð',
        "Ntilde" => 'Ñ',
        "Ograve" => 'Ò',
        "Oacute" => 'Ó',
        "Ocircumflex" => 'Ô',
        "Otilde" => 'Õ',
        "Odieresis" => 'Ö',
        "multiply" => '×',
        "Oslash" => 'Ø',
        "Ugrave" => 'Ù',
        "Uacute" => 'Ú',
        "Ucircumflex" => 'Û',
        "Udieresis" => 'Ü',
        "Yacute" => 'Ý',
        "Thorn" => 'Þ',
        "germandbls" => 'ß',
        "agrave" => 'à',
        "aacute" => 'á',
        "acircumflex" => 'â',
        "atilde" => 'ã',
        "adieresis" => 'ä',
        "aring" => 'å',
        "ae" => 'æ',
        "ccedilla" => 'ç',
        "egrave" => 'è',
        "eacute" => 'é',
        "ecircumflex" => 'ê',
        "edieresis" => 'ë',
        "igrave" => 'ì',
        "iacute" => 'í',
        "icircumflex" => 'î',
        "idieresis" => 'ï',
        "eth" => 'ð',
        "ntilde" => 'ñ',
        "ograve" => 'ò',
        "oacute" => 'ó',
        "ocircumflex" => 'ô',
        "otilde" => 'õ',
        "odieresis" => 'ö',
        "divide" => '÷',
        "oslash" => 'ø',
        "ugrave" => 'ù',
        "uacute" => 'ú',
        "ucircumflex" => 'û',
        "udieresis" => 'ü',
        "yacute" => 'ý',
        "thorn" => 'þ',
        "ydieresis" => 'ÿ',
        "OE" => 'Œ',
        "oe" => 'œ',
        "Scaron" => 'Š',
        "scaron" => 'š',
        "Ydieresis" => 'Ÿ',
        "Zcaron" => 'Ž',
        "zcaron" => 'ž',
        "Lslash" => 'Ł',
        "lslash" => 'ł',
        "dotlessi" => 'ı',
        "circumflex" => 'ˆ',
        "caron" => 'ˇ',
        "breve" => '˘',
        "dotaccent" => '˙',
        "ring" => '˚',
        "ogonek" => '˛',
        "tilde" => '˜',
        "hungarumlaut" => '˝',
        "endash" => '–',
        "emdash" => '—',
        "quoteleft" => '\u{2018}',
        "quoteright" => '\u{2019}',
        "quotesinglbase" => '‚',
        "quotedblleft" => '\u{201C}',
        "quotedblright" => '\u{201D}',
        "quotedblbase" => '„',
        "dagger" => '†',
        "daggerdbl" => '‡',
        "bullet" => '•',
        "ellipsis" => '…',
        "perthousand" => '‰',
        "guilsinglleft" => '‹',
        "guilsinglright" => '›',
        "fraction" => '⁄',
        "Euro" => '€',
        "trademark" => '™',
        "partialdiff" => '∂',
        "Delta" => '∆',
        "summation" => '∑',
        "radical" => '√',
        "infinity" => '∞',
        "integral" => '∫',
        "approxequal" => '≈',
        "notequal" => '≠',
        "lessequal" => '≤',
        "greaterequal" => '≥',
        "lozenge" => '◊',
        "fi" => '\u{FB01}',
        "fl" => '\u{FB02}',
        "nbspace" => '\u{00A0}',
        "softhyphen" => '\u{00AD}',
        _ => return None,
    };
    Some(ch)
}

/// Decodes a PDF text string (Info values, outline titles).
///
/// A UTF-16BE byte-order mark selects UTF-16; everything else reads as
/// PDFDocEncoding, which matches Latin-1 in the ranges that matter plus a
/// block of typographic characters at 0x80-0x9F.
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        return utf16be_to_string(&bytes[2..]);
    }

    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        let ch = match byte {
            0x09 | 0x0A | 0x0D => byte as char,
            0x20..=0x7E => byte as char,
            0x80 => '•',
            0x81 => '†',
            0x82 => '‡',
            0x83 => '…',
            0x84 => '—',
            0x85 => '–',
            0x86 => 'ƒ',
            0x87 => '⁄',
            0x88 => '‹',
            0x89 => '›',
            0x8A => '−',
            0x8B => '‰',
            0x8C => '„',
            0x8D => '\u{201C}',
            0x8E => '\u{201D}',
            0x8F => '\u{2018}',
            0x90 => '\u{2019}',
            0x91 => '‚',
            0x92 => '™',
            0x93 => '\u{FB01}',
            0x94 => '\u{FB02}',
            0x95 => 'Ł',
            0x96 => 'Œ',
            0x97 => 'Š',
            0x98 => 'Ÿ',
            0x99 => 'Ž',
            0x9A => 'ı',
            0x9B => 'ł',
            0x9C => 'œ',
            0x9D => 'š',
            0x9E => 'ž',
            0xA0..=0xFF => byte as char,
            _ => continue,
        };
        out.push(ch);
    }
    out
}

/// Shared font-encoding caches.
///
/// One authoritative encoding per font object number, plus a
/// page-qualified name cache pointing into it. Both live for the document
/// lifetime and are torn down together.
#[derive(Default)]
pub struct FontCache {
    by_obj: FxHashMap<u32, Rc<FontEncoding>>,
    by_page_name: FxHashMap<(usize, String), Rc<FontEncoding>>,
}

impl FontCache {
    /// Resolves the encoding for `/name` in a page's /Resources /Font.
    ///
    /// Failures degrade to the fallback encoding after being recorded, so
    /// one broken font cannot take down page extraction.
    pub fn encoding_for(
        &mut self,
        page_key: usize,
        name: &str,
        resources: Option<&Dict>,
        xref: &mut XRef,
        errors: &mut ErrorSink,
    ) -> PDFResult<Rc<FontEncoding>> {
        let cache_key = (page_key, name.to_string());
        if let Some(encoding) = self.by_page_name.get(&cache_key) {
            return Ok(Rc::clone(encoding));
        }

        let encoding = self.resolve(name, resources, xref, errors)?;
        self.by_page_name.insert(cache_key, Rc::clone(&encoding));
        Ok(encoding)
    }

    fn resolve(
        &mut self,
        name: &str,
        resources: Option<&Dict>,
        xref: &mut XRef,
        errors: &mut ErrorSink,
    ) -> PDFResult<Rc<FontEncoding>> {
        let font_entry = resources
            .and_then(|res| res.get("Font"))
            .cloned()
            .map(|fonts| xref.fetch_if_ref(&fonts))
            .transpose()?
            .and_then(|fonts| fonts.as_dict().and_then(|d| d.get(name).cloned()));

        let font_entry = match font_entry {
            Some(entry) => entry,
            None => {
                errors.report(
                    PDFError::encoding(format!("font /{} not found in resources", name)),
                    0,
                )?;
                return Ok(Rc::new(FontEncoding::fallback()));
            }
        };

        // Fonts shared across pages resolve to one cached encoding per object
        if let Some(font_ref) = font_entry.as_ref_obj() {
            if let Some(encoding) = self.by_obj.get(&font_ref.num) {
                return Ok(Rc::clone(encoding));
            }
        }

        let font_dict = match xref.fetch_if_ref(&font_entry) {
            Ok(PDFObject::Dictionary(dict)) => dict,
            Ok(other) => {
                errors.report(
                    PDFError::encoding(format!("font /{} is not a dictionary: {:?}", name, other)),
                    0,
                )?;
                return Ok(Rc::new(FontEncoding::fallback()));
            }
            Err(e) => {
                errors.report(e, 0)?;
                return Ok(Rc::new(FontEncoding::fallback()));
            }
        };

        let encoding = match FontEncoding::build(&font_dict, xref) {
            Ok(encoding) => Rc::new(encoding),
            Err(e) => {
                errors.report(e, 0)?;
                Rc::new(FontEncoding::fallback())
            }
        };

        if let Some(font_ref) = font_entry.as_ref_obj() {
            self.by_obj.insert(font_ref.num, Rc::clone(&encoding));
        }

        Ok(encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_winansi_table() {
        assert_eq!(winansi_char(b'A'), Some('A'));
        assert_eq!(winansi_char(0x80), Some('€'));
        assert_eq!(winansi_char(0x93), Some('\u{201C}'));
        assert_eq!(winansi_char(0xE9), Some('é'));
        assert_eq!(winansi_char(0x81), None);
        assert_eq!(winansi_char(0x00), None);
    }

    #[test]
    fn test_macroman_table() {
        assert_eq!(macroman_char(b'A'), Some('A'));
        assert_eq!(macroman_char(0x8E), Some('é'));
        assert_eq!(macroman_char(0xA5), Some('•'));
        assert_eq!(macroman_char(0xD0), Some('–'));
    }

    #[test]
    fn test_standard_quotes() {
        assert_eq!(standard_char(0x27), Some('\u{2019}'));
        assert_eq!(standard_char(0x60), Some('\u{2018}'));
        assert_eq!(standard_char(b'A'), Some('A'));
    }

    #[test]
    fn test_glyph_to_unicode() {
        assert_eq!(glyph_to_unicode("a"), Some('a'));
        assert_eq!(glyph_to_unicode("space"), Some(' '));
        assert_eq!(glyph_to_unicode("eacute"), Some('é'));
        assert_eq!(glyph_to_unicode("quotedblleft"), Some('\u{201C}'));
        assert_eq!(glyph_to_unicode("uni0041"), Some('A'));
        assert_eq!(glyph_to_unicode("u1D11E"), Some('\u{1D11E}'));
        assert_eq!(glyph_to_unicode("a.sc"), Some('a'));
        assert_eq!(glyph_to_unicode("one.oldstyle"), Some('1'));
        assert_eq!(glyph_to_unicode("nosuchglyph"), None);
    }

    #[test]
    fn test_fallback_encoding_decodes_ascii() {
        let encoding = FontEncoding::fallback();
        let mut out = String::new();
        encoding.decode_into(b"Hello", &mut out);
        assert_eq!(out, "Hello");
    }

    #[test]
    fn test_cid_identity_decoding() {
        let encoding = FontEncoding {
            wmode: 0,
            is_cid: true,
            single_byte: None,
            cid_map: None,
            widths: FxHashMap::default(),
        };
        let mut out = String::new();
        // Two-byte big-endian codes: 0x0048 0x0069 = "Hi"
        encoding.decode_into(&[0x00, 0x48, 0x00, 0x69], &mut out);
        assert_eq!(out, "Hi");
    }

    #[test]
    fn test_cid_with_cmap() {
        let cmap = CMap::parse(b"2 beginbfchar\n<0001> <0041>\n<0002> <0042>\nendbfchar\n").unwrap();
        let encoding = FontEncoding {
            wmode: 0,
            is_cid: true,
            single_byte: None,
            cid_map: Some(cmap),
            widths: FxHashMap::default(),
        };
        let mut out = String::new();
        encoding.decode_into(&[0x00, 0x01, 0x00, 0x02], &mut out);
        assert_eq!(out, "AB");
    }

    #[test]
    fn test_glyph_widths_reported() {
        let mut widths = FxHashMap::default();
        widths.insert(b'H' as u32, 720.0);
        let encoding = FontEncoding {
            wmode: 0,
            is_cid: false,
            single_byte: Some(base_table(BaseEncoding::WinAnsi)),
            cid_map: None,
            widths,
        };

        let mut seen = Vec::new();
        encoding.for_each_glyph(b"Hi", |text, width| seen.push((text.to_string(), width)));
        assert_eq!(
            seen,
            vec![("H".to_string(), 720.0), ("i".to_string(), DEFAULT_SIMPLE_WIDTH)]
        );
    }

    #[test]
    fn test_decode_text_string_utf16() {
        let bytes = [0xFE, 0xFF, 0x00, 0x43, 0x00, 0x61, 0x00, 0x66, 0x00, 0xE9];
        assert_eq!(decode_text_string(&bytes), "Café");
        assert_eq!(decode_text_string("Café".as_bytes()).is_empty(), false);
    }

    #[test]
    fn test_decode_text_string_pdfdoc() {
        assert_eq!(decode_text_string(b"plain"), "plain");
        // 0x97 is Š in PDFDocEncoding, not a control char
        assert_eq!(decode_text_string(&[0x97]), "Š");
        assert_eq!(decode_text_string(&[0xE9]), "é");
    }
}
