use super::error::{PDFError, PDFResult};
use super::stream::Stream;

/// PDF token types returned by the Lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// End of file marker
    EOF,

    /// Boolean value
    Boolean(bool),

    /// Null value
    Null,

    /// Integer value (no decimal point in the source)
    Integer(i64),

    /// Real value
    Real(f64),

    /// String value (from literal strings like (hello))
    String(Vec<u8>),

    /// Hex string value, already decoded from nibbles
    HexString(Vec<u8>),

    /// Name value (from /Name, with #xx escapes decoded)
    Name(String),

    /// Keyword/operator (like 'obj', 'stream', 'BT', 'Tj')
    Command(String),

    /// Array start '['
    ArrayStart,

    /// Array end ']'
    ArrayEnd,

    /// Dictionary start '<<'
    DictStart,

    /// Dictionary end '>>'
    DictEnd,
}

impl Token {
    /// Numeric value of an Integer or Real token.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Token::Integer(i) => Some(*i as f64),
            Token::Real(r) => Some(*r),
            _ => None,
        }
    }
}

/// PDF lexer tokenizing the raw byte syntax.
///
/// The lexer keeps a one-byte cursor (`current_char`, -1 at end of data)
/// over its stream view. It handles whitespace and comment skipping,
/// number scanning with the quirks Adobe's reader accepts, literal and
/// hexadecimal strings, names with `#xx` escapes, and bare keywords.
pub struct Lexer {
    stream: Stream,

    /// Byte currently under the cursor, or -1 at end of data
    current_char: i32,

    /// Scratch buffer for string and name scanning
    str_buf: Vec<u8>,
}

/// PDF whitespace: NUL, TAB, LF, FF, CR, SPACE
#[inline]
pub fn is_whitespace(ch: i32) -> bool {
    matches!(ch, 0x00 | 0x09 | 0x0A | 0x0C | 0x0D | 0x20)
}

/// PDF delimiters: ( ) < > [ ] { } / %
#[inline]
pub fn is_delimiter(ch: i32) -> bool {
    matches!(
        ch,
        0x28 | 0x29 | 0x3C | 0x3E | 0x5B | 0x5D | 0x7B | 0x7D | 0x2F | 0x25
    )
}

/// Whitespace or delimiter — anything that terminates a regular token.
#[inline]
pub fn is_special(ch: i32) -> bool {
    is_whitespace(ch) || is_delimiter(ch)
}

impl Lexer {
    /// Creates a new Lexer over a stream view.
    pub fn new(mut stream: Stream) -> Self {
        let current_char = Self::read_char(&mut stream);
        Lexer {
            stream,
            current_char,
            str_buf: Vec::new(),
        }
    }

    /// Reads the next byte from the stream, -1 on end of data.
    fn read_char(stream: &mut Stream) -> i32 {
        match stream.get_byte() {
            Ok(byte) => byte as i32,
            Err(_) => -1,
        }
    }

    /// Advances the cursor to the next byte.
    #[inline]
    fn next_char(&mut self) -> i32 {
        self.current_char = Self::read_char(&mut self.stream);
        self.current_char
    }

    /// Peeks at the byte after the cursor without consuming it.
    #[inline]
    fn peek_char(&self) -> i32 {
        match self.stream.peek_byte() {
            Ok(byte) => byte as i32,
            Err(_) => -1,
        }
    }

    /// Byte offset of the character currently under the cursor.
    pub fn current_offset(&self) -> usize {
        if self.current_char < 0 {
            self.stream.pos()
        } else {
            self.stream.pos() - 1
        }
    }

    /// Consumes the single end-of-line sequence after the `stream` keyword.
    pub fn skip_stream_eol(&mut self) {
        if self.current_char == 0x0D {
            self.next_char();
        }
        if self.current_char == 0x0A {
            self.next_char();
        }
    }

    /// Reads `len` raw bytes starting at the cursor, then re-primes it.
    ///
    /// Used for stream bodies, which must never pass through tokenization.
    pub fn take_raw(&mut self, len: usize) -> PDFResult<Vec<u8>> {
        let start = self.current_offset();
        let end = start + len;
        let bytes = self.stream.get_byte_range(start, end)?.to_vec();
        self.stream.set_pos(end)?;
        self.current_char = Self::read_char(&mut self.stream);
        Ok(bytes)
    }

    /// Moves the cursor to an absolute offset and re-primes it.
    pub fn seek(&mut self, offset: usize) -> PDFResult<()> {
        self.stream.set_pos(offset)?;
        self.current_char = Self::read_char(&mut self.stream);
        Ok(())
    }

    /// The backing byte window (for raw scans outside the token stream).
    pub fn window(&self) -> &[u8] {
        self.stream.window()
    }

    /// Returns the byte under the cursor and advances. -1 at end of data.
    ///
    /// Raw access for the inline-image skipper.
    pub fn raw_byte(&mut self) -> i32 {
        let b = self.current_char;
        if b >= 0 {
            self.next_char();
        }
        b
    }

    /// Skips whitespace and `%` comments (comments run to end of line).
    fn skip_whitespace_and_comments(&mut self) {
        let mut comment = false;
        loop {
            let ch = self.current_char;
            if ch < 0 {
                break;
            }
            if comment {
                if ch == 0x0A || ch == 0x0D {
                    comment = false;
                }
            } else if ch == 0x25 {
                comment = true;
            } else if !is_whitespace(ch) {
                break;
            }
            self.next_char();
        }
    }

    /// Produces the next token.
    pub fn get_token(&mut self) -> PDFResult<Token> {
        self.skip_whitespace_and_comments();

        let ch = self.current_char;
        if ch < 0 {
            return Ok(Token::EOF);
        }

        match ch {
            // Numbers: 0-9, +, -, .
            0x30..=0x39 | 0x2B | 0x2D | 0x2E => self.get_number(),

            // Literal string: (
            0x28 => self.get_string(),

            // Name: /
            0x2F => self.get_name(),

            0x5B => {
                self.next_char();
                Ok(Token::ArrayStart)
            }

            0x5D => {
                self.next_char();
                Ok(Token::ArrayEnd)
            }

            // Hex string or dict start: <
            0x3C => {
                let next_ch = self.next_char();
                if next_ch == 0x3C {
                    self.next_char();
                    Ok(Token::DictStart)
                } else {
                    self.get_hex_string()
                }
            }

            // Dict end: >
            0x3E => {
                let next_ch = self.next_char();
                if next_ch == 0x3E {
                    self.next_char();
                    Ok(Token::DictEnd)
                } else {
                    Err(PDFError::syntax(format!(
                        "unexpected character after '>': {}",
                        next_ch
                    )))
                }
            }

            // Stray closing paren
            0x29 => {
                self.next_char();
                Err(PDFError::syntax("unbalanced ')'"))
            }

            // Curly braces appear only in Type 4 function bodies; outside of
            // those they are stray delimiters
            0x7B | 0x7D => {
                self.next_char();
                Err(PDFError::syntax("stray brace"))
            }

            _ => self.get_command(),
        }
    }

    /// Scans a number, producing Integer when the source has no decimal
    /// point or exponent.
    ///
    /// Accepts the deviations Adobe's reader accepts: a doubled leading
    /// minus, a minus in the middle of digits, line breaks after the sign,
    /// and a bare sign before a delimiter (which reads as 0).
    fn get_number(&mut self) -> PDFResult<Token> {
        let mut ch = self.current_char;
        let mut negative = false;
        let mut is_real = false;
        let mut e_notation = false;
        let mut divide_by = 0.0;

        if ch == 0x2D {
            negative = true;
            ch = self.next_char();
            if ch == 0x2D {
                // Doubled minus, ignored
                ch = self.next_char();
            }
        } else if ch == 0x2B {
            ch = self.next_char();
        }

        // Line breaks between sign and digits
        if ch == 0x0A || ch == 0x0D {
            loop {
                ch = self.next_char();
                if ch != 0x0A && ch != 0x0D {
                    break;
                }
            }
        }

        if ch == 0x2E {
            is_real = true;
            divide_by = 10.0;
            ch = self.next_char();
        }

        if !(0x30..=0x39).contains(&ch) {
            // A bare sign before whitespace, '(' or '<' reads as zero
            if is_whitespace(ch) || ch == 0x28 || ch == 0x3C || ch == -1 {
                return Ok(Token::Integer(0));
            }
            return Err(PDFError::syntax(format!(
                "invalid number (char code {})",
                ch
            )));
        }

        let mut int_value: i64 = (ch - 0x30) as i64;
        let mut base_value = (ch - 0x30) as f64;
        let mut power_value: i32 = 0;
        let mut power_sign: i32 = 1;

        loop {
            ch = self.next_char();
            if ch < 0 {
                break;
            }

            if (0x30..=0x39).contains(&ch) {
                let digit = (ch - 0x30) as i64;
                if e_notation {
                    power_value = power_value * 10 + (ch - 0x30);
                } else {
                    if divide_by != 0.0 {
                        divide_by *= 10.0;
                    } else if !is_real {
                        // Integers too large for i64 degrade to reals
                        match int_value
                            .checked_mul(10)
                            .and_then(|v| v.checked_add(digit))
                        {
                            Some(v) => int_value = v,
                            None => is_real = true,
                        }
                    }
                    base_value = base_value * 10.0 + digit as f64;
                }
            } else if ch == 0x2E {
                if divide_by == 0.0 {
                    is_real = true;
                    divide_by = 1.0;
                } else {
                    // Only one dot per number
                    break;
                }
            } else if ch == 0x2D {
                // Minus in the middle of a number, ignored
            } else if ch == 0x45 || ch == 0x65 {
                // 'E'/'e': exponent, or the start of the next operator
                let peek = self.peek_char();
                if peek == 0x2B || peek == 0x2D {
                    power_sign = if peek == 0x2D { -1 } else { 1 };
                    self.next_char();
                } else if !(0x30..=0x39).contains(&peek) {
                    break;
                }
                e_notation = true;
                is_real = true;
            } else {
                break;
            }
        }

        if !is_real && !e_notation {
            let value = if negative { -int_value } else { int_value };
            return Ok(Token::Integer(value));
        }

        let mut result = base_value;
        if divide_by != 0.0 {
            result /= divide_by;
        }
        if e_notation {
            result *= 10f64.powi(power_sign * power_value);
        }
        if negative {
            result = -result;
        }
        Ok(Token::Real(result))
    }

    /// Scans a literal string: balanced parentheses with backslash escapes.
    fn get_string(&mut self) -> PDFResult<Token> {
        let mut num_paren = 1;
        self.str_buf.clear();

        let mut ch = self.next_char(); // consume '('

        loop {
            let mut char_buffered = false;

            match ch {
                -1 => break, // unterminated string

                0x28 => {
                    num_paren += 1;
                    self.str_buf.push(b'(');
                }

                0x29 => {
                    num_paren -= 1;
                    if num_paren == 0 {
                        self.next_char();
                        break;
                    }
                    self.str_buf.push(b')');
                }

                0x5C => {
                    ch = self.next_char();
                    match ch {
                        -1 => break,
                        0x6E => self.str_buf.push(b'\n'),
                        0x72 => self.str_buf.push(b'\r'),
                        0x74 => self.str_buf.push(b'\t'),
                        0x62 => self.str_buf.push(0x08),
                        0x66 => self.str_buf.push(0x0C),
                        0x5C | 0x28 | 0x29 => self.str_buf.push(ch as u8),
                        0x30..=0x37 => {
                            // Octal escape, 1-3 digits
                            let mut x = (ch & 0x0F) as u8;
                            ch = self.next_char();
                            char_buffered = true;
                            if (0x30..=0x37).contains(&ch) {
                                x = (x << 3) | (ch & 0x0F) as u8;
                                ch = self.next_char();
                                if (0x30..=0x37).contains(&ch) {
                                    char_buffered = false;
                                    x = (x << 3) | (ch & 0x0F) as u8;
                                }
                            }
                            self.str_buf.push(x);
                        }
                        0x0D => {
                            // Line continuation; swallow a following LF
                            if self.peek_char() == 0x0A {
                                self.next_char();
                            }
                        }
                        0x0A => {
                            // Line continuation
                        }
                        _ => self.str_buf.push(ch as u8),
                    }
                }

                _ => self.str_buf.push(ch as u8),
            }

            if !char_buffered {
                ch = self.next_char();
            }
        }

        Ok(Token::String(self.str_buf.clone()))
    }

    /// Hex value of an ASCII character, -1 if not a hex digit.
    fn to_hex_digit(ch: i32) -> i32 {
        if (0x30..=0x39).contains(&ch) {
            ch & 0x0F
        } else if (0x41..=0x46).contains(&ch) || (0x61..=0x66).contains(&ch) {
            (ch & 0x0F) + 9
        } else {
            -1
        }
    }

    /// Scans a hex string: nibble pairs up to '>', whitespace skipped,
    /// an odd trailing nibble is read as if followed by '0'.
    fn get_hex_string(&mut self) -> PDFResult<Token> {
        self.str_buf.clear();
        let mut ch = self.current_char;
        let mut first_digit = -1;

        loop {
            if ch < 0 {
                break; // unterminated hex string
            } else if ch == 0x3E {
                self.next_char();
                break;
            } else if is_whitespace(ch) {
                ch = self.next_char();
                continue;
            } else {
                let digit = Self::to_hex_digit(ch);
                if digit == -1 {
                    // Invalid hex digit, skipped
                } else if first_digit == -1 {
                    first_digit = digit;
                } else {
                    self.str_buf.push(((first_digit << 4) | digit) as u8);
                    first_digit = -1;
                }
                ch = self.next_char();
            }
        }

        if first_digit != -1 {
            self.str_buf.push((first_digit << 4) as u8);
        }

        Ok(Token::HexString(self.str_buf.clone()))
    }

    /// Scans a name: from '/' to the next special character, with `#xx`
    /// hex escapes decoded.
    fn get_name(&mut self) -> PDFResult<Token> {
        self.str_buf.clear();

        let mut ch = self.next_char(); // skip '/'

        while ch >= 0 && !is_special(ch) {
            if ch == 0x23 {
                ch = self.next_char();

                if is_special(ch) || ch < 0 {
                    self.str_buf.push(b'#');
                    break;
                }

                let x = Self::to_hex_digit(ch);
                if x != -1 {
                    let previous_ch = ch;
                    ch = self.next_char();
                    let x2 = Self::to_hex_digit(ch);
                    if x2 == -1 {
                        // Second digit invalid: keep the text as-is
                        self.str_buf.push(b'#');
                        self.str_buf.push(previous_ch as u8);
                        if is_special(ch) || ch < 0 {
                            break;
                        }
                        self.str_buf.push(ch as u8);
                        ch = self.next_char();
                        continue;
                    }
                    self.str_buf.push(((x << 4) | x2) as u8);
                } else {
                    self.str_buf.push(b'#');
                    self.str_buf.push(ch as u8);
                }
            } else {
                self.str_buf.push(ch as u8);
            }

            ch = self.next_char();
        }

        Ok(Token::Name(String::from_utf8_lossy(&self.str_buf).into_owned()))
    }

    /// Scans a keyword or content-stream operator; recognizes the
    /// `true`/`false`/`null` keywords.
    fn get_command(&mut self) -> PDFResult<Token> {
        let mut buf = String::new();
        let mut ch = self.current_char;

        while ch >= 0 && !is_special(ch) {
            if buf.len() >= 128 {
                return Err(PDFError::syntax(format!("keyword too long: {}...", buf)));
            }
            buf.push(ch as u8 as char);
            ch = self.next_char();
        }

        match buf.as_str() {
            "true" => Ok(Token::Boolean(true)),
            "false" => Ok(Token::Boolean(false)),
            "null" => Ok(Token::Null),
            _ => Ok(Token::Command(buf)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexer_for(data: &[u8]) -> Lexer {
        Lexer::new(Stream::from_bytes(data.to_vec()))
    }

    #[test]
    fn test_classification() {
        for ch in [0x00, 0x09, 0x0A, 0x0C, 0x0D, 0x20] {
            assert!(is_whitespace(ch));
        }
        assert!(!is_whitespace(0x41));
        for ch in [0x28, 0x29, 0x3C, 0x3E, 0x5B, 0x5D, 0x7B, 0x7D, 0x2F, 0x25] {
            assert!(is_delimiter(ch));
        }
        assert!(!is_delimiter(0x41));
    }

    #[test]
    fn test_eof() {
        let mut lexer = lexer_for(b"");
        assert_eq!(lexer.get_token().unwrap(), Token::EOF);
    }

    #[test]
    fn test_structural_tokens() {
        let mut lexer = lexer_for(b"[ ] << >>");
        assert_eq!(lexer.get_token().unwrap(), Token::ArrayStart);
        assert_eq!(lexer.get_token().unwrap(), Token::ArrayEnd);
        assert_eq!(lexer.get_token().unwrap(), Token::DictStart);
        assert_eq!(lexer.get_token().unwrap(), Token::DictEnd);
        assert_eq!(lexer.get_token().unwrap(), Token::EOF);
    }

    #[test]
    fn test_skip_comments() {
        let mut lexer = lexer_for(b"% a comment\n[");
        assert_eq!(lexer.get_token().unwrap(), Token::ArrayStart);
    }

    #[test]
    fn test_integers() {
        let mut lexer = lexer_for(b"123 -456 +789 0");
        assert_eq!(lexer.get_token().unwrap(), Token::Integer(123));
        assert_eq!(lexer.get_token().unwrap(), Token::Integer(-456));
        assert_eq!(lexer.get_token().unwrap(), Token::Integer(789));
        assert_eq!(lexer.get_token().unwrap(), Token::Integer(0));
    }

    #[test]
    fn test_reals() {
        let mut lexer = lexer_for(b"3.14 -2.718 .5 4.");
        assert_eq!(lexer.get_token().unwrap(), Token::Real(3.14));
        assert_eq!(lexer.get_token().unwrap(), Token::Real(-2.718));
        assert_eq!(lexer.get_token().unwrap(), Token::Real(0.5));
        assert_eq!(lexer.get_token().unwrap(), Token::Real(4.0));
    }

    #[test]
    fn test_scientific_notation() {
        let mut lexer = lexer_for(b"1.5e2 3e-2 2E3");
        assert_eq!(lexer.get_token().unwrap(), Token::Real(150.0));
        assert_eq!(lexer.get_token().unwrap(), Token::Real(0.03));
        assert_eq!(lexer.get_token().unwrap(), Token::Real(2000.0));
    }

    #[test]
    fn test_double_negative() {
        // Doubled minus reads like a single one
        let mut lexer = lexer_for(b"--5");
        assert_eq!(lexer.get_token().unwrap(), Token::Integer(-5));
    }

    #[test]
    fn test_bare_sign_reads_as_zero() {
        let mut lexer = lexer_for(b"- ");
        assert_eq!(lexer.get_token().unwrap(), Token::Integer(0));
    }

    #[test]
    fn test_simple_string() {
        let mut lexer = lexer_for(b"(hello world)");
        assert_eq!(
            lexer.get_token().unwrap(),
            Token::String(b"hello world".to_vec())
        );
    }

    #[test]
    fn test_nested_parens() {
        let mut lexer = lexer_for(b"(a (nested) b)");
        assert_eq!(
            lexer.get_token().unwrap(),
            Token::String(b"a (nested) b".to_vec())
        );
    }

    #[test]
    fn test_escape_sequences() {
        let mut lexer = lexer_for(b"(line1\\nline2\\ttab\\\\back\\(\\))");
        assert_eq!(
            lexer.get_token().unwrap(),
            Token::String(b"line1\nline2\ttab\\back()".to_vec())
        );
    }

    #[test]
    fn test_octal_escape() {
        let mut lexer = lexer_for(b"(\\101\\102\\103)");
        assert_eq!(lexer.get_token().unwrap(), Token::String(b"ABC".to_vec()));
    }

    #[test]
    fn test_line_continuation() {
        let mut lexer = lexer_for(b"(split\\\nline)");
        assert_eq!(
            lexer.get_token().unwrap(),
            Token::String(b"splitline".to_vec())
        );
    }

    #[test]
    fn test_hex_string() {
        let mut lexer = lexer_for(b"<48656c6c6f>");
        assert_eq!(
            lexer.get_token().unwrap(),
            Token::HexString(b"Hello".to_vec())
        );
    }

    #[test]
    fn test_hex_string_odd_digits() {
        // Trailing nibble reads as if followed by '0'
        let mut lexer = lexer_for(b"<41424>");
        assert_eq!(
            lexer.get_token().unwrap(),
            Token::HexString(vec![0x41, 0x42, 0x40])
        );
    }

    #[test]
    fn test_hex_string_with_whitespace() {
        let mut lexer = lexer_for(b"<48 65 6c\n6c 6f>");
        assert_eq!(
            lexer.get_token().unwrap(),
            Token::HexString(b"Hello".to_vec())
        );
    }

    #[test]
    fn test_names() {
        let mut lexer = lexer_for(b"/Type /Font");
        assert_eq!(lexer.get_token().unwrap(), Token::Name("Type".into()));
        assert_eq!(lexer.get_token().unwrap(), Token::Name("Font".into()));
    }

    #[test]
    fn test_name_hash_escape() {
        let mut lexer = lexer_for(b"/My#20Name /A#2FB");
        assert_eq!(lexer.get_token().unwrap(), Token::Name("My Name".into()));
        assert_eq!(lexer.get_token().unwrap(), Token::Name("A/B".into()));
    }

    #[test]
    fn test_keywords_and_commands() {
        let mut lexer = lexer_for(b"true false null BT Tj ET");
        assert_eq!(lexer.get_token().unwrap(), Token::Boolean(true));
        assert_eq!(lexer.get_token().unwrap(), Token::Boolean(false));
        assert_eq!(lexer.get_token().unwrap(), Token::Null);
        assert_eq!(lexer.get_token().unwrap(), Token::Command("BT".into()));
        assert_eq!(lexer.get_token().unwrap(), Token::Command("Tj".into()));
        assert_eq!(lexer.get_token().unwrap(), Token::Command("ET".into()));
    }

    #[test]
    fn test_mixed_dict_tokens() {
        let mut lexer = lexer_for(b"<< /Type /Font /Size 12 >>");
        assert_eq!(lexer.get_token().unwrap(), Token::DictStart);
        assert_eq!(lexer.get_token().unwrap(), Token::Name("Type".into()));
        assert_eq!(lexer.get_token().unwrap(), Token::Name("Font".into()));
        assert_eq!(lexer.get_token().unwrap(), Token::Name("Size".into()));
        assert_eq!(lexer.get_token().unwrap(), Token::Integer(12));
        assert_eq!(lexer.get_token().unwrap(), Token::DictEnd);
    }

    #[test]
    fn test_take_raw_reprimes_cursor() {
        let mut lexer = lexer_for(b"stream\nBINARY endstream");
        assert_eq!(lexer.get_token().unwrap(), Token::Command("stream".into()));
        lexer.skip_stream_eol();
        let body = lexer.take_raw(6).unwrap();
        assert_eq!(body, b"BINARY");
        assert_eq!(
            lexer.get_token().unwrap(),
            Token::Command("endstream".into())
        );
    }
}
