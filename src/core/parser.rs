use super::error::{PDFError, PDFResult};
use super::lexer::{Lexer, Token};
use indexmap::IndexMap;
use smallvec::SmallVec;

/// Indirect object reference: "N G R" in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ref {
    /// Object number (0 is reserved for the free-list head)
    pub num: u32,

    /// Generation number
    pub generation: u32,
}

impl Ref {
    #[inline]
    pub const fn new(num: u32, generation: u32) -> Self {
        Self { num, generation }
    }
}

/// PDF dictionary: name keys to objects, insertion order preserved.
pub type Dict = IndexMap<String, PDFObject>;

/// PDF object types as defined in the PDF specification.
///
/// Integers and reals are kept apart — a number without a decimal point in
/// the source stays an integer, which matters for offsets and counts.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFObject {
    /// Null value
    Null,

    /// Boolean value
    Boolean(bool),

    /// Integer value
    Integer(i64),

    /// Real value
    Real(f64),

    /// String value, raw undecoded bytes (may be PDFDocEncoding or UTF-16BE)
    String(Vec<u8>),

    /// Hex string value, already decoded from nibbles to raw bytes
    HexString(Vec<u8>),

    /// Name value (from /Name)
    Name(String),

    /// Array of objects; up to 4 elements stored inline (rects, matrices)
    Array(SmallVec<[Box<PDFObject>; 4]>),

    /// Dictionary with stable insertion order
    Dictionary(Dict),

    /// Stream: dictionary plus its raw (still encoded) body
    Stream {
        dict: Dict,
        data: Vec<u8>,
        /// Offset of the body's first byte in the file image
        raw_offset: usize,
    },

    /// Indirect object reference (like "5 0 R")
    Ref(Ref),

    /// Keyword that is not an object ('obj', 'endobj', content operators)
    Command(String),

    /// End of input marker
    EOF,
}

impl PDFObject {
    pub fn is_eof(&self) -> bool {
        matches!(self, PDFObject::EOF)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PDFObject::Null)
    }

    /// Returns true if this object is the given keyword.
    #[inline]
    pub fn is_command(&self, cmd: &str) -> bool {
        matches!(self, PDFObject::Command(command) if command == cmd)
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            PDFObject::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Raw bytes of a literal or hex string.
    pub fn as_string_bytes(&self) -> Option<&[u8]> {
        match self {
            PDFObject::String(data) | PDFObject::HexString(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            PDFObject::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric value of an Integer or Real.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PDFObject::Integer(i) => Some(*i as f64),
            PDFObject::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Integer value; reals are not silently truncated.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PDFObject::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The dictionary of a Dictionary or Stream object.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            PDFObject::Dictionary(dict) => Some(dict),
            PDFObject::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Box<PDFObject>]> {
        match self {
            PDFObject::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_ref_obj(&self) -> Option<Ref> {
        match self {
            PDFObject::Ref(r) => Some(*r),
            _ => None,
        }
    }
}

/// Resolves indirect references encountered mid-parse.
///
/// Needed for streams whose /Length is itself an indirect reference: the
/// length must be known before the body can be read.
pub trait RefResolver {
    fn resolve_ref(&mut self, num: u32, generation: u32) -> PDFResult<PDFObject>;
}

/// Resolver for contexts with no cross-reference table available.
pub struct NoResolver;

impl RefResolver for NoResolver {
    fn resolve_ref(&mut self, num: u32, generation: u32) -> PDFResult<PDFObject> {
        Err(PDFError::MissingObject { num, generation })
    }
}

/// Recursive-descent parser building `PDFObject`s from tokens.
///
/// Maintains a 2-token lookahead buffer so the patterns "N G R" (indirect
/// reference) and "<< ... >> stream" can be recognized before any token is
/// committed.
pub struct Parser {
    lexer: Lexer,

    /// First lookahead token
    buf1: Option<Token>,

    /// Second lookahead token
    buf2: Option<Token>,

    /// Close containers early on interior errors instead of failing
    recovery: bool,
}

impl Parser {
    /// Creates a new Parser and fills the lookahead buffer.
    pub fn new(mut lexer: Lexer) -> PDFResult<Self> {
        let buf1 = Some(lexer.get_token()?);
        let buf2 = Some(lexer.get_token()?);
        Ok(Parser {
            lexer,
            buf1,
            buf2,
            recovery: true,
        })
    }

    /// Disables interior error recovery (strict policy).
    pub fn with_recovery(mut self, recovery: bool) -> Self {
        self.recovery = recovery;
        self
    }

    /// Advances the lookahead buffer by one token.
    fn shift(&mut self) -> PDFResult<()> {
        self.buf1 = self.buf2.take();
        self.buf2 = Some(self.lexer.get_token()?);
        Ok(())
    }

    /// Parses the next object, with no xref available for /Length refs.
    pub fn get_object(&mut self) -> PDFResult<PDFObject> {
        self.get_object_with(&mut NoResolver)
    }

    /// Parses the next object.
    ///
    /// Handles arrays, dictionaries, streams, indirect references and all
    /// simple objects. `resolver` is consulted only when a stream's
    /// /Length is an indirect reference.
    pub fn get_object_with(&mut self, resolver: &mut dyn RefResolver) -> PDFResult<PDFObject> {
        let token = self
            .buf1
            .take()
            .ok_or_else(|| PDFError::syntax("parser lookahead buffer is empty"))?;

        self.shift()?;

        match token {
            Token::ArrayStart => self.parse_array(resolver),
            Token::DictStart => self.parse_dictionary(resolver),

            Token::ArrayEnd => Err(PDFError::syntax("unexpected ']'")),
            Token::DictEnd => Err(PDFError::syntax("unexpected '>>'")),

            Token::Integer(n) => {
                // "N G R" is an indirect reference
                if let Some(Token::Integer(generation)) = &self.buf1 {
                    if let Some(Token::Command(cmd)) = &self.buf2 {
                        if cmd == "R" && n >= 0 && *generation >= 0 {
                            let reference = Ref::new(n as u32, *generation as u32);
                            self.shift()?; // generation
                            self.shift()?; // 'R'
                            return Ok(PDFObject::Ref(reference));
                        }
                    }
                }
                Ok(PDFObject::Integer(n))
            }

            Token::EOF => Ok(PDFObject::EOF),
            Token::Boolean(b) => Ok(PDFObject::Boolean(b)),
            Token::Null => Ok(PDFObject::Null),
            Token::Real(r) => Ok(PDFObject::Real(r)),
            Token::String(s) => Ok(PDFObject::String(s)),
            Token::HexString(s) => Ok(PDFObject::HexString(s)),
            Token::Name(n) => Ok(PDFObject::Name(n)),
            Token::Command(c) => Ok(PDFObject::Command(c)),
        }
    }

    /// Parses an array: [ obj1 obj2 ... ]
    fn parse_array(&mut self, resolver: &mut dyn RefResolver) -> PDFResult<PDFObject> {
        let mut array = SmallVec::<[Box<PDFObject>; 4]>::new();

        loop {
            if let Some(Token::ArrayEnd) = &self.buf1 {
                self.shift()?;
                break;
            }
            if let Some(Token::EOF) = &self.buf1 {
                return Err(PDFError::syntax("unterminated array (missing ']')"));
            }

            match self.get_object_with(resolver) {
                Ok(obj) => array.push(Box::new(obj)),
                Err(e) if self.recovery => {
                    // Close the container early and let the caller continue
                    log::warn!("malformed array element: {}; closing array early", e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(PDFObject::Array(array))
    }

    /// Parses a dictionary: << /Key1 value1 /Key2 value2 ... >>
    ///
    /// A dictionary immediately followed by the `stream` keyword turns
    /// into a stream object.
    fn parse_dictionary(&mut self, resolver: &mut dyn RefResolver) -> PDFResult<PDFObject> {
        let mut dict = Dict::new();

        loop {
            if let Some(Token::DictEnd) = &self.buf1 {
                // Leave '>>' in buf1: buf2 must be inspected for "stream"
                // before the lexer reads past it.
                break;
            }
            if let Some(Token::EOF) = &self.buf1 {
                return Err(PDFError::syntax("unterminated dictionary (missing '>>')"));
            }

            let key = match &self.buf1 {
                Some(Token::Name(name)) => name.clone(),
                Some(other) => {
                    if !self.recovery {
                        return Err(PDFError::syntax(format!(
                            "dictionary key is not a name: {:?}",
                            other
                        )));
                    }
                    // Skip the stray token and keep going
                    log::warn!("dictionary key is not a name: {:?}", other);
                    self.shift()?;
                    continue;
                }
                None => return Err(PDFError::syntax("parser lookahead buffer is empty")),
            };

            self.shift()?; // consume the key

            if let Some(Token::EOF) = &self.buf1 {
                return Err(PDFError::syntax("unterminated dictionary (EOF after key)"));
            }
            if let Some(Token::DictEnd) = &self.buf1 {
                // Key without a value
                dict.insert(key, PDFObject::Null);
                break;
            }

            match self.get_object_with(resolver) {
                Ok(value) => {
                    dict.insert(key, value);
                }
                Err(e) if self.recovery => {
                    log::warn!(
                        "malformed value for dictionary key '{}': {}; closing dictionary early",
                        key,
                        e
                    );
                    dict.insert(key, PDFObject::Null);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        // '>>' sits in buf1; a "stream" keyword in buf2 means the lexer is
        // positioned right after that keyword and the body follows.
        if let Some(Token::Command(cmd)) = &self.buf2 {
            if cmd == "stream" {
                self.buf1 = None;
                self.buf2 = None;
                return self.parse_stream(dict, resolver);
            }
        }

        self.shift()?; // consume '>>'
        Ok(PDFObject::Dictionary(dict))
    }

    /// Reads a stream body after its dictionary.
    ///
    /// The body length comes from /Length (resolved if indirect). When the
    /// declared length does not land on `endstream`, the body is re-read by
    /// scanning for the keyword instead.
    fn parse_stream(
        &mut self,
        dict: Dict,
        resolver: &mut dyn RefResolver,
    ) -> PDFResult<PDFObject> {
        self.lexer.skip_stream_eol();
        let raw_offset = self.lexer.current_offset();

        let length = match dict.get("Length") {
            Some(PDFObject::Integer(n)) if *n >= 0 => Some(*n as usize),
            Some(PDFObject::Ref(r)) => match resolver.resolve_ref(r.num, r.generation) {
                Ok(PDFObject::Integer(n)) if n >= 0 => Some(n as usize),
                Ok(_) => {
                    log::warn!("stream /Length did not resolve to an integer");
                    None
                }
                Err(e) => {
                    log::warn!("failed to resolve stream /Length: {}", e);
                    None
                }
            },
            _ => None,
        };

        let mut data = None;
        if let Some(len) = length {
            if let Ok(bytes) = self.lexer.take_raw(len) {
                // The declared length must land right before `endstream`
                if self.next_keyword_is_endstream()? {
                    data = Some(bytes);
                }
            }
        }

        let data = match data {
            Some(bytes) => bytes,
            None => self.scan_for_endstream(raw_offset)?,
        };

        // Refill the lookahead past `endstream`
        self.buf1 = Some(self.lexer.get_token()?);
        self.buf2 = Some(self.lexer.get_token()?);
        if let Some(Token::Command(cmd)) = &self.buf1 {
            if cmd == "endstream" {
                self.shift()?;
            }
        }

        Ok(PDFObject::Stream {
            dict,
            data,
            raw_offset,
        })
    }

    /// Checks whether the next token is `endstream`, without consuming it.
    fn next_keyword_is_endstream(&mut self) -> PDFResult<bool> {
        let checkpoint = self.lexer.current_offset();
        let token = self.lexer.get_token();
        let ok = matches!(&token, Ok(Token::Command(cmd)) if cmd == "endstream");
        self.lexer.seek(checkpoint)?;
        Ok(ok)
    }

    /// Recovers a stream body by scanning for the `endstream` keyword.
    fn scan_for_endstream(&mut self, raw_offset: usize) -> PDFResult<Vec<u8>> {
        let window = self.lexer.window();
        let tail = &window[raw_offset.min(window.len())..];

        let found = tail
            .windows(b"endstream".len())
            .position(|w| w == b"endstream")
            .ok_or_else(|| PDFError::stream("missing endstream keyword"))?;

        let end = raw_offset + found;
        // Trim the end-of-line that separates body from keyword
        let body = &window[raw_offset..end];
        let mut trimmed = body.len();
        while trimmed > 0 && matches!(body[trimmed - 1], b'\n' | b'\r' | b' ') {
            trimmed -= 1;
        }
        let data = body[..trimmed].to_vec();

        self.lexer.seek(end)?;
        Ok(data)
    }

    /// Checks if there are more objects to parse.
    #[inline]
    pub fn has_more(&self) -> bool {
        !matches!(&self.buf1, Some(Token::EOF))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::Stream;
    use smallvec::smallvec;

    fn parse_str(input: &str) -> PDFResult<PDFObject> {
        parse_bytes(input.as_bytes())
    }

    fn parse_bytes(input: &[u8]) -> PDFResult<PDFObject> {
        let lexer = Lexer::new(Stream::from_bytes(input.to_vec()));
        let mut parser = Parser::new(lexer)?;
        parser.get_object()
    }

    #[test]
    fn test_parse_simple_objects() {
        assert_eq!(parse_str("42").unwrap(), PDFObject::Integer(42));
        assert_eq!(parse_str("3.5").unwrap(), PDFObject::Real(3.5));
        assert_eq!(parse_str("true").unwrap(), PDFObject::Boolean(true));
        assert_eq!(parse_str("null").unwrap(), PDFObject::Null);
        assert_eq!(
            parse_str("(hello)").unwrap(),
            PDFObject::String(b"hello".to_vec())
        );
        assert_eq!(
            parse_str("<48656c6c6f>").unwrap(),
            PDFObject::HexString(b"Hello".to_vec())
        );
        assert_eq!(parse_str("/Type").unwrap(), PDFObject::Name("Type".into()));
    }

    #[test]
    fn test_parse_arrays() {
        assert_eq!(parse_str("[]").unwrap(), PDFObject::Array(SmallVec::new()));
        assert_eq!(
            parse_str("[1 2 3]").unwrap(),
            PDFObject::Array(smallvec![
                Box::new(PDFObject::Integer(1)),
                Box::new(PDFObject::Integer(2)),
                Box::new(PDFObject::Integer(3)),
            ])
        );
        assert_eq!(
            parse_str("[[1] [2]]").unwrap(),
            PDFObject::Array(smallvec![
                Box::new(PDFObject::Array(smallvec![Box::new(PDFObject::Integer(1))])),
                Box::new(PDFObject::Array(smallvec![Box::new(PDFObject::Integer(2))])),
            ])
        );
    }

    #[test]
    fn test_parse_dictionary() {
        let obj = parse_str("<< /Type /Font /Size 12 /Bold true >>").unwrap();
        let dict = obj.as_dict().expect("dictionary");
        assert_eq!(dict.get("Type"), Some(&PDFObject::Name("Font".into())));
        assert_eq!(dict.get("Size"), Some(&PDFObject::Integer(12)));
        assert_eq!(dict.get("Bold"), Some(&PDFObject::Boolean(true)));
    }

    #[test]
    fn test_dictionary_preserves_insertion_order() {
        let obj = parse_str("<< /Zebra 1 /Apple 2 /Mango 3 >>").unwrap();
        let dict = obj.as_dict().unwrap();
        let keys: Vec<&str> = dict.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["Zebra", "Apple", "Mango"]);
    }

    #[test]
    fn test_parse_nested_dictionary() {
        let obj = parse_str("<< /Outer << /Inner 42 >> >>").unwrap();
        let outer = obj.as_dict().unwrap();
        let inner = outer.get("Outer").unwrap().as_dict().unwrap();
        assert_eq!(inner.get("Inner"), Some(&PDFObject::Integer(42)));
    }

    #[test]
    fn test_parse_indirect_reference() {
        assert_eq!(
            parse_str("5 0 R").unwrap(),
            PDFObject::Ref(Ref::new(5, 0))
        );
        assert_eq!(
            parse_str("10 2 R").unwrap(),
            PDFObject::Ref(Ref::new(10, 2))
        );
    }

    #[test]
    fn test_parse_array_with_references() {
        assert_eq!(
            parse_str("[5 0 R 10 2 R]").unwrap(),
            PDFObject::Array(smallvec![
                Box::new(PDFObject::Ref(Ref::new(5, 0))),
                Box::new(PDFObject::Ref(Ref::new(10, 2))),
            ])
        );
    }

    #[test]
    fn test_reference_needs_command_r() {
        // "5 0" followed by a non-R keyword is two integers
        let lexer = Lexer::new(Stream::from_bytes(b"5 0 obj".to_vec()));
        let mut parser = Parser::new(lexer).unwrap();
        assert_eq!(parser.get_object().unwrap(), PDFObject::Integer(5));
        assert_eq!(parser.get_object().unwrap(), PDFObject::Integer(0));
        assert_eq!(parser.get_object().unwrap(), PDFObject::Command("obj".into()));
    }

    #[test]
    fn test_parse_stream_with_length() {
        let obj = parse_bytes(b"<< /Length 5 >> stream\nHELLO\nendstream").unwrap();
        match obj {
            PDFObject::Stream { dict, data, .. } => {
                assert_eq!(dict.get("Length"), Some(&PDFObject::Integer(5)));
                assert_eq!(data, b"HELLO");
            }
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_stream_crlf() {
        let obj = parse_bytes(b"<< /Length 3 >> stream\r\nabc\r\nendstream").unwrap();
        match obj {
            PDFObject::Stream { data, .. } => assert_eq!(data, b"abc"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_stream_bad_length_recovers() {
        // Declared length overshoots; the body is recovered by scanning
        let obj = parse_bytes(b"<< /Length 100 >> stream\nabc\nendstream").unwrap();
        match obj {
            PDFObject::Stream { data, .. } => assert_eq!(data, b"abc"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_parser_continues_after_stream() {
        let lexer = Lexer::new(Stream::from_bytes(
            b"<< /Length 2 >> stream\nok\nendstream 7".to_vec(),
        ));
        let mut parser = Parser::new(lexer).unwrap();
        let first = parser.get_object().unwrap();
        assert!(matches!(first, PDFObject::Stream { .. }));
        assert_eq!(parser.get_object().unwrap(), PDFObject::Integer(7));
    }

    #[test]
    fn test_unterminated_containers() {
        assert!(parse_str("[1 2 3").is_err());
        assert!(parse_str("<< /Type /Font").is_err());
    }

    #[test]
    fn test_strict_mode_rejects_bad_key() {
        let lexer = Lexer::new(Stream::from_bytes(b"<< 42 /Value >>".to_vec()));
        let mut parser = Parser::new(lexer).unwrap().with_recovery(false);
        assert!(parser.get_object().is_err());
    }

    #[test]
    fn test_recovery_skips_bad_key() {
        let obj = parse_str("<< 42 /Key (v) >>").unwrap();
        let dict = obj.as_dict().unwrap();
        assert_eq!(
            dict.get("Key"),
            Some(&PDFObject::String(b"v".to_vec()))
        );
    }
}
