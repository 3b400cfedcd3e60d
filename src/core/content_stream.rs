//! Content stream interpretation.
//!
//! One tokenizer feeds an operator state machine that tracks the text and
//! line matrices, the marked-content stack and the current font, and
//! routes shown text into one of three output modes: a flat byte sink
//! (stream), positioned spans (bounds), or per-MCID buffers (structured).
//! Inline image bodies are skipped at the byte level and never reach the
//! tokenizer.

use super::encoding::{FontCache, FontEncoding};
use super::error::{ErrorSink, PDFError, PDFResult};
use super::lexer::{Lexer, Token, is_delimiter, is_whitespace};
use super::parser::{Dict, PDFObject, Ref};
use super::stream::Stream;
use super::xref::XRef;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::rc::Rc;

/// Form XObjects may nest this deep before the subtree is dropped.
const MAX_FORM_DEPTH: usize = 10;

/// Operand buffer bound; operators never take more than a handful.
const MAX_OPERANDS: usize = 256;

/// Per-MCID text buffer cap in structured mode; overflow truncates.
const MCID_BUFFER_CAP: usize = 4096;

/// Fraction of the font size a vertical shift must exceed to count as a
/// line break. Keeps superscript nudges from splitting lines.
const LINE_BREAK_FACTOR: f64 = 0.7;

/// TJ adjustment (negative, thousandths of em) that reads as a word gap.
const TJ_SPACE_THRESHOLD: f64 = -100.0;

/// TJ adjustment that splits a bounds-mode span.
const TJ_FLUSH_THRESHOLD: f64 = -150.0;

/// Content operators the interpreter reacts to.
///
/// Everything else (paths, color, shading) only clears the operand
/// buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// q - Save graphics state
    Save,
    /// Q - Restore graphics state
    Restore,
    /// cm - Concatenate matrix to CTM
    Transform,
    /// BT - Begin text object
    BeginText,
    /// ET - End text object
    EndText,
    /// Tc - Set character spacing
    SetCharSpacing,
    /// Tw - Set word spacing
    SetWordSpacing,
    /// TL - Set text leading
    SetLeading,
    /// Tf - Select font and size
    SetFont,
    /// Td - Translate text line matrix
    MoveText,
    /// TD - Translate and set leading
    SetLeadingMoveText,
    /// Tm - Set text matrix absolutely
    SetTextMatrix,
    /// T* - Next line by leading
    NextLine,
    /// Tj - Show string
    ShowText,
    /// TJ - Show strings with positioning
    ShowSpacedText,
    /// ' - Next line, then show
    NextLineShowText,
    /// " - Set spacing, next line, show
    NextLineSetSpacingShowText,
    /// Do - Paint XObject
    PaintXObject,
    /// BI - Begin inline image
    BeginInlineImage,
    /// BMC - Begin marked content
    BeginMarkedContent,
    /// BDC - Begin marked content with properties
    BeginMarkedContentProps,
    /// EMC - End marked content
    EndMarkedContent,
}

impl OpCode {
    /// Maps an operator keyword to its opcode; None for operators the
    /// text path ignores.
    pub fn from_command(cmd: &str) -> Option<OpCode> {
        match cmd {
            "q" => Some(OpCode::Save),
            "Q" => Some(OpCode::Restore),
            "cm" => Some(OpCode::Transform),
            "BT" => Some(OpCode::BeginText),
            "ET" => Some(OpCode::EndText),
            "Tc" => Some(OpCode::SetCharSpacing),
            "Tw" => Some(OpCode::SetWordSpacing),
            "TL" => Some(OpCode::SetLeading),
            "Tf" => Some(OpCode::SetFont),
            "Td" => Some(OpCode::MoveText),
            "TD" => Some(OpCode::SetLeadingMoveText),
            "Tm" => Some(OpCode::SetTextMatrix),
            "T*" => Some(OpCode::NextLine),
            "Tj" => Some(OpCode::ShowText),
            "TJ" => Some(OpCode::ShowSpacedText),
            "'" => Some(OpCode::NextLineShowText),
            "\"" => Some(OpCode::NextLineSetSpacingShowText),
            "Do" => Some(OpCode::PaintXObject),
            "BI" => Some(OpCode::BeginInlineImage),
            "BMC" => Some(OpCode::BeginMarkedContent),
            "BDC" => Some(OpCode::BeginMarkedContentProps),
            "EMC" => Some(OpCode::EndMarkedContent),
            _ => None,
        }
    }
}

/// A text run with its glyph-run extent, in user-space points.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    /// [x0, y0, x1, y1], origin lower-left
    pub bbox: [f64; 4],
    pub text: String,
    pub font_size: f64,
}

/// An image XObject placement observed during interpretation.
#[derive(Debug, Clone)]
pub struct PlacedImage {
    /// Unit square mapped through the CTM at paint time
    pub rect: [f64; 4],
    /// Intrinsic pixel dimensions from the image dictionary
    pub width: i64,
    pub height: i64,
}

/// Where decoded text goes; the state machine is shared, only the
/// handlers differ.
pub enum OutputMode {
    /// Flat UTF-8 accumulation in stream order
    Stream { out: String },

    /// Positioned span records
    Bounds {
        spans: Vec<TextSpan>,
        current: Option<SpanBuilder>,
    },

    /// Text routed to the innermost marked-content id
    Structured { by_mcid: FxHashMap<i32, String> },
}

impl OutputMode {
    pub fn stream() -> Self {
        OutputMode::Stream { out: String::new() }
    }

    pub fn bounds() -> Self {
        OutputMode::Bounds {
            spans: Vec::new(),
            current: None,
        }
    }

    pub fn structured() -> Self {
        OutputMode::Structured {
            by_mcid: FxHashMap::default(),
        }
    }
}

/// An in-progress bounds-mode span.
pub struct SpanBuilder {
    origin: (f64, f64),
    width: f64,
    font_size: f64,
    text: String,
}

impl SpanBuilder {
    fn finish(self) -> TextSpan {
        TextSpan {
            bbox: [
                self.origin.0,
                self.origin.1,
                self.origin.0 + self.width,
                self.origin.1 + self.font_size,
            ],
            text: self.text,
            font_size: self.font_size,
        }
    }
}

/// 2D affine matrix as [a b c d e f].
type Matrix = [f64; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// `first` applied before `second`.
fn mat_mul(first: Matrix, second: Matrix) -> Matrix {
    [
        first[0] * second[0] + first[1] * second[2],
        first[0] * second[1] + first[1] * second[3],
        first[2] * second[0] + first[3] * second[2],
        first[2] * second[1] + first[3] * second[3],
        first[4] * second[0] + first[5] * second[2] + second[4],
        first[4] * second[1] + first[5] * second[3] + second[5],
    ]
}

fn translation(tx: f64, ty: f64) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

fn apply(m: Matrix, point: (f64, f64)) -> (f64, f64) {
    (
        m[0] * point.0 + m[2] * point.1 + m[4],
        m[1] * point.0 + m[3] * point.1 + m[5],
    )
}

/// Tokenizer for content streams.
///
/// Content streams carry no indirect references, so no lookahead is
/// needed — and inline image bodies require byte-level control the
/// object parser cannot give.
struct ContentParser {
    lexer: Lexer,
}

enum ContentToken {
    Operand(PDFObject),
    Operator(String),
    Eof,
}

impl ContentParser {
    fn new(content: Vec<u8>) -> Self {
        ContentParser {
            lexer: Lexer::new(Stream::from_bytes(content)),
        }
    }

    fn next(&mut self) -> PDFResult<ContentToken> {
        loop {
            let token = match self.lexer.get_token() {
                Ok(token) => token,
                Err(e) => {
                    // Damaged operand; skip the byte(s) and resynchronize
                    log::debug!("content tokenizer recovered: {}", e);
                    continue;
                }
            };

            return Ok(match token {
                Token::EOF => ContentToken::Eof,
                Token::Command(cmd) => ContentToken::Operator(cmd),
                other => ContentToken::Operand(self.object_from(other)?),
            });
        }
    }

    /// Builds an operand object from a leading token.
    fn object_from(&mut self, token: Token) -> PDFResult<PDFObject> {
        Ok(match token {
            Token::Integer(n) => PDFObject::Integer(n),
            Token::Real(r) => PDFObject::Real(r),
            Token::Boolean(b) => PDFObject::Boolean(b),
            Token::Null => PDFObject::Null,
            Token::String(s) => PDFObject::String(s),
            Token::HexString(s) => PDFObject::HexString(s),
            Token::Name(n) => PDFObject::Name(n),
            Token::ArrayStart => {
                let mut array = SmallVec::new();
                loop {
                    match self.lexer.get_token() {
                        Ok(Token::ArrayEnd) | Ok(Token::EOF) => break,
                        Ok(inner) => array.push(Box::new(self.object_from(inner)?)),
                        Err(_) => continue,
                    }
                }
                PDFObject::Array(array)
            }
            Token::DictStart => {
                let mut dict = Dict::new();
                loop {
                    let key = match self.lexer.get_token() {
                        Ok(Token::Name(name)) => name,
                        Ok(Token::DictEnd) | Ok(Token::EOF) => break,
                        _ => continue,
                    };
                    match self.lexer.get_token() {
                        Ok(Token::DictEnd) | Ok(Token::EOF) => {
                            dict.insert(key, PDFObject::Null);
                            break;
                        }
                        Ok(value) => {
                            let value = self.object_from(value)?;
                            dict.insert(key, value);
                        }
                        Err(_) => continue,
                    }
                }
                PDFObject::Dictionary(dict)
            }
            // Operators and structural leftovers read as null operands
            _ => PDFObject::Null,
        })
    }

    /// Skips an inline image: tokens up to `ID`, then raw bytes until a
    /// whitespace-bounded `EI`. The body itself is never tokenized.
    fn skip_inline_image(&mut self) -> PDFResult<()> {
        // Image dictionary tokens up to the ID marker
        loop {
            match self.lexer.get_token() {
                Ok(Token::Command(cmd)) if cmd == "ID" => break,
                Ok(Token::EOF) => return Ok(()),
                Ok(_) => {}
                Err(_) => continue,
            }
        }

        // One whitespace byte separates ID from the data; the cursor
        // already holds it. Scan for whitespace + "EI" + boundary.
        let mut prev_was_ws = true;
        loop {
            let b = self.lexer.raw_byte();
            if b < 0 {
                return Ok(()); // truncated image data
            }

            if prev_was_ws && b == 0x45 {
                // 'E' — candidate; 'I' plus a boundary byte must follow
                let b2 = self.lexer.raw_byte();
                if b2 == 0x49 {
                    let boundary = self.lexer.raw_byte();
                    if boundary < 0 || is_whitespace(boundary) || is_delimiter(boundary) {
                        return Ok(());
                    }
                    prev_was_ws = is_whitespace(boundary);
                    continue;
                }
                prev_was_ws = b2 >= 0 && is_whitespace(b2);
                continue;
            }

            prev_was_ws = is_whitespace(b);
        }
    }
}

/// Saved state for q/Q and form recursion.
struct GraphicsFrame {
    ctm: Matrix,
    font: Option<Rc<FontEncoding>>,
    font_size: f64,
}

/// The operator state machine driving text extraction.
pub struct ContentInterpreter<'a> {
    xref: &'a mut XRef,
    fonts: &'a mut FontCache,
    errors: &'a mut ErrorSink,

    /// Scope for the page-qualified font cache key
    font_scope: usize,

    mode: OutputMode,

    /// Image placements, collected when requested
    images: Option<Vec<PlacedImage>>,

    // Text state
    text_matrix: Matrix,
    line_matrix: Matrix,
    ctm: Matrix,
    state_stack: Vec<GraphicsFrame>,
    font: Option<Rc<FontEncoding>>,
    font_size: f64,
    /// Font size at the last text-showing operator, kept apart from the
    /// active size so superscripts don't shrink the line-break threshold
    last_text_font_size: f64,
    leading: f64,
    char_spacing: f64,
    word_spacing: f64,
    /// A baseline exists once any text has been shown
    baseline_set: bool,

    // Marked-content stacks; -1 is the "no MCID" sentinel
    mc_tags: Vec<String>,
    mc_ids: Vec<i32>,
}

impl<'a> ContentInterpreter<'a> {
    pub fn new(
        xref: &'a mut XRef,
        fonts: &'a mut FontCache,
        errors: &'a mut ErrorSink,
        font_scope: usize,
        mode: OutputMode,
    ) -> Self {
        ContentInterpreter {
            xref,
            fonts,
            errors,
            font_scope,
            mode,
            images: None,
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            ctm: IDENTITY,
            state_stack: Vec::new(),
            font: None,
            font_size: 0.0,
            last_text_font_size: 0.0,
            leading: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            baseline_set: false,
            mc_tags: Vec::new(),
            mc_ids: Vec::new(),
        }
    }

    /// Also record image XObject placements while interpreting.
    pub fn collect_images(mut self) -> Self {
        self.images = Some(Vec::new());
        self
    }

    /// Interprets one page's content against its resources.
    pub fn run(&mut self, content: Vec<u8>, resources: Option<&Dict>) -> PDFResult<()> {
        self.run_at_depth(content, resources, self.font_scope, 0)
    }

    /// Consumes the interpreter, yielding the filled output mode and any
    /// collected images.
    pub fn finish(mut self) -> (OutputMode, Vec<PlacedImage>) {
        // A dangling bounds span is still a span
        if let OutputMode::Bounds { spans, current } = &mut self.mode {
            if let Some(builder) = current.take() {
                spans.push(builder.finish());
            }
        }
        (self.mode, self.images.unwrap_or_default())
    }

    fn run_at_depth(
        &mut self,
        content: Vec<u8>,
        resources: Option<&Dict>,
        font_scope: usize,
        depth: usize,
    ) -> PDFResult<()> {
        let mut parser = ContentParser::new(content);
        let mut operands: Vec<PDFObject> = Vec::with_capacity(16);

        loop {
            match parser.next()? {
                ContentToken::Eof => break,
                ContentToken::Operand(obj) => {
                    if operands.len() >= MAX_OPERANDS {
                        log::warn!("operand buffer overflow; dropping oldest");
                        operands.remove(0);
                    }
                    operands.push(obj);
                }
                ContentToken::Operator(cmd) => {
                    match OpCode::from_command(&cmd) {
                        Some(OpCode::BeginInlineImage) => {
                            parser.skip_inline_image()?;
                        }
                        Some(op) => {
                            self.execute(op, &operands, resources, font_scope, depth)?;
                        }
                        None => {} // ignored operator
                    }
                    operands.clear();
                }
            }
        }

        Ok(())
    }

    fn execute(
        &mut self,
        op: OpCode,
        operands: &[PDFObject],
        resources: Option<&Dict>,
        font_scope: usize,
        depth: usize,
    ) -> PDFResult<()> {
        match op {
            OpCode::Save => {
                self.state_stack.push(GraphicsFrame {
                    ctm: self.ctm,
                    font: self.font.clone(),
                    font_size: self.font_size,
                });
            }
            OpCode::Restore => {
                if let Some(frame) = self.state_stack.pop() {
                    self.ctm = frame.ctm;
                    self.font = frame.font;
                    self.font_size = frame.font_size;
                }
            }
            OpCode::Transform => {
                if let Some(m) = matrix_operands(operands) {
                    self.ctm = mat_mul(m, self.ctm);
                }
            }

            OpCode::BeginText => {
                self.text_matrix = IDENTITY;
                self.line_matrix = IDENTITY;
            }
            OpCode::EndText => {
                self.flush_span();
            }

            OpCode::SetCharSpacing => {
                if let Some(n) = last_number(operands) {
                    self.char_spacing = n;
                }
            }
            OpCode::SetWordSpacing => {
                if let Some(n) = last_number(operands) {
                    self.word_spacing = n;
                }
            }
            OpCode::SetLeading => {
                if let Some(n) = last_number(operands) {
                    self.leading = n;
                }
            }

            OpCode::SetFont => {
                if operands.len() >= 2 {
                    if let (Some(name), Some(size)) =
                        (operands[0].as_name(), operands[1].as_number())
                    {
                        self.font_size = size;
                        let encoding = self.fonts.encoding_for(
                            font_scope,
                            name,
                            resources,
                            self.xref,
                            self.errors,
                        )?;
                        self.font = Some(encoding);
                    }
                }
            }

            OpCode::MoveText => {
                if let (Some(tx), Some(ty)) = two_numbers(operands) {
                    self.translate_line(tx, ty);
                }
            }
            OpCode::SetLeadingMoveText => {
                if let (Some(tx), Some(ty)) = two_numbers(operands) {
                    self.leading = -ty;
                    self.translate_line(tx, ty);
                }
            }
            OpCode::SetTextMatrix => {
                if let Some(m) = matrix_operands(operands) {
                    self.set_text_matrix(m);
                }
            }
            OpCode::NextLine => {
                let leading = self.leading;
                self.translate_line(0.0, -leading);
            }

            OpCode::ShowText => {
                if let Some(bytes) = operands.last().and_then(|o| o.as_string_bytes()) {
                    self.show_text(bytes);
                }
            }
            OpCode::ShowSpacedText => {
                if let Some(arr) = operands.last().and_then(|o| o.as_array()) {
                    self.show_spaced_text(arr);
                }
            }
            OpCode::NextLineShowText => {
                let leading = self.leading;
                self.translate_line(0.0, -leading);
                if let Some(bytes) = operands.last().and_then(|o| o.as_string_bytes()) {
                    self.show_text(bytes);
                }
            }
            OpCode::NextLineSetSpacingShowText => {
                if operands.len() >= 3 {
                    if let (Some(aw), Some(ac)) =
                        (operands[0].as_number(), operands[1].as_number())
                    {
                        self.word_spacing = aw;
                        self.char_spacing = ac;
                    }
                    let leading = self.leading;
                    self.translate_line(0.0, -leading);
                    if let Some(bytes) = operands[2].as_string_bytes() {
                        self.show_text(bytes);
                    }
                }
            }

            OpCode::PaintXObject => {
                if let Some(name) = operands.last().and_then(|o| o.as_name()) {
                    let name = name.to_string();
                    self.paint_xobject(&name, resources, depth)?;
                }
            }

            OpCode::BeginMarkedContent => {
                let tag = operands
                    .first()
                    .and_then(|o| o.as_name())
                    .unwrap_or("")
                    .to_string();
                self.mc_tags.push(tag);
                self.mc_ids.push(-1);
            }
            OpCode::BeginMarkedContentProps => {
                let tag = operands
                    .first()
                    .and_then(|o| o.as_name())
                    .unwrap_or("")
                    .to_string();
                // MCID comes from the properties dict; a bare name means
                // the properties live in /Properties, which carries no
                // MCID worth chasing on the hot path
                let mcid = operands
                    .get(1)
                    .and_then(|o| o.as_dict())
                    .and_then(|d| d.get("MCID"))
                    .and_then(|m| m.as_integer())
                    .map(|m| m as i32)
                    .unwrap_or(-1);
                self.mc_tags.push(tag);
                self.mc_ids.push(mcid);
            }
            OpCode::EndMarkedContent => {
                self.mc_tags.pop();
                self.mc_ids.pop();
            }

            OpCode::BeginInlineImage => unreachable!("handled by the tokenizer"),
        }

        Ok(())
    }

    /// Innermost marked-content id that is not the sentinel.
    fn current_mcid(&self) -> i32 {
        self.mc_ids
            .iter()
            .rev()
            .copied()
            .find(|&id| id >= 0)
            .unwrap_or(-1)
    }

    /// Translates the line matrix and re-evaluates the line-break
    /// predicate for the displacement.
    fn translate_line(&mut self, tx: f64, ty: f64) {
        self.line_matrix = mat_mul(translation(tx, ty), self.line_matrix);
        self.text_matrix = self.line_matrix;

        let wmode = self.font.as_ref().map(|f| f.wmode).unwrap_or(0);
        let displacement = if wmode == 0 { ty } else { tx };
        self.maybe_newline(displacement);
        self.maybe_flush_on_move();
    }

    /// Absolute text matrix; the predicate runs against the previous
    /// absolute position.
    fn set_text_matrix(&mut self, m: Matrix) {
        let wmode = self.font.as_ref().map(|f| f.wmode).unwrap_or(0);
        let displacement = if wmode == 0 {
            m[5] - self.line_matrix[5]
        } else {
            m[4] - self.line_matrix[4]
        };

        self.text_matrix = m;
        self.line_matrix = m;

        self.maybe_newline(displacement);
        self.maybe_flush_on_move();
    }

    /// Emits a newline when the baseline moved further than the larger of
    /// the active and last-shown font sizes allows.
    fn maybe_newline(&mut self, displacement: f64) {
        if !self.baseline_set {
            return;
        }
        let threshold = self.font_size.max(self.last_text_font_size) * LINE_BREAK_FACTOR;
        if displacement.abs() > threshold && threshold > 0.0 {
            self.emit_newline();
        }
    }

    fn emit_newline(&mut self) {
        if matches!(self.mode, OutputMode::Bounds { .. }) {
            self.flush_span();
            return;
        }
        let mcid = self.current_mcid();
        match &mut self.mode {
            OutputMode::Stream { out } => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            OutputMode::Bounds { .. } => {}
            OutputMode::Structured { by_mcid } => {
                if let Some(buf) = by_mcid.get_mut(&mcid) {
                    if !buf.is_empty() && !buf.ends_with('\n') && buf.len() < MCID_BUFFER_CAP {
                        buf.push('\n');
                    }
                }
            }
        }
    }

    fn emit_space(&mut self) {
        let mcid = self.current_mcid();
        match &mut self.mode {
            OutputMode::Stream { out } => {
                if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                    out.push(' ');
                }
            }
            OutputMode::Bounds { .. } => {}
            OutputMode::Structured { by_mcid } => {
                if let Some(buf) = by_mcid.get_mut(&mcid) {
                    if !buf.is_empty()
                        && !buf.ends_with(char::is_whitespace)
                        && buf.len() < MCID_BUFFER_CAP
                    {
                        buf.push(' ');
                    }
                }
            }
        }
    }

    /// Bounds mode: a move that does not continue the current span's
    /// baseline closes it.
    fn maybe_flush_on_move(&mut self) {
        let (x, y) = apply(self.ctm, (self.text_matrix[4], self.text_matrix[5]));
        if let OutputMode::Bounds { spans, current } = &mut self.mode {
            if let Some(builder) = current.take() {
                let end_x = builder.origin.0 + builder.width;
                let same_line = (y - builder.origin.1).abs() < builder.font_size * 0.25;
                let gap = (x - end_x).abs();
                if !same_line || gap > builder.font_size.max(1.0) {
                    spans.push(builder.finish());
                } else {
                    *current = Some(builder);
                }
            }
        }
    }

    fn flush_span(&mut self) {
        if let OutputMode::Bounds { spans, current } = &mut self.mode {
            if let Some(builder) = current.take() {
                spans.push(builder.finish());
            }
        }
    }

    /// Shows one string: decodes glyphs through the current encoding,
    /// advances the text matrix, and routes text to the active mode.
    fn show_text(&mut self, bytes: &[u8]) {
        let font = match &self.font {
            Some(font) => Rc::clone(font),
            None => {
                let fallback = Rc::new(FontEncoding::fallback());
                self.font = Some(Rc::clone(&fallback));
                fallback
            }
        };

        let font_size = self.font_size;
        let char_spacing = self.char_spacing;
        let word_spacing = self.word_spacing;

        // Total advance in text-space units, accumulated per glyph
        let mut advance = 0.0;
        let mut decoded = String::new();
        font.for_each_glyph(bytes, |text, width| {
            decoded.push_str(text);
            let mut glyph_advance = width / 1000.0 * font_size + char_spacing;
            if text == " " {
                glyph_advance += word_spacing;
            }
            advance += glyph_advance;
        });

        let origin = apply(self.ctm, (self.text_matrix[4], self.text_matrix[5]));
        let mcid = self.current_mcid();

        match &mut self.mode {
            OutputMode::Stream { out } => out.push_str(&decoded),
            OutputMode::Structured { by_mcid } => {
                let buf = by_mcid.entry(mcid).or_default();
                push_capped(buf, &decoded, MCID_BUFFER_CAP);
            }
            OutputMode::Bounds { current, .. } => {
                let builder = current.get_or_insert_with(|| SpanBuilder {
                    origin,
                    width: 0.0,
                    font_size,
                    text: String::new(),
                });
                builder.text.push_str(&decoded);
                builder.width += advance;
                builder.font_size = builder.font_size.max(font_size);
            }
        }

        // Advance the text matrix along the writing direction
        self.text_matrix = mat_mul(translation(advance, 0.0), self.text_matrix);

        if !decoded.is_empty() {
            self.last_text_font_size = font_size;
            self.baseline_set = true;
        }
    }

    /// TJ: strings interleaved with positioning adjustments.
    fn show_spaced_text(&mut self, items: &[Box<PDFObject>]) {
        for item in items {
            if let Some(bytes) = item.as_string_bytes() {
                self.show_text(bytes);
            } else if let Some(n) = item.as_number() {
                // Negative adjustments move forward by n/1000 em
                let shift = -n / 1000.0 * self.font_size;
                self.text_matrix = mat_mul(translation(shift, 0.0), self.text_matrix);

                if matches!(self.mode, OutputMode::Bounds { .. }) {
                    if n < TJ_FLUSH_THRESHOLD {
                        self.flush_span();
                    } else if let OutputMode::Bounds {
                        current: Some(builder),
                        ..
                    } = &mut self.mode
                    {
                        builder.width += shift;
                    }
                } else if n < TJ_SPACE_THRESHOLD {
                    self.emit_space();
                }
            }
        }
    }

    /// Do: recurse into Form XObjects, record image placements.
    fn paint_xobject(
        &mut self,
        name: &str,
        resources: Option<&Dict>,
        depth: usize,
    ) -> PDFResult<()> {
        let entry = resources
            .and_then(|res| res.get("XObject"))
            .cloned()
            .map(|x| self.xref.fetch_if_ref(&x))
            .transpose()?
            .and_then(|x| x.as_dict().and_then(|d| d.get(name).cloned()));

        let entry = match entry {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let entry_ref = entry.as_ref_obj();

        let xobject = match self.xref.fetch_if_ref(&entry) {
            Ok(obj) => obj,
            Err(e) => return self.errors.report(e, 0),
        };

        let (dict, data) = match xobject {
            PDFObject::Stream { dict, data, .. } => (dict, data),
            _ => return Ok(()),
        };

        match dict.get("Subtype").and_then(|s| s.as_name()) {
            Some("Image") => {
                if let Some(images) = &mut self.images {
                    let corners = [
                        apply(self.ctm, (0.0, 0.0)),
                        apply(self.ctm, (1.0, 0.0)),
                        apply(self.ctm, (0.0, 1.0)),
                        apply(self.ctm, (1.0, 1.0)),
                    ];
                    let xs = corners.iter().map(|c| c.0);
                    let ys = corners.iter().map(|c| c.1);
                    images.push(PlacedImage {
                        rect: [
                            xs.clone().fold(f64::INFINITY, f64::min),
                            ys.clone().fold(f64::INFINITY, f64::min),
                            xs.fold(f64::NEG_INFINITY, f64::max),
                            ys.fold(f64::NEG_INFINITY, f64::max),
                        ],
                        width: dict.get("Width").and_then(|w| w.as_integer()).unwrap_or(0),
                        height: dict.get("Height").and_then(|h| h.as_integer()).unwrap_or(0),
                    });
                }
                Ok(())
            }
            Some("Form") => {
                if depth >= MAX_FORM_DEPTH {
                    return self.errors.report(
                        PDFError::syntax(format!(
                            "form XObject nesting deeper than {}",
                            MAX_FORM_DEPTH
                        )),
                        0,
                    );
                }

                let payload = match super::decode::decode_stream_object(&dict, &data) {
                    Ok(payload) => payload,
                    Err(e) => return self.errors.report(e, 0),
                };

                // The form's own resources win; otherwise it inherits the
                // caller's, and the font cache scope must follow suit
                let own_resources = match dict.get("Resources") {
                    Some(res) => match self.xref.fetch_if_ref(res) {
                        Ok(PDFObject::Dictionary(d)) => Some(d),
                        _ => None,
                    },
                    None => None,
                };
                let (form_resources, form_scope) = match (&own_resources, entry_ref) {
                    (Some(own), Some(Ref { num, .. })) => {
                        (Some(own), 1_000_000 + num as usize)
                    }
                    (Some(own), None) => (Some(own), self.font_scope),
                    (None, _) => (resources, self.font_scope),
                };

                // Save the caller's frame around the recursion
                let saved = (
                    self.text_matrix,
                    self.line_matrix,
                    self.ctm,
                    self.font.clone(),
                    self.font_size,
                );
                if let Some(m) = dict.get("Matrix").and_then(|m| matrix_from_object(m)) {
                    self.ctm = mat_mul(m, self.ctm);
                }

                let result =
                    self.run_at_depth(payload, form_resources, form_scope, depth + 1);

                let (text_matrix, line_matrix, ctm, font, font_size) = saved;
                self.text_matrix = text_matrix;
                self.line_matrix = line_matrix;
                self.ctm = ctm;
                self.font = font;
                self.font_size = font_size;

                result
            }
            _ => Ok(()),
        }
    }
}

/// Appends to a bounded buffer, truncating at a char boundary.
fn push_capped(buf: &mut String, text: &str, cap: usize) {
    if buf.len() >= cap {
        return;
    }
    let room = cap - buf.len();
    if text.len() <= room {
        buf.push_str(text);
    } else {
        for ch in text.chars() {
            if buf.len() + ch.len_utf8() > cap {
                break;
            }
            buf.push(ch);
        }
    }
}

fn last_number(operands: &[PDFObject]) -> Option<f64> {
    operands.last().and_then(|o| o.as_number())
}

fn two_numbers(operands: &[PDFObject]) -> (Option<f64>, Option<f64>) {
    if operands.len() >= 2 {
        (
            operands[operands.len() - 2].as_number(),
            operands[operands.len() - 1].as_number(),
        )
    } else {
        (None, None)
    }
}

fn matrix_operands(operands: &[PDFObject]) -> Option<Matrix> {
    if operands.len() < 6 {
        return None;
    }
    let mut m = [0.0; 6];
    for (i, slot) in m.iter_mut().enumerate() {
        *slot = operands[operands.len() - 6 + i].as_number()?;
    }
    Some(m)
}

fn matrix_from_object(obj: &PDFObject) -> Option<Matrix> {
    let arr = obj.as_array()?;
    if arr.len() < 6 {
        return None;
    }
    let mut m = [0.0; 6];
    for (i, slot) in m.iter_mut().enumerate() {
        *slot = arr[i].as_number()?;
    }
    Some(m)
}
