use super::content_stream::{ContentInterpreter, OutputMode, PlacedImage, TextSpan};
use super::encoding::{FontCache, decode_text_string};
use super::error::{ErrorPolicy, ErrorRecord, ErrorSink, PDFError, PDFResult};
use super::page::{Page, flatten_page_tree, rect_from};
use super::parser::{Dict, PDFObject, Ref};
use super::stream::{ByteSource, Stream};
use super::structure::StructureTree;
use super::xref::XRef;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use std::rc::Rc;

/// The header must appear within this prefix of the file.
const HEADER_SEARCH_WINDOW: usize = 1024;

/// startxref is searched for in this suffix of the file.
const STARTXREF_SEARCH_WINDOW: usize = 1024;

/// Geometric fallback: spans within this many points of y share a line.
const LINE_BIN_TOLERANCE: f64 = 3.0;

/// Page separator in whole-document output.
const PAGE_SEPARATOR: char = '\x0c';

/// Tunables fixed at open time.
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    /// How recoverable errors are handled
    pub policy: ErrorPolicy,

    /// Structured output is accepted when its length reaches this
    /// fraction of the stream-order length. Partially tagged documents
    /// have structure trees covering only part of each page; the ratio is
    /// the coverage proxy.
    pub structured_coverage_threshold: f64,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        DocumentConfig {
            policy: ErrorPolicy::Default,
            structured_coverage_threshold: 0.6,
        }
    }
}

/// The /Info dictionary, decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub mod_date: Option<String>,
}

/// One flattened outline (bookmark) entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineItem {
    pub title: String,
    /// Zero-based destination page, when resolvable
    pub page: Option<usize>,
    /// Nesting depth, root entries at 0
    pub level: usize,
}

/// One hit from `search`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub page: usize,
    /// Byte offset into that page's extracted text
    pub offset: usize,
    /// Text surrounding the hit
    pub context: String,
}

/// A link annotation on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub rect: [f64; 4],
    pub uri: Option<String>,
    pub dest_page: Option<usize>,
}

/// An interactive form field.
#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    /// Fully qualified name (parents joined with '.')
    pub name: String,
    pub value: Option<String>,
    /// /FT: Tx, Btn, Ch, Sig
    pub field_type: String,
    pub rect: Option<[f64; 4]>,
}

/// An open PDF document.
///
/// Owns the byte window, the cross-reference view, the flattened page
/// list and every cache. All methods are synchronous and the structure is
/// single-threaded; use one document per thread for parallel extraction.
pub struct PDFDocument {
    xref: XRef,
    pages: Vec<Page>,
    fonts: FontCache,
    errors: ErrorSink,
    config: DocumentConfig,

    /// Per-page MCID reading order, built on first use
    mcid_orders: FxHashMap<u32, Vec<i32>>,
    structure_loaded: bool,
}

impl PDFDocument {
    /// Opens a file from disk.
    pub fn open(path: impl AsRef<Path>) -> PDFResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| PDFError::io(e.to_string()))?;
        Self::open_memory(bytes)
    }

    /// Opens an in-memory copy of a PDF with the default configuration.
    pub fn open_memory(bytes: Vec<u8>) -> PDFResult<Self> {
        Self::open_memory_with_config(bytes, DocumentConfig::default())
    }

    pub fn open_memory_with_config(bytes: Vec<u8>, config: DocumentConfig) -> PDFResult<Self> {
        Self::open_source(Rc::new(ByteSource::Owned(bytes)), config)
    }

    /// Opens caller-lent memory without copying.
    ///
    /// # Safety
    /// The memory at `ptr..ptr+len` must stay valid and unmodified until
    /// the document is dropped.
    pub unsafe fn open_memory_unsafe(
        ptr: *const u8,
        len: usize,
        config: DocumentConfig,
    ) -> PDFResult<Self> {
        Self::open_source(Rc::new(ByteSource::Borrowed { ptr, len }), config)
    }

    fn open_source(source: Rc<ByteSource>, config: DocumentConfig) -> PDFResult<Self> {
        let mut errors = ErrorSink::new(config.policy);
        let data = source.as_slice();

        // Header: %PDF-d.d somewhere in the first kilobyte
        let header_window = &data[..data.len().min(HEADER_SEARCH_WINDOW)];
        if !header_window
            .windows(5)
            .any(|w| w == b"%PDF-")
        {
            errors.report(
                PDFError::InvalidHeader {
                    message: "no %PDF- marker in the first 1024 bytes".into(),
                },
                0,
            )?;
        }

        let startxref = Self::find_startxref(data)?;

        let stream = Stream::new(Rc::clone(&source), 0, source.len());
        let strict = config.policy == ErrorPolicy::Strict;
        let mut xref = XRef::new(stream, strict);
        xref.parse_at(startxref)?;

        if xref.is_encrypted() {
            // Never fatal, under any policy; the caller consults
            // is_encrypted() and decides
            errors.note(PDFError::Encrypted, 0);
        }

        let catalog = xref.catalog()?;
        let catalog = catalog
            .as_dict()
            .cloned()
            .ok_or_else(|| PDFError::syntax("/Root is not a dictionary"))?;

        let pages = flatten_page_tree(&mut xref, &catalog, &mut errors)?;

        Ok(PDFDocument {
            xref,
            pages,
            fonts: FontCache::default(),
            errors,
            config,
            mcid_orders: FxHashMap::default(),
            structure_loaded: false,
        })
    }

    /// Locates the startxref pointer near the end of the file.
    fn find_startxref(data: &[u8]) -> PDFResult<usize> {
        let tail_start = data.len().saturating_sub(STARTXREF_SEARCH_WINDOW);
        let tail = &data[tail_start..];

        let keyword = b"startxref";
        let pos = tail
            .windows(keyword.len())
            .rposition(|w| w == keyword)
            .ok_or_else(|| PDFError::xref("startxref not found"))?;

        let mut rest = &tail[pos + keyword.len()..];
        while let [b, tail @ ..] = rest {
            if b.is_ascii_whitespace() {
                rest = tail;
            } else {
                break;
            }
        }

        let digits: Vec<u8> = rest
            .iter()
            .copied()
            .take_while(u8::is_ascii_digit)
            .collect();
        if digits.is_empty() {
            return Err(PDFError::xref("no offset after startxref"));
        }

        std::str::from_utf8(&digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| PDFError::xref("unparsable startxref offset"))
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// True when any trailer in the update chain carries /Encrypt.
    /// Extraction still runs, but encrypted streams decode to nonsense.
    pub fn is_encrypted(&self) -> bool {
        self.xref.is_encrypted()
    }

    /// (width, height, rotation) of a page in user-space points.
    pub fn page_info(&self, page: usize) -> PDFResult<(f64, f64, i32)> {
        let p = self.page(page)?;
        Ok((p.width(), p.height(), p.rotation))
    }

    /// Errors recovered so far.
    pub fn error_records(&self) -> &[ErrorRecord] {
        self.errors.records()
    }

    fn page(&self, page: usize) -> PDFResult<&Page> {
        self.pages.get(page).ok_or(PDFError::PageNotFound {
            page,
            page_count: self.pages.len(),
        })
    }

    /// Extracts one page in reading order (accuracy mode).
    ///
    /// Tagged documents go through the structure tree when it covers
    /// enough of the page; everything else falls back to stream order.
    pub fn extract_page(&mut self, page: usize) -> PDFResult<String> {
        let stream_text = match self.extract_page_fast(page) {
            Ok(text) => text,
            Err(PDFError::PageNotFound { page, page_count }) => {
                return Err(PDFError::PageNotFound { page, page_count });
            }
            Err(e) => {
                // Stream order failed outright; geometric assembly is the
                // last resort
                self.errors.report(e, 0)?;
                return Ok(self
                    .extract_bounds(page)
                    .map(|spans| assemble_geometric(&spans))
                    .unwrap_or_default());
            }
        };

        let mcids = self.page_mcid_order(page)?;
        let mcids = match mcids {
            Some(list) if !list.is_empty() => list,
            _ => return Ok(stream_text),
        };

        let (mode, _) = self.interpret_page(page, OutputMode::structured(), false)?;
        let by_mcid = match mode {
            OutputMode::Structured { by_mcid } => by_mcid,
            _ => unreachable!(),
        };

        let mut structured = String::new();
        for mcid in &mcids {
            if let Some(chunk) = by_mcid.get(mcid) {
                let chunk = chunk.trim_matches('\n');
                if chunk.is_empty() {
                    continue;
                }
                if !structured.is_empty() {
                    structured.push(' ');
                }
                structured.push_str(chunk);
            }
        }

        // Partially tagged pages yield short structured text; keep stream
        // order unless the tree covered enough of the page
        let threshold = self.config.structured_coverage_threshold;
        if (structured.len() as f64) >= threshold * stream_text.len() as f64 {
            Ok(structured)
        } else {
            Ok(stream_text)
        }
    }

    /// Extracts one page in raw stream order.
    pub fn extract_page_fast(&mut self, page: usize) -> PDFResult<String> {
        let (mode, _) = self.interpret_page(page, OutputMode::stream(), false)?;
        match mode {
            OutputMode::Stream { out } => Ok(out),
            _ => unreachable!(),
        }
    }

    /// Whole document in accuracy mode, pages separated by form feeds.
    pub fn extract_all(&mut self) -> PDFResult<String> {
        self.extract_document(true)
    }

    /// Whole document in stream order.
    pub fn extract_all_fast(&mut self) -> PDFResult<String> {
        self.extract_document(false)
    }

    fn extract_document(&mut self, accurate: bool) -> PDFResult<String> {
        let mut out = String::new();
        for page in 0..self.pages.len() {
            if page > 0 {
                out.push(PAGE_SEPARATOR);
            }
            let text = if accurate {
                self.extract_page(page)?
            } else {
                self.extract_page_fast(page)?
            };
            out.push_str(text.trim_end_matches('\n'));
        }
        Ok(out)
    }

    /// Positioned text spans for one page.
    pub fn extract_bounds(&mut self, page: usize) -> PDFResult<Vec<TextSpan>> {
        let (mode, _) = self.interpret_page(page, OutputMode::bounds(), false)?;
        match mode {
            OutputMode::Bounds { spans, .. } => Ok(spans),
            _ => unreachable!(),
        }
    }

    /// One page rendered as Markdown.
    ///
    /// Lines are regrouped from bounds-mode spans; conspicuously large
    /// font sizes become headings.
    pub fn extract_markdown(&mut self, page: usize) -> PDFResult<String> {
        let spans = self.extract_bounds(page)?;
        if spans.is_empty() {
            return Ok(String::new());
        }

        // Group spans into lines by binned baseline
        let mut lines: FxHashMap<i64, Vec<&TextSpan>> = FxHashMap::default();
        for span in &spans {
            let bin = (span.bbox[1] / LINE_BIN_TOLERANCE).round() as i64;
            lines.entry(bin).or_default().push(span);
        }
        let mut bins: Vec<i64> = lines.keys().copied().collect();
        bins.sort_unstable_by(|a, b| b.cmp(a)); // top of page first

        // Median font size stands in for the body size
        let mut sizes: Vec<f64> = spans.iter().map(|s| s.font_size).collect();
        sizes.sort_by(f64::total_cmp);
        let body_size = sizes[sizes.len() / 2];

        let mut out = String::new();
        for bin in bins {
            let mut line_spans = lines.remove(&bin).unwrap_or_default();
            line_spans.sort_by(|a, b| a.bbox[0].total_cmp(&b.bbox[0]));

            let line_size = line_spans
                .iter()
                .map(|s| s.font_size)
                .fold(0.0f64, f64::max);
            let text: Vec<&str> = line_spans.iter().map(|s| s.text.trim()).collect();
            let text = text.join(" ");
            if text.trim().is_empty() {
                continue;
            }

            if line_size >= body_size * 1.7 {
                out.push_str("# ");
            } else if line_size >= body_size * 1.3 {
                out.push_str("## ");
            }
            out.push_str(text.trim());
            out.push('\n');
        }

        Ok(out)
    }

    /// Whole document in accuracy mode (alias on the capability surface).
    pub fn reading_order_all(&mut self) -> PDFResult<String> {
        self.extract_all()
    }

    /// The decoded /Info dictionary.
    pub fn metadata(&mut self) -> PDFResult<Metadata> {
        let info = self
            .xref
            .trailer()
            .and_then(|t| t.get("Info"))
            .cloned();
        let info = match info {
            Some(obj) => match self.xref.fetch_if_ref(&obj) {
                Ok(PDFObject::Dictionary(dict)) => dict,
                _ => return Ok(Metadata::default()),
            },
            None => return Ok(Metadata::default()),
        };

        let field = |key: &str| -> Option<String> {
            info.get(key)
                .and_then(|v| v.as_string_bytes())
                .map(decode_text_string)
        };

        Ok(Metadata {
            title: field("Title"),
            author: field("Author"),
            subject: field("Subject"),
            keywords: field("Keywords"),
            creator: field("Creator"),
            producer: field("Producer"),
            creation_date: field("CreationDate"),
            mod_date: field("ModDate"),
        })
    }

    /// Flattens the /Outlines tree.
    pub fn outline(&mut self) -> PDFResult<Vec<OutlineItem>> {
        let catalog = match self.xref.catalog() {
            Ok(obj) => match obj.as_dict() {
                Some(dict) => dict.clone(),
                None => return Ok(Vec::new()),
            },
            Err(_) => return Ok(Vec::new()),
        };

        let outlines = match catalog.get("Outlines") {
            Some(obj) => match self.xref.fetch_if_ref(obj) {
                Ok(PDFObject::Dictionary(dict)) => dict,
                _ => return Ok(Vec::new()),
            },
            None => return Ok(Vec::new()),
        };

        let mut items = Vec::new();
        let mut visited = FxHashSet::default();
        if let Some(first) = outlines.get("First").cloned() {
            self.walk_outline(&first, 0, &mut visited, &mut items)?;
        }
        Ok(items)
    }

    fn walk_outline(
        &mut self,
        first: &PDFObject,
        level: usize,
        visited: &mut FxHashSet<Ref>,
        items: &mut Vec<OutlineItem>,
    ) -> PDFResult<()> {
        if level > 32 {
            return Ok(());
        }

        let mut cursor = Some(first.clone());
        while let Some(node_obj) = cursor.take() {
            if let Some(r) = node_obj.as_ref_obj() {
                if !visited.insert(r) {
                    break; // sibling loop
                }
            }

            let node = match self.xref.fetch_if_ref(&node_obj) {
                Ok(PDFObject::Dictionary(dict)) => dict,
                _ => break,
            };

            let title = node
                .get("Title")
                .and_then(|t| t.as_string_bytes())
                .map(decode_text_string)
                .unwrap_or_default();

            let page = self.resolve_destination_page(&node)?;

            items.push(OutlineItem { title, page, level });

            if let Some(child) = node.get("First").cloned() {
                self.walk_outline(&child, level + 1, visited, items)?;
            }

            cursor = node.get("Next").cloned();
        }

        Ok(())
    }

    /// Destination page from /Dest or a /GoTo action.
    fn resolve_destination_page(&mut self, node: &Dict) -> PDFResult<Option<usize>> {
        let dest = match node.get("Dest") {
            Some(d) => Some(d.clone()),
            None => match node.get("A").map(|a| self.xref.fetch_if_ref(a)) {
                Some(Ok(PDFObject::Dictionary(action)))
                    if action.get("S").and_then(|s| s.as_name()) == Some("GoTo") =>
                {
                    action.get("D").cloned()
                }
                _ => None,
            },
        };

        let dest = match dest {
            Some(d) => self.xref.fetch_if_ref(&d)?,
            None => return Ok(None),
        };

        let dest = match dest {
            // Named destination: resolved through the name tree
            PDFObject::Name(name) => match self.lookup_named_dest(name.as_bytes())? {
                Some(obj) => obj,
                None => return Ok(None),
            },
            PDFObject::String(bytes) | PDFObject::HexString(bytes) => {
                match self.lookup_named_dest(&bytes)? {
                    Some(obj) => obj,
                    None => return Ok(None),
                }
            }
            other => other,
        };

        // A destination array starts with the page reference
        let dest = match dest {
            PDFObject::Dictionary(d) => match d.get("D") {
                Some(inner) => self.xref.fetch_if_ref(inner)?,
                None => return Ok(None),
            },
            other => other,
        };

        let page_ref = dest
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|first| first.as_ref_obj());

        Ok(page_ref.and_then(|r| self.page_index_of(r)))
    }

    fn page_index_of(&self, target: Ref) -> Option<usize> {
        self.pages
            .iter()
            .position(|p| p.page_ref.map(|r| r.num) == Some(target.num))
    }

    /// Looks a name up in /Names /Dests (name tree) or the legacy /Dests
    /// dictionary.
    fn lookup_named_dest(&mut self, name: &[u8]) -> PDFResult<Option<PDFObject>> {
        let catalog = match self.xref.catalog()? {
            PDFObject::Dictionary(dict) => dict,
            _ => return Ok(None),
        };

        if let Some(dests) = catalog.get("Dests") {
            if let PDFObject::Dictionary(dests) = self.xref.fetch_if_ref(dests)? {
                let key = String::from_utf8_lossy(name);
                if let Some(found) = dests.get(key.as_ref()) {
                    return Ok(Some(self.xref.fetch_if_ref(found)?));
                }
            }
        }

        let names = match catalog.get("Names") {
            Some(n) => match self.xref.fetch_if_ref(n)? {
                PDFObject::Dictionary(dict) => dict,
                _ => return Ok(None),
            },
            None => return Ok(None),
        };
        let dests_tree = match names.get("Dests") {
            Some(d) => self.xref.fetch_if_ref(d)?,
            None => return Ok(None),
        };

        self.search_name_tree(&dests_tree, name, 0)
    }

    fn search_name_tree(
        &mut self,
        node: &PDFObject,
        name: &[u8],
        depth: usize,
    ) -> PDFResult<Option<PDFObject>> {
        if depth > 32 {
            return Ok(None);
        }
        let dict = match node.as_dict() {
            Some(dict) => dict.clone(),
            None => return Ok(None),
        };

        if let Some(PDFObject::Array(pairs)) = dict.get("Names").map(|n| self.xref.fetch_if_ref(n)).transpose()? {
            for pair in pairs.chunks(2) {
                if pair.len() == 2 && pair[0].as_string_bytes() == Some(name) {
                    return Ok(Some(self.xref.fetch_if_ref(&pair[1])?));
                }
            }
            return Ok(None);
        }

        if let Some(PDFObject::Array(kids)) = dict.get("Kids").map(|k| self.xref.fetch_if_ref(k)).transpose()? {
            for kid in kids.iter() {
                let kid = self.xref.fetch_if_ref(kid)?;
                if let Some(found) = self.search_name_tree(&kid, name, depth + 1)? {
                    return Ok(Some(found));
                }
            }
        }

        Ok(None)
    }

    /// The /PageLabels label for a page, when the document defines one.
    pub fn page_label(&mut self, page: usize) -> PDFResult<Option<String>> {
        let catalog = match self.xref.catalog()? {
            PDFObject::Dictionary(dict) => dict,
            _ => return Ok(None),
        };
        let labels = match catalog.get("PageLabels") {
            Some(obj) => self.xref.fetch_if_ref(obj)?,
            None => return Ok(None),
        };

        // Number tree: collect (start_index, spec) pairs
        let mut ranges: Vec<(usize, Dict)> = Vec::new();
        self.collect_number_tree(&labels, &mut ranges, 0)?;
        ranges.sort_by_key(|(start, _)| *start);

        let (start, spec) = match ranges.iter().rev().find(|(start, _)| *start <= page) {
            Some((start, spec)) => (*start, spec.clone()),
            None => return Ok(None),
        };

        let offset = page - start;
        let numeric_start = spec
            .get("St")
            .and_then(|s| s.as_integer())
            .filter(|n| *n >= 1)
            .unwrap_or(1) as usize;
        let value = numeric_start + offset;

        let mut label = spec
            .get("P")
            .and_then(|p| p.as_string_bytes())
            .map(decode_text_string)
            .unwrap_or_default();

        match spec.get("S").and_then(|s| s.as_name()) {
            Some("D") => label.push_str(&value.to_string()),
            Some("R") => label.push_str(&to_roman(value)),
            Some("r") => label.push_str(&to_roman(value).to_lowercase()),
            Some("A") => label.push_str(&to_alpha(value)),
            Some("a") => label.push_str(&to_alpha(value).to_lowercase()),
            _ => {} // prefix-only labels are legal
        }

        Ok(Some(label))
    }

    fn collect_number_tree(
        &mut self,
        node: &PDFObject,
        out: &mut Vec<(usize, Dict)>,
        depth: usize,
    ) -> PDFResult<()> {
        if depth > 32 {
            return Ok(());
        }
        let dict = match node.as_dict() {
            Some(dict) => dict.clone(),
            None => return Ok(()),
        };

        if let Some(PDFObject::Array(nums)) = dict.get("Nums").map(|n| self.xref.fetch_if_ref(n)).transpose()? {
            for pair in nums.chunks(2) {
                if pair.len() != 2 {
                    continue;
                }
                if let (Some(idx), Ok(PDFObject::Dictionary(spec))) =
                    (pair[0].as_integer(), self.xref.fetch_if_ref(&pair[1]))
                {
                    if idx >= 0 {
                        out.push((idx as usize, spec));
                    }
                }
            }
        }

        if let Some(PDFObject::Array(kids)) = dict.get("Kids").map(|k| self.xref.fetch_if_ref(k)).transpose()? {
            for kid in kids.iter() {
                let kid = self.xref.fetch_if_ref(kid)?;
                self.collect_number_tree(&kid, out, depth + 1)?;
            }
        }

        Ok(())
    }

    /// ASCII case-insensitive search across the whole document.
    pub fn search(&mut self, query: &str) -> PDFResult<Vec<SearchResult>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let needle = query.to_ascii_lowercase();
        let mut results = Vec::new();

        for page in 0..self.pages.len() {
            let text = self.extract_page(page)?;
            let haystack = text.to_ascii_lowercase();

            let mut from = 0;
            while let Some(found) = haystack[from..].find(&needle) {
                let offset = from + found;
                results.push(SearchResult {
                    page,
                    offset,
                    context: context_window(&text, offset, needle.len()),
                });
                from = offset + needle.len().max(1);
            }
        }

        Ok(results)
    }

    /// Link annotations on a page.
    pub fn page_links(&mut self, page: usize) -> PDFResult<Vec<Link>> {
        let annots = match self.page(page)?.dict.get("Annots").cloned() {
            Some(a) => self.xref.fetch_if_ref(&a)?,
            None => return Ok(Vec::new()),
        };
        let annots = match annots.as_array() {
            Some(arr) => arr.to_vec(),
            None => return Ok(Vec::new()),
        };

        let mut links = Vec::new();
        for annot in annots {
            let annot = match self.xref.fetch_if_ref(&annot) {
                Ok(PDFObject::Dictionary(dict)) => dict,
                _ => continue,
            };
            if annot.get("Subtype").and_then(|s| s.as_name()) != Some("Link") {
                continue;
            }

            let rect = match annot.get("Rect").map(|r| self.xref.fetch_if_ref(r)) {
                Some(Ok(obj)) => rect_from(&obj).unwrap_or([0.0; 4]),
                _ => [0.0; 4],
            };

            let mut uri = None;
            if let Some(Ok(PDFObject::Dictionary(action))) =
                annot.get("A").map(|a| self.xref.fetch_if_ref(a))
            {
                if action.get("S").and_then(|s| s.as_name()) == Some("URI") {
                    uri = action
                        .get("URI")
                        .and_then(|u| u.as_string_bytes())
                        .map(|b| String::from_utf8_lossy(b).into_owned());
                }
            }

            let dest_page = self.resolve_destination_page(&annot)?;

            links.push(Link {
                rect,
                uri,
                dest_page,
            });
        }

        Ok(links)
    }

    /// Image XObject placements on a page.
    pub fn page_images(&mut self, page: usize) -> PDFResult<Vec<PlacedImage>> {
        let (_, images) = self.interpret_page(page, OutputMode::stream(), true)?;
        Ok(images)
    }

    /// Interactive form fields from /AcroForm.
    pub fn form_fields(&mut self) -> PDFResult<Vec<FormField>> {
        let catalog = match self.xref.catalog()? {
            PDFObject::Dictionary(dict) => dict,
            _ => return Ok(Vec::new()),
        };
        let acroform = match catalog.get("AcroForm") {
            Some(obj) => match self.xref.fetch_if_ref(obj)? {
                PDFObject::Dictionary(dict) => dict,
                _ => return Ok(Vec::new()),
            },
            None => return Ok(Vec::new()),
        };
        let fields = match acroform.get("Fields") {
            Some(f) => self.xref.fetch_if_ref(f)?,
            None => return Ok(Vec::new()),
        };
        let fields = match fields.as_array() {
            Some(arr) => arr.to_vec(),
            None => return Ok(Vec::new()),
        };

        let mut out = Vec::new();
        let mut visited = FxHashSet::default();
        for field in fields {
            self.walk_form_field(&field, "", "", &mut visited, &mut out, 0)?;
        }
        Ok(out)
    }

    fn walk_form_field(
        &mut self,
        field: &PDFObject,
        parent_name: &str,
        parent_type: &str,
        visited: &mut FxHashSet<Ref>,
        out: &mut Vec<FormField>,
        depth: usize,
    ) -> PDFResult<()> {
        if depth > 32 {
            return Ok(());
        }
        if let Some(r) = field.as_ref_obj() {
            if !visited.insert(r) {
                return Ok(());
            }
        }
        let dict = match self.xref.fetch_if_ref(field) {
            Ok(PDFObject::Dictionary(dict)) => dict,
            _ => return Ok(()),
        };

        let partial = dict
            .get("T")
            .and_then(|t| t.as_string_bytes())
            .map(decode_text_string);
        let name = match (&partial, parent_name.is_empty()) {
            (Some(partial), true) => partial.clone(),
            (Some(partial), false) => format!("{}.{}", parent_name, partial),
            (None, _) => parent_name.to_string(),
        };

        let field_type = dict
            .get("FT")
            .and_then(|ft| ft.as_name())
            .unwrap_or(parent_type)
            .to_string();

        let kids: Vec<Box<PDFObject>> = match dict.get("Kids") {
            Some(k) => match self.xref.fetch_if_ref(k)? {
                PDFObject::Array(arr) => arr.into_vec(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        };

        if !kids.is_empty() {
            // Kids that carry /T are nested fields; widget-only kids mean
            // this node is the terminal field
            let mut any_named = false;
            for kid in &kids {
                if let Ok(PDFObject::Dictionary(kid_dict)) = self.xref.fetch_if_ref(kid) {
                    if kid_dict.contains_key("T") {
                        any_named = true;
                    }
                }
            }
            if any_named {
                for kid in &kids {
                    self.walk_form_field(kid, &name, &field_type, visited, out, depth + 1)?;
                }
                return Ok(());
            }
        }

        if name.is_empty() && field_type.is_empty() {
            return Ok(());
        }

        let value = dict
            .get("V")
            .map(|v| self.xref.fetch_if_ref(v))
            .transpose()?
            .and_then(|v| match &v {
                PDFObject::String(_) | PDFObject::HexString(_) => {
                    v.as_string_bytes().map(decode_text_string)
                }
                PDFObject::Name(n) => Some(n.clone()),
                _ => None,
            });

        let rect = dict
            .get("Rect")
            .map(|r| self.xref.fetch_if_ref(r))
            .transpose()?
            .as_ref()
            .and_then(rect_from);

        out.push(FormField {
            name,
            value,
            field_type,
            rect,
        });

        Ok(())
    }

    /// The page's MCID reading order, when the document is tagged.
    fn page_mcid_order(&mut self, page: usize) -> PDFResult<Option<Vec<i32>>> {
        let page_num = match self.page(page)?.page_ref {
            Some(r) => r.num,
            None => return Ok(None),
        };

        if !self.structure_loaded {
            self.structure_loaded = true;
            let catalog = match self.xref.catalog() {
                Ok(PDFObject::Dictionary(dict)) => dict,
                _ => return Ok(None),
            };
            match StructureTree::parse(&mut self.xref, &catalog, &mut self.errors) {
                Ok(Some(tree)) => {
                    self.mcid_orders = tree.mcid_order_by_page();
                }
                Ok(None) => {}
                Err(e) => self.errors.report(e, 0)?,
            }
        }

        Ok(self.mcid_orders.get(&page_num).cloned())
    }

    /// Decoded, concatenated content-stream bytes for a page.
    fn page_content(&mut self, page: &Page) -> PDFResult<Vec<u8>> {
        let contents = match &page.contents {
            Some(obj) => self.xref.fetch_if_ref(obj)?,
            None => return Ok(Vec::new()),
        };

        match contents {
            PDFObject::Stream { dict, data, .. } => {
                super::decode::decode_stream_object(&dict, &data)
            }
            PDFObject::Array(items) => {
                let mut combined = Vec::new();
                for item in items.iter() {
                    match self.xref.fetch_if_ref(item) {
                        Ok(PDFObject::Stream { dict, data, .. }) => {
                            match super::decode::decode_stream_object(&dict, &data) {
                                Ok(decoded) => {
                                    if !combined.is_empty() {
                                        combined.push(b'\n');
                                    }
                                    combined.extend_from_slice(&decoded);
                                }
                                Err(e) => self.errors.report(e, 0)?,
                            }
                        }
                        Ok(_) => {}
                        Err(e) => self.errors.report(e, 0)?,
                    }
                }
                Ok(combined)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn interpret_page(
        &mut self,
        page: usize,
        mode: OutputMode,
        images: bool,
    ) -> PDFResult<(OutputMode, Vec<PlacedImage>)> {
        let page_data = self.page(page)?.clone();
        let content = self.page_content(&page_data)?;

        let mut interpreter = ContentInterpreter::new(
            &mut self.xref,
            &mut self.fonts,
            &mut self.errors,
            page,
            mode,
        );
        if images {
            interpreter = interpreter.collect_images();
        }
        interpreter.run(content, page_data.resources.as_ref())?;
        Ok(interpreter.finish())
    }
}

/// Geometric last-resort assembly: spans sorted into y-bins, top-down,
/// left-to-right.
fn assemble_geometric(spans: &[TextSpan]) -> String {
    let mut keyed: Vec<(i64, f64, &TextSpan)> = spans
        .iter()
        .map(|s| ((s.bbox[1] / LINE_BIN_TOLERANCE).round() as i64, s.bbox[0], s))
        .collect();
    // y increases upward: larger bins first, then x ascending
    keyed.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.total_cmp(&b.1)));

    let mut out = String::new();
    let mut last_bin = None;
    for (bin, _, span) in keyed {
        if span.text.trim().is_empty() {
            continue;
        }
        match last_bin {
            None => {}
            Some(last) if last == bin => out.push(' '),
            Some(_) => out.push('\n'),
        }
        out.push_str(span.text.trim_end());
        last_bin = Some(bin);
    }
    out
}

/// A readable window of text around a search hit.
fn context_window(text: &str, offset: usize, len: usize) -> String {
    const MARGIN: usize = 40;
    let mut start = offset.saturating_sub(MARGIN);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (offset + len + MARGIN).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].replace(['\n', '\x0c'], " ")
}

/// 1-based integer to uppercase Roman numerals.
fn to_roman(mut value: usize) -> String {
    const TABLE: [(usize, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (n, digits) in TABLE {
        while value >= n {
            out.push_str(digits);
            value -= n;
        }
    }
    out
}

/// 1-based integer to the A, B, ..., Z, AA, BB, ... label style.
fn to_alpha(value: usize) -> String {
    let letter = (b'A' + ((value - 1) % 26) as u8) as char;
    let repeats = (value - 1) / 26 + 1;
    std::iter::repeat(letter).take(repeats).collect()
}
