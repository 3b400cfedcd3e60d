use super::decode;
use super::error::{PDFError, PDFResult};
use super::lexer::Lexer;
use super::parser::{Dict, PDFObject, Parser, Ref, RefResolver};
use super::stream::Stream;
use lru::LruCache;
use rustc_hash::{FxHashMap, FxHashSet};
use std::num::NonZeroUsize;
use std::rc::Rc;

/// Incremental updates may chain this many cross-reference sections.
const MAX_XREF_SECTIONS: usize = 32;

/// Decompressed object-stream payloads kept around between fetches.
const OBJSTM_CACHE_CAPACITY: usize = 32;

/// Cross-reference table entry.
#[derive(Debug, Clone, PartialEq)]
pub enum XRefEntry {
    /// Free entry: the object number is on the free list
    Free { next_free: u64, generation: u32 },

    /// Object stored uncompressed at a byte offset
    InUse { offset: u64, generation: u32 },

    /// Object stored inside an object stream, addressed by index
    Compressed { stream_num: u32, index: u32 },
}

impl XRefEntry {
    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }
}

/// A decompressed object stream with its header index parsed.
struct ObjStmData {
    /// Offset of the first object body, relative to the payload start
    first: usize,
    /// (object number, relative offset) pairs in declaration order
    pairs: Vec<(u32, usize)>,
    /// Decompressed payload
    data: Vec<u8>,
}

/// Cross-reference resolver.
///
/// Parses classic tables and XRef streams, follows /Prev chains across
/// incremental updates (entries from newer sections shadow older ones),
/// and satisfies object lookups. Parsed objects are cached for the
/// document lifetime — names and strings handed out stay valid until
/// close.
pub struct XRef {
    /// Entries indexed by object number; `None` where no section defined one
    entries: Vec<Option<XRefEntry>>,

    /// Parsed objects; never evicted
    cache: FxHashMap<u32, Rc<PDFObject>>,

    /// Decompressed object-stream payloads; safe to evict
    objstm_cache: LruCache<u32, Rc<ObjStmData>, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>,

    /// Trailer of the newest section
    trailer: Option<Dict>,

    /// Any trailer in the chain carried /Encrypt
    encrypted: bool,

    /// Objects currently being fetched, to break reference cycles
    in_progress: FxHashSet<u32>,

    /// Fail on interior syntax errors instead of recovering
    strict: bool,

    stream: Stream,
}

impl XRef {
    pub fn new(stream: Stream, strict: bool) -> Self {
        XRef {
            entries: Vec::new(),
            cache: FxHashMap::default(),
            objstm_cache: LruCache::with_hasher(
                NonZeroUsize::new(OBJSTM_CACHE_CAPACITY).unwrap(),
                Default::default(),
            ),
            trailer: None,
            encrypted: false,
            in_progress: FxHashSet::default(),
            strict,
            stream,
        }
    }

    /// Parses the cross-reference chain starting at `offset`.
    ///
    /// `offset` normally comes from the startxref pointer at the end of the
    /// file. Both classic tables and XRef streams are accepted; /Prev
    /// offsets are followed with a visited set and a chain-length cap so
    /// corrupt files cannot loop.
    pub fn parse_at(&mut self, offset: usize) -> PDFResult<()> {
        let mut queue = vec![offset];
        let mut visited: FxHashSet<usize> = FxHashSet::default();
        let mut sections = 0;

        while let Some(pos) = queue.pop() {
            if !visited.insert(pos) {
                log::warn!("circular /Prev chain at offset {}; stopping", pos);
                break;
            }
            sections += 1;
            if sections > MAX_XREF_SECTIONS {
                return Err(PDFError::xref(format!(
                    "more than {} chained sections",
                    MAX_XREF_SECTIONS
                )));
            }

            let trailer = self.parse_section(pos)?;

            if trailer.contains_key("Encrypt") {
                self.encrypted = true;
            }

            if let Some(prev) = trailer.get("Prev").and_then(|obj| obj.as_integer()) {
                if prev >= 0 {
                    queue.push(prev as usize);
                }
            }

            // The newest section's trailer is the document trailer
            if self.trailer.is_none() {
                self.trailer = Some(trailer);
            }
        }

        Ok(())
    }

    /// Parses one section (classic table or XRef stream) and returns its
    /// trailer dictionary.
    fn parse_section(&mut self, pos: usize) -> PDFResult<Dict> {
        if pos >= self.stream.window().len() {
            return Err(PDFError::xref(format!(
                "section offset {} beyond end of file",
                pos
            )));
        }

        let sub = self
            .stream
            .make_sub_stream(pos, self.stream.window().len() - pos)?;
        let lexer = Lexer::new(sub);
        let mut parser = Parser::new(lexer)?.with_recovery(!self.strict);

        let first = parser.get_object()?;

        if first.is_command("xref") {
            self.read_classic_table(&mut parser)?;

            // read_classic_table consumed the `trailer` keyword
            match parser.get_object()? {
                PDFObject::Dictionary(dict) => Ok(dict),
                other => Err(PDFError::xref(format!(
                    "expected trailer dictionary, got {:?}",
                    other
                ))),
            }
        } else if matches!(first, PDFObject::Integer(_)) {
            // XRef stream: N G obj << /Type /XRef ... >> stream ... endstream
            let _generation = parser.get_object()?;
            let keyword = parser.get_object()?;
            if !keyword.is_command("obj") {
                return Err(PDFError::xref(format!(
                    "expected 'obj' at section offset {}, got {:?}",
                    pos, keyword
                )));
            }

            match parser.get_object()? {
                PDFObject::Stream { dict, data, .. } => {
                    match dict.get("Type").and_then(|t| t.as_name()) {
                        Some("XRef") | None => {}
                        Some(other) => {
                            return Err(PDFError::xref(format!(
                                "section object has /Type /{}",
                                other
                            )));
                        }
                    }
                    let payload = decode::decode_stream_object(&dict, &data)?;
                    self.read_xref_stream(&dict, &payload)?;
                    Ok(dict)
                }
                other => Err(PDFError::xref(format!(
                    "expected XRef stream, got {:?}",
                    other
                ))),
            }
        } else {
            Err(PDFError::xref(format!(
                "expected 'xref' keyword or object number, got {:?}",
                first
            )))
        }
    }

    /// Reads classic table subsections until the `trailer` keyword.
    ///
    /// Each subsection is `first count` followed by `count` entries of
    /// `offset generation f|n`.
    fn read_classic_table(&mut self, parser: &mut Parser) -> PDFResult<()> {
        loop {
            let first_obj = parser.get_object()?;

            if first_obj.is_command("trailer") {
                return Ok(());
            }

            let first = first_obj.as_integer().ok_or_else(|| {
                PDFError::xref(format!(
                    "expected subsection start or 'trailer', got {:?}",
                    first_obj
                ))
            })?;

            let count_obj = parser.get_object()?;
            let count = count_obj.as_integer().ok_or_else(|| {
                PDFError::xref(format!("expected subsection count, got {:?}", count_obj))
            })?;

            if first < 0 || count < 0 {
                return Err(PDFError::xref("negative subsection header"));
            }

            let needed = (first + count) as usize;
            if self.entries.len() < needed {
                self.entries.resize(needed, None);
            }

            for i in 0..count {
                let entry = Self::read_classic_entry(parser)?;
                let obj_num = (first + i) as usize;
                // Newer sections are parsed first; the first entry wins
                if self.entries[obj_num].is_none() {
                    self.entries[obj_num] = Some(entry);
                }
            }
        }
    }

    /// Reads one classic entry: `offset generation f|n`.
    fn read_classic_entry(parser: &mut Parser) -> PDFResult<XRefEntry> {
        let offset_obj = parser.get_object()?;
        let offset = offset_obj.as_integer().ok_or_else(|| {
            PDFError::xref(format!("expected entry offset, got {:?}", offset_obj))
        })? as u64;

        let generation_obj = parser.get_object()?;
        let generation = generation_obj.as_integer().ok_or_else(|| {
            PDFError::xref(format!("expected entry generation, got {:?}", generation_obj))
        })? as u32;

        let kind = parser.get_object()?;
        if kind.is_command("n") {
            Ok(XRefEntry::InUse { offset, generation })
        } else if kind.is_command("f") {
            Ok(XRefEntry::Free {
                next_free: offset,
                generation,
            })
        } else {
            Err(PDFError::xref(format!(
                "expected 'f' or 'n' in entry, got {:?}",
                kind
            )))
        }
    }

    /// Decodes an XRef stream's entry records.
    ///
    /// /W gives the three field widths; /Index gives (first, count) ranges
    /// (default `[0 Size]`). Field 1 is the entry kind (default 1 when its
    /// width is zero), fields 2 and 3 are offset/generation for in-use
    /// entries and stream-number/index for compressed ones. Big-endian.
    fn read_xref_stream(&mut self, dict: &Dict, payload: &[u8]) -> PDFResult<()> {
        let widths_obj = dict
            .get("W")
            .and_then(|w| w.as_array())
            .ok_or_else(|| PDFError::xref("XRef stream missing /W"))?;
        if widths_obj.len() != 3 {
            return Err(PDFError::xref(format!(
                "/W must have 3 elements, got {}",
                widths_obj.len()
            )));
        }
        let mut widths = [0usize; 3];
        for (i, w) in widths_obj.iter().enumerate() {
            widths[i] = w.as_integer().filter(|n| (0..=8).contains(n)).ok_or_else(|| {
                PDFError::xref("/W fields must be small non-negative integers")
            })? as usize;
        }
        let [w1, w2, w3] = widths;
        let entry_size = w1 + w2 + w3;
        if entry_size == 0 {
            return Err(PDFError::xref("/W describes empty entries"));
        }

        // /Index defaults to [0 Size]
        let ranges: Vec<(u32, usize)> = match dict.get("Index").and_then(|idx| idx.as_array()) {
            Some(arr) => {
                if arr.len() % 2 != 0 {
                    return Err(PDFError::xref("/Index must hold pairs"));
                }
                let mut ranges = Vec::with_capacity(arr.len() / 2);
                for pair in arr.chunks(2) {
                    let first = pair[0]
                        .as_integer()
                        .filter(|n| *n >= 0)
                        .ok_or_else(|| PDFError::xref("bad /Index entry"))?;
                    let count = pair[1]
                        .as_integer()
                        .filter(|n| *n >= 0)
                        .ok_or_else(|| PDFError::xref("bad /Index entry"))?;
                    ranges.push((first as u32, count as usize));
                }
                ranges
            }
            None => {
                let size = dict
                    .get("Size")
                    .and_then(|s| s.as_integer())
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| PDFError::xref("XRef stream missing /Size"))?;
                vec![(0, size as usize)]
            }
        };

        let mut pos = 0;
        for (first, count) in ranges {
            for j in 0..count {
                if pos + entry_size > payload.len() {
                    return Err(PDFError::xref("XRef stream payload truncated"));
                }

                let kind = if w1 > 0 {
                    read_big_endian(&payload[pos..pos + w1])
                } else {
                    1 // kind defaults to in-use when /W[0] is 0
                };
                pos += w1;
                let field2 = read_big_endian(&payload[pos..pos + w2]);
                pos += w2;
                let field3 = read_big_endian(&payload[pos..pos + w3]);
                pos += w3;

                let obj_num = first + j as u32;
                let entry = match kind {
                    0 => XRefEntry::Free {
                        next_free: field2,
                        generation: field3 as u32,
                    },
                    1 => XRefEntry::InUse {
                        offset: field2,
                        generation: field3 as u32,
                    },
                    2 => XRefEntry::Compressed {
                        stream_num: field2 as u32,
                        index: field3 as u32,
                    },
                    other => {
                        return Err(PDFError::xref(format!(
                            "invalid entry kind {} for object {}",
                            other, obj_num
                        )));
                    }
                };

                let idx = obj_num as usize;
                if self.entries.len() <= idx {
                    self.entries.resize(idx + 1, None);
                }
                if self.entries[idx].is_none() {
                    self.entries[idx] = Some(entry);
                }
            }
        }

        Ok(())
    }

    /// Looks up the entry for an object number in the chained view.
    pub fn entry(&self, obj_num: u32) -> Option<&XRefEntry> {
        self.entries.get(obj_num as usize)?.as_ref()
    }

    /// Fetches an indirect object, parsing and caching it on first use.
    pub fn fetch(&mut self, obj_num: u32, generation: u32) -> PDFResult<Rc<PDFObject>> {
        if let Some(cached) = self.cache.get(&obj_num) {
            return Ok(Rc::clone(cached));
        }

        let entry = match self.entry(obj_num) {
            Some(entry) if !entry.is_free() => entry.clone(),
            _ => {
                return Err(PDFError::MissingObject {
                    num: obj_num,
                    generation,
                });
            }
        };

        if !self.in_progress.insert(obj_num) {
            return Err(PDFError::syntax(format!(
                "object {} references itself during load",
                obj_num
            )));
        }

        let result = match entry {
            XRefEntry::InUse {
                offset,
                generation: entry_generation,
            } => self.fetch_uncompressed(obj_num, generation, offset, entry_generation),
            XRefEntry::Compressed { stream_num, index } => {
                self.fetch_compressed(stream_num, index, obj_num)
            }
            XRefEntry::Free { .. } => unreachable!(),
        };

        self.in_progress.remove(&obj_num);

        let object = result?;
        self.cache.insert(obj_num, Rc::clone(&object));
        Ok(object)
    }

    /// Parses `num gen obj <object> endobj` at a byte offset.
    fn fetch_uncompressed(
        &mut self,
        obj_num: u32,
        generation: u32,
        offset: u64,
        entry_generation: u32,
    ) -> PDFResult<Rc<PDFObject>> {
        if generation != entry_generation {
            log::warn!(
                "generation mismatch for object {}: requested {}, table has {}",
                obj_num,
                generation,
                entry_generation
            );
        }

        let window_len = self.stream.window().len();
        let offset = offset as usize;
        if offset >= window_len {
            return Err(PDFError::xref(format!(
                "object {} offset {} beyond end of file",
                obj_num, offset
            )));
        }

        let sub = self.stream.make_sub_stream(offset, window_len - offset)?;
        let lexer = Lexer::new(sub);
        let mut parser = Parser::new(lexer)?.with_recovery(!self.strict);

        let parsed_num = parser
            .get_object()?
            .as_integer()
            .ok_or_else(|| PDFError::syntax("expected object number"))?;
        if parsed_num != obj_num as i64 {
            return Err(PDFError::xref(format!(
                "object number mismatch: expected {}, found {}",
                obj_num, parsed_num
            )));
        }

        let _parsed_generation = parser
            .get_object()?
            .as_integer()
            .ok_or_else(|| PDFError::syntax("expected generation number"))?;

        let keyword = parser.get_object()?;
        if !keyword.is_command("obj") {
            return Err(PDFError::syntax(format!(
                "expected 'obj' keyword, got {:?}",
                keyword
            )));
        }

        // `self` doubles as the resolver so indirect /Length values work
        let object = parser.get_object_with(self)?;
        Ok(Rc::new(object))
    }

    /// Fetches an object out of a compressed object stream.
    ///
    /// The payload is decompressed once and kept in a bounded cache; the
    /// header's `N` pairs of `(obj_num, rel_offset)` index into it.
    fn fetch_compressed(
        &mut self,
        stream_num: u32,
        index: u32,
        obj_num: u32,
    ) -> PDFResult<Rc<PDFObject>> {
        let objstm = match self.objstm_cache.get(&stream_num) {
            Some(data) => Rc::clone(data),
            None => {
                let data = Rc::new(self.load_object_stream(stream_num)?);
                self.objstm_cache.put(stream_num, Rc::clone(&data));
                data
            }
        };

        let index = index as usize;
        let (entry_num, rel_offset) = *objstm.pairs.get(index).ok_or_else(|| {
            PDFError::xref(format!(
                "index {} out of range for object stream {} ({} objects)",
                index,
                stream_num,
                objstm.pairs.len()
            ))
        })?;

        if entry_num != obj_num {
            log::warn!(
                "object stream {} index {} holds object {}, expected {}",
                stream_num,
                index,
                entry_num,
                obj_num
            );
        }

        let start = objstm.first + rel_offset;
        if start > objstm.data.len() {
            return Err(PDFError::xref("object stream offset beyond payload"));
        }
        let end = objstm
            .pairs
            .get(index + 1)
            .map(|(_, next)| (objstm.first + next).min(objstm.data.len()))
            .unwrap_or(objstm.data.len());

        let body = objstm.data[start..end.max(start)].to_vec();
        let lexer = Lexer::new(Stream::from_bytes(body));
        let mut parser = Parser::new(lexer)?.with_recovery(!self.strict);

        // Objects inside a stream carry no obj/endobj wrapper
        let object = parser.get_object_with(self)?;
        Ok(Rc::new(object))
    }

    /// Decompresses an object stream and parses its `N`/`First` header.
    fn load_object_stream(&mut self, stream_num: u32) -> PDFResult<ObjStmData> {
        let container = self.fetch(stream_num, 0)?;

        let (dict, data) = match &*container {
            PDFObject::Stream { dict, data, .. } => (dict, data),
            other => {
                return Err(PDFError::xref(format!(
                    "object stream {} is not a stream: {:?}",
                    stream_num, other
                )));
            }
        };

        if let Some(type_name) = dict.get("Type").and_then(|t| t.as_name()) {
            if type_name != "ObjStm" {
                return Err(PDFError::xref(format!(
                    "object stream {} has /Type /{}",
                    stream_num, type_name
                )));
            }
        }

        let n = dict
            .get("N")
            .and_then(|obj| obj.as_integer())
            .filter(|n| *n >= 0)
            .ok_or_else(|| PDFError::xref("object stream missing /N"))?;
        let first = dict
            .get("First")
            .and_then(|obj| obj.as_integer())
            .filter(|n| *n >= 0)
            .ok_or_else(|| PDFError::xref("object stream missing /First"))?
            as usize;

        let payload = decode::decode_stream_object(dict, data)?;
        if first > payload.len() {
            return Err(PDFError::xref("/First beyond object stream payload"));
        }

        // Header: N pairs of `obj_num rel_offset`
        let header = Stream::from_bytes(payload[..first].to_vec());
        let mut parser = Parser::new(Lexer::new(header))?;
        let mut pairs = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let num = parser
                .get_object()?
                .as_integer()
                .filter(|v| *v >= 0)
                .ok_or_else(|| PDFError::xref("bad object number in stream header"))?;
            let rel = parser
                .get_object()?
                .as_integer()
                .filter(|v| *v >= 0)
                .ok_or_else(|| PDFError::xref("bad offset in stream header"))?;
            pairs.push((num as u32, rel as usize));
        }

        Ok(ObjStmData {
            first,
            pairs,
            data: payload,
        })
    }

    /// Resolves `obj` if it is a reference, otherwise clones it through.
    pub fn fetch_if_ref(&mut self, obj: &PDFObject) -> PDFResult<PDFObject> {
        match obj {
            PDFObject::Ref(Ref { num, generation }) => {
                let fetched = self.fetch(*num, *generation)?;
                Ok((*fetched).clone())
            }
            _ => Ok(obj.clone()),
        }
    }

    /// The document trailer (newest section).
    pub fn trailer(&self) -> Option<&Dict> {
        self.trailer.as_ref()
    }

    /// True if any trailer in the chain carried /Encrypt.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// The catalog (/Root) dictionary.
    pub fn catalog(&mut self) -> PDFResult<PDFObject> {
        let root = self
            .trailer
            .as_ref()
            .and_then(|t| t.get("Root"))
            .cloned()
            .ok_or_else(|| PDFError::xref("trailer has no /Root"))?;
        self.fetch_if_ref(&root)
    }

    /// Number of slots in the chained table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RefResolver for XRef {
    fn resolve_ref(&mut self, num: u32, generation: u32) -> PDFResult<PDFObject> {
        self.fetch(num, generation).map(|rc| (*rc).clone())
    }
}

/// Big-endian integer from up to 8 bytes.
fn read_big_endian(bytes: &[u8]) -> u64 {
    let mut result = 0u64;
    for &byte in bytes {
        result = (result << 8) | byte as u64;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xref_for(data: &[u8], parse_offset: usize) -> XRef {
        let stream = Stream::from_bytes(data.to_vec());
        let mut xref = XRef::new(stream, false);
        xref.parse_at(parse_offset).unwrap();
        xref
    }

    fn offset_of(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .position(|w| w == needle)
            .expect("marker not found")
    }

    #[test]
    fn test_parse_classic_table() {
        let data = b"xref\n\
            0 3\n\
            0000000000 65535 f \n\
            0000000015 00000 n \n\
            0000000079 00000 n \n\
            trailer\n\
            << /Size 3 >>\n";

        let xref = xref_for(data, 0);
        assert_eq!(xref.len(), 3);
        assert!(xref.entry(0).unwrap().is_free());
        assert_eq!(
            xref.entry(1),
            Some(&XRefEntry::InUse {
                offset: 15,
                generation: 0
            })
        );
        assert_eq!(
            xref.entry(2),
            Some(&XRefEntry::InUse {
                offset: 79,
                generation: 0
            })
        );
        assert!(xref.trailer().is_some());
    }

    #[test]
    fn test_parse_classic_multiple_subsections() {
        let data = b"xref\n\
            0 1\n\
            0000000000 65535 f \n\
            5 2\n\
            0000000100 00000 n \n\
            0000000200 00001 n \n\
            trailer\n\
            << /Size 7 >>\n";

        let xref = xref_for(data, 0);
        assert_eq!(xref.len(), 7);
        assert!(xref.entry(1).is_none());
        assert_eq!(
            xref.entry(6),
            Some(&XRefEntry::InUse {
                offset: 200,
                generation: 1
            })
        );
    }

    #[test]
    fn test_fetch_uncompressed_object() {
        let data = b"1 0 obj\n42\nendobj\n\
            xref\n\
            0 2\n\
            0000000000 65535 f \n\
            0000000000 00000 n \n\
            trailer\n\
            << /Size 2 >>\n";

        let mut xref = xref_for(data, offset_of(data, b"xref"));
        let obj = xref.fetch(1, 0).unwrap();
        assert_eq!(*obj, PDFObject::Integer(42));

        // Second fetch comes from the cache
        let again = xref.fetch(1, 0).unwrap();
        assert!(Rc::ptr_eq(&obj, &again));
    }

    #[test]
    fn test_fetch_missing_object() {
        let data = b"xref\n\
            0 1\n\
            0000000000 65535 f \n\
            trailer\n\
            << /Size 1 >>\n";

        let mut xref = xref_for(data, 0);
        assert!(matches!(
            xref.fetch(0, 65535),
            Err(PDFError::MissingObject { .. })
        ));
        assert!(matches!(
            xref.fetch(9, 0),
            Err(PDFError::MissingObject { .. })
        ));
    }

    #[test]
    fn test_fetch_if_ref() {
        let data = b"1 0 obj\n(hi)\nendobj\n\
            xref\n\
            0 2\n\
            0000000000 65535 f \n\
            0000000000 00000 n \n\
            trailer\n\
            << /Size 2 >>\n";

        let mut xref = xref_for(data, offset_of(data, b"xref"));
        let resolved = xref
            .fetch_if_ref(&PDFObject::Ref(Ref::new(1, 0)))
            .unwrap();
        assert_eq!(resolved, PDFObject::String(b"hi".to_vec()));

        let direct = xref.fetch_if_ref(&PDFObject::Integer(5)).unwrap();
        assert_eq!(direct, PDFObject::Integer(5));
    }

    #[test]
    fn test_prev_chain_newest_wins() {
        // Older section defines object 1 at the (Original) stream; the
        // update redefines it. The newer entry must shadow the older one.
        let mut data: Vec<u8> = Vec::new();
        data.extend_from_slice(b"%PDF-1.4\n");
        let old_obj_offset = data.len();
        data.extend_from_slice(b"1 0 obj\n(old)\nendobj\n");
        let old_xref_offset = data.len();
        data.extend_from_slice(
            format!(
                "xref\n0 2\n0000000000 65535 f \n{:010} 00000 n \ntrailer\n<< /Size 2 >>\n",
                old_obj_offset
            )
            .as_bytes(),
        );
        let new_obj_offset = data.len();
        data.extend_from_slice(b"1 0 obj\n(new)\nendobj\n");
        let new_xref_offset = data.len();
        data.extend_from_slice(
            format!(
                "xref\n1 1\n{:010} 00000 n \ntrailer\n<< /Size 2 /Prev {} >>\n",
                new_obj_offset, old_xref_offset
            )
            .as_bytes(),
        );

        let mut xref = xref_for(&data, new_xref_offset);
        let obj = xref.fetch(1, 0).unwrap();
        assert_eq!(*obj, PDFObject::String(b"new".to_vec()));
        // The newest trailer is the document trailer
        assert!(xref.trailer().unwrap().get("Prev").is_some());
    }

    #[test]
    fn test_circular_prev_chain_stops() {
        // Trailer pointing at its own section offset must not loop
        let data = b"xref\n\
            0 1\n\
            0000000000 65535 f \n\
            trailer\n\
            << /Size 1 /Prev 0 >>\n";

        let xref = xref_for(data, 0);
        assert_eq!(xref.len(), 1);
    }

    #[test]
    fn test_parse_xref_stream() {
        // Three entries: free, in-use at 15, in-use at 79; /W [1 2 1]
        let payload: Vec<u8> = vec![
            0x00, 0x00, 0x00, 0xFF, // free
            0x01, 0x00, 0x0F, 0x00, // in use, offset 15
            0x01, 0x00, 0x4F, 0x00, // in use, offset 79
        ];
        let mut data = Vec::new();
        data.extend_from_slice(b"2 0 obj\n<< /Type /XRef /Size 3 /W [1 2 1] /Length 12 >>\nstream\n");
        data.extend_from_slice(&payload);
        data.extend_from_slice(b"\nendstream\nendobj\n");

        let xref = xref_for(&data, 0);
        assert_eq!(xref.len(), 3);
        assert!(xref.entry(0).unwrap().is_free());
        assert_eq!(
            xref.entry(1),
            Some(&XRefEntry::InUse {
                offset: 15,
                generation: 0
            })
        );
        assert_eq!(
            xref.entry(2),
            Some(&XRefEntry::InUse {
                offset: 79,
                generation: 0
            })
        );
        // The stream dictionary doubles as the trailer
        assert_eq!(
            xref.trailer().unwrap().get("Size"),
            Some(&PDFObject::Integer(3))
        );
    }

    #[test]
    fn test_xref_stream_default_kind_when_w1_zero() {
        // /W [0 2 1]: every entry is implicitly in-use
        let payload: Vec<u8> = vec![0x00, 0x10, 0x00, 0x00, 0x20, 0x02];
        let mut data = Vec::new();
        data.extend_from_slice(
            b"3 0 obj\n<< /Type /XRef /Size 2 /W [0 2 1] /Length 6 >>\nstream\n",
        );
        data.extend_from_slice(&payload);
        data.extend_from_slice(b"\nendstream\nendobj\n");

        let xref = xref_for(&data, 0);
        assert_eq!(
            xref.entry(0),
            Some(&XRefEntry::InUse {
                offset: 0x10,
                generation: 0
            })
        );
        assert_eq!(
            xref.entry(1),
            Some(&XRefEntry::InUse {
                offset: 0x20,
                generation: 2
            })
        );
    }

    #[test]
    fn test_xref_stream_with_index_ranges() {
        // /Index [5 1 9 1]: entries for objects 5 and 9 only
        let payload: Vec<u8> = vec![0x01, 0x00, 0x40, 0x00, 0x02, 0x00, 0x07, 0x01];
        let mut data = Vec::new();
        data.extend_from_slice(
            b"4 0 obj\n<< /Type /XRef /Size 10 /Index [5 1 9 1] /W [1 2 1] /Length 8 >>\nstream\n",
        );
        data.extend_from_slice(&payload);
        data.extend_from_slice(b"\nendstream\nendobj\n");

        let xref = xref_for(&data, 0);
        assert_eq!(
            xref.entry(5),
            Some(&XRefEntry::InUse {
                offset: 0x40,
                generation: 0
            })
        );
        assert_eq!(
            xref.entry(9),
            Some(&XRefEntry::Compressed {
                stream_num: 7,
                index: 1
            })
        );
        assert!(xref.entry(6).is_none());
    }

    #[test]
    fn test_fetch_from_object_stream() {
        // Object stream 1 holds objects 2 ("42") and 3 ("(hi)").
        // Header pairs occupy the first 8 bytes: "2 0 3 3 "
        let objstm_payload = b"2 0 3 3 42 (hi)";
        let mut data = Vec::new();
        data.extend_from_slice(
            format!(
                "1 0 obj\n<< /Type /ObjStm /N 2 /First 8 /Length {} >>\nstream\n",
                objstm_payload.len()
            )
            .as_bytes(),
        );
        data.extend_from_slice(objstm_payload);
        data.extend_from_slice(b"\nendstream\nendobj\n");
        let xref_offset = data.len();
        data.extend_from_slice(
            b"xref\n0 2\n0000000000 65535 f \n0000000000 00000 n \ntrailer\n<< /Size 4 >>\n",
        );

        let stream = Stream::from_bytes(data);
        let mut xref = XRef::new(stream, false);
        xref.parse_at(xref_offset).unwrap();

        // Hand the table compressed entries for objects 2 and 3
        xref.entries.resize(4, None);
        xref.entries[2] = Some(XRefEntry::Compressed {
            stream_num: 1,
            index: 0,
        });
        xref.entries[3] = Some(XRefEntry::Compressed {
            stream_num: 1,
            index: 1,
        });

        assert_eq!(*xref.fetch(2, 0).unwrap(), PDFObject::Integer(42));
        assert_eq!(
            *xref.fetch(3, 0).unwrap(),
            PDFObject::String(b"hi".to_vec())
        );
    }

    #[test]
    fn test_indirect_length_resolves() {
        let mut data = Vec::new();
        data.extend_from_slice(b"1 0 obj\n<< /Length 2 0 R >>\nstream\nabcde\nendstream\nendobj\n");
        let len_offset = data.len();
        data.extend_from_slice(b"2 0 obj\n5\nendobj\n");
        let xref_offset = data.len();
        data.extend_from_slice(
            format!(
                "xref\n0 3\n0000000000 65535 f \n0000000000 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 3 >>\n",
                len_offset
            )
            .as_bytes(),
        );

        let stream = Stream::from_bytes(data);
        let mut xref = XRef::new(stream, false);
        xref.parse_at(xref_offset).unwrap();

        match &*xref.fetch(1, 0).unwrap() {
            PDFObject::Stream { data, .. } => assert_eq!(data, b"abcde"),
            other => panic!("expected stream, got {:?}", other),
        }
    }
}
