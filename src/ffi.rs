//! C ABI for host-language bindings.
//!
//! The document is an opaque handle; every buffer-returning entry point
//! co-returns its length and has a paired free function. String payloads
//! are UTF-8, NUL-terminated for convenience, and not NUL-free — use the
//! returned length.
//!
//! ## Safety
//!
//! Callers must pass handles obtained from the open functions, free every
//! returned buffer exactly once with its paired free function, and never
//! use a handle after `pdftext_close`. Handles are not thread-safe; use
//! one per thread.

use crate::core::{DocumentConfig, PDFDocument};
use libc::{c_char, c_int};
use std::ffi::CStr;
use std::ptr;

/// Opaque document handle.
#[repr(C)]
pub struct PdftextDocument {
    _private: [u8; 0],
}

/// A text span with its glyph-run extent, PDF user-space coordinates.
#[repr(C)]
pub struct PdftextSpan {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub text: *mut c_char,
    pub text_len: usize,
    pub font_size: f64,
}

/// An owned string field: pointer + length, NUL-terminated.
#[repr(C)]
pub struct PdftextString {
    pub ptr: *mut c_char,
    pub len: usize,
}

impl PdftextString {
    fn empty() -> Self {
        PdftextString {
            ptr: ptr::null_mut(),
            len: 0,
        }
    }
}

/// Document information dictionary fields.
#[repr(C)]
pub struct PdftextMetadata {
    pub title: PdftextString,
    pub author: PdftextString,
    pub subject: PdftextString,
    pub keywords: PdftextString,
    pub creator: PdftextString,
    pub producer: PdftextString,
    pub creation_date: PdftextString,
    pub mod_date: PdftextString,
}

/// One outline (bookmark) entry.
#[repr(C)]
pub struct PdftextOutlineItem {
    pub title: PdftextString,
    /// Zero-based page, -1 when unresolved
    pub page: c_int,
    pub level: c_int,
}

/// One search hit.
#[repr(C)]
pub struct PdftextSearchResult {
    pub page: c_int,
    pub offset: usize,
    pub context: PdftextString,
}

/// One link annotation.
#[repr(C)]
pub struct PdftextLink {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    /// Null when the link is an internal destination
    pub uri: PdftextString,
    /// Zero-based page, -1 for external links
    pub dest_page: c_int,
}

/// One placed image.
#[repr(C)]
pub struct PdftextImage {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub width: c_int,
    pub height: c_int,
}

/// One form field.
#[repr(C)]
pub struct PdftextFormField {
    pub name: PdftextString,
    pub value: PdftextString,
    pub field_type: PdftextString,
    pub has_rect: bool,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// Allocates an owned, NUL-terminated buffer from a string.
fn alloc_string(s: &str) -> (*mut c_char, usize) {
    let mut buf = Vec::with_capacity(s.len() + 1);
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    let len = s.len();
    (Box::into_raw(buf.into_boxed_slice()) as *mut c_char, len)
}

fn alloc_field(s: Option<&str>) -> PdftextString {
    match s {
        Some(s) => {
            let (ptr, len) = alloc_string(s);
            PdftextString { ptr, len }
        }
        None => PdftextString::empty(),
    }
}

/// Releases a buffer produced by `alloc_string`.
unsafe fn free_buffer(ptr: *mut c_char, len: usize) {
    if ptr.is_null() {
        return;
    }
    let slice = ptr::slice_from_raw_parts_mut(ptr as *mut u8, len + 1);
    unsafe { drop(Box::from_raw(slice)) };
}

unsafe fn free_field(field: &mut PdftextString) {
    unsafe { free_buffer(field.ptr, field.len) };
    field.ptr = ptr::null_mut();
    field.len = 0;
}

unsafe fn doc_mut<'a>(handle: *mut PdftextDocument) -> Option<&'a mut PDFDocument> {
    if handle.is_null() {
        None
    } else {
        Some(unsafe { &mut *(handle as *mut PDFDocument) })
    }
}

fn into_handle(doc: PDFDocument) -> *mut PdftextDocument {
    Box::into_raw(Box::new(doc)) as *mut PdftextDocument
}

/// Boxes a record vector, co-returning its length through `out_count`.
unsafe fn alloc_array<T>(items: Vec<T>, out_count: *mut usize) -> *mut T {
    if out_count.is_null() {
        return ptr::null_mut();
    }
    unsafe { *out_count = items.len() };
    if items.is_empty() {
        // An empty array is a valid result; hand out a freeable allocation
        return Box::into_raw(Vec::<T>::new().into_boxed_slice()) as *mut T;
    }
    Box::into_raw(items.into_boxed_slice()) as *mut T
}

unsafe fn take_array<T>(ptr: *mut T, count: usize) -> Vec<T> {
    if ptr.is_null() {
        return Vec::new();
    }
    let slice = ptr::slice_from_raw_parts_mut(ptr, count);
    unsafe { Box::from_raw(slice) }.into_vec()
}

/// Opens a document from a file path.
/// Returns null on I/O or parse failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_open(path: *const c_char) -> *mut PdftextDocument {
    if path.is_null() {
        return ptr::null_mut();
    }
    let path = match unsafe { CStr::from_ptr(path) }.to_str() {
        Ok(path) => path,
        Err(_) => return ptr::null_mut(),
    };
    match PDFDocument::open(path) {
        Ok(doc) => into_handle(doc),
        Err(_) => ptr::null_mut(),
    }
}

/// Opens a document from memory, copying the bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_open_memory(
    data: *const u8,
    len: usize,
) -> *mut PdftextDocument {
    if data.is_null() {
        return ptr::null_mut();
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, len) }.to_vec();
    match PDFDocument::open_memory(bytes) {
        Ok(doc) => into_handle(doc),
        Err(_) => ptr::null_mut(),
    }
}

/// Opens a document over caller-lent memory without copying.
/// The caller guarantees the bytes outlive the handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_open_memory_unsafe(
    data: *const u8,
    len: usize,
) -> *mut PdftextDocument {
    if data.is_null() {
        return ptr::null_mut();
    }
    match unsafe { PDFDocument::open_memory_unsafe(data, len, DocumentConfig::default()) } {
        Ok(doc) => into_handle(doc),
        Err(_) => ptr::null_mut(),
    }
}

/// Closes a document and releases everything it owns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_close(handle: *mut PdftextDocument) {
    if !handle.is_null() {
        unsafe { drop(Box::from_raw(handle as *mut PDFDocument)) };
    }
}

/// Number of pages, -1 on a null handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_page_count(handle: *mut PdftextDocument) -> c_int {
    match unsafe { doc_mut(handle) } {
        Some(doc) => doc.page_count() as c_int,
        None => -1,
    }
}

/// True when the document carries an /Encrypt dictionary.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_is_encrypted(handle: *mut PdftextDocument) -> bool {
    match unsafe { doc_mut(handle) } {
        Some(doc) => doc.is_encrypted(),
        None => false,
    }
}

/// Page geometry: width and height in points, rotation in degrees.
/// Returns 0, or -1 when the page is out of range.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_page_info(
    handle: *mut PdftextDocument,
    page: usize,
    width: *mut f64,
    height: *mut f64,
    rotation: *mut c_int,
) -> c_int {
    let doc = match unsafe { doc_mut(handle) } {
        Some(doc) => doc,
        None => return -1,
    };
    match doc.page_info(page) {
        Ok((w, h, r)) => {
            unsafe {
                if !width.is_null() {
                    *width = w;
                }
                if !height.is_null() {
                    *height = h;
                }
                if !rotation.is_null() {
                    *rotation = r;
                }
            }
            0
        }
        Err(_) => -1,
    }
}

unsafe fn extract_with(
    handle: *mut PdftextDocument,
    out_len: *mut usize,
    f: impl FnOnce(&mut PDFDocument) -> crate::core::PDFResult<String>,
) -> *mut c_char {
    if out_len.is_null() {
        return ptr::null_mut();
    }
    unsafe { *out_len = 0 };
    let doc = match unsafe { doc_mut(handle) } {
        Some(doc) => doc,
        None => return ptr::null_mut(),
    };
    match f(doc) {
        Ok(text) => {
            let (ptr, len) = alloc_string(&text);
            unsafe { *out_len = len };
            ptr
        }
        Err(_) => ptr::null_mut(),
    }
}

/// Extracts one page in reading order. Free with `pdftext_free_string`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_extract_page(
    handle: *mut PdftextDocument,
    page: usize,
    out_len: *mut usize,
) -> *mut c_char {
    unsafe { extract_with(handle, out_len, |doc| doc.extract_page(page)) }
}

/// Extracts the whole document in accuracy mode, form feeds between pages.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_extract_all(
    handle: *mut PdftextDocument,
    out_len: *mut usize,
) -> *mut c_char {
    unsafe { extract_with(handle, out_len, |doc| doc.extract_all()) }
}

/// Extracts the whole document in stream order.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_extract_all_fast(
    handle: *mut PdftextDocument,
    out_len: *mut usize,
) -> *mut c_char {
    unsafe { extract_with(handle, out_len, |doc| doc.extract_all_fast()) }
}

/// Whole document in accuracy mode (alias of `pdftext_extract_all`).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_reading_order_all(
    handle: *mut PdftextDocument,
    out_len: *mut usize,
) -> *mut c_char {
    unsafe { extract_with(handle, out_len, |doc| doc.reading_order_all()) }
}

/// One page rendered as Markdown.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_extract_markdown(
    handle: *mut PdftextDocument,
    page: usize,
    out_len: *mut usize,
) -> *mut c_char {
    unsafe { extract_with(handle, out_len, |doc| doc.extract_markdown(page)) }
}

/// The document's page label for a page, or null when undefined.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_page_label(
    handle: *mut PdftextDocument,
    page: usize,
    out_len: *mut usize,
) -> *mut c_char {
    if out_len.is_null() {
        return ptr::null_mut();
    }
    unsafe { *out_len = 0 };
    let doc = match unsafe { doc_mut(handle) } {
        Some(doc) => doc,
        None => return ptr::null_mut(),
    };
    match doc.page_label(page) {
        Ok(Some(label)) => {
            let (ptr, len) = alloc_string(&label);
            unsafe { *out_len = len };
            ptr
        }
        _ => ptr::null_mut(),
    }
}

/// Releases a string returned by any extraction entry point.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_free_string(ptr: *mut c_char, len: usize) {
    unsafe { free_buffer(ptr, len) };
}

/// Positioned text spans for a page. Free with `pdftext_free_spans`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_extract_bounds(
    handle: *mut PdftextDocument,
    page: usize,
    out_count: *mut usize,
) -> *mut PdftextSpan {
    let doc = match unsafe { doc_mut(handle) } {
        Some(doc) => doc,
        None => return ptr::null_mut(),
    };
    let spans = match doc.extract_bounds(page) {
        Ok(spans) => spans,
        Err(_) => return ptr::null_mut(),
    };

    let records: Vec<PdftextSpan> = spans
        .into_iter()
        .map(|span| {
            let (text, text_len) = alloc_string(&span.text);
            PdftextSpan {
                x0: span.bbox[0],
                y0: span.bbox[1],
                x1: span.bbox[2],
                y1: span.bbox[3],
                text,
                text_len,
                font_size: span.font_size,
            }
        })
        .collect();

    unsafe { alloc_array(records, out_count) }
}

/// Releases a span array and every string it owns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_free_spans(spans: *mut PdftextSpan, count: usize) {
    for span in unsafe { take_array(spans, count) } {
        unsafe { free_buffer(span.text, span.text_len) };
    }
}

/// Fills the metadata record. Returns 0, or -1 on a null argument.
/// Free the fields with `pdftext_free_metadata`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_metadata(
    handle: *mut PdftextDocument,
    out: *mut PdftextMetadata,
) -> c_int {
    if out.is_null() {
        return -1;
    }
    let doc = match unsafe { doc_mut(handle) } {
        Some(doc) => doc,
        None => return -1,
    };
    let metadata = doc.metadata().unwrap_or_default();

    unsafe {
        (*out).title = alloc_field(metadata.title.as_deref());
        (*out).author = alloc_field(metadata.author.as_deref());
        (*out).subject = alloc_field(metadata.subject.as_deref());
        (*out).keywords = alloc_field(metadata.keywords.as_deref());
        (*out).creator = alloc_field(metadata.creator.as_deref());
        (*out).producer = alloc_field(metadata.producer.as_deref());
        (*out).creation_date = alloc_field(metadata.creation_date.as_deref());
        (*out).mod_date = alloc_field(metadata.mod_date.as_deref());
    }
    0
}

/// Releases the strings inside a metadata record.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_free_metadata(out: *mut PdftextMetadata) {
    if out.is_null() {
        return;
    }
    unsafe {
        free_field(&mut (*out).title);
        free_field(&mut (*out).author);
        free_field(&mut (*out).subject);
        free_field(&mut (*out).keywords);
        free_field(&mut (*out).creator);
        free_field(&mut (*out).producer);
        free_field(&mut (*out).creation_date);
        free_field(&mut (*out).mod_date);
    }
}

/// The flattened outline. Free with `pdftext_free_outline`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_outline(
    handle: *mut PdftextDocument,
    out_count: *mut usize,
) -> *mut PdftextOutlineItem {
    let doc = match unsafe { doc_mut(handle) } {
        Some(doc) => doc,
        None => return ptr::null_mut(),
    };
    let items = doc.outline().unwrap_or_default();

    let records: Vec<PdftextOutlineItem> = items
        .into_iter()
        .map(|item| PdftextOutlineItem {
            title: alloc_field(Some(&item.title)),
            page: item.page.map(|p| p as c_int).unwrap_or(-1),
            level: item.level as c_int,
        })
        .collect();

    unsafe { alloc_array(records, out_count) }
}

/// Releases an outline array and its titles.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_free_outline(items: *mut PdftextOutlineItem, count: usize) {
    for mut item in unsafe { take_array(items, count) } {
        unsafe { free_field(&mut item.title) };
    }
}

/// ASCII case-insensitive search. Free with `pdftext_free_search_results`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_search(
    handle: *mut PdftextDocument,
    query: *const c_char,
    out_count: *mut usize,
) -> *mut PdftextSearchResult {
    if query.is_null() {
        return ptr::null_mut();
    }
    let query = match unsafe { CStr::from_ptr(query) }.to_str() {
        Ok(query) => query,
        Err(_) => return ptr::null_mut(),
    };
    let doc = match unsafe { doc_mut(handle) } {
        Some(doc) => doc,
        None => return ptr::null_mut(),
    };

    let hits = doc.search(query).unwrap_or_default();
    let records: Vec<PdftextSearchResult> = hits
        .into_iter()
        .map(|hit| PdftextSearchResult {
            page: hit.page as c_int,
            offset: hit.offset,
            context: alloc_field(Some(&hit.context)),
        })
        .collect();

    unsafe { alloc_array(records, out_count) }
}

/// Releases a search-result array and its contexts.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_free_search_results(
    results: *mut PdftextSearchResult,
    count: usize,
) {
    for mut result in unsafe { take_array(results, count) } {
        unsafe { free_field(&mut result.context) };
    }
}

/// Link annotations on a page. Free with `pdftext_free_links`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_page_links(
    handle: *mut PdftextDocument,
    page: usize,
    out_count: *mut usize,
) -> *mut PdftextLink {
    let doc = match unsafe { doc_mut(handle) } {
        Some(doc) => doc,
        None => return ptr::null_mut(),
    };
    let links = match doc.page_links(page) {
        Ok(links) => links,
        Err(_) => return ptr::null_mut(),
    };

    let records: Vec<PdftextLink> = links
        .into_iter()
        .map(|link| PdftextLink {
            x0: link.rect[0],
            y0: link.rect[1],
            x1: link.rect[2],
            y1: link.rect[3],
            uri: alloc_field(link.uri.as_deref()),
            dest_page: link.dest_page.map(|p| p as c_int).unwrap_or(-1),
        })
        .collect();

    unsafe { alloc_array(records, out_count) }
}

/// Releases a link array and its URIs.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_free_links(links: *mut PdftextLink, count: usize) {
    for mut link in unsafe { take_array(links, count) } {
        unsafe { free_field(&mut link.uri) };
    }
}

/// Image placements on a page. Free with `pdftext_free_images`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_page_images(
    handle: *mut PdftextDocument,
    page: usize,
    out_count: *mut usize,
) -> *mut PdftextImage {
    let doc = match unsafe { doc_mut(handle) } {
        Some(doc) => doc,
        None => return ptr::null_mut(),
    };
    let images = match doc.page_images(page) {
        Ok(images) => images,
        Err(_) => return ptr::null_mut(),
    };

    let records: Vec<PdftextImage> = images
        .into_iter()
        .map(|image| PdftextImage {
            x0: image.rect[0],
            y0: image.rect[1],
            x1: image.rect[2],
            y1: image.rect[3],
            width: image.width as c_int,
            height: image.height as c_int,
        })
        .collect();

    unsafe { alloc_array(records, out_count) }
}

/// Releases an image array.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_free_images(images: *mut PdftextImage, count: usize) {
    unsafe { drop(take_array(images, count)) };
}

/// Interactive form fields. Free with `pdftext_free_form_fields`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_form_fields(
    handle: *mut PdftextDocument,
    out_count: *mut usize,
) -> *mut PdftextFormField {
    let doc = match unsafe { doc_mut(handle) } {
        Some(doc) => doc,
        None => return ptr::null_mut(),
    };
    let fields = doc.form_fields().unwrap_or_default();

    let records: Vec<PdftextFormField> = fields
        .into_iter()
        .map(|field| {
            let rect = field.rect.unwrap_or([0.0; 4]);
            PdftextFormField {
                name: alloc_field(Some(&field.name)),
                value: alloc_field(field.value.as_deref()),
                field_type: alloc_field(Some(&field.field_type)),
                has_rect: field.rect.is_some(),
                x0: rect[0],
                y0: rect[1],
                x1: rect[2],
                y1: rect[3],
            }
        })
        .collect();

    unsafe { alloc_array(records, out_count) }
}

/// Releases a form-field array and its strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pdftext_free_form_fields(fields: *mut PdftextFormField, count: usize) {
    for mut field in unsafe { take_array(fields, count) } {
        unsafe {
            free_field(&mut field.name);
            free_field(&mut field.value);
            free_field(&mut field.field_type);
        }
    }
}
