//! Shared helpers: assemble small, offset-correct PDFs in memory.
#![allow(dead_code)]

/// Routes `log` output through the test harness.
///
/// RUST_LOG=debug surfaces the parser's recovery warnings when a fixture
/// misbehaves.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Incrementally builds a classic-xref PDF file image.
///
/// Objects are emitted in insertion order; the cross-reference table and
/// startxref pointer are computed from the actual byte offsets.
pub struct PdfBuilder {
    objects: Vec<(u32, Vec<u8>)>,
    trailer_extra: String,
    header: &'static str,
}

impl PdfBuilder {
    pub fn new() -> Self {
        init_logging();
        PdfBuilder {
            objects: Vec::new(),
            trailer_extra: String::new(),
            header: "%PDF-1.4\n",
        }
    }

    /// Adds an object with a direct body (no obj/endobj wrapper).
    pub fn object(&mut self, num: u32, body: &str) -> &mut Self {
        self.objects.push((num, body.as_bytes().to_vec()));
        self
    }

    /// Adds a stream object; /Length is filled in from the data.
    pub fn stream_object(&mut self, num: u32, dict_extra: &str, data: &[u8]) -> &mut Self {
        let mut body = format!("<< /Length {} {} >>\nstream\n", data.len(), dict_extra)
            .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.objects.push((num, body));
        self
    }

    /// Extra trailer entries beyond /Size (e.g. "/Root 1 0 R").
    pub fn trailer(&mut self, extra: &str) -> &mut Self {
        self.trailer_extra = extra.to_string();
        self
    }

    /// Assembles the file; also returns the xref offset for incremental
    /// update tests.
    pub fn build_with_offsets(&self) -> (Vec<u8>, usize) {
        let mut data = self.header.as_bytes().to_vec();

        let max_num = self.objects.iter().map(|(n, _)| *n).max().unwrap_or(0);
        let mut offsets: Vec<Option<usize>> = vec![None; max_num as usize + 1];

        for (num, body) in &self.objects {
            offsets[*num as usize] = Some(data.len());
            data.extend_from_slice(format!("{} 0 obj\n", num).as_bytes());
            data.extend_from_slice(body);
            data.extend_from_slice(b"\nendobj\n");
        }

        let xref_offset = data.len();
        let size = max_num as usize + 1;
        let mut table = format!("xref\n0 {}\n0000000000 65535 f \n", size);
        for offset in offsets.iter().skip(1) {
            match offset {
                Some(offset) => table.push_str(&format!("{:010} 00000 n \n", offset)),
                None => table.push_str("0000000000 65535 f \n"),
            }
        }
        table.push_str(&format!(
            "trailer\n<< /Size {} {} >>\n",
            size, self.trailer_extra
        ));
        table.push_str(&format!("startxref\n{}\n%%EOF\n", xref_offset));
        data.extend_from_slice(table.as_bytes());

        (data, xref_offset)
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_with_offsets().0
    }
}

/// A one-font single-page document around the given content stream.
pub fn single_page_pdf(content: &str) -> Vec<u8> {
    multi_page_pdf(&[content])
}

/// One document with one page per content stream.
pub fn multi_page_pdf(contents: &[&str]) -> Vec<u8> {
    let mut builder = PdfBuilder::new();
    builder.object(1, "<< /Type /Catalog /Pages 2 0 R >>");

    let kids: Vec<String> = (0..contents.len())
        .map(|i| format!("{} 0 R", 4 + 2 * i))
        .collect();
    builder.object(
        2,
        &format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            contents.len()
        ),
    );
    builder.object(3, "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");

    for (i, content) in contents.iter().enumerate() {
        let page_num = 4 + 2 * i as u32;
        builder.object(
            page_num,
            &format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                page_num + 1
            ),
        );
        builder.stream_object(page_num + 1, "", content.as_bytes());
    }

    builder.trailer("/Root 1 0 R");
    builder.build()
}
