/// Benchmarks for the extraction path.
///
/// Run with: cargo bench
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use pdftext::core::PDFDocument;

/// Assembles a synthetic document with `pages` pages of `lines` text
/// lines each, with a correct classic xref table.
fn generate_pdf(pages: usize, lines: usize) -> Vec<u8> {
    let mut objects: Vec<(u32, Vec<u8>)> = Vec::new();
    objects.push((1, b"<< /Type /Catalog /Pages 2 0 R >>".to_vec()));

    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
    objects.push((
        2,
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages
        )
        .into_bytes(),
    ));
    objects.push((
        3,
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec(),
    ));

    for page in 0..pages {
        let page_num = 4 + 2 * page as u32;
        objects.push((
            page_num,
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                page_num + 1
            )
            .into_bytes(),
        ));

        let mut content = String::from("BT /F1 11 Tf 72 720 Td 13 TL\n");
        for line in 0..lines {
            content.push_str(&format!(
                "(Lorem ipsum dolor sit amet line {} of page {}) Tj T*\n",
                line, page
            ));
        }
        content.push_str("ET");

        let mut body = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
        body.extend_from_slice(content.as_bytes());
        body.extend_from_slice(b"\nendstream");
        objects.push((page_num + 1, body));
    }

    let mut data = b"%PDF-1.4\n".to_vec();
    let max_num = objects.iter().map(|(n, _)| *n).max().unwrap();
    let mut offsets = vec![0usize; max_num as usize + 1];
    for (num, body) in &objects {
        offsets[*num as usize] = data.len();
        data.extend_from_slice(format!("{} 0 obj\n", num).as_bytes());
        data.extend_from_slice(body);
        data.extend_from_slice(b"\nendobj\n");
    }
    let xref_offset = data.len();
    let mut table = format!("xref\n0 {}\n0000000000 65535 f \n", max_num + 1);
    for offset in &offsets[1..] {
        table.push_str(&format!("{:010} 00000 n \n", offset));
    }
    table.push_str(&format!("trailer\n<< /Size {} /Root 1 0 R >>\n", max_num + 1));
    table.push_str(&format!("startxref\n{}\n%%EOF\n", xref_offset));
    data.extend_from_slice(table.as_bytes());
    data
}

fn benchmark_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_open");

    for pages in [1usize, 16, 128] {
        let data = generate_pdf(pages, 40);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(pages), &data, |b, data| {
            b.iter(|| PDFDocument::open_memory(black_box(data.clone())).unwrap());
        });
    }

    group.finish();
}

fn benchmark_extract_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_all");

    for pages in [1usize, 16, 128] {
        let data = generate_pdf(pages, 40);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(pages), &data, |b, data| {
            b.iter(|| {
                let mut doc = PDFDocument::open_memory(black_box(data.clone())).unwrap();
                black_box(doc.extract_all_fast().unwrap())
            });
        });
    }

    group.finish();
}

fn benchmark_extract_page_repeated(c: &mut Criterion) {
    let data = generate_pdf(4, 40);

    c.bench_function("extract_page_warm_caches", |b| {
        let mut doc = PDFDocument::open_memory(data.clone()).unwrap();
        b.iter(|| black_box(doc.extract_page(0).unwrap()));
    });
}

fn benchmark_bounds(c: &mut Criterion) {
    let data = generate_pdf(1, 200);

    c.bench_function("extract_bounds_dense_page", |b| {
        let mut doc = PDFDocument::open_memory(data.clone()).unwrap();
        b.iter(|| black_box(doc.extract_bounds(0).unwrap()));
    });
}

criterion_group!(
    benches,
    benchmark_open,
    benchmark_extract_all,
    benchmark_extract_page_repeated,
    benchmark_bounds
);
criterion_main!(benches);
