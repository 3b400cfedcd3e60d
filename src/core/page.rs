use super::error::{ErrorSink, PDFError, PDFResult};
use super::parser::{Dict, PDFObject, Ref};
use super::xref::XRef;
use rustc_hash::FxHashSet;

/// Page trees deeper than this are treated as corrupt.
const MAX_PAGE_TREE_DEPTH: usize = 64;

/// US Letter, the conventional fallback when /MediaBox is absent.
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// A flattened page-tree leaf.
///
/// Inheritable attributes (/Resources, /MediaBox, /CropBox, /Rotate) are
/// already resolved against the ancestor chain; each key is inherited
/// independently from the nearest ancestor that defines it.
#[derive(Debug, Clone)]
pub struct Page {
    /// Indirect reference of the page object, when it came from one
    pub page_ref: Option<Ref>,

    /// Resolved media box [llx, lly, urx, ury]
    pub media_box: [f64; 4],

    /// Resolved crop box, when either the page or an ancestor defines one
    pub crop_box: Option<[f64; 4]>,

    /// Rotation normalized to 0, 90, 180 or 270
    pub rotation: i32,

    /// Resolved resource dictionary
    pub resources: Option<Dict>,

    /// /Contents as written: a reference, an array of references, or a stream
    pub contents: Option<PDFObject>,

    /// The raw page dictionary
    pub dict: Dict,
}

impl Page {
    /// Page width in user-space points, rotation ignored.
    pub fn width(&self) -> f64 {
        (self.media_box[2] - self.media_box[0]).abs()
    }

    /// Page height in user-space points, rotation ignored.
    pub fn height(&self) -> f64 {
        (self.media_box[3] - self.media_box[1]).abs()
    }
}

/// Attributes a page inherits from its ancestors, resolved per key.
#[derive(Debug, Clone, Default)]
struct Inherited {
    resources: Option<Dict>,
    media_box: Option<[f64; 4]>,
    crop_box: Option<[f64; 4]>,
    rotate: Option<i32>,
}

/// Parses a 4-number rectangle.
pub(crate) fn rect_from(obj: &PDFObject) -> Option<[f64; 4]> {
    let arr = obj.as_array()?;
    if arr.len() < 4 {
        return None;
    }
    let mut vals = [0.0f64; 4];
    for (i, slot) in vals.iter_mut().enumerate() {
        *slot = arr[i].as_number()?;
    }
    // Normalize so the lower-left corner comes first
    let (x0, x1) = if vals[0] <= vals[2] {
        (vals[0], vals[2])
    } else {
        (vals[2], vals[0])
    };
    let (y0, y1) = if vals[1] <= vals[3] {
        (vals[1], vals[3])
    } else {
        (vals[3], vals[1])
    };
    Some([x0, y0, x1, y1])
}

/// Clamps /Rotate to a multiple of 90 in 0..360.
fn normalize_rotation(rotate: i32) -> i32 {
    if rotate % 90 != 0 {
        return 0;
    }
    ((rotate % 360) + 360) % 360
}

/// Flattens the catalog's /Pages tree into its in-order leaves.
///
/// `/Type` is treated as advisory: nodes carrying /Kids recurse even
/// without `/Type /Pages`, and a node without kids counts as a page when
/// it has /Contents or /MediaBox. Reference cycles and runaway depth are
/// reported to the sink and prune the offending subtree.
pub fn flatten_page_tree(
    xref: &mut XRef,
    catalog: &Dict,
    errors: &mut ErrorSink,
) -> PDFResult<Vec<Page>> {
    let root = match catalog.get("Pages") {
        Some(obj) => xref.fetch_if_ref(obj)?,
        None => {
            errors.report(PDFError::syntax("catalog has no /Pages"), 0)?;
            return Ok(Vec::new());
        }
    };

    let root_ref = catalog.get("Pages").and_then(|o| o.as_ref_obj());
    let root_dict = match root {
        PDFObject::Dictionary(dict) => dict,
        other => {
            errors.report(
                PDFError::syntax(format!("/Pages is not a dictionary: {:?}", other)),
                0,
            )?;
            return Ok(Vec::new());
        }
    };

    let mut pages = Vec::new();
    let mut visited = FxHashSet::default();
    if let Some(r) = root_ref {
        visited.insert(r);
    }

    walk_node(
        xref,
        &root_dict,
        root_ref,
        &Inherited::default(),
        &mut visited,
        0,
        &mut pages,
        errors,
    )?;

    Ok(pages)
}

#[allow(clippy::too_many_arguments)]
fn walk_node(
    xref: &mut XRef,
    node: &Dict,
    node_ref: Option<Ref>,
    inherited: &Inherited,
    visited: &mut FxHashSet<Ref>,
    depth: usize,
    pages: &mut Vec<Page>,
    errors: &mut ErrorSink,
) -> PDFResult<()> {
    if depth > MAX_PAGE_TREE_DEPTH {
        return errors.report(
            PDFError::syntax(format!("page tree deeper than {}", MAX_PAGE_TREE_DEPTH)),
            0,
        );
    }

    // Merge this node's inheritable attributes over what came down
    let mut attrs = inherited.clone();
    if let Some(res) = node.get("Resources") {
        match xref.fetch_if_ref(res) {
            Ok(PDFObject::Dictionary(dict)) => attrs.resources = Some(dict),
            Ok(_) => {}
            Err(e) => errors.report(e, 0)?,
        }
    }
    if let Some(mb) = node.get("MediaBox") {
        if let Ok(resolved) = xref.fetch_if_ref(mb) {
            if let Some(rect) = rect_from(&resolved) {
                attrs.media_box = Some(rect);
            }
        }
    }
    if let Some(cb) = node.get("CropBox") {
        if let Ok(resolved) = xref.fetch_if_ref(cb) {
            if let Some(rect) = rect_from(&resolved) {
                attrs.crop_box = Some(rect);
            }
        }
    }
    if let Some(rot) = node.get("Rotate") {
        if let Ok(resolved) = xref.fetch_if_ref(rot) {
            if let Some(n) = resolved.as_number() {
                attrs.rotate = Some(n as i32);
            }
        }
    }

    let type_name = node.get("Type").and_then(|t| t.as_name());
    let kids = node.get("Kids");

    let is_internal = match type_name {
        Some("Pages") => true,
        Some("Page") => false,
        // /Type is advisory: kids decide
        _ => kids.is_some(),
    };

    if is_internal {
        let kids = match kids {
            Some(k) => xref.fetch_if_ref(k)?,
            None => return Ok(()), // empty intermediate node
        };
        let kids = match kids.as_array() {
            Some(arr) => arr.to_vec(),
            None => {
                return errors.report(PDFError::syntax("/Kids is not an array"), 0);
            }
        };

        for kid in kids {
            let kid_ref = kid.as_ref_obj();
            if let Some(r) = kid_ref {
                if !visited.insert(r) {
                    errors.report(
                        PDFError::syntax(format!("page tree cycle through {} {} R", r.num, r.generation)),
                        0,
                    )?;
                    continue;
                }
            }

            let kid_obj = match xref.fetch_if_ref(&kid) {
                Ok(obj) => obj,
                Err(e) => {
                    errors.report(e, 0)?;
                    continue;
                }
            };

            match kid_obj {
                PDFObject::Dictionary(kid_dict) => {
                    walk_node(
                        xref, &kid_dict, kid_ref, &attrs, visited, depth + 1, pages, errors,
                    )?;
                }
                other => {
                    errors.report(
                        PDFError::syntax(format!("page tree kid is not a dictionary: {:?}", other)),
                        0,
                    )?;
                }
            }
        }
        return Ok(());
    }

    // Leaf: require page-like content unless /Type /Page says so outright
    if type_name != Some("Page") && !node.contains_key("Contents") && !node.contains_key("MediaBox")
    {
        return errors.report(PDFError::syntax("page-tree leaf has no page attributes"), 0);
    }

    pages.push(Page {
        page_ref: node_ref,
        media_box: attrs.media_box.unwrap_or(DEFAULT_MEDIA_BOX),
        crop_box: attrs.crop_box,
        rotation: normalize_rotation(attrs.rotate.unwrap_or(0)),
        resources: attrs.resources,
        contents: node.get("Contents").cloned(),
        dict: node.clone(),
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorPolicy;
    use crate::core::stream::Stream;

    #[test]
    fn test_rect_from() {
        let obj = PDFObject::Array(smallvec::smallvec![
            Box::new(PDFObject::Integer(0)),
            Box::new(PDFObject::Integer(0)),
            Box::new(PDFObject::Real(612.0)),
            Box::new(PDFObject::Integer(792)),
        ]);
        assert_eq!(rect_from(&obj), Some([0.0, 0.0, 612.0, 792.0]));

        // Swapped corners are normalized
        let obj = PDFObject::Array(smallvec::smallvec![
            Box::new(PDFObject::Integer(612)),
            Box::new(PDFObject::Integer(792)),
            Box::new(PDFObject::Integer(0)),
            Box::new(PDFObject::Integer(0)),
        ]);
        assert_eq!(rect_from(&obj), Some([0.0, 0.0, 612.0, 792.0]));

        assert_eq!(rect_from(&PDFObject::Integer(4)), None);
    }

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(0), 0);
        assert_eq!(normalize_rotation(90), 90);
        assert_eq!(normalize_rotation(360), 0);
        assert_eq!(normalize_rotation(450), 90);
        assert_eq!(normalize_rotation(-90), 270);
        assert_eq!(normalize_rotation(45), 0);
    }

    /// Assembles a file with a two-level page tree. Resources and MediaBox
    /// sit on the root node, one leaf overrides Rotate, and the second
    /// leaf omits /Type entirely.
    fn build_tree_pdf() -> (Vec<u8>, usize) {
        let objects: Vec<(u32, String)> = vec![
            (1, "<< /Type /Catalog /Pages 2 0 R >>".into()),
            (
                2,
                "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 \
                 /MediaBox [0 0 612 792] /Resources << /Font << >> >> >>"
                    .into(),
            ),
            (3, "<< /Type /Page /Parent 2 0 R /Rotate 90 >>".into()),
            (4, "<< /Parent 2 0 R /MediaBox [0 0 200 100] /Contents 5 0 R >>".into()),
            (5, "<< /Length 0 >>\nstream\n\nendstream".into()),
        ];

        let mut data = b"%PDF-1.4\n".to_vec();
        let mut offsets = vec![0usize; objects.len() + 1];
        for (num, body) in &objects {
            offsets[*num as usize] = data.len();
            data.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", num, body).as_bytes());
        }
        let xref_offset = data.len();
        let mut table = String::from("xref\n0 6\n0000000000 65535 f \n");
        for offset in &offsets[1..] {
            table.push_str(&format!("{:010} 00000 n \n", offset));
        }
        table.push_str("trailer\n<< /Size 6 /Root 1 0 R >>\n");
        data.extend_from_slice(table.as_bytes());
        data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        (data, xref_offset)
    }

    #[test]
    fn test_flatten_page_tree() {
        let (data, xref_offset) = build_tree_pdf();
        let mut xref = XRef::new(Stream::from_bytes(data), false);
        xref.parse_at(xref_offset).unwrap();
        let catalog = xref.catalog().unwrap();
        let catalog = catalog.as_dict().unwrap().clone();

        let mut errors = ErrorSink::new(ErrorPolicy::Default);
        let pages = flatten_page_tree(&mut xref, &catalog, &mut errors).unwrap();

        assert_eq!(pages.len(), 2);

        // First leaf inherits the root MediaBox and Resources
        assert_eq!(pages[0].media_box, [0.0, 0.0, 612.0, 792.0]);
        assert_eq!(pages[0].rotation, 90);
        assert!(pages[0].resources.is_some());

        // Second leaf (no /Type) overrides MediaBox and keeps rotation 0
        assert_eq!(pages[1].media_box, [0.0, 0.0, 200.0, 100.0]);
        assert_eq!(pages[1].rotation, 0);
        assert!(pages[1].contents.is_some());
        assert_eq!(pages[1].page_ref, Some(Ref::new(4, 0)));
    }
}
