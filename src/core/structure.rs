//! Tagged-PDF structure tree.
//!
//! Walks /StructTreeRoot and produces, per page object, the ordered list
//! of marked-content ids in logical (pre-order) document order. That list
//! is what turns stream-order text into reading-order text for tagged
//! documents.

use super::error::{ErrorSink, PDFError, PDFResult};
use super::parser::{Dict, PDFObject, Ref};
use super::xref::XRef;
use rustc_hash::{FxHashMap, FxHashSet};

/// Structure trees deeper than this are treated as corrupt.
const MAX_STRUCT_DEPTH: usize = 256;

/// A structure element node.
#[derive(Debug)]
pub struct StructElem {
    /// Structure kind from /S (P, H1, Table, Figure, Artifact, ...)
    pub kind: String,

    /// /T title, raw bytes
    pub title: Option<Vec<u8>>,

    /// /Alt replacement text, raw bytes
    pub alt: Option<Vec<u8>>,

    /// Page this element belongs to (/Pg, inherited by children)
    pub page: Option<Ref>,

    pub children: Vec<StructChild>,
}

/// A child of a structure element.
#[derive(Debug)]
pub enum StructChild {
    /// Nested element; boxed so node addresses stay stable as siblings grow
    Element(Box<StructElem>),

    /// Marked-content reference into a page's content stream
    Mcid { mcid: i32, page: Option<Ref> },
}

/// The parsed structure tree.
#[derive(Debug, Default)]
pub struct StructureTree {
    pub roots: Vec<StructElem>,
}

impl StructureTree {
    /// Parses the catalog's /StructTreeRoot, if the document has one.
    pub fn parse(
        xref: &mut XRef,
        catalog: &Dict,
        errors: &mut ErrorSink,
    ) -> PDFResult<Option<StructureTree>> {
        let root_obj = match catalog.get("StructTreeRoot") {
            Some(obj) => xref.fetch_if_ref(obj)?,
            None => return Ok(None),
        };
        let root_dict = match root_obj.as_dict() {
            Some(dict) => dict.clone(),
            None => return Ok(None),
        };

        let mut visited = FxHashSet::default();
        let mut roots = Vec::new();

        // The root's /K holds the document-level elements
        if let Some(kids) = root_dict.get("K") {
            let kids = kids.clone();
            collect_children(
                xref,
                &kids,
                None,
                &mut visited,
                0,
                errors,
                &mut |child| {
                    if let StructChild::Element(elem) = child {
                        roots.push(*elem);
                    }
                },
            )?;
        }

        Ok(Some(StructureTree { roots }))
    }

    /// Per page object number, the MCIDs in pre-order document order.
    ///
    /// /Artifact subtrees are left out entirely.
    pub fn mcid_order_by_page(&self) -> FxHashMap<u32, Vec<i32>> {
        let mut by_page: FxHashMap<u32, Vec<i32>> = FxHashMap::default();
        for root in &self.roots {
            visit(root, &mut by_page);
        }
        return by_page;

        fn visit(elem: &StructElem, by_page: &mut FxHashMap<u32, Vec<i32>>) {
            if elem.kind == "Artifact" {
                return;
            }
            for child in &elem.children {
                match child {
                    StructChild::Element(nested) => visit(nested, by_page),
                    StructChild::Mcid { mcid, page } => {
                        if let (Some(page), true) = (page, *mcid >= 0) {
                            by_page.entry(page.num).or_default().push(*mcid);
                        }
                    }
                }
            }
        }
    }
}

/// Parses one structure element dictionary.
fn parse_element(
    xref: &mut XRef,
    dict: &Dict,
    inherited_page: Option<Ref>,
    visited: &mut FxHashSet<Ref>,
    depth: usize,
    errors: &mut ErrorSink,
) -> PDFResult<StructElem> {
    let kind = dict
        .get("S")
        .and_then(|s| s.as_name())
        .unwrap_or("")
        .to_string();

    let page = dict
        .get("Pg")
        .and_then(|pg| pg.as_ref_obj())
        .or(inherited_page);

    let title = dict
        .get("T")
        .and_then(|t| t.as_string_bytes())
        .map(|b| b.to_vec());
    let alt = dict
        .get("Alt")
        .and_then(|a| a.as_string_bytes())
        .map(|b| b.to_vec());

    let mut elem = StructElem {
        kind,
        title,
        alt,
        page,
        children: Vec::new(),
    };

    if let Some(kids) = dict.get("K") {
        let kids = kids.clone();
        collect_children(xref, &kids, page, visited, depth, errors, &mut |child| {
            elem.children.push(child)
        })?;
    }

    Ok(elem)
}

/// Resolves one /K value: a direct MCID integer, an MCR dictionary, a
/// nested element, a reference to either, or an array of any of those.
fn collect_children(
    xref: &mut XRef,
    kids: &PDFObject,
    inherited_page: Option<Ref>,
    visited: &mut FxHashSet<Ref>,
    depth: usize,
    errors: &mut ErrorSink,
    push: &mut dyn FnMut(StructChild),
) -> PDFResult<()> {
    if depth > MAX_STRUCT_DEPTH {
        return errors.report(
            PDFError::syntax(format!("structure tree deeper than {}", MAX_STRUCT_DEPTH)),
            0,
        );
    }

    match kids {
        PDFObject::Integer(mcid) => {
            push(StructChild::Mcid {
                mcid: *mcid as i32,
                page: inherited_page,
            });
        }

        PDFObject::Array(items) => {
            for item in items {
                collect_children(xref, item, inherited_page, visited, depth, errors, push)?;
            }
        }

        PDFObject::Ref(r) => {
            if !visited.insert(*r) {
                return errors.report(
                    PDFError::syntax(format!(
                        "structure tree cycle through {} {} R",
                        r.num, r.generation
                    )),
                    0,
                );
            }
            let resolved = match xref.fetch_if_ref(kids) {
                Ok(obj) => obj,
                Err(e) => return errors.report(e, 0),
            };
            collect_children(xref, &resolved, inherited_page, visited, depth + 1, errors, push)?;
        }

        PDFObject::Dictionary(dict) => {
            match dict.get("Type").and_then(|t| t.as_name()) {
                Some("MCR") => {
                    let mcid = dict
                        .get("MCID")
                        .and_then(|m| m.as_integer())
                        .unwrap_or(-1) as i32;
                    let page = dict
                        .get("Pg")
                        .and_then(|pg| pg.as_ref_obj())
                        .or(inherited_page);
                    push(StructChild::Mcid { mcid, page });
                }
                Some("OBJR") => {
                    // Object references (annotations) carry no text
                }
                _ => {
                    let elem =
                        parse_element(xref, dict, inherited_page, visited, depth + 1, errors)?;
                    push(StructChild::Element(Box::new(elem)));
                }
            }
        }

        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorPolicy;
    use crate::core::stream::Stream;

    /// Builds a file whose structure tree spans elements with direct
    /// MCIDs, an MCR dictionary, and an /Artifact subtree.
    fn build_structured_pdf() -> (Vec<u8>, usize) {
        let objects: Vec<(u32, String)> = vec![
            (1, "<< /Type /Catalog /Pages 2 0 R /StructTreeRoot 4 0 R >>".into()),
            (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".into()),
            (3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".into()),
            (4, "<< /Type /StructTreeRoot /K [5 0 R] >>".into()),
            (
                5,
                "<< /S /Document /K [6 0 R 7 0 R 8 0 R] >>".into(),
            ),
            (6, "<< /S /P /Pg 3 0 R /K 0 >>".into()),
            (
                7,
                "<< /S /P /K [<< /Type /MCR /MCID 2 /Pg 3 0 R >> ] /Pg 3 0 R >>".into(),
            ),
            (8, "<< /S /Artifact /Pg 3 0 R /K 1 >>".into()),
        ];

        let mut data = b"%PDF-1.5\n".to_vec();
        let mut offsets = vec![0usize; objects.len() + 1];
        for (num, body) in &objects {
            offsets[*num as usize] = data.len();
            data.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", num, body).as_bytes());
        }
        let xref_offset = data.len();
        let mut table = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for offset in &offsets[1..] {
            table.push_str(&format!("{:010} 00000 n \n", offset));
        }
        table.push_str("trailer\n<< /Size 9 /Root 1 0 R >>\n");
        data.extend_from_slice(table.as_bytes());
        (data, xref_offset)
    }

    fn parse_tree(data: Vec<u8>, xref_offset: usize) -> Option<StructureTree> {
        let mut xref = XRef::new(Stream::from_bytes(data), false);
        xref.parse_at(xref_offset).unwrap();
        let catalog = xref.catalog().unwrap().as_dict().unwrap().clone();
        let mut errors = ErrorSink::new(ErrorPolicy::Default);
        StructureTree::parse(&mut xref, &catalog, &mut errors).unwrap()
    }

    #[test]
    fn test_mcid_order_skips_artifacts() {
        let (data, xref_offset) = build_structured_pdf();
        let tree = parse_tree(data, xref_offset).expect("tree present");

        let by_page = tree.mcid_order_by_page();
        // Pre-order: element 6 contributes MCID 0, element 7's MCR
        // contributes 2; the Artifact's MCID 1 is skipped
        assert_eq!(by_page.get(&3), Some(&vec![0, 2]));
    }

    #[test]
    fn test_element_attributes() {
        let (data, xref_offset) = build_structured_pdf();
        let tree = parse_tree(data, xref_offset).expect("tree present");

        assert_eq!(tree.roots.len(), 1);
        let document = &tree.roots[0];
        assert_eq!(document.kind, "Document");
        assert_eq!(document.children.len(), 3);
    }

    #[test]
    fn test_missing_struct_tree_is_none() {
        let catalog = Dict::new();
        let mut xref = XRef::new(Stream::from_bytes(Vec::new()), false);
        let mut errors = ErrorSink::new(ErrorPolicy::Default);
        assert!(
            StructureTree::parse(&mut xref, &catalog, &mut errors)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_cycle_is_pruned() {
        // Element 5 lists itself as a kid
        let objects: Vec<(u32, String)> = vec![
            (1, "<< /Type /Catalog /StructTreeRoot 4 0 R >>".into()),
            (4, "<< /Type /StructTreeRoot /K [5 0 R] >>".into()),
            (5, "<< /S /P /K [5 0 R 0] /Pg 9 0 R >>".into()),
        ];
        let mut data = Vec::new();
        let mut offsets: FxHashMap<u32, usize> = FxHashMap::default();
        for (num, body) in &objects {
            offsets.insert(*num, data.len());
            data.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", num, body).as_bytes());
        }
        let xref_offset = data.len();
        let mut table = String::from("xref\n0 1\n0000000000 65535 f \n");
        for num in [1u32, 4, 5] {
            table.push_str(&format!("{} 1\n{:010} 00000 n \n", num, offsets[&num]));
        }
        table.push_str("trailer\n<< /Size 6 /Root 1 0 R >>\n");
        data.extend_from_slice(table.as_bytes());

        let tree = parse_tree(data, xref_offset).expect("tree present");
        let by_page = tree.mcid_order_by_page();
        // The direct MCID survives; the self-reference is dropped
        assert_eq!(by_page.get(&9), Some(&vec![0]));
    }
}
