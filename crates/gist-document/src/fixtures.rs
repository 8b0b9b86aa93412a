//! Tiny in-memory PDF builder for tests.
//!
//! Produces structurally valid single-font documents: one text run per page,
//! or a contentless page standing in for a scanned image. Offsets in the
//! xref table are computed while the file is assembled, so the output parses
//! with strict readers.

use std::fmt::Write as _;

/// Build a PDF with one page per entry. `Some(text)` pages draw the text as
/// a single run; `None` pages have no content stream at all.
#[must_use]
pub fn pdf_with_pages(pages: &[Option<&str>]) -> Vec<u8> {
    // Object numbers: 1 catalog, 2 page tree, then for each page the page
    // object followed by its content stream (when present), font last.
    let mut next = 3u32;
    let mut page_objs = Vec::with_capacity(pages.len());
    let mut content_objs: Vec<Option<u32>> = Vec::with_capacity(pages.len());
    for page in pages {
        page_objs.push(next);
        next += 1;
        if page.is_some() {
            content_objs.push(Some(next));
            next += 1;
        } else {
            content_objs.push(None);
        }
    }
    let font_obj = next;

    let kids = page_objs
        .iter()
        .map(|n| format!("{n} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");

    let mut buf: Vec<u8> = Vec::new();
    let mut offsets: Vec<(u32, usize)> = Vec::new();
    buf.extend_from_slice(b"%PDF-1.4\n");

    push_object(
        &mut buf,
        &mut offsets,
        1,
        "<< /Type /Catalog /Pages 2 0 R >>".to_owned(),
    );
    push_object(
        &mut buf,
        &mut offsets,
        2,
        format!(
            "<< /Type /Pages /Kids [{kids}] /Count {} >>",
            page_objs.len()
        ),
    );

    for (i, page) in pages.iter().enumerate() {
        let mut dict = format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 {font_obj} 0 R >> >>"
        );
        if let Some(content_obj) = content_objs[i] {
            write!(dict, " /Contents {content_obj} 0 R").unwrap();
        }
        dict.push_str(" >>");
        push_object(&mut buf, &mut offsets, page_objs[i], dict);

        if let (Some(content_obj), Some(text)) = (content_objs[i], page) {
            let stream = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", escape_text(text));
            push_object(
                &mut buf,
                &mut offsets,
                content_obj,
                format!(
                    "<< /Length {} >>\nstream\n{stream}\nendstream",
                    stream.len()
                ),
            );
        }
    }

    push_object(
        &mut buf,
        &mut offsets,
        font_obj,
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_owned(),
    );

    offsets.sort_unstable();
    let size = font_obj + 1;
    let xref_offset = buf.len();
    let mut tail = format!("xref\n0 {size}\n0000000000 65535 f \n");
    for (_, offset) in &offsets {
        write!(tail, "{offset:010} 00000 n \n").unwrap();
    }
    write!(
        tail,
        "trailer\n<< /Size {size} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n"
    )
    .unwrap();
    buf.extend_from_slice(tail.as_bytes());
    buf
}

fn push_object(buf: &mut Vec<u8>, offsets: &mut Vec<(u32, usize)>, number: u32, body: String) {
    offsets.push((number, buf.len()));
    buf.extend_from_slice(format!("{number} 0 obj\n{body}\nendobj\n").as_bytes());
}

fn escape_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}
