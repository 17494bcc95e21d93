//! Page counting for uploaded documents.

use anyhow::{anyhow, Result};
use lopdf::Document;

use crate::schema::UploadedDocument;

/// Number of pages in the upload. Images count as a single page.
pub fn count_pages(document: &UploadedDocument) -> Result<u32> {
    if !document.is_pdf() {
        return Ok(1);
    }

    let doc = Document::load_mem(&document.data)
        .map_err(|e| anyhow!("Failed to load PDF {}: {}", document.filename, e))?;

    let pages = doc.get_pages().len() as u32;
    if pages == 0 {
        anyhow::bail!("PDF {} has no pages", document.filename);
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Object};

    fn build_pdf(page_count: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..page_count)
            .map(|_| {
                Object::Reference(doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                }))
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_counts_pdf_pages() {
        let document = UploadedDocument {
            filename: "guia.pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            data: build_pdf(3),
        };
        assert_eq!(count_pages(&document).unwrap(), 3);
    }

    #[test]
    fn test_image_is_one_page() {
        let document = UploadedDocument {
            filename: "guia.jpg".to_string(),
            content_type: Some("image/jpeg".to_string()),
            data: vec![0xFF, 0xD8, 0xFF],
        };
        assert_eq!(count_pages(&document).unwrap(), 1);
    }

    #[test]
    fn test_broken_pdf_is_an_error() {
        let document = UploadedDocument {
            filename: "broken.pdf".to_string(),
            content_type: None,
            data: b"%PDF-1.4 not really".to_vec(),
        };
        assert!(count_pages(&document).is_err());
    }
}
