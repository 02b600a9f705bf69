//! Multi-format ingestion tests.
//!
//! Word documents are built in memory as minimal OOXML archives and pushed
//! through the real loader, chunker, and index.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::{app_with, FakeModel};
use rag_harness::config::Config;
use rag_harness::loader;
use rag_harness::models::DocumentKind;

/// Minimal docx (ZIP) whose body holds one `<w:p>` per paragraph.
fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[test]
fn test_docx_loads_as_structured_document() {
    let bytes = minimal_docx(&["Warranty terms", "Devices carry a two-year warranty."]);
    let docs = loader::try_load_bytes(&bytes, "Terms.DOCX", "fp").unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].kind, DocumentKind::Structured);
    assert!(docs[0].text.contains("Warranty terms"));
    assert!(docs[0].text.contains("two-year warranty"));
}

#[tokio::test]
async fn test_docx_ingest_and_retrieve() {
    let app = app_with(Config::default(), Arc::new(FakeModel::default()));
    let bytes = minimal_docx(&["Warranty terms", "Devices carry a two-year warranty."]);

    let report = app.ingestor.ingest_bytes(bytes, "terms.docx").await.unwrap();
    assert_eq!(report.file_name, "terms.docx");
    assert!(report.chunk_count >= 1);

    let passages = app.index.retrieve("warranty", 4, Some(0.5)).await.unwrap();
    assert!(!passages.is_empty());
    assert_eq!(passages[0].file_name, "terms.docx");
    assert!(passages[0].text.contains("two-year warranty"));
}

#[tokio::test]
async fn test_corrupt_pdf_is_load_error() {
    let app = app_with(Config::default(), Arc::new(FakeModel::default()));

    let err = app
        .ingestor
        .ingest_bytes(b"not a valid pdf".to_vec(), "bad.pdf")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "load_error");
    assert!(err.to_string().contains("bad.pdf"));
    assert!(app.index.list_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_docx_without_text_is_load_error() {
    let app = app_with(Config::default(), Arc::new(FakeModel::default()));

    let err = app
        .ingestor
        .ingest_bytes(minimal_docx(&[]), "blank.docx")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "load_error");
    assert!(err.to_string().contains("no extractable text"));
}

#[tokio::test]
async fn test_docx_missing_body_is_load_error() {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"not a word document").unwrap();
        zip.finish().unwrap();
    }

    let app = app_with(Config::default(), Arc::new(FakeModel::default()));
    let err = app.ingestor.ingest_bytes(buf, "fake.docx").await.unwrap_err();
    assert_eq!(err.kind(), "load_error");
}
