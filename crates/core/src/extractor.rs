use crate::error::IngestError;
use crate::models::DocumentKind;
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Maximum decompressed bytes read from a single zip entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const MAX_SHEETS: usize = 256;

pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, path: &Path, kind: DocumentKind) -> Result<String, IngestError>;
}

/// Extracts PDFs with lopdf and OOXML packages (xlsx, docx) by reading their XML parts.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentExtractor;

impl TextExtractor for DocumentExtractor {
    fn extract_text(&self, path: &Path, kind: DocumentKind) -> Result<String, IngestError> {
        match kind {
            DocumentKind::Pdf => extract_pdf(path),
            DocumentKind::Spreadsheet => extract_spreadsheet(path),
            DocumentKind::WordProcessing => extract_word(path),
        }
    }
}

pub fn extract_text(path: &Path, media_type: &str) -> Result<String, IngestError> {
    let kind = DocumentKind::from_media_type(media_type)?;
    DocumentExtractor.extract_text(path, kind)
}

fn extract_pdf(path: &Path) -> Result<String, IngestError> {
    let document =
        Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

    let mut text = String::new();
    for page_no in document.get_pages().keys() {
        let page_text = document
            .extract_text(&[*page_no])
            .map_err(|error| IngestError::PdfParse(error.to_string()))?;
        text.push_str(&page_text);
    }

    if text.trim().is_empty() {
        return Err(IngestError::EmptyDocument(format!(
            "pdf had no readable text: {}",
            path.display()
        )));
    }

    Ok(text)
}

fn open_package(path: &Path) -> Result<zip::ZipArchive<BufReader<File>>, IngestError> {
    let file = File::open(path)?;
    zip::ZipArchive::new(BufReader::new(file)).map_err(|error| IngestError::Ooxml(error.to_string()))
}

fn read_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, IngestError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(error) => return Err(IngestError::Ooxml(error.to_string())),
    };

    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(IngestError::Ooxml(format!(
            "zip entry {name} exceeds {MAX_XML_ENTRY_BYTES} bytes"
        )));
    }
    Ok(Some(out))
}

fn xml_error(error: quick_xml::Error) -> IngestError {
    IngestError::Ooxml(error.to_string())
}

fn extract_word(path: &Path) -> Result<String, IngestError> {
    let mut archive = open_package(path)?;
    let xml = read_entry(&mut archive, "word/document.xml")?
        .ok_or_else(|| IngestError::Ooxml("word/document.xml not found".to_string()))?;
    word_document_text(&xml)
}

/// Collects `w:t` runs; every closed `w:p` paragraph ends a line.
fn word_document_text(xml: &[u8]) -> Result<String, IngestError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(element) if element.local_name().as_ref() == b"t" => in_text = true,
            Event::Text(text) if in_text => {
                out.push_str(&text.unescape().map_err(xml_error)?);
            }
            Event::Empty(element) if element.local_name().as_ref() == b"tab" => out.push('\t'),
            Event::End(element) => match element.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn extract_spreadsheet(path: &Path) -> Result<String, IngestError> {
    let mut archive = open_package(path)?;
    let shared_strings = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let mut out = String::new();
    for name in worksheet_names(&mut archive)?.into_iter().take(MAX_SHEETS) {
        if let Some(xml) = read_entry(&mut archive, &name)? {
            for row in sheet_rows(&xml, &shared_strings)? {
                out.push_str(&row.join(" "));
                out.push('\n');
            }
        }
    }

    Ok(out)
}

/// Worksheet parts in workbook tab order, resolved through `xl/workbook.xml`
/// and its relationships. Packages without those parts fall back to the
/// `sheetN.xml` numbering.
fn worksheet_names<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<String>, IngestError> {
    let workbook = read_entry(archive, "xl/workbook.xml")?;
    let relationships = read_entry(archive, "xl/_rels/workbook.xml.rels")?;

    if let (Some(workbook), Some(relationships)) = (workbook, relationships) {
        let targets = relationship_targets(&relationships)?;
        let ordered: Vec<String> = workbook_sheet_ids(&workbook)?
            .iter()
            .filter_map(|id| targets.get(id))
            .map(|target| package_part(target))
            .filter(|part| archive.file_names().any(|name| name == part.as_str()))
            .collect();
        if !ordered.is_empty() {
            return Ok(ordered);
        }
    }

    Ok(numbered_worksheets(archive))
}

fn numbered_worksheets<R: Read + Seek>(archive: &zip::ZipArchive<R>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("xl/worksheets/sheet") && name.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Relationship targets are relative to `xl/` unless they start with `/`.
fn package_part(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

/// `r:id` of every `<sheet>` in `<sheets>`, in tab order.
fn workbook_sheet_ids(xml: &[u8]) -> Result<Vec<String>, IngestError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut ids = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"sheet" =>
            {
                for attribute in element.attributes().flatten() {
                    if attribute.key.local_name().as_ref() == b"id" {
                        ids.push(attribute.unescape_value().map_err(xml_error)?.into_owned());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(ids)
}

fn relationship_targets(xml: &[u8]) -> Result<HashMap<String, String>, IngestError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut targets = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attribute in element.attributes().flatten() {
                    match attribute.key.local_name().as_ref() {
                        b"Id" => id = Some(attribute.unescape_value().map_err(xml_error)?.into_owned()),
                        b"Target" => {
                            target = Some(attribute.unescape_value().map_err(xml_error)?.into_owned())
                        }
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(targets)
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, IngestError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Event::Text(text) if in_text => {
                current.push_str(&text.unescape().map_err(xml_error)?);
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Empty(element) if element.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CellType {
    Shared,
    Inline,
    Boolean,
    Literal,
}

/// Returns the non-empty cell values of each non-empty row, in document order.
fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, IngestError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_type = CellType::Literal;
    let mut value = String::new();
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    value.clear();
                    cell_type = CellType::Literal;
                    for attribute in element.attributes().flatten() {
                        if attribute.key.local_name().as_ref() == b"t" {
                            cell_type = match attribute.value.as_ref() {
                                b"s" => CellType::Shared,
                                b"inlineStr" => CellType::Inline,
                                b"b" => CellType::Boolean,
                                _ => CellType::Literal,
                            };
                        }
                    }
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Event::Text(text) if in_value => {
                value.push_str(&text.unescape().map_err(xml_error)?);
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(resolved) = resolve_cell(cell_type, value.trim(), shared_strings) {
                        row.push(resolved);
                    }
                    value.clear();
                }
                b"row" => {
                    if !row.is_empty() {
                        rows.push(std::mem::take(&mut row));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(rows)
}

fn resolve_cell(cell_type: CellType, raw: &str, shared_strings: &[String]) -> Option<String> {
    if raw.is_empty() {
        return None;
    }

    match cell_type {
        CellType::Shared => raw
            .parse::<usize>()
            .ok()
            .and_then(|index| shared_strings.get(index))
            .cloned(),
        CellType::Boolean => Some(if raw == "1" { "true" } else { "false" }.to_string()),
        CellType::Inline | CellType::Literal => Some(raw.to_string()),
    }
}
