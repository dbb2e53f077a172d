//! Concatenate documents and attach files.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

use super::{save_document, PdfError, TextDocument};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITED_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Builds one document out of the pages of many.
pub struct PdfMerger {
    doc: Document,
    pages: Vec<ObjectId>,
    attachments: Vec<(String, Vec<u8>)>,
}

impl Default for PdfMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfMerger {
    pub fn new() -> Self {
        Self {
            doc: Document::with_version("1.5"),
            pages: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Append every page of `source`; returns the number of pages added.
    pub fn append_document(&mut self, mut source: Document) -> Result<usize, PdfError> {
        source.renumber_objects_with(self.doc.max_id + 1);

        let page_ids: Vec<ObjectId> = source.get_pages().into_values().collect();
        if page_ids.is_empty() {
            return Err(PdfError::NoPages);
        }

        // Pages lose their old parents, so copy inherited attributes down first.
        for &page_id in &page_ids {
            let missing: Vec<(&[u8], Object)> = {
                let page = source.get_dictionary(page_id)?;
                INHERITED_KEYS
                    .iter()
                    .filter(|key| !page.has(key))
                    .filter_map(|key| inherited_attribute(&source, page, key).map(|v| (*key, v)))
                    .collect()
            };
            if missing.is_empty() {
                continue;
            }
            let page = source.get_object_mut(page_id).and_then(Object::as_dict_mut)?;
            for (key, value) in missing {
                page.set(key, value);
            }
        }

        let objects = std::mem::take(&mut source.objects);
        for (id, object) in objects {
            if is_tree_node(&object) {
                continue;
            }
            self.doc.objects.insert(id, object);
        }
        self.doc.max_id = self.doc.max_id.max(source.max_id);
        self.pages.extend(&page_ids);
        Ok(page_ids.len())
    }

    /// Load and append a PDF file.
    pub fn append_file(&mut self, path: &Path) -> Result<usize, PdfError> {
        let doc = Document::load(path)?;
        self.append_document(doc)
    }

    /// Render and append a text document.
    pub fn append_text(&mut self, text: &TextDocument) -> Result<usize, PdfError> {
        self.append_document(text.to_document()?)
    }

    /// Attach a file to the output's embedded-file list.
    pub fn embed_file(&mut self, name: &str, data: Vec<u8>) {
        self.attachments.push((name.to_string(), data));
    }

    /// Build the merged document.
    pub fn finish(mut self) -> Result<Document, PdfError> {
        if self.pages.is_empty() {
            return Err(PdfError::NoPages);
        }

        let pages_id = self.doc.new_object_id();
        for &page_id in &self.pages {
            let page = self.doc.get_object_mut(page_id).and_then(Object::as_dict_mut)?;
            page.set("Parent", pages_id);
        }

        let kids: Vec<Object> = self.pages.iter().map(|&id| Object::Reference(id)).collect();
        let count = kids.len() as i64;
        self.doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        };
        if !self.attachments.is_empty() {
            let names = self.embedded_files_tree();
            catalog.set(
                "Names",
                dictionary! {
                    "EmbeddedFiles" => dictionary! { "Names" => names },
                },
            );
        }
        let catalog_id = self.doc.add_object(catalog);
        self.doc.trailer = Dictionary::new();
        self.doc.trailer.set("Root", catalog_id);

        self.doc.prune_objects();
        self.doc.renumber_objects();
        self.doc.compress();
        Ok(self.doc)
    }

    /// Build, then write to `path`.
    pub fn save(self, path: &Path) -> Result<(), PdfError> {
        let mut doc = self.finish()?;
        save_document(&mut doc, path)
    }

    /// Name tree entries, sorted by name as the format requires.
    fn embedded_files_tree(&mut self) -> Vec<Object> {
        let mut attachments = std::mem::take(&mut self.attachments);
        attachments.sort_by(|a, b| a.0.cmp(&b.0));

        let mut seen = std::collections::HashMap::<String, usize>::new();
        let mut names = Vec::with_capacity(attachments.len() * 2);
        for (name, data) in attachments {
            let n = seen.entry(name.clone()).or_insert(0);
            *n += 1;
            let key = if *n == 1 { name.clone() } else { format!("{name} ({n})") };

            let size = data.len() as i64;
            let stream_id = self.doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "EmbeddedFile",
                    "Params" => dictionary! { "Size" => size },
                },
                data,
            ));
            let spec_id = self.doc.add_object(dictionary! {
                "Type" => "Filespec",
                "F" => Object::string_literal(name.clone()),
                "UF" => Object::string_literal(name),
                "EF" => dictionary! { "F" => stream_id },
            });
            names.push(Object::string_literal(key));
            names.push(Object::Reference(spec_id));
        }
        names
    }
}

fn is_tree_node(object: &Object) -> bool {
    match object {
        Object::Dictionary(dict) => matches!(
            dict.get(b"Type"),
            Ok(Object::Name(name)) if name.as_slice() == b"Catalog" || name.as_slice() == b"Pages"
        ),
        _ => false,
    }
}

/// Walk up the `Parent` chain looking for `key`.
fn inherited_attribute(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;
    while let Some(id) = parent {
        if depth > 32 {
            break;
        }
        let node = doc.get_dictionary(id).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }
    None
}

/// Names of the files embedded in a document, in name-tree order.
pub fn embedded_file_names(doc: &Document) -> Vec<String> {
    let Ok(catalog) = doc.catalog() else {
        return Vec::new();
    };
    let names = catalog
        .get(b"Names")
        .and_then(|n| resolve_dict(doc, n))
        .and_then(|n| n.get(b"EmbeddedFiles"))
        .and_then(|e| resolve_dict(doc, e))
        .and_then(|e| e.get(b"Names"))
        .and_then(Object::as_array);
    let Ok(names) = names else {
        return Vec::new();
    };
    names
        .iter()
        .step_by(2)
        .filter_map(|n| match n {
            Object::String(bytes, _) => Some(String::from_utf8_lossy(bytes).to_string()),
            _ => None,
        })
        .collect()
}

fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Result<&'a Dictionary, lopdf::Error> {
    match object {
        Object::Reference(id) => doc.get_dictionary(*id),
        other => other.as_dict(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_doc(line: &str, lines: usize) -> TextDocument {
        let mut doc = TextDocument::new();
        for i in 0..lines {
            doc.paragraph(&format!("{line} {i}"));
        }
        doc
    }

    #[test]
    fn test_merge_counts_pages() {
        let mut merger = PdfMerger::new();
        assert_eq!(merger.append_text(&text_doc("email", 3)).unwrap(), 1);
        assert_eq!(merger.append_text(&text_doc("attachment", 100)).unwrap(), 2);
        assert_eq!(merger.page_count(), 3);

        let doc = merger.finish().unwrap();
        assert_eq!(doc.get_pages().len(), 3);
        let first = doc.extract_text(&[1]).unwrap();
        assert!(first.contains("email 0"));
        let last = doc.extract_text(&[3]).unwrap();
        assert!(last.contains("attachment 99"));
    }

    #[test]
    fn test_merge_survives_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("merged.pdf");

        let mut merger = PdfMerger::new();
        merger.append_text(&text_doc("one", 1)).unwrap();
        merger.append_text(&text_doc("two", 1)).unwrap();
        merger.embed_file("notes.txt", b"plain notes".to_vec());
        merger.embed_file("b.csv", b"a,b\n1,2\n".to_vec());
        merger.save(&path).unwrap();

        let reloaded = Document::load(&path).unwrap();
        assert_eq!(reloaded.get_pages().len(), 2);
        assert_eq!(embedded_file_names(&reloaded), vec!["b.csv", "notes.txt"]);
    }

    #[test]
    fn test_empty_merger_is_an_error() {
        assert!(matches!(PdfMerger::new().finish(), Err(PdfError::NoPages)));
    }

    #[test]
    fn test_duplicate_attachment_names_are_disambiguated() {
        let mut merger = PdfMerger::new();
        merger.append_text(&text_doc("x", 1)).unwrap();
        merger.embed_file("a.txt", b"1".to_vec());
        merger.embed_file("a.txt", b"2".to_vec());
        let doc = merger.finish().unwrap();
        assert_eq!(embedded_file_names(&doc), vec!["a.txt", "a.txt (2)"]);
    }
}
