//! Minimal PDF generation: flowing text pages and single-image pages.
//!
//! Text uses the standard Type1 Times-Roman/Times-Bold fonts with
//! WinAnsiEncoding, so nothing has to be embedded. Characters outside that
//! encoding are written as `?`. Line wrapping uses an average glyph width
//! estimate rather than real font metrics.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::path::Path;

use super::{save_document, PdfError};

/// US Letter width in points.
pub const PAGE_WIDTH: i64 = 612;
/// US Letter height in points.
pub const PAGE_HEIGHT: i64 = 792;
/// One inch on every side.
pub const MARGIN: i64 = 72;

const REGULAR_FONT: &[u8] = b"F1";
const BOLD_FONT: &[u8] = b"F2";
const AVG_GLYPH_WIDTH: f64 = 0.5;

/// Body font size and line spacing, in points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStyle {
    pub font_size: i64,
    pub leading: i64,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: 8,
            leading: 10,
        }
    }
}

#[derive(Debug, Clone)]
enum Block {
    Text { text: String, bold: bool, size: i64 },
    Space(i64),
}

#[derive(Debug, Clone, PartialEq)]
struct PlacedLine {
    text: String,
    bold: bool,
    size: i64,
    y: i64,
}

/// A document of headings and wrapped paragraphs.
#[derive(Debug, Clone, Default)]
pub struct TextDocument {
    style: TextStyle,
    blocks: Vec<Block>,
}

impl TextDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_style(style: TextStyle) -> Self {
        Self {
            style,
            blocks: Vec::new(),
        }
    }

    /// A bold line at `size` points.
    pub fn heading(&mut self, text: &str, size: i64) -> &mut Self {
        self.blocks.push(Block::Text {
            text: text.to_string(),
            bold: true,
            size,
        });
        self
    }

    /// A wrapped paragraph in the body style.
    pub fn paragraph(&mut self, text: &str) -> &mut Self {
        self.blocks.push(Block::Text {
            text: text.to_string(),
            bold: false,
            size: self.style.font_size,
        });
        self
    }

    /// One paragraph per non-blank line of `text`.
    pub fn lines(&mut self, text: &str) -> &mut Self {
        for line in text.lines() {
            let line = line.trim_end();
            if !line.trim().is_empty() {
                self.paragraph(line);
            }
        }
        self
    }

    /// Vertical gap in points.
    pub fn space(&mut self, points: i64) -> &mut Self {
        self.blocks.push(Block::Space(points));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn layout(&self) -> Vec<Vec<PlacedLine>> {
        let top = PAGE_HEIGHT - MARGIN;
        let mut pages: Vec<Vec<PlacedLine>> = vec![Vec::new()];
        let mut y = top;

        for block in &self.blocks {
            match block {
                Block::Space(points) => {
                    y -= points;
                    if y < MARGIN {
                        pages.push(Vec::new());
                        y = top;
                    }
                }
                Block::Text { text, bold, size } => {
                    let leading = if *size == self.style.font_size {
                        self.style.leading
                    } else {
                        size + 2
                    };
                    for line in wrap_text(text, max_chars(*size)) {
                        if y - leading < MARGIN {
                            pages.push(Vec::new());
                            y = top;
                        }
                        y -= leading;
                        if let Some(page) = pages.last_mut() {
                            page.push(PlacedLine {
                                text: line,
                                bold: *bold,
                                size: *size,
                                y,
                            });
                        }
                    }
                }
            }
        }

        if pages.len() > 1 && pages.last().is_some_and(Vec::is_empty) {
            pages.pop();
        }
        pages
    }

    /// Render into a standalone document.
    pub fn to_document(&self) -> Result<Document, PdfError> {
        let mut builder = PageBuilder::new();
        let resources = builder.font_resources();
        for lines in self.layout() {
            let mut operations = Vec::with_capacity(lines.len() * 5);
            for line in lines {
                let font = if line.bold { BOLD_FONT } else { REGULAR_FONT };
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new(
                    "Tf",
                    vec![Object::Name(font.to_vec()), Object::Integer(line.size)],
                ));
                operations.push(Operation::new(
                    "Td",
                    vec![Object::Integer(MARGIN), Object::Integer(line.y)],
                ));
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::String(encode_win_ansi(&line.text), StringFormat::Literal)],
                ));
                operations.push(Operation::new("ET", vec![]));
            }
            builder.add_page(Content { operations }, Object::Reference(resources))?;
        }
        Ok(builder.finish())
    }

    /// Render and write to `path`.
    pub fn save(&self, path: &Path) -> Result<(), PdfError> {
        let mut doc = self.to_document()?;
        save_document(&mut doc, path)
    }
}

/// A one-page document showing an image scaled to fit inside the margins.
pub fn image_document(bytes: &[u8]) -> Result<Document, PdfError> {
    let img = image::load_from_memory(bytes)?.to_rgb8();
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(PdfError::NoPages);
    }

    let (draw_w, draw_h) = fit_within(
        width,
        height,
        PAGE_WIDTH - 2 * MARGIN,
        PAGE_HEIGHT - 2 * MARGIN,
    );

    let mut builder = PageBuilder::new();
    let image_id = builder.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8i64,
        },
        img.into_raw(),
    ));
    let resources = builder.add_object(dictionary! {
        "XObject" => dictionary! { "Im1" => image_id },
    });

    let y = PAGE_HEIGHT - MARGIN - draw_h;
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(draw_w),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(draw_h),
                    Object::Integer(MARGIN),
                    Object::Integer(y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    builder.add_page(content, Object::Reference(resources))?;
    Ok(builder.finish())
}

/// Scale `(w, h)` down to fit `max_w` x `max_h`, never up.
fn fit_within(width: u32, height: u32, max_w: i64, max_h: i64) -> (i64, i64) {
    let scale = (max_w as f64 / width as f64)
        .min(max_h as f64 / height as f64)
        .min(1.0);
    let w = ((width as f64 * scale).round() as i64).max(1);
    let h = ((height as f64 * scale).round() as i64).max(1);
    (w, h)
}

fn max_chars(size: i64) -> usize {
    let usable = (PAGE_WIDTH - 2 * MARGIN) as f64;
    ((usable / (size.max(1) as f64 * AVG_GLYPH_WIDTH)).floor() as usize).max(10)
}

/// Greedy word wrap; words longer than a line are split.
pub(crate) fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > max_chars && current_len > 0 {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// Encode text for a WinAnsiEncoding font; anything else becomes `?`.
pub(crate) fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\t' => b' ',
            ' '..='~' => c as u8,
            '\u{a0}'..='\u{ff}' => c as u32 as u8,
            '\u{20ac}' => 0x80,
            '\u{201a}' => 0x82,
            '\u{201e}' => 0x84,
            '\u{2026}' => 0x85,
            '\u{2020}' => 0x86,
            '\u{2021}' => 0x87,
            '\u{2030}' => 0x89,
            '\u{0160}' => 0x8a,
            '\u{2039}' => 0x8b,
            '\u{0152}' => 0x8c,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201c}' => 0x93,
            '\u{201d}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{2122}' => 0x99,
            '\u{0161}' => 0x9a,
            '\u{203a}' => 0x9b,
            '\u{0153}' => 0x9c,
            '\u{0178}' => 0x9f,
            _ => b'?',
        })
        .collect()
}

/// Assembles a fresh page tree.
struct PageBuilder {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl PageBuilder {
    fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    fn add_object<T: Into<Object>>(&mut self, object: T) -> ObjectId {
        self.doc.add_object(object)
    }

    fn font_resources(&mut self) -> ObjectId {
        let regular = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Times-Roman",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Times-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        self.doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular,
                "F2" => bold,
            },
        })
    }

    fn add_page(&mut self, content: Content, resources: Object) -> Result<(), PdfError> {
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), content.encode()?));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => resources,
            "MediaBox" => media_box(),
        });
        self.kids.push(Object::Reference(page_id));
        Ok(())
    }

    fn finish(mut self) -> Document {
        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids,
            "Count" => count,
            "MediaBox" => media_box(),
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();
        self.doc
    }
}

pub(crate) fn media_box() -> Vec<Object> {
    vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(PAGE_WIDTH),
        Object::Integer(PAGE_HEIGHT),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_text_respects_width() {
        let lines = wrap_text("the quick brown fox jumps over the lazy dog", 10);
        assert!(lines.iter().all(|l| l.chars().count() <= 10));
        assert_eq!(lines.join(" "), "the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn test_wrap_text_splits_long_words() {
        let lines = wrap_text(&"x".repeat(25), 10);
        assert_eq!(lines, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
        assert!(wrap_text("   ", 10).is_empty());
    }

    #[test]
    fn test_encode_win_ansi() {
        assert_eq!(encode_win_ansi("Caf\u{e9}"), b"Caf\xe9".to_vec());
        assert_eq!(encode_win_ansi("\u{201c}hi\u{201d}"), vec![0x93, b'h', b'i', 0x94]);
        assert_eq!(encode_win_ansi("\u{4e2d}"), b"?".to_vec());
    }

    #[test]
    fn test_long_text_breaks_pages() {
        let mut doc = TextDocument::new();
        for i in 0..200 {
            doc.paragraph(&format!("line {i}"));
        }
        let pages = doc.layout();
        // 648pt of usable height at 10pt leading is 64 lines per page.
        assert_eq!(pages.len(), 4);
        assert_eq!(pages[0].len(), 64);
        assert!(pages.iter().flatten().all(|l| l.y >= MARGIN));
    }

    #[test]
    fn test_empty_document_has_one_page() {
        let doc = TextDocument::new().to_document().unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_text_document_is_extractable() {
        let mut text = TextDocument::new();
        text.heading("ATTACHMENTS", 10).space(14).lines("From: a@b.c\n\nhello world");
        let doc = text.to_document().unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        let extracted = doc.extract_text(&[1]).unwrap();
        assert!(extracted.contains("hello world"));
        assert!(extracted.contains("ATTACHMENTS"));
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(100, 50, 468, 648), (100, 50));
        assert_eq!(fit_within(936, 100, 468, 648), (468, 50));
        assert_eq!(fit_within(100, 1296, 468, 648), (50, 648));
    }

    #[test]
    fn test_image_document() {
        let img = image::RgbImage::from_pixel(20, 10, image::Rgb([200, 10, 10]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let doc = image_document(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);

        assert!(image_document(b"not an image").is_err());
    }
}
