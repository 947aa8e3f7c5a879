//! Page drawing model for invoices and its serialization through `printpdf`.
//!
//! Layout code records drawing operations in PDF user space (points, origin
//! bottom-left); `write_document` turns the recorded pages into a PDF file.

use printpdf::{
    BuiltinFont, Color, CustomPdfConformance, IndirectFontRef, Line, Mm, PdfConformance,
    PdfDocument, PdfLayerReference, Point, Pt, Rect,
};
use thiserror::Error;

pub const LETTER_WIDTH: f32 = 612.0;
pub const LETTER_HEIGHT: f32 = 792.0;

#[derive(Debug, Error)]
#[error("invoice PDF generation failed: {0}")]
pub struct DocumentError(pub String);

impl From<DocumentError> for crate::error::AppError {
    fn from(err: DocumentError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Document {
            message: err.0,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb(pub f32, pub f32, pub f32);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0.0, 0.0, 0.0);
    pub const WHITE: Rgb = Rgb(1.0, 1.0, 1.0);

    pub fn from_hex(hex: u32) -> Self {
        Rgb(
            ((hex >> 16) & 0xff) as f32 / 255.0,
            ((hex >> 8) & 0xff) as f32 / 255.0,
            (hex & 0xff) as f32 / 255.0,
        )
    }

    fn to_color(self) -> Color {
        Color::Rgb(printpdf::Rgb::new(self.0, self.1, self.2, None))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Helvetica,
    HelveticaBold,
}

impl Font {
    /// Advance width of `text` in points at `size`
    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        let units: u32 = text.chars().map(|c| self.glyph_width(c)).sum();
        units as f32 * size / 1000.0
    }

    fn glyph_width(&self, c: char) -> u32 {
        let code = c as u32;
        let table = match self {
            Font::Helvetica => &HELVETICA_WIDTHS,
            Font::HelveticaBold => &HELVETICA_BOLD_WIDTHS,
        };
        if (32..=126).contains(&code) {
            table[(code - 32) as usize]
        } else {
            556
        }
    }
}

// Standard 14 font metrics for codes 32..=126, in 1/1000 em. The built-in faces
// carry no metrics of their own, so alignment is computed here.
const HELVETICA_WIDTHS: [u32; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // 32-47
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 48-63
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // 64-79
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 80-95
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // 96-111
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 112-126
];

const HELVETICA_BOLD_WIDTHS: [u32; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, // 32-47
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, // 48-63
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, // 64-79
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556, // 80-95
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611, // 96-111
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584, // 112-126
];

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    FillRect {
        color: Rgb,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    Line {
        color: Rgb,
        from: (f32, f32),
        to: (f32, f32),
    },
    Text {
        font: Font,
        size: f32,
        color: Rgb,
        x: f32,
        y: f32,
        text: String,
    },
}

/// Drawing operations for one page
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Page {
    ops: Vec<DrawOp>,
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    /// Every string drawn on the page, in drawing order
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn fill_rect(&mut self, color: Rgb, x: f32, y: f32, width: f32, height: f32) {
        self.ops.push(DrawOp::FillRect {
            color,
            x,
            y,
            width,
            height,
        });
    }

    pub fn line(&mut self, color: Rgb, x1: f32, y1: f32, x2: f32, y2: f32) {
        self.ops.push(DrawOp::Line {
            color,
            from: (x1, y1),
            to: (x2, y2),
        });
    }

    pub fn text(&mut self, font: Font, size: f32, color: Rgb, x: f32, y: f32, text: &str) {
        self.ops.push(DrawOp::Text {
            font,
            size,
            color,
            x,
            y,
            text: text.to_string(),
        });
    }

    /// Text whose right edge sits at `x`
    pub fn text_right(&mut self, font: Font, size: f32, color: Rgb, x: f32, y: f32, text: &str) {
        let width = font.text_width(text, size);
        self.text(font, size, color, x - width, y, text);
    }

    /// Text centred horizontally on `x`
    pub fn text_centered(&mut self, font: Font, size: f32, color: Rgb, x: f32, y: f32, text: &str) {
        let width = font.text_width(text, size);
        self.text(font, size, color, x - width / 2.0, y, text);
    }
}

fn mm(points: f32) -> Mm {
    Mm::from(Pt(points))
}

fn pdf_error(err: impl std::fmt::Display) -> DocumentError {
    DocumentError(err.to_string())
}

/// Serialize pages into a complete PDF file; an empty list still yields one blank page
pub fn write_document(
    title: &str,
    pages: &[Page],
    width: f32,
    height: f32,
) -> Result<Vec<u8>, DocumentError> {
    let (doc, first_page, first_layer) = PdfDocument::new(title, mm(width), mm(height), "Layer 1");
    // No ICC profile or XMP packet: invoices are screen documents, not print masters
    let doc = doc.with_conformance(PdfConformance::Custom(CustomPdfConformance {
        requires_icc_profile: false,
        requires_xmp_metadata: false,
        ..Default::default()
    }));

    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_error)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(pdf_error)?;

    for (index, page) in pages.iter().enumerate() {
        let layer = if index == 0 {
            doc.get_page(first_page).get_layer(first_layer)
        } else {
            let (page_index, layer_index) = doc.add_page(mm(width), mm(height), "Layer 1");
            doc.get_page(page_index).get_layer(layer_index)
        };
        draw(&layer, page, &regular, &bold);
    }

    doc.save_to_bytes().map_err(pdf_error)
}

fn draw(layer: &PdfLayerReference, page: &Page, regular: &IndirectFontRef, bold: &IndirectFontRef) {
    for op in page.ops() {
        match op {
            DrawOp::FillRect {
                color,
                x,
                y,
                width,
                height,
            } => {
                layer.set_fill_color(color.to_color());
                layer.add_rect(Rect::new(mm(*x), mm(*y), mm(x + width), mm(y + height)));
            }
            DrawOp::Line { color, from, to } => {
                layer.set_outline_color(color.to_color());
                layer.set_outline_thickness(1.0);
                layer.add_line(Line {
                    points: vec![
                        (Point::new(mm(from.0), mm(from.1)), false),
                        (Point::new(mm(to.0), mm(to.1)), false),
                    ],
                    is_closed: false,
                });
            }
            DrawOp::Text {
                font,
                size,
                color,
                x,
                y,
                text,
            } => {
                let face = match font {
                    Font::Helvetica => regular,
                    Font::HelveticaBold => bold,
                };
                layer.set_fill_color(color.to_color());
                layer.use_text(text.as_str(), *size, mm(*x), mm(*y), face);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_text_with_font_metrics() {
        // "Qty" in Helvetica-Bold: 778 + 333 + 556
        let width = Font::HelveticaBold.text_width("Qty", 10.0);
        assert!((width - 16.67).abs() < 0.01);
        assert!(Font::Helvetica.text_width("iii", 12.0) < Font::Helvetica.text_width("mmm", 12.0));
    }

    #[test]
    fn right_aligned_text_ends_at_anchor() {
        let mut page = Page::new();
        page.text_right(Font::Helvetica, 10.0, Rgb::BLACK, 500.0, 100.0, "3,000.00");

        match &page.ops()[0] {
            DrawOp::Text { x, text, .. } => {
                let end = x + Font::Helvetica.text_width(text, 10.0);
                assert!((end - 500.0).abs() < 0.001);
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn writes_a_pdf_file() {
        let mut page = Page::new();
        page.fill_rect(Rgb::from_hex(0xd63384), 0.0, 700.0, LETTER_WIDTH, 80.0);
        page.line(Rgb::BLACK, 50.0, 650.0, 550.0, 650.0);
        page.text(Font::Helvetica, 12.0, Rgb::BLACK, 50.0, 600.0, "Hello");

        let bytes = write_document("Invoice", &[page.clone(), page], LETTER_WIDTH, LETTER_HEIGHT)
            .unwrap();

        assert!(bytes.starts_with(b"%PDF-"));
        assert!(String::from_utf8_lossy(&bytes).trim_end().ends_with("%%EOF"));
    }

    #[test]
    fn empty_page_list_still_produces_a_document() {
        let bytes = write_document("Invoice", &[], LETTER_WIDTH, LETTER_HEIGHT).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }

    #[test]
    fn document_errors_surface_as_server_errors() {
        let err: crate::error::AppError = DocumentError("font table missing".to_string()).into();
        assert_eq!(err.status_code(), 500);
        assert!(!err.is_retryable());
    }

    #[test]
    fn hex_colors_are_normalized() {
        let color = Rgb::from_hex(0xff0000);
        assert_eq!(color, Rgb(1.0, 0.0, 0.0));
    }
}
