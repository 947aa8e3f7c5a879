//! Invoice document rendering
//!
//! Layout is a pure function of the order snapshot: the same order always
//! produces the same pages, so an invoice can be regenerated at any time.
//! `printpdf` serializes the laid-out pages.

pub mod pdf;

use crate::config::InvoiceConfig;
use crate::database::models::{format_money, OrderWithItems};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use pdf::{Font, Page, Rgb, LETTER_HEIGHT, LETTER_WIDTH};

pub use pdf::DocumentError;

const MARGIN: f32 = 50.0;
const ROW_HEIGHT: f32 = 20.0;
/// Rows stop here; below is reserved for the footer
const PAGE_BOTTOM: f32 = 100.0;
const CONTINUATION_TOP: f32 = LETTER_HEIGHT - 50.0;
const BRAND: u32 = 0xd63384;
const TOTAL_BOX: u32 = 0xfdf2f8;

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceLine {
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

impl InvoiceLine {
    pub fn subtotal(&self) -> BigDecimal {
        &self.unit_price * BigDecimal::from(self.quantity)
    }
}

/// Everything printed on an invoice
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceDocument {
    pub invoice_number: String,
    pub total_amount: BigDecimal,
    pub customer_email: String,
    pub issued_on: NaiveDate,
    pub lines: Vec<InvoiceLine>,
}

impl InvoiceDocument {
    /// Snapshot of a stored order, using the frozen purchase prices
    pub fn from_order(order: &OrderWithItems) -> Self {
        Self {
            invoice_number: order.order.invoice_number.clone(),
            total_amount: order.order.total_amount.clone(),
            customer_email: order.order.customer().email,
            issued_on: order.order.created_at.date_naive(),
            lines: order
                .items
                .iter()
                .map(|item| InvoiceLine {
                    name: item.product_name.clone(),
                    quantity: item.quantity,
                    unit_price: item.price_at_purchase.clone(),
                })
                .collect(),
        }
    }
}

/// Deterministic artifact name for an invoice number
pub fn invoice_file_name(invoice_number: &str) -> String {
    let safe: String = invoice_number
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("invoice_{}.pdf", safe)
}

/// Amount with thousands separators and two decimals, e.g. `3,000.00`
pub fn format_grouped(amount: &BigDecimal) -> String {
    let plain = format_money(amount);
    let (sign, unsigned) = match plain.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", plain.as_str()),
    };
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{}{}.{}", sign, grouped, fraction)
}

/// Lays out invoices as Letter-sized PDF pages
#[derive(Debug, Clone)]
pub struct InvoiceRenderer {
    company_name: String,
    support_email: Option<String>,
    currency: String,
}

impl InvoiceRenderer {
    pub fn new(config: &InvoiceConfig) -> Self {
        Self {
            company_name: config.company_name.clone(),
            support_email: config.support_email.clone(),
            currency: config.currency.clone(),
        }
    }

    pub fn render(&self, document: &InvoiceDocument) -> Result<Vec<u8>, DocumentError> {
        let pages = self.layout(document);
        pdf::write_document(
            &format!("Invoice {}", document.invoice_number),
            &pages,
            LETTER_WIDTH,
            LETTER_HEIGHT,
        )
    }

    fn layout(&self, document: &InvoiceDocument) -> Vec<Page> {
        let brand = Rgb::from_hex(BRAND);
        let width = LETTER_WIDTH;
        let height = LETTER_HEIGHT;
        let name_column_width = width - 220.0 - 60.0;

        let mut pages = Vec::new();
        let mut page = Page::new();

        page.fill_rect(brand, 0.0, height - 80.0, width, 80.0);
        page.text(
            Font::HelveticaBold,
            24.0,
            Rgb::WHITE,
            MARGIN,
            height - 50.0,
            &self.company_name.to_uppercase(),
        );
        page.text_right(
            Font::Helvetica,
            11.0,
            Rgb::WHITE,
            width - MARGIN,
            height - 50.0,
            &format!("Invoice {}", document.invoice_number),
        );

        page.text(Font::HelveticaBold, 12.0, Rgb::BLACK, MARGIN, height - 120.0, "BILL TO:");
        page.text(
            Font::Helvetica,
            11.0,
            Rgb::BLACK,
            MARGIN,
            height - 135.0,
            &document.customer_email,
        );
        page.text_right(
            Font::Helvetica,
            11.0,
            Rgb::BLACK,
            width - MARGIN,
            height - 120.0,
            &document.issued_on.format("%Y-%m-%d").to_string(),
        );

        page.line(brand, MARGIN, height - 160.0, width - MARGIN, height - 160.0);
        page.text(Font::HelveticaBold, 11.0, Rgb::BLACK, 60.0, height - 180.0, "Item Description");
        page.text_centered(Font::HelveticaBold, 11.0, Rgb::BLACK, width - 180.0, height - 180.0, "Qty");
        page.text_right(
            Font::HelveticaBold,
            11.0,
            Rgb::BLACK,
            width - 60.0,
            height - 180.0,
            &format!("Subtotal ({})", self.currency),
        );
        page.line(brand, MARGIN, height - 190.0, width - MARGIN, height - 190.0);

        let mut y = height - 215.0;
        for line in &document.lines {
            if y < PAGE_BOTTOM {
                pages.push(std::mem::take(&mut page));
                y = CONTINUATION_TOP;
            }

            let name = fit_to_width(&line.name, Font::Helvetica, 11.0, name_column_width);
            page.text(Font::Helvetica, 11.0, Rgb::BLACK, 60.0, y, &name);
            page.text_centered(
                Font::Helvetica,
                11.0,
                Rgb::BLACK,
                width - 180.0,
                y,
                &line.quantity.to_string(),
            );
            page.text_right(
                Font::Helvetica,
                11.0,
                Rgb::BLACK,
                width - 60.0,
                y,
                &format_grouped(&line.subtotal()),
            );
            y -= ROW_HEIGHT;
        }

        let mut total_y = y - 40.0;
        if total_y - 15.0 < PAGE_BOTTOM - 40.0 {
            pages.push(std::mem::take(&mut page));
            total_y = CONTINUATION_TOP - 40.0;
        }

        page.fill_rect(Rgb::from_hex(TOTAL_BOX), width - 250.0, total_y - 15.0, 200.0, 40.0);
        page.text(Font::HelveticaBold, 12.0, brand, width - 240.0, total_y, "GRAND TOTAL");
        page.text_right(
            Font::HelveticaBold,
            12.0,
            brand,
            width - 60.0,
            total_y,
            &format!("{} {}", self.currency, format_grouped(&document.total_amount)),
        );

        self.footer(&mut page, brand);
        pages.push(page);
        pages
    }

    fn footer(&self, page: &mut Page, brand: Rgb) {
        let footer_y = 30.0;
        page.text(
            Font::Helvetica,
            9.0,
            brand,
            MARGIN,
            footer_y + 10.0,
            &format!("Thank you for shopping with {}!", self.company_name),
        );
        if let Some(email) = &self.support_email {
            page.text(
                Font::Helvetica,
                9.0,
                brand,
                MARGIN,
                footer_y - 5.0,
                &format!("If you have any questions, please contact {}", email),
            );
        }
    }
}

/// Truncate with an ellipsis so the text fits the column
fn fit_to_width(text: &str, font: Font, size: f32, max_width: f32) -> String {
    if font.text_width(text, size) <= max_width {
        return text.to_string();
    }

    let mut fitted = String::new();
    for c in text.chars() {
        let candidate = format!("{}{}...", fitted, c);
        if font.text_width(&candidate, size) > max_width {
            break;
        }
        fitted.push(c);
    }
    format!("{}...", fitted.trim_end())
}
