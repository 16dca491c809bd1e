//! Export file encoders
//!
//! Encoders are fed rows batch by batch and hand back the bytes to append,
//! so a whole export never has to sit in memory.

use std::collections::BTreeMap;

use crate::domain::{ExportFormat, Transaction};

use super::ExportError;

/// Column headers shared by the tabular formats
pub const COLUMNS: [&str; 19] = [
    "transaction_id",
    "external_txn_id",
    "external_ref",
    "terminal_id",
    "txn_time",
    "amount",
    "currency",
    "status",
    "settlement_status",
    "payment_mode",
    "card_brand",
    "card_type",
    "card_masked",
    "customer_name",
    "auth_code",
    "rrn",
    "issuing_bank",
    "acquiring_bank",
    "device_serial",
];

const AMOUNT_COLUMN: usize = 5;

fn row_values(txn: &Transaction) -> [String; 19] {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    [
        txn.id.to_string(),
        txn.external_txn_id.clone(),
        opt(&txn.external_ref),
        txn.terminal_id.clone(),
        txn.txn_time.to_rfc3339(),
        txn.amount.to_string(),
        txn.currency.clone(),
        txn.status.to_string(),
        opt(&txn.settlement_status),
        opt(&txn.payment_mode),
        opt(&txn.card_brand),
        opt(&txn.card_type),
        opt(&txn.card_masked),
        opt(&txn.customer_name),
        opt(&txn.auth_code),
        opt(&txn.rrn),
        opt(&txn.issuing_bank),
        opt(&txn.acquiring_bank),
        opt(&txn.device_serial),
    ]
}

pub trait ExportEncoder: Send {
    /// Bytes that open the file
    fn begin(&mut self) -> Result<Vec<u8>, ExportError>;

    fn encode_batch(&mut self, rows: &[Transaction]) -> Result<Vec<u8>, ExportError>;

    /// Bytes that close the file
    fn finish(&mut self) -> Result<Vec<u8>, ExportError>;
}

/// Encoder producing the file that gets written before any packaging.
/// A zip export is a CSV that is compressed afterwards.
pub fn encoder_for(format: ExportFormat) -> Box<dyn ExportEncoder> {
    match format {
        ExportFormat::Csv | ExportFormat::Zip => Box::new(CsvEncoder::default()),
        ExportFormat::Excel => Box::new(SpreadsheetMlEncoder::default()),
        ExportFormat::Pdf => Box::new(PdfEncoder::default()),
    }
}

// ============================================================================
// CSV
// ============================================================================

/// RFC 4180 with a header row
#[derive(Debug, Default)]
pub struct CsvEncoder;

impl CsvEncoder {
    fn write<I, T>(records: I) -> Result<Vec<u8>, ExportError>
    where
        I: IntoIterator<Item = T>,
        T: IntoIterator,
        T::Item: AsRef<[u8]>,
    {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(Vec::new());
        for record in records {
            writer.write_record(record)?;
        }
        writer
            .into_inner()
            .map_err(|e| ExportError::Encode(e.to_string()))
    }
}

impl ExportEncoder for CsvEncoder {
    fn begin(&mut self) -> Result<Vec<u8>, ExportError> {
        Self::write([COLUMNS])
    }

    fn encode_batch(&mut self, rows: &[Transaction]) -> Result<Vec<u8>, ExportError> {
        Self::write(rows.iter().map(row_values))
    }

    fn finish(&mut self) -> Result<Vec<u8>, ExportError> {
        Ok(Vec::new())
    }
}

// ============================================================================
// SpreadsheetML 2003 (.xls)
// ============================================================================

/// Rows per worksheet, header included (Excel 2003 limit)
const MAX_SHEET_ROWS: usize = 65_536;

#[derive(Debug, Default)]
pub struct SpreadsheetMlEncoder {
    sheet: usize,
    rows_in_sheet: usize,
}

impl SpreadsheetMlEncoder {
    fn open_sheet(&mut self, out: &mut String) {
        self.sheet += 1;
        self.rows_in_sheet = 1;
        let name = if self.sheet == 1 {
            "Transactions".to_string()
        } else {
            format!("Transactions {}", self.sheet)
        };
        out.push_str(&format!("<Worksheet ss:Name=\"{}\">\n<Table>\n", name));
        out.push_str("<Row ss:StyleID=\"header\">");
        for column in COLUMNS {
            push_cell(out, "String", column);
        }
        out.push_str("</Row>\n");
    }

    fn close_sheet(out: &mut String) {
        out.push_str("</Table>\n</Worksheet>\n");
    }
}

fn push_cell(out: &mut String, kind: &str, value: &str) {
    out.push_str("<Cell><Data ss:Type=\"");
    out.push_str(kind);
    out.push_str("\">");
    out.push_str(&xml_escape(value));
    out.push_str("</Data></Cell>");
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Not representable in XML 1.0
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}

impl ExportEncoder for SpreadsheetMlEncoder {
    fn begin(&mut self) -> Result<Vec<u8>, ExportError> {
        let mut out = String::from(concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<?mso-application progid=\"Excel.Sheet\"?>\n",
            "<Workbook xmlns=\"urn:schemas-microsoft-com:office:spreadsheet\" ",
            "xmlns:ss=\"urn:schemas-microsoft-com:office:spreadsheet\">\n",
            "<Styles><Style ss:ID=\"header\"><Font ss:Bold=\"1\"/></Style></Styles>\n",
        ));
        self.open_sheet(&mut out);
        Ok(out.into_bytes())
    }

    fn encode_batch(&mut self, rows: &[Transaction]) -> Result<Vec<u8>, ExportError> {
        let mut out = String::new();
        for txn in rows {
            if self.rows_in_sheet >= MAX_SHEET_ROWS {
                Self::close_sheet(&mut out);
                self.open_sheet(&mut out);
            }
            out.push_str("<Row>");
            for (i, value) in row_values(txn).iter().enumerate() {
                let kind = if i == AMOUNT_COLUMN { "Number" } else { "String" };
                push_cell(&mut out, kind, value);
            }
            out.push_str("</Row>\n");
            self.rows_in_sheet += 1;
        }
        Ok(out.into_bytes())
    }

    fn finish(&mut self) -> Result<Vec<u8>, ExportError> {
        let mut out = String::new();
        Self::close_sheet(&mut out);
        out.push_str("</Workbook>\n");
        Ok(out.into_bytes())
    }
}

// ============================================================================
// PDF
// ============================================================================

const PAGE_WIDTH: u32 = 842;
const PAGE_HEIGHT: u32 = 595;
const MARGIN: u32 = 36;
const FONT_SIZE: u32 = 7;
const LINE_HEIGHT: u32 = 10;
const ROWS_PER_PAGE: usize = 48;

const CATALOG_ID: u32 = 1;
const PAGES_ID: u32 = 2;
const FONT_ID: u32 = 3;

/// (header, width in characters) for the printed columns
const PDF_COLUMNS: [(&str, usize); 8] = [
    ("Txn Time (UTC)", 20),
    ("Txn ID", 22),
    ("Terminal", 12),
    ("Amount", 13),
    ("Status", 11),
    ("Settlement", 11),
    ("Mode", 8),
    ("Card", 22),
];

/// Landscape A4 text report in Courier, built object by object.
///
/// Every emitted byte passes through `emit` so the cross-reference table
/// can record exact object offsets.
#[derive(Debug, Default)]
pub struct PdfEncoder {
    written: usize,
    offsets: BTreeMap<u32, usize>,
    next_id: u32,
    page_ids: Vec<u32>,
    pending_lines: Vec<String>,
    total_rows: usize,
}

impl PdfEncoder {
    fn emit(&mut self, out: &mut Vec<u8>, bytes: &[u8]) {
        self.written += bytes.len();
        out.extend_from_slice(bytes);
    }

    fn emit_object(&mut self, out: &mut Vec<u8>, id: u32, body: &str) {
        self.offsets.insert(id, self.written);
        self.emit(out, format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn format_row(txn: &Transaction) -> String {
        let values = [
            txn.txn_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            txn.external_txn_id.clone(),
            txn.terminal_id.clone(),
            format!("{} {}", txn.amount, txn.currency),
            txn.status.to_string(),
            txn.settlement_status.clone().unwrap_or_default(),
            txn.payment_mode.clone().unwrap_or_default(),
            txn.card_masked.clone().unwrap_or_default(),
        ];
        Self::format_line(values.iter().map(String::as_str))
    }

    fn format_line<'a>(values: impl Iterator<Item = &'a str>) -> String {
        let mut line = String::new();
        for ((_, width), value) in PDF_COLUMNS.iter().zip(values) {
            let cell: String = value.chars().take(width - 1).collect();
            line.push_str(&format!("{:<width$}", cell, width = *width));
        }
        line.trim_end().to_string()
    }

    fn flush_page(&mut self, out: &mut Vec<u8>) {
        let page_no = self.page_ids.len() + 1;
        let mut text = vec![
            format!("POS Transaction Report - page {}", page_no),
            String::new(),
            Self::format_line(PDF_COLUMNS.iter().map(|(h, _)| *h)),
        ];
        if self.pending_lines.is_empty() && self.total_rows == 0 {
            text.push("No transactions matched the requested filters.".to_string());
        }
        text.append(&mut self.pending_lines);

        let mut content = format!(
            "BT\n/F1 {} Tf\n{} TL\n{} {} Td\n",
            FONT_SIZE,
            LINE_HEIGHT,
            MARGIN,
            PAGE_HEIGHT - MARGIN
        );
        for line in &text {
            content.push_str(&format!("({}) Tj T*\n", pdf_escape(line)));
        }
        content.push_str("ET");

        let content_id = self.allocate();
        let page_id = self.allocate();
        self.emit_object(
            out,
            content_id,
            &format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content),
        );
        self.emit_object(
            out,
            page_id,
            &format!(
                "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << /F1 {} 0 R >> >> /Contents {} 0 R >>",
                PAGES_ID, PAGE_WIDTH, PAGE_HEIGHT, FONT_ID, content_id
            ),
        );
        self.page_ids.push(page_id);
    }
}

/// Escape a text string literal; anything outside printable ASCII becomes `?`
fn pdf_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

impl ExportEncoder for PdfEncoder {
    fn begin(&mut self) -> Result<Vec<u8>, ExportError> {
        let mut out = Vec::new();
        self.next_id = FONT_ID + 1;
        self.emit(&mut out, b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
        self.emit_object(
            &mut out,
            CATALOG_ID,
            &format!("<< /Type /Catalog /Pages {} 0 R >>", PAGES_ID),
        );
        self.emit_object(
            &mut out,
            FONT_ID,
            "<< /Type /Font /Subtype /Type1 /BaseFont /Courier /Encoding /WinAnsiEncoding >>",
        );
        Ok(out)
    }

    fn encode_batch(&mut self, rows: &[Transaction]) -> Result<Vec<u8>, ExportError> {
        let mut out = Vec::new();
        for txn in rows {
            self.pending_lines.push(Self::format_row(txn));
            self.total_rows += 1;
            if self.pending_lines.len() == ROWS_PER_PAGE {
                self.flush_page(&mut out);
            }
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<u8>, ExportError> {
        let mut out = Vec::new();
        if !self.pending_lines.is_empty() || self.page_ids.is_empty() {
            self.flush_page(&mut out);
        }

        let kids: Vec<String> = self.page_ids.iter().map(|id| format!("{} 0 R", id)).collect();
        self.emit_object(
            &mut out,
            PAGES_ID,
            &format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                kids.join(" "),
                self.page_ids.len()
            ),
        );

        let xref_offset = self.written;
        let size = self.next_id;
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", size);
        for id in 1..size {
            let offset = self.offsets.get(&id).copied().unwrap_or(0);
            xref.push_str(&format!("{:010} 00000 n \n", offset));
        }
        xref.push_str(&format!(
            "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            size, CATALOG_ID, xref_offset
        ));
        self.emit(&mut out, xref.as_bytes());
        Ok(out)
    }
}
