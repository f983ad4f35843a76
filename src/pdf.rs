//! Single-page certificate PDF writer.
//!
//! Emits a minimal PDF 1.4 document using the built-in Helvetica fonts, so no
//! font files are embedded. Text is encoded as WinAnsi; characters outside
//! Latin-1 are replaced with `?`.

use crate::email::format_date;
use crate::models::Certificate;

const PAGE_WIDTH: f32 = 842.0;
const PAGE_HEIGHT: f32 = 595.0;

/// Escape a string for a PDF literal, mapping to WinAnsi bytes.
fn pdf_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('(');
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            '\u{a0}'..='\u{ff}' => out.push_str(&format!("\\{:03o}", c as u32)),
            _ => out.push('?'),
        }
    }
    out.push(')');
    out
}

/// Rough Helvetica advance width, good enough to center a line.
fn approx_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * 0.52
}

struct Line<'a> {
    text: &'a str,
    size: f32,
    bold: bool,
    y: f32,
}

fn content_stream(lines: &[Line<'_>]) -> String {
    let mut s = String::new();
    // Border
    s.push_str("0.2 0.3 0.5 RG 4 w 30 30 782 535 re S\n");
    s.push_str("0.6 0.7 0.85 RG 1 w 42 42 758 511 re S\n");
    s.push_str("0 0 0 rg\n");
    for line in lines {
        let x = ((PAGE_WIDTH - approx_width(line.text, line.size)) / 2.0).max(50.0);
        s.push_str(&format!(
            "BT /{} {} Tf {:.1} {:.1} Td {} Tj ET\n",
            if line.bold { "F2" } else { "F1" },
            line.size,
            x,
            line.y,
            pdf_string(line.text)
        ));
    }
    s
}

/// Assemble objects into a PDF file with a correct cross-reference table.
fn assemble(objects: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");

    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R /Info {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            objects.len(),
            xref_at
        )
        .as_bytes(),
    );
    out
}

/// Render a certificate as a landscape A4 PDF.
pub fn render_certificate(certificate: &Certificate, verify_url: &str) -> Vec<u8> {
    let issued = format!("Issued {}", format_date(certificate.issued_at));
    let code = format!("Verification code: {}", certificate.verification_code);
    let verify = format!("Verify at {}", verify_url);

    let lines = [
        Line { text: "Certificate of Completion", size: 34.0, bold: true, y: 455.0 },
        Line { text: "This certifies that", size: 14.0, bold: false, y: 395.0 },
        Line { text: &certificate.student_name, size: 26.0, bold: true, y: 350.0 },
        Line { text: "has successfully completed", size: 14.0, bold: false, y: 305.0 },
        Line { text: &certificate.course_title, size: 22.0, bold: true, y: 262.0 },
        Line { text: &issued, size: 12.0, bold: false, y: 190.0 },
        Line { text: &code, size: 12.0, bold: false, y: 120.0 },
        Line { text: &verify, size: 10.0, bold: false, y: 100.0 },
    ];
    let stream = content_stream(&lines);

    let objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] /Resources << /Font << /F1 4 0 R /F2 5 0 R >> >> /Contents 6 0 R >>",
            PAGE_WIDTH, PAGE_HEIGHT
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>".to_string(),
        format!("<< /Length {} >>\nstream\n{}endstream", stream.len(), stream),
        format!(
            "<< /Title {} /Producer (CourseHub) >>",
            pdf_string(&format!("Certificate {}", certificate.verification_code))
        ),
    ];
    assemble(&objects)
}
