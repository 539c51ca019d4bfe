use std::sync::LazyLock;

use regex::{Captures, Regex};

static BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<body[^>]*>([\s\S]*?)</body>").expect("valid regex"));
static DIV_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<div\b([^>]*)>").expect("valid regex"));
static DIV_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</div>").expect("valid regex"));
static PARAGRAPH_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<p\b").expect("valid regex"));
static BREAK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:<br\s*/?>\s*){2,}").expect("valid regex"));
static BLANK_PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<p\b[^>]*>\s*</p>").expect("valid regex"));
static PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<p\b[^>]*>([\s\S]*?)</p>").expect("valid regex"));
static SINGLE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));

const FONT_STACK: &str = "Segoe UI, Arial, sans-serif";

fn spacer_row(spacing: u32) -> String {
    format!(
        r#"<table role="presentation" border="0" cellspacing="0" cellpadding="0" width="100%"><tr><td height="{spacing}" style="font-size:0; line-height:0;">&nbsp;</td></tr></table>"#
    )
}

/// Rewrites editor HTML into the table-based layout desktop mail clients render
/// without collapsing or doubling paragraph gaps.
pub fn mail_safe_html(editor_html: &str, spacing: u32) -> String {
    let inner = BODY
        .captures(editor_html)
        .and_then(|c| c.get(1))
        .map_or(editor_html, |m| m.as_str());

    let inner = DIV_OPEN.replace_all(inner, "<p${1}>");
    let inner = DIV_CLOSE.replace_all(&inner, "</p>");
    let had_paragraphs = PARAGRAPH_OPEN.is_match(&inner);

    let break_spacer = format!(
        r#"<table role="presentation" border="0" cellspacing="0" cellpadding="0" width="100%"><tr><td style="padding:0 0 {spacing}px 0;"><span style="font-size:1px; line-height:1px;">&nbsp;</span></td></tr></table>"#
    );
    let inner = BREAK_RUN.replace_all(&inner, break_spacer.as_str());
    let inner = BLANK_PARAGRAPH.replace_all(&inner, spacer_row(spacing).as_str());
    let inner = PARAGRAPH.replace_all(&inner, |caps: &Captures| {
        format!(
            r#"<table role="presentation" border="0" cellspacing="0" cellpadding="0" width="100%"><tr><td style="line-height:1.35; mso-line-height-rule:exactly; font-family: {FONT_STACK};">{}</td></tr><tr><td height="{spacing}" style="font-size:0; line-height:0;">&nbsp;</td></tr></table>"#,
            &caps[1]
        )
    });

    let inner = if !inner.contains(r#"role="presentation""#) && !had_paragraphs {
        let replacement = format!("<br/>{}", spacer_row(spacing));
        SINGLE_BREAK.replace_all(&inner, replacement.as_str()).into_owned()
    } else {
        inner.into_owned()
    };

    format!(
        r#"<!DOCTYPE html>
<html xmlns:v="urn:schemas-microsoft-com:vml" xmlns:o="urn:schemas-microsoft-com:office:office" xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta http-equiv="x-ua-compatible" content="IE=edge">
  <meta name="format-detection" content="telephone=no, date=no, address=no, email=no">
  <meta name="x-apple-disable-message-reformatting">
  <!--[if mso]>
  <xml>
   <o:OfficeDocumentSettings>
    <o:AllowPNG/>
    <o:PixelsPerInch>96</o:PixelsPerInch>
   </o:OfficeDocumentSettings>
  </xml>
  <style type="text/css">
    body, table, td, div, p, a {{ font-family: {FONT_STACK} !important; }}
    p {{ margin:0 !important; }}
  </style>
  <![endif]-->
  <style>
    body, table, td, div, p, a {{ font-family: {FONT_STACK}; -webkit-text-size-adjust: 100%; -ms-text-size-adjust: 100%; }}
    p {{ margin:0 !important; }}
    .content {{ font-size: 11pt; line-height: 1.35; color:#2b2b2b; }}
    img {{ border:0; outline:0; text-decoration:none; -ms-interpolation-mode:bicubic; }}
  </style>
</head>
<body style="Margin:0; padding:0; background:#ffffff;">
  <table role="presentation" cellpadding="0" cellspacing="0" border="0" width="100%">
    <tr>
      <td align="left" style="padding:0;">
        <div class="content" style="font-family: {FONT_STACK}; font-size:11pt; line-height:1.35; mso-line-height-rule:exactly;">
          {inner}
        </div>
      </td>
    </tr>
  </table>
</body>
</html>"#
    )
}
