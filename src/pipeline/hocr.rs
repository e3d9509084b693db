//! Positional-markup recognition.
//!
//! Two wrinkles over plain OCR:
//!
//! * **Naming.** Tesseract up to 3.02.02 writes `<base>.html`; later releases
//!   write `<base>.hocr`. The latter is moved to `<base>.html` so the stored
//!   datastream gets a `text/html` MIME type.
//! * **Validation.** The file must parse as XML. Its `<!DOCTYPE …>` is then
//!   removed, since some HOCR consumers refuse documents that declare one.

use crate::error::StageError;
use crate::pipeline::tesseract::Tesseract;
use crate::pipeline::{append_extension, output_missing, tool_failed, DerivativeResult, PageImage, Toolchain};
use crate::process::{CommandSpec, ProcessOutput};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Last tesseract release that writes HOCR straight to `<base>.html`.
pub const HOCR_NAMING_BASELINE: &str = "3.02.02";

static RE_DOCTYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<!DOCTYPE\s[^\[>]*(\[.*?\])?\s*>\s*").unwrap());

/// Remove the document type declaration from the prolog of `markup`.
///
/// Only text before the root element is touched; a `<!DOCTYPE` inside a
/// comment or CDATA section of the body stays as it is.
pub fn strip_doctype(markup: &str) -> String {
    let root = parse(markup)
        .map(|doc| doc.root_element().range().start)
        .unwrap_or(markup.len());
    let (prolog, body) = markup.split_at(root);
    let mut out = RE_DOCTYPE.replace_all(prolog, "").into_owned();
    out.push_str(body);
    out
}

/// Check that `markup` is well-formed XML.
pub fn validate_markup(markup: &str) -> Result<(), String> {
    parse(markup).map(|_| ()).map_err(|e| e.to_string())
}

fn parse(markup: &str) -> Result<roxmltree::Document<'_>, roxmltree::Error> {
    let opts = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    roxmltree::Document::parse_with_options(markup, opts)
}

/// Run `tesseract <image> <base> -l <language> hocr` and return the
/// validated, DOCTYPE-free `<base>.html`.
pub async fn run_hocr(
    tools: &Toolchain,
    image: &PageImage,
    base: &Path,
    language: &str,
) -> DerivativeResult {
    let renames = tools.tesseract.writes_hocr_extension().await?;

    let args = Tesseract::recognise_args(&image.path, base, language, true);
    let (command, output) = tools.exec(tools.tesseract.path(), args).await?;
    if !output.success() {
        return Err(tool_failed(&command, output));
    }

    let html = append_extension(base, "html");
    if renames {
        let written = append_extension(base, "hocr");
        if !written.exists() {
            return Err(output_missing(&command, output, &written));
        }
        if let Err(e) = tokio::fs::rename(&written, &html).await {
            error!("could not move {} to {}: {}", written.display(), html.display(), e);
            return Err(StageError::OutputInvalid {
                path: written,
                detail: format!("could not move to {}: {}", html.display(), e),
            });
        }
        debug!("moved {} → {}", written.display(), html.display());
    } else if !html.exists() {
        return Err(output_missing(&command, output, &html));
    }

    let markup = match tokio::fs::read_to_string(&html).await {
        Ok(m) => m,
        Err(e) => return Err(invalid(&command, &output, html, e.to_string())),
    };
    if let Err(detail) = validate_markup(&markup) {
        return Err(invalid(&command, &output, html, detail));
    }

    let stripped = strip_doctype(&markup);
    if stripped.len() != markup.len() {
        if let Err(e) = tokio::fs::write(&html, stripped.as_bytes()).await {
            return Err(invalid(&command, &output, html, format!("rewriting without DOCTYPE: {e}")));
        }
    }
    debug!("HOCR written to {}", html.display());
    Ok(html)
}

fn invalid(command: &CommandSpec, output: &ProcessOutput, path: PathBuf, detail: String) -> StageError {
    error!(
        "{} produced invalid HOCR in {}: {}. Tesseract {} or later is recommended.\n  exit code: {:?}\n  command: {}\n  output: {}",
        command.tool_name(),
        path.display(),
        detail,
        HOCR_NAMING_BASELINE,
        output.exit_code,
        command,
        output.output.trim_end()
    );
    StageError::OutputInvalid {
        path,
        detail: format!(
            "{detail} (HOCR generation requires Tesseract {HOCR_NAMING_BASELINE} or later)"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN"
    "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="en" lang="en">
 <head><title></title></head>
 <body><div class='ocr_page' id='page_1' title='bbox 0 0 100 100'></div></body>
</html>
"#;

    #[test]
    fn doctype_is_removed() {
        let out = strip_doctype(SAMPLE);
        assert!(!out.to_ascii_uppercase().contains("<!DOCTYPE"));
        assert!(out.starts_with("<?xml"));
        assert!(out.contains("ocr_page"));
        assert!(validate_markup(&out).is_ok());
    }

    #[test]
    fn internal_subset_is_removed() {
        let doc = "<!DOCTYPE html [ <!ENTITY x \"y\"> ]>\n<html/>";
        assert_eq!(strip_doctype(doc), "<html/>");
    }

    #[test]
    fn doctype_text_in_body_is_kept() {
        let doc = "<!DOCTYPE html>\n<html><body><!-- <!DOCTYPE x> --><p><![CDATA[<!DOCTYPE y>]]></p></body></html>";
        let out = strip_doctype(doc);
        assert_eq!(
            out,
            "<html><body><!-- <!DOCTYPE x> --><p><![CDATA[<!DOCTYPE y>]]></p></body></html>"
        );
        assert!(validate_markup(&out).is_ok());
    }

    #[test]
    fn documents_without_doctype_are_untouched() {
        let doc = "<html><body/></html>";
        assert_eq!(strip_doctype(doc), doc);
    }

    #[test]
    fn validation() {
        assert!(validate_markup(SAMPLE).is_ok());
        assert!(validate_markup("<html><body></html>").is_err());
        assert!(validate_markup("").is_err());
    }
}
