//! Plain-text recognition.

use crate::pipeline::tesseract::Tesseract;
use crate::pipeline::{append_extension, output_missing, tool_failed, DerivativeResult, PageImage, Toolchain};
use std::path::Path;
use tracing::debug;

/// Run `tesseract <image> <base> -l <language>` and return `<base>.txt`.
///
/// Tesseract appends `.txt` to `base` itself; the file is checked for
/// existence but its text is not inspected.
pub async fn run_ocr(
    tools: &Toolchain,
    image: &PageImage,
    base: &Path,
    language: &str,
) -> DerivativeResult {
    let args = Tesseract::recognise_args(&image.path, base, language, false);
    let (command, output) = tools.exec(tools.tesseract.path(), args).await?;
    if !output.success() {
        return Err(tool_failed(&command, output));
    }

    let text = append_extension(base, "txt");
    if !text.exists() {
        return Err(output_missing(&command, output, &text));
    }
    debug!("OCR text written to {}", text.display());
    Ok(text)
}
