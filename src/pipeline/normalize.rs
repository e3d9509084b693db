//! Image normalisation: make the working image acceptable to tesseract.
//!
//! Tesseract (through leptonica) only reliably reads 8-bit-or-less JPEG, TIFF
//! and PNG without an alpha channel. Anything else is rewritten as an 8-bit,
//! uncompressed, alpha-free grayscale TIFF:
//!
//! ```text
//! identify -format %z page.png[0]   → 16      ┐
//! identify -format %m page.png[0]   → PNG     ├─ any unsupported? → convert
//! identify -format %A page.png[0]   → True    ┘
//! convert page.png[0] -colorspace Gray -depth 8 -compress None -alpha Off page.tif
//! ```
//!
//! Probing and conversion are separate invocations so the codec policy and
//! the conversion verbs can change without touching the OCR stages.

use crate::error::StageError;
use crate::pipeline::{output_missing, remove_scratch_file, tool_failed, PageImage, Toolchain};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Codecs tesseract accepts as-is (compared case-insensitively).
pub const SUPPORTED_CODECS: [&str; 3] = ["jpeg", "tiff", "png"];

/// Maximum bit depth tesseract accepts as-is.
pub const MAX_DEPTH: u32 = 8;

/// Conversion flags placed between `<source>[0]` and `<dest>`.
pub const DEFAULT_CONVERT_ARGS: [&str; 8] = [
    "-colorspace",
    "Gray",
    "-depth",
    "8",
    "-compress",
    "None",
    "-alpha",
    "Off",
];

/// `path[0]`: ImageMagick syntax selecting the first frame.
fn first_frame(path: &Path) -> OsString {
    let mut s = path.as_os_str().to_os_string();
    s.push("[0]");
    s
}

/// Run one `identify -format <fmt>` probe.
///
/// `Ok(None)` means identify ran but failed; the attribute is unknown.
async fn probe_attribute(
    tools: &Toolchain,
    path: &Path,
    format: &str,
) -> Result<Option<String>, StageError> {
    let (command, output) = tools
        .exec(&tools.identify, vec!["-format".into(), format.into(), first_frame(path)])
        .await?;
    if !output.success() {
        warn!(
            "{} exited {:?}; treating {} as unknown\n  output: {}",
            command,
            output.exit_code,
            format,
            output.output.trim_end()
        );
        return Ok(None);
    }
    Ok(Some(output.output.trim().to_string()))
}

/// `%A` output → alpha presence. IM6 prints `True`/`False`, IM7 prints
/// `Blend`/`Undefined`.
pub fn parse_alpha(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "undefined" | "off" | "deactivate" | "remove"
    )
}

/// Fill in depth, codec and alpha for `image`.
pub async fn probe(tools: &Toolchain, image: &mut PageImage) -> Result<(), StageError> {
    image.depth = probe_attribute(tools, &image.path, "%z")
        .await?
        .and_then(|d| d.parse::<u32>().ok());
    image.codec = probe_attribute(tools, &image.path, "%m").await?;
    image.has_alpha = probe_attribute(tools, &image.path, "%A")
        .await?
        .map(|a| parse_alpha(&a));
    debug!(
        "probed {}: depth={:?} codec={:?} alpha={:?}",
        image.path.display(),
        image.depth,
        image.codec,
        image.has_alpha
    );
    Ok(())
}

/// Whether `image` must be converted before OCR. Unknown attributes force
/// conversion.
pub fn needs_conversion(image: &PageImage) -> bool {
    let depth_ok = image.depth.is_some_and(|d| d <= MAX_DEPTH);
    let codec_ok = image.codec.as_deref().is_some_and(|c| {
        SUPPORTED_CODECS
            .iter()
            .any(|s| s.eq_ignore_ascii_case(c.trim()))
    });
    let alpha_ok = image.has_alpha == Some(false);
    !(depth_ok && codec_ok && alpha_ok)
}

/// `<dir>/<stem>.tif`, or `<dir>/<stem>_gray.tif` when the source already
/// has that name.
pub fn conversion_target(source: &Path) -> PathBuf {
    let target = source.with_extension("tif");
    if target == source {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string());
        source.with_file_name(format!("{stem}_gray.tif"))
    } else {
        target
    }
}

/// Probe `image` and convert it if needed.
///
/// Returns the image to OCR: `image` itself when it is already acceptable,
/// otherwise the converted TIFF (the original scratch file is deleted).
pub async fn normalize(tools: &Toolchain, mut image: PageImage) -> Result<PageImage, StageError> {
    probe(tools, &mut image).await?;
    if !needs_conversion(&image) {
        debug!("{} is acceptable as-is", image.path.display());
        return Ok(image);
    }

    let source = image.path.clone();
    let dest = conversion_target(&source);
    let mut flags: Vec<String> = DEFAULT_CONVERT_ARGS.iter().map(|s| s.to_string()).collect();
    if let Some(ref hook) = tools.convert_args_hook {
        hook.alter(&mut flags, &source, &dest);
    }

    let mut args: Vec<OsString> = Vec::with_capacity(flags.len() + 2);
    args.push(first_frame(&source));
    args.extend(flags.into_iter().map(OsString::from));
    args.push(dest.clone().into_os_string());

    let (command, output) = tools.exec(&tools.convert, args).await?;
    if !output.success() {
        remove_scratch_file(&dest).await;
        return Err(tool_failed(&command, output));
    }
    if !dest.exists() {
        return Err(output_missing(&command, output, &dest));
    }

    info!(
        "normalised {} (depth={:?} codec={:?} alpha={:?}) → {}",
        source.display(),
        image.depth,
        image.codec,
        image.has_alpha,
        dest.display()
    );
    remove_scratch_file(&source).await;
    Ok(PageImage {
        path: dest,
        depth: Some(MAX_DEPTH),
        codec: Some("TIFF".to_string()),
        has_alpha: Some(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(depth: Option<u32>, codec: Option<&str>, alpha: Option<bool>) -> PageImage {
        PageImage {
            path: PathBuf::from("/tmp/p.jpg"),
            depth,
            codec: codec.map(str::to_string),
            has_alpha: alpha,
        }
    }

    #[test]
    fn supported_images_pass() {
        for codec in ["JPEG", "TIFF", "PNG", "png"] {
            assert!(!needs_conversion(&image(Some(8), Some(codec), Some(false))), "{codec}");
        }
        assert!(!needs_conversion(&image(Some(1), Some("TIFF"), Some(false))));
    }

    #[test]
    fn unsupported_images_convert() {
        assert!(needs_conversion(&image(Some(16), Some("PNG"), Some(false))));
        assert!(needs_conversion(&image(Some(8), Some("JP2"), Some(false))));
        assert!(needs_conversion(&image(Some(8), Some("PNG"), Some(true))));
        assert!(needs_conversion(&image(None, Some("PNG"), Some(false))));
        assert!(needs_conversion(&image(Some(8), None, Some(false))));
        assert!(needs_conversion(&image(Some(8), Some("PNG"), None)));
    }

    #[test]
    fn alpha_parsing_covers_both_imagemagick_generations() {
        assert!(parse_alpha("True"));
        assert!(parse_alpha("Blend"));
        assert!(!parse_alpha("False"));
        assert!(!parse_alpha("Undefined"));
        assert!(!parse_alpha(""));
    }

    #[test]
    fn conversion_target_avoids_clobbering_source() {
        assert_eq!(
            conversion_target(Path::new("/s/book_1_OBJ.png")),
            PathBuf::from("/s/book_1_OBJ.tif")
        );
        assert_eq!(
            conversion_target(Path::new("/s/book_1_OBJ.tif")),
            PathBuf::from("/s/book_1_OBJ_gray.tif")
        );
    }

    #[test]
    fn first_frame_suffix() {
        assert_eq!(first_frame(Path::new("/s/a.tif")), OsString::from("/s/a.tif[0]"));
    }
}
