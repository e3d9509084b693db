//! Source acquisition: copy a page's master image into scratch space.

use crate::error::StageError;
use crate::pipeline::PageImage;
use crate::repository::{ContentSource, ObjectId};
use std::path::Path;
use tracing::{debug, error};

/// Fetch datastream `dsid` of `object` into `scratch_dir`.
///
/// The file is named `<object>_<dsid>.<ext>` (see [`scratch_file_name`]).
/// Any repository or local write error becomes
/// [`StageError::SourceUnavailable`].
pub async fn acquire_source<S: ContentSource + ?Sized>(
    source: &S,
    object: &ObjectId,
    dsid: &str,
    scratch_dir: &Path,
) -> Result<PageImage, StageError> {
    let unavailable = |detail: String| {
        error!("cannot acquire {} of {}: {}", dsid, object, detail);
        StageError::SourceUnavailable {
            object: object.to_string(),
            dsid: dsid.to_string(),
            detail,
        }
    };

    let content = source
        .fetch_datastream(object, dsid)
        .await
        .map_err(|e| unavailable(e.to_string()))?;
    if content.bytes.is_empty() {
        return Err(unavailable("datastream is empty".into()));
    }

    let path = scratch_dir.join(scratch_file_name(object, dsid, &content.mime_type));
    tokio::fs::write(&path, &content.bytes)
        .await
        .map_err(|e| unavailable(format!("writing {}: {}", path.display(), e)))?;

    debug!(
        "acquired {} of {} → {} ({} bytes, {})",
        dsid,
        object,
        path.display(),
        content.bytes.len(),
        content.mime_type
    );
    Ok(PageImage::unprobed(path))
}

/// `islandora:42` + `OBJ` + `image/jpeg` → `islandora_42_OBJ.jpg`.
pub fn scratch_file_name(object: &ObjectId, dsid: &str, mime_type: &str) -> String {
    format!(
        "{}_{}.{}",
        sanitize_identifier(object.as_str()),
        sanitize_identifier(dsid),
        extension_for_mime(mime_type)
    )
}

/// Replace every non-alphanumeric character with `_`.
pub fn sanitize_identifier(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// File extension for a MIME type, preferring the conventional spelling for
/// the raster formats pages usually arrive in.
pub fn extension_for_mime(mime_type: &str) -> String {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or(mime_type)
        .trim()
        .to_ascii_lowercase();
    let preferred = match essence.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/tiff" | "image/tif" => Some("tif"),
        "image/png" => Some("png"),
        "image/jp2" => Some("jp2"),
        "image/gif" => Some("gif"),
        _ => None,
    };
    if let Some(ext) = preferred {
        return ext.to_string();
    }
    mime_guess::get_mime_extensions_str(&essence)
        .and_then(|exts| exts.first())
        .map(|e| e.to_string())
        .unwrap_or_else(|| "bin".to_string())
}
