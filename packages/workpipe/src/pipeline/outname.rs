//! Output name derivation.
//!
//! Recognized options:
//!
//! | key              | meaning                                             |
//! |------------------|-----------------------------------------------------|
//! | `outname`        | explicit output name, used as-is                    |
//! | `outdir`         | directory the output is written to                  |
//! | `outname_append` | suffix inserted before the extension                |
//! | `outname_ext`    | replacement extension (without the dot)             |
//! | `create_outdir`  | create `outdir` when it does not exist              |

use std::path::{Path, PathBuf};

use super::item::{Options, opt_bool, opt_str};
use super::result::Metadata;
use crate::error::PipelineError;

/// Derive the output name for `input`.
///
/// Fails with [`PipelineError::Configuration`] when there is nothing to name
/// the output after, when the output would silently replace the input, or when
/// `outdir` is missing and `create_outdir` is not set.
pub fn outname_create(
    input: &str,
    _data: &[u8],
    _meta: &Metadata,
    options: &Options,
) -> Result<String, PipelineError> {
    if let Some(explicit) = opt_str(options, "outname") {
        return Ok(explicit.to_string());
    }

    let input_path = Path::new(input);
    let file_name = input_path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        PipelineError::Configuration(format!(
            "cannot derive an output name from '{input}' and no explicit outname was given"
        ))
    })?;

    let append = opt_str(options, "outname_append");
    let ext = opt_str(options, "outname_ext");
    let outdir = opt_str(options, "outdir");

    if outdir.is_none() && append.is_none() && ext.is_none() {
        return Err(PipelineError::Configuration(format!(
            "no outdir, outname_append or outname_ext set for '{input}'; output would overwrite the input"
        )));
    }

    let base = decorate(file_name, append, ext);

    let dir = match outdir {
        Some(dir) => {
            let dir = PathBuf::from(dir);
            ensure_outdir(&dir, opt_bool(options, "create_outdir"))?;
            dir
        }
        None => input_path.parent().map(Path::to_path_buf).unwrap_or_default(),
    };

    Ok(dir.join(base).to_string_lossy().into_owned())
}

fn decorate(file_name: &str, append: Option<&str>, ext: Option<&str>) -> String {
    let (stem, original_ext) = match file_name.rsplit_once('.') {
        Some((stem, e)) if !stem.is_empty() => (stem, Some(e)),
        _ => (file_name, None),
    };

    let mut name = format!("{stem}{}", append.unwrap_or(""));
    if let Some(e) = ext.or(original_ext) {
        name.push('.');
        name.push_str(e.trim_start_matches('.'));
    }
    name
}

fn ensure_outdir(dir: &Path, create: bool) -> Result<(), PipelineError> {
    if dir.is_dir() {
        return Ok(());
    }
    if !create {
        return Err(PipelineError::Configuration(format!(
            "output directory '{}' does not exist and create_outdir is not set",
            dir.display()
        )));
    }
    std::fs::create_dir_all(dir).map_err(|e| {
        PipelineError::Configuration(format!("cannot create output directory '{}': {e}", dir.display()))
    })?;
    tracing::debug!(outdir = %dir.display(), "Created output directory");
    Ok(())
}
