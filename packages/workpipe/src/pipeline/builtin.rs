//! Pipelines that ship with the binary and can be named on the command line.

use anyhow::Result;
use serde_json::json;

use super::item::Options;
use super::result::Metadata;
use super::stages::{FilePipeline, PostOutput, PreOutput};

pub const COPY: &str = "copy";

/// Copy each non-empty input to its derived output name, recording size
/// metadata.
pub fn copy() -> FilePipeline {
    FilePipeline::filesystem()
        .with_pre(skip_empty)
        .with_post(size_metadata)
}

/// Drop items without content.
pub fn skip_empty(data: Vec<u8>, _options: &Options) -> Result<PreOutput> {
    if data.is_empty() {
        return Ok((None, Options::new()));
    }
    Ok((Some(data), Options::new()))
}

pub fn size_metadata(data: Vec<u8>, _meta: &Metadata, _options: &Options) -> Result<PostOutput> {
    let mut meta = Metadata::new();
    meta.insert("bytes".into(), json!(data.len()));
    meta.insert("lines".into(), json!(data.iter().filter(|b| **b == b'\n').count()));
    Ok((Some(data), meta))
}
