use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{BackendKind, PipeConfig};
use crate::pipeline::{PipelineDriver, ProcessingResult, RunRequest, prune_results};
use crate::pool::ProcessSpec;
use crate::session::HandlerRegistry;

#[derive(Args)]
pub struct RunArgs {
    /// Input files
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<String>,

    /// Registered pipeline to run
    #[arg(long, default_value = "copy")]
    pub pipeline: String,

    /// Upper bound on workers (defaults to physical cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Worker backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Cooperative slots per worker
    #[arg(long)]
    pub coroutines: Option<usize>,

    /// Memory one item needs, in bytes
    #[arg(long)]
    pub per_item_memory: Option<u64>,

    /// Directory outputs are written to
    #[arg(long)]
    pub outdir: Option<String>,

    /// Suffix inserted before the output extension
    #[arg(long)]
    pub outname_append: Option<String>,

    /// Replacement output extension
    #[arg(long)]
    pub outname_ext: Option<String>,

    /// Create the output directory when missing
    #[arg(long)]
    pub create_outdir: bool,

    /// Only list items that produced an output
    #[arg(long)]
    pub prune: bool,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

/// Flags that override configuration values.
#[derive(Serialize, Default)]
struct CliOverrides {
    performance: PerformanceOverrides,
    pipeline: PipelineOverrides,
}

#[derive(Serialize, Default)]
struct PerformanceOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    coroutines: Option<usize>,
}

#[derive(Serialize, Default)]
struct PipelineOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    per_item_memory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outname_append: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    create_outdir: Option<bool>,
}

impl RunArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            performance: PerformanceOverrides {
                backend: self.backend,
                coroutines: self.coroutines,
            },
            pipeline: PipelineOverrides {
                max_workers: self.workers,
                per_item_memory: self.per_item_memory,
                outdir: self.outdir.clone(),
                outname_append: self.outname_append.clone(),
                create_outdir: self.create_outdir.then_some(true),
            },
        }
    }
}

#[derive(Serialize)]
struct ResultLine<'a> {
    input: &'a str,
    #[serde(flatten)]
    result: &'a ProcessingResult,
}

pub fn execute(args: RunArgs, verbose: u8, config_path: Option<&Path>) -> Result<()> {
    let start_time = Instant::now();
    let config = Arc::new(PipeConfig::load(config_path, Some(args.overrides()))?);
    let registry = Arc::new(HandlerRegistry::with_builtins(config.clone()));

    let process = ProcessSpec::new(&args.pipeline)
        .with_config(config_path.map(Path::to_path_buf))
        .with_verbosity(verbose);
    let driver = PipelineDriver::from_config(&args.pipeline, registry, &config)?.with_process(process);

    let mut request = RunRequest::new();
    if let Some(ext) = &args.outname_ext {
        request = request.with_option("outname_ext", ext.as_str());
    }

    let results = driver.run(&args.paths, &request)?;
    let (results, inputs) = if args.prune {
        prune_results(&results, &args.paths)
    } else {
        (results, args.paths.clone())
    };

    if args.json {
        let lines: Vec<ResultLine<'_>> = inputs
            .iter()
            .zip(&results)
            .map(|(input, result)| ResultLine { input, result })
            .collect();
        println!("{}", serde_json::to_string_pretty(&lines)?);
    } else {
        for (input, result) in inputs.iter().zip(&results) {
            println!("{input}\t{}", result.output.as_deref().unwrap_or("-"));
        }
    }

    let written = results.iter().filter(|r| !r.is_dropped()).count();
    tracing::info!(
        pipeline = %args.pipeline,
        items = args.paths.len(),
        written,
        elapsed = ?start_time.elapsed(),
        "Run finished"
    );
    Ok(())
}
