//! Build a training dataset from cycler exports
//!
//! Reads a JSON pipeline configuration, processes every export given on the
//! command line, writes the accepted examples to one Parquet file and each
//! file's rejection log next to it.
//!
//! Run with:
//!   RUST_LOG=eis_sav=debug cargo run --example build_dataset -- \
//!       config.json cell01.txt cell02.txt out.parquet

use std::path::PathBuf;

use anyhow::{bail, Context};
use eis_sav::storage::DatasetStore;
use eis_sav::{Pipeline, PipelineConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,eis_sav=info".into()),
        )
        .init();

    let args: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    let [config_path, exports @ .., output] = args.as_slice() else {
        bail!("usage: build_dataset <config.json> <export>... <out.parquet>");
    };
    if exports.is_empty() {
        bail!("no export files given");
    }

    let config = PipelineConfig::from_json_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let pipeline = Pipeline::new(config)?;

    println!("=== EIS-SAV Dataset Builder ===\n");
    let mut store = DatasetStore::new();
    let mut failed = 0;

    for (path, result) in pipeline.run_files(exports) {
        let dataset = match result {
            Ok(dataset) => dataset,
            Err(e) => {
                println!("  {:<40} FAILED: {e}", path.display());
                failed += 1;
                continue;
            }
        };

        let report = dataset.report();
        println!(
            "  {:<40} {:>4} cycles  {:>4} accepted  {:>4} rejected  {:?}",
            path.display(),
            report.cycles(),
            report.accepted(),
            report.rejected(),
            report.status()
        );
        for (code, count) in report.reasons() {
            println!("      {code}: {count}");
        }

        let log = path.with_extension("rejections.csv");
        dataset
            .write_rejections_csv(&log)
            .with_context(|| format!("writing {}", log.display()))?;
        store.append_dataset(&dataset)?;
    }

    if store.num_rows() == 0 {
        bail!("no examples accepted from {} file(s)", exports.len());
    }
    store
        .save_parquet(output)
        .with_context(|| format!("writing {}", output.display()))?;

    println!(
        "\nWrote {} examples to {} ({} file(s) failed)",
        store.num_rows(),
        output.display(),
        failed
    );
    Ok(())
}
