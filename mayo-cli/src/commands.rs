//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use mayo_core::config::{ConfigOverrides, ExecutionMode};
use mayo_core::session::ReplaySession;
use mayo_core::{
    EvalOutcome, Evaluator, InterruptPolicy, Logger, MayoConfig, MayoError, geometry, load_config,
};
use ndarray::{Array2, ArrayD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    configs: &[PathBuf],
    mut overrides: ConfigOverrides,
) -> anyhow::Result<()> {
    match command {
        Commands::Eval { checkpoint, fast } => {
            overrides.checkpoint = checkpoint;
            if fast {
                overrides.execution = Some(ExecutionMode::Concurrent);
            }
            handle_eval(load_config(configs, &overrides)?).await
        }
        Commands::EvalAll { json, fast } => {
            if fast {
                overrides.execution = Some(ExecutionMode::Concurrent);
            }
            handle_eval_all(load_config(configs, &overrides)?, json).await
        }
        Commands::Iou {
            file,
            anchors,
            legacy,
        } => handle_iou(&file, anchors, legacy),
        Commands::Ap { file } => handle_ap(&file),
        Commands::Config { action } => handle_config(action, configs, &overrides),
    }
}

/// Token cancelled on the first Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received");
            trigger.cancel();
        }
    });
    token
}

fn open_evaluator(
    config: MayoConfig,
    cancel: CancellationToken,
) -> Result<Evaluator<ReplaySession>, MayoError> {
    let session = ReplaySession::open(
        &config.system.checkpoint.directory,
        config.system.batch_size,
        config.system.execution,
    )?;
    Evaluator::new(session, config, Logger::new(), cancel)
}

async fn handle_eval(config: MayoConfig) -> anyhow::Result<()> {
    let cancel = interrupt_token();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut evaluator = open_evaluator(config, cancel)?;
        evaluator.eval(None, InterruptPolicy::Propagate)
    })
    .await??;

    match outcome {
        EvalOutcome::Completed(accuracy) => {
            println!(
                "top1: {}, top5: {} [{} images]",
                accuracy.top1, accuracy.top5, accuracy.examples
            );
            Ok(())
        }
        EvalOutcome::Aborted => Err(MayoError::Interrupted.into()),
    }
}

async fn handle_eval_all(config: MayoConfig, json: bool) -> anyhow::Result<()> {
    let cancel = interrupt_token();
    let report = tokio::task::spawn_blocking(move || {
        let mut evaluator = open_evaluator(config, cancel)?;
        evaluator.eval_all()
    })
    .await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.rows.is_empty() {
        println!("No checkpoints evaluated.");
    } else {
        println!("{}", report.format());
    }
    if report.interrupted {
        eprintln!("Sweep interrupted; showing completed checkpoints only.");
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct IouInput {
    boxes: Vec<Vec<f64>>,
    queries: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct ApInput {
    recall: Vec<f64>,
    precision: Vec<f64>,
}

fn read_input<T: for<'de> Deserialize<'de>>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&content)?)
}

fn to_array2(rows: &[Vec<f64>]) -> anyhow::Result<Array2<f64>> {
    let width = rows.first().map_or(0, Vec::len);
    if let Some(row) = rows.iter().find(|r| r.len() != width) {
        anyhow::bail!("rows must all have {width} values, found one with {}", row.len());
    }
    let flat = rows.iter().flatten().copied().collect();
    Ok(Array2::from_shape_vec((rows.len(), width), flat)?)
}

fn to_rows(matrix: &ArrayD<f64>) -> Vec<Vec<f64>> {
    matrix
        .outer_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

fn pairwise_iou(input: &IouInput, anchors: bool, legacy: bool) -> anyhow::Result<Vec<Vec<f64>>> {
    let boxes = to_array2(&input.boxes)?;
    let queries = to_array2(&input.queries)?;
    if legacy {
        let result = geometry::iou_array(&boxes, &queries)?;
        return Ok(to_rows(&result.iou.into_dyn()));
    }
    let (a, b) = geometry::cartesian(&boxes, &queries)?;
    Ok(to_rows(&geometry::iou(&a, &b, anchors)?))
}

fn handle_iou(file: &Path, anchors: bool, legacy: bool) -> anyhow::Result<()> {
    let input: IouInput = read_input(file)?;
    let matrix = pairwise_iou(&input, anchors, legacy)?;
    println!("{}", serde_json::to_string_pretty(&matrix)?);
    Ok(())
}

fn handle_ap(file: &Path) -> anyhow::Result<()> {
    let input: ApInput = read_input(file)?;
    let ap = geometry::average_precision(&input.recall, &input.precision)?;
    println!("{ap:.6}");
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    configs: &[PathBuf],
    overrides: &ConfigOverrides,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(configs, overrides)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
