//! Training command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use netguard_pipeline::{PipelineConfig, RunStatus, TrainingPipeline, TrainingRunRecord};
use tracing::debug;

pub async fn execute(mut config: PipelineConfig, no_promote: bool, json_output: bool) -> Result<()> {
    if no_promote {
        config.auto_promote = false;
    }
    let pipeline = TrainingPipeline::from_config(config).context("Failed to set up training pipeline")?;
    debug!(
        collection = %pipeline.config().source.collection_ref(),
        auto_promote = pipeline.config().auto_promote,
        "starting training run"
    );
    let record = pipeline.run_training().await.context("Training run failed")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    print_record(&record);
    Ok(())
}

fn print_record(record: &TrainingRunRecord) {
    println!();
    match record.status {
        RunStatus::Succeeded => println!("{}", "Training complete".bold().green()),
        RunStatus::BelowThreshold => println!("{}", "Training complete, below F1 threshold".bold().yellow()),
        RunStatus::Failed => println!("{}", "Training failed".bold().red()),
    }
    println!("  Run:       {}", record.run_id.to_string().cyan());
    if let Some(algorithm) = &record.algorithm {
        println!("  Algorithm: {}", algorithm);
    }
    if let Some(metrics) = &record.eval_metrics {
        println!(
            "  Eval:      f1 {:.3}  precision {:.3}  recall {:.3}  accuracy {:.3}",
            metrics.f1, metrics.precision, metrics.recall, metrics.accuracy
        );
        println!("  Threshold: f1 >= {:.3}", record.min_f1);
    }
    if record.overfit {
        println!("  {}", "Train/eval F1 gap exceeds the overfit tolerance".yellow());
    }
    if let Some(drift) = &record.drift {
        let drifted = drift.drifted();
        if !drifted.is_empty() {
            println!("  {} {}", "Drifted features:".yellow(), drifted.join(", "));
        }
    }
    if record.promoted {
        println!("  {}", "Promoted to the final slot".green());
    } else if record.status == RunStatus::Succeeded {
        println!("  {}", format!("Not promoted. Run `netguard promote {}` to serve it.", record.run_id).dimmed());
    }
    println!();
}
