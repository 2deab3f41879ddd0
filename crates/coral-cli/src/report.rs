//! Artifact writing: per-run metric CSVs, a JSON summary, and the
//! four-series accuracy comparison plot.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use plotters::prelude::*;
use serde::Serialize;

use coral::training::metrics::EvalMetric;

use crate::config::ExperimentConfig;
use crate::pipeline::RunReport;

/// Write every artifact for the finished experiment into `dir`.
pub fn write_all(
    dir: &Path,
    experiment: &ExperimentConfig,
    reports: &[RunReport],
) -> anyhow::Result<()> {
    for report in reports {
        write_csv(
            &dir.join(format!("training_{}.csv", report.label)),
            &report.train,
        )?;
        write_csv(
            &dir.join(format!("source_{}.csv", report.label)),
            &report.source_evals,
        )?;
        write_csv(
            &dir.join(format!("target_{}.csv", report.label)),
            &report.target_evals,
        )?;
    }
    write_summary(&dir.join("summary.json"), experiment, reports)?;

    // Plot rendering needs system fonts, which headless hosts may lack.
    if let Err(err) = render_accuracy_plot(&dir.join("accuracy_comparison.png"), reports) {
        tracing::warn!(error = %err, "skipping accuracy plot");
    }
    Ok(())
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), rows = rows.len(), "Wrote metrics");
    Ok(())
}

#[derive(Serialize)]
struct Summary<'a> {
    config: &'a ExperimentConfig,
    runs: Vec<RunSummary<'a>>,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    label: &'a str,
    epochs: usize,
    final_source_accuracy: f64,
    final_target_accuracy: f64,
    best_target_accuracy: f64,
}

fn write_summary(
    path: &Path,
    experiment: &ExperimentConfig,
    reports: &[RunReport],
) -> anyhow::Result<()> {
    let runs: Vec<RunSummary> = reports
        .iter()
        .map(|report| RunSummary {
            label: report.label,
            epochs: report.source_evals.len(),
            final_source_accuracy: report.source_evals.last().map_or(f64::NAN, |m| m.accuracy),
            final_target_accuracy: report.target_evals.last().map_or(f64::NAN, |m| m.accuracy),
            best_target_accuracy: report
                .target_evals
                .iter()
                .map(|m| m.accuracy)
                .fold(f64::NAN, f64::max),
        })
        .collect();
    let summary = Summary {
        config: experiment,
        runs,
    };
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), &summary)?;
    tracing::info!(path = %path.display(), "Wrote summary");
    Ok(())
}

fn accuracy_series(evals: &[EvalMetric]) -> Vec<(f64, f64)> {
    evals.iter().map(|m| (m.epoch as f64, m.accuracy)).collect()
}

/// Draw accuracy against epoch for both domains of both runs.
fn render_accuracy_plot(
    path: &Path,
    reports: &[RunReport],
) -> Result<(), Box<dyn std::error::Error>> {
    let max_epoch = reports
        .iter()
        .flat_map(|r| r.source_evals.iter().chain(&r.target_evals))
        .map(|m| m.epoch)
        .max()
        .unwrap_or(1) as f64;

    let root = BitMapBackend::new(path, (1024, 768)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Deep CORAL accuracy comparison", ("sans-serif", 28))
        .margin(16)
        .x_label_area_size(48)
        .y_label_area_size(56)
        .build_cartesian_2d(1f64..max_epoch.max(2.0), 0f64..100f64)?;
    chart
        .configure_mesh()
        .x_desc("Number of EPOCHS")
        .y_desc("Accuracy")
        .draw()?;

    let mut draw = |points: Vec<(f64, f64)>,
                    color: RGBColor,
                    name: &str|
     -> Result<(), Box<dyn std::error::Error>> {
        chart
            .draw_series(LineSeries::new(points, color))?
            .label(name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], color));
        Ok(())
    };
    for report in reports {
        let (source_color, target_color, tag) = if report.label == "with_coral" {
            (RED, GREEN, "w/")
        } else {
            (BLUE, YELLOW, "w/o")
        };
        draw(
            accuracy_series(&report.source_evals),
            source_color,
            &format!("source acc. {tag} coral"),
        )?;
        draw(
            accuracy_series(&report.target_evals),
            target_color,
            &format!("target acc. {tag} coral"),
        )?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}
