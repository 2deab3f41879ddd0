//! Write a pair of synthetic source/target domains as JSONL files that
//! `deep-coral` can load through `[data] source_path` / `target_path`.
//!
//! ```text
//! cargo run --example gen_synthetic_jsonl -- --out-dir data --classes 10
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;

use coral::data::{synthetic_dataset, ImageShape, SyntheticSpec};

#[derive(Parser, Debug)]
#[command(about = "Generate synthetic source/target JSONL datasets")]
struct Args {
    /// Directory receiving source.jsonl and target.jsonl.
    #[arg(long, default_value = "data")]
    out_dir: PathBuf,
    #[arg(long, default_value_t = 2000)]
    source_examples: usize,
    #[arg(long, default_value_t = 600)]
    target_examples: usize,
    #[arg(long, default_value_t = 10)]
    classes: usize,
    #[arg(long, default_value_t = 16)]
    image_size: usize,
    #[arg(long, default_value_t = 3)]
    channels: usize,
    /// Pixel intensity offset applied to the target domain.
    #[arg(long, default_value_t = 0.5)]
    domain_shift: f32,
    /// Half-width of the per-pixel uniform noise.
    #[arg(long, default_value_t = 0.2)]
    noise: f32,
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let shape = ImageShape {
        channels: args.channels,
        height: args.image_size,
        width: args.image_size,
    };
    fs::create_dir_all(&args.out_dir)?;

    let domains = [
        ("source", args.source_examples, 0.0, args.seed),
        (
            "target",
            args.target_examples,
            args.domain_shift,
            args.seed + 1,
        ),
    ];
    for (name, examples, shift, seed) in domains {
        let dataset = synthetic_dataset(
            name,
            &SyntheticSpec {
                examples,
                classes: args.classes,
                shape,
                intensity_shift: shift,
                noise: args.noise,
                seed,
            },
        )?;
        let path = args.out_dir.join(format!("{name}.jsonl"));
        let mut writer = BufWriter::new(File::create(&path)?);
        for record in dataset.records() {
            serde_json::to_writer(&mut writer, record)?;
            writeln!(writer)?;
        }
        writer.flush()?;
        println!("wrote {} examples to {}", dataset.len(), path.display());
    }
    Ok(())
}
