use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facealign_core::alignment::{align_face, estimate_similarity_transform};
use facealign_core::types::LANDMARK_COUNT;
use facealign_core::{detect_faces, detect_largest_face, PipelineConfig, Point};
use std::path::PathBuf;

mod dump;

#[derive(Parser)]
#[command(name = "facealign", about = "Face detection post-processing and alignment")]
struct Cli {
    /// TOML config file (thresholds, canonical layout)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON dump of detector outputs through decode and NMS
    Detect {
        /// Path to the tensor dump
        #[arg(short, long)]
        tensors: PathBuf,
        /// Print every kept face instead of only the largest
        #[arg(long)]
        all: bool,
    },
    /// Estimate the canonical alignment for five landmarks
    Align {
        /// Ten comma-separated coordinates: x1,y1,...,x5,y5
        #[arg(short, long, allow_hyphen_values = true)]
        landmarks: String,
        /// Source image to warp into the canonical frame
        #[arg(short, long, requires = "output")]
        image: Option<PathBuf>,
        /// Where to write the aligned crop
        #[arg(short, long, requires = "image")]
        output: Option<PathBuf>,
    },
    /// Print the effective configuration
    Layout,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::from_env()?,
    };

    match cli.command {
        Commands::Detect { tensors, all } => {
            let dump = dump::TensorDump::load(&tensors)?;
            let views = dump.views();
            let letterbox = dump.letterbox();

            if all {
                let faces = detect_faces(&views, &letterbox, &config.detection)?;
                tracing::info!(faces = faces.len(), "detection complete");
                println!("{}", serde_json::to_string_pretty(&faces)?);
            } else {
                match detect_largest_face(&views, &letterbox, &config.detection)? {
                    Some(face) => println!("{}", serde_json::to_string_pretty(&face)?),
                    None => println!("no face detected"),
                }
            }
        }
        Commands::Align {
            landmarks,
            image: image_path,
            output,
        } => {
            let landmarks = parse_landmarks(&landmarks)?;
            let transform = estimate_similarity_transform(&landmarks, &config.canonical.points)?;
            println!("{}", serde_json::to_string_pretty(&transform)?);

            if let (Some(image_path), Some(output)) = (image_path, output) {
                let src = image::open(&image_path)
                    .with_context(|| format!("opening {}", image_path.display()))?
                    .to_rgb8();
                let aligned = align_face(&src, &landmarks, &config.canonical)?;
                aligned
                    .save(&output)
                    .with_context(|| format!("writing {}", output.display()))?;
                tracing::info!(
                    output = %output.display(),
                    size = config.canonical.size,
                    "wrote aligned face"
                );
            }
        }
        Commands::Layout => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}

/// Parse `x1,y1,...,x5,y5` (commas and/or whitespace) into five points.
fn parse_landmarks(s: &str) -> Result<[Point; LANDMARK_COUNT]> {
    let values = s
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<f32>().with_context(|| format!("bad coordinate {t:?}")))
        .collect::<Result<Vec<f32>>>()?;

    if values.len() != LANDMARK_COUNT * 2 {
        bail!(
            "expected {} coordinates for {LANDMARK_COUNT} landmarks, got {}",
            LANDMARK_COUNT * 2,
            values.len()
        );
    }

    let mut points = [Point::default(); LANDMARK_COUNT];
    for (p, xy) in points.iter_mut().zip(values.chunks_exact(2)) {
        *p = Point::new(xy[0], xy[1]);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_landmarks() {
        let pts = parse_landmarks("80,60, 120,60 100,85,85,110,115,-110.5").unwrap();
        assert_eq!(pts[0], Point::new(80.0, 60.0));
        assert_eq!(pts[4], Point::new(115.0, -110.5));
    }

    #[test]
    fn test_parse_landmarks_rejects_wrong_count() {
        assert!(parse_landmarks("1,2,3").is_err());
        assert!(parse_landmarks("1,2,3,4,5,6,7,8,9,x").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["facealign", "detect", "--tensors", "dump.json", "--all"]).unwrap();
        assert!(matches!(cli.command, Commands::Detect { all: true, .. }));

        let cli = Cli::try_parse_from(["facealign", "align", "-l", "1,2,3,4,5,6,7,8,9,10"]).unwrap();
        assert!(matches!(cli.command, Commands::Align { image: None, .. }));

        // An image without an output path is rejected.
        assert!(Cli::try_parse_from(["facealign", "align", "-l", "1,2", "--image", "a.png"]).is_err());
    }
}
