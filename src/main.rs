//! image-resizer: resize one image to fit a box and print the output URL.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;

use clap::{Parser, ValueEnum};
use image_resizer::ops::DEFAULT_QUALITY;
use image_resizer::{dispatch_resize, Resizer, ResizerConfig};
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "image-resizer", version, about)]
struct Cli {
    /// Source path or file:// URI.
    #[arg(required_unless_present = "args")]
    uri: Option<String>,

    /// Maximum output width (0 = unconstrained).
    #[arg(short = 'w', long, default_value_t = 0)]
    width: i64,

    /// Maximum output height (0 = unconstrained).
    #[arg(short = 'H', long, default_value_t = 0)]
    height: i64,

    /// Encoder quality (0-100).
    #[arg(short, long, default_value_t = DEFAULT_QUALITY as i64)]
    quality: i64,

    /// Output format.
    #[arg(short, long, value_enum, default_value = "jpeg")]
    format: FormatArg,

    /// Raw request JSON, e.g. '{"uri":"a.png","width":100,"height":0}'.
    /// Overrides the other request flags.
    #[arg(long, conflicts_with = "uri")]
    args: Option<String>,

    /// Directory receiving the resized file.
    #[arg(short, long, env = "IMAGE_RESIZER_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Directory for temporary source copies (default: the output directory).
    #[arg(long, env = "IMAGE_RESIZER_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,
}

/// Target image format.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Jpeg,
    Png,
}

impl FormatArg {
    fn as_str(self) -> &'static str {
        match self {
            FormatArg::Jpeg => "jpeg",
            FormatArg::Png => "png",
        }
    }
}

impl Cli {
    fn request_args(&self) -> Result<Value, String> {
        if let Some(raw) = &self.args {
            return serde_json::from_str(raw).map_err(|e| format!("Error parsing arguments: {e}"));
        }
        Ok(json!({
            "uri": self.uri,
            "width": self.width,
            "height": self.height,
            "quality": self.quality,
            "format": self.format.as_str(),
        }))
    }

    fn config(&self) -> ResizerConfig {
        let mut config = match &self.output_dir {
            Some(dir) => ResizerConfig::new(dir),
            None => ResizerConfig::default(),
        };
        if let Some(dir) = &self.scratch_dir {
            config = config.with_scratch_dir(dir);
        }
        config
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let args = match cli.request_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    let resizer = Resizer::new(cli.config());
    let (tx, rx) = mpsc::channel();
    if let Err(err) = dispatch_resize(&args, &resizer, move |outcome| {
        // The receiver only disappears if main already exited
        let _ = tx.send(outcome);
    }) {
        eprintln!("{}", err.user_message());
        return ExitCode::from(2);
    }

    match rx.recv() {
        Ok(Ok(url)) => {
            println!("{url}");
            ExitCode::SUCCESS
        }
        Ok(Err(err)) => {
            eprintln!("{}", err.user_message());
            ExitCode::FAILURE
        }
        Err(_) => {
            eprintln!("Error resizing image: worker exited without a result");
            ExitCode::FAILURE
        }
    }
}
