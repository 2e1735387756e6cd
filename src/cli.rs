// Headless front end: restore one image and optionally chain operations.
//
// Usage examples:
//   restore-studio --input scan.jpg
//   restore-studio -i scan.jpg --preset strong --op denoise:h=14 --op sharpen -o out.png
//   restore-studio -i scan.jpg --no-restore --op brightness:brightness=10 --output-dir out/
//   restore-studio -i scan.jpg --op clahe --keep-intermediates --server http://gpu-box:5000

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Instant;

use bytes::Bytes;
use clap::Parser;
use thiserror::Error;

use crate::client::{HttpRestoreClient, RestoreError};
use crate::config::{load_config, ClientConfig, ConfigError};
use crate::controller::{Intent, SessionController};
use crate::operations::OperationId;
use crate::session::{Session, SessionError};

pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "webp", "bmp", "gif", "tif", "tiff"];

/// Sends an image to the restoration service and writes the result.
#[derive(Parser, Debug)]
#[command(
    name = "restore-studio",
    about = "Restore a photo through the remote restoration service",
    long_about = "Uploads an image to the restoration service, optionally chains follow-up\n\
                  operations on the result and writes the final artifact to disk.\n\n\
                  Operation specs take the form NAME or NAME:key=value,... e.g.\n  \
                  --op denoise:h=14 --op unsharp:sharp=2,radius=1.5"
)]
pub struct CliArgs {
    /// Image to restore.
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Service base URL. Overrides the configured one.
    #[arg(long, value_name = "URL")]
    pub server: Option<String>,

    /// JSON settings file (service URL, timeout, presets).
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Preset sent with every request.
    #[arg(short, long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Operation applied after the restore, in order. Repeatable.
    #[arg(long = "op", value_name = "SPEC", value_parser = parse_op_spec)]
    pub ops: Vec<OpSpec>,

    /// Skip the full restore and run the operations on the original.
    #[arg(long)]
    pub no_restore: bool,

    /// Output file for the final artifact.
    #[arg(short, long, value_name = "FILE", conflicts_with = "output_dir")]
    pub output: Option<PathBuf>,

    /// Output directory. Defaults to the input's directory.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Also write every history step next to the final output.
    #[arg(long)]
    pub keep_intermediates: bool,
}

/// One `--op` argument.
#[derive(Debug, Clone, PartialEq)]
pub struct OpSpec {
    pub op: OperationId,
    pub params: Vec<(String, f64)>,
}

impl FromStr for OpSpec {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, rest) = match value.split_once(':') {
            Some((name, rest)) => (name, Some(rest)),
            None => (value, None),
        };
        let op = OperationId::from_str(name).map_err(|err| err.to_string())?;

        let mut params = Vec::new();
        for pair in rest.into_iter().flat_map(|rest| rest.split(',')) {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((key, raw)) = pair.split_once('=') else {
                return Err(format!("expected key=value, got '{}'", pair));
            };
            let key = key.trim();
            let Some(spec) = op.param(key) else {
                return Err(format!("{} has no parameter named {}", op, key));
            };
            let number: f64 = raw
                .trim()
                .parse()
                .map_err(|_| format!("invalid number for {}: '{}'", key, raw.trim()))?;
            params.push((spec.name.to_string(), number));
        }

        Ok(Self { op, params })
    }
}

pub fn parse_op_spec(value: &str) -> Result<OpSpec, String> {
    value.parse()
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub fn run(args: CliArgs) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("failed to start runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    match runtime.block_on(execute(&args)) {
        Ok(written) => {
            for path in &written {
                log::info!("wrote {}", path.display());
            }
            log::info!("done in {:.2}s", start.elapsed().as_secs_f64());
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

/// Runs the whole session and returns the files written, final output last.
pub async fn execute(args: &CliArgs) -> Result<Vec<PathBuf>, CliError> {
    if args.no_restore && args.ops.is_empty() {
        return Err(CliError::Usage(
            "nothing to do: drop --no-restore or pass at least one --op".into(),
        ));
    }

    let config = resolve_config(args)?;
    let client = HttpRestoreClient::new(&config)?;
    log::info!("service endpoint: {}", client.endpoint());

    let bytes = fs::read(&args.input)?;
    let name = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());

    let mut controller = SessionController::new(Session::new(&config), client);
    controller
        .dispatch(Intent::SelectFile {
            name,
            content_type: guess_content_type(&args.input).map(str::to_string),
            bytes: Bytes::from(bytes),
        })
        .await?;
    if let Some(preset) = &args.preset {
        controller
            .dispatch(Intent::SelectPreset(preset.clone()))
            .await?;
    }
    if !args.no_restore {
        controller.dispatch(Intent::Restore).await?;
        log::info!("{}", controller.session().status());
    }
    for spec in &args.ops {
        controller
            .dispatch(Intent::ApplyOperation {
                op: spec.op,
                params: spec.params.clone(),
            })
            .await?;
        log::info!("{}", controller.session().status());
    }

    let written = write_outputs(args, controller.session())?;
    let released = controller.session_mut().close();
    log::debug!("released {} display handles", released);
    Ok(written)
}

fn resolve_config(args: &CliArgs) -> Result<ClientConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    if let Some(server) = &args.server {
        config.service_url = server.clone();
        config = config.normalize();
    }
    Ok(config)
}

fn write_outputs(args: &CliArgs, session: &Session) -> Result<Vec<PathBuf>, CliError> {
    let Some(last) = session.history().current() else {
        return Err(CliError::Usage("the session produced no artifact".into()));
    };
    let output = output_path(args);
    let dir = output
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if !dir.as_os_str().is_empty() {
        fs::create_dir_all(&dir)?;
    }

    let mut written = Vec::new();
    if args.keep_intermediates {
        let stem = input_stem(&args.input);
        for (index, artifact) in session.history().iter().enumerate() {
            let path = dir.join(intermediate_name(&stem, index, artifact.label()));
            fs::write(&path, artifact.bytes())?;
            written.push(path);
        }
    }

    fs::write(&output, last.bytes())?;
    written.push(output);
    Ok(written)
}

pub fn output_path(args: &CliArgs) -> PathBuf {
    if let Some(output) = &args.output {
        return output.clone();
    }
    let dir = match &args.output_dir {
        Some(dir) => dir.clone(),
        None => args
            .input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    dir.join(format!("{}_restored.png", input_stem(&args.input)))
}

fn input_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

/// `photo`, 1, `Op: denoise` -> `photo_01_op-denoise.png`
pub fn intermediate_name(stem: &str, index: usize, label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    format!("{}_{:02}_{}.png", stem, index, slug.trim_matches('-'))
}

pub fn guess_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    Some(match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        _ => "image/tiff",
    })
}
