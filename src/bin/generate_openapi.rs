//! Dumps the OpenAPI document for the push receiver: the Pub/Sub push route
//! `POST /` and `GET /health`. Register the JSON with API Gateway or diff it
//! in CI when the push contract changes.
//!
//! Usage:
//!   generate_openapi                      # pretty JSON on stdout
//!   generate_openapi --output push.json   # or --output=push.json

use std::{
    env, fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use soil_sensor_ingest::api::handlers::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let target = output_path(env::args().skip(1))?;
    let json = ApiDoc::openapi()
        .to_pretty_json()
        .context("failed to serialise the push receiver OpenAPI document")?;

    match target {
        Some(path) => {
            fs::write(&path, &json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Push receiver OpenAPI written to {}", path.display());
        }
        None => io::stdout()
            .write_all(json.as_bytes())
            .context("failed to write to stdout")?,
    }

    Ok(())
}

/// `None` means stdout.
fn output_path(mut args: impl Iterator<Item = String>) -> Result<Option<PathBuf>> {
    let mut path = None;
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--output=") {
            path = Some(PathBuf::from(value));
        } else if arg == "--output" {
            let Some(value) = args.next() else {
                bail!("--output needs a file path");
            };
            path = Some(PathBuf::from(value));
        } else {
            bail!("unexpected argument `{arg}`; usage: generate_openapi [--output <path>]");
        }
    }
    Ok(path)
}
