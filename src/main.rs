use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use fetchkit::client::{ApiClient, CacheConfig, Payload, RequestConfig, UploadFile};
use fetchkit::config::Config;
use fetchkit::logging;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "fetchkit")]
#[command(about = "Issue requests through the fetchkit executor")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./fetchkit.yaml, then $XDG_CONFIG_HOME/fetchkit/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Base URL, overriding config and environment
  #[arg(short, long)]
  base_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// GET an endpoint and print the body
  Get {
    endpoint: String,
    /// Cache the response for this many seconds
    #[arg(long)]
    cache_ttl: Option<u64>,
  },
  /// GET an endpoint and save the body to a file
  Download { endpoint: String, output: PathBuf },
  /// POST a file as multipart form data
  Upload {
    endpoint: String,
    file: PathBuf,
    /// Form field name
    #[arg(long, default_value = "file")]
    field: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(url) = args.base_url {
    config.api.base_url = url;
  }

  let _guard = logging::init(config.log_dir.as_deref())?;
  let client = ApiClient::from_config(&config)?;

  match args.command {
    Command::Get { endpoint, cache_ttl } => {
      let mut request = RequestConfig::get();
      if let Some(secs) = cache_ttl {
        request = request.cache(CacheConfig::ttl(Duration::from_secs(secs)));
      }
      let payload = client.execute_raw(&endpoint, request).await.into_result()?;
      print_payload(payload)?;
    }
    Command::Download { endpoint, output } => {
      let download = client.download(&endpoint, &output).await.into_result()?;
      println!("{} bytes written to {}", download.bytes, download.path.display());
    }
    Command::Upload { endpoint, file, field } => {
      let data = tokio::fs::read(&file)
        .await
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
      let payload = client
        .upload::<serde_json::Value>(&endpoint, vec![UploadFile::new(field, file_name, data)])
        .await
        .into_result()?;
      println!("{}", serde_json::to_string_pretty(&payload)?);
    }
  }

  Ok(())
}

fn print_payload(payload: Payload) -> Result<()> {
  match payload {
    Payload::Empty => {}
    Payload::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
    Payload::Text(text) => println!("{}", text),
    Payload::Binary(bytes) => println!("<{} bytes of binary data>", bytes.len()),
  }
  Ok(())
}
