//! CLI for shardfs clients

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use shardfs::common::{encode_name, format_bytes, parse_duration, Blake3Hasher};
use shardfs::coordinator::http::{BLAKE3_HEADER, SHARD_COUNT_HEADER, TTL_HEADER};
use shardfs::coordinator::{DeleteOutcome, FileStatus, FileSummary, RenterView};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

#[derive(Parser)]
#[command(name = "shardfs")]
#[command(about = "shardfs sharded file storage CLI")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, env = "SHARDFS_COORDINATOR", default_value = "http://localhost:8000")]
    coordinator: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file
    Upload {
        /// Local file
        file: PathBuf,

        /// Name to store it under (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Shard count (derived from the size if omitted)
        #[arg(long)]
        shards: Option<u32>,

        /// Expire after this long, e.g. "10m", "7d"
        #[arg(long)]
        ttl: Option<String>,
    },

    /// Download the latest upload of a file
    Download {
        name: String,

        /// Output path (defaults to the stored name)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List stored files
    List,

    /// Delete every upload of a file
    Delete { name: String },

    /// List renters and their liveness
    Renters,

    /// Report degraded files (exit code 1 if any)
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let base = cli.coordinator.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Upload {
            file,
            name,
            shards,
            ttl,
        } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .context("cannot derive a name from the path, pass --name")?,
            };
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;

            let mut request = client
                .put(format!("{}/files/{}", base, encode_name(&name)))
                .body(data);
            if let Some(shards) = shards {
                request = request.header(SHARD_COUNT_HEADER, shards.to_string());
            }
            if let Some(ttl) = ttl {
                let ttl = parse_duration(&ttl)?;
                request = request.header(TTL_HEADER, ttl.as_secs().max(1).to_string());
            }

            let summary: FileSummary = check(request.send().await?).await?.json().await?;
            println!("Uploaded {}", summary.filename);
            println!("  Internal id: {}", summary.internal_id);
            println!("  Size: {}", format_bytes(summary.size_bytes));
            println!("  Shards: {}", summary.shard_count);
            for shard in &summary.shards {
                let holders: Vec<String> = shard.renters.iter().map(|r| r.to_string()).collect();
                println!(
                    "    #{:<3} {:>10}  {}",
                    shard.index,
                    format_bytes(shard.size),
                    holders.join(", ")
                );
            }
            if let Some(expires_at) = summary.expires_at {
                println!("  Expires: {}", format_time(expires_at));
            }
        }

        Commands::Download { name, output } => {
            let output = output.unwrap_or_else(|| {
                PathBuf::from(name.rsplit('/').next().unwrap_or(name.as_str()))
            });
            let response =
                check(client.get(format!("{}/files/{}", base, encode_name(&name))).send().await?)
                    .await?;
            let expected = response
                .headers()
                .get(BLAKE3_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let partial = output.with_extension("part");
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut hasher = Blake3Hasher::new();
            let mut written = 0u64;
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tokio::fs::remove_file(&partial).await;
                        bail!("download interrupted: {}", e);
                    }
                };
                hasher.update(&chunk);
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;

            let actual = hasher.finalize();
            if let Some(expected) = expected {
                if expected != actual {
                    let _ = tokio::fs::remove_file(&partial).await;
                    bail!("checksum mismatch: expected {}, got {}", expected, actual);
                }
            }
            tokio::fs::rename(&partial, &output).await?;
            println!(
                "Downloaded {} to {} ({})",
                name,
                output.display(),
                format_bytes(written)
            );
        }

        Commands::List => {
            let files: Vec<FileSummary> =
                check(client.get(format!("{}/files", base)).send().await?)
                    .await?
                    .json()
                    .await?;
            if files.is_empty() {
                println!("No files");
            }
            for f in files {
                println!(
                    "{:<40} {:>10} {:>4} shards  {:<9} {}",
                    f.filename,
                    format_bytes(f.size_bytes),
                    f.shard_count,
                    status_label(f.status),
                    format_time(f.upload_time)
                );
            }
        }

        Commands::Delete { name } => {
            let outcome: DeleteOutcome = check(
                client
                    .delete(format!("{}/files/{}", base, encode_name(&name)))
                    .send()
                    .await?,
            )
            .await?
            .json()
            .await?;
            println!(
                "Deleted {} ({} uploads, {} shard replicas removed, {} unreachable)",
                outcome.filename,
                outcome.uploads_removed,
                outcome.shards_deleted,
                outcome.shard_failures
            );
        }

        Commands::Renters => {
            let renters: Vec<RenterView> =
                check(client.get(format!("{}/renters", base)).send().await?)
                    .await?
                    .json()
                    .await?;
            if renters.is_empty() {
                println!("No renters registered");
            }
            for r in renters {
                let capacity = r
                    .info
                    .capacity_bytes
                    .map(format_bytes)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<12} {:<10} {:<30} rack {:<3} {:>12}  last seen {:.1}s ago",
                    r.info.id.to_string(),
                    r.info.status.to_string(),
                    r.info.address,
                    r.info.rack,
                    capacity,
                    r.silence_ms as f64 / 1000.0
                );
            }
        }

        Commands::Verify => {
            let files: Vec<FileSummary> =
                check(client.get(format!("{}/files", base)).send().await?)
                    .await?
                    .json()
                    .await?;
            let degraded: Vec<&FileSummary> = files
                .iter()
                .filter(|f| f.status == FileStatus::Degraded)
                .collect();

            println!("Verification report:");
            println!("  Files: {}", files.len());
            println!("  Healthy: {}", files.len() - degraded.len());
            println!("  Degraded: {}", degraded.len());
            for f in &degraded {
                println!("    {} ({})", f.filename, f.internal_id);
            }
            if !degraded.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Turn an error response into an error with the coordinator's message
async fn check(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);
    bail!("{}: {}", status, message)
}

fn status_label(status: FileStatus) -> &'static str {
    match status {
        FileStatus::Committed => "ok",
        FileStatus::Degraded => "DEGRADED",
    }
}

fn format_time(ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upload() {
        let cli = Cli::try_parse_from([
            "shardfs",
            "--coordinator",
            "http://10.0.0.1:8000",
            "upload",
            "report.pdf",
            "--shards",
            "4",
            "--ttl",
            "7d",
        ])
        .unwrap();
        assert_eq!(cli.coordinator, "http://10.0.0.1:8000");
        match cli.command {
            Commands::Upload { shards, ttl, .. } => {
                assert_eq!(shards, Some(4));
                assert_eq!(ttl.as_deref(), Some("7d"));
            }
            _ => panic!("expected upload"),
        }
    }
}
