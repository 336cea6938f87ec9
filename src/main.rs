use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Context};
use asrstream::{
	client::ConnectionManager, config::AsrConfig, pin_callback, session::format_duration, session::UsageTracker,
};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
	/// Configuration file, overridden by `ASR_` environment variables
	#[arg(short, long)]
	config: Option<String>,

	/// Log protocol details
	#[arg(short, long)]
	verbose: bool,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Stream an audio file and print the transcript
	Recognize {
		file: PathBuf,

		/// Bytes per audio frame. Defaults to 200ms of audio.
		#[arg(long)]
		chunk_size: Option<usize>,

		/// Milliseconds to wait between frames, 0 streams as fast as possible
		#[arg(long, default_value_t = 200)]
		interval_ms: u64,

		/// Seconds to wait for the final result after the last frame
		#[arg(long, default_value_t = 30)]
		timeout: u64,
	},
	/// Show usage statistics
	Stats {
		/// Number of days to list
		#[arg(long, default_value_t = 7)]
		days: u32,

		/// Also write every recorded day to a csv file
		#[arg(long)]
		export: Option<PathBuf>,
	},
}

enum Outcome {
	Final(String),
	Closed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	let level = match cli.verbose {
		true => LevelFilter::DEBUG,
		false => LevelFilter::INFO,
	};
	tracing_subscriber::fmt().with_max_level(level).init();

	let config = AsrConfig::load(cli.config.as_deref()).context("could not load configuration")?;

	match cli.command {
		Commands::Recognize {
			file,
			chunk_size,
			interval_ms,
			timeout,
		} => recognize(config, file, chunk_size, Duration::from_millis(interval_ms), Duration::from_secs(timeout)).await,
		Commands::Stats { days, export } => stats(config, days, export),
	}
}

async fn recognize(
	config: AsrConfig,
	file: PathBuf,
	chunk_size: Option<usize>,
	interval: Duration,
	wait: Duration,
) -> anyhow::Result<()> {
	let audio = tokio::fs::read(&file)
		.await
		.with_context(|| format!("could not read {}", file.display()))?;
	if audio.is_empty() {
		bail!("{} is empty", file.display());
	}

	let chunk_size = chunk_size.unwrap_or_else(|| {
		let format = &config.audio;
		(format.sample_rate as usize * format.bits as usize / 8 * format.channels as usize / 5).max(1)
	});

	let (outcome, mut outcomes) = unbounded_channel();
	let (done, closed) = (outcome.clone(), outcome);
	let manager = ConnectionManager::builder(config)
		.on_partial_result(|text: String| {
			pin_callback!({
				info!("partial: {}", text);
			})
		})
		.on_final_result(move |text: String, _: Option<f64>| {
			let done = done.clone();
			pin_callback!({
				let _ = done.send(Outcome::Final(text));
			})
		})
		.on_close(move || {
			let closed = closed.clone();
			pin_callback!({
				let _ = closed.send(Outcome::Closed);
			})
		})
		.build();

	manager.connect().await?;
	info!("streaming {} ({} bytes, {} byte frames)", file.display(), audio.len(), chunk_size);

	let streaming = stream_file(&manager, &audio, chunk_size, interval);
	#[cfg(feature = "signals")]
	let streaming = async {
		tokio::select! {
			result = streaming => result,
			_ = tokio::signal::ctrl_c() => {
				warn!("interrupted, closing the session");
				Err(anyhow!("interrupted"))
			}
		}
	};
	let streamed = streaming.await;

	let transcript = match streamed {
		Ok(()) => match tokio::time::timeout(wait, outcomes.recv()).await {
			Ok(Some(Outcome::Final(text))) => Some(text),
			Ok(Some(Outcome::Closed)) | Ok(None) => None,
			Err(_) => {
				warn!("no final result within {:?}", wait);
				None
			},
		},
		Err(_) => None,
	};

	manager.disconnect().await;
	let usage = manager.usage().clone();
	match tokio::task::spawn_blocking(move || usage.save()).await {
		Ok(Ok(())) => {},
		Ok(Err(e)) => warn!("could not save usage statistics: {}", e),
		Err(e) => warn!("usage statistics save task failed: {}", e),
	}

	if let Some(session) = manager.session() {
		if let Some(error) = session.last_error() {
			bail!("recognition failed: {}", error);
		}
	}
	streamed?;

	match transcript {
		Some(text) => println!("{}", text),
		None => bail!("the session ended without a final result"),
	}
	Ok(())
}

async fn stream_file(manager: &ConnectionManager, audio: &[u8], chunk_size: usize, interval: Duration) -> anyhow::Result<()> {
	let chunks = audio.chunks(chunk_size).count();
	for (index, chunk) in audio.chunks(chunk_size).enumerate() {
		let is_last = index + 1 == chunks;
		manager.send_audio(chunk.to_vec(), is_last).await?;
		if !is_last && !interval.is_zero() {
			tokio::time::sleep(interval).await;
		}
	}
	Ok(())
}

fn stats(config: AsrConfig, days: u32, export: Option<PathBuf>) -> anyhow::Result<()> {
	let Some(path) = config.stats.path else {
		bail!("no statistics file configured, set stats.path or ASR_STATS__PATH");
	};
	let stats = UsageTracker::open(path, false).snapshot();

	println!("{}", stats.summary());
	for (date, day) in stats.recent(days) {
		println!("{}  {:>3} sessions  {}", date, day.session_count, format_duration(day.total_duration_seconds));
	}

	if let Some(export) = export {
		stats
			.export_csv(&export)
			.with_context(|| format!("could not export to {}", export.display()))?;
		info!("exported usage to {}", export.display());
	}
	Ok(())
}
