use std::{
	collections::BTreeMap,
	fmt::Write as _,
	io::Write as _,
	path::{Path, PathBuf},
	sync::{Arc, Mutex, MutexGuard},
};

use chrono::{Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::state::Session;
use crate::errors::StatsError;

const CSV_HEADER: &str = "date,duration_seconds,session_count";

/// Usage accumulated on one local date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DailyUsage {
	pub session_count: u32,
	pub total_duration_seconds: u64,
}

impl DailyUsage {
	pub fn formatted_duration(&self) -> String { format_duration(self.total_duration_seconds) }
}

/// Aggregate over every recorded date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageTotals {
	pub days: usize,
	pub session_count: u32,
	pub total_duration_seconds: u64,
}

/// Per-day usage records, keyed by date.
///
/// Persisted as a JSON object mapping `YYYY-MM-DD` to a [DailyUsage].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageStats {
	days: BTreeMap<NaiveDate, DailyUsage>,
}

impl UsageStats {
	pub fn new() -> Self { Self::default() }

	/// Adds one session of `duration_seconds` to `date`.
	pub fn record(&mut self, date: NaiveDate, duration_seconds: u64) {
		let day = self.days.entry(date).or_default();
		day.session_count += 1;
		day.total_duration_seconds += duration_seconds;
	}

	/// Usage on `date`, zero when nothing was recorded.
	pub fn day(&self, date: NaiveDate) -> DailyUsage { self.days.get(&date).copied().unwrap_or_default() }

	pub fn today(&self) -> DailyUsage { self.day(Local::now().date_naive()) }

	/// The last `days` days up to and including today, oldest first.
	pub fn recent(&self, days: u32) -> Vec<(NaiveDate, DailyUsage)> { self.recent_from(Local::now().date_naive(), days) }

	pub fn recent_from(&self, today: NaiveDate, days: u32) -> Vec<(NaiveDate, DailyUsage)> {
		(0..days)
			.rev()
			.filter_map(|offset| today.checked_sub_days(Days::new(offset as u64)))
			.map(|date| (date, self.day(date)))
			.collect()
	}

	pub fn total(&self) -> UsageTotals {
		self.days.values().fold(
			UsageTotals {
				days: self.days.len(),
				..Default::default()
			},
			|mut totals, day| {
				totals.session_count += day.session_count;
				totals.total_duration_seconds += day.total_duration_seconds;
				totals
			},
		)
	}

	/// Iterates over the recorded dates in ascending order.
	pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &DailyUsage)> { self.days.iter() }

	pub fn is_empty(&self) -> bool { self.days.is_empty() }

	/// Short human readable report of today's and the overall usage.
	pub fn summary(&self) -> String {
		let today = self.today();
		let total = self.total();
		format!(
			"today: {} in {} sessions | total: {} in {} sessions over {} days",
			today.formatted_duration(),
			today.session_count,
			format_duration(total.total_duration_seconds),
			total.session_count,
			total.days
		)
	}

	/// `date,duration_seconds,session_count` rows in date order, with a header.
	pub fn to_csv(&self) -> String {
		let mut csv = String::from(CSV_HEADER);
		csv.push('\n');
		for (date, day) in &self.days {
			let _ = writeln!(csv, "{},{},{}", date, day.total_duration_seconds, day.session_count);
		}
		csv
	}

	pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<(), StatsError> {
		write_atomically(path.as_ref(), self.to_csv().as_bytes())
	}

	/// Loads statistics from `path`. A missing file yields empty statistics.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, StatsError> {
		let path = path.as_ref();
		match std::fs::read(path) {
			Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!("no usage statistics at {}, starting empty", path.display());
				Ok(Self::default())
			},
			Err(e) => Err(e.into()),
		}
	}

	/// Writes the statistics to a temporary file next to `path`, then renames
	/// it over `path`.
	pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StatsError> {
		let json = serde_json::to_vec_pretty(self)?;
		write_atomically(path.as_ref(), &json)
	}
}

/// Formats seconds as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_duration(seconds: u64) -> String {
	format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

/// Writes `contents` to a uniquely named file in the target directory and
/// renames it over `path`, so readers never see a partial file.
fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), StatsError> {
	let dir = match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
		Some(parent) => {
			std::fs::create_dir_all(parent)?;
			parent
		},
		None => Path::new("."),
	};

	let mut temp = NamedTempFile::new_in(dir)?;
	temp.write_all(contents)?;
	temp.as_file().sync_all()?;
	temp.persist(path).map_err(|e| e.error)?;
	Ok(())
}

/// `<path>.corrupt`, where unreadable statistics are moved aside.
fn quarantine_path(path: &Path) -> PathBuf {
	let mut quarantine = path.as_os_str().to_owned();
	quarantine.push(".corrupt");
	PathBuf::from(quarantine)
}

/// Shared, lock-guarded [UsageStats] with optional persistence.
///
/// Only the tracker mutates the statistics; everything else reads snapshots.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
	stats: Arc<Mutex<UsageStats>>,
	/// Serializes writers so the file always ends up with the newest snapshot.
	save_lock: Arc<Mutex<()>>,
	path: Option<PathBuf>,
	autosave: bool,
}

impl UsageTracker {
	/// In-memory tracker, nothing is persisted.
	pub fn in_memory() -> Self { Self::default() }

	/// Loads the statistics stored at `path`. Unreadable statistics are logged
	/// and replaced with empty ones, so a corrupt file never blocks recognition.
	///
	/// A file that is not valid JSON is renamed to `<path>.corrupt` first, so
	/// the next save cannot overwrite it.
	pub fn open(path: impl Into<PathBuf>, autosave: bool) -> Self {
		let path = path.into();
		let stats = match UsageStats::load(&path) {
			Ok(stats) => stats,
			Err(StatsError::Json(e)) => {
				let quarantine = quarantine_path(&path);
				match std::fs::rename(&path, &quarantine) {
					Ok(()) => warn!("usage statistics at {} are corrupt ({}), moved to {}", path.display(), e, quarantine.display()),
					Err(io) => warn!("usage statistics at {} are corrupt ({}) and could not be moved: {}", path.display(), e, io),
				}
				UsageStats::default()
			},
			Err(e) => {
				warn!("could not load usage statistics from {}: {}", path.display(), e);
				UsageStats::default()
			},
		};

		Self {
			stats: Arc::new(Mutex::new(stats)),
			save_lock: Arc::default(),
			path: Some(path),
			autosave,
		}
	}

	/// Adds a finished session to the statistics. Sessions that never reached
	/// streaming are ignored. Returns whether the session was recorded.
	///
	/// Nothing is written here, see [UsageTracker::autosave].
	pub fn archive(&self, session: &Session) -> bool {
		let Some(duration) = session.duration_seconds().filter(|_| session.reached_streaming()) else {
			debug!("session {} not archived", session.id());
			return false;
		};

		self.lock().record(session.connect_time().date_naive(), duration);
		info!("archived session {} ({}s)", session.id(), duration);
		true
	}

	/// Saves on a blocking thread when the tracker was opened with autosave.
	/// Failures are logged, never returned.
	pub(crate) async fn autosave(&self) {
		if !self.autosave || self.path.is_none() {
			return;
		}

		let tracker = self.clone();
		match tokio::task::spawn_blocking(move || tracker.save()).await {
			Ok(Ok(())) => {},
			Ok(Err(e)) => warn!("could not save usage statistics: {}", e),
			Err(e) => warn!("usage statistics save task failed: {}", e),
		}
	}

	/// Persists the statistics, if a path is configured. Blocks on file i/o.
	pub fn save(&self) -> Result<(), StatsError> {
		let Some(path) = &self.path else {
			return Ok(());
		};

		let _guard = self.save_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		let snapshot = self.snapshot();
		snapshot.save(path)?;
		debug!("saved usage statistics to {}", path.display());
		Ok(())
	}

	pub fn snapshot(&self) -> UsageStats { self.lock().clone() }

	pub fn path(&self) -> Option<&Path> { self.path.as_deref() }

	fn lock(&self) -> MutexGuard<'_, UsageStats> { self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) }
}

#[cfg(test)]
mod tests {
	use chrono::{Duration, TimeZone};
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::session::SessionStateMachine;

	fn date(y: i32, m: u32, d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(y, m, d).unwrap() }

	fn finished_session(seconds: i64, stream: bool) -> Session {
		let start = Local.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
		let mut machine = SessionStateMachine::new();
		machine.begin_connect_at(start).unwrap();
		machine.transport_open().unwrap();
		if !stream {
			return machine.fail_at("refused", start + Duration::seconds(seconds)).unwrap();
		}
		machine.handshake_accepted().unwrap();
		machine.begin_close().unwrap();
		machine.closed_at(start + Duration::seconds(seconds)).unwrap()
	}

	#[test]
	fn three_sessions_survive_a_reload() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("usage.json");

		let tracker = UsageTracker::open(&path, false);
		for seconds in [2, 3, 4] {
			assert!(tracker.archive(&finished_session(seconds, true)));
		}
		tracker.save().unwrap();

		let reloaded = UsageStats::load(&path).unwrap();
		assert_eq!(
			reloaded.day(date(2024, 3, 5)),
			DailyUsage {
				session_count: 3,
				total_duration_seconds: 9
			}
		);
		assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
	}

	#[test]
	fn concurrent_saves_keep_the_newest_snapshot() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("usage.json");
		let tracker = UsageTracker::open(&path, false);

		std::thread::scope(|scope| {
			for _ in 0..8 {
				let tracker = tracker.clone();
				scope.spawn(move || {
					for _ in 0..50 {
						tracker.archive(&finished_session(1, true));
						tracker.save().unwrap();
					}
				});
			}
		});

		let stored = UsageStats::load(&path).unwrap();
		assert_eq!(stored, tracker.snapshot());
		assert_eq!(
			stored.day(date(2024, 3, 5)),
			DailyUsage {
				session_count: 400,
				total_duration_seconds: 400
			}
		);
		assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
	}

	#[test]
	fn sessions_without_streaming_are_not_archived() {
		let tracker = UsageTracker::in_memory();
		assert!(!tracker.archive(&finished_session(5, false)));
		assert!(tracker.snapshot().is_empty());
	}

	#[tokio::test]
	async fn autosave_writes_after_each_session() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("usage.json");

		let tracker = UsageTracker::open(&path, true);
		tracker.archive(&finished_session(7, true));
		assert!(!path.exists());

		tracker.autosave().await;
		let stored = UsageStats::load(&path).unwrap();
		assert_eq!(stored.total().total_duration_seconds, 7);

		let manual = UsageTracker::open(dir.path().join("manual.json"), false);
		manual.archive(&finished_session(3, true));
		manual.autosave().await;
		assert!(!dir.path().join("manual.json").exists());
	}

	#[test]
	fn recent_days_are_zero_filled_oldest_first() {
		let mut stats = UsageStats::new();
		stats.record(date(2024, 3, 5), 60);
		stats.record(date(2024, 3, 3), 30);
		stats.record(date(2024, 2, 1), 10);

		let recent = stats.recent_from(date(2024, 3, 5), 3);
		assert_eq!(
			recent,
			vec![
				(date(2024, 3, 3), DailyUsage {
					session_count: 1,
					total_duration_seconds: 30
				}),
				(date(2024, 3, 4), DailyUsage::default()),
				(date(2024, 3, 5), DailyUsage {
					session_count: 1,
					total_duration_seconds: 60
				}),
			]
		);

		assert_eq!(
			stats.total(),
			UsageTotals {
				days: 3,
				session_count: 3,
				total_duration_seconds: 100
			}
		);
	}

	#[test]
	fn csv_export() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("usage.csv");

		let mut stats = UsageStats::new();
		stats.record(date(2024, 3, 5), 65);
		stats.record(date(2024, 3, 5), 10);
		stats.record(date(2024, 3, 1), 3);
		stats.export_csv(&path).unwrap();

		assert_eq!(
			std::fs::read_to_string(&path).unwrap(),
			"date,duration_seconds,session_count\n2024-03-01,3,1\n2024-03-05,75,2\n"
		);
	}

	#[test]
	fn persisted_format_is_keyed_by_date() {
		let mut stats = UsageStats::new();
		stats.record(date(2024, 3, 5), 9);

		let json = serde_json::to_string(&stats).unwrap();
		assert_eq!(json, r#"{"2024-03-05":{"session_count":1,"total_duration_seconds":9}}"#);
	}

	#[test]
	fn missing_file_loads_empty_and_corrupt_file_errors() {
		let dir = tempfile::tempdir().unwrap();
		assert!(UsageStats::load(dir.path().join("absent.json")).unwrap().is_empty());

		let corrupt = dir.path().join("corrupt.json");
		std::fs::write(&corrupt, "[1, 2").unwrap();
		assert!(matches!(UsageStats::load(&corrupt), Err(StatsError::Json(_))));
	}

	#[test]
	fn corrupt_file_is_moved_aside_on_open() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("usage.json");
		std::fs::write(&path, "{\"2024-03-05\": oops").unwrap();

		let tracker = UsageTracker::open(&path, false);
		assert!(tracker.snapshot().is_empty());
		assert!(!path.exists());

		let quarantined = dir.path().join("usage.json.corrupt");
		assert_eq!(std::fs::read_to_string(&quarantined).unwrap(), "{\"2024-03-05\": oops");

		tracker.archive(&finished_session(4, true));
		tracker.save().unwrap();
		assert_eq!(UsageStats::load(&path).unwrap().total().total_duration_seconds, 4);
		assert_eq!(std::fs::read_to_string(&quarantined).unwrap(), "{\"2024-03-05\": oops");
	}

	#[test]
	fn durations_format_as_clock_time() {
		assert_eq!(format_duration(0), "00:00:00");
		assert_eq!(format_duration(3_725), "01:02:05");
		assert_eq!(format_duration(90_000), "25:00:00");
	}
}
