#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as unix milliseconds.
pub fn unix_ms_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or(0)
}

/// Format unix milliseconds as a `HH:MM:SS` UTC clock string for display.
pub fn clock_hms_utc(unix_ms: u64) -> String {
	let secs_of_day = (unix_ms / 1_000) % 86_400;
	let h = secs_of_day / 3_600;
	let m = (secs_of_day % 3_600) / 60;
	let s = secs_of_day % 60;
	format!("{h:02}:{m:02}:{s:02}")
}
