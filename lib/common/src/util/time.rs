use std::{
    fmt::Write,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Pretty-print the elapsed time (used in progress bars)
pub fn elapsed_subsec(state: &indicatif::ProgressState, writer: &mut dyn Write) {
    let seconds = state.elapsed().as_secs();
    let sub_seconds = (state.elapsed().as_millis() % 1000) / 100;
    let _ = writer.write_str(&format!("{}.{}s", seconds, sub_seconds));
}

/// Pretty-print a duration using the largest unit that keeps it readable
/// (used in logs and diagnostics)
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();

    match seconds {
        0 => match duration.as_millis() {
            0 => format!("{:.3}μs", duration.as_nanos() as f64 / 1_000.0),
            millis => format!("{}ms", millis),
        },
        1..=59 => format!("{:.3}s", duration.as_secs_f64()),
        60..=3_599 => format!("{:.3}m", seconds as f64 / 60.0),
        3_600..=86_399 => format!("{:.3}h", seconds as f64 / 3_600.0),
        _ => format!("{:.3}d", seconds as f64 / 86_400.0),
    }
}

/// Returns the current time in nanoseconds since the UNIX epoch, or zero when the
/// system clock reads earlier than the epoch.
pub fn now_as_u64() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}

pub fn elapsed_duration_since(start_time: u64) -> Duration {
    Duration::from_nanos(now_as_u64().saturating_sub(start_time))
}

#[cfg(test)]
mod time_tests {
    use super::*;

    #[test]
    fn formats_each_unit() {
        assert_eq!(format_duration(Duration::from_nanos(1_500)), "1.500μs");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(2_500)), "2.500s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.500m");
        assert_eq!(format_duration(Duration::from_secs(5_400)), "1.500h");
        assert_eq!(format_duration(Duration::from_secs(129_600)), "1.500d");
    }

    #[test]
    fn elapsed_never_underflows() {
        let future = now_as_u64() + 60_000_000_000;
        assert_eq!(elapsed_duration_since(future), Duration::ZERO);
    }
}
