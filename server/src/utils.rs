use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Number of whole ticks needed to cover `total`, never less than one
pub fn ticks_covering(total: Duration, tick: Duration) -> u64 {
    let tick_ms = tick.as_millis().max(1);
    let total_ms = total.as_millis();
    (total_ms.div_ceil(tick_ms)).max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_monotonic_enough() {
        let first = get_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        assert!(get_timestamp() > first);
    }

    #[test]
    fn test_ticks_covering_rounds_up() {
        let tick = Duration::from_secs(5);
        assert_eq!(ticks_covering(Duration::from_secs(20), tick), 4);
        assert_eq!(ticks_covering(Duration::from_secs(21), tick), 5);
        assert_eq!(ticks_covering(Duration::from_millis(1), tick), 1);
        assert_eq!(ticks_covering(Duration::ZERO, tick), 1);
    }
}
