use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::config::CONFIG;

static RATE_LIMITS: Lazy<Mutex<HashMap<i64, Instant>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn is_rate_limited(user_id: i64) -> bool {
    check_rate_limit(
        &mut RATE_LIMITS.lock(),
        user_id,
        Instant::now(),
        Duration::from_secs(CONFIG.rate_limit_seconds),
    )
}

fn check_rate_limit(
    limits: &mut HashMap<i64, Instant>,
    user_id: i64,
    now: Instant,
    window: Duration,
) -> bool {
    if let Some(last) = limits.get(&user_id) {
        if now.duration_since(*last) < window {
            return true;
        }
    }

    limits.insert(user_id, now);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_request_inside_window_is_limited() {
        let mut limits = HashMap::new();
        let start = Instant::now();
        let window = Duration::from_secs(10);

        assert!(!check_rate_limit(&mut limits, 7, start, window));
        assert!(check_rate_limit(&mut limits, 7, start + Duration::from_secs(3), window));
        assert!(!check_rate_limit(&mut limits, 8, start + Duration::from_secs(3), window));
        assert!(!check_rate_limit(&mut limits, 7, start + Duration::from_secs(11), window));
    }

    #[test]
    fn zero_window_never_limits() {
        let mut limits = HashMap::new();
        let now = Instant::now();
        assert!(!check_rate_limit(&mut limits, 1, now, Duration::ZERO));
        assert!(!check_rate_limit(&mut limits, 1, now, Duration::ZERO));
    }
}
