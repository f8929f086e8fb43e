/// Channel reading freshness checking.
///
/// A sensor that stops reporting is as dangerous as one reporting a leak:
/// the balance detector silently loses coverage. The daemon checks every
/// channel each cycle against its configured staleness threshold.

use chrono::{DateTime, Utc};

/// A freshness alert for one channel.
#[derive(Debug, Clone)]
pub struct StalenessAlert {
    pub channel_id: String,
    /// Seconds since the last reading; `None` when the channel has never
    /// reported.
    pub age_seconds: Option<i64>,
    pub threshold_seconds: i64,
    pub message: String,
}

/// Checks a channel's last reading time against its threshold.
///
/// Returns `None` while the channel is fresh.
pub fn check_freshness(
    channel_id: &str,
    label: &str,
    last_reading_time: Option<DateTime<Utc>>,
    threshold_seconds: i64,
    now: DateTime<Utc>,
) -> Option<StalenessAlert> {
    match last_reading_time {
        None => Some(StalenessAlert {
            channel_id: channel_id.to_string(),
            age_seconds: None,
            threshold_seconds,
            message: format!("{} ({}) has never reported a reading", label, channel_id),
        }),
        Some(last) => {
            let age_seconds = (now - last).num_seconds();
            if age_seconds > threshold_seconds {
                Some(StalenessAlert {
                    channel_id: channel_id.to_string(),
                    age_seconds: Some(age_seconds),
                    threshold_seconds,
                    message: format!(
                        "{} ({}) is silent for {} s (threshold {} s)",
                        label, channel_id, age_seconds, threshold_seconds
                    ),
                })
            } else {
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fresh_channel_is_quiet() {
        let now = Utc::now();
        let alert = check_freshness("s1", "Banheiro", Some(now - Duration::seconds(10)), 300, now);
        assert!(alert.is_none());
    }

    #[test]
    fn test_stale_channel_alerts_with_age() {
        let now = Utc::now();
        let alert = check_freshness("s1", "Banheiro", Some(now - Duration::seconds(400)), 300, now)
            .expect("400 s > 300 s threshold should alert");
        assert_eq!(alert.channel_id, "s1");
        assert_eq!(alert.age_seconds, Some(400));
        assert!(alert.message.contains("silent"), "got: {}", alert.message);
    }

    #[test]
    fn test_never_reported_channel_alerts() {
        let now = Utc::now();
        let alert = check_freshness("s3", "Jardim", None, 300, now)
            .expect("missing channel should alert");
        assert_eq!(alert.age_seconds, None);
        assert!(alert.message.contains("never reported"), "got: {}", alert.message);
    }

    #[test]
    fn test_age_exactly_at_threshold_is_still_fresh() {
        let now = Utc::now();
        let alert = check_freshness("s1", "Banheiro", Some(now - Duration::seconds(300)), 300, now);
        assert!(alert.is_none(), "staleness is strictly greater-than");
    }
}
