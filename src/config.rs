use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::clock;
use crate::model::{Minutes, Span};

/// Runtime settings. Every field has a default; [`Config::from_env`] reads
/// `TEETIME_*` overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(with = "clock::hhmm")]
    pub open: Minutes,
    #[serde(with = "clock::hhmm")]
    pub close: Minutes,
    pub slot_minutes: Minutes,
    pub seed: Option<PathBuf>,
    pub refresh_secs: u64,
    pub metrics_port: Option<u16>,
    /// Name stamped into `reviewed_by` / `cancelled_by`.
    pub staff: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            open: 6 * 60,
            close: 22 * 60,
            slot_minutes: 30,
            seed: None,
            refresh_secs: 60,
            metrics_port: None,
            staff: "staff".into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; invalid values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Config::default();

        if let Some(m) = parse_with(&lookup, "TEETIME_OPEN", clock::parse_clock) {
            cfg.open = m;
        }
        if let Some(m) = parse_with(&lookup, "TEETIME_CLOSE", clock::parse_clock) {
            cfg.close = m;
        }
        if cfg.open >= cfg.close {
            warn!(
                "TEETIME_OPEN {} is not before TEETIME_CLOSE {}, using defaults",
                clock::format_clock(cfg.open),
                clock::format_clock(cfg.close)
            );
            let d = Config::default();
            cfg.open = d.open;
            cfg.close = d.close;
        }
        if let Some(n) = parse_with(&lookup, "TEETIME_SLOT_MINUTES", |s| {
            s.parse::<Minutes>().ok().filter(|n| (1..=clock::MINUTES_PER_DAY).contains(n))
        }) {
            cfg.slot_minutes = n;
        }
        if let Some(n) = parse_with(&lookup, "TEETIME_REFRESH_SECS", |s| {
            s.parse::<u64>().ok().filter(|n| *n > 0)
        }) {
            cfg.refresh_secs = n;
        }
        cfg.metrics_port = parse_with(&lookup, "TEETIME_METRICS_PORT", |s| s.parse().ok());
        cfg.seed = lookup("TEETIME_SEED").filter(|s| !s.is_empty()).map(PathBuf::from);
        if let Some(staff) = lookup("TEETIME_STAFF").filter(|s| !s.trim().is_empty()) {
            cfg.staff = staff.trim().to_string();
        }
        cfg
    }

    pub fn business_hours(&self) -> Span {
        Span::try_new(self.open, self.close).unwrap_or(Span::new(6 * 60, 22 * 60))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

fn parse_with<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!("ignoring invalid {key}={raw:?}");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.business_hours(), Span::new(360, 1320));
        assert_eq!(cfg.refresh_interval(), Duration::from_secs(60));
    }

    #[test]
    fn overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("TEETIME_OPEN", "07:30"),
            ("TEETIME_CLOSE", "23:00"),
            ("TEETIME_SLOT_MINUTES", "15"),
            ("TEETIME_METRICS_PORT", "9100"),
            ("TEETIME_STAFF", " front desk "),
            ("TEETIME_SEED", "seed.json"),
        ]));
        assert_eq!(cfg.business_hours(), Span::new(450, 1380));
        assert_eq!(cfg.slot_minutes, 15);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.staff, "front desk");
        assert_eq!(cfg.seed, Some(PathBuf::from("seed.json")));
    }

    #[test]
    fn invalid_values_fall_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("TEETIME_OPEN", "25:00"),
            ("TEETIME_SLOT_MINUTES", "0"),
            ("TEETIME_REFRESH_SECS", "soon"),
        ]));
        assert_eq!(cfg.open, 360);
        assert_eq!(cfg.slot_minutes, 30);
        assert_eq!(cfg.refresh_secs, 60);

        let cfg = Config::from_lookup(lookup(&[("TEETIME_SLOT_MINUTES", "1441")]));
        assert_eq!(cfg.slot_minutes, 30);
        let cfg = Config::from_lookup(lookup(&[("TEETIME_SLOT_MINUTES", "1440")]));
        assert_eq!(cfg.slot_minutes, 1440);
    }

    #[test]
    fn inverted_hours_reset_both_bounds() {
        let cfg = Config::from_lookup(lookup(&[("TEETIME_OPEN", "20:00"), ("TEETIME_CLOSE", "08:00")]));
        assert_eq!((cfg.open, cfg.close), (360, 1320));
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: Config = serde_json::from_str(r#"{"open":"08:00","staff":"pro shop"}"#).unwrap();
        assert_eq!(cfg.open, 480);
        assert_eq!(cfg.close, 1320);
        assert_eq!(cfg.staff, "pro shop");
    }
}
