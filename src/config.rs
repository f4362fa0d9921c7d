use crate::payload::validate_scale_factor;

/// Application configuration loaded from environment variables.
///
/// Defaults point at a conversion/analysis service running locally.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub conversion_url: String,
    pub analysis_url: String,
    pub request_timeout_secs: u64,
    /// Initial pixels-per-millivolt shown in the form.
    pub pixels_per_mv: f64,
    /// Upper bound on points drawn per lead in the preview.
    pub preview_points: usize,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} is not a valid {expected}: {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            conversion_url: "http://127.0.0.1:8000/convert".into(),
            analysis_url: "http://127.0.0.1:8000/analyze".into(),
            request_timeout_secs: 120,
            pixels_per_mv: 20.0,
            preview_points: 1500,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                    | Default                          |
    /// |----------------------------|----------------------------------|
    /// | `ECG_CONVERSION_URL`       | `http://127.0.0.1:8000/convert`  |
    /// | `ECG_ANALYSIS_URL`         | `http://127.0.0.1:8000/analyze`  |
    /// | `ECG_REQUEST_TIMEOUT_SECS` | `120` (at least 1)               |
    /// | `ECG_PIXELS_PER_MV`        | `20` (at least 5)                |
    /// | `ECG_PREVIEW_POINTS`       | `1500`                           |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let conversion_url = lookup("ECG_CONVERSION_URL").unwrap_or(defaults.conversion_url);
        let analysis_url = lookup("ECG_ANALYSIS_URL").unwrap_or(defaults.analysis_url);

        let request_timeout_secs = match lookup("ECG_REQUEST_TIMEOUT_SECS") {
            Some(v) => {
                let secs: u64 = parse(&v, "ECG_REQUEST_TIMEOUT_SECS", "u64")?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        var: "ECG_REQUEST_TIMEOUT_SECS",
                        expected: "number of seconds >= 1",
                        value: v,
                    });
                }
                secs
            }
            None => defaults.request_timeout_secs,
        };

        let pixels_per_mv = match lookup("ECG_PIXELS_PER_MV") {
            Some(v) => {
                let parsed: f64 = parse(&v, "ECG_PIXELS_PER_MV", "number")?;
                validate_scale_factor(parsed).map_err(|_| ConfigError::Invalid {
                    var: "ECG_PIXELS_PER_MV",
                    expected: "number >= 5",
                    value: v,
                })?
            }
            None => defaults.pixels_per_mv,
        };

        let preview_points = match lookup("ECG_PREVIEW_POINTS") {
            Some(v) => parse(&v, "ECG_PREVIEW_POINTS", "usize")?,
            None => defaults.preview_points,
        };

        Ok(Self {
            conversion_url,
            analysis_url,
            request_timeout_secs,
            pixels_per_mv,
            preview_points,
        })
    }
}

fn parse<T: std::str::FromStr>(
    value: &str,
    var: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        expected,
        value: value.to_string(),
    })
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(AppConfig::from_lookup(lookup(&[])).unwrap(), AppConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ECG_CONVERSION_URL", "http://ecg.local/convert"),
            ("ECG_REQUEST_TIMEOUT_SECS", " 30 "),
            ("ECG_PIXELS_PER_MV", "12.5"),
            ("ECG_PREVIEW_POINTS", "800"),
        ]))
        .unwrap();
        assert_eq!(config.conversion_url, "http://ecg.local/convert");
        assert_eq!(config.analysis_url, AppConfig::default().analysis_url);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.pixels_per_mv, 12.5);
        assert_eq!(config.preview_points, 800);
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = AppConfig::from_lookup(lookup(&[("ECG_PREVIEW_POINTS", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "ECG_PREVIEW_POINTS", .. }));

        let err = AppConfig::from_lookup(lookup(&[("ECG_PIXELS_PER_MV", "4")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "ECG_PIXELS_PER_MV", .. }));
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = AppConfig::from_lookup(lookup(&[("ECG_REQUEST_TIMEOUT_SECS", "0")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "ECG_REQUEST_TIMEOUT_SECS",
                expected: "number of seconds >= 1",
                value: "0".into(),
            }
        );
        let config =
            AppConfig::from_lookup(lookup(&[("ECG_REQUEST_TIMEOUT_SECS", "1")])).unwrap();
        assert_eq!(config.request_timeout_secs, 1);
    }
}
