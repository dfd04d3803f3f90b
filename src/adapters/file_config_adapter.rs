//! INI file configuration adapter.

use configparser::ini::Ini;
use std::path::Path;
use tracing::debug;

use crate::domain::error::RankwatchError;
use crate::ports::config_port::ConfigPort;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RankwatchError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config
            .load(path)
            .map_err(|reason| RankwatchError::ConfigParse {
                file: path.display().to_string(),
                reason,
            })?;
        debug!(path = %path.display(), sections = config.sections().len(), "loaded config");
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, RankwatchError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| RankwatchError::ConfigParse {
                file: "<string>".to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    /// Override one value, as command-line flags do.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.config.set(section, key, Some(value.to_string()));
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[data]
path = /var/lib/rankwatch/bars
symbols = BTCUSDT, ETHUSDT

[metrics]
window = 30
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("data", "path"),
            Some("/var/lib/rankwatch/bars".to_string())
        );
        assert_eq!(
            adapter.get_string("data", "symbols"),
            Some("BTCUSDT, ETHUSDT".to_string())
        );
        assert_eq!(adapter.get_int("metrics", "window", 20), 30);
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[metrics]\nwindow = 20\n").unwrap();
        assert_eq!(adapter.get_string("metrics", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_non_empty_ignores_blank() {
        let adapter = FileConfigAdapter::from_string("[data]\nsymbols =\n").unwrap();
        assert_eq!(adapter.get_non_empty("data", "symbols"), None);
    }

    #[test]
    fn get_int_falls_back_to_default() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nmax_bars = abc\n").unwrap();
        assert_eq!(adapter.get_int("backtest", "max_bars", 42), 42);
        assert_eq!(adapter.get_int("backtest", "missing", 7), 7);
    }

    #[test]
    fn get_double_returns_value() {
        let adapter = FileConfigAdapter::from_string("[backtest]\ntake_profit = 2.5\n").unwrap();
        assert_eq!(adapter.get_double("backtest", "take_profit", 0.0), 2.5);
        assert_eq!(adapter.get_double("backtest", "stop_loss", 1.5), 1.5);
    }

    #[test]
    fn get_double_returns_default_for_non_numeric() {
        let adapter =
            FileConfigAdapter::from_string("[backtest]\ntake_profit = not_a_number\n").unwrap();
        assert_eq!(adapter.get_double("backtest", "take_profit", 3.0), 3.0);
    }

    #[test]
    fn get_bool_accepts_common_spellings() {
        let adapter = FileConfigAdapter::from_string(
            "[slot_machine]\na = true\nb = yes\nc = 1\nd = false\ne = no\nf = 0\n",
        )
        .unwrap();
        assert!(adapter.get_bool("slot_machine", "a", false));
        assert!(adapter.get_bool("slot_machine", "b", false));
        assert!(adapter.get_bool("slot_machine", "c", false));
        assert!(!adapter.get_bool("slot_machine", "d", true));
        assert!(!adapter.get_bool("slot_machine", "e", true));
        assert!(!adapter.get_bool("slot_machine", "f", true));
        assert!(adapter.get_bool("slot_machine", "missing", true));
    }

    #[test]
    fn set_overrides_value() {
        let mut adapter = FileConfigAdapter::from_string("[data]\ntimeframe = 1h\n").unwrap();
        adapter.set("data", "timeframe", "4h");
        adapter.set("backtest", "direction", "long");
        assert_eq!(adapter.get_string("data", "timeframe"), Some("4h".to_string()));
        assert_eq!(adapter.get_string("backtest", "direction"), Some("long".to_string()));
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[sqlite]\npath = /tmp/rankwatch.db\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("sqlite", "path"),
            Some("/tmp/rankwatch.db".to_string())
        );
    }

    #[test]
    fn from_file_missing_is_parse_error() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        match result {
            Err(RankwatchError::ConfigParse { file, .. }) => {
                assert_eq!(file, "/nonexistent/path/config.ini")
            }
            Err(other) => panic!("expected ConfigParse, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }
}
