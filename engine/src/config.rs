//! Migration engine configuration file loader.
//!
//! A flat `key=value` file, one assignment per line, blank lines and `#`
//! comments skipped, parsed into a `HashMap` first and then pulled apart
//! by typed getters that each report their own `String` error.
use std::collections::HashMap;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use crate::group::GroupKind;

/// Whether sources are dialed as live replication links or read as local
/// RDB files — independent of `target_kind`, since a file-backed source
/// can still migrate into any target topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Socket,
    RdbFile,
}

#[derive(Debug, Clone)]
pub struct Config {
    source_kind: SourceKind,
    source_addrs: Vec<SocketAddr>,
    source_paths: Vec<PathBuf>,
    target_addrs: Vec<SocketAddr>,
    target_paths: Vec<PathBuf>,
    target_kind: GroupKind,
    thread_count: usize,
    noreply: bool,
    source_safe: bool,
    listen_proxy: Option<SocketAddr>,
    log_file: String,
    mbuf_size: usize,
    segment_pool_size: usize,
    reconnect_interval: Duration,
    source_timeout: Duration,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, String> {
        let lines = Self::read_lines_from_file(path)?;
        let map = Self::parse_key_value_lines(lines)?;

        let source_kind = Self::parse_source_kind(&map)?;
        let (source_addrs, source_paths) = match source_kind {
            SourceKind::Socket => (Self::get_addr_list(&map, "source")?, Vec::new()),
            SourceKind::RdbFile => (Vec::new(), Self::get_path_list(&map, "source")?),
        };
        let target_kind = Self::get_group_kind(&map)?;
        let (target_addrs, target_paths) = match target_kind {
            GroupKind::RdbFile => (Vec::new(), Self::get_path_list(&map, "target")?),
            GroupKind::Single | GroupKind::Cluster => (Self::get_addr_list(&map, "target")?, Vec::new()),
        };

        Ok(Config {
            source_kind,
            source_addrs,
            source_paths,
            target_addrs,
            target_paths,
            target_kind,
            thread_count: Self::get_usize(&map, "thread")?,
            noreply: Self::get_bool(&map, "noreply").unwrap_or(false),
            source_safe: Self::get_bool(&map, "source_safe").unwrap_or(false),
            listen_proxy: Self::get_optional_addr(&map, "listen_proxy")?,
            log_file: Self::get(&map, "log_file")?,
            mbuf_size: Self::get_usize(&map, "mbuf_size").unwrap_or(16 * 1024),
            segment_pool_size: Self::get_usize(&map, "segment_pool_size").unwrap_or(2048),
            reconnect_interval: Duration::from_millis(
                Self::get_u64(&map, "reconnect_interval_ms").unwrap_or(1000),
            ),
            source_timeout: Duration::from_millis(
                Self::get_u64(&map, "source_timeout_ms").unwrap_or(60_000),
            ),
        })
    }

    pub fn get_source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn get_source_addrs(&self) -> &[SocketAddr] {
        &self.source_addrs
    }

    pub fn get_source_paths(&self) -> &[PathBuf] {
        &self.source_paths
    }

    pub fn get_target_addrs(&self) -> &[SocketAddr] {
        &self.target_addrs
    }

    pub fn get_target_paths(&self) -> &[PathBuf] {
        &self.target_paths
    }

    pub fn get_target_kind(&self) -> GroupKind {
        self.target_kind
    }

    pub fn get_thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn get_noreply(&self) -> bool {
        self.noreply
    }

    pub fn get_source_safe(&self) -> bool {
        self.source_safe
    }

    pub fn get_listen_proxy(&self) -> Option<SocketAddr> {
        self.listen_proxy
    }

    pub fn get_log_file(&self) -> &str {
        &self.log_file
    }

    pub fn get_mbuf_size(&self) -> usize {
        self.mbuf_size
    }

    pub fn get_segment_pool_size(&self) -> usize {
        self.segment_pool_size
    }

    pub fn get_reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    pub fn get_source_timeout(&self) -> Duration {
        self.source_timeout
    }

    // private helpers

    fn read_lines_from_file(path: &str) -> Result<Vec<String>, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("error reading config file '{path}': {e}"))?;
        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
            .map(|line| line.to_string())
            .collect())
    }

    fn parse_key_value_lines(lines: Vec<String>) -> Result<HashMap<String, String>, String> {
        let mut map = HashMap::new();
        for line in lines {
            match line.split_once('=') {
                Some((key, value)) => {
                    map.insert(key.trim().to_string(), value.trim().to_string());
                }
                None => return Err(format!("malformed config line: {line}")),
            }
        }
        Ok(map)
    }

    fn get(map: &HashMap<String, String>, key: &str) -> Result<String, String> {
        map.get(key)
            .cloned()
            .ok_or_else(|| format!("missing required config field: '{key}'"))
    }

    fn get_usize(map: &HashMap<String, String>, key: &str) -> Result<usize, String> {
        let raw = Self::get(map, key)?;
        raw.parse::<usize>()
            .map_err(|_| format!("could not parse '{key}' (\"{raw}\") as usize"))
    }

    fn get_u64(map: &HashMap<String, String>, key: &str) -> Result<u64, String> {
        let raw = Self::get(map, key)?;
        raw.parse::<u64>()
            .map_err(|_| format!("could not parse '{key}' (\"{raw}\") as u64"))
    }

    fn get_bool(map: &HashMap<String, String>, key: &str) -> Result<bool, String> {
        match map.get(key).map(|s| s.as_str()) {
            Some("true") | Some("yes") => Ok(true),
            Some("false") | Some("no") => Ok(false),
            Some(other) => Err(format!("invalid boolean for '{key}': '{other}'")),
            None => Err(format!("missing required config field: '{key}'")),
        }
    }

    fn get_addr_list(map: &HashMap<String, String>, key: &str) -> Result<Vec<SocketAddr>, String> {
        let raw = Self::get(map, key)?;
        raw.split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.to_socket_addrs()
                    .map_err(|_| format!("'{key}' entry \"{s}\" is not a valid ip:port"))?
                    .next()
                    .ok_or_else(|| format!("could not resolve '{key}' entry \"{s}\""))
            })
            .collect()
    }

    fn get_optional_addr(
        map: &HashMap<String, String>,
        key: &str,
    ) -> Result<Option<SocketAddr>, String> {
        match map.get(key) {
            Some(value) => {
                let addr = value
                    .to_socket_addrs()
                    .map_err(|_| format!("'{key}' (\"{value}\") is not a valid ip:port"))?
                    .next()
                    .ok_or_else(|| format!("could not resolve '{key}' ({value})"))?;
                Ok(Some(addr))
            }
            None => Ok(None),
        }
    }

    fn parse_source_kind(map: &HashMap<String, String>) -> Result<SourceKind, String> {
        match map.get("source_kind").map(|s| s.as_str()) {
            None | Some("socket") => Ok(SourceKind::Socket),
            Some("rdbfile") => Ok(SourceKind::RdbFile),
            Some(other) => Err(format!(
                "invalid 'source_kind': '{other}' (expected socket or rdbfile)"
            )),
        }
    }

    fn get_path_list(map: &HashMap<String, String>, key: &str) -> Result<Vec<PathBuf>, String> {
        let raw = Self::get(map, key)?;
        let paths: Vec<PathBuf> = raw
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        if paths.is_empty() {
            return Err(format!("'{key}' must list at least one file path"));
        }
        Ok(paths)
    }

    fn get_group_kind(map: &HashMap<String, String>) -> Result<GroupKind, String> {
        match Self::get(map, "target_kind")?.as_str() {
            "single" => Ok(GroupKind::Single),
            "cluster" => Ok(GroupKind::Cluster),
            "rdbfile" => Ok(GroupKind::RdbFile),
            other => Err(format!(
                "invalid 'target_kind': '{other}' (expected single, cluster or rdbfile)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_config(name: &str, content: &str) -> String {
        let path = std::env::temp_dir().join(name);
        let path_str = path.to_string_lossy().to_string();
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path_str
    }

    #[test]
    fn parses_a_complete_config_file() {
        let path = temp_config(
            "rmt_test_config_complete.conf",
            "# comment\n\
             source = 127.0.0.1:6380,127.0.0.1:6381\n\
             target = 127.0.0.1:7000\n\
             target_kind = cluster\n\
             thread = 4\n\
             noreply = true\n\
             source_safe = yes\n\
             log_file = ./rmt.log\n",
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.get_source_addrs().len(), 2);
        assert_eq!(config.get_target_addrs().len(), 1);
        assert_eq!(config.get_target_kind(), GroupKind::Cluster);
        assert_eq!(config.get_thread_count(), 4);
        assert!(config.get_noreply());
        assert!(config.get_source_safe());
        assert_eq!(config.get_mbuf_size(), 16 * 1024);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn parses_file_backed_source_and_target_paths() {
        let path = temp_config(
            "rmt_test_config_rdbfile.conf",
            "source_kind = rdbfile\n\
             source = /dumps/a.rdb,/dumps/b.rdb\n\
             target_kind = rdbfile\n\
             target = /out/sink.rdb\n\
             thread = 2\n\
             log_file = ./rmt.log\n",
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.get_source_kind(), SourceKind::RdbFile);
        assert!(config.get_source_addrs().is_empty());
        assert_eq!(config.get_source_paths().len(), 2);
        assert!(config.get_target_addrs().is_empty());
        assert_eq!(config.get_target_paths(), &[PathBuf::from("/out/sink.rdb")]);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_missing_required_field() {
        let path = temp_config("rmt_test_config_missing.conf", "source = 127.0.0.1:6380\n");
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.contains("target"));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_malformed_line() {
        let path = temp_config("rmt_test_config_malformed.conf", "not-a-kv-line\n");
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.contains("malformed"));
        fs::remove_file(&path).unwrap();
    }
}
