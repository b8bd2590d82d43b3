//! Runtime configuration: the knobs an embedder sets once at startup.
//!
//! A [`Config`] is built from a string-keyed map (the form an external harness
//! hands in) or from JSON via `serde`, validated once, and then handed to
//! [`crate::worker::Runtime::new`]. There is nothing to reconfigure once a
//! runtime is running.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::edge::EdgeAlgo;
use crate::error::ConfigError;

/// Validated runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of worker threads. `0` means "run everything on the calling
    /// thread", used by tests that want deterministic single-threaded runs.
    #[serde(default = "default_proc")]
    pub proc: usize,
    /// Which `Generic` edge-tracking algorithm to use.
    #[serde(default = "default_edge_algo", with = "edge_algo_serde")]
    pub edge_algo: EdgeAlgo,
    /// Tree fan-out for `dyntree`/`dyntreeopt` out-sets.
    #[serde(default = "default_branching_factor")]
    pub branching_factor: usize,
    /// SNZI tree height backing `distributed`/`dyntree`/`dyntreeopt` in-counters.
    #[serde(default = "default_nb_levels")]
    pub nb_levels: u32,
    /// Amortization bound (`A`) for `dyntreeopt`'s per-node consumer capacity.
    #[serde(default = "default_communication_delay")]
    pub communication_delay: usize,
    /// Whether internal communicate/poll delays are Poisson-distributed
    /// rather than fixed. Affects only the scheduler's idle-poll pacing.
    #[serde(default)]
    pub poisson: bool,
}

fn default_proc() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
fn default_edge_algo() -> EdgeAlgo {
    EdgeAlgo::Simple
}
fn default_branching_factor() -> usize {
    crate::edge::dyntreeopt::DEFAULT_BRANCHING_FACTOR
}
fn default_nb_levels() -> u32 {
    4
}
fn default_communication_delay() -> usize {
    crate::edge::dyntreeopt::DEFAULT_AMORTIZATION
}

mod edge_algo_serde {
    use super::EdgeAlgo;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(algo: &EdgeAlgo, s: S) -> Result<S::Ok, S::Error> {
        super::edge_algo_name(*algo).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<EdgeAlgo, D::Error> {
        let name = String::deserialize(d)?;
        super::parse_edge_algo(&name).map_err(serde::de::Error::custom)
    }
}

fn edge_algo_name(algo: EdgeAlgo) -> &'static str {
    match algo {
        EdgeAlgo::Simple => "simple",
        EdgeAlgo::Distributed => "distributed",
        EdgeAlgo::Dyntree => "dyntree",
        EdgeAlgo::DyntreeOpt => "dyntreeopt",
    }
}

fn parse_edge_algo(s: &str) -> Result<EdgeAlgo, ConfigError> {
    match s {
        "simple" => Ok(EdgeAlgo::Simple),
        "distributed" => Ok(EdgeAlgo::Distributed),
        // "tree" is kept as an alias for "dyntree" for source compatibility.
        "dyntree" | "tree" => Ok(EdgeAlgo::Dyntree),
        "dyntreeopt" => Ok(EdgeAlgo::DyntreeOpt),
        other => Err(ConfigError::UnknownEdgeAlgo(other.to_string())),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proc: default_proc(),
            edge_algo: default_edge_algo(),
            branching_factor: default_branching_factor(),
            nb_levels: default_nb_levels(),
            communication_delay: default_communication_delay(),
            poisson: false,
        }
    }
}

impl Config {
    /// Builds a [`Config`] from a string-keyed lookup, the form the original
    /// embedding harness passes knobs in. Unrecognized keys are ignored;
    /// malformed values for a recognized key are reported as a
    /// [`ConfigError`].
    pub fn from_str_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(v) = map.get("proc") {
            config.proc = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: "proc", value: v.clone() })?;
        }
        if let Some(v) = map.get("edge_algo") {
            config.edge_algo = parse_edge_algo(v)?;
        }
        if let Some(v) = map.get("branching_factor") {
            config.branching_factor = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "branching_factor",
                value: v.clone(),
            })?;
            if config.branching_factor == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "branching_factor",
                    value: v.clone(),
                });
            }
        }
        if let Some(v) = map.get("nb_levels") {
            config.nb_levels = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: "nb_levels", value: v.clone() })?;
        }
        if let Some(v) = map.get("communication_delay") {
            config.communication_delay = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "communication_delay",
                value: v.clone(),
            })?;
            if config.communication_delay == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "communication_delay",
                    value: v.clone(),
                });
            }
        }
        if let Some(v) = map.get("poisson") {
            config.poisson = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: "poisson", value: v.clone() })?;
        }

        Ok(config)
    }

    /// Builds a [`Config`] from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert!(config.proc >= 1);
        assert!(config.branching_factor >= 1);
        assert!(config.communication_delay >= 1);
    }

    #[test]
    fn str_map_overrides_only_named_keys() {
        let mut map = HashMap::new();
        map.insert("proc".to_string(), "4".to_string());
        map.insert("edge_algo".to_string(), "dyntreeopt".to_string());
        let config = Config::from_str_map(&map).unwrap();
        assert_eq!(config.proc, 4);
        assert_eq!(config.edge_algo, EdgeAlgo::DyntreeOpt);
        assert_eq!(config.nb_levels, default_nb_levels());
    }

    #[test]
    fn tree_is_an_alias_for_dyntree() {
        let mut map = HashMap::new();
        map.insert("edge_algo".to_string(), "tree".to_string());
        let config = Config::from_str_map(&map).unwrap();
        assert_eq!(config.edge_algo, EdgeAlgo::Dyntree);
    }

    #[test]
    fn unknown_edge_algo_is_reported() {
        let mut map = HashMap::new();
        map.insert("edge_algo".to_string(), "bogus".to_string());
        assert!(Config::from_str_map(&map).is_err());
    }

    #[test]
    fn zero_branching_factor_is_rejected() {
        let mut map = HashMap::new();
        map.insert("branching_factor".to_string(), "0".to_string());
        assert!(Config::from_str_map(&map).is_err());
    }

    #[test]
    fn json_round_trip() {
        let config = Config {
            edge_algo: EdgeAlgo::Distributed,
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back = Config::from_json(&json).unwrap();
        assert_eq!(back.edge_algo, EdgeAlgo::Distributed);
        assert_eq!(back.proc, config.proc);
    }
}
