use crate::AsmSimError;
use asmsim_isa::{Mode, Parameters};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use z3::Config;

/// Options handed to every solver session the engine opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub unsat_core: bool,
    pub model: bool,
    pub proof: bool,
    /// Per-query timeout in milliseconds. A query that times out degrades to an unknown bit.
    pub timeout_ms: u32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            unsat_core: false,
            model: false,
            proof: false,
            timeout_ms: 1000,
        }
    }
}

impl SolverSettings {
    /// Builds settings from string options as a host application would store them. Recognized
    /// keys are `unsat-core`, `model`, `proof` and `timeout`; anything else is ignored.
    pub fn from_map<K: AsRef<str>, V: AsRef<str>>(
        options: &HashMap<K, V>,
    ) -> Result<Self, AsmSimError> {
        let mut settings = Self::default();
        for (key, value) in options {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            let invalid = || AsmSimError::InvalidSolverOption {
                key: key.to_string(),
                value: value.to_string(),
            };
            match key {
                "unsat-core" => settings.unsat_core = parse_bool(value).ok_or_else(invalid)?,
                "model" => settings.model = parse_bool(value).ok_or_else(invalid)?,
                "proof" => settings.proof = parse_bool(value).ok_or_else(invalid)?,
                "timeout" => settings.timeout_ms = value.parse().map_err(|_| invalid())?,
                other => tracing::warn!("ignoring unknown solver option {other}"),
            }
        }
        Ok(settings)
    }

    pub fn z3_config(&self) -> Config {
        let mut cfg = Config::new();
        cfg.set_model_generation(self.model);
        cfg.set_proof_generation(self.proof);
        cfg.set_param_value("unsat_core", if self.unsat_core { "true" } else { "false" });
        cfg.set_timeout_msec(self.timeout_ms as u64);
        cfg
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Master switch. A disabled simulator answers every query with nothing.
    pub enabled: bool,
    pub mode_64bit: bool,
    /// Lookback bound for states computed on request
    pub sync_steps: usize,
    /// Lookback bound for states computed by the background worker
    pub background_steps: usize,
    /// Upper bound on the number of paths executed for a single state
    pub max_paths: usize,
    pub slow_job_warning_ms: u64,
    pub solver: SolverSettings,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode_64bit: true,
            sync_steps: 4,
            background_steps: 4,
            max_paths: 64,
            slow_job_warning_ms: 500,
            solver: SolverSettings::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn mode(&self) -> Mode {
        if self.mode_64bit {
            Mode::Bits64
        } else {
            Mode::Bits32
        }
    }

    pub fn parameters(&self) -> Parameters {
        Parameters::new(self.mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_solver_options() {
        let mut options = HashMap::new();
        options.insert("unsat-core", "true");
        options.insert("timeout", "250");
        options.insert("fancy", "whatever");
        let settings = SolverSettings::from_map(&options).unwrap();
        assert!(settings.unsat_core);
        assert!(!settings.model);
        assert_eq!(settings.timeout_ms, 250);
    }

    #[test]
    fn rejects_bad_solver_values() {
        let mut options = HashMap::new();
        options.insert("timeout".to_string(), "soon".to_string());
        assert!(matches!(
            SolverSettings::from_map(&options),
            Err(AsmSimError::InvalidSolverOption { .. })
        ));
    }

    #[test]
    fn defaults() {
        let config = SimulatorConfig::default();
        assert!(config.enabled);
        assert_eq!(config.mode(), Mode::Bits64);
        assert_eq!(config.sync_steps, 4);
        assert_eq!(config.solver.timeout_ms, 1000);
    }
}
