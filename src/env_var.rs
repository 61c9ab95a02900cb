use std::sync::OnceLock;

use serde::Deserialize;

fn default_deadlock_timeout() -> f64 {
    600.0
}

fn default_dissemination_factor() -> usize {
    2
}

fn default_backend() -> String {
    "local".to_owned()
}

/// What happens when the transport layer reports an error.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FatalPolicy {
    /// log the failure and abort the process, the distributed run cannot continue consistently
    Abort,
    /// hand the failure back to the caller as [Error::Transport][crate::Error::Transport]
    Propagate,
}

fn default_fatal_policy() -> FatalPolicy {
    FatalPolicy::Abort
}

#[derive(Deserialize, Debug)]
pub struct Config {
    /// A timeout in seconds after which a blocked wait, fence or barrier reports a potential deadlock, default: 600.0 seconds
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// The dissemination factor for the n-way barrier, default: 2
    #[serde(default = "default_dissemination_factor")]
    pub barrier_dissemination_factor: usize,

    /// flag used to disable potential deadlock warnings. Default: true
    pub wait_warning: Option<bool>,

    /// The fabric backend to use when none is given to the runtime builder
    /// local -- single rank execution
    /// threads -- multiple ranks inside one process, requires an explicitly built fabric endpoint
    #[serde(default = "default_backend")]
    pub backend: String,

    /// abort -- abort the process on transport errors (default)
    /// propagate -- return transport errors to the caller
    #[serde(default = "default_fatal_policy")]
    pub fatal_policy: FatalPolicy,
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("AMREPLAY_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_environment() {
        let config: Config = envy::prefixed("AMREPLAY_TEST_UNSET_")
            .from_iter(Vec::<(String, String)>::new())
            .unwrap();
        assert_eq!(config.deadlock_timeout, 600.0);
        assert_eq!(config.barrier_dissemination_factor, 2);
        assert_eq!(config.backend, "local");
        assert_eq!(config.fatal_policy, FatalPolicy::Abort);
        assert_eq!(config.wait_warning, None);
    }

    #[test]
    fn fatal_policy_is_lowercase() {
        let vars = vec![
            ("AMREPLAY_FATAL_POLICY".to_owned(), "propagate".to_owned()),
            ("AMREPLAY_DEADLOCK_TIMEOUT".to_owned(), "1.5".to_owned()),
        ];
        let config: Config = envy::prefixed("AMREPLAY_").from_iter(vars).unwrap();
        assert_eq!(config.fatal_policy, FatalPolicy::Propagate);
        assert_eq!(config.deadlock_timeout, 1.5);
    }
}
