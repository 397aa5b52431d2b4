//! Planner configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Configuration shared by the lifecycle planners and the graph runner.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerConfig {
    /// Address agents use to reach the pilot service.
    #[serde(default = "PlannerConfig::default_pilot_host")]
    pub pilot_host: String,

    /// Pilot service port.
    #[serde(default = "PlannerConfig::default_pilot_port")]
    pub pilot_port: u16,

    /// Port the frontgate agent listens on.
    #[serde(default = "PlannerConfig::default_frontgate_port")]
    pub frontgate_port: u16,

    /// Port the drone agent listens on.
    #[serde(default = "PlannerConfig::default_drone_port")]
    pub drone_port: u16,

    /// Name of the config file written by the frontgate bootstrap.
    #[serde(default = "PlannerConfig::default_frontgate_conf_file")]
    pub frontgate_conf_file: String,

    /// Name of the config file written by the drone bootstrap.
    #[serde(default = "PlannerConfig::default_drone_conf_file")]
    pub drone_conf_file: String,

    /// Budget for tasks that do not carry their own timeout, in seconds.
    #[serde(default = "PlannerConfig::default_task_timeout")]
    pub task_timeout_seconds: u64,

    /// Budget for removing the default container on a frontgate, in seconds.
    #[serde(default = "PlannerConfig::default_remove_container_timeout")]
    pub remove_container_timeout_seconds: u64,
}

impl PlannerConfig {
    fn default_pilot_host() -> String {
        "127.0.0.1".to_string()
    }

    const fn default_pilot_port() -> u16 {
        9110
    }

    const fn default_frontgate_port() -> u16 {
        9111
    }

    const fn default_drone_port() -> u16 {
        9112
    }

    fn default_frontgate_conf_file() -> String {
        "frontgate.conf".to_string()
    }

    fn default_drone_conf_file() -> String {
        "drone.conf".to_string()
    }

    const fn default_task_timeout() -> u64 {
        300 // 5 minutes
    }

    const fn default_remove_container_timeout() -> u64 {
        600 // 10 minutes
    }

    /// Get the default task timeout as a `Duration`.
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            pilot_host: Self::default_pilot_host(),
            pilot_port: Self::default_pilot_port(),
            frontgate_port: Self::default_frontgate_port(),
            drone_port: Self::default_drone_port(),
            frontgate_conf_file: Self::default_frontgate_conf_file(),
            drone_conf_file: Self::default_drone_conf_file(),
            task_timeout_seconds: Self::default_task_timeout(),
            remove_container_timeout_seconds: Self::default_remove_container_timeout(),
        }
    }
}
