use std::env;
use std::time::Duration;

use turbo_push_core::config::{PriorityConfig, TurboAppConfig};

use crate::domain::model::TubeDirectory;

#[derive(Debug, Clone)]
pub struct PushProxyConfig {
    pub listen_address: String,
    pub beanstalk_host: String,
    pub beanstalk_port: u16,
    pub broker_connect_timeout: Duration,
    pub reserve_timeout: Duration,
    pub broker_reconnect_delay: Duration,
    pub ttr: Duration,
    pub push_tube: String,
    pub batch_tube: String,
    pub batch_worker_count: usize,
    pub fanout_threshold: usize,
    pub priorities: PriorityConfig,
    pub apps: Vec<String>,
}

impl PushProxyConfig {
    pub fn from_app_config(app: &TurboAppConfig) -> Self {
        let beanstalk = &app.beanstalk;
        let api = &app.api;

        let beanstalk_host =
            env::var("TURBO_BEANSTALK_HOST").unwrap_or_else(|_| beanstalk.host.clone());
        let beanstalk_port = env::var("TURBO_BEANSTALK_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(beanstalk.port);

        let address = env::var("TURBO_API_ADDRESS").unwrap_or_else(|_| api.address.clone());
        let port = env::var("TURBO_API_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(api.port);

        let batch_worker_count = env::var("TURBO_BATCH_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(beanstalk.batch_worker_count);

        Self {
            listen_address: format!("{address}:{port}"),
            beanstalk_host,
            beanstalk_port,
            broker_connect_timeout: Duration::from_secs(beanstalk.connect_timeout_secs),
            reserve_timeout: Duration::from_secs(beanstalk.reserve_timeout_secs),
            broker_reconnect_delay: Duration::from_secs(beanstalk.reconnect_delay_secs),
            ttr: Duration::from_secs(u64::from(beanstalk.ttr_secs)),
            push_tube: beanstalk.push_tube.clone(),
            batch_tube: beanstalk.batch_tube.clone(),
            batch_worker_count,
            fanout_threshold: api.fanout_threshold.max(1),
            priorities: app.priorities,
            apps: app.app_names().map(str::to_string).collect(),
        }
    }

    pub fn beanstalk_address(&self) -> String {
        format!("{}:{}", self.beanstalk_host, self.beanstalk_port)
    }

    pub fn tube_directory(&self) -> TubeDirectory {
        TubeDirectory::new(
            self.push_tube.clone(),
            self.batch_tube.clone(),
            self.apps.iter().cloned(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turbo_push_core::config::AppCredentialConfig;

    #[test]
    fn test_from_app_config() {
        let mut app = TurboAppConfig::default();
        app.apps.insert(
            "demo".to_string(),
            AppCredentialConfig {
                cert_file: "certs/demo.pem".to_string(),
                key_file: "certs/demo.key".to_string(),
                worker_count: 2,
            },
        );

        let config = PushProxyConfig::from_app_config(&app);
        assert_eq!(config.fanout_threshold, 5);
        assert_eq!(config.batch_tube, "batch_push");
        assert_eq!(config.apps, vec!["demo".to_string()]);

        let directory = config.tube_directory();
        assert_eq!(directory.app_tube("demo"), "push.demo");
        assert!(directory.is_registered("demo"));
    }
}
