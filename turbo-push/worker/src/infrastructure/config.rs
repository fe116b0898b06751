use std::env;
use std::path::PathBuf;
use std::time::Duration;

use turbo_push_core::config::{PriorityConfig, PushTuningConfig, TurboAppConfig};

/// 单个应用的管道配置
#[derive(Debug, Clone)]
pub struct AppPipeConfig {
    pub name: String,
    pub tube: String,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub worker_count: usize,
}

#[derive(Debug, Clone)]
pub struct PushWorkerConfig {
    pub beanstalk_host: String,
    pub beanstalk_port: u16,
    pub reserve_timeout: Duration,
    pub broker_reconnect_delay: Duration,
    pub broker_connect_timeout: Duration,
    pub ttr: Duration,
    pub gateway_host: String,
    pub gateway_port: u16,
    pub gateway_ca_file: Option<PathBuf>,
    pub gateway_connect_timeout: Duration,
    pub gateway_write_timeout: Duration,
    pub tuning: PushTuningConfig,
    pub priorities: PriorityConfig,
    pub apps: Vec<AppPipeConfig>,
    pub metrics_address: Option<String>,
}

impl PushWorkerConfig {
    pub fn from_app_config(app: &TurboAppConfig) -> Self {
        let beanstalk = &app.beanstalk;
        let gateway = &app.gateway;

        let beanstalk_host =
            env::var("TURBO_BEANSTALK_HOST").unwrap_or_else(|_| beanstalk.host.clone());
        let beanstalk_port = env::var("TURBO_BEANSTALK_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(beanstalk.port);

        let sandbox = env::var("TURBO_GATEWAY_SANDBOX")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(gateway.sandbox);
        let gateway_host = env::var("TURBO_GATEWAY_HOST").ok().unwrap_or_else(|| {
            let mut resolved = gateway.clone();
            resolved.sandbox = sandbox;
            resolved.endpoint_host().to_string()
        });

        let metrics_address = env::var("TURBO_WORKER_METRICS_ADDR")
            .ok()
            .or_else(|| app.push.metrics_address.clone())
            .filter(|addr| !addr.is_empty());

        // 逗号分隔的应用白名单，用于把不同应用拆分到不同进程
        let only_apps: Option<Vec<String>> = env::var("TURBO_WORKER_APPS").ok().map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        let apps = app
            .apps
            .iter()
            .filter(|(name, _)| {
                only_apps
                    .as_ref()
                    .is_none_or(|allowed| allowed.iter().any(|a| a == *name))
            })
            .map(|(name, credentials)| AppPipeConfig {
                name: name.clone(),
                tube: beanstalk.app_tube(name),
                cert_file: PathBuf::from(&credentials.cert_file),
                key_file: PathBuf::from(&credentials.key_file),
                worker_count: credentials.worker_count.max(1),
            })
            .collect();

        Self {
            beanstalk_host,
            beanstalk_port,
            reserve_timeout: Duration::from_secs(beanstalk.reserve_timeout_secs),
            broker_reconnect_delay: Duration::from_secs(beanstalk.reconnect_delay_secs),
            broker_connect_timeout: Duration::from_secs(beanstalk.connect_timeout_secs),
            ttr: Duration::from_secs(u64::from(beanstalk.ttr_secs)),
            gateway_host,
            gateway_port: gateway.port,
            gateway_ca_file: gateway.ca_file.as_ref().map(PathBuf::from),
            gateway_connect_timeout: Duration::from_secs(gateway.connect_timeout_secs),
            gateway_write_timeout: Duration::from_secs(gateway.write_timeout_secs),
            tuning: app.push.clone(),
            priorities: app.priorities,
            apps,
            metrics_address,
        }
    }

    pub fn beanstalk_address(&self) -> String {
        format!("{}:{}", self.beanstalk_host, self.beanstalk_port)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.tuning.drain_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turbo_push_core::config::AppCredentialConfig;

    #[test]
    fn test_from_app_config() {
        let mut app = TurboAppConfig::default();
        app.gateway.sandbox = true;
        app.apps.insert(
            "demo".to_string(),
            AppCredentialConfig {
                cert_file: "certs/demo.pem".to_string(),
                key_file: "certs/demo.key".to_string(),
                worker_count: 3,
            },
        );

        let config = PushWorkerConfig::from_app_config(&app);
        assert_eq!(config.apps.len(), 1);
        assert_eq!(config.apps[0].tube, "push.demo");
        assert_eq!(config.apps[0].worker_count, 3);
        assert_eq!(config.reserve_timeout, Duration::from_secs(2));
        assert_eq!(config.drain_timeout(), Duration::from_secs(300));
        assert_eq!(config.gateway_port, 2195);
    }
}
