use acknowledgement::config::{AcknowledgementConfig, EnvMsDuration};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(default = "8")]
    pub producers: usize,

    #[envconfig(default = "1000")]
    pub messages_per_producer: usize,

    #[envconfig(default = "20")]
    pub commit_latency_ms: EnvMsDuration,

    #[envconfig(default = "0.0")]
    pub commit_failure_rate: f64,

    #[envconfig(nested = true)]
    pub acknowledgement: AcknowledgementConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
