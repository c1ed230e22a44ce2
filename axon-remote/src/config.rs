use std::collections::HashMap;
use std::time::Duration;

use axon_actors::Props;
use tonic::transport::{ClientTlsConfig, ServerTlsConfig};

/// Remoting configuration. Transport is insecure unless TLS configs are
/// provided.
pub struct RemoteConfig {
    /// Interface the server binds to.
    pub host: String,
    /// Port to bind; 0 picks any free port.
    pub port: u16,
    /// Hostname reported to peers; defaults to `host`.
    pub advertised_host: Option<String>,
    /// Port reported to peers; defaults to the bound port.
    pub advertised_port: Option<u16>,
    /// Max user messages coalesced into one wire frame.
    pub endpoint_writer_batch_size: usize,
    /// Connection attempts before an endpoint is declared lost.
    pub max_retries: u32,
    /// Base delay between connection attempts (scaled linearly per attempt).
    pub retry_back_off: Duration,
    /// Overall window for connection attempts.
    pub retry_time_span: Duration,
    /// Actor kinds the activator may spawn on behalf of peers.
    pub remote_kinds: HashMap<String, Props>,
    pub channel_tls: Option<ClientTlsConfig>,
    pub server_tls: Option<ServerTlsConfig>,
}

impl Default for RemoteConfig {
    fn default() -> RemoteConfig {
        RemoteConfig {
            host: "0.0.0.0".to_string(),
            port: 0,
            advertised_host: None,
            advertised_port: None,
            endpoint_writer_batch_size: 1_000,
            max_retries: 5,
            retry_back_off: Duration::from_millis(100),
            retry_time_span: Duration::from_secs(15),
            remote_kinds: HashMap::new(),
            channel_tls: None,
            server_tls: None,
        }
    }
}

impl RemoteConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> RemoteConfig {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> RemoteConfig {
        self.port = port;
        self
    }

    pub fn with_advertised_host(mut self, host: impl Into<String>) -> RemoteConfig {
        self.advertised_host = Some(host.into());
        self
    }

    pub fn with_advertised_port(mut self, port: u16) -> RemoteConfig {
        self.advertised_port = Some(port);
        self
    }

    pub fn with_endpoint_writer_batch_size(mut self, batch_size: usize) -> RemoteConfig {
        self.endpoint_writer_batch_size = batch_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> RemoteConfig {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_back_off(mut self, retry_back_off: Duration) -> RemoteConfig {
        self.retry_back_off = retry_back_off;
        self
    }

    pub fn with_retry_time_span(mut self, retry_time_span: Duration) -> RemoteConfig {
        self.retry_time_span = retry_time_span;
        self
    }

    /// Registers an actor kind peers may spawn through the activator.
    pub fn with_remote_kind(mut self, kind: impl Into<String>, props: Props) -> RemoteConfig {
        self.remote_kinds.insert(kind.into(), props);
        self
    }

    pub fn with_channel_tls(mut self, tls: ClientTlsConfig) -> RemoteConfig {
        self.channel_tls = Some(tls);
        self
    }

    pub fn with_server_tls(mut self, tls: ServerTlsConfig) -> RemoteConfig {
        self.server_tls = Some(tls);
        self
    }
}
