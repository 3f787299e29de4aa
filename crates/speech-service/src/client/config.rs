use std::time::Duration;

/// Transport settings shared by the speech-service clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    connect_timeout: Duration,
    keepalive_after: Duration,
    capacity: usize,
}

pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_keepalive_after(mut self, silence: Duration) -> Self {
        self.config.keepalive_after = silence;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            // The service drops sockets that stay silent for too long.
            keepalive_after: Duration::from_secs(5),
            capacity: 128,
        }
    }

    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn keepalive_after(&self) -> Duration {
        self.keepalive_after
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
