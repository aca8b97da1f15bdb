//! Configuration for the serial link

use crate::error::{LinkError, Result};
use std::time::Duration;

/// Link configuration builder
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Capacity of every pooled chunk in bytes
    pub chunk_capacity: usize,
    /// Number of chunks in the buffer pool
    pub pool_chunks: usize,
    /// Backoff before retrying a failed receive arm or a rejected
    /// transmit accept
    pub retry_delay: Duration,
    /// Line-idle timeout handed to the driver with each receive buffer,
    /// letting it flush a partially filled buffer after inactivity
    pub rx_idle_timeout: Duration,
    /// Wait for the host-ready (DTR-equivalent) line before starting
    pub wait_for_host: bool,
    /// Poll interval for the host-ready line
    pub host_poll_interval: Duration,
    /// Overall bound on the host-ready wait; `None` waits indefinitely
    pub host_wait_timeout: Option<Duration>,
    /// Greeting transmitted once at initialization, before reception is armed
    pub greeting: Option<Vec<u8>>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: 64,
            pool_chunks: 8,
            retry_delay: Duration::from_millis(50),
            rx_idle_timeout: Duration::from_millis(50),
            wait_for_host: false,
            host_poll_interval: Duration::from_millis(100),
            host_wait_timeout: None,
            greeting: Some(b"serial link ready\r\n".to_vec()),
        }
    }
}

impl LinkConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk capacity in bytes
    pub fn chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity;
        self
    }

    /// Set the number of pooled chunks
    pub fn pool_chunks(mut self, chunks: usize) -> Self {
        self.pool_chunks = chunks;
        self
    }

    /// Set the re-arm backoff delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the receive line-idle timeout
    pub fn rx_idle_timeout(mut self, timeout: Duration) -> Self {
        self.rx_idle_timeout = timeout;
        self
    }

    /// Enable or disable the one-time host-ready wait
    pub fn wait_for_host(mut self, enabled: bool) -> Self {
        self.wait_for_host = enabled;
        self
    }

    /// Set the host-ready poll interval
    pub fn host_poll_interval(mut self, interval: Duration) -> Self {
        self.host_poll_interval = interval;
        self
    }

    /// Bound the host-ready wait
    pub fn host_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.host_wait_timeout = timeout;
        self
    }

    /// Set the greeting sent at initialization
    pub fn greeting(mut self, greeting: impl Into<Vec<u8>>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    /// Suppress the greeting
    pub fn no_greeting(mut self) -> Self {
        self.greeting = None;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_capacity == 0 || self.chunk_capacity > u16::MAX as usize {
            return Err(LinkError::config(
                "chunk capacity must be between 1 and 65535",
            ));
        }

        if self.pool_chunks < 3 {
            // two receive buffers plus one transmit buffer can be in
            // flight at the same time
            return Err(LinkError::config("pool must hold at least 3 chunks"));
        }

        if self.retry_delay.is_zero() {
            return Err(LinkError::config("retry delay must be greater than 0"));
        }

        if self.wait_for_host && self.host_poll_interval.is_zero() {
            return Err(LinkError::config(
                "host poll interval must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Preset configurations for common use cases
impl LinkConfig {
    /// Configuration for a USB CDC-ACM console: hold startup until the host
    /// opens the port
    pub fn usb_console() -> Self {
        Self::default()
            .wait_for_host(true)
            .host_wait_timeout(Some(Duration::from_secs(30)))
    }

    /// Configuration for memory-constrained targets
    pub fn low_memory() -> Self {
        Self::default().chunk_capacity(32).pool_chunks(4)
    }
}
