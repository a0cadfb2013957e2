use super::Mailbox;
use crate::error::ConfigError;
use crate::Core::Scheduler;
use crate::Messaging::ChannelBuilder;
use std::sync::Arc;
use std::time::Duration;

/// Drain-loop settings of a mailbox.
#[derive(Clone)]
pub struct MailboxConfig {
    /// Most calls dispatched from one channel before moving to the next.
    pub max_chunk: usize,
    /// How long a drain polls empty channels before one linger round ends.
    pub idle_wait: Duration,
    /// Idle rounds a drain lingers before relinquishing the mailbox.
    pub linger_rounds: u32,
    /// Settings for channels created by [`Mailbox::connect`].
    pub channel: ChannelBuilder,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            max_chunk: 100,
            idle_wait: Duration::from_millis(1),
            linger_rounds: 8,
            channel: ChannelBuilder::default(),
        }
    }
}

pub struct MailboxBuilder {
    config: MailboxConfig,
    scheduler: Option<Arc<Scheduler>>,
}

impl Default for MailboxBuilder {
    fn default() -> Self {
        Self {
            config: MailboxConfig::default(),
            scheduler: None, // Scheduler::current() at build time
        }
    }
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.config.max_chunk = max_chunk;
        self
    }

    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.config.idle_wait = idle_wait;
        self
    }

    pub fn with_linger_rounds(mut self, rounds: u32) -> Self {
        self.config.linger_rounds = rounds;
        self
    }

    pub fn with_channel(mut self, channel: ChannelBuilder) -> Self {
        self.config.channel = channel;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build<A: Send + 'static>(self, actor: A) -> Result<Arc<Mailbox<A>>, ConfigError> {
        if self.config.max_chunk == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "max_chunk",
                value: 0,
            });
        }
        // fail here rather than on the first connect()
        self.config.channel.build_queue()?;

        let scheduler = self.scheduler.unwrap_or_else(Scheduler::current);
        Ok(Mailbox::new(actor, self.config, scheduler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MailboxConfig::default();
        assert_eq!(config.max_chunk, 100);
        assert_eq!(config.idle_wait, Duration::from_millis(1));
        assert_eq!(config.linger_rounds, 8);
    }

    #[test]
    fn rejects_zero_chunk() {
        let scheduler = Scheduler::with_threads(1).unwrap();
        let err = MailboxBuilder::new()
            .with_scheduler(scheduler)
            .with_max_chunk(0)
            .build(())
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidSetting { name: "max_chunk", value: 0 });
    }

    #[test]
    fn rejects_bad_channel_settings() {
        let scheduler = Scheduler::with_threads(1).unwrap();
        let err = MailboxBuilder::new()
            .with_scheduler(scheduler)
            .with_channel(ChannelBuilder::new().with_capacity(12))
            .build(())
            .unwrap_err();
        assert_eq!(err, ConfigError::CapacityNotPowerOfTwo { capacity: 12 });
    }
}
