// Periodic timestamp records; runs until shutdown is signalled or the ring seals.
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::gateway::RingGateway;
use crate::core::stamp::StampFormat;
use crate::server::session::refresh_scratch;
use crate::server::shutdown::ShutdownSignal;

pub const DEFAULT_STAMP_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct StampInjector {
    period: Duration,
    format: StampFormat,
}

impl StampInjector {
    pub fn new(period: Duration) -> Result<Self, Error> {
        if period.is_zero() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("stamp period must be positive")
                .with_hint("Pass a duration like 10s, or --no-stamp to disable timestamps."));
        }
        Ok(Self {
            period,
            format: StampFormat::new()?,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Appends one stamp per period, the first one period after start.
    /// Returns the number of stamps stored.
    pub async fn run(self, gateway: Arc<RingGateway>, mut stop: ShutdownSignal) -> usize {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stamps = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = stop.wait() => break,
                _ = ticker.tick() => {}
            }

            let record = match self.format.now() {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %err, "failed to format timestamp");
                    continue;
                }
            };
            match gateway.store(record) {
                Ok(appended) => {
                    stamps += 1;
                    debug!(slot = appended.slot, "stored timestamp");
                }
                Err(err) if err.kind() == ErrorKind::Shutdown => break,
                Err(err) => {
                    warn!(error = %err, "failed to store timestamp");
                    continue;
                }
            }
            if let Err(err) = refresh_scratch(&gateway).await {
                warn!(error = %err, "failed to mirror timestamp");
            }
        }
        stamps
    }
}
