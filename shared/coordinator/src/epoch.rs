use serde::{Deserialize, Serialize};

use crate::{ConfigError, SelectionError};

/// Fixed-length epochs numbered from 1 starting at `start_time`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochClock {
    start_time: u64,
    epoch_length: u64,
}

impl EpochClock {
    pub fn new(start_time: u64, epoch_length: u64) -> Result<Self, ConfigError> {
        if epoch_length == 0 {
            return Err(ConfigError::ZeroEpochLength);
        }
        Ok(Self {
            start_time,
            epoch_length,
        })
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn epoch_length(&self) -> u64 {
        self.epoch_length
    }

    pub fn epoch_at(&self, unix_timestamp: u64) -> Result<u64, SelectionError> {
        let elapsed = unix_timestamp.checked_sub(self.start_time).ok_or(
            SelectionError::EpochNotStarted {
                now: unix_timestamp,
                start_time: self.start_time,
            },
        )?;
        Ok(elapsed / self.epoch_length + 1)
    }

    /// First timestamp belonging to `epoch`. Epoch 0 maps to `start_time`.
    pub fn epoch_start(&self, epoch: u64) -> u64 {
        self.start_time
            .saturating_add(epoch.saturating_sub(1).saturating_mul(self.epoch_length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = 1_700_000_000;
    const L: u64 = 3_600;

    #[test]
    fn test_epoch_boundaries() {
        let clock = EpochClock::new(T, L).unwrap();
        assert_eq!(
            clock.epoch_at(T - 1),
            Err(SelectionError::EpochNotStarted {
                now: T - 1,
                start_time: T
            })
        );
        assert_eq!(clock.epoch_at(T), Ok(1));
        assert_eq!(clock.epoch_at(T + L - 1), Ok(1));
        assert_eq!(clock.epoch_at(T + L), Ok(2));
        assert_eq!(clock.epoch_at(T + 10 * L + 5), Ok(11));
    }

    #[test]
    fn test_epoch_start_inverts_epoch_at() {
        let clock = EpochClock::new(T, L).unwrap();
        for epoch in 1..20 {
            let start = clock.epoch_start(epoch);
            assert_eq!(clock.epoch_at(start), Ok(epoch));
            assert_eq!(clock.epoch_at(start + L - 1), Ok(epoch));
        }
    }

    #[test]
    fn test_zero_length_rejected() {
        assert_eq!(EpochClock::new(T, 0), Err(ConfigError::ZeroEpochLength));
    }
}
