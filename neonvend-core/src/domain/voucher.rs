use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::MachineId;

/// Voucher validity in minutes, between one minute and seven days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoucherDuration(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("voucher duration {0} is outside 1..=10080 minutes")]
pub struct DurationOutOfRange(pub i64);

impl VoucherDuration {
    pub const MIN_MINUTES: u32 = 1;
    pub const MAX_MINUTES: u32 = 7 * 24 * 60;

    pub fn from_minutes(minutes: i64) -> Result<Self, DurationOutOfRange> {
        if (Self::MIN_MINUTES as i64..=Self::MAX_MINUTES as i64).contains(&minutes) {
            Ok(Self(minutes as u32))
        } else {
            Err(DurationOutOfRange(minutes))
        }
    }

    pub fn minutes(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VoucherDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}min", self.0)
    }
}

/// Pre-provisioned access code for one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voucher {
    pub code: String,
    pub machine_id: MachineId,
    pub duration: VoucherDuration,
    /// Set exactly once, when the voucher is redeemed.
    pub used_at: Option<DateTime<Utc>>,
}

impl Voucher {
    pub fn unused(code: impl Into<String>, machine_id: MachineId, duration: VoucherDuration) -> Self {
        Self {
            code: code.into(),
            machine_id,
            duration,
            used_at: None,
        }
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }
}
