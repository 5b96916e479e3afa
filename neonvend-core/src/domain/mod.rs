//! Ledger entities shared by every component.

pub mod machine;
pub mod voucher;

pub use machine::{InvalidMachineId, LeaseHolder, LeaseView, MachineId, MachineState};
pub use voucher::{DurationOutOfRange, Voucher, VoucherDuration};
