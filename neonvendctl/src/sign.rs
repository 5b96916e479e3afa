//! Coin pulse signing for bench tests against a running server.

use neonvend_core::credit::{canonical_message, sign_pulse};
use neonvend_core::MachineId;
use serde_json::{Value, json};
use thiserror::Error;

use crate::cli::SignArgs;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("invalid machine id: {0}")]
    MachineId(#[from] neonvend_core::domain::InvalidMachineId),
    #[error("pulse count must be at least 1")]
    NoPulses,
    #[error("timestamp must be decimal seconds, got {0:?}")]
    Timestamp(String),
    #[error("HMAC secret must not be empty")]
    EmptySecret,
}

/// Message, signature and request body for one pulse.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedPulse {
    pub message: String,
    pub signature: String,
    pub payload: Value,
}

/// Sign with the timestamp taken from `args`, or `now_secs` when none is
/// given.
pub fn sign(args: &SignArgs, now_secs: i64) -> Result<SignedPulse, SignError> {
    let machine = MachineId::parse(&args.machine)?;
    if args.pulses == 0 {
        return Err(SignError::NoPulses);
    }

    let timestamp = match (&args.timestamp, args.uptime) {
        (Some(ts), _) => {
            let ts = ts.trim();
            if ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
                return Err(SignError::Timestamp(ts.to_owned()));
            }
            ts.to_owned()
        }
        (None, Some(uptime)) => uptime.to_string(),
        (None, None) => now_secs.to_string(),
    };

    let message = canonical_message(machine.as_str(), args.pulses, &timestamp);
    let signature = sign_pulse(&args.secret, machine.as_str(), args.pulses, &timestamp)
        .map_err(|_| SignError::EmptySecret)?;

    let payload = json!({
        "machineId": machine.as_str(),
        "pulseCount": args.pulses,
        "timestamp": timestamp,
        "signature": signature,
    });

    Ok(SignedPulse {
        message,
        signature,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> SignArgs {
        SignArgs {
            secret: "bench-secret".into(),
            machine: "VM001".into(),
            pulses: 5,
            timestamp: None,
            uptime: None,
            json: false,
        }
    }

    #[test]
    fn defaults_to_current_time() {
        let signed = sign(&args(), 1_700_000_000).unwrap();
        assert_eq!(signed.message, "VM001:5:1700000000");
        assert_eq!(signed.payload["timestamp"], "1700000000");
        assert_eq!(signed.payload["signature"], signed.signature.as_str());
    }

    #[test]
    fn uptime_is_signed_verbatim() {
        let signed = sign(
            &SignArgs {
                uptime: Some(42),
                ..args()
            },
            1_700_000_000,
        )
        .unwrap();
        assert_eq!(signed.message, "VM001:5:42");
    }

    #[test]
    fn signature_matches_core_signer() {
        let signed = sign(
            &SignArgs {
                timestamp: Some("1700000123".into()),
                ..args()
            },
            0,
        )
        .unwrap();
        let expected = sign_pulse("bench-secret", "VM001", 5, "1700000123").unwrap();
        assert_eq!(signed.signature, expected);
        assert_eq!(signed.signature.len(), 64);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            sign(&SignArgs { pulses: 0, ..args() }, 0),
            Err(SignError::NoPulses)
        ));
        assert!(matches!(
            sign(
                &SignArgs {
                    timestamp: Some("-5".into()),
                    ..args()
                },
                0
            ),
            Err(SignError::Timestamp(_))
        ));
        assert!(matches!(
            sign(
                &SignArgs {
                    machine: "VM:1".into(),
                    ..args()
                },
                0
            ),
            Err(SignError::MachineId(_))
        ));
        assert!(matches!(
            sign(
                &SignArgs {
                    secret: String::new(),
                    ..args()
                },
                0
            ),
            Err(SignError::EmptySecret)
        ));
    }
}
