//! One-time codes bound to a (ride, checkpoint) pair.
//!
//! Only a digest of the code is persisted. At most one challenge exists per
//! key: issuing overwrites, and consuming is a compare-and-swap against the
//! exact bytes that were checked, so a code re-issued mid-verification can
//! never be satisfied by the old one.

use crate::checkpoint::Checkpoint;
use crate::config::LifecycleConfig;
use crate::error::RideError;
use crate::store::{decode, encode};
use crate::types::TimeStamp;
use chrono::{Duration, Utc};
use rand::Rng;
use std::fmt;

const OTP_TREE: &str = "otp_challenges";

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct OtpChallenge {
    #[n(0)]
    pub ride_id: String,
    #[n(1)]
    pub checkpoint: Checkpoint,
    #[n(2)]
    pub code_digest: String,
    #[n(3)]
    pub issued_at: TimeStamp<Utc>,
    #[n(4)]
    pub expires_at: TimeStamp<Utc>,
    #[n(5)]
    pub consumed: bool,
    #[n(6)]
    pub attempts: u32,
}

impl OtpChallenge {
    pub fn is_expired(&self, now: &TimeStamp<Utc>) -> bool {
        now > &self.expires_at
    }
    pub fn is_live(&self, now: &TimeStamp<Utc>) -> bool {
        !self.consumed && !self.is_expired(now)
    }
}

/// Why a submitted (or absent) code did not verify a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpIssue {
    NotRequested,
    NotSubmitted,
    Expired,
    Mismatch,
    Consumed,
    Superseded,
    TooManyAttempts,
}

impl OtpIssue {
    /// A code was presented and turned down, as opposed to no code being in play.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, OtpIssue::NotRequested | OtpIssue::NotSubmitted)
    }
}

impl fmt::Display for OtpIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OtpIssue::NotRequested => "otp not requested",
            OtpIssue::NotSubmitted => "otp issued but not submitted",
            OtpIssue::Expired => "otp expired",
            OtpIssue::Mismatch => "otp mismatch",
            OtpIssue::Consumed => "otp already used",
            OtpIssue::Superseded => "otp superseded by a newer code",
            OtpIssue::TooManyAttempts => "too many otp attempts",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedOtp {
    pub code: String,
    pub expires_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    Verified,
    Rejected(OtpIssue),
}

#[derive(Clone)]
pub struct OtpLedger {
    tree: sled::Tree,
    ttl: Duration,
    digits: u32,
    max_attempts: u32,
}

impl OtpLedger {
    pub fn open(db: &sled::Db, config: &LifecycleConfig) -> Result<Self, RideError> {
        Ok(Self {
            tree: db.open_tree(OTP_TREE)?,
            ttl: config.otp_ttl,
            digits: config.otp_digits,
            max_attempts: config.otp_max_attempts,
        })
    }

    fn key(ride_id: &str, checkpoint: Checkpoint) -> String {
        format!("{ride_id}/{checkpoint}")
    }

    fn digest(ride_id: &str, checkpoint: Checkpoint, code: &str) -> String {
        sha256::digest(format!("{ride_id}:{checkpoint}:{code}").as_bytes())
    }

    /// Issues a fresh random code, replacing any earlier challenge for the checkpoint.
    pub fn issue(
        &self,
        ride_id: &str,
        checkpoint: Checkpoint,
        now: TimeStamp<Utc>,
    ) -> Result<IssuedOtp, RideError> {
        let code = generate_code(self.digits);
        self.issue_with_code(ride_id, checkpoint, &code, now)
    }

    pub fn issue_with_code(
        &self,
        ride_id: &str,
        checkpoint: Checkpoint,
        code: &str,
        now: TimeStamp<Utc>,
    ) -> Result<IssuedOtp, RideError> {
        if code.len() != self.digits as usize || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(anyhow::anyhow!("one-time code must be {} digits", self.digits).into());
        }

        let challenge = OtpChallenge {
            ride_id: ride_id.to_string(),
            checkpoint,
            code_digest: Self::digest(ride_id, checkpoint, code),
            issued_at: now.clone(),
            expires_at: now.plus(self.ttl),
            consumed: false,
            attempts: 0,
        };
        let key = Self::key(ride_id, checkpoint);
        self.tree.insert(key.as_bytes(), encode(&challenge)?)?;
        tracing::debug!(ride_id, %checkpoint, expires_at = %challenge.expires_at, "otp issued");

        Ok(IssuedOtp {
            code: code.to_string(),
            expires_at: challenge.expires_at,
        })
    }

    pub fn peek(
        &self,
        ride_id: &str,
        checkpoint: Checkpoint,
    ) -> Result<Option<OtpChallenge>, RideError> {
        let key = Self::key(ride_id, checkpoint);
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Classifies the challenge state when no code was submitted.
    pub fn status(
        &self,
        ride_id: &str,
        checkpoint: Checkpoint,
        now: &TimeStamp<Utc>,
    ) -> Result<OtpIssue, RideError> {
        Ok(match self.peek(ride_id, checkpoint)? {
            None => OtpIssue::NotRequested,
            Some(c) if c.consumed => OtpIssue::Consumed,
            Some(c) if c.is_expired(now) => OtpIssue::Expired,
            Some(c) if c.attempts >= self.max_attempts => OtpIssue::TooManyAttempts,
            Some(_) => OtpIssue::NotSubmitted,
        })
    }

    /// Checks `code` and marks the challenge consumed on success.
    pub fn consume(
        &self,
        ride_id: &str,
        checkpoint: Checkpoint,
        code: &str,
        now: &TimeStamp<Utc>,
    ) -> Result<OtpCheck, RideError> {
        let key = Self::key(ride_id, checkpoint);
        match self.tree.get(key.as_bytes())? {
            Some(read) => self.consume_from(ride_id, checkpoint, code, now, read),
            None => Ok(OtpCheck::Rejected(OtpIssue::NotRequested)),
        }
    }

    // Every write is a compare-and-swap against `read`. A lost swap retries
    // on the bytes that won, unless those belong to a newer challenge.
    fn consume_from(
        &self,
        ride_id: &str,
        checkpoint: Checkpoint,
        code: &str,
        now: &TimeStamp<Utc>,
        read: sled::IVec,
    ) -> Result<OtpCheck, RideError> {
        let key = Self::key(ride_id, checkpoint);
        let first: OtpChallenge = decode(&key, &read)?;
        let mut current = read;

        loop {
            let mut challenge: OtpChallenge = decode(&key, &current)?;
            if challenge.issued_at != first.issued_at || challenge.code_digest != first.code_digest
            {
                tracing::warn!(ride_id, %checkpoint, "otp re-issued while being verified");
                return Ok(OtpCheck::Rejected(OtpIssue::Superseded));
            }
            if challenge.consumed {
                return Ok(OtpCheck::Rejected(OtpIssue::Consumed));
            }
            if challenge.is_expired(now) {
                return Ok(OtpCheck::Rejected(OtpIssue::Expired));
            }
            if challenge.attempts >= self.max_attempts {
                return Ok(OtpCheck::Rejected(OtpIssue::TooManyAttempts));
            }

            let outcome = if challenge.code_digest == Self::digest(ride_id, checkpoint, code) {
                challenge.consumed = true;
                OtpCheck::Verified
            } else {
                challenge.attempts += 1;
                OtpCheck::Rejected(OtpIssue::Mismatch)
            };

            match self.tree.compare_and_swap(
                key.as_bytes(),
                Some(&current),
                Some(encode(&challenge)?),
            )? {
                Ok(()) => return Ok(outcome),
                Err(sled::CompareAndSwapError {
                    current: Some(newer),
                    ..
                }) => current = newer,
                Err(_) => {
                    tracing::warn!(ride_id, %checkpoint, "otp discarded while being verified");
                    return Ok(OtpCheck::Rejected(OtpIssue::Superseded));
                }
            }
        }
    }

    /// Drops every challenge for a ride; used once the ride is terminal.
    pub fn discard(&self, ride_id: &str) -> Result<(), RideError> {
        for checkpoint in [Checkpoint::Pickup, Checkpoint::Drop] {
            self.tree.remove(Self::key(ride_id, checkpoint).as_bytes())?;
        }
        Ok(())
    }
}

/// Zero-padded random numeric code of the given length.
pub fn generate_code(digits: u32) -> String {
    let upper = 10u32.pow(digits);
    let n = rand::thread_rng().gen_range(0..upper);
    format!("{:0width$}", n, width = digits as usize)
}
