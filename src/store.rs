//! Versioned ride records and the offers they reference.
//!
//! Writes are compare-and-swap against the exact bytes that were read, so
//! two writers holding the same version cannot both succeed.

use crate::error::RideError;
use crate::offer::RideOffer;
use crate::ride::{Ride, RideStatus};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db};
use std::sync::Arc;

const RIDE_PREFIX: &str = "ride/";
const OFFER_PREFIX: &str = "offer/";

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, RideError> {
    minicbor::to_vec(value).map_err(|e| anyhow::anyhow!("cbor encoding failed: {e}").into())
}

pub(crate) fn decode<'b, T: minicbor::Decode<'b, ()>>(
    key: &str,
    bytes: &'b [u8],
) -> Result<T, RideError> {
    minicbor::decode(bytes).map_err(|e| RideError::CorruptRecord {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub trait RideStore: Send + Sync {
    /// Persists a new offer together with its first ride, atomically.
    fn post(&self, offer: &RideOffer, ride: &Ride) -> Result<(), RideError>;

    fn offer(&self, offer_hash: &str) -> Result<Option<RideOffer>, RideError>;

    /// Writes a ride that must not exist yet.
    fn insert(&self, ride: &Ride) -> Result<(), RideError>;

    fn load(&self, ride_id: &str) -> Result<Option<Ride>, RideError>;

    /// Replaces the stored ride if it is still at `expected_version`.
    fn replace(&self, expected_version: u64, ride: &Ride) -> Result<(), RideError>;

    /// Like `replace`, but also stores the ride's new offer in the same write.
    fn revise(
        &self,
        expected_version: u64,
        ride: &Ride,
        offer: &RideOffer,
    ) -> Result<(), RideError>;

    fn with_status(&self, status: RideStatus) -> Result<StatusScan, RideError>;
}

/// Rides found by a status scan, plus records that could not be read.
#[derive(Debug, Default)]
pub struct StatusScan {
    pub rides: Vec<Ride>,
    /// Ride id taken from the key, and the decode failure.
    pub unreadable: Vec<(String, RideError)>,
}

#[derive(Clone)]
pub struct SledRideStore {
    instance: Arc<Db>,
}

impl SledRideStore {
    pub fn new(instance: Arc<Db>) -> Self {
        Self { instance }
    }

    fn ride_key(ride_id: &str) -> String {
        format!("{RIDE_PREFIX}{ride_id}")
    }

    fn offer_key(offer_hash: &str) -> String {
        format!("{OFFER_PREFIX}{offer_hash}")
    }

    fn conflict(ride_id: &str, expected: u64, current: Option<&[u8]>) -> RideError {
        let found = current
            .and_then(|bytes| minicbor::decode::<Ride>(bytes).ok())
            .map(|ride| ride.version)
            .unwrap_or(0);
        tracing::warn!(ride_id, expected, found, "ride write lost a race");
        RideError::ConcurrentModification {
            ride_id: ride_id.to_string(),
            expected,
            found,
        }
    }
}

impl RideStore for SledRideStore {
    fn post(&self, offer: &RideOffer, ride: &Ride) -> Result<(), RideError> {
        let (offer_hash, offer_cbor) = offer.encode()?;
        if offer_hash != ride.offer_hash {
            return Err(anyhow::anyhow!(
                "ride {} references offer {}, not {}",
                ride.id,
                ride.offer_hash,
                offer_hash
            )
            .into());
        }
        let key = Self::ride_key(&ride.id);
        if self.instance.contains_key(key.as_bytes())? {
            return Err(Self::conflict(&ride.id, 0, None));
        }

        // Batch insert: offer contents and the ride referencing them
        let mut batch = Batch::default();
        batch.insert(Self::offer_key(&offer_hash).as_bytes(), offer_cbor);
        batch.insert(key.as_bytes(), encode(ride)?);
        self.instance.apply_batch(batch)?;
        Ok(())
    }

    fn offer(&self, offer_hash: &str) -> Result<Option<RideOffer>, RideError> {
        let key = Self::offer_key(offer_hash);
        match self.instance.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn insert(&self, ride: &Ride) -> Result<(), RideError> {
        let key = Self::ride_key(&ride.id);
        match self.instance.compare_and_swap(
            key.as_bytes(),
            None as Option<&[u8]>,
            Some(encode(ride)?),
        )? {
            Ok(()) => Ok(()),
            Err(e) => Err(Self::conflict(&ride.id, 0, e.current.as_deref())),
        }
    }

    fn load(&self, ride_id: &str) -> Result<Option<Ride>, RideError> {
        let key = Self::ride_key(ride_id);
        match self.instance.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn replace(&self, expected_version: u64, ride: &Ride) -> Result<(), RideError> {
        let key = Self::ride_key(&ride.id);
        let Some(current) = self.instance.get(key.as_bytes())? else {
            return Err(RideError::NotFound(ride.id.clone()));
        };
        let stored: Ride = decode(&key, &current)?;
        if stored.version != expected_version {
            return Err(Self::conflict(&ride.id, expected_version, Some(current.as_ref())));
        }

        match self
            .instance
            .compare_and_swap(key.as_bytes(), Some(&current), Some(encode(ride)?))?
        {
            Ok(()) => Ok(()),
            Err(e) => Err(Self::conflict(
                &ride.id,
                expected_version,
                e.current.as_deref(),
            )),
        }
    }

    fn revise(
        &self,
        expected_version: u64,
        ride: &Ride,
        offer: &RideOffer,
    ) -> Result<(), RideError> {
        let (offer_hash, offer_cbor) = offer.encode()?;
        let offer_key = Self::offer_key(&offer_hash);
        let key = Self::ride_key(&ride.id);
        let ride_cbor = encode(ride)?;

        let result = self.instance.transaction(|tx| {
            let Some(current) = tx.get(key.as_bytes())? else {
                return Err(ConflictableTransactionError::Abort(RideError::NotFound(
                    ride.id.clone(),
                )));
            };
            let stored: Ride =
                decode(&key, &current).map_err(ConflictableTransactionError::Abort)?;
            if stored.version != expected_version {
                return Err(ConflictableTransactionError::Abort(Self::conflict(
                    &ride.id,
                    expected_version,
                    Some(current.as_ref()),
                )));
            }
            tx.insert(offer_key.as_bytes(), offer_cbor.clone())?;
            tx.insert(key.as_bytes(), ride_cbor.clone())?;
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn with_status(&self, status: RideStatus) -> Result<StatusScan, RideError> {
        let mut scan = StatusScan::default();
        for entry in self.instance.scan_prefix(RIDE_PREFIX.as_bytes()) {
            let (key, bytes) = entry?;
            let key = String::from_utf8_lossy(&key);
            match decode::<Ride>(&key, &bytes) {
                Ok(ride) if ride.status == status => scan.rides.push(ride),
                Ok(_) => {}
                Err(e) => {
                    let ride_id = key.trim_start_matches(RIDE_PREFIX).to_string();
                    scan.unreadable.push((ride_id, e));
                }
            }
        }
        Ok(scan)
    }
}
