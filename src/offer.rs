//! Posted ride offers: the draft builder and the finalised, content-addressed offer
use crate::error::{RideError, ValidationError};
use crate::geo::GeoPoint;
use crate::types::TimeStamp;
use chrono::Utc;

pub const MAX_NOTES_LEN: usize = 500;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq)]
pub enum TripType {
    #[n(0)]
    OneWay,
    #[n(1)]
    RoundTrip,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq)]
pub enum VehicleType {
    #[n(0)]
    Hatchback,
    #[n(1)]
    Sedan,
    #[n(2)]
    Suv,
    #[n(3)]
    Muv,
    #[n(4)]
    TempoTraveller,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq)]
pub enum AcceptMode {
    #[n(0)]
    Instant,
    #[n(1)]
    Scheduled,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq)]
pub enum PaymentMethod {
    #[n(0)]
    Cash,
    #[n(1)]
    Upi,
    #[n(2)]
    Card,
    #[n(3)]
    Wallet,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Amenities {
    #[n(0)]
    pub diesel_only: bool,
    #[n(1)]
    pub carrier: bool,
    #[n(2)]
    pub ac: bool,
    #[n(3)]
    pub music: bool,
    #[n(4)]
    pub food_allowed: bool,
}

impl Amenities {
    pub fn any(&self) -> bool {
        self.diesel_only || self.carrier || self.ac || self.music || self.food_allowed
    }
}

/// Requirement flags. The blanket variants stand alone.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq)]
pub enum Inclusion {
    #[n(0)]
    Itemised(#[n(0)] Amenities),
    #[n(1)]
    AllInclusive,
    #[n(2)]
    AllExclusive,
}

// used for constructing offers before validation
#[derive(Default, Debug, Clone)]
pub struct OfferDraft {
    posted_by: Option<String>,
    trip_type: Option<TripType>,
    vehicle_type: Option<VehicleType>,
    pickup_address: Option<String>,
    pickup: Option<(f64, f64)>,
    drop_address: Option<String>,
    drop: Option<(f64, f64)>,
    pickup_at: Option<TimeStamp<Utc>>,
    total_amount: u64,
    commission_amount: u64,
    extra_per_km: u64,
    extra_per_minute: u64,
    accept_mode: Option<AcceptMode>,
    amenities: Amenities,
    all_inclusive: bool,
    all_exclusive: bool,
    notes: Option<String>,
    payment_method: Option<PaymentMethod>,
}

// Key is the hash of this struct encoded into CBOR
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct RideOffer {
    #[n(0)]
    posted_by: String,
    #[n(1)]
    trip_type: TripType,
    #[n(2)]
    vehicle_type: VehicleType,
    #[n(3)]
    pickup_address: String,
    #[n(4)]
    pickup: GeoPoint,
    #[n(5)]
    drop_address: String,
    #[n(6)]
    drop: GeoPoint,
    #[n(7)]
    pickup_at: TimeStamp<Utc>,
    #[n(8)]
    total_amount: u64,
    #[n(9)]
    commission_amount: u64,
    #[n(10)]
    extra_per_km: u64,
    #[n(11)]
    extra_per_minute: u64,
    #[n(12)]
    accept_mode: AcceptMode,
    #[n(13)]
    inclusion: Inclusion,
    #[n(14)]
    notes: Option<String>,
    #[n(15)]
    payment_method: PaymentMethod,
}

impl OfferDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn posted_by(mut self, driver_id: &str) -> Self {
        self.posted_by = Some(driver_id.to_string());
        self
    }
    pub fn set_trip_type(mut self, trip_type: TripType) -> Self {
        self.trip_type = Some(trip_type);
        self
    }
    pub fn set_vehicle_type(mut self, vehicle_type: VehicleType) -> Self {
        self.vehicle_type = Some(vehicle_type);
        self
    }
    pub fn set_pickup(mut self, address: &str, lat: f64, lon: f64) -> Self {
        self.pickup_address = Some(address.to_string());
        self.pickup = Some((lat, lon));
        self
    }
    pub fn set_drop(mut self, address: &str, lat: f64, lon: f64) -> Self {
        self.drop_address = Some(address.to_string());
        self.drop = Some((lat, lon));
        self
    }
    pub fn set_pickup_at(mut self, at: TimeStamp<Utc>) -> Self {
        self.pickup_at = Some(at);
        self
    }
    pub fn set_total_amount(mut self, amount: u64) -> Self {
        self.total_amount = amount;
        self
    }
    pub fn set_commission_amount(mut self, amount: u64) -> Self {
        self.commission_amount = amount;
        self
    }
    pub fn set_extra_charges(mut self, per_km: u64, per_minute: u64) -> Self {
        self.extra_per_km = per_km;
        self.extra_per_minute = per_minute;
        self
    }
    pub fn set_accept_mode(mut self, mode: AcceptMode) -> Self {
        self.accept_mode = Some(mode);
        self
    }
    pub fn set_amenities(mut self, amenities: Amenities) -> Self {
        self.amenities = amenities;
        self
    }
    pub fn set_all_inclusive(mut self, on: bool) -> Self {
        self.all_inclusive = on;
        self
    }
    pub fn set_all_exclusive(mut self, on: bool) -> Self {
        self.all_exclusive = on;
        self
    }
    pub fn set_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }
    pub fn set_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    /// Checks every field and produces the immutable offer.
    pub fn finalise(self) -> Result<RideOffer, ValidationError> {
        let posted_by = self
            .posted_by
            .filter(|id| !id.is_empty())
            .ok_or(ValidationError::MissingField("posting driver"))?;
        let trip_type = self
            .trip_type
            .ok_or(ValidationError::MissingField("trip type"))?;
        let vehicle_type = self
            .vehicle_type
            .ok_or(ValidationError::MissingField("vehicle type"))?;
        let (pickup_lat, pickup_lon) = self
            .pickup
            .ok_or(ValidationError::MissingField("pickup location"))?;
        let (drop_lat, drop_lon) = self
            .drop
            .ok_or(ValidationError::MissingField("drop location"))?;
        let pickup_at = self
            .pickup_at
            .ok_or(ValidationError::MissingField("pickup time"))?;
        let accept_mode = self
            .accept_mode
            .ok_or(ValidationError::MissingField("accept mode"))?;
        let payment_method = self
            .payment_method
            .ok_or(ValidationError::MissingField("payment method"))?;

        if self.total_amount == 0 {
            return Err(ValidationError::ZeroTotal);
        }
        if self.commission_amount > self.total_amount {
            return Err(ValidationError::CommissionExceedsTotal {
                total: self.total_amount,
                commission: self.commission_amount,
            });
        }

        let inclusion = match (self.all_inclusive, self.all_exclusive) {
            (true, true) => return Err(ValidationError::ConflictingRequirements),
            (true, false) | (false, true) if self.amenities.any() => {
                return Err(ValidationError::ConflictingRequirements);
            }
            (true, false) => Inclusion::AllInclusive,
            (false, true) => Inclusion::AllExclusive,
            (false, false) => Inclusion::Itemised(self.amenities),
        };

        let notes = self.notes.filter(|n| !n.trim().is_empty());
        if let Some(n) = &notes {
            let len = n.chars().count();
            if len > MAX_NOTES_LEN {
                return Err(ValidationError::NotesTooLong {
                    len,
                    max: MAX_NOTES_LEN,
                });
            }
        }

        Ok(RideOffer {
            posted_by,
            trip_type,
            vehicle_type,
            pickup_address: self.pickup_address.unwrap_or_default(),
            pickup: GeoPoint::new(pickup_lat, pickup_lon)?,
            drop_address: self.drop_address.unwrap_or_default(),
            drop: GeoPoint::new(drop_lat, drop_lon)?,
            pickup_at,
            total_amount: self.total_amount,
            commission_amount: self.commission_amount,
            extra_per_km: self.extra_per_km,
            extra_per_minute: self.extra_per_minute,
            accept_mode,
            inclusion,
            notes,
            payment_method,
        })
    }
}

impl RideOffer {
    pub fn posted_by(&self) -> &str {
        &self.posted_by
    }
    pub fn trip_type(&self) -> TripType {
        self.trip_type
    }
    pub fn vehicle_type(&self) -> VehicleType {
        self.vehicle_type
    }
    pub fn pickup_address(&self) -> &str {
        &self.pickup_address
    }
    pub fn pickup_point(&self) -> GeoPoint {
        self.pickup
    }
    pub fn drop_address(&self) -> &str {
        &self.drop_address
    }
    pub fn drop_point(&self) -> GeoPoint {
        self.drop
    }
    pub fn pickup_at(&self) -> &TimeStamp<Utc> {
        &self.pickup_at
    }
    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }
    pub fn commission_amount(&self) -> u64 {
        self.commission_amount
    }
    /// Never underflows: finalise rejects commission above the total.
    pub fn driver_earning(&self) -> u64 {
        self.total_amount - self.commission_amount
    }
    pub fn extra_per_km(&self) -> u64 {
        self.extra_per_km
    }
    pub fn extra_per_minute(&self) -> u64 {
        self.extra_per_minute
    }
    pub fn accept_mode(&self) -> AcceptMode {
        self.accept_mode
    }
    pub fn inclusion(&self) -> Inclusion {
        self.inclusion
    }
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    // returns the sha256 of the CBOR encoding alongside the encoding itself
    pub fn encode(&self) -> Result<(String, Vec<u8>), RideError> {
        let contents = minicbor::to_vec(self).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let hash = sha256::digest(contents.as_slice());

        Ok((hash, contents))
    }
}
