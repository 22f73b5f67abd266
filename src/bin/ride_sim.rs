//! Drives one ride from posting to settlement against a local sled database.
use anyhow::Context;
use ride_dispatch::checkpoint::Checkpoint;
use ride_dispatch::config::LifecycleConfig;
use ride_dispatch::events::LogSink;
use ride_dispatch::location::{FixBoard, LocationFix};
use ride_dispatch::offer::{AcceptMode, Amenities, OfferDraft, PaymentMethod, TripType, VehicleType};
use ride_dispatch::ride::Actor;
use ride_dispatch::telemetry;
use ride_dispatch::types::TimeStamp;
use ride_dispatch::utils::{IdKind, new_id};
use ride_dispatch::{Envelope, RideLifecycleService};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let config = LifecycleConfig::from_env()?;
    telemetry::init(&config.log_level)?;

    let db = sled::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let board = Arc::new(FixBoard::new());
    let service = RideLifecycleService::open(Arc::new(db), board.clone(), config)?
        .with_events(Arc::new(LogSink));

    let poster = new_id(IdKind::Driver)?;
    let driver = new_id(IdKind::Driver)?;
    let customer = new_id(IdKind::Customer)?;

    let ride = service.post_offer(
        OfferDraft::new()
            .posted_by(&poster)
            .set_trip_type(TripType::OneWay)
            .set_vehicle_type(VehicleType::Sedan)
            .set_pickup("Kashmere Gate ISBT", 28.6675, 77.2282)
            .set_drop("Sector 29, Gurugram", 28.4691, 77.0633)
            .set_pickup_at(TimeStamp::new())
            .set_total_amount(1_450)
            .set_commission_amount(150)
            .set_extra_charges(14, 2)
            .set_accept_mode(AcceptMode::Instant)
            .set_amenities(Amenities {
                ac: true,
                carrier: true,
                ..Amenities::default()
            })
            .set_payment_method(PaymentMethod::Cash),
    )?;

    let ride = service.assign(&Envelope::for_ride(&ride, TimeStamp::new()), &driver)?.ride;
    let ride = service
        .record_partial_payment(
            &Envelope::for_ride(&ride, TimeStamp::new()),
            Actor::Customer(customer),
            250,
        )?
        .ride;

    // driver pulls up 80 m short of the pickup pin
    let offer = service.offer_for(&ride)?;
    let near_pickup = ride_dispatch::geo::GeoPoint::new(
        offer.pickup_point().lat() - 0.00072,
        offer.pickup_point().lon(),
    )?;
    board.report(&driver, LocationFix::new(near_pickup, TimeStamp::new()));

    let ride = service
        .claim_pickup(&Envelope::for_ride(&ride, TimeStamp::new()), &driver, None)?
        .ride;
    let ride = service
        .start_trip(&Envelope::for_ride(&ride, TimeStamp::new()), &driver)?
        .ride;

    // no fresh fix at the drop, so the customer reads out a code instead
    board.forget(&driver);
    let issued = service.issue_otp(&ride.id, Checkpoint::Drop)?;
    let outcome = service.claim_drop(
        &Envelope::for_ride(&ride, TimeStamp::new()),
        &driver,
        Some(&issued.code),
        1_200,
        None,
    )?;

    outcome.ride.view_history();
    tracing::info!(
        ride_id = %outcome.ride.id,
        status = %outcome.ride.status,
        driver_earning = outcome.ride.driver_earning,
        reconciliation = ?outcome.ride.reconciliation,
        "simulation finished"
    );
    Ok(())
}
