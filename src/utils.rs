//! Identifier generation: uuid7 bytes wrapped in bech32 with a per-kind prefix

use bech32::Bech32m;
use uuid7::uuid7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Ride,
    Driver,
    Customer,
    Admin,
}

impl IdKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            IdKind::Ride => "ride_",
            IdKind::Driver => "drv_",
            IdKind::Customer => "cus_",
            IdKind::Admin => "adm_",
        }
    }
}

// time-ordered, so rides created later sort later in the store
pub fn new_id(kind: IdKind) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(kind.prefix())?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// True when `id` decodes as a bech32 id of the given kind carrying a full uuid.
pub fn is_id_of(kind: IdKind, id: &str) -> bool {
    match bech32::decode(id) {
        Ok((hrp, data)) => hrp.as_str() == kind.prefix() && data.len() == 16,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_kind() {
        let ride = new_id(IdKind::Ride).unwrap();
        let driver = new_id(IdKind::Driver).unwrap();

        assert!(ride.starts_with("ride_1"));
        assert!(is_id_of(IdKind::Ride, &ride));
        assert!(!is_id_of(IdKind::Driver, &ride));
        assert!(is_id_of(IdKind::Driver, &driver));
    }

    #[test]
    fn ids_are_unique() {
        let a = new_id(IdKind::Ride).unwrap();
        let b = new_id(IdKind::Ride).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_is_not_an_id() {
        assert!(!is_id_of(IdKind::Ride, "ride_123"));
        assert!(!is_id_of(IdKind::Ride, ""));
    }
}
