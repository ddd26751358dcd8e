//! Reference generation
//!
//! Transfer ids are UUIDv7 so storage iteration is time-ordered; token and
//! alert ids are UUIDv4 so they carry no timing information and cannot be
//! guessed from an earlier id.

use uuid::Uuid;

/// Globally unique, time-ordered transfer reference
pub fn transfer_id() -> Uuid {
    Uuid::now_v7()
}

/// Cryptographically random token identifier
pub fn token_id() -> Uuid {
    Uuid::new_v4()
}

/// Alert identifier
pub fn alert_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_ids_are_v7_and_unique() {
        let a = transfer_id();
        let b = transfer_id();
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 7);
    }

    #[test]
    fn transfer_ids_are_monotonic_in_storage_order() {
        let a = transfer_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = transfer_id();
        assert!(b.as_bytes() > a.as_bytes());
    }

    #[test]
    fn token_ids_are_v4() {
        let a = token_id();
        assert_eq!(a.get_version_num(), 4);
        assert_ne!(a, token_id());
    }
}
