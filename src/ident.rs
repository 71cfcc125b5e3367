use ulid::Ulid;

/// Collision-resistant opaque identifier source. Injectable so tests can
/// pin ids; the default mints ULIDs.
pub trait Ident: Send + Sync {
    fn session_id(&self) -> Ulid;
    /// Sole credential for guest self-service cancellation; unique
    /// across all bookings.
    fn cancellation_token(&self) -> String;
}

pub struct UlidIdent;

impl Ident for UlidIdent {
    fn session_id(&self) -> Ulid {
        Ulid::new()
    }

    fn cancellation_token(&self) -> String {
        format!("cancel_{}", Ulid::new().to_string().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_prefixed_and_distinct() {
        let ident = UlidIdent;
        let a = ident.cancellation_token();
        let b = ident.cancellation_token();
        assert!(a.starts_with("cancel_"));
        assert_ne!(a, b);
    }

    #[test]
    fn session_ids_are_distinct() {
        let ident = UlidIdent;
        assert_ne!(ident.session_id(), ident.session_id());
    }
}
