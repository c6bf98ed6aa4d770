/// An address observed as a transaction sender. Upserted on any observed activity; `address`
/// is the natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub address: String,
    pub first_seen_height: i64,
    pub last_seen_height: i64,
}
