/// Delivery quality negotiated for a sink link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Qos {
    /// Sender pre-settles every transfer; no settlement callback is ever
    /// registered and no offset is tracked for commit purposes.
    AtMostOnce,
    /// Sender awaits peer settlement before an offset becomes eligible for
    /// commit.
    AtLeastOnce,
}
