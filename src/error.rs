use thiserror::Error;

/// Errors surfaced by [`Store`](crate::Store) operations. Marked non-exhaustive to
/// allow future additions without breaking the API; transient media failures are
/// recovered internally (skip the slot, try the next) and never get a variant of
/// their own.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The slot ring must begin on an erase-page boundary.
    #[error("region start not page aligned")]
    InvalidRegionOffset,

    /// The slot ring extends past the end of the media.
    #[error("region does not fit the media")]
    InvalidRegionSize,

    /// Header plus record exceed `wear_levels * page_size`; nothing was read
    /// or written.
    #[error("record too large for the slot ring")]
    RecordTooLarge,

    /// No slot holds a structurally valid frame with a matching payload CRC.
    /// Expected on first boot; pass `force` to `save` to seed the ring.
    #[error("no valid record on media")]
    NotFound,

    /// `save` without `force` while no record is loaded.
    #[error("no record loaded")]
    NotLoaded,

    /// Every candidate slot failed to program and verify. The slot holding the
    /// current generation was not touched and can still be loaded.
    #[error("all slots failed to program")]
    Exhausted,
}
