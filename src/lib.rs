#![doc = include_str!("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod crc;
pub mod error;
mod frame;
pub mod platform;

extern crate alloc;

use crate::error::Error;
use crate::frame::Frame;
use crate::platform::Platform;
use alloc::vec::Vec;
use core::marker::PhantomData;
#[cfg(feature = "defmt")]
use defmt::trace;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes};

/// Record types the store can persist: plain data with no padding, valid
/// for any bit pattern. Blanket-implemented for everything that satisfies
/// the [`zerocopy`] bounds; derive them on a `#[repr(C, packed)]` struct.
pub trait Record: FromBytes + IntoBytes + Immutable {}

impl<T: FromBytes + IntoBytes + Immutable> Record for T {}

/// Frame size in bytes for a record of type `R`: the 12-byte header plus
/// the record, rounded up to a whole number of 32-bit words.
pub const fn frame_size<R: Record>() -> usize {
    frame::frame_bytes(size_of::<R>())
}

/// Media pages one frame of `R` occupies for a given erase-page size.
pub const fn frame_pages<R: Record>(page_size: usize) -> usize {
    frame_size::<R>().div_ceil(page_size)
}

/// Classification of one wear slot, as reported by [`Store::survey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotStatus {
    /// The slot reads as the erase state; never programmed since the last
    /// erase.
    Erased,
    /// Structurally sound frame whose payload CRC matches.
    Valid { counter: u32 },
    /// Plausible header but the payload CRC does not match; a torn or
    /// decayed write.
    Corrupt { counter: u32 },
    /// The size sentinel matches neither this record layout nor the erase
    /// state. Usually a ring written with a different record type.
    Foreign,
    /// The media refused the read.
    Unreadable,
}

/// A single persistent record of type `R`, rotated across a ring of `N`
/// equally sized, page-aligned wear slots on platform `P`.
///
/// Every save stamps a fresh generation counter and programs the slot
/// after the current one; every cold load finds the highest counter among
/// structurally valid headers and walks backwards until a frame passes its
/// payload CRC. An interrupted write therefore costs at most one
/// generation.
///
/// One store instance owns one region; rings of two instances must not
/// overlap. The store performs no locking, callers on preemptive systems
/// wrap `load`/`save` in their own critical section.
pub struct Store<R: Record, P: Platform> {
    flash: P,
    start: u32,
    slot_bytes: u32,
    pages: u32,
    wear_levels: u32,
    /// Slot holding the generation in the scratch frame, when loaded.
    current: Option<u32>,
    frame: Frame,
    _record: PhantomData<R>,
}

impl<R: Record, P: Platform> Store<R, P> {
    /// Build a store over `wear_levels` slots starting at byte offset
    /// `start`. No media I/O happens here; the ring is only checked
    /// against the platform geometry.
    pub fn new(flash: P, start: u32, wear_levels: u32) -> Result<Self, Error> {
        let pages_per_slot = frame_pages::<R>(P::ERASE_SIZE) as u32;
        Self::build(flash, start, wear_levels, pages_per_slot)
    }

    /// Build a store over `start..end`, using as many whole slots as fit.
    pub fn with_range(flash: P, start: u32, end: u32) -> Result<Self, Error> {
        let pages_per_slot = frame_pages::<R>(P::ERASE_SIZE) as u32;
        let region_pages = end.saturating_sub(start) / P::ERASE_SIZE as u32;
        Self::build(flash, start, region_pages / pages_per_slot, pages_per_slot)
    }

    fn build(flash: P, start: u32, wear_levels: u32, pages_per_slot: u32) -> Result<Self, Error> {
        if !(start as usize).is_multiple_of(P::ERASE_SIZE) {
            return Err(Error::InvalidRegionOffset);
        }

        let pages = wear_levels * pages_per_slot;
        if start as usize + pages as usize * P::ERASE_SIZE > flash.capacity() {
            return Err(Error::InvalidRegionSize);
        }

        Ok(Store {
            flash,
            start,
            slot_bytes: pages_per_slot * P::ERASE_SIZE as u32,
            pages,
            wear_levels,
            current: None,
            frame: Frame::new(frame_size::<R>()),
            _record: PhantomData,
        })
    }

    /// Load the newest valid record.
    ///
    /// While loaded this re-reads and re-validates the current slot, so a
    /// record rotted in place is caught. Otherwise a cold load scans the
    /// slot headers for the highest generation and walks backwards from it
    /// until a frame passes its payload CRC.
    pub fn load(&mut self) -> Result<R, Error> {
        #[cfg(feature = "defmt")]
        trace!("load");

        if !self.fits() {
            return Err(Error::RecordTooLarge);
        }

        if let Some(location) = self.current {
            if self.frame.read_from(&mut self.flash, location).is_ok() {
                return Ok(self.record());
            }
            self.current = None;
        }

        // Newest-header pass. Track the largest generation among slots whose
        // size sentinel matches; once a counter stops rising the newest frame
        // lies behind us and the scan ends there.
        let mut newest: Option<u32> = None;
        let mut location = self.start;
        for _ in 0..self.wear_levels {
            if self.frame.read_header_from(&mut self.flash, location).is_ok() {
                match newest {
                    Some(counter) if self.frame.counter() <= counter => break,
                    _ => {
                        newest = Some(self.frame.counter());
                        location = self.next_slot(location);
                    }
                }
            } else {
                location = self.next_slot(location);
            }
        }

        if newest.is_none() {
            return Err(Error::NotFound);
        }

        // Backward pass. The slot before `location` should hold the newest
        // frame; its CRC may still be bad after a torn write, so keep walking
        // back until one generation verifies in full.
        for _ in 0..self.wear_levels {
            location = self.prev_slot(location);
            if self.frame.read_from(&mut self.flash, location).is_ok() {
                self.current = Some(location);
                return Ok(self.record());
            }
            #[cfg(feature = "debug-logs")]
            println!("load: invalid frame @{location:#08x}");
        }

        Err(Error::NotFound)
    }

    /// Save a new generation of the record.
    ///
    /// While loaded the write lands on the slot after the current one and
    /// the generation counter advances by one; a slot that fails to program
    /// and verify is skipped for the next one. On virgin or unreadable
    /// media pass `force` to seed the ring at its first slot with
    /// generation zero.
    ///
    /// Each save costs one slot erase. If the layout of `R` changes across
    /// firmware versions, save the new layout twice so a later load failure
    /// still finds a newer-format generation to fall back to.
    pub fn save(&mut self, record: &R, force: bool) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("save: force={}", force);

        if !self.fits() {
            return Err(Error::RecordTooLarge);
        }

        let (mut target, counter) = match self.current {
            Some(location) => (self.next_slot(location), self.frame.counter() + 1),
            None if force => (self.start, 0),
            None => return Err(Error::NotLoaded),
        };

        self.frame.stamp::<P>(record.as_bytes(), counter);

        // Keep the current slot out of the retry budget while alternatives
        // exist; a run of bad slots must not take down the one copy that
        // still loads.
        let mut budget = self.wear_levels;
        if self.current.is_some() && self.wear_levels > 1 {
            budget -= 1;
        }

        for _ in 0..budget {
            if self.frame.program_to(&mut self.flash, target).is_ok() {
                self.current = Some(target);
                return Ok(());
            }
            #[cfg(feature = "debug-logs")]
            println!("save: program failed @{target:#08x}");
            target = self.next_slot(target);
        }

        Err(Error::Exhausted)
    }

    /// Drop the held record and forget the current slot. No media I/O.
    pub fn unload(&mut self) {
        #[cfg(feature = "defmt")]
        trace!("unload");

        self.frame.clear();
        self.current = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.current.is_some()
    }

    /// Byte offset of the slot holding the current generation.
    pub fn location(&self) -> Option<u32> {
        self.current
    }

    /// Generation counter of the held frame; zero when nothing is held.
    pub fn counter(&self) -> u32 {
        self.frame.counter()
    }

    /// Total media pages reserved for the ring.
    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Number of slots writes rotate over.
    pub fn wear_levels(&self) -> u32 {
        self.wear_levels
    }

    /// Classify every slot in the ring. Debugging aid; reads each slot's
    /// frame through a local scratch, so the held record is not disturbed.
    pub fn survey(&mut self) -> Vec<SlotStatus> {
        #[cfg(feature = "defmt")]
        trace!("survey");

        let mut probe = Frame::new(frame_size::<R>());
        (0..self.wear_levels)
            .map(|index| {
                let location = self.start + index * self.slot_bytes;
                if probe.read_raw(&mut self.flash, location).is_err() {
                    SlotStatus::Unreadable
                } else if probe.is_erased() {
                    SlotStatus::Erased
                } else if probe.bytes() as usize != probe.len() {
                    SlotStatus::Foreign
                } else if probe.is_valid::<P>() {
                    SlotStatus::Valid {
                        counter: probe.counter(),
                    }
                } else {
                    SlotStatus::Corrupt {
                        counter: probe.counter(),
                    }
                }
            })
            .collect()
    }

    fn fits(&self) -> bool {
        frame_size::<R>() <= self.wear_levels as usize * P::ERASE_SIZE
    }

    fn record(&self) -> R {
        let mut record = R::new_zeroed();
        record
            .as_mut_bytes()
            .copy_from_slice(&self.frame.payload()[..size_of::<R>()]);
        record
    }

    fn top(&self) -> u32 {
        self.start + (self.wear_levels - 1) * self.slot_bytes
    }

    fn next_slot(&self, location: u32) -> u32 {
        if location < self.top() {
            location + self.slot_bytes
        } else {
            self.start
        }
    }

    fn prev_slot(&self, location: u32) -> u32 {
        if location > self.start {
            location - self.slot_bytes
        } else {
            self.top()
        }
    }
}
