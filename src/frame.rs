//! On-media frame layout and the store's scratch frame.
//!
//! A frame is the header (payload CRC, generation counter, size sentinel)
//! followed by the raw record bytes and 0xFF padding up to the next 32-bit
//! word. The `bytes` sentinel must equal the full frame size for a slot to
//! be considered at all; erased NOR reads as `0xFFFFFFFF` there and is
//! rejected without a separate empty marker.

use crate::platform::{AlignedOps, Crc, Platform};
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::trace;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

pub(crate) const HEADER_BYTES: usize = 12;
pub(crate) const WORD_BYTES: usize = 4;

const CRC_OFFSET: usize = 0;
const COUNTER_OFFSET: usize = 4;
const BYTES_OFFSET: usize = 8;

/// Header plus `payload` bytes, rounded up to a whole number of words.
pub(crate) const fn frame_bytes(payload: usize) -> usize {
    (HEADER_BYTES + payload).div_ceil(WORD_BYTES) * WORD_BYTES
}

/// One bad slot during a load scan or save attempt. The store advances to
/// the neighboring slot and retries; this never escapes to the caller.
pub(crate) struct SlotError;

/// The store's single in-memory frame, used for reads and writes alike.
pub(crate) struct Frame {
    buf: Vec<u8>,
}

impl Frame {
    pub(crate) fn new(frame_bytes: usize) -> Self {
        let mut frame = Frame {
            buf: vec![0xFF; frame_bytes],
        };
        frame.clear();
        frame
    }

    /// Zero the header and fill payload and padding with the NOR erase
    /// state, so a never-written scratch mirrors virgin media.
    pub(crate) fn clear(&mut self) {
        self.buf.fill(0xFF);
        self.buf[..HEADER_BYTES].fill(0);
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn crc(&self) -> u32 {
        self.get_u32(CRC_OFFSET)
    }

    pub(crate) fn counter(&self) -> u32 {
        self.get_u32(COUNTER_OFFSET)
    }

    pub(crate) fn bytes(&self) -> u32 {
        self.get_u32(BYTES_OFFSET)
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.buf[HEADER_BYTES..]
    }

    pub(crate) fn is_erased(&self) -> bool {
        self.buf.iter().all(|&byte| byte == 0xFF)
    }

    fn get_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.buf[offset],
            self.buf[offset + 1],
            self.buf[offset + 2],
            self.buf[offset + 3],
        ])
    }

    fn set_u32(&mut self, offset: usize, value: u32) {
        self.buf[offset..offset + WORD_BYTES].copy_from_slice(&value.to_le_bytes());
    }

    /// Stamp a new generation: record bytes, fresh padding, size sentinel,
    /// payload CRC.
    pub(crate) fn stamp<C: Crc>(&mut self, record: &[u8], counter: u32) {
        self.buf[HEADER_BYTES..HEADER_BYTES + record.len()].copy_from_slice(record);
        self.buf[HEADER_BYTES + record.len()..].fill(0xFF);
        let total = self.buf.len() as u32;
        self.set_u32(BYTES_OFFSET, total);
        self.set_u32(COUNTER_OFFSET, counter);
        let crc = C::crc32(u32::MAX, &self.buf[HEADER_BYTES..]);
        self.set_u32(CRC_OFFSET, crc);
    }

    /// Size sentinel and payload CRC both check out.
    pub(crate) fn is_valid<C: Crc>(&self) -> bool {
        self.bytes() as usize == self.buf.len()
            && self.crc() == C::crc32(u32::MAX, &self.buf[HEADER_BYTES..])
    }

    /// Read only the header at `location`. Enough to decide whether the
    /// slot is worth a full read; the payload CRC is not checked yet.
    pub(crate) fn read_header_from<P: Platform>(
        &mut self,
        flash: &mut P,
        location: u32,
    ) -> Result<(), SlotError> {
        #[cfg(feature = "defmt")]
        trace!("read_header_from: @{:#08x}", location);

        self.set_u32(COUNTER_OFFSET, 0);
        let frame_len = self.buf.len();
        let ok = read_aligned(flash, location, &mut self.buf[..HEADER_BYTES]).is_ok();
        if ok && self.bytes() as usize == frame_len {
            Ok(())
        } else {
            self.set_u32(BYTES_OFFSET, 0);
            self.set_u32(CRC_OFFSET, 0);
            Err(SlotError)
        }
    }

    /// Read a full frame at `location` and validate it.
    pub(crate) fn read_from<P: Platform>(
        &mut self,
        flash: &mut P,
        location: u32,
    ) -> Result<(), SlotError> {
        #[cfg(feature = "defmt")]
        trace!("read_from: @{:#08x}", location);

        let ok = read_aligned(flash, location, &mut self.buf).is_ok();
        if ok && self.is_valid::<P>() {
            Ok(())
        } else {
            self.set_u32(BYTES_OFFSET, 0);
            self.set_u32(CRC_OFFSET, 0);
            Err(SlotError)
        }
    }

    /// Read a full frame at `location` without judging its content. Used by
    /// the slot survey, which classifies raw bytes itself.
    pub(crate) fn read_raw<P: Platform>(
        &mut self,
        flash: &mut P,
        location: u32,
    ) -> Result<(), SlotError> {
        read_aligned(flash, location, &mut self.buf).map_err(|_| SlotError)
    }

    /// Program the frame at `location`: erase the slot's pages, write, read
    /// back and compare. Any mismatch condemns the slot.
    pub(crate) fn program_to<P: Platform>(
        &self,
        flash: &mut P,
        location: u32,
    ) -> Result<(), SlotError> {
        #[cfg(feature = "defmt")]
        trace!("program_to: @{:#08x} [{}]", location, self.buf.len());

        let erase_len = P::align_erase(self.buf.len()) as u32;
        flash
            .erase(location, location + erase_len)
            .map_err(|_| SlotError)?;
        write_aligned(flash, location, &self.buf).map_err(|_| SlotError)?;

        let mut readback = vec![0u8; self.buf.len()];
        read_aligned(flash, location, &mut readback).map_err(|_| SlotError)?;
        if readback == self.buf {
            Ok(())
        } else {
            Err(SlotError)
        }
    }
}

fn read_aligned<P: Platform>(flash: &mut P, offset: u32, buf: &mut [u8]) -> Result<(), P::Error> {
    if buf.len().is_multiple_of(P::READ_SIZE) {
        flash.read(offset, buf)
    } else {
        let mut aligned = vec![0u8; P::align_read(buf.len())];
        flash.read(offset, &mut aligned)?;
        buf.copy_from_slice(&aligned[..buf.len()]);
        Ok(())
    }
}

fn write_aligned<P: Platform>(flash: &mut P, offset: u32, bytes: &[u8]) -> Result<(), P::Error> {
    if bytes.len().is_multiple_of(P::WRITE_SIZE) {
        flash.write(offset, bytes)
    } else {
        // pad the tail with the erase state; flash cannot tell it apart
        // from untouched cells
        let mut aligned = vec![0xFFu8; P::align_write(bytes.len())];
        aligned[..bytes.len()].copy_from_slice(bytes);
        flash.write(offset, &aligned)
    }
}
