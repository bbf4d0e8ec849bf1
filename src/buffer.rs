//! FIFO word buffer - serialization and deserialization of framed payloads.
//!
//! [`FifoBuffer`] is the staging area between typed application values and
//! the FPGA's 16-bit FIFO queues. Writes append framed words and keep the
//! running CRC current; reads walk the same words with a cursor, strip the
//! framing, and feed the CRC so a frame can be verified in place. The
//! buffer performs no I/O - the FPGA driver drains [`FifoBuffer::words`]
//! and later hands received words back via [`FifoBuffer::set_buffer`].
//!
//! A buffer is not safe for concurrent mutation; interleaved writes would
//! scramble frames and CRC state. Callers serialize access.

use tracing::trace;

use crate::constants::{FIFO_CMD_MASK, FIFO_DELAY, FIFO_DURATION_MAX_US, FIFO_LONG_DELAY};
use crate::crc::Crc16;
use crate::error::{IlcError, IlcResult};
use crate::framing::{Framing, IlcFraming};

/// Scalar that can travel on the bus in network (big-endian) byte order.
///
/// Implemented for i8, u8, i16, u16, i32, u32, u64 and f32. Odd-sized
/// fields (24-bit signed, 48-bit unsigned) have dedicated buffer methods.
pub trait WireValue: Sized + Copy {
    /// Number of payload bytes the value occupies on the wire.
    const WIRE_SIZE: usize;

    /// Write the value into `out[..WIRE_SIZE]` big-endian.
    fn encode_be(self, out: &mut [u8]);

    /// Rebuild the value from `raw[..WIRE_SIZE]` big-endian bytes.
    fn decode_be(raw: &[u8]) -> Self;
}

macro_rules! wire_value {
    ($($ty:ty => $size:expr),* $(,)?) => {$(
        impl WireValue for $ty {
            const WIRE_SIZE: usize = $size;

            #[inline]
            fn encode_be(self, out: &mut [u8]) {
                out[..$size].copy_from_slice(&self.to_be_bytes());
            }

            #[inline]
            fn decode_be(raw: &[u8]) -> Self {
                let mut bytes = [0u8; $size];
                bytes.copy_from_slice(&raw[..$size]);
                Self::from_be_bytes(bytes)
            }
        }
    )*};
}

wire_value! {
    i8 => 1,
    u8 => 1,
    i16 => 2,
    u16 => 2,
    i32 => 4,
    u32 => 4,
    u64 => 8,
    f32 => 4,
}

/// Raw FPGA time value carried in Rx timestamp blocks.
///
/// The gateware counts nanoseconds; [`Timestamp::from_raw`] converts the
/// 64-bit tick count to seconds.
pub struct Timestamp;

impl Timestamp {
    /// Convert raw nanosecond ticks to seconds.
    pub fn from_raw(raw: u64) -> f64 {
        raw as f64 / 1e9
    }

    /// Convert seconds back to raw nanosecond ticks.
    pub fn to_raw(timestamp: f64) -> u64 {
        (timestamp * 1e9) as u64
    }
}

/// Ordered sequence of FIFO words with a read cursor, CRC register and
/// change-recording hook.
///
/// The framing strategy `F` decides how payload bytes map onto words and
/// which tokens delimit frames; [`IlcFraming`] is the default.
///
/// ```
/// use ilc_modbus::FifoBuffer;
///
/// let mut buffer = FifoBuffer::new();
/// buffer.write::<u8>(0x05);
/// buffer.write::<u16>(0x1234);
/// buffer.write_crc();
///
/// buffer.reset();
/// assert_eq!(buffer.read::<u8>().unwrap(), 0x05);
/// assert_eq!(buffer.read::<u16>().unwrap(), 0x1234);
/// buffer.check_crc().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FifoBuffer<F: Framing = IlcFraming> {
    framing: F,
    words: Vec<u16>,
    index: usize,
    crc: Crc16,
    recording: bool,
    records: Vec<u8>,
}

impl FifoBuffer<IlcFraming> {
    /// Empty buffer with the standard ILC framing.
    pub fn new() -> Self {
        Self::with_framing(IlcFraming)
    }

    /// Buffer preloaded with received words, cursor at the start.
    pub fn from_words(words: &[u16]) -> Self {
        let mut buffer = Self::new();
        buffer.set_buffer(words);
        buffer
    }
}

impl Default for FifoBuffer<IlcFraming> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Framing> FifoBuffer<F> {
    /// Empty buffer with a custom framing strategy.
    pub fn with_framing(framing: F) -> Self {
        Self {
            framing,
            words: Vec::new(),
            index: 0,
            crc: Crc16::new(),
            recording: false,
            records: Vec::new(),
        }
    }

    /// FIFO words accumulated so far - what the FPGA driver transmits.
    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Number of words in the buffer.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True when the buffer holds no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// True when the read cursor has consumed every word.
    pub fn end_of_buffer(&self) -> bool {
        self.index >= self.words.len()
    }

    /// True when the word at the cursor marks the end of a received frame.
    pub fn end_of_frame(&self) -> bool {
        self.words.get(self.index) == Some(&self.framing.rx_frame_end())
    }

    /// Move the cursor back to the start and clear CRC and recording state,
    /// so the message can be read (again) from the top.
    pub fn reset(&mut self) {
        self.index = 0;
        self.crc.reset();
        self.recording = false;
        self.records.clear();
    }

    /// Drop all words and reading state.
    pub fn clear(&mut self) {
        self.words.clear();
        self.reset();
    }

    /// Replace the buffer contents, resetting cursor and CRC. Used to hand
    /// a received FIFO snapshot to the reader.
    pub fn set_buffer(&mut self, words: &[u16]) {
        self.words.clear();
        self.words.extend_from_slice(words);
        self.index = 0;
        self.crc.reset();
    }

    /// Word at the cursor without advancing.
    pub fn peek(&self) -> IlcResult<u16> {
        self.words
            .get(self.index)
            .copied()
            .ok_or(IlcError::EndOfBuffer)
    }

    /// Skip the word at the cursor without decoding it.
    pub fn next(&mut self) -> IlcResult<()> {
        if self.end_of_buffer() {
            return Err(IlcError::EndOfBuffer);
        }
        self.index += 1;
        Ok(())
    }

    /// CRC calculated over the payload bytes read or written since the last
    /// frame boundary.
    pub fn calculated_crc(&self) -> u16 {
        self.crc.value()
    }

    // ------------------------------------------------------------------
    // writing
    // ------------------------------------------------------------------

    /// Append a typed value in network byte order, one framed word per
    /// payload byte. Updates the CRC (and the change record when enabled).
    pub fn write<V: WireValue>(&mut self, value: V) {
        let mut raw = [0u8; 8];
        value.encode_be(&mut raw[..V::WIRE_SIZE]);
        let size = V::WIRE_SIZE;
        self.write_bytes(&raw[..size]);
    }

    /// Append raw payload bytes through the byte-instruction encoder.
    pub fn write_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            let word = self.byte_instruction(byte);
            self.words.push(word);
        }
    }

    /// Append a 24-bit signed integer, most significant byte first.
    pub fn write_i24(&mut self, data: i32) {
        self.write_bytes(&[(data >> 16) as u8, (data >> 8) as u8, data as u8]);
    }

    /// Append the two CRC bytes (little-endian) for everything written since
    /// the last frame boundary, then reset the CRC register. The CRC bytes
    /// themselves never enter the register.
    pub fn write_crc(&mut self) {
        let crc = self.crc.value();
        let lo = self.framing.encode_byte((crc & 0xFF) as u8);
        let hi = self.framing.encode_byte((crc >> 8) as u8);
        self.words.push(lo);
        self.words.push(hi);
        self.crc.reset();
    }

    /// Append the Tx frame-end token.
    pub fn write_end_of_frame(&mut self) {
        self.words.push(self.framing.tx_frame_end());
    }

    /// Append the Rx frame-end token.
    pub fn write_rx_end_frame(&mut self) {
        self.words.push(self.framing.rx_frame_end());
    }

    /// Append a wait-for-Rx token with the given timeout.
    pub fn write_wait_for_rx(&mut self, timeout_us: u32) {
        let word = self.framing.encode_wait_for_rx(timeout_us);
        self.words.push(word);
    }

    /// Append a bus-silence token. Delays that fit 12 bits are stored in
    /// microseconds, larger ones switch to the long class (milliseconds + 1).
    pub fn write_delay(&mut self, delay_us: u32) {
        let word = if delay_us > FIFO_DURATION_MAX_US {
            ((delay_us / 1000 + 1) as u16 & 0x0FFF) | FIFO_LONG_DELAY
        } else {
            delay_us as u16 | FIFO_DELAY
        };
        self.words.push(word);
    }

    // ------------------------------------------------------------------
    // reading
    // ------------------------------------------------------------------

    /// Read a typed value from the cursor, reassembling network byte order.
    /// Each consumed byte updates the CRC (and the change record when
    /// enabled).
    pub fn read<V: WireValue>(&mut self) -> IlcResult<V> {
        let mut raw = [0u8; 8];
        let size = V::WIRE_SIZE;
        self.read_bytes(&mut raw[..size])?;
        Ok(V::decode_be(&raw[..size]))
    }

    /// Read a 48-bit unsigned value into the low bits of a u64.
    pub fn read_u48(&mut self) -> IlcResult<u64> {
        let mut raw = [0u8; 6];
        self.read_bytes(&mut raw)?;
        Ok(raw.iter().fold(0u64, |acc, &b| acc << 8 | u64::from(b)))
    }

    /// Read `length` payload bytes as a string.
    pub fn read_string(&mut self, length: usize) -> IlcResult<String> {
        let mut raw = vec![0u8; length];
        self.read_bytes(&mut raw)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Read an 8-byte little-endian raw time value, converted to seconds.
    pub fn read_timestamp(&mut self) -> IlcResult<f64> {
        let mut raw = [0u8; 8];
        self.read_bytes(&mut raw)?;
        Ok(Timestamp::from_raw(u64::from_le_bytes(raw)))
    }

    /// Read payload bytes into `buf`, with CRC and recording accounting.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> IlcResult<()> {
        for slot in buf.iter_mut() {
            let data = self.read_instruction_byte()?;
            self.process_data(data);
            *slot = data;
        }
        Ok(())
    }

    /// Verify the received CRC against the calculated one. Stops change
    /// recording first - the CRC sits at the end of the payload, so the CRC
    /// bytes are never part of a snapshot, and they never enter the CRC
    /// register either. Resets the register for the next frame.
    pub fn check_crc(&mut self) -> IlcResult<()> {
        let expected = self.crc.value();
        self.recording = false;
        let lo = self.read_instruction_byte()?;
        let hi = self.read_instruction_byte()?;
        let got = u16::from_le_bytes([lo, hi]);
        if got != expected {
            return Err(IlcError::CrcMismatch { expected, got });
        }
        self.crc.reset();
        Ok(())
    }

    /// Require the Tx frame-end token at the cursor, consume it and reset
    /// the CRC for the next frame.
    pub fn read_end_of_frame(&mut self) -> IlcResult<()> {
        let word = self.peek()?;
        if word != self.framing.tx_frame_end() {
            return Err(IlcError::UnexpectedWord {
                expected: "end of frame",
                found: word,
                offset: self.index,
            });
        }
        self.index += 1;
        self.crc.reset();
        Ok(())
    }

    /// Consume a wait-for-Rx token, returning its timeout in microseconds.
    /// Long-class words decode with millisecond granularity.
    pub fn read_wait_for_rx(&mut self) -> IlcResult<u32> {
        let word = self.peek()?;
        match self.framing.decode_wait_for_rx(word) {
            Some(timeout_us) => {
                self.index += 1;
                Ok(timeout_us)
            }
            None => Err(IlcError::UnexpectedWord {
                expected: "wait for Rx",
                found: word,
                offset: self.index,
            }),
        }
    }

    /// Consume a delay token, returning the commanded bus silence in
    /// microseconds.
    pub fn read_delay(&mut self) -> IlcResult<u32> {
        let word = self.peek()?;
        let delay_us = match word & FIFO_CMD_MASK {
            FIFO_DELAY => u32::from(word & 0x0FFF),
            FIFO_LONG_DELAY => u32::from(word & 0x0FFF) * 1000,
            _ => {
                return Err(IlcError::UnexpectedWord {
                    expected: "delay",
                    found: word,
                    offset: self.index,
                })
            }
        };
        self.index += 1;
        Ok(delay_us)
    }

    // ------------------------------------------------------------------
    // change recording
    // ------------------------------------------------------------------

    /// Start copying every payload byte that passes through the buffer into
    /// the change record. Used to detect repeated identical responses.
    pub fn record_changes(&mut self) {
        self.recording = true;
    }

    /// Temporarily stop recording without discarding the record.
    pub fn pause_record_changes(&mut self) {
        self.recording = false;
    }

    /// Stop recording and compare the record against `cached`.
    ///
    /// Returns true when the record equals the cached snapshot. On a
    /// difference the new record is swapped into `cached`, so the caller's
    /// slot always holds the latest payload.
    pub fn check_recording(&mut self, cached: &mut Vec<u8>) -> bool {
        self.recording = false;
        if *cached == self.records {
            self.records.clear();
            return true;
        }
        trace!(
            old_len = cached.len(),
            new_len = self.records.len(),
            "recorded payload changed"
        );
        std::mem::swap(cached, &mut self.records);
        self.records.clear();
        false
    }

    // ------------------------------------------------------------------

    fn byte_instruction(&mut self, data: u8) -> u16 {
        self.process_data(data);
        self.framing.encode_byte(data)
    }

    fn process_data(&mut self, data: u8) {
        if self.recording {
            self.records.push(data);
        }
        self.crc.add(data);
    }

    fn read_instruction_byte(&mut self) -> IlcResult<u8> {
        if self.end_of_buffer() {
            return Err(IlcError::EndOfBuffer);
        }
        let word = self.words[self.index];
        self.index += 1;
        Ok(self.framing.decode_byte(word))
    }
}
