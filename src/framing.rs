//! Framing strategy for FPGA FIFO words.
//!
//! The buffer itself only orders 16-bit words; how a payload byte is packed
//! into a word and which tokens delimit a frame depends on the gateware
//! revision. That variability is captured by the [`Framing`] trait so a
//! buffer can be parameterized with a different word grammar without
//! touching the codec. [`IlcFraming`] implements the grammar spoken by the
//! ILC subnet FPGAs.

use crate::constants::{
    FIFO_CMD_MASK, FIFO_DURATION_MAX_US, FIFO_RX_ENDFRAME, FIFO_TX_FRAMEEND, FIFO_TX_MASK,
    FIFO_TX_WAIT_LONG_RX, FIFO_TX_WAIT_RX,
};

/// Word-level framing rules a [`FifoBuffer`](crate::FifoBuffer) delegates to.
pub trait Framing {
    /// Pack one payload byte into a Tx data word.
    fn encode_byte(&self, data: u8) -> u16;

    /// Extract the payload byte from a data word.
    fn decode_byte(&self, word: u16) -> u8;

    /// Word terminating a Tx frame.
    fn tx_frame_end(&self) -> u16;

    /// Word marking the end of a received frame.
    fn rx_frame_end(&self) -> u16;

    /// Encode a wait-for-Rx timeout. Timeouts that fit the 12-bit field are
    /// stored in microseconds; larger ones switch to the long class holding
    /// milliseconds + 1.
    fn encode_wait_for_rx(&self, timeout_us: u32) -> u16;

    /// Decode a wait-for-Rx word back to microseconds. `None` when the word
    /// belongs to another class.
    fn decode_wait_for_rx(&self, word: u16) -> Option<u32>;
}

/// Standard ILC subnet framing.
///
/// Payload bytes ride in WRITE-class words shifted left by one - bit 0 is
/// the Modbus start bit, the stop bit lives in the class mask. Received
/// words use the same shift, so decoding ignores the class nibble entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct IlcFraming;

impl Framing for IlcFraming {
    fn encode_byte(&self, data: u8) -> u16 {
        FIFO_TX_MASK | (u16::from(data) << 1)
    }

    fn decode_byte(&self, word: u16) -> u8 {
        (word >> 1) as u8
    }

    fn tx_frame_end(&self) -> u16 {
        FIFO_TX_FRAMEEND
    }

    fn rx_frame_end(&self) -> u16 {
        FIFO_RX_ENDFRAME
    }

    fn encode_wait_for_rx(&self, timeout_us: u32) -> u16 {
        if timeout_us > FIFO_DURATION_MAX_US {
            ((timeout_us / 1000 + 1) as u16 & 0x0FFF) | FIFO_TX_WAIT_LONG_RX
        } else {
            timeout_us as u16 | FIFO_TX_WAIT_RX
        }
    }

    fn decode_wait_for_rx(&self, word: u16) -> Option<u32> {
        match word & FIFO_CMD_MASK {
            FIFO_TX_WAIT_RX => Some(u32::from(word & 0x0FFF)),
            FIFO_TX_WAIT_LONG_RX => Some(u32::from(word & 0x0FFF) * 1000),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_roundtrip() {
        let framing = IlcFraming;
        for data in [0x00u8, 0x01, 0x7F, 0x80, 0xFF] {
            let word = framing.encode_byte(data);
            assert_eq!(word & FIFO_CMD_MASK, 0x1000);
            // start bit stays clear
            assert_eq!(word & 0x0001, 0);
            assert_eq!(framing.decode_byte(word), data);
        }
    }

    #[test]
    fn test_decode_ignores_class_nibble() {
        let framing = IlcFraming;
        // responses arrive with the Rx mask instead of the Tx mask
        let word = crate::constants::FIFO_RX_MASK | (0xA5u16 << 1);
        assert_eq!(framing.decode_byte(word), 0xA5);
    }

    #[test]
    fn test_wait_for_rx_short() {
        let framing = IlcFraming;
        let word = framing.encode_wait_for_rx(335);
        assert_eq!(word, FIFO_TX_WAIT_RX | 335);
        assert_eq!(framing.decode_wait_for_rx(word), Some(335));
    }

    #[test]
    fn test_wait_for_rx_long() {
        let framing = IlcFraming;
        let word = framing.encode_wait_for_rx(100_000);
        assert_eq!(word, FIFO_TX_WAIT_LONG_RX | 101);
        // long encoding is millisecond-granular
        assert_eq!(framing.decode_wait_for_rx(word), Some(101_000));
    }

    #[test]
    fn test_wait_for_rx_boundary() {
        let framing = IlcFraming;
        assert_eq!(
            framing.encode_wait_for_rx(0x0FFF),
            FIFO_TX_WAIT_RX | 0x0FFF
        );
        assert_eq!(
            framing.encode_wait_for_rx(0x1000),
            FIFO_TX_WAIT_LONG_RX | 5
        );
    }

    #[test]
    fn test_wait_for_rx_rejects_other_classes() {
        let framing = IlcFraming;
        assert_eq!(framing.decode_wait_for_rx(FIFO_TX_FRAMEEND), None);
        assert_eq!(framing.decode_wait_for_rx(0x4123), None);
    }
}
