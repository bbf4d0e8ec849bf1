//! # ILC Modbus - FPGA FIFO framing for telescope control buses
//!
//! A framing and response-dispatch engine for fleets of Inner-Loop
//! Controllers (ILCs) reached over Modbus-like RTU serial buses fronted by
//! an FPGA. The FPGA multiplexes framed byte streams onto 16-bit FIFO
//! command/response queues and performs no semantic processing; this crate
//! handles everything on the host side of those queues:
//!
//! - serialization of typed values into a Modbus-compatible byte stream,
//! - FIFO control tokens (frame end, wait-for-Rx, delay, timestamps),
//! - incremental Modbus CRC-16 over payload bytes,
//! - response dispatch to function-code-specific handlers,
//! - strict request/response pairing, and
//! - change detection to suppress redundant event emission.
//!
//! The crate performs no I/O and never blocks - an external FPGA driver
//! drains the Tx words and hands back received words. A buffer is not safe
//! for concurrent mutation; callers serialize access.
//!
//! ## Quick Start
//!
//! ```rust
//! use ilc_modbus::{Ilc, IlcMode, IlcProcessor, IlcResult, ServerId};
//!
//! struct Station;
//!
//! impl IlcProcessor for Station {
//!     fn process_server_id(&mut self, address: u8, server_id: ServerId) {
//!         println!("unit {address} runs {}", server_id.firmware_name);
//!     }
//!     fn process_server_status(&mut self, _: u8, _: IlcMode, _: u16, _: u16) {}
//!     fn process_change_ilc_mode(&mut self, _: u8, _: IlcMode) {}
//!     fn process_set_temp_ilc_address(&mut self, _: u8, _: u8) {}
//!     fn process_reset_server(&mut self, _: u8) {}
//! }
//!
//! fn poll() -> IlcResult<()> {
//!     let mut ilc = Ilc::new(Station);
//!
//!     // build requests; the FPGA driver transmits ilc.buffer().words()
//!     ilc.report_server_id(5);
//!     ilc.report_server_status(5);
//!
//!     // ...and later hands the received FIFO words back:
//!     // ilc.process_response(&received)?;
//!     // ilc.check_commanded_empty()?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// FPGA FIFO word grammar and ILC bus constants
pub mod constants;

/// Incremental Modbus CRC-16
pub mod crc;

/// Framing strategy - how payload bytes map onto FIFO words
pub mod framing;

/// FIFO word buffer with typed big-endian scalar encode/decode
pub mod buffer;

/// Request ledger and response dispatch
pub mod dispatch;

/// Change-detection cache for event suppression
pub mod cache;

/// Generic ILC façade - the five mandatory management functions
pub mod ilc;

/// Electromechanical and pneumatic ILC function set
pub mod electromechanical;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Error handling ===
pub use error::{IlcError, IlcResult};

// === Codec ===
pub use buffer::{FifoBuffer, Timestamp, WireValue};
pub use crc::Crc16;
pub use framing::{Framing, IlcFraming};

// === Dispatch ===
pub use cache::ChangeCache;
pub use dispatch::{ErrorAction, RequestLedger, ResponseAction, ResponseContext, ResponseRouter};

// === ILC façade ===
pub use electromechanical::{CalibrationData, ElectromechanicalIlc, ElectromechanicalProcessor};
pub use ilc::{FunctionArgs, Ilc, IlcMode, IlcProcessor, IlcState, ServerId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("ILC Modbus v{VERSION} - FPGA FIFO framing and response dispatch")
}
