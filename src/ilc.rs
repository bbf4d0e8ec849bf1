//! Generic ILC (Inner-Loop Controller) bus façade.
//!
//! [`Ilc`] binds the five management functions every ILC implements
//! (17, 18, 65, 72, 107) to the response dispatcher and exposes strongly
//! typed request builders on top of the FIFO buffer. Application-specific
//! reactions are supplied through an [`IlcProcessor`] implementation;
//! hardware families with additional functions extend the façade the way
//! [`ElectromechanicalIlc`](crate::ElectromechanicalIlc) does.
//!
//! Responses for functions 17, 18 and 65 are change-gated: the processor
//! hook only fires when the payload differs from the last one seen for the
//! same (address, function) pair, so repeated identical polls don't fan out
//! into repeated identical events.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::buffer::{FifoBuffer, WireValue};
use crate::cache::ChangeCache;
use crate::constants::{
    error_response_code, ILC_CHANGE_MODE, ILC_REPORT_SERVER_ID, ILC_REPORT_SERVER_STATUS,
    ILC_RESET_SERVER, ILC_SET_TEMP_ADDRESS, TEMPORARY_ADDRESS, TIMEOUT_CHANGE_MODE_US,
    TIMEOUT_FIRMWARE_TRANSITION_US, TIMEOUT_RESET_SERVER_US, TIMEOUT_SERVER_ID_US,
    TIMEOUT_SERVER_STATUS_US, TIMEOUT_SET_TEMP_ADDRESS_US,
};
use crate::dispatch::{ErrorAction, RequestLedger, ResponseAction, ResponseContext, ResponseRouter};
use crate::error::{IlcError, IlcResult};
use crate::framing::{Framing, IlcFraming};

/// Operating mode reported by and commanded to an ILC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum IlcMode {
    Standby = 0,
    Disabled = 1,
    Enabled = 2,
    FirmwareUpdate = 3,
    Fault = 4,
}

impl TryFrom<u8> for IlcMode {
    type Error = IlcError;

    fn try_from(value: u8) -> IlcResult<Self> {
        match value {
            0 => Ok(IlcMode::Standby),
            1 => Ok(IlcMode::Disabled),
            2 => Ok(IlcMode::Enabled),
            3 => Ok(IlcMode::FirmwareUpdate),
            4 => Ok(IlcMode::Fault),
            _ => Err(IlcError::invalid_response(format!(
                "unknown ILC mode {value}"
            ))),
        }
    }
}

impl TryFrom<u16> for IlcMode {
    type Error = IlcError;

    fn try_from(value: u16) -> IlcResult<Self> {
        u8::try_from(value)
            .map_err(|_| IlcError::invalid_response(format!("unknown ILC mode {value}")))
            .and_then(IlcMode::try_from)
    }
}

impl fmt::Display for IlcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IlcMode::Standby => "Standby",
            IlcMode::Disabled => "Disabled",
            IlcMode::Enabled => "Enabled",
            IlcMode::FirmwareUpdate => "Firmware Update",
            IlcMode::Fault => "Fault",
        };
        write!(f, "{name}")
    }
}

/// Parsed function-17 (report server ID) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServerId {
    /// 48-bit unique unit identifier.
    pub unique_id: u64,
    pub ilc_app_type: u8,
    pub network_node_type: u8,
    pub ilc_selected_options: u8,
    pub network_node_options: u8,
    pub major_rev: u8,
    pub minor_rev: u8,
    /// Firmware name, NUL padding stripped.
    pub firmware_name: String,
}

/// Application hooks invoked as ILC responses are parsed.
///
/// Hooks for the change-gated functions (17, 18, 65) fire only when the
/// response payload differs from the previous one for the same unit; see
/// [`Ilc::set_always_trigger`] to disable the gating.
pub trait IlcProcessor {
    /// Function 17 - server identity changed.
    fn process_server_id(&mut self, address: u8, server_id: ServerId);

    /// Function 18 - mode/status/fault word changed.
    fn process_server_status(&mut self, address: u8, mode: IlcMode, status: u16, faults: u16);

    /// Function 65 - mode change acknowledged.
    fn process_change_ilc_mode(&mut self, address: u8, mode: IlcMode);

    /// Function 72 - temporary address assignment acknowledged.
    fn process_set_temp_ilc_address(&mut self, address: u8, new_address: u8);

    /// Function 107 - reset acknowledged.
    fn process_reset_server(&mut self, address: u8);

    /// Called before a response batch is parsed.
    fn pre_process(&mut self) -> IlcResult<()> {
        Ok(())
    }

    /// Called after a response batch parsed cleanly.
    fn post_process(&mut self) -> IlcResult<()> {
        Ok(())
    }
}

/// Argument pack for [`Ilc::call_function`] - a tuple of [`WireValue`]s
/// written in order after the function code (unit for none).
pub trait FunctionArgs {
    fn write_to<F: Framing>(self, buffer: &mut FifoBuffer<F>);
}

impl FunctionArgs for () {
    fn write_to<F: Framing>(self, _buffer: &mut FifoBuffer<F>) {}
}

macro_rules! function_args_tuple {
    ($($name:ident),+) => {
        impl<$($name: WireValue),+> FunctionArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn write_to<F: Framing>(self, buffer: &mut FifoBuffer<F>) {
                let ($($name,)+) = self;
                $(buffer.write($name);)+
            }
        }
    };
}

function_args_tuple!(A);
function_args_tuple!(A, B);
function_args_tuple!(A, B, C);
function_args_tuple!(A, B, C, D);
function_args_tuple!(A, B, C, D, E);
function_args_tuple!(A, B, C, D, E, G);

/// Buffer, ledger and per-unit bookkeeping shared with response actions.
///
/// Response actions registered on the router receive `&mut IlcState<P>`;
/// extension modules use it to parse payloads and reach the processor.
pub struct IlcState<P> {
    pub(crate) buffer: FifoBuffer,
    pub(crate) ledger: RequestLedger,
    cache: ChangeCache,
    last_mode: HashMap<u8, IlcMode>,
    always_trigger: bool,
    broadcast_counter: u8,
    pub(crate) processor: P,
}

impl<P> IlcState<P> {
    /// Buffer holding the frame being built or parsed.
    pub fn buffer_mut(&mut self) -> &mut FifoBuffer {
        &mut self.buffer
    }

    /// Application processor.
    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// Record the unit's last known mode (updated by responses 18 and 65).
    pub fn set_last_mode(&mut self, address: u8, mode: IlcMode) {
        self.last_mode.insert(address, mode);
    }

    /// Gate a change-recorded response against the cache.
    ///
    /// Stops recording, compares the recorded payload with the cached
    /// snapshot for (address, function) and swaps the new payload in when
    /// it differs. Returns true when nothing changed - unless
    /// `always_trigger` is set, which forces every response through.
    pub fn response_match_cached(&mut self, address: u8, function: u8) -> bool {
        let cached = self.cache.snapshot(address, function);
        self.buffer.check_recording(cached) && !self.always_trigger
    }
}

impl<P: IlcProcessor> ResponseContext for IlcState<P> {
    type Framing = IlcFraming;

    fn buffer_mut(&mut self) -> &mut FifoBuffer {
        &mut self.buffer
    }

    fn ledger_mut(&mut self) -> &mut RequestLedger {
        &mut self.ledger
    }

    fn pre_process(&mut self) -> IlcResult<()> {
        self.processor.pre_process()
    }

    fn post_process(&mut self) -> IlcResult<()> {
        self.processor.post_process()
    }
}

/// ILC bus façade: typed request builders and response dispatch for the
/// generic ILC management functions.
///
/// ```
/// use ilc_modbus::{Ilc, IlcMode, IlcProcessor, ServerId};
///
/// struct Printer;
///
/// impl IlcProcessor for Printer {
///     fn process_server_id(&mut self, address: u8, server_id: ServerId) {
///         println!("{address}: {}", server_id.firmware_name);
///     }
///     fn process_server_status(&mut self, _: u8, _: IlcMode, _: u16, _: u16) {}
///     fn process_change_ilc_mode(&mut self, _: u8, _: IlcMode) {}
///     fn process_set_temp_ilc_address(&mut self, _: u8, _: u8) {}
///     fn process_reset_server(&mut self, _: u8) {}
/// }
///
/// let mut ilc = Ilc::new(Printer);
/// ilc.report_server_id(5);
/// // hand ilc.buffer().words() to the FPGA driver, then feed the received
/// // words back through ilc.process_response(..)
/// ```
pub struct Ilc<P: IlcProcessor> {
    state: IlcState<P>,
    router: ResponseRouter<IlcState<P>>,
}

impl<P: IlcProcessor + 'static> Ilc<P> {
    /// New façade with the five mandatory functions registered.
    pub fn new(processor: P) -> Self {
        let mut router = ResponseRouter::new();

        router.add_response(
            ILC_REPORT_SERVER_ID,
            Box::new(|state: &mut IlcState<P>, address| {
                state.buffer.record_changes();
                let len = state.buffer.read::<u8>()?;
                if len < 12 {
                    return Err(IlcError::invalid_response(format!(
                        "ILC function 17 response length must be at least 12, got {len}"
                    )));
                }
                let unique_id = state.buffer.read_u48()?;
                let ilc_app_type = state.buffer.read::<u8>()?;
                let network_node_type = state.buffer.read::<u8>()?;
                let ilc_selected_options = state.buffer.read::<u8>()?;
                let network_node_options = state.buffer.read::<u8>()?;
                let major_rev = state.buffer.read::<u8>()?;
                let minor_rev = state.buffer.read::<u8>()?;
                let firmware_name = state.buffer.read_string(usize::from(len) - 12)?;
                state.buffer.check_crc()?;
                if !state.response_match_cached(address, ILC_REPORT_SERVER_ID) {
                    state.processor.process_server_id(
                        address,
                        ServerId {
                            unique_id,
                            ilc_app_type,
                            network_node_type,
                            ilc_selected_options,
                            network_node_options,
                            major_rev,
                            minor_rev,
                            firmware_name: firmware_name.trim_end_matches('\0').to_string(),
                        },
                    );
                }
                Ok(())
            }),
            error_response_code(ILC_REPORT_SERVER_ID),
        );

        router.add_response(
            ILC_REPORT_SERVER_STATUS,
            Box::new(|state: &mut IlcState<P>, address| {
                state.buffer.record_changes();
                let mode = state.buffer.read::<u8>()?;
                let status = state.buffer.read::<u16>()?;
                let faults = state.buffer.read::<u16>()?;
                state.buffer.check_crc()?;
                if !state.response_match_cached(address, ILC_REPORT_SERVER_STATUS) {
                    let mode = IlcMode::try_from(mode)?;
                    state.set_last_mode(address, mode);
                    state
                        .processor
                        .process_server_status(address, mode, status, faults);
                }
                Ok(())
            }),
            error_response_code(ILC_REPORT_SERVER_STATUS),
        );

        router.add_response(
            ILC_CHANGE_MODE,
            Box::new(|state: &mut IlcState<P>, address| {
                state.buffer.record_changes();
                let mode = state.buffer.read::<u16>()?;
                state.buffer.check_crc()?;
                if !state.response_match_cached(address, ILC_CHANGE_MODE) {
                    let mode = IlcMode::try_from(mode)?;
                    state.set_last_mode(address, mode);
                    state.processor.process_change_ilc_mode(address, mode);
                }
                Ok(())
            }),
            error_response_code(ILC_CHANGE_MODE),
        );

        router.add_response(
            ILC_SET_TEMP_ADDRESS,
            Box::new(|state: &mut IlcState<P>, address| {
                let new_address = state.buffer.read::<u8>()?;
                state.buffer.check_crc()?;
                state
                    .processor
                    .process_set_temp_ilc_address(address, new_address);
                Ok(())
            }),
            error_response_code(ILC_SET_TEMP_ADDRESS),
        );

        router.add_response(
            ILC_RESET_SERVER,
            Box::new(|state: &mut IlcState<P>, address| {
                state.buffer.check_crc()?;
                state.processor.process_reset_server(address);
                Ok(())
            }),
            error_response_code(ILC_RESET_SERVER),
        );

        Self {
            state: IlcState {
                buffer: FifoBuffer::new(),
                ledger: RequestLedger::new(),
                cache: ChangeCache::new(),
                last_mode: HashMap::new(),
                always_trigger: false,
                broadcast_counter: 0,
                processor,
            },
            router,
        }
    }

    // ------------------------------------------------------------------
    // request builders
    // ------------------------------------------------------------------

    /// Request the unit's identity (function 17).
    pub fn report_server_id(&mut self, address: u8) {
        self.call_function(address, ILC_REPORT_SERVER_ID, TIMEOUT_SERVER_ID_US, ());
    }

    /// Request mode, status and fault words (function 18).
    pub fn report_server_status(&mut self, address: u8) {
        self.call_function(
            address,
            ILC_REPORT_SERVER_STATUS,
            TIMEOUT_SERVER_STATUS_US,
            (),
        );
    }

    /// Command a mode transition (function 65).
    ///
    /// Transitions between Standby and FirmwareUpdate reflash option bytes
    /// and take far longer to acknowledge, so the Rx timeout stretches to
    /// 100 ms when the unit's last recorded mode makes this such a
    /// transition. Units with no recorded mode get the default timeout.
    pub fn change_ilc_mode(&mut self, address: u8, mode: IlcMode) {
        let timeout_us = match (self.state.last_mode.get(&address), mode) {
            (Some(IlcMode::Standby), IlcMode::FirmwareUpdate)
            | (Some(IlcMode::FirmwareUpdate), IlcMode::Standby) => TIMEOUT_FIRMWARE_TRANSITION_US,
            _ => TIMEOUT_CHANGE_MODE_US,
        };
        self.call_function(address, ILC_CHANGE_MODE, timeout_us, (mode as u16,));
    }

    /// Assign a bus address to the unit listening on the temporary address
    /// 255 (function 72).
    pub fn set_temp_ilc_address(&mut self, temporary_address: u8) {
        self.call_function(
            TEMPORARY_ADDRESS,
            ILC_SET_TEMP_ADDRESS,
            TIMEOUT_SET_TEMP_ADDRESS_US,
            (temporary_address,),
        );
    }

    /// Reboot the unit (function 107).
    pub fn reset_server(&mut self, address: u8) {
        self.call_function(address, ILC_RESET_SERVER, TIMEOUT_RESET_SERVER_US, ());
    }

    /// Build a complete request frame: address, function, arguments, CRC,
    /// frame end and wait-for-Rx token. Unicast requests are entered into
    /// the ledger so their response can be matched.
    pub fn call_function<A: FunctionArgs>(
        &mut self,
        address: u8,
        function: u8,
        timeout_us: u32,
        args: A,
    ) {
        debug!(address, function, timeout_us, "issuing request");
        let buffer = &mut self.state.buffer;
        buffer.write(address);
        buffer.write(function);
        args.write_to(buffer);
        buffer.write_crc();
        buffer.write_end_of_frame();
        buffer.write_wait_for_rx(timeout_us);

        self.state.ledger.push_commanded(address, function);
    }

    /// Build a broadcast frame: counter and payload bytes after the
    /// function code, closed by a delay word instead of wait-for-Rx.
    /// Broadcasts generate no replies and are never ledgered.
    pub fn broadcast_function(
        &mut self,
        address: u8,
        function: u8,
        counter: u8,
        delay_us: u32,
        data: &[u8],
    ) {
        debug!(address, function, counter, delay_us, "issuing broadcast");
        let buffer = &mut self.state.buffer;
        buffer.write(address);
        buffer.write(function);
        buffer.write(counter);
        buffer.write_bytes(data);
        buffer.write_crc();
        buffer.write_end_of_frame();
        buffer.write_delay(delay_us);
    }

    /// Advance and return the 4-bit rolling broadcast counter. Units report
    /// the last counter they saw, letting unicast queries confirm broadcast
    /// delivery.
    pub fn next_broadcast_counter(&mut self) -> u8 {
        self.state.broadcast_counter = (self.state.broadcast_counter + 1) % 16;
        self.state.broadcast_counter
    }

    // ------------------------------------------------------------------
    // response processing
    // ------------------------------------------------------------------

    /// Dispatch a received FIFO snapshot.
    ///
    /// Parses every response frame in `response`, matching each against the
    /// ledger and invoking the registered actions. Call
    /// [`Ilc::check_commanded_empty`] after the last batch of a bus cycle.
    pub fn process_response(&mut self, response: &[u16]) -> IlcResult<()> {
        self.router.process(&mut self.state, response)
    }

    /// Verify every issued request has been answered.
    pub fn check_commanded_empty(&mut self) -> IlcResult<()> {
        self.state.ledger.check_empty()
    }

    /// Register a response parser for an extension function code.
    pub fn add_response(
        &mut self,
        function: u8,
        action: ResponseAction<IlcState<P>>,
        error_response: u8,
    ) {
        self.router.add_response(function, action, error_response);
    }

    /// Register a response parser with a custom error-response handler.
    pub fn add_response_with_error(
        &mut self,
        function: u8,
        action: ResponseAction<IlcState<P>>,
        error_response: u8,
        error_action: ErrorAction<IlcState<P>>,
    ) {
        self.router
            .add_response_with_error(function, action, error_response, error_action);
    }

    // ------------------------------------------------------------------
    // state access
    // ------------------------------------------------------------------

    /// Frame buffer - drain [`FifoBuffer::words`] to transmit.
    pub fn buffer(&self) -> &FifoBuffer {
        &self.state.buffer
    }

    /// Mutable frame buffer, e.g. to read back a built request.
    pub fn buffer_mut(&mut self) -> &mut FifoBuffer {
        &mut self.state.buffer
    }

    /// Empty the frame buffer. With `only_buffers` false the request ledger
    /// is dropped as well.
    pub fn clear(&mut self, only_buffers: bool) {
        self.state.buffer.clear();
        if !only_buffers {
            self.state.ledger.clear();
        }
    }

    /// Last mode reported by or commanded to the unit, when known.
    pub fn last_mode(&self, address: u8) -> Option<IlcMode> {
        self.state.last_mode.get(&address).copied()
    }

    /// Treat every gated response as changed, forcing processor hooks to
    /// fire even for identical payloads.
    pub fn set_always_trigger(&mut self, always_trigger: bool) {
        self.state.always_trigger = always_trigger;
    }

    /// Application processor.
    pub fn processor(&self) -> &P {
        &self.state.processor
    }

    /// Mutable application processor.
    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.state.processor
    }
}
