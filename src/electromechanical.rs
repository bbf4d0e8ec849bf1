//! Electromechanical and pneumatic ILC functions.
//!
//! Actuator ILCs speak four functions on top of the generic management set:
//! hardpoint force/status (67), ADC offset and sensitivity (81),
//! calibration data (110) and mezzanine pressure (119). These carry
//! telemetry, so none of them is change-gated - every response reaches the
//! processor.

use std::ops::{Deref, DerefMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::constants::error_response_code;
use crate::error::IlcResult;
use crate::ilc::{Ilc, IlcProcessor, IlcState};

/// Hardpoint force and status request (function 67, 0x43).
const FN_HARDPOINT_FORCE_STATUS: u8 = 67;

/// ADC channel offset and sensitivity (function 81, 0x51).
const FN_OFFSET_AND_SENSITIVITY: u8 = 81;

/// Calibration data readout (function 110, 0x6E).
const FN_CALIBRATION_DATA: u8 = 110;

/// Mezzanine pressure readout (function 119, 0x77).
const FN_MEZZANINE_PRESSURE: u8 = 119;

/// Telemetry readouts answer within this window.
const TELEMETRY_TIMEOUT_US: u32 = 1_800;

/// ADC calibration constants reported by function 110 - four channels each
/// for the main and backup measurement chains.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationData {
    pub main_adc_k: [f32; 4],
    pub main_offset: [f32; 4],
    pub main_sensitivity: [f32; 4],
    pub backup_adc_k: [f32; 4],
    pub backup_offset: [f32; 4],
    pub backup_sensitivity: [f32; 4],
}

/// Hooks for the electromechanical/pneumatic function set, on top of the
/// generic [`IlcProcessor`] ones.
pub trait ElectromechanicalProcessor: IlcProcessor {
    /// Function 67 response.
    fn process_hardpoint_force_status(
        &mut self,
        address: u8,
        status: u8,
        encoder_position: i32,
        load_cell_force: f32,
    );

    /// Function 110 response.
    fn process_calibration_data(&mut self, address: u8, calibration: CalibrationData);

    /// Function 119 response. Floats arrive in wire order: primary push,
    /// primary pull, secondary push, secondary pull.
    fn process_mezzanine_pressure(
        &mut self,
        address: u8,
        primary_push: f32,
        primary_pull: f32,
        secondary_push: f32,
        secondary_pull: f32,
    );
}

fn read_f32x4<P>(state: &mut IlcState<P>) -> IlcResult<[f32; 4]> {
    let buffer = state.buffer_mut();
    Ok([
        buffer.read::<f32>()?,
        buffer.read::<f32>()?,
        buffer.read::<f32>()?,
        buffer.read::<f32>()?,
    ])
}

/// [`Ilc`] façade extended with the electromechanical/pneumatic functions.
///
/// Derefs to the generic façade, so the management requests and
/// [`Ilc::process_response`] are used unchanged.
pub struct ElectromechanicalIlc<P: ElectromechanicalProcessor> {
    inner: Ilc<P>,
}

impl<P: ElectromechanicalProcessor + 'static> ElectromechanicalIlc<P> {
    /// New façade with both the generic and the actuator functions
    /// registered.
    pub fn new(processor: P) -> Self {
        let mut inner = Ilc::new(processor);

        inner.add_response(
            FN_HARDPOINT_FORCE_STATUS,
            Box::new(|state: &mut IlcState<P>, address| {
                let status = state.buffer_mut().read::<u8>()?;
                let encoder_position = state.buffer_mut().read::<i32>()?;
                let load_cell_force = state.buffer_mut().read::<f32>()?;
                state.buffer_mut().check_crc()?;
                state.processor_mut().process_hardpoint_force_status(
                    address,
                    status,
                    encoder_position,
                    load_cell_force,
                );
                Ok(())
            }),
            error_response_code(FN_HARDPOINT_FORCE_STATUS),
        );

        inner.add_response(
            FN_OFFSET_AND_SENSITIVITY,
            Box::new(|state: &mut IlcState<P>, _address| {
                // bare acknowledgment - no payload beyond the CRC
                state.buffer_mut().check_crc()?;
                Ok(())
            }),
            error_response_code(FN_OFFSET_AND_SENSITIVITY),
        );

        inner.add_response(
            FN_CALIBRATION_DATA,
            Box::new(|state: &mut IlcState<P>, address| {
                let main_adc_k = read_f32x4(state)?;
                let main_offset = read_f32x4(state)?;
                let main_sensitivity = read_f32x4(state)?;
                let backup_adc_k = read_f32x4(state)?;
                let backup_offset = read_f32x4(state)?;
                let backup_sensitivity = read_f32x4(state)?;
                state.buffer_mut().check_crc()?;
                state.processor_mut().process_calibration_data(
                    address,
                    CalibrationData {
                        main_adc_k,
                        main_offset,
                        main_sensitivity,
                        backup_adc_k,
                        backup_offset,
                        backup_sensitivity,
                    },
                );
                Ok(())
            }),
            error_response_code(FN_CALIBRATION_DATA),
        );

        inner.add_response(
            FN_MEZZANINE_PRESSURE,
            Box::new(|state: &mut IlcState<P>, address| {
                let primary_push = state.buffer_mut().read::<f32>()?;
                let primary_pull = state.buffer_mut().read::<f32>()?;
                let secondary_push = state.buffer_mut().read::<f32>()?;
                let secondary_pull = state.buffer_mut().read::<f32>()?;
                state.buffer_mut().check_crc()?;
                state.processor_mut().process_mezzanine_pressure(
                    address,
                    primary_push,
                    primary_pull,
                    secondary_push,
                    secondary_pull,
                );
                Ok(())
            }),
            error_response_code(FN_MEZZANINE_PRESSURE),
        );

        Self { inner }
    }

    /// Unicast hardpoint force and status request (function 67).
    pub fn report_hardpoint_force_status(&mut self, address: u8) {
        self.inner
            .call_function(address, FN_HARDPOINT_FORCE_STATUS, TELEMETRY_TIMEOUT_US, ());
    }

    /// Set an ADC channel's offset and sensitivity (function 81). The
    /// channel index is 1-based.
    pub fn set_offset_and_sensitivity(
        &mut self,
        address: u8,
        channel: u8,
        offset: f32,
        sensitivity: f32,
    ) {
        self.inner.call_function(
            address,
            FN_OFFSET_AND_SENSITIVITY,
            36_500,
            (channel, offset, sensitivity),
        );
    }

    /// Read the unit's ADC calibration constants (function 110).
    pub fn report_calibration_data(&mut self, address: u8) {
        self.inner
            .call_function(address, FN_CALIBRATION_DATA, TELEMETRY_TIMEOUT_US, ());
    }

    /// Read the mezzanine pressure transducers (function 119).
    pub fn report_mezzanine_pressure(&mut self, address: u8) {
        self.inner
            .call_function(address, FN_MEZZANINE_PRESSURE, TELEMETRY_TIMEOUT_US, ());
    }
}

impl<P: ElectromechanicalProcessor> Deref for ElectromechanicalIlc<P> {
    type Target = Ilc<P>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<P: ElectromechanicalProcessor> DerefMut for ElectromechanicalIlc<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FifoBuffer;
    use crate::error::IlcError;
    use crate::ilc::{IlcMode, ServerId};

    #[derive(Default)]
    struct Recorder {
        hardpoints: Vec<(u8, u8, i32, f32)>,
        calibrations: Vec<(u8, CalibrationData)>,
        pressures: Vec<(u8, f32, f32, f32, f32)>,
    }

    impl IlcProcessor for Recorder {
        fn process_server_id(&mut self, _address: u8, _server_id: ServerId) {}
        fn process_server_status(&mut self, _: u8, _: IlcMode, _: u16, _: u16) {}
        fn process_change_ilc_mode(&mut self, _: u8, _: IlcMode) {}
        fn process_set_temp_ilc_address(&mut self, _: u8, _: u8) {}
        fn process_reset_server(&mut self, _: u8) {}
    }

    impl ElectromechanicalProcessor for Recorder {
        fn process_hardpoint_force_status(
            &mut self,
            address: u8,
            status: u8,
            encoder_position: i32,
            load_cell_force: f32,
        ) {
            self.hardpoints
                .push((address, status, encoder_position, load_cell_force));
        }

        fn process_calibration_data(&mut self, address: u8, calibration: CalibrationData) {
            self.calibrations.push((address, calibration));
        }

        fn process_mezzanine_pressure(
            &mut self,
            address: u8,
            primary_push: f32,
            primary_pull: f32,
            secondary_push: f32,
            secondary_pull: f32,
        ) {
            self.pressures.push((
                address,
                primary_push,
                primary_pull,
                secondary_push,
                secondary_pull,
            ));
        }
    }

    #[test]
    fn test_set_offset_and_sensitivity_frame() {
        let mut ilc = ElectromechanicalIlc::new(Recorder::default());
        ilc.set_offset_and_sensitivity(231, 1, 2.34, -4.56);

        let buffer = ilc.buffer_mut();
        buffer.reset();
        assert_eq!(buffer.read::<u8>().unwrap(), 231);
        assert_eq!(buffer.read::<u8>().unwrap(), 81);
        assert_eq!(buffer.read::<u8>().unwrap(), 1);
        assert_eq!(buffer.read::<f32>().unwrap(), 2.34);
        assert_eq!(buffer.read::<f32>().unwrap(), -4.56);
        buffer.check_crc().unwrap();
        buffer.read_end_of_frame().unwrap();
        assert_eq!(buffer.read_wait_for_rx().unwrap(), 37_000);
    }

    #[test]
    fn test_calibration_data_parse() {
        let mut ilc = ElectromechanicalIlc::new(Recorder::default());
        ilc.report_calibration_data(17);

        let buffer = ilc.buffer_mut();
        buffer.reset();
        assert_eq!(buffer.read::<u8>().unwrap(), 17);
        assert_eq!(buffer.read::<u8>().unwrap(), 110);
        buffer.check_crc().unwrap();
        buffer.read_end_of_frame().unwrap();
        assert_eq!(buffer.read_wait_for_rx().unwrap(), 1800);

        let mut response = FifoBuffer::new();
        response.write::<u8>(17);
        response.write::<u8>(110);
        let bases: [f32; 6] = [
            3.141_592,
            2.0,
            -56.3211,
            2021.5788,
            789_564_687.4545,
            -478_967.445_456,
        ];
        for base in bases {
            for i in 0..4 {
                response.write::<f32>(base * i as f32);
            }
        }
        response.write_crc();

        ilc.process_response(response.words()).unwrap();
        ilc.check_commanded_empty().unwrap();

        let (address, calibration) = &ilc.processor().calibrations[0];
        assert_eq!(*address, 17);
        let groups = [
            &calibration.main_adc_k,
            &calibration.main_offset,
            &calibration.main_sensitivity,
            &calibration.backup_adc_k,
            &calibration.backup_offset,
            &calibration.backup_sensitivity,
        ];
        for (base, group) in bases.iter().zip(groups) {
            for i in 0..4 {
                assert_eq!(group[i], base * i as f32);
            }
        }
    }

    #[test]
    fn test_mezzanine_pressure_wire_order() {
        let mut ilc = ElectromechanicalIlc::new(Recorder::default());
        ilc.report_mezzanine_pressure(18);
        ilc.clear(true);

        let mut response = FifoBuffer::new();
        response.write::<u8>(18);
        response.write::<u8>(119);
        response.write::<f32>(3.141_592);
        response.write::<f32>(1.3456);
        response.write::<f32>(-127.657);
        response.write::<f32>(-3.1468);
        response.write_crc();

        ilc.process_response(response.words()).unwrap();

        assert_eq!(
            ilc.processor().pressures,
            vec![(18, 3.141_592, 1.3456, -127.657, -3.1468)]
        );
    }

    #[test]
    fn test_hardpoint_force_status_parse() {
        let mut ilc = ElectromechanicalIlc::new(Recorder::default());
        ilc.report_hardpoint_force_status(12);
        ilc.clear(true);

        let mut response = FifoBuffer::new();
        response.write::<u8>(12);
        response.write::<u8>(67);
        response.write::<u8>(0x04);
        response.write::<i32>(-123_456);
        response.write::<f32>(981.5);
        response.write_crc();

        ilc.process_response(response.words()).unwrap();

        assert_eq!(ilc.processor().hardpoints, vec![(12, 0x04, -123_456, 981.5)]);
    }

    #[test]
    fn test_telemetry_not_change_gated() {
        let mut ilc = ElectromechanicalIlc::new(Recorder::default());
        ilc.report_mezzanine_pressure(18);
        ilc.report_mezzanine_pressure(18);
        ilc.clear(true);

        let mut response = FifoBuffer::new();
        response.write::<u8>(18);
        response.write::<u8>(119);
        for _ in 0..4 {
            response.write::<f32>(1.0);
        }
        response.write_crc();
        let words = response.words().to_vec();

        ilc.process_response(&words).unwrap();
        ilc.process_response(&words).unwrap();

        // identical payloads still reach the processor twice
        assert_eq!(ilc.processor().pressures.len(), 2);
    }

    #[test]
    fn test_offset_and_sensitivity_acknowledgment() {
        let mut ilc = ElectromechanicalIlc::new(Recorder::default());
        ilc.set_offset_and_sensitivity(231, 1, 2.34, -4.56);
        ilc.clear(true);

        let mut response = FifoBuffer::new();
        response.write::<u8>(231);
        response.write::<u8>(81);
        response.write_crc();

        ilc.process_response(response.words()).unwrap();
        ilc.check_commanded_empty().unwrap();
    }

    #[test]
    fn test_error_response_for_telemetry_function() {
        let mut ilc = ElectromechanicalIlc::new(Recorder::default());
        ilc.report_calibration_data(17);
        ilc.clear(true);

        let mut response = FifoBuffer::new();
        response.write::<u8>(17);
        response.write::<u8>(error_response_code(110));
        response.write::<u8>(1);
        response.write_crc();

        let err = ilc.process_response(response.words()).unwrap_err();
        assert_eq!(
            err,
            IlcError::IlcException {
                address: 17,
                function: error_response_code(110),
                code: 1,
            }
        );
    }
}
