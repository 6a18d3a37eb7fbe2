//! Modbus protocol constants
//!
//! The PDU limit of 253 bytes comes from the RS485 ADU limit of 256 bytes
//! (slave address and CRC removed). Register/coil limits are derived from it.

/// MBAP header length: transaction(2) + protocol(2) + length(2) + unit(1)
pub const MBAP_HEADER_LEN: usize = 7;

/// Bytes of the MBAP header preceding the length-counted part
pub const MBAP_PREFIX_LEN: usize = 6;

/// Maximum PDU size
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (unit id + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// MBAP protocol identifier for Modbus
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// RTU CRC trailer length
pub const RTU_CRC_LEN: usize = 2;

/// Smallest RTU frame: station + function code + CRC
pub const RTU_MIN_FRAME_LEN: usize = 1 + 1 + RTU_CRC_LEN;

/// FC05 value for ON
pub const COIL_ON: u16 = 0xFF00;

/// FC05 value for OFF
pub const COIL_OFF: u16 = 0x0000;

/// FC03/FC04: 1 + 1 + N × 2 ≤ 253
pub const MODBUS_MAX_READ_REGISTERS: usize = 125;

/// FC16: 1 + 2 + 2 + 1 + N × 2 ≤ 253
pub const MODBUS_MAX_WRITE_REGISTERS: usize = 123;

/// FC01/FC02 protocol limit
pub const MODBUS_MAX_READ_COILS: usize = 2000;

/// FC15 limit (0x7B0)
pub const MODBUS_MAX_WRITE_COILS: usize = 1968;

/// Wait for a read response before the request is given up
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 3000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_limits_fit_pdu() {
        assert!(1 + 1 + MODBUS_MAX_READ_REGISTERS * 2 <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + MODBUS_MAX_WRITE_REGISTERS * 2 <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_coil_limits_fit_pdu() {
        assert!(1 + 1 + MODBUS_MAX_READ_COILS.div_ceil(8) <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + MODBUS_MAX_WRITE_COILS.div_ceil(8) <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_header_lengths() {
        assert_eq!(MBAP_HEADER_LEN, MBAP_PREFIX_LEN + 1);
        assert_eq!(MAX_MBAP_LENGTH, 254);
    }
}
