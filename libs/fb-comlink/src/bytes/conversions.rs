//! Register ↔ numeric conversions with byte order support
//!
//! Register arrays are always in wire order. The canonical byte array is
//! big-endian (ABCD) so numeric types are rebuilt with `from_be_bytes`.
//! 16-bit orders applied to 32-bit values act per register: `AB` as ABCD and
//! `BA` as BADC.

use super::ByteOrder;

/// Convert 2 registers (wire order) to canonical ABCD bytes
pub fn regs_to_bytes_4(regs: &[u16; 2], order: ByteOrder) -> [u8; 4] {
    let [h0, h1] = [regs[0].to_be_bytes(), regs[1].to_be_bytes()];

    match order {
        ByteOrder::BigEndian | ByteOrder::BigEndian16 => [h0[0], h0[1], h1[0], h1[1]],
        ByteOrder::LittleEndian => [h1[1], h1[0], h0[1], h0[0]],
        ByteOrder::BigEndianSwap => [h1[0], h1[1], h0[0], h0[1]],
        ByteOrder::LittleEndianSwap | ByteOrder::LittleEndian16 => [h0[1], h0[0], h1[1], h1[0]],
    }
}

/// Convert canonical ABCD bytes to 2 registers in wire order
fn bytes_4_to_regs(bytes: [u8; 4], order: ByteOrder) -> [u16; 2] {
    let [a, b, c, d] = bytes;
    match order {
        ByteOrder::BigEndian | ByteOrder::BigEndian16 => {
            [u16::from_be_bytes([a, b]), u16::from_be_bytes([c, d])]
        },
        ByteOrder::LittleEndian => [u16::from_be_bytes([d, c]), u16::from_be_bytes([b, a])],
        ByteOrder::BigEndianSwap => [u16::from_be_bytes([c, d]), u16::from_be_bytes([a, b])],
        ByteOrder::LittleEndianSwap | ByteOrder::LittleEndian16 => {
            [u16::from_be_bytes([b, a]), u16::from_be_bytes([d, c])]
        },
    }
}

pub fn regs_to_u32(regs: &[u16; 2], order: ByteOrder) -> u32 {
    u32::from_be_bytes(regs_to_bytes_4(regs, order))
}

pub fn regs_to_i32(regs: &[u16; 2], order: ByteOrder) -> i32 {
    i32::from_be_bytes(regs_to_bytes_4(regs, order))
}

pub fn regs_to_f32(regs: &[u16; 2], order: ByteOrder) -> f32 {
    f32::from_be_bytes(regs_to_bytes_4(regs, order))
}

pub fn u32_to_regs(value: u32, order: ByteOrder) -> [u16; 2] {
    bytes_4_to_regs(value.to_be_bytes(), order)
}

pub fn i32_to_regs(value: i32, order: ByteOrder) -> [u16; 2] {
    bytes_4_to_regs(value.to_be_bytes(), order)
}

pub fn f32_to_regs(value: f32, order: ByteOrder) -> [u16; 2] {
    bytes_4_to_regs(value.to_be_bytes(), order)
}

/// Single register value, swapping bytes for the little-endian orders
pub fn reg_to_u16(reg: u16, order: ByteOrder) -> u16 {
    if order.swaps_register_bytes() {
        reg.swap_bytes()
    } else {
        reg
    }
}

pub fn u16_to_reg(value: u16, order: ByteOrder) -> u16 {
    reg_to_u16(value, order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regs_to_bytes_4_all_orders() {
        let regs = [0x1234, 0x5678];

        assert_eq!(
            regs_to_bytes_4(&regs, ByteOrder::BigEndian),
            [0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(
            regs_to_bytes_4(&regs, ByteOrder::LittleEndian),
            [0x78, 0x56, 0x34, 0x12]
        );
        assert_eq!(
            regs_to_bytes_4(&regs, ByteOrder::BigEndianSwap),
            [0x56, 0x78, 0x12, 0x34]
        );
        assert_eq!(
            regs_to_bytes_4(&regs, ByteOrder::LittleEndianSwap),
            [0x34, 0x12, 0x78, 0x56]
        );
    }

    #[test]
    fn test_f32_registers() {
        // 25.0 in IEEE 754: 0x41C80000
        assert_eq!(regs_to_f32(&[0x41C8, 0x0000], ByteOrder::BigEndian), 25.0);
        assert_eq!(regs_to_f32(&[0x0000, 0x41C8], ByteOrder::BigEndianSwap), 25.0);
        assert_eq!(f32_to_regs(25.0, ByteOrder::BigEndianSwap), [0x0000, 0x41C8]);
    }

    #[test]
    fn test_encode_inverts_decode() {
        for order in [
            ByteOrder::BigEndian,
            ByteOrder::LittleEndian,
            ByteOrder::BigEndianSwap,
            ByteOrder::LittleEndianSwap,
        ] {
            let regs = u32_to_regs(0xDEAD_BEEF, order);
            assert_eq!(regs_to_u32(&regs, order), 0xDEAD_BEEF, "order {order}");
            let regs = i32_to_regs(-42, order);
            assert_eq!(regs_to_i32(&regs, order), -42, "order {order}");
        }
    }

    #[test]
    fn test_single_register_swap() {
        assert_eq!(reg_to_u16(0x1234, ByteOrder::BigEndian), 0x1234);
        assert_eq!(reg_to_u16(0x1234, ByteOrder::LittleEndian16), 0x3412);
        assert_eq!(u16_to_reg(0x3412, ByteOrder::LittleEndian16), 0x1234);
    }
}
