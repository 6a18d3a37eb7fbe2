//! Byte order handling for multi-register values

pub mod byte_order;
pub mod conversions;

pub use byte_order::ByteOrder;
pub use conversions::{
    f32_to_regs, i32_to_regs, reg_to_u16, regs_to_bytes_4, regs_to_f32, regs_to_i32, regs_to_u32,
    u16_to_reg, u32_to_regs,
};
