// SPDX-License-Identifier: GPL-2.0-only OR MIT

//! host1x command stream opcodes
//!
//! Channel push buffers and gather buffers are streams of 32-bit words. The top nibble of an
//! opcode word selects the operation; register writes target the current class, selected with
//! `SETCLASS`.

/// Class of the host1x unit itself.
pub const CLASS_HOST1X: u32 = 0x1;
/// Class of the Video Image Compositor.
pub const CLASS_VIC: u32 = 0x5d;

/// Syncpoint increment register, present at offset 0 in every class.
pub const UCLASS_INCR_SYNCPT: u32 = 0x00;
/// host1x class: payload for 32-bit syncpoint waits.
pub const UCLASS_LOAD_SYNCPT_PAYLOAD_32: u32 = 0x4e;
/// host1x class: wait until a syncpoint reaches the loaded payload.
pub const UCLASS_WAIT_SYNCPT_32: u32 = 0x50;

/// Increment condition: immediately.
pub const INCR_SYNCPT_COND_IMMEDIATE: u32 = 0;
/// Increment condition: when the engine finished all preceding work.
pub const INCR_SYNCPT_COND_OP_DONE: u32 = 1;

pub const OPCODE_SETCLASS: u32 = 0x0;
pub const OPCODE_INCR: u32 = 0x1;
pub const OPCODE_NONINCR: u32 = 0x2;
pub const OPCODE_MASK: u32 = 0x3;
pub const OPCODE_IMM: u32 = 0x4;
pub const OPCODE_RESTART: u32 = 0x5;
pub const OPCODE_GATHER: u32 = 0x6;

/// Maximum word count of a single gather opcode.
pub const GATHER_MAX_WORDS: u32 = 0x3fff;

#[inline]
pub const fn setclass(class_id: u32, offset: u32, mask: u32) -> u32 {
    (OPCODE_SETCLASS << 28) | (offset << 16) | (class_id << 6) | mask
}

#[inline]
pub const fn incr(offset: u32, count: u32) -> u32 {
    (OPCODE_INCR << 28) | (offset << 16) | count
}

#[inline]
pub const fn nonincr(offset: u32, count: u32) -> u32 {
    (OPCODE_NONINCR << 28) | (offset << 16) | count
}

#[inline]
pub const fn imm(offset: u32, value: u32) -> u32 {
    (OPCODE_IMM << 28) | (offset << 16) | value
}

#[inline]
pub const fn gather(count: u32) -> u32 {
    (OPCODE_GATHER << 28) | count
}

/// A no-op: a NONINCR write with no data words.
pub const NOP: u32 = nonincr(0, 0);

/// Data word for an `INCR_SYNCPT` register write.
#[inline]
pub const fn incr_syncpt(cond: u32, id: u32) -> u32 {
    ((cond & 0xff) << 8) | (id & 0xff)
}

/// Returns the opcode of a command word.
#[inline]
pub const fn opcode(word: u32) -> u32 {
    word >> 28
}

/// Returns the register offset field of a SETCLASS/INCR/NONINCR/IMM command word.
#[inline]
pub const fn offset(word: u32) -> u32 {
    (word >> 16) & 0xfff
}

/// Returns the class field of a SETCLASS command word.
#[inline]
pub const fn class_id(word: u32) -> u32 {
    (word >> 6) & 0x3ff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings() {
        assert_eq!(setclass(CLASS_HOST1X, UCLASS_WAIT_SYNCPT_32, 1), 0x0050_0041);
        assert_eq!(nonincr(UCLASS_INCR_SYNCPT, 1), 0x2000_0001);
        assert_eq!(gather(4), 0x6000_0004);
        assert_eq!(incr_syncpt(INCR_SYNCPT_COND_OP_DONE, 17), 0x111);
        assert_eq!(NOP, 0x2000_0000);

        let word = setclass(CLASS_VIC, 0x12, 0x3);
        assert_eq!(opcode(word), OPCODE_SETCLASS);
        assert_eq!(offset(word), 0x12);
        assert_eq!(class_id(word), CLASS_VIC);
        assert_eq!(opcode(imm(0x4, 0x55)), OPCODE_IMM);
        assert_eq!(opcode(incr(0x4, 2)), OPCODE_INCR);
    }
}
