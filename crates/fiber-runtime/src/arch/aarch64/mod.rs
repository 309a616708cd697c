//! aarch64 context switching (AAPCS64)
//!
//! Saves sp, the link register and the callee-saved x19-x29 and d8-d15.
//! A fresh context "returns" into the trampoline through x30.

use super::EntryFn;
use std::arch::naked_asm;

/// Callee-saved registers of a suspended context.
///
/// Field offsets are used by the assembly below; do not reorder.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    pub sp: u64,      // 0x00
    pub lr: u64,      // 0x08
    pub x: [u64; 11], // 0x10 x19..=x29
    pub d: [u64; 8],  // 0x68 d8..=d15
}

/// Initialize a fresh context so that switching to it calls
/// `entry(entry_arg)` on the given stack.
///
/// # Safety
///
/// `stack_top` must be the upper end of a mapped, writable stack that stays
/// valid for as long as the context can run.
#[inline]
pub unsafe fn init_context(
    regs: &mut SavedRegs,
    stack_top: *mut u8,
    entry: EntryFn,
    entry_arg: usize,
) {
    // sp must always be 16-byte aligned on aarch64
    let aligned_sp = (stack_top as usize) & !0xF;

    *regs = SavedRegs::default();
    regs.sp = aligned_sp as u64;
    regs.lr = fiber_entry_trampoline as usize as u64;
    regs.x[0] = entry as usize as u64; // x19
    regs.x[1] = entry_arg as u64; // x20
}

#[unsafe(naked)]
unsafe extern "C" fn fiber_entry_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        // entry functions never return
        "brk #0x1",
    );
}

/// Save callee-saved registers to `old` and resume the context in `new`.
///
/// # Safety
///
/// Both pointers must be valid; `new` must hold a context produced by
/// `init_context` or by an earlier `context_switch`.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save into old (x0)
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "str x30, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "str x29, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Load from new (x1)
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldr x30, [x1, #0x08]",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldr x29, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(std::mem::size_of::<SavedRegs>(), 0xA8);
        assert_eq!(std::mem::offset_of!(SavedRegs, x), 0x10);
        assert_eq!(std::mem::offset_of!(SavedRegs, d), 0x68);
    }
}
