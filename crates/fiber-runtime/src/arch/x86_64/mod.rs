//! x86_64 context switching (System V AMD64)

use super::EntryFn;
use std::arch::naked_asm;

/// Callee-saved registers of a suspended context.
///
/// Field offsets are used by the assembly below; do not reorder.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
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
    // The trampoline is entered by `jmp`, so rsp must be 16-byte aligned
    // there; its `call` then leaves rsp+8 aligned at the entry function.
    let aligned_sp = (stack_top as usize) & !0xF;

    *regs = SavedRegs {
        rsp: aligned_sp as u64,
        rip: fiber_entry_trampoline as usize as u64,
        r12: entry as usize as u64,
        r13: entry_arg as u64,
        ..SavedRegs::default()
    };
}

/// Calls the entry function held in r12 with the argument in r13.
#[unsafe(naked)]
unsafe extern "C" fn fiber_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        // entry functions never return
        "ud2",
    );
}

/// Save callee-saved registers to `old` and resume the context in `new`.
///
/// Returns when some other context switches back into `old`.
///
/// # Safety
///
/// Both pointers must be valid; `new` must hold a context produced by
/// `init_context` or by an earlier `context_switch`.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save into old (rdi)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load from new (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        // Resumed: rsp points at our caller's return address
        "1:",
        "ret",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(std::mem::size_of::<SavedRegs>(), 0x40);
        assert_eq!(std::mem::offset_of!(SavedRegs, rip), 0x08);
        assert_eq!(std::mem::offset_of!(SavedRegs, r15), 0x38);
    }

    extern "C" fn never(_: usize) {}

    #[test]
    fn test_init_context_alignment() {
        let mut regs = SavedRegs::default();
        let fake_top = 0x7fff_0000_1237usize as *mut u8;
        unsafe { init_context(&mut regs, fake_top, never, 42) };
        assert_eq!(regs.rsp % 16, 0);
        assert!(regs.rsp <= 0x7fff_0000_1237);
        assert_eq!(regs.r13, 42);
        assert_eq!(regs.r12, never as usize as u64);
    }
}
