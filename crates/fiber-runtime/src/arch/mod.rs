//! Architecture-specific context switching
//!
//! Each backend provides `SavedRegs` (the callee-saved register file of a
//! suspended context), `init_context` and `context_switch`.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{init_context, context_switch, SavedRegs};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{init_context, context_switch, SavedRegs};
    } else {
        compile_error!("Unsupported architecture");
    }
}

/// Entry point signature for a fresh context. Must never return.
pub type EntryFn = extern "C" fn(usize);
