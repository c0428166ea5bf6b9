//! Architecture support.
//!
//! Everything that touches privileged instructions or hardware registers
//! lives under here, gated to the bare-metal x86 build. The rest of the
//! kernel sees only the small surface re-exported from `x86`.

pub mod x86;

/// Stop the CPU. On the host this just aborts the process.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn halt() -> ! {
    loop {
        x86::cli();
        x86::hlt();
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn halt() -> ! {
    ::std::process::abort();
}
