//! Device drivers: the VGA console, the PS/2 keyboard, the line-cooked
//! tty, the IDE disk and the RAM-disk backend.

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod console;
pub mod ide;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod keyboard;
pub mod ramdisk;
pub mod tty;
