//! Process management: PCBs, the process table, and the lifecycle
//! operations (fork / exec / exit / wait).

pub mod pcb;
pub mod table;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod exec;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod exit;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod fork;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod wait;

pub use pcb::{Pcb, ProcId, ProcState};
pub use table::ProcTable;

/// Size of the process table; also the pid space, since a pid is its
/// slot index.
pub const NPROC: usize = 20;

/// Per-process file-descriptor slots.
pub const NOFILE: usize = 16;

/// Depth of the saved-EFLAGS stack behind `push_cli`.
pub const CLI_DEPTH: usize = 10;

/// Bytes kept of a process name (diagnostics only).
pub const NAME_LEN: usize = 15;

/// Most argument strings `exec` accepts.
pub const MAX_ARGS: usize = 32;
