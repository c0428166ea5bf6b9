//! Kernel error types.
//!
//! Internal layers return [`KernelResult`] and propagate with `?`; the
//! syscall boundary collapses every error into -1 for user space.
//! Contract violations (releasing an unowned buffer, double unlock,
//! bitmap double-free) are not errors but panics, per the kernel's
//! fatal-handling policy.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A user-supplied address (or span) fell outside the valid ranges
    InvalidAddress { addr: u32 },
    /// A user-supplied string has no NUL terminator inside its range
    UnterminatedString { addr: u32 },
    /// File descriptor is out of range or not open
    BadFileDescriptor,
    /// Operation not permitted by the open mode
    WrongMode,
    /// Path or directory entry not found
    NotFound,
    /// Path names an entry that may not be created or removed (".",
    /// "..", or the parent of "/")
    InvalidPath,
    /// Directory entry already exists
    AlreadyExists,
    /// Path component or operand is not a directory
    NotADirectory,
    /// Operation needs a non-directory target
    IsADirectory,
    /// Directory still has entries besides `.` and `..`
    DirectoryNotEmpty,
    /// Offset beyond end of file, or offset arithmetic overflowed
    InvalidOffset,
    /// Write would push the file past the maximum supported size
    FileTooLarge { size: u32 },
    /// Pipe has no counterpart end left
    BrokenPipe,
    /// A bounded table has no free slot left for a user-visible request
    ResourceExhausted { resource: &'static str },
    /// Executable image was rejected
    InvalidExecutable { reason: &'static str },
    /// More argument strings than the exec contract allows
    TooManyArguments,
    /// Unsupported node type passed to mknod
    InvalidNodeType { kind: u32 },
    /// Character device with no driver behind its major number
    NoDevice { major: u16 },
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress { addr } => write!(f, "invalid user address 0x{:x}", addr),
            Self::UnterminatedString { addr } => {
                write!(f, "unterminated user string at 0x{:x}", addr)
            }
            Self::BadFileDescriptor => write!(f, "bad file descriptor"),
            Self::WrongMode => write!(f, "operation not permitted by open mode"),
            Self::NotFound => write!(f, "no such file or directory"),
            Self::InvalidPath => write!(f, "invalid path"),
            Self::AlreadyExists => write!(f, "entry already exists"),
            Self::NotADirectory => write!(f, "not a directory"),
            Self::IsADirectory => write!(f, "is a directory"),
            Self::DirectoryNotEmpty => write!(f, "directory not empty"),
            Self::InvalidOffset => write!(f, "offset out of range"),
            Self::FileTooLarge { size } => {
                write!(f, "write would grow file to {} bytes", size)
            }
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::ResourceExhausted { resource } => write!(f, "out of {}", resource),
            Self::InvalidExecutable { reason } => write!(f, "invalid executable: {}", reason),
            Self::TooManyArguments => write!(f, "argument list too long"),
            Self::InvalidNodeType { kind } => write!(f, "unsupported node type {}", kind),
            Self::NoDevice { major } => write!(f, "no device with major number {}", major),
        }
    }
}
