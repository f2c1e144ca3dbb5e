//! Loader and address-space contracts.
//!
//! The loader builds a user address space from an executable and spawns the
//! thread that runs it; the page-directory queries behind user-pointer
//! validation live on the address-space handle. Both are external
//! collaborators.

use crate::kernel::Kernel;
use crate::scheduler::thread::Tid;

/// A user address space (page directory).
pub trait AddressSpace {
    /// Returns the kernel-visible mapping of `vaddr`, or `None` when the
    /// page is not mapped. This is the page-directory lookup every user
    /// pointer is validated against.
    fn translate(&self, vaddr: u32) -> Option<*mut u8>;

    /// Makes this address space the active one on the CPU.
    fn activate(&self);
}

pub trait Loader {
    /// Loads the program named by the first word of `cmdline`, creates the
    /// user thread that runs it and returns its tid, or
    /// [`crate::scheduler::thread::TID_ERROR`] when the load fails.
    fn execute(&self, kernel: &Kernel, cmdline: &str) -> Tid;
}
