//! Console contract.
//!
//! Byte-oriented output and keyboard input. The `write` syscall on fd 1 goes
//! straight here, without taking the filesystem lock.

pub trait Console {
    /// Writes a buffer to the console.
    fn putbuf(&self, buf: &[u8]);

    /// Blocks until a key is available and returns it.
    fn input_getc(&self) -> u8;
}
