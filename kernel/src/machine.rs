//! Machine contract.
//!
//! The scheduler core is portable: everything that touches the CPU or the
//! interrupt controller goes through this trait. The platform layer
//! implements it with the real instructions (`cli`/`sti`, `hlt`, the
//! assembly context-switch stub); the test harness implements it with a
//! recording mock.

use crate::scheduler::thread::Thread;
use crate::syscall::TrapFrame;

/// Entry point installed on a software-interrupt vector.
pub type InterruptEntry = fn(&mut TrapFrame);

pub trait Machine {
    /// Disables maskable interrupts and returns whether they were enabled.
    fn disable_interrupts(&self) -> bool;

    /// Restores the interrupt-enable flag saved by
    /// [`Machine::disable_interrupts`].
    fn restore_interrupts(&self, was_enabled: bool);

    /// Whether maskable interrupts are currently enabled.
    fn interrupts_enabled(&self) -> bool;

    /// Whether the CPU is currently servicing an interrupt.
    fn in_interrupt(&self) -> bool;

    /// Asks the interrupt stub to yield the CPU just before returning to the
    /// interrupted code. This is the only preemption mechanism available in
    /// interrupt context.
    fn yield_on_return(&self);

    /// Monotonic timer tick counter.
    fn timer_ticks(&self) -> i64;

    /// Address of the switch-entry shim that first-run threads return into.
    /// It is laid down in the bootstrap frames of every new thread stack.
    fn switch_entry(&self) -> usize;

    /// Switches from `prev` to `next` by swapping stacks. Does not return
    /// until `prev` is scheduled again; the return value is the thread that
    /// was running just before `prev` resumed, which the caller hands to
    /// [`crate::kernel::Kernel::finish_context_switch`] semantics in
    /// `schedule_tail`. Called with interrupts disabled.
    ///
    /// # Safety
    /// Both pointers must designate valid thread pages and `prev` must be the
    /// running thread.
    unsafe fn switch_threads(&self, prev: *mut Thread, next: *mut Thread) -> *mut Thread;

    /// Re-enables interrupts and waits for the next one. Used only by the
    /// idle thread.
    fn idle_wait(&self);

    /// Powers the machine off.
    fn power_off(&self) -> !;

    /// Registers `handler` on a software-interrupt vector with the given
    /// descriptor privilege level.
    fn register_interrupt(&self, vector: u8, dpl: u8, name: &'static str, handler: InterruptEntry);
}
