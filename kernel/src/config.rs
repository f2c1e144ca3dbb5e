//! Kernel configuration and global constants.
//!
//! Everything tunable lives here: the priority and nice bands, the timer
//! cadence and the scheduling policy selected on the boot command line.

/// Size of a thread page (TCB + kernel stack).
pub const PGSIZE: usize = 4096;

/// Lowest priority.
pub const PRI_MIN: i32 = 0;
/// Default priority given to the boot thread and to spawned threads.
pub const PRI_DEFAULT: i32 = 31;
/// Highest priority.
pub const PRI_MAX: i32 = 63;
/// Number of distinct priority levels (one feedback queue per level).
pub const PRI_COUNT: usize = (PRI_MAX - PRI_MIN + 1) as usize;

/// Nice band. Lower nice means higher computed priority.
pub const NICE_MIN: i32 = -20;
pub const NICE_DEFAULT: i32 = 0;
pub const NICE_MAX: i32 = 20;

/// Timer interrupts per second.
pub const TIMER_FREQ: i64 = 100;
/// Timer ticks each thread gets before preemption.
pub const TIME_SLICE: u32 = 4;

/// How far priority donation follows a chain of lock holders.
pub const DONATION_DEPTH: usize = 8;

/// First virtual address that belongs to the kernel. User pointers must be
/// strictly below this.
pub const PHYS_BASE: u32 = 0xC000_0000;

/// Exit status recorded for a process that never reached a clean exit.
pub const EXIT_STATUS_FAIL: i32 = -1;

/// Scale factor applied by the load-average and recent-cpu monitoring
/// getters.
pub const MONITOR_SCALE: i32 = 100;

/// Boot-time configuration, parsed from the kernel command line before the
/// scheduler is brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// `true` selects the multilevel feedback queue scheduler, `false` the
    /// strict priority scheduler with donation.
    pub mlfqs: bool,
    /// Timer interrupts per second reported by the platform timer.
    pub timer_freq: i64,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            mlfqs: false,
            timer_freq: TIMER_FREQ,
        }
    }

    /// Parses the boot command line. `-o mlfqs` selects the feedback-queue
    /// scheduler; unknown options are ignored here, they belong to other
    /// subsystems.
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut config = Self::new();
        let mut tokens = cmdline.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "-o" {
                match tokens.next() {
                    Some("mlfqs") => config.mlfqs = true,
                    Some(other) => log::warn!("unknown scheduler option: {}", other),
                    None => log::warn!("-o without an argument"),
                }
            }
        }
        config
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
