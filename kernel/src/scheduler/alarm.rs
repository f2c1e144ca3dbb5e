//! Réveil des threads endormis sur l'horloge.
//!
//! `timer_sleep` range le thread courant dans une file triée par tic de
//! réveil et le bloque. Le gestionnaire de tic, quand le premier dormeur est
//! arrivé à échéance, réveille le thread de service, qui draine ici tous les
//! dormeurs dus. Le dormeur n'a rien à faire à son réveil.

use crate::kernel::Kernel;
use crate::scheduler::thread::Thread;
use crate::sync::IntrGuard;

/// Tri de la file des dormeurs : tic de réveil croissant.
pub(crate) fn wakes_earlier(a: *mut Thread, b: *mut Thread) -> bool {
    unsafe { (*a).wake_tick < (*b).wake_tick }
}

impl Kernel {
    /// Endort le thread courant pour au moins `ticks` tics d'horloge.
    pub fn timer_sleep(&self, ticks: i64) {
        assert!(!self.machine().in_interrupt());
        if ticks <= 0 {
            return;
        }

        let _guard = IntrGuard::new(self.machine());
        unsafe {
            let current = self.thread_current();
            (*current).wake_tick = self.machine().timer_ticks() + ticks;
            self.sched()
                .sleep_list
                .insert_ordered(&mut (*current).sleep_link, wakes_earlier);
            self.thread_block();
        }
    }

    /// Réveille tous les dormeurs arrivés à échéance.
    pub(crate) fn alarm_work(&self) {
        let _guard = IntrGuard::new(self.machine());
        let now = self.machine().timer_ticks();
        unsafe {
            let sched = self.sched();
            while let Some(front) = sched.sleep_list.front() {
                if (*front).wake_tick > now {
                    break;
                }
                sched.sleep_list.remove(&mut (*front).sleep_link);
                self.thread_unblock(front);
            }
        }
    }
}

/// Boucle du thread de service : se bloque, draine les dormeurs à chaque
/// réveil.
pub(crate) fn wakeup_entry(_aux: *mut ()) {
    let kernel = crate::kernel::kernel();
    unsafe {
        kernel.sched().wakeup_thread = kernel.thread_current();
    }

    loop {
        let was_enabled = kernel.machine().disable_interrupts();
        kernel.thread_block();
        kernel.machine().restore_interrupts(was_enabled);

        kernel.alarm_work();
    }
}
