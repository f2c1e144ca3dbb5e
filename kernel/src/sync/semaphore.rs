//! Sémaphore à compteur avec file d'attente par priorité.
//!
//! `down` bloque quand le compteur est à zéro. `up` préfère la remise
//! directe : s'il y a des dormeurs, le compteur n'est pas incrémenté, le
//! dormeur de plus haute priorité est réveillé et l'unité lui appartient.
//! Le comportement observable aux points de repos est identique à
//! l'incrément-puis-décrément, mais le réveillé n'a plus rien à faire en se
//! relevant — c'est le réveilleur qui solde la comptabilité.

use core::cell::{Cell, UnsafeCell};

use crate::kernel::Kernel;
use crate::libutils::List;
use crate::scheduler::thread::{Thread, ThreadStatus};
use crate::sync::IntrGuard;

pub struct Semaphore {
    value: Cell<u32>,
    waiters: UnsafeCell<List<Thread>>,
}

// Un seul CPU : l'accès est sérialisé par le masquage des interruptions.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub const fn new(value: u32) -> Self {
        Self {
            value: Cell::new(value),
            waiters: UnsafeCell::new(List::new()),
        }
    }

    pub fn value(&self) -> u32 {
        self.value.get()
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn waiters(&self) -> &mut List<Thread> {
        &mut *self.waiters.get()
    }

    /// Décrémente le sémaphore, en s'endormant tant qu'il est à zéro.
    ///
    /// Interdit en contexte d'interruption : on peut s'y endormir.
    pub fn down(&self, kernel: &Kernel) {
        assert!(!kernel.machine().in_interrupt());

        let _guard = IntrGuard::new(kernel.machine());
        if self.value.get() > 0 {
            self.value.set(self.value.get() - 1);
        } else {
            unsafe { self.block_current(kernel) };
        }
    }

    /// Tente de décrémenter sans s'endormir.
    pub fn try_down(&self, kernel: &Kernel) -> bool {
        let _guard = IntrGuard::new(kernel.machine());
        if self.value.get() > 0 {
            self.value.set(self.value.get() - 1);
            true
        } else {
            false
        }
    }

    /// Met le thread courant en attente sur ce sémaphore. L'unité lui sera
    /// remise directement par un `up` ultérieur, il n'a rien à solder à son
    /// réveil.
    pub(crate) unsafe fn block_current(&self, kernel: &Kernel) {
        let current = kernel.thread_current();
        self.waiters().push_back(&mut (*current).sched_link);
        kernel.thread_block();
    }

    /// Incrémente le sémaphore ou remet l'unité au dormeur de plus haute
    /// priorité. Si le réveillé dépasse l'appelant, le CPU lui est cédé
    /// avant de rendre la main (ou au retour d'interruption).
    ///
    /// Utilisable en contexte d'interruption.
    pub fn up(&self, kernel: &Kernel) {
        let _guard = IntrGuard::new(kernel.machine());
        match unsafe { self.take_highest_waiter() } {
            Some(woken) => unsafe { self.wake(kernel, woken) },
            None => self.value.set(self.value.get() + 1),
        }
    }

    /// Retire de la file le dormeur de plus haute priorité effective, en
    /// préservant l'ordre d'arrivée entre égaux.
    pub(crate) unsafe fn take_highest_waiter(&self) -> Option<*mut Thread> {
        let waiters = self.waiters();
        let mut best: *mut Thread = core::ptr::null_mut();
        for t in waiters.iter() {
            if best.is_null() || (*t).priority > (*best).priority {
                best = t;
            }
        }
        if best.is_null() {
            None
        } else {
            waiters.remove(&mut (*best).sched_link);
            Some(best)
        }
    }

    /// Réveille `woken` et cède le CPU s'il nous dépasse.
    pub(crate) unsafe fn wake(&self, kernel: &Kernel, woken: *mut Thread) {
        debug_assert!((*woken).status == ThreadStatus::Blocked);
        kernel.thread_unblock(woken);

        let current = kernel.thread_current();
        if (*woken).priority > (*current).priority {
            if kernel.machine().in_interrupt() {
                kernel.machine().yield_on_return();
            } else {
                kernel.thread_yield();
            }
        }
    }

    /// Rend une unité sans réveiller personne. Réservé au verrou, qui gère
    /// lui-même sa remise directe.
    pub(crate) fn give_unit(&self) {
        self.value.set(self.value.get() + 1);
    }

    /// Consomme une unité disponible. Réservé au verrou.
    pub(crate) fn take_unit(&self) {
        debug_assert!(self.value.get() > 0);
        self.value.set(self.value.get() - 1);
    }
}
