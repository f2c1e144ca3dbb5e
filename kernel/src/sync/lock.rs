//! Verrou avec donation de priorité.
//!
//! Un verrou est un sémaphore binaire doublé d'un détenteur. Sous
//! l'ordonnanceur à priorités strictes, un acquéreur bloqué fait don de sa
//! priorité au détenteur, et la donation remonte la chaîne des verrous
//! attendus jusqu'à une profondeur bornée. La file de retour multi-niveaux
//! recalcule elle-même les priorités, la donation y est donc débrayée.
//!
//! À la libération, le verrou est remis directement au meilleur dormeur : il
//! en devient détenteur avant même de courir, si bien qu'un thread qui se
//! réveille dans `acquire` n'a aucune comptabilité à refaire.

use core::cell::Cell;
use core::ptr;

use crate::config::DONATION_DEPTH;
use crate::kernel::Kernel;
use crate::scheduler::thread::{priority_greater, Thread};
use crate::sync::{IntrGuard, Semaphore};

pub struct Lock {
    holder: Cell<*mut Thread>,
    sema: Semaphore,
}

// Un seul CPU : l'accès est sérialisé par le masquage des interruptions.
unsafe impl Send for Lock {}
unsafe impl Sync for Lock {}

impl Lock {
    pub const fn new() -> Self {
        Self {
            holder: Cell::new(ptr::null_mut()),
            sema: Semaphore::new(1),
        }
    }

    pub fn holder(&self) -> *mut Thread {
        self.holder.get()
    }

    /// Vrai si le thread courant détient ce verrou.
    pub fn held_by_current(&self, kernel: &Kernel) -> bool {
        self.holder.get() == kernel.thread_current()
    }

    /// Prend le verrou, en s'endormant s'il est tenu.
    pub fn acquire(&self, kernel: &Kernel) {
        assert!(!kernel.machine().in_interrupt());
        assert!(!self.held_by_current(kernel));

        let _guard = IntrGuard::new(kernel.machine());
        let current = kernel.thread_current();
        let holder = self.holder.get();

        if holder.is_null() {
            self.sema.take_unit();
            self.holder.set(current);
        } else {
            unsafe {
                if !kernel.config().mlfqs {
                    (*current).wait_lock = self as *const Lock as *mut Lock;
                    (*holder)
                        .donors
                        .insert_ordered(&mut (*current).donor_link, priority_greater);
                    self.donate_chain(kernel, current);
                }
                // À notre réveil, le libérateur nous aura déjà installés
                // comme détenteur.
                self.sema.block_current(kernel);
                debug_assert!(self.holder.get() == current);
            }
        }
    }

    /// Propage la priorité de `donor` le long de la chaîne
    /// `détenteur → verrou attendu par le détenteur → son détenteur → …`,
    /// bornée par `DONATION_DEPTH`.
    unsafe fn donate_chain(&self, kernel: &Kernel, donor: *mut Thread) {
        let donated = (*donor).priority;
        let mut lock: *mut Lock = self as *const Lock as *mut Lock;
        for _ in 0..DONATION_DEPTH {
            if lock.is_null() {
                break;
            }
            let holder = (*lock).holder.get();
            if holder.is_null() {
                break;
            }
            if (*holder).priority < donated {
                kernel.thread_raise_priority(holder, donated);
            }
            lock = (*holder).wait_lock;
        }
    }

    /// Libère le verrou et le remet, le cas échéant, au dormeur de plus
    /// haute priorité.
    pub fn release(&self, kernel: &Kernel) {
        assert!(self.held_by_current(kernel));

        let _guard = IntrGuard::new(kernel.machine());
        let current = kernel.thread_current();

        unsafe {
            if !kernel.config().mlfqs {
                // Les dons liés à ce verrou tombent.
                let lock_ptr = self as *const Lock as *mut Lock;
                for donor in (*current).donors.iter() {
                    if (*donor).wait_lock == lock_ptr {
                        (*current).donors.remove(&mut (*donor).donor_link);
                    }
                }
                // Priorité effective = max(base, dons restants).
                let mut effective = (*current).base_priority;
                for donor in (*current).donors.iter() {
                    if (*donor).priority > effective {
                        effective = (*donor).priority;
                    }
                }
                (*current).priority = effective;
            }

            match self.sema.take_highest_waiter() {
                Some(next) => {
                    // Remise directe : le réveillé détient déjà le verrou
                    // quand il se met à courir.
                    (*next).wait_lock = ptr::null_mut();
                    self.holder.set(next);
                    self.sema.wake(kernel, next);
                }
                None => {
                    self.holder.set(ptr::null_mut());
                    self.sema.give_unit();
                }
            }
        }
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}
