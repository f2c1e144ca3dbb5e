//! # Moteur de la file de retour multi-niveaux
//!
//! Les équations qui pilotent les 64 seaux : `load_avg` est une moyenne
//! glissante du nombre de threads prêts, `recent_cpu` décroît
//! exponentiellement avec un facteur dérivé de `load_avg`, et la priorité
//! descend quand `recent_cpu` ou la gentillesse montent. Tout est calculé en
//! virgule fixe 17.14.
//!
//! Le gestionnaire de tic ne fait que lever des drapeaux ; c'est le thread
//! de service, réveillé par le tic et tournant à la priorité maximale, qui
//! déroule les recalculs ici.

use crate::config::{PRI_MAX, PRI_MIN};
use crate::kernel::Kernel;
use crate::scheduler::thread::{Thread, ThreadStatus};
use crate::scheduler::ReadyQueues;
use crate::sync::IntrGuard;

impl Kernel {
    /// Vrai pour les trois threads de service exclus de la comptabilité :
    /// `idle`, le moteur MLFQ et le réveil des dormeurs.
    pub(crate) fn is_service_thread(&self, t: *mut Thread) -> bool {
        let sched = unsafe { self.sched() };
        t == sched.idle_thread || t == sched.mlfqs_thread || t == sched.wakeup_thread
    }

    /// `load_avg := (59/60)·load_avg + (1/60)·prêts`
    ///
    /// Les threads comptés sont ceux prêts ou en train de courir, threads de
    /// service exclus.
    pub(crate) fn update_load_avg(&self) {
        let mut ready_threads = 0;

        unsafe {
            let sched = self.sched();
            for t in sched.all_list.iter() {
                if (*t).status == ThreadStatus::Ready && !self.is_service_thread(t) {
                    ready_threads += 1;
                }
            }
            let current = sched.current;
            if !self.is_service_thread(current) {
                ready_threads += 1;
            }

            sched.load_avg = sched
                .load_avg
                .mul_int(59)
                .add_int(ready_threads)
                .div_int(60);
        }
    }

    /// `recent_cpu := (2·load_avg)/(2·load_avg + 1) · recent_cpu + nice`
    /// pour chaque thread éligible.
    pub(crate) fn update_recent_cpu(&self) {
        unsafe {
            let sched = self.sched();
            sched.recent_cpu_update_pending = false;

            let twice_load = sched.load_avg.mul_int(2);
            let decay = twice_load.div(twice_load.add_int(1));

            for t in sched.all_list.iter() {
                if !self.is_service_thread(t) {
                    (*t).recent_cpu = decay.mul((*t).recent_cpu).add_int((*t).nice);
                }
            }
        }
    }

    /// `priorité := écrêtée(PRI_MAX − recent_cpu/4 − 2·nice)`, la division
    /// arrondie vers zéro. Un thread prêt déménage en queue de son nouveau
    /// seau.
    pub(crate) fn update_thread_priority(&self, t: *mut Thread) {
        unsafe {
            let old_priority = (*t).priority;

            if !self.is_service_thread(t) {
                let penalty = (*t).recent_cpu.div_int(4).trunc() + 2 * (*t).nice;
                (*t).priority = (PRI_MAX - penalty).clamp(PRI_MIN, PRI_MAX);
            }

            if (*t).status == ThreadStatus::Ready && (*t).priority != old_priority {
                let _guard = IntrGuard::new(self.machine());
                if let ReadyQueues::Mlfqs(ref mut buckets) = self.sched().ready {
                    buckets[old_priority as usize].remove(&mut (*t).mlfqs_link);
                    buckets[(*t).priority as usize].push_back(&mut (*t).mlfqs_link);
                }
            }
        }
    }

    /// Recalcule la priorité de tous les threads vivants.
    pub(crate) fn update_priorities(&self) {
        unsafe {
            let sched = self.sched();
            sched.priorities_update_pending = false;

            for t in sched.all_list.iter() {
                self.update_thread_priority(t);
            }
        }
    }

    /// Le travail d'un réveil du thread de service : solder les drapeaux
    /// levés par le tic.
    pub(crate) fn mlfqs_work(&self) {
        let sched = unsafe { self.sched() };
        if sched.recent_cpu_update_pending {
            self.update_load_avg();
            self.update_recent_cpu();
        }
        if sched.priorities_update_pending {
            self.update_priorities();
        }
    }
}

/// Boucle du thread de service : se bloque, et déroule les recalculs à
/// chaque réveil.
pub(crate) fn mlfqs_entry(_aux: *mut ()) {
    let kernel = crate::kernel::kernel();
    unsafe {
        kernel.sched().mlfqs_thread = kernel.thread_current();
    }

    loop {
        let was_enabled = kernel.machine().disable_interrupts();
        kernel.thread_block();
        kernel.machine().restore_interrupts(was_enabled);

        kernel.mlfqs_work();
    }
}
