//! # Cœur de l'ordonnanceur
//!
//! Ce module gère les files de threads prêts, le choix du prochain thread et
//! la passe de comptabilité exécutée à chaque tic d'horloge. Deux politiques
//! interchangeables : priorités strictes avec donation (une seule liste
//! triée) ou file de retour multi-niveaux (64 seaux FIFO indexés par
//! priorité, recalculés par le moteur de `mlfqs`).
//!
//! Toute mutation d'une file ou d'un état de thread se fait interruptions
//! coupées. Le gros calcul MLFQ ne tourne jamais en contexte d'interruption :
//! le tic se contente de lever des drapeaux et de réveiller le thread de
//! service.

pub mod alarm;
pub mod mlfqs;
pub mod thread;

use alloc::boxed::Box;
use core::fmt;
use core::ptr;

use crate::config::{
    EXIT_STATUS_FAIL, MONITOR_SCALE, NICE_DEFAULT, NICE_MAX, NICE_MIN, PGSIZE, PRI_COUNT,
    PRI_DEFAULT, PRI_MAX, PRI_MIN, TIME_SLICE,
};
use crate::kernel::Kernel;
use crate::libutils::{Fixed, Link, List};
use crate::process::ChildProcess;
use crate::sync::Semaphore;
use self::thread::{
    alloc_frame, alloc_thread_page, attach_links, free_thread_page, is_thread, kernel_thread,
    priority_greater, KernelThreadFrame, SwitchEntryFrame, SwitchThreadsFrame, Thread, ThreadFunc,
    ThreadStatus, Tid, THREAD_NAME_LEN,
};

/// Échec de création de thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// Pas de page libre pour le TCB et sa pile.
    OutOfMemory,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::OutOfMemory => write!(f, "out of memory for a new thread page"),
        }
    }
}

pub type SpawnResult = Result<Tid, SpawnError>;

/// Les structures de threads prêts, selon la politique choisie au boot.
pub(crate) enum ReadyQueues {
    /// Une liste triée par priorité effective décroissante.
    Priority(List<Thread>),
    /// Un seau FIFO par niveau de priorité.
    Mlfqs([List<Thread>; PRI_COUNT]),
}

impl ReadyQueues {
    fn new(mlfqs: bool) -> Self {
        if mlfqs {
            ReadyQueues::Mlfqs(core::array::from_fn(|_| List::new()))
        } else {
            ReadyQueues::Priority(List::new())
        }
    }

    /// Range un thread selon sa priorité effective.
    pub(crate) unsafe fn insert(&mut self, t: *mut Thread) {
        match self {
            ReadyQueues::Priority(list) => {
                list.insert_ordered(&mut (*t).sched_link, priority_greater)
            }
            ReadyQueues::Mlfqs(buckets) => {
                buckets[(*t).priority as usize].push_back(&mut (*t).mlfqs_link)
            }
        }
    }

    /// Retire et retourne le thread prêt le plus prioritaire.
    pub(crate) unsafe fn pop_highest(&mut self) -> Option<*mut Thread> {
        match self {
            ReadyQueues::Priority(list) => list.pop_front(),
            ReadyQueues::Mlfqs(buckets) => {
                for bucket in buckets.iter_mut().rev() {
                    if let Some(t) = bucket.pop_front() {
                        return Some(t);
                    }
                }
                None
            }
        }
    }

    /// Priorité du meilleur thread prêt, s'il y en a un.
    pub(crate) fn highest_priority(&self) -> Option<i32> {
        match self {
            ReadyQueues::Priority(list) => list.front().map(|t| unsafe { (*t).priority }),
            ReadyQueues::Mlfqs(buckets) => {
                for (level, bucket) in buckets.iter().enumerate().rev() {
                    if !bucket.is_empty() {
                        return Some(level as i32);
                    }
                }
                None
            }
        }
    }
}

/// L'état de l'ordonnanceur. Tous les singletons installés au boot sont des
/// champs de cette structure, pas des globales ambiantes.
pub(crate) struct Scheduler {
    pub(crate) ready: ReadyQueues,
    /// Tous les threads vivants.
    pub(crate) all_list: List<Thread>,
    /// Dormeurs de l'alarme, triés par tic de réveil croissant.
    pub(crate) sleep_list: List<Thread>,
    pub(crate) current: *mut Thread,
    pub(crate) initial_thread: *mut Thread,
    pub(crate) idle_thread: *mut Thread,
    pub(crate) mlfqs_thread: *mut Thread,
    pub(crate) wakeup_thread: *mut Thread,
    // Statistiques de tics.
    pub(crate) idle_ticks: i64,
    pub(crate) kernel_ticks: i64,
    pub(crate) user_ticks: i64,
    /// Tics écoulés dans la tranche de temps courante.
    pub(crate) thread_ticks: u32,
    /// Moyenne glissante du nombre de threads prêts.
    pub(crate) load_avg: Fixed,
    pub(crate) recent_cpu_update_pending: bool,
    pub(crate) priorities_update_pending: bool,
}

impl Scheduler {
    pub(crate) fn new(mlfqs: bool) -> Self {
        Self {
            ready: ReadyQueues::new(mlfqs),
            all_list: List::new(),
            sleep_list: List::new(),
            current: ptr::null_mut(),
            initial_thread: ptr::null_mut(),
            idle_thread: ptr::null_mut(),
            mlfqs_thread: ptr::null_mut(),
            wakeup_thread: ptr::null_mut(),
            idle_ticks: 0,
            kernel_ticks: 0,
            user_ticks: 0,
            thread_ticks: 0,
            load_avg: Fixed::ZERO,
            recent_cpu_update_pending: false,
            priorities_update_pending: false,
        }
    }
}

impl Kernel {
    /// Transforme le fil d'exécution du boot en premier thread.
    ///
    /// À appeler interruptions coupées, avant toute création de thread. Le
    /// thread courant devient `main`, avec la priorité par défaut.
    pub fn thread_init(&self) {
        assert!(!self.machine().interrupts_enabled());

        let t = alloc_thread_page();
        assert!(!t.is_null(), "no memory for the initial thread");
        unsafe {
            self.init_thread(t, "main", PRI_DEFAULT);
            let sched = self.sched();
            sched.initial_thread = t;
            sched.current = t;
            (*t).status = ThreadStatus::Running;
            (*t).tid = self.allocate_tid();
        }
        log::info!(
            "thread system ready, policy: {}",
            if self.config().mlfqs {
                "multilevel feedback queues"
            } else {
                "strict priority"
            }
        );
    }

    /// Démarre l'ordonnancement préemptif.
    ///
    /// Crée le thread `idle` et les deux threads de service (moteur MLFQ et
    /// réveil des dormeurs), puis rouvre les interruptions et attend que
    /// `idle` se soit installé.
    pub fn thread_start(&self) {
        let idle_started = Semaphore::new(0);
        self.thread_create(
            "idle",
            PRI_MIN,
            idle_entry,
            &idle_started as *const Semaphore as *mut (),
        )
        .expect("failed to create the idle thread");
        self.thread_create("mlfqs", PRI_MAX, mlfqs::mlfqs_entry, ptr::null_mut())
            .expect("failed to create the mlfqs service thread");
        self.thread_create("wakeup", PRI_MAX, alarm::wakeup_entry, ptr::null_mut())
            .expect("failed to create the wakeup service thread");

        self.machine().restore_interrupts(true);

        idle_started.down(self);
    }

    /// Crée un thread noyau prêt à courir et retourne son tid.
    ///
    /// Une fiche enfant est enregistrée chez le créateur. Si le nouveau
    /// thread est plus prioritaire que l'appelant, le CPU lui est cédé
    /// immédiatement.
    pub fn thread_create(
        &self,
        name: &str,
        priority: i32,
        function: ThreadFunc,
        aux: *mut (),
    ) -> SpawnResult {
        let t = alloc_thread_page();
        if t.is_null() {
            return Err(SpawnError::OutOfMemory);
        }

        unsafe {
            self.init_thread(t, name, priority);
            let tid = self.allocate_tid();
            (*t).tid = tid;

            // Fiche enfant chez le créateur : c'est elle que `wait` moissonne.
            let current = self.thread_current();
            let record = Box::into_raw(Box::new(ChildProcess {
                tid,
                exit_status: (*t).exit_status,
                did_execute: false,
                link: Link::new(),
            }));
            (*record).link.set_owner(record);
            (*current).children.push_back(&mut (*record).link);

            // Les trois cadres d'amorçage, posés atomiquement pour qu'aucune
            // valeur intermédiaire de `stack` ne soit observable.
            {
                let _guard = self.intr_guard();
                let kf = alloc_frame::<KernelThreadFrame>(t);
                kf.write(KernelThreadFrame {
                    eip: 0,
                    function,
                    aux,
                });
                let ef = alloc_frame::<SwitchEntryFrame>(t);
                ef.write(SwitchEntryFrame {
                    eip: kernel_thread as usize,
                });
                let sf = alloc_frame::<SwitchThreadsFrame>(t);
                sf.write(SwitchThreadsFrame {
                    eip: self.machine().switch_entry(),
                    ebp: 0,
                });
            }

            log::debug!("created thread {} \"{}\" priority {}", tid, (*t).name(), priority);

            self.thread_unblock(t);

            {
                let _guard = self.intr_guard();
                let current = self.thread_current();
                if (*t).priority > (*current).priority && current != self.sched().idle_thread {
                    self.thread_yield();
                }
            }

            Ok(tid)
        }
    }

    /// Comme [`Kernel::thread_create`], avec un espace d'adressage
    /// utilisateur attaché avant le premier ordonnancement. C'est le point
    /// d'entrée du chargeur de programmes.
    pub fn thread_create_user(
        &self,
        name: &str,
        priority: i32,
        function: ThreadFunc,
        aux: *mut (),
        pagedir: Box<dyn crate::loader::AddressSpace>,
        executable: Option<Box<dyn crate::fs::File>>,
    ) -> SpawnResult {
        let t = alloc_thread_page();
        if t.is_null() {
            return Err(SpawnError::OutOfMemory);
        }

        unsafe {
            self.init_thread(t, name, priority);
            let tid = self.allocate_tid();
            (*t).tid = tid;
            (*t).pagedir = Some(pagedir);
            if let Some(mut exe) = executable {
                exe.deny_write();
                (*t).executable_file = Some(exe);
            }

            let current = self.thread_current();
            let record = Box::into_raw(Box::new(ChildProcess {
                tid,
                exit_status: (*t).exit_status,
                did_execute: false,
                link: Link::new(),
            }));
            (*record).link.set_owner(record);
            (*current).children.push_back(&mut (*record).link);

            {
                let _guard = self.intr_guard();
                let kf = alloc_frame::<KernelThreadFrame>(t);
                kf.write(KernelThreadFrame {
                    eip: 0,
                    function,
                    aux,
                });
                let ef = alloc_frame::<SwitchEntryFrame>(t);
                ef.write(SwitchEntryFrame {
                    eip: kernel_thread as usize,
                });
                let sf = alloc_frame::<SwitchThreadsFrame>(t);
                sf.write(SwitchThreadsFrame {
                    eip: self.machine().switch_entry(),
                    ebp: 0,
                });
            }

            log::debug!("created user thread {} \"{}\"", tid, (*t).name());

            self.thread_unblock(t);

            {
                let _guard = self.intr_guard();
                let current = self.thread_current();
                if (*t).priority > (*current).priority && current != self.sched().idle_thread {
                    self.thread_yield();
                }
            }

            Ok(tid)
        }
    }

    /// Endort le thread courant. Il ne sera réordonnancé que par
    /// [`Kernel::thread_unblock`]. Interruptions coupées obligatoires.
    pub fn thread_block(&self) {
        assert!(!self.machine().in_interrupt());
        assert!(!self.machine().interrupts_enabled());

        unsafe {
            let current = self.thread_current();
            (*current).status = ThreadStatus::Blocked;
            self.schedule();
        }
    }

    /// Rend prêt un thread bloqué. Ne préempte pas : l'appelant qui y tient
    /// cède le CPU lui-même.
    pub fn thread_unblock(&self, t: *mut Thread) {
        assert!(is_thread(t));

        let _guard = self.intr_guard();
        unsafe {
            assert!((*t).status == ThreadStatus::Blocked);
            self.sched().ready.insert(t);
            (*t).status = ThreadStatus::Ready;
        }
    }

    /// Le thread en train de courir, avec ses vérifications de santé : le
    /// canari est intact et l'état est bien `Running`.
    pub fn thread_current(&self) -> *mut Thread {
        let t = unsafe { self.sched().current };
        assert!(is_thread(t));
        assert!(unsafe { (*t).status } == ThreadStatus::Running);
        t
    }

    /// Tid du thread courant.
    pub fn thread_tid(&self) -> Tid {
        unsafe { (*self.thread_current()).tid }
    }

    /// Nom du thread courant.
    pub fn thread_name(&self) -> alloc::string::String {
        unsafe { alloc::string::String::from((*self.thread_current()).name()) }
    }

    /// Cède le CPU. Le thread reste prêt et peut être réélu aussitôt.
    pub fn thread_yield(&self) {
        assert!(!self.machine().in_interrupt());

        let _guard = self.intr_guard();
        unsafe {
            let current = self.thread_current();
            let sched = self.sched();
            if current != sched.idle_thread {
                sched.ready.insert(current);
            }
            (*current).status = ThreadStatus::Ready;
            self.schedule();
        }
    }

    /// Termine le thread courant : ressources de processus rendues, fiches
    /// enfants jetées, orphelins détachés, retrait de la liste des vivants.
    /// La page du thread sera libérée par le prochain `schedule_tail`.
    pub fn thread_exit(&self) -> ! {
        assert!(!self.machine().in_interrupt());

        self.process_exit();

        unsafe {
            let current = self.thread_current();
            log::debug!("thread {} \"{}\" exiting", (*current).tid, (*current).name());

            while let Some(record) = (*current).children.pop_front() {
                drop(Box::from_raw(record));
            }

            self.machine().disable_interrupts();
            let sched = self.sched();
            // Les enfants encore vivants n'ont plus personne à signaler.
            for t in sched.all_list.iter() {
                if (*t).parent == current {
                    (*t).parent = ptr::null_mut();
                }
            }
            sched.all_list.remove(&mut (*current).all_link);
            (*current).status = ThreadStatus::Dying;
            self.schedule();
        }
        unreachable!("a dying thread came back to life");
    }

    /// Applique `f` à chaque thread vivant. Interruptions coupées
    /// obligatoires.
    pub fn thread_foreach(&self, mut f: impl FnMut(*mut Thread)) {
        assert!(!self.machine().interrupts_enabled());
        unsafe {
            for t in self.sched().all_list.iter() {
                f(t);
            }
        }
    }

    /// Fixe la priorité de base du thread courant, écrêtée à la bande
    /// autorisée. La priorité effective ne baisse pas tant que des dons sont
    /// en cours. Si le premier des prêts nous dépasse désormais, on lui cède
    /// le CPU.
    pub fn thread_set_priority(&self, new_priority: i32) {
        let _guard = self.intr_guard();
        unsafe {
            let current = self.thread_current();
            let clamped = new_priority.clamp(PRI_MIN, PRI_MAX);
            (*current).base_priority = clamped;
            if (*current).donors.is_empty() || clamped > (*current).priority {
                (*current).priority = clamped;
            }

            if let ReadyQueues::Priority(ref list) = self.sched().ready {
                if let Some(front) = list.front() {
                    if (*front).priority > (*current).priority {
                        self.thread_yield();
                    }
                }
            }
        }
    }

    /// Priorité effective du thread courant.
    pub fn thread_get_priority(&self) -> i32 {
        unsafe { (*self.thread_current()).priority }
    }

    /// Fixe la gentillesse du thread courant et recalcule sa priorité. Si un
    /// seau plus prioritaire est peuplé, le CPU est cédé.
    pub fn thread_set_nice(&self, nice: i32) {
        let _guard = self.intr_guard();
        unsafe {
            let current = self.thread_current();
            (*current).nice = nice.clamp(NICE_MIN, NICE_MAX);

            if self.config().mlfqs {
                self.update_thread_priority(current);
                if let Some(highest) = self.sched().ready.highest_priority() {
                    if (*current).priority < highest {
                        self.thread_yield();
                    }
                }
            }
        }
    }

    pub fn thread_get_nice(&self) -> i32 {
        unsafe { (*self.thread_current()).nice }
    }

    /// Charge moyenne du système, multipliée par cent et arrondie au plus
    /// proche.
    pub fn thread_get_load_avg(&self) -> i32 {
        let _guard = self.intr_guard();
        unsafe { self.sched().load_avg.mul_int(MONITOR_SCALE).round() }
    }

    /// `recent_cpu` du thread courant, multiplié par cent et arrondi au plus
    /// proche.
    pub fn thread_get_recent_cpu(&self) -> i32 {
        let _guard = self.intr_guard();
        unsafe { (*self.thread_current()).recent_cpu.mul_int(MONITOR_SCALE).round() }
    }

    /// Statistiques de répartition des tics.
    pub fn thread_print_stats(&self) {
        let _guard = self.intr_guard();
        let sched = unsafe { self.sched() };
        log::info!(
            "thread: {} idle ticks, {} kernel ticks, {} user ticks",
            sched.idle_ticks,
            sched.kernel_ticks,
            sched.user_ticks
        );
    }

    /// Le tic d'horloge, appelé par le gestionnaire d'interruption du timer.
    ///
    /// Incrémente la comptabilité, lève les drapeaux de recalcul, et demande
    /// une préemption en fin d'interruption quand la tranche est épuisée. Le
    /// calcul lourd est délégué aux threads de service.
    pub fn timer_tick(&self) {
        assert!(self.machine().in_interrupt());

        unsafe {
            let sched = self.sched();
            let current = sched.current;
            debug_assert!(is_thread(current));

            (*current).recent_cpu = (*current).recent_cpu.add_int(1);

            if current == sched.idle_thread {
                sched.idle_ticks += 1;
            } else if (*current).pagedir.is_some() {
                sched.user_ticks += 1;
            } else {
                sched.kernel_ticks += 1;
            }

            let ticks = self.machine().timer_ticks();
            if ticks % self.config().timer_freq == 0 {
                sched.recent_cpu_update_pending = true;
            }

            sched.thread_ticks += 1;
            if sched.thread_ticks >= TIME_SLICE {
                sched.priorities_update_pending = true;
                self.machine().yield_on_return();
            }

            if self.config().mlfqs
                && (sched.recent_cpu_update_pending || sched.priorities_update_pending)
                && is_thread(sched.mlfqs_thread)
                && (*sched.mlfqs_thread).status == ThreadStatus::Blocked
            {
                self.thread_unblock(sched.mlfqs_thread);
                self.machine().yield_on_return();
            }

            if let Some(front) = sched.sleep_list.front() {
                if (*front).wake_tick <= ticks
                    && is_thread(sched.wakeup_thread)
                    && (*sched.wakeup_thread).status == ThreadStatus::Blocked
                {
                    self.thread_unblock(sched.wakeup_thread);
                    self.machine().yield_on_return();
                }
            }
        }
    }

    /// Relève la priorité effective de `t` (donation) et le repositionne
    /// dans la liste des prêts s'il y attend son tour.
    pub(crate) fn thread_raise_priority(&self, t: *mut Thread, priority: i32) {
        debug_assert!(!self.machine().interrupts_enabled());
        unsafe {
            (*t).priority = priority;
            if (*t).status == ThreadStatus::Ready {
                if let ReadyQueues::Priority(ref mut list) = self.sched().ready {
                    list.remove(&mut (*t).sched_link);
                    list.insert_ordered(&mut (*t).sched_link, priority_greater);
                }
            }
        }
    }

    /// Retrouve un thread vivant par son tid.
    pub fn find_thread(&self, tid: Tid) -> Option<*mut Thread> {
        let _guard = self.intr_guard();
        unsafe {
            for t in self.sched().all_list.iter() {
                if (*t).tid == tid {
                    return Some(t);
                }
            }
        }
        None
    }

    /// Achève un changement de contexte dans le thread entrant : à appeler
    /// par le stub une fois les piles échangées, avec le thread sortant en
    /// argument.
    ///
    /// # Safety
    /// `prev` doit être le thread qui vient d'être déprogrammé, ou nul.
    pub unsafe fn finish_context_switch(&self, prev: *mut Thread) {
        let was_enabled = self.machine().disable_interrupts();
        self.schedule_tail(prev);
        self.machine().restore_interrupts(was_enabled);
    }

    /// Initialisation de base d'un TCB à l'état bloqué. La gentillesse et le
    /// `recent_cpu` sont hérités du créateur ; le premier thread part de
    /// zéro.
    unsafe fn init_thread(&self, t: *mut Thread, name: &str, priority: i32) {
        assert!(!t.is_null());
        assert!((PRI_MIN..=PRI_MAX).contains(&priority));

        let creator = self.sched().current;
        let (nice, recent_cpu, parent) = if creator.is_null() {
            (NICE_DEFAULT, Fixed::ZERO, ptr::null_mut())
        } else {
            ((*creator).nice, (*creator).recent_cpu, creator)
        };

        ptr::write(
            t,
            Thread {
                tid: 0,
                status: ThreadStatus::Blocked,
                name: [0; THREAD_NAME_LEN],
                stack: (t as *mut u8).add(PGSIZE),
                priority,
                base_priority: priority,
                donors: List::new(),
                donor_link: Link::new(),
                wait_lock: ptr::null_mut(),
                nice,
                recent_cpu,
                sched_link: Link::new(),
                mlfqs_link: Link::new(),
                all_link: Link::new(),
                sleep_link: Link::new(),
                wake_tick: 0,
                parent,
                children: List::new(),
                child_process_lock: Semaphore::new(0),
                tid_wait: 0,
                executable_file: None,
                num_fd: 2,
                files: List::new(),
                exit_status: EXIT_STATUS_FAIL,
                pagedir: None,
                magic: thread::THREAD_MAGIC,
            },
        );
        (*t).set_name(name);
        attach_links(t);

        let _guard = self.intr_guard();
        self.sched().all_list.push_back(&mut (*t).all_link);
    }

    /// Tid suivant, sous le verrou dédié.
    fn allocate_tid(&self) -> Tid {
        self.tid_lock().acquire(self);
        let tid = self.next_tid();
        self.tid_lock().release(self);
        tid
    }

    /// Élit et lance le prochain thread. Interruptions coupées, et le
    /// courant ne doit plus être marqué `Running`.
    pub(crate) unsafe fn schedule(&self) {
        assert!(!self.machine().interrupts_enabled());

        let sched = self.sched();
        let current = sched.current;
        assert!((*current).status != ThreadStatus::Running);

        let next = sched.ready.pop_highest().unwrap_or(sched.idle_thread);
        assert!(is_thread(next), "nothing to run and no idle thread");

        let prev = if current != next {
            sched.current = next;
            self.machine().switch_threads(current, next)
        } else {
            ptr::null_mut()
        };
        self.schedule_tail(prev);
    }

    /// Épilogue d'un changement de contexte, exécuté par le thread entrant :
    /// marquage `Running`, remise à zéro de la tranche, activation de
    /// l'espace d'adressage, et libération du sortant s'il se meurt.
    pub(crate) unsafe fn schedule_tail(&self, prev: *mut Thread) {
        assert!(!self.machine().interrupts_enabled());

        let sched = self.sched();
        let current = sched.current;
        (*current).status = ThreadStatus::Running;
        sched.thread_ticks = 0;

        if let Some(pagedir) = (*current).pagedir.as_ref() {
            pagedir.activate();
        }

        if !prev.is_null()
            && (*prev).status == ThreadStatus::Dying
            && prev != sched.initial_thread
        {
            assert!(prev != current);
            free_thread_page(prev);
        }
    }
}

/// Le thread de repos : bloqué en permanence, élu seulement quand aucun
/// autre thread n'est prêt.
fn idle_entry(aux: *mut ()) {
    let kernel = crate::kernel::kernel();
    unsafe {
        kernel.sched().idle_thread = kernel.thread_current();
        let started = &*(aux as *const Semaphore);
        started.up(kernel);
    }

    loop {
        kernel.machine().disable_interrupts();
        kernel.thread_block();
        // Rouvre les interruptions et attend la prochaine d'un seul souffle.
        kernel.machine().idle_wait();
    }
}
