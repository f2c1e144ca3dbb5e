//! Doublures des contrats de plateforme et pilote de changements de
//! contexte.
//!
//! Le stub d'échange de piles n'existe pas sur l'hôte : la doublure machine
//! enregistre le changement demandé et déroule la pile par panique. Le banc
//! de test rattrape cette panique, achève le changement via
//! `finish_context_switch`, et le test continue en agissant comme le
//! nouveau thread courant — exactement le rôle du stub en production.

use std::boxed::Box;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::ptr;
use std::string::String;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::vec::Vec;

use crate::config::{KernelConfig, PGSIZE, PRI_DEFAULT, PRI_MIN, TIMER_FREQ};
use crate::console::Console;
use crate::fs::{File, FileSystem};
use crate::kernel::Kernel;
use crate::loader::{AddressSpace, Loader};
use crate::machine::{InterruptEntry, Machine};
use crate::scheduler::thread::{Thread, ThreadStatus, Tid, TID_ERROR};
use crate::scheduler::ReadyQueues;

/// Charge utile de panique levée par le faux changement de contexte.
pub struct SwitchSignal;

/// Charge utile de panique levée par le faux arrêt machine.
pub struct PowerOff;

fn install_quiet_panic_hook() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if info.payload().is::<SwitchSignal>() || info.payload().is::<PowerOff>() {
                return;
            }
            default_hook(info);
        }));
    });
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

pub struct MockMachine {
    interrupts: Cell<bool>,
    in_interrupt: Cell<bool>,
    yield_requested: Cell<bool>,
    ticks: Cell<i64>,
    switches: RefCell<Vec<(*mut Thread, *mut Thread)>>,
    pub registered: RefCell<Vec<(u8, u8, &'static str)>>,
}

impl MockMachine {
    fn new() -> Self {
        Self {
            // La machine démarre interruptions coupées, comme au boot.
            interrupts: Cell::new(false),
            in_interrupt: Cell::new(false),
            yield_requested: Cell::new(false),
            ticks: Cell::new(0),
            switches: RefCell::new(Vec::new()),
            registered: RefCell::new(Vec::new()),
        }
    }

    pub fn switch_count(&self) -> usize {
        self.switches.borrow().len()
    }

    fn last_switch(&self) -> (*mut Thread, *mut Thread) {
        *self
            .switches
            .borrow()
            .last()
            .expect("a switch signal without a recorded switch")
    }
}

impl Machine for &'static MockMachine {
    fn disable_interrupts(&self) -> bool {
        self.interrupts.replace(false)
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        self.interrupts.set(was_enabled);
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts.get()
    }

    fn in_interrupt(&self) -> bool {
        self.in_interrupt.get()
    }

    fn yield_on_return(&self) {
        self.yield_requested.set(true);
    }

    fn timer_ticks(&self) -> i64 {
        self.ticks.get()
    }

    fn switch_entry(&self) -> usize {
        0
    }

    unsafe fn switch_threads(&self, prev: *mut Thread, next: *mut Thread) -> *mut Thread {
        self.switches.borrow_mut().push((prev, next));
        std::panic::panic_any(SwitchSignal);
    }

    fn idle_wait(&self) {
        self.interrupts.set(true);
    }

    fn power_off(&self) -> ! {
        std::panic::panic_any(PowerOff);
    }

    fn register_interrupt(&self, vector: u8, dpl: u8, name: &'static str, _handler: InterruptEntry) {
        self.registered.borrow_mut().push((vector, dpl, name));
    }
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockConsole {
    pub output: Mutex<Vec<u8>>,
    pub input: Mutex<VecDeque<u8>>,
}

impl MockConsole {
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output.lock().unwrap()).into_owned()
    }

    pub fn push_input(&self, bytes: &[u8]) {
        self.input.lock().unwrap().extend(bytes.iter().copied());
    }
}

impl Console for &'static MockConsole {
    fn putbuf(&self, buf: &[u8]) {
        self.output.lock().unwrap().extend_from_slice(buf);
    }

    fn input_getc(&self) -> u8 {
        self.input.lock().unwrap().pop_front().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Système de fichiers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FsEntry {
    data: Vec<u8>,
    deny_write: bool,
}

#[derive(Default)]
pub struct MockFs {
    files: Mutex<BTreeMap<String, Arc<Mutex<FsEntry>>>>,
    /// Journal des opérations, pour vérifier par exemple que la console
    /// n'emprunte jamais le chemin du système de fichiers.
    pub ops: Mutex<Vec<String>>,
}

impl MockFs {
    pub fn add(&self, name: &str, data: &[u8]) {
        self.files.lock().unwrap().insert(
            String::from(name),
            Arc::new(Mutex::new(FsEntry {
                data: data.to_vec(),
                deny_write: false,
            })),
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.lock().unwrap().contains_key(name)
    }

    pub fn op_count(&self) -> usize {
        self.ops.lock().unwrap().len()
    }

    pub fn write_denied(&self, name: &str) -> bool {
        let entry = self.files.lock().unwrap().get(name).cloned();
        entry.map(|e| e.lock().unwrap().deny_write).unwrap_or(false)
    }
}

pub struct MockFile {
    entry: Arc<Mutex<FsEntry>>,
    pos: usize,
}

impl File for MockFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let entry = self.entry.lock().unwrap();
        let available = entry.data.len().saturating_sub(self.pos);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&entry.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let mut entry = self.entry.lock().unwrap();
        if entry.deny_write {
            return 0;
        }
        // Les fichiers ne grandissent pas à l'écriture.
        let available = entry.data.len().saturating_sub(self.pos);
        let n = available.min(buf.len());
        let pos = self.pos;
        entry.data[pos..pos + n].copy_from_slice(&buf[..n]);
        self.pos += n;
        n
    }

    fn seek(&mut self, pos: u32) {
        self.pos = pos as usize;
    }

    fn tell(&self) -> u32 {
        self.pos as u32
    }

    fn len(&self) -> u32 {
        self.entry.lock().unwrap().data.len() as u32
    }

    fn deny_write(&mut self) {
        self.entry.lock().unwrap().deny_write = true;
    }

    fn allow_write(&mut self) {
        self.entry.lock().unwrap().deny_write = false;
    }
}

impl FileSystem for &'static MockFs {
    fn open(&self, name: &str) -> Option<Box<dyn File>> {
        self.ops.lock().unwrap().push(format!("open:{}", name));
        let entry = self.files.lock().unwrap().get(name).cloned()?;
        Some(Box::new(MockFile { entry, pos: 0 }))
    }

    fn create(&self, name: &str, initial_size: u32) -> bool {
        self.ops
            .lock()
            .unwrap()
            .push(format!("create:{}:{}", name, initial_size));
        let mut files = self.files.lock().unwrap();
        if files.contains_key(name) {
            return false;
        }
        files.insert(
            String::from(name),
            Arc::new(Mutex::new(FsEntry {
                data: vec![0; initial_size as usize],
                deny_write: false,
            })),
        );
        true
    }

    fn remove(&self, name: &str) -> bool {
        self.ops.lock().unwrap().push(format!("remove:{}", name));
        self.files.lock().unwrap().remove(name).is_some()
    }
}

// ---------------------------------------------------------------------------
// Espace d'adressage et chargeur
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockPages {
    pages: Mutex<BTreeMap<u32, Box<[u8; PGSIZE]>>>,
    pub activations: AtomicUsize,
}

impl MockPages {
    pub fn map_page(&self, base: u32) {
        assert_eq!(base as usize % PGSIZE, 0);
        self.pages
            .lock()
            .unwrap()
            .insert(base, Box::new([0; PGSIZE]));
    }

    /// Écrit dans la mémoire utilisateur simulée. Doit rester dans une page.
    pub fn poke(&self, vaddr: u32, bytes: &[u8]) {
        let base = vaddr & !(PGSIZE as u32 - 1);
        let offset = (vaddr - base) as usize;
        assert!(offset + bytes.len() <= PGSIZE, "poke crosses a page");
        let mut pages = self.pages.lock().unwrap();
        let page = pages.get_mut(&base).expect("poking an unmapped page");
        page[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn poke_word(&self, vaddr: u32, word: i32) {
        self.poke(vaddr, &word.to_le_bytes());
    }

    pub fn peek(&self, vaddr: u32, len: usize) -> Vec<u8> {
        let base = vaddr & !(PGSIZE as u32 - 1);
        let offset = (vaddr - base) as usize;
        let pages = self.pages.lock().unwrap();
        let page = pages.get(&base).expect("peeking an unmapped page");
        page[offset..offset + len].to_vec()
    }
}

pub struct MockAddressSpace {
    pub pages: Arc<MockPages>,
}

impl AddressSpace for MockAddressSpace {
    fn translate(&self, vaddr: u32) -> Option<*mut u8> {
        let base = vaddr & !(PGSIZE as u32 - 1);
        let offset = (vaddr - base) as usize;
        let pages = self.pages.pages.lock().unwrap();
        pages
            .get(&base)
            .map(|page| unsafe { (page.as_ptr() as *mut u8).add(offset) })
    }

    fn activate(&self) {
        self.pages.activations.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point d'entrée des threads de test : jamais exécuté, les corps de thread
/// ne tournent pas sans vrai échange de piles.
pub fn noop_entry(_aux: *mut ()) {}

#[derive(Default)]
pub struct MockLoader {
    pub last_spawned: Mutex<Option<Tid>>,
}

impl Loader for &'static MockLoader {
    fn execute(&self, kernel: &Kernel, cmdline: &str) -> Tid {
        let program = cmdline.split_whitespace().next().unwrap_or("");
        let pages = Arc::new(MockPages::default());
        match kernel.thread_create_user(
            program,
            PRI_DEFAULT,
            noop_entry,
            ptr::null_mut(),
            Box::new(MockAddressSpace { pages }),
            None,
        ) {
            Ok(tid) => {
                *self.last_spawned.lock().unwrap() = Some(tid);
                tid
            }
            Err(_) => TID_ERROR,
        }
    }
}

// ---------------------------------------------------------------------------
// Le banc de test
// ---------------------------------------------------------------------------

/// Résultat d'un pas de pilotage : l'appel a rendu la main normalement, ou
/// bien un changement de contexte a eu lieu et le test parle désormais au
/// nom du nouveau thread courant.
pub enum Step<T> {
    Done(T),
    Switched,
}

impl<T> Step<T> {
    pub fn unwrap_done(self) -> T {
        match self {
            Step::Done(value) => value,
            Step::Switched => panic!("expected the call to finish, but it switched"),
        }
    }

    pub fn assert_switched(&self) {
        assert!(matches!(self, Step::Switched), "expected a context switch");
    }
}

pub struct Bench {
    pub kernel: &'static Kernel,
    pub machine: &'static MockMachine,
    pub console: &'static MockConsole,
    pub fs: &'static MockFs,
    pub loader: &'static MockLoader,
    pub idle: Tid,
    pub mlfqs: Tid,
    pub wakeup: Tid,
}

/// Monte un noyau complet sur doublures : thread initial `main` courant,
/// threads de service installés et parqués comme après leur premier tour.
pub fn boot(mlfqs: bool) -> Bench {
    install_quiet_panic_hook();

    let machine: &'static MockMachine = Box::leak(Box::new(MockMachine::new()));
    let console: &'static MockConsole = Box::leak(Box::new(MockConsole::default()));
    let fs: &'static MockFs = Box::leak(Box::new(MockFs::default()));
    let loader: &'static MockLoader = Box::leak(Box::new(MockLoader::default()));

    let config = KernelConfig {
        mlfqs,
        timer_freq: TIMER_FREQ,
    };
    let kernel: &'static Kernel = Box::leak(Box::new(Kernel::new(
        config,
        Box::new(machine),
        Box::new(console),
        Box::new(fs),
        Box::new(loader),
    )));

    kernel.thread_init();
    kernel.syscall_init();

    let bench = Bench {
        kernel,
        machine,
        console,
        fs,
        loader,
        idle: 0,
        mlfqs: 0,
        wakeup: 0,
    };

    let idle = bench.spawn_parked("idle", PRI_MIN);
    unsafe { kernel.sched().idle_thread = kernel.find_thread(idle).unwrap() };
    let mlfqs_tid = bench.spawn_parked("mlfqs", crate::config::PRI_MAX);
    unsafe { kernel.sched().mlfqs_thread = kernel.find_thread(mlfqs_tid).unwrap() };
    let wakeup = bench.spawn_parked("wakeup", crate::config::PRI_MAX);
    unsafe { kernel.sched().wakeup_thread = kernel.find_thread(wakeup).unwrap() };

    machine.restore_interrupts(true);

    Bench {
        idle,
        mlfqs: mlfqs_tid,
        wakeup,
        ..bench
    }
}

impl Bench {
    /// Exécute `f` en rattrapant l'éventuel changement de contexte, qui est
    /// alors achevé comme le ferait le stub dans le thread entrant.
    pub fn step<T>(&self, f: impl FnOnce() -> T) -> Step<T> {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Step::Done(value),
            Err(payload) => {
                if payload.is::<SwitchSignal>() {
                    let (prev, _next) = self.machine.last_switch();
                    unsafe { self.kernel.finish_context_switch(prev) };
                    // Un thread fraîchement élu court interruptions
                    // ouvertes.
                    self.machine.interrupts.set(true);
                    Step::Switched
                } else {
                    resume_unwind(payload)
                }
            }
        }
    }

    /// Crée un thread sans préemption possible, le retire de la file des
    /// prêts et le laisse bloqué avec sa priorité définitive — l'état d'un
    /// thread de service après son premier tour.
    pub fn spawn_parked(&self, name: &str, priority: i32) -> Tid {
        let tid = self
            .kernel
            .thread_create(name, PRI_MIN, noop_entry, ptr::null_mut())
            .unwrap();
        let thread = self.kernel.find_thread(tid).unwrap();
        unsafe {
            let was_enabled = self.kernel.machine().disable_interrupts();
            match self.kernel.sched().ready {
                ReadyQueues::Priority(ref mut list) => list.remove(&mut (*thread).sched_link),
                ReadyQueues::Mlfqs(ref mut buckets) => {
                    buckets[(*thread).priority as usize].remove(&mut (*thread).mlfqs_link)
                }
            }
            (*thread).status = ThreadStatus::Blocked;
            (*thread).priority = priority;
            (*thread).base_priority = priority;
            self.kernel.machine().restore_interrupts(was_enabled);
        }
        tid
    }

    /// Crée un thread prêt, sans préemption (le test reste le courant).
    pub fn spawn_ready(&self, name: &str, priority: i32) -> Tid {
        assert!(priority <= self.kernel.thread_get_priority());
        self.kernel
            .thread_create(name, priority, noop_entry, ptr::null_mut())
            .unwrap()
    }

    pub fn thread(&self, tid: Tid) -> *mut Thread {
        self.kernel.find_thread(tid).expect("no such thread")
    }

    /// Tid d'un thread vivant retrouvé par son nom.
    pub fn tid_by_name(&self, name: &str) -> Tid {
        unsafe {
            for t in self.kernel.sched().all_list.iter() {
                if (*t).name() == name {
                    return (*t).tid;
                }
            }
        }
        panic!("no live thread named {:?}", name);
    }

    pub fn current_tid(&self) -> Tid {
        self.kernel.thread_tid()
    }

    pub fn current_name(&self) -> String {
        self.kernel.thread_name()
    }

    pub fn status_of(&self, tid: Tid) -> ThreadStatus {
        unsafe { (*self.thread(tid)).status }
    }

    /// Bloque le thread courant ; un autre doit prendre la main.
    pub fn park_current(&self) {
        self.step(|| {
            self.kernel.machine().disable_interrupts();
            self.kernel.thread_block();
        })
        .assert_switched();
    }

    /// Attache un espace d'adressage simulé au thread courant, qui devient
    /// de ce fait un processus utilisateur.
    pub fn make_user(&self) -> Arc<MockPages> {
        let pages = Arc::new(MockPages::default());
        unsafe {
            let current = self.kernel.thread_current();
            (*current).pagedir = Some(Box::new(MockAddressSpace {
                pages: pages.clone(),
            }));
        }
        pages
    }

    /// Un tic d'horloge complet : l'interruption elle-même, puis la
    /// préemption de fin d'interruption et les tours des threads de service
    /// qu'elle a réveillés.
    pub fn tick(&self) {
        self.machine.ticks.set(self.machine.ticks.get() + 1);
        self.machine.in_interrupt.set(true);
        let was_enabled = self.machine.disable_interrupts();
        self.kernel.timer_tick();
        self.machine.restore_interrupts(was_enabled);
        self.machine.in_interrupt.set(false);

        if self.machine.yield_requested.replace(false) {
            let _ = self.step(|| self.kernel.thread_yield());
        }
        self.run_services();
    }

    pub fn run_ticks(&self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    /// Joue les corps des threads de service tant que l'un d'eux est le
    /// courant : le travail d'un réveil, puis retour au blocage.
    pub fn run_services(&self) {
        loop {
            let current = unsafe { self.kernel.sched().current };
            let sched = unsafe { self.kernel.sched() };
            if !current.is_null() && current == sched.mlfqs_thread {
                self.kernel.mlfqs_work();
                self.park_current();
            } else if !current.is_null() && current == sched.wakeup_thread {
                self.kernel.alarm_work();
                self.park_current();
            } else {
                break;
            }
        }
    }
}
