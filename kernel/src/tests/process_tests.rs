//! Fiches enfants, rendez-vous exec/wait/exit et table des fichiers.

use std::boxed::Box;
use std::ptr;
use std::string::String;
use std::sync::Arc;

use super::harness::{boot, noop_entry, MockAddressSpace, MockPages};
use crate::scheduler::thread::ThreadStatus;

#[test]
fn exec_spawns_then_wait_reaps_the_status() {
    let bench = boot(false);
    let kernel = bench.kernel;
    bench.fs.add("child", b"\x7fELF");

    let tid = kernel.exec("child arg1 arg2");
    assert!(tid > 0);
    assert_eq!(*bench.loader.last_spawned.lock().unwrap(), Some(tid));

    // L'enfant, à priorité égale, prend la main au premier yield et se
    // termine avec 42.
    bench.step(|| kernel.thread_yield()).assert_switched();
    assert_eq!(bench.current_tid(), tid);
    bench
        .step(|| kernel.process_exit_with_status(42))
        .assert_switched();

    assert_eq!(bench.current_tid(), 1);
    assert!(kernel.find_thread(tid).is_none());
    assert_eq!(kernel.process_wait(tid), 42);

    // Attendre deux fois le même enfant échoue.
    assert_eq!(kernel.process_wait(tid), -1);
}

#[test]
fn exec_fails_when_the_program_does_not_open() {
    let bench = boot(false);
    let kernel = bench.kernel;

    assert_eq!(kernel.exec("missing"), -1);
    assert!(bench.loader.last_spawned.lock().unwrap().is_none());
    // Le verrou global a été relâché proprement.
    assert!(kernel.fs_lock().holder().is_null());
}

#[test]
fn exec_probes_only_the_program_name() {
    let bench = boot(false);
    bench.fs.add("prog", b"");

    assert!(bench.kernel.exec("prog --with --args") > 0);
    let ops = bench.fs.ops.lock().unwrap();
    assert!(ops.contains(&String::from("open:prog")));
}

#[test]
fn wait_on_an_unknown_child_fails() {
    let bench = boot(false);
    assert_eq!(bench.kernel.process_wait(9999), -1);
}

#[test]
fn blocked_wait_is_released_by_the_child_exit() {
    let bench = boot(false);
    let kernel = bench.kernel;
    bench.fs.add("child", b"");

    let tid = kernel.exec("child");

    // Le parent s'endort sur le rendez-vous tant que l'enfant vit.
    bench.step(|| kernel.process_wait(tid)).assert_switched();
    assert_eq!(bench.current_tid(), tid);
    assert_eq!(bench.status_of(1), ThreadStatus::Blocked);

    // L'exit de l'enfant relève le parent par remise directe du sémaphore.
    bench
        .step(|| kernel.process_exit_with_status(7))
        .assert_switched();
    assert_eq!(bench.current_tid(), 1);
    assert_eq!(bench.status_of(1), ThreadStatus::Running);

    // Le parent, de retour dans `wait`, moissonne la fiche déposée.
    assert_eq!(kernel.process_wait(tid), 7);
    assert_eq!(kernel.process_wait(tid), -1);
}

#[test]
fn orphans_skip_the_signal_step() {
    let bench = boot(false);
    let kernel = bench.kernel;

    // Un parent intermédiaire prend la main et crée un enfant, puis meurt :
    // l'enfant doit voir son pointeur de parent annulé.
    let middle = bench.spawn_parked("middle", 50);
    kernel.thread_unblock(bench.thread(middle));
    bench.step(|| kernel.thread_yield()).assert_switched();
    assert_eq!(bench.current_tid(), middle);

    let child = bench.spawn_ready("orphan", 40);
    let child_ptr = bench.thread(child);
    unsafe {
        assert_eq!((*child_ptr).parent, bench.thread(middle));
    }

    bench.step(|| kernel.thread_exit()).assert_switched();
    assert_eq!(bench.current_tid(), child);
    unsafe {
        assert!((*child_ptr).parent.is_null());
    }

    // L'orphelin peut se terminer sans parent à prévenir.
    bench
        .step(|| kernel.process_exit_with_status(3))
        .assert_switched();
    assert_eq!(bench.current_tid(), 1);
    assert!(kernel.find_thread(child).is_none());
}

#[test]
fn exit_closes_files_and_releases_the_executable() {
    let bench = boot(false);
    let kernel = bench.kernel;
    bench.fs.add("prog", b"code");
    bench.fs.add("data", b"0123456789");

    // Un processus utilisateur complet, exécutable protégé en écriture.
    let executable = kernel.filesys().open("prog");
    let pages = Arc::new(MockPages::default());
    let tid = kernel
        .thread_create_user(
            "prog",
            crate::config::PRI_DEFAULT,
            noop_entry,
            ptr::null_mut(),
            Box::new(MockAddressSpace { pages }),
            executable,
        )
        .unwrap();
    assert!(bench.fs.write_denied("prog"));

    bench.step(|| kernel.thread_yield()).assert_switched();
    assert_eq!(bench.current_tid(), tid);

    kernel.open_file("data");
    assert_eq!(kernel.open_file_count(), 1);

    bench
        .step(|| kernel.process_exit_with_status(0))
        .assert_switched();

    // Fichiers fermés, protection d'écriture levée, message de sortie émis.
    assert!(!bench.fs.write_denied("prog"));
    assert!(kernel.fs_lock().holder().is_null());
    assert!(bench.console.output_string().contains("prog: exit(0)"));
}

#[test]
fn file_descriptors_grow_monotonically_without_reuse() {
    let bench = boot(false);
    let kernel = bench.kernel;
    bench.fs.add("a.txt", b"aaa");
    bench.fs.add("b.txt", b"bbb");
    bench.fs.add("c.txt", b"ccc");

    let fd_a = kernel.open_file("a.txt");
    let fd_b = kernel.open_file("b.txt");
    assert_eq!(fd_a, 2);
    assert_eq!(fd_b, 3);

    kernel.close_file(fd_a);
    let fd_c = kernel.open_file("c.txt");
    assert_eq!(fd_c, 4);
}

#[test]
fn open_then_close_leaves_the_table_unchanged() {
    let bench = boot(false);
    let kernel = bench.kernel;
    bench.fs.add("f", b"x");

    let before = kernel.open_file_count();
    let fd = kernel.open_file("f");
    assert_eq!(kernel.open_file_count(), before + 1);
    kernel.close_file(fd);
    assert_eq!(kernel.open_file_count(), before);
}

#[test]
fn opening_a_missing_file_fails() {
    let bench = boot(false);
    assert_eq!(bench.kernel.open_file("nope"), -1);
    assert_eq!(bench.kernel.open_file_count(), 0);
}

#[test]
fn closing_an_unknown_fd_is_a_silent_no_op() {
    let bench = boot(false);
    bench.kernel.close_file(77);
    assert_eq!(bench.kernel.open_file_count(), 0);
}

#[test]
fn file_positions_seek_and_tell() {
    let bench = boot(false);
    let kernel = bench.kernel;
    bench.fs.add("f", b"0123456789");

    let fd = kernel.open_file("f");
    assert_eq!(kernel.file_size(fd), 10);
    assert_eq!(kernel.tell_file(fd), 0);

    kernel.seek_file(fd, 6);
    assert_eq!(kernel.tell_file(fd), 6);

    // Descripteurs inconnus : −1, et seek sans effet.
    assert_eq!(kernel.file_size(99), -1);
    assert_eq!(kernel.tell_file(99), -1);
    kernel.seek_file(99, 3);
}
