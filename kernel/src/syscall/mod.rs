//! # Distribution des Appels Système
//!
//! Un seul vecteur d'interruption logicielle : le numéro d'appel est lu à
//! l'adresse pointée par le pointeur de pile utilisateur, les arguments aux
//! mots suivants. Chaque adresse d'argument est validée avant d'être
//! déréférencée ; un argument qui est lui-même un pointeur utilisateur est
//! validé après lecture de sa valeur. Toute adresse invalide termine le
//! processus fautif avec le statut −1, sans jamais remonter d'erreur.
//!
//! Le résultat éventuel est déposé dans le registre de retour du cadre de
//! trappe. Les appels qui touchent le système de fichiers prennent le verrou
//! global ; l'écriture console ne le prend pas.

pub mod handlers;

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::{PGSIZE, PHYS_BASE};
use crate::kernel::Kernel;

/// Vecteur de l'interruption logicielle des appels système.
pub const SYSCALL_VECTOR: u8 = 0x30;

/// Niveau de privilège depuis lequel le vecteur est accessible.
pub const SYSCALL_DPL: u8 = 3;

// Numéros d'appel système.
pub const SYS_HALT: i32 = 0;
pub const SYS_EXIT: i32 = 1;
pub const SYS_EXEC: i32 = 2;
pub const SYS_WAIT: i32 = 3;
pub const SYS_CREATE: i32 = 4;
pub const SYS_REMOVE: i32 = 5;
pub const SYS_OPEN: i32 = 6;
pub const SYS_FILESIZE: i32 = 7;
pub const SYS_READ: i32 = 8;
pub const SYS_WRITE: i32 = 9;
pub const SYS_SEEK: i32 = 10;
pub const SYS_TELL: i32 = 11;
pub const SYS_CLOSE: i32 = 12;

/// Le cadre de trappe minimal vu par le répartiteur : le pointeur de pile
/// utilisateur au moment de l'interruption, et le registre dans lequel le
/// résultat est rendu au programme.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TrapFrame {
    /// Pointeur de pile utilisateur (adresse virtuelle).
    pub esp: u32,
    /// Registre de retour.
    pub eax: u32,
}

/// Adresse du `index`-ième mot au-dessus du pointeur de pile.
fn arg(p: u32, index: u32) -> u32 {
    p.wrapping_add(4 * index)
}

/// Point d'entrée installé sur le vecteur : retrouve le noyau global et
/// répartit.
fn syscall_entry(frame: &mut TrapFrame) {
    crate::kernel::kernel().syscall_handler(frame);
}

impl Kernel {
    /// Enregistre le gestionnaire d'appels système auprès du contrôleur
    /// d'interruptions.
    pub fn syscall_init(&self) {
        self.machine()
            .register_interrupt(SYSCALL_VECTOR, SYSCALL_DPL, "syscall", syscall_entry);
    }

    /// Répartit un appel système d'après le numéro posé sur la pile
    /// utilisateur.
    pub fn syscall_handler(&self, frame: &mut TrapFrame) {
        let p = frame.esp;
        let number = self.user_word(p);

        match number {
            SYS_HALT => self.machine().power_off(),

            SYS_EXIT => {
                let status = self.user_word(arg(p, 1));
                self.process_exit_with_status(status);
            }

            SYS_EXEC => {
                let cmdline_ptr = self.user_word(arg(p, 1)) as u32;
                self.check_user_ptr(cmdline_ptr);
                let cmdline = self.user_cstr(cmdline_ptr);
                frame.eax = self.exec(&cmdline) as u32;
            }

            SYS_WAIT => {
                let child_tid = self.user_word(arg(p, 1));
                frame.eax = self.process_wait(child_tid) as u32;
            }

            SYS_CREATE => {
                let name_ptr = self.user_word(arg(p, 4)) as u32;
                let initial_size = self.user_word(arg(p, 5)) as u32;
                self.check_user_ptr(name_ptr);
                let name = self.user_cstr(name_ptr);
                frame.eax = self.sys_create(&name, initial_size) as u32;
            }

            SYS_REMOVE => {
                let name_ptr = self.user_word(arg(p, 1)) as u32;
                self.check_user_ptr(name_ptr);
                let name = self.user_cstr(name_ptr);
                frame.eax = self.sys_remove(&name) as u32;
            }

            SYS_OPEN => {
                let name_ptr = self.user_word(arg(p, 1)) as u32;
                self.check_user_ptr(name_ptr);
                let name = self.user_cstr(name_ptr);
                frame.eax = self.open_file(&name) as u32;
            }

            SYS_FILESIZE => {
                let fd = self.user_word(arg(p, 1));
                frame.eax = self.file_size(fd) as u32;
            }

            SYS_READ => {
                let fd = self.user_word(arg(p, 5));
                let buf = self.user_word(arg(p, 6)) as u32;
                let size = self.user_word(arg(p, 7)) as u32;
                self.check_user_ptr(buf);
                frame.eax = self.sys_read(fd, buf, size) as u32;
            }

            SYS_WRITE => {
                let fd = self.user_word(arg(p, 5));
                let buf = self.user_word(arg(p, 6)) as u32;
                let size = self.user_word(arg(p, 7)) as u32;
                self.check_user_ptr(buf);
                frame.eax = self.sys_write(fd, buf, size) as u32;
            }

            SYS_SEEK => {
                let fd = self.user_word(arg(p, 4));
                let pos = self.user_word(arg(p, 5)) as u32;
                self.seek_file(fd, pos);
            }

            SYS_TELL => {
                let fd = self.user_word(arg(p, 1));
                frame.eax = self.tell_file(fd) as u32;
            }

            SYS_CLOSE => {
                let fd = self.user_word(arg(p, 1));
                self.close_file(fd);
            }

            unknown => {
                log::warn!("unknown syscall {}", unknown);
            }
        }
    }

    // -- Accès mémoire utilisateur --------------------------------------

    /// Traduction d'une adresse utilisateur vers son alias noyau, via le
    /// répertoire de pages du processus courant. `None` si l'adresse mord
    /// sur la moitié noyau ou n'est pas mappée.
    fn user_to_kernel(&self, vaddr: u32) -> Option<*mut u8> {
        if vaddr >= PHYS_BASE {
            return None;
        }
        unsafe {
            let current = self.thread_current();
            match (*current).pagedir.as_ref() {
                None => None,
                Some(pagedir) => pagedir.translate(vaddr),
            }
        }
    }

    /// Valide une adresse utilisateur, et termine le processus fautif avec
    /// −1 si elle ne l'est pas.
    pub(crate) fn check_user_ptr(&self, vaddr: u32) {
        if self.user_to_kernel(vaddr).is_none() {
            self.process_exit_with_status(-1);
        }
    }

    /// Copie `dst.len()` octets depuis la mémoire utilisateur, page par
    /// page. Retourne `false` dès qu'une page n'est pas mappée.
    pub(crate) fn copy_from_user(&self, uaddr: u32, dst: &mut [u8]) -> bool {
        let mut done = 0usize;
        while done < dst.len() {
            let vaddr = match uaddr.checked_add(done as u32) {
                Some(v) => v,
                None => return false,
            };
            let kernel_ptr = match self.user_to_kernel(vaddr) {
                Some(p) => p,
                None => return false,
            };
            let page_offset = vaddr as usize & (PGSIZE - 1);
            let chunk = (PGSIZE - page_offset).min(dst.len() - done);
            unsafe {
                core::ptr::copy_nonoverlapping(kernel_ptr, dst[done..].as_mut_ptr(), chunk);
            }
            done += chunk;
        }
        true
    }

    /// Copie `src` vers la mémoire utilisateur, page par page. Retourne
    /// `false` dès qu'une page n'est pas mappée.
    pub(crate) fn copy_to_user(&self, uaddr: u32, src: &[u8]) -> bool {
        let mut done = 0usize;
        while done < src.len() {
            let vaddr = match uaddr.checked_add(done as u32) {
                Some(v) => v,
                None => return false,
            };
            let kernel_ptr = match self.user_to_kernel(vaddr) {
                Some(p) => p,
                None => return false,
            };
            let page_offset = vaddr as usize & (PGSIZE - 1);
            let chunk = (PGSIZE - page_offset).min(src.len() - done);
            unsafe {
                core::ptr::copy_nonoverlapping(src[done..].as_ptr(), kernel_ptr, chunk);
            }
            done += chunk;
        }
        true
    }

    /// Lit un mot de 32 bits sur la pile utilisateur ; termine le processus
    /// fautif si l'adresse est invalide.
    pub(crate) fn user_word(&self, vaddr: u32) -> i32 {
        let mut bytes = [0u8; 4];
        if !self.copy_from_user(vaddr, &mut bytes) {
            self.process_exit_with_status(-1);
        }
        i32::from_le_bytes(bytes)
    }

    /// Lit une chaîne C depuis la mémoire utilisateur, limitée à une page.
    /// Termine le processus fautif si la chaîne sort de l'espace mappé ou
    /// n'est pas terminée.
    pub(crate) fn user_cstr(&self, uaddr: u32) -> String {
        let mut bytes: Vec<u8> = Vec::new();
        for offset in 0..PGSIZE as u32 {
            let mut byte = [0u8; 1];
            let vaddr = match uaddr.checked_add(offset) {
                Some(v) => v,
                None => self.process_exit_with_status(-1),
            };
            if !self.copy_from_user(vaddr, &mut byte) {
                self.process_exit_with_status(-1);
            }
            if byte[0] == 0 {
                return String::from_utf8_lossy(&bytes).into_owned();
            }
            bytes.push(byte[0]);
        }
        self.process_exit_with_status(-1);
    }
}
