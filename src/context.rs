//! Stackful execution contexts and the `switch_to` primitive (spec §4.1).
//!
//! This is the one place that manipulates stacks directly. Every higher
//! layer (the processor main loop, mutex-object handover, condition-wait)
//! reaches a context switch only by going through [`switch_to`].
//!
//! The save/restore sequence below is grounded on the x86_64 System V
//! callee-saved register set used by the pack's stackful-coroutine and
//! green-thread examples: `rsp`/`rbp`/`rbx`/`r12`-`r15` are the registers a
//! callee must preserve across a call, so saving exactly those (plus the
//! return address implicitly, via the stack) is sufficient to resume a
//! suspended context as if the `call` to [`switch_to`] had simply returned.
//! Floating-point/SIMD state is not saved here: the x86_64 SysV ABI treats
//! the legacy x87/MMX/SSE register file as caller-saved, so nothing in a
//! callee-preserved switch needs to touch it (spec §4.1).

#[cfg(not(target_arch = "x86_64"))]
compile_error!("uexec::context currently implements switch_to for x86_64 only");

use std::alloc::{Layout, alloc, dealloc};
use std::ptr;

/// Callee-saved register file for one suspended execution context.
///
/// Field order matches the offsets baked into the `switch_to` assembly
/// below; do not reorder without updating both.
#[repr(C)]
#[derive(Debug)]
pub struct Context {
    rsp: u64,
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbx: u64,
    rbp: u64,
}

impl Context {
    /// An empty context, valid only as the *from* side of the very first
    /// switch performed by a processor's own kernel-thread stack (it is
    /// never itself resumed as a *to* target until something switches back
    /// into it).
    pub fn empty() -> Self {
        Context {
            rsp: 0,
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbx: 0,
            rbp: 0,
        }
    }
}

/// Owns the backing memory for a task's stack and the context pointing into
/// it. Dropping a [`Stack`] frees the allocation; a `Stack` must never be
/// dropped while some `Context` still has live registers pointing inside it
/// (the task layer upholds this by only dropping a task's stack after it
/// reaches `Terminate`).
pub struct Stack {
    base: *mut u8,
    layout: Layout,
}

// Safety: the stack memory is only ever touched by the single processor
// thread currently executing (or about to execute) the task it belongs to;
// ownership transfer between processors happens while the task is not
// running, synchronized by the cluster's spinlock.
unsafe impl Send for Stack {}

impl Stack {
    /// Allocate a new stack of `size` bytes, rounded up to a 16-byte
    /// alignment boundary as the x86_64 ABI requires at a `call` site.
    pub fn new(size: usize) -> Self {
        let size = size.max(16 * 1024);
        let layout = Layout::from_size_align(size, 16).expect("stack layout");
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        Stack { base, layout }
    }

    fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.layout.size()) }
    }

    /// Build a [`Context`] for a brand-new task whose first resumption will
    /// execute `trampoline`. Primes the stack exactly the way the pack's
    /// stackful-coroutine example does: write the trampoline's address at
    /// the (16-byte aligned, then backed off by one word) top of the new
    /// stack, so the `ret` at the end of `switch_to`'s restore sequence
    /// jumps straight into it.
    pub fn prime(&self, trampoline: unsafe extern "C" fn() -> !) -> Context {
        unsafe {
            let top = self.top() as usize;
            let aligned = top & !0xf;
            let sp = (aligned - 8) as *mut u64;
            ptr::write(sp, trampoline as usize as u64);
            Context {
                rsp: sp as u64,
                r15: 0,
                r14: 0,
                r13: 0,
                r12: 0,
                rbx: 0,
                rbp: 0,
            }
        }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}

/// Switch from the currently running context to `to`, saving callee-saved
/// state into `from` first.
///
/// # Safety
/// `from` must point at a valid, currently-live `Context` (typically
/// embedded in the task that is calling this function) and `to` must point
/// at a `Context` previously produced by [`Stack::prime`] or by a prior
/// `switch_to` that saved into it. Both pointers must remain valid for the
/// duration of the call; the caller (the processor main loop) is
/// responsible for that, since only it knows when a task's storage may be
/// reclaimed.
#[inline(never)]
pub unsafe fn switch_to(from: *mut Context, to: *const Context) {
    unsafe {
        raw_switch(from, to);
    }
}

std::arch::global_asm!(
    ".global uexec_raw_switch",
    "uexec_raw_switch:",
    "mov [rdi + 0x00], rsp",
    "mov [rdi + 0x08], r15",
    "mov [rdi + 0x10], r14",
    "mov [rdi + 0x18], r13",
    "mov [rdi + 0x20], r12",
    "mov [rdi + 0x28], rbx",
    "mov [rdi + 0x30], rbp",
    "mov rsp, [rsi + 0x00]",
    "mov r15, [rsi + 0x08]",
    "mov r14, [rsi + 0x10]",
    "mov r13, [rsi + 0x18]",
    "mov r12, [rsi + 0x20]",
    "mov rbx, [rsi + 0x28]",
    "mov rbp, [rsi + 0x30]",
    "ret",
);

unsafe extern "C" {
    fn uexec_raw_switch(from: *mut Context, to: *const Context);
}

unsafe fn raw_switch(from: *mut Context, to: *const Context) {
    unsafe { uexec_raw_switch(from, to) }
}
