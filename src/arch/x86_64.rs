//! x86_64 implementation of context switching.

use std::arch::naked_asm;

/// Saved CPU context for context switching.
///
/// On x86_64 System V ABI, these are the callee-saved registers
/// that must be preserved across function calls.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub(crate) struct Context {
    /// Stack pointer
    rsp: u64,
    /// Frame pointer
    rbp: u64,
    /// General purpose (callee-saved)
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

impl Context {
    /// Create a context whose first resumption enters `entry` on a fresh stack.
    ///
    /// - `stack_top`: the top of the stack (highest address), 16-byte aligned
    /// - `entry`: the entry point function address
    pub(crate) fn new_for_task(stack_top: usize, entry: usize) -> Self {
        // System V ABI requires RSP to be 16-byte aligned BEFORE `call`.
        // After `call`, RSP becomes 16n+8 (pushed return address). Since the
        // switch uses `ret` instead of `call`, simulate that:
        //
        // Stack layout (growing downward):
        //   stack_top - 8:  (padding for alignment)
        //   stack_top - 16: return address (entry)
        //
        // After `ret`: RSP = stack_top - 8, which is 16n+8 as required.
        let initial_rsp = stack_top - 16;

        unsafe {
            std::ptr::write(initial_rsp as *mut u64, entry as u64);
        }

        Context {
            rsp: initial_rsp as u64,
            ..Default::default()
        }
    }
}

/// Switch from one context to another.
///
/// Saves the current CPU state into `old` and restores state from `new`.
/// This function returns when another context switches back to `old`.
///
/// # Safety
/// Both pointers must be valid. The `new` context must have been properly
/// initialized (either by a previous `context_switch` or by `new_for_task`),
/// and must not be running on any other thread.
#[unsafe(naked)]
pub(crate) extern "C" fn context_switch(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        // Save callee-saved registers to old context (rdi)
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        // Load callee-saved registers from new context (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        // Return to the new context.
        // For a fresh task: pops the entry address and jumps there.
        // For a suspended task: returns to where it called context_switch.
        "ret",
    );
}

/// Restore `to` without saving the caller's state.
///
/// Used on the task-exit path: the exiting context is never resumed, so
/// there is nothing worth saving.
///
/// # Safety
/// Same requirements on `to` as [`context_switch`]. The caller's stack frame
/// is abandoned; control never returns.
#[unsafe(naked)]
pub(crate) extern "C" fn switch_terminal(_to: *const Context) -> ! {
    naked_asm!(
        "mov rsp, [rdi + 0x00]",
        "mov rbp, [rdi + 0x08]",
        "mov rbx, [rdi + 0x10]",
        "mov r12, [rdi + 0x18]",
        "mov r13, [rdi + 0x20]",
        "mov r14, [rdi + 0x28]",
        "mov r15, [rdi + 0x30]",
        "ret",
    );
}
