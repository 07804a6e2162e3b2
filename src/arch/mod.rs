//! Architecture-specific context switching.
//!
//! Each submodule provides the same three primitives over a `#[repr(C)]`
//! register-save area:
//! - `Context::new_for_task`: context whose first resumption enters an entry
//!   function on a fresh stack
//! - `context_switch`: save the caller into `old`, restore `new`
//! - `switch_terminal`: restore `to` without saving the caller

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub(crate) use x86_64::{Context, context_switch, switch_terminal};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub(crate) use aarch64::{Context, context_switch, switch_terminal};
