//! Managed callables invoked by the engine
//!
//! A managed [`Closure`] is registered with [`register`], which produces a
//! Closure handle wrapping a C-layout [`NativeClosure`] record. Engines invoke
//! the record; [`upcall_trampoline`] routes the call back to the callable with
//! borrowed views of the upcall arguments and converts managed failures into
//! [`UpcallResult::Error`].

mod dispatch;
mod record;
mod retained;
mod upcall;

pub use dispatch::{abandon, dispatch, is_armed, register, upcall_trampoline};
pub use record::{ClosurePtr, NativeClosure, NativeUpcallInfo, UpcallFn};
pub use retained::Retained;
pub use upcall::{from_fn, Closure, FnClosure, UpcallError, UpcallEvent, UpcallKind, UpcallResult};
