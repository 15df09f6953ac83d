pub mod bridge;
pub mod cancel;
pub mod engine;
pub mod io;
pub mod mem_impl;

pub use bridge::{CallCookie, Host, HostEnv};
pub use io::{IoContext, IoHandle, IoThread};
