//! Pseudo-terminal sessions

mod session;

pub use session::{PtySession, PtySink, PtySource};
