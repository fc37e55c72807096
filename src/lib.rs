pub mod config;
pub mod dictionary;
pub mod dom;
pub mod expansions;
pub mod ffi;
pub mod intercept;
pub mod ledger;
pub mod lookup;
pub mod owned;
pub mod progress;
pub mod session;
pub mod store;
pub mod substitute;
pub mod sweep;
pub mod watcher;

pub use dictionary::{CompiledDictionary, TermDictionary};
pub use session::{Command, Session, SessionOptions, SessionState};
pub use substitute::Mode;
