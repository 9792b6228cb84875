//! Command implementations.
//!
//! Commands are synchronous: `main` runs them on a blocking thread while the
//! async runtime listens for Ctrl+C.

pub mod evaluate;
pub mod inspect;
pub mod recommend;
pub mod train;
pub mod update;

pub use self::evaluate::execute_evaluate;
pub use self::inspect::execute_inspect;
pub use self::recommend::execute_recommend;
pub use self::train::execute_train;
pub use self::update::execute_update;
