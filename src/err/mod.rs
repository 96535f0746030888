mod header_error;
pub use header_error::*;

mod register_app_error;
pub use register_app_error::*;

mod unknown_state_name_error;
pub use unknown_state_name_error::*;
