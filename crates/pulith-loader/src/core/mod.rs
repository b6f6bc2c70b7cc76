//! Pure functions over request data.
//!
//! Header grammar checks and challenge parsing. Nothing here touches the
//! network or the coordination thread.

mod challenge;
mod validation;

pub use challenge::{Challenge, parse_challenge};
pub use validation::{is_valid_header_name, is_valid_header_value, valid_headers};
